//! logstream Broker
//!
//! The connection and dispatch engine on top of [`logstream_storage`]:
//! length-framed TCP protocol, per-connection command handling, and one
//! batching delivery task per client id with heartbeat-based liveness and
//! durable offset checkpointing.

pub mod codec;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod server;
pub mod session;

pub use codec::FrameCodec;
pub use command::Command;
pub use config::BrokerConfig;
pub use error::{BrokerError, BrokerResult};
pub use server::{BoundBroker, Broker, BrokerState};
pub use session::{ClientRegistry, ClientSession};
