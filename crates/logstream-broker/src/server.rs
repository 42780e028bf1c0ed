//! Broker server
//!
//! TCP server speaking the length-framed command protocol. One task per
//! connection reads inbound frames; delivery to a client runs in its own
//! dispatch task (see [`crate::dispatch`]), shared-state tables live in
//! [`ClientRegistry`].
//!
//! | Command | Precondition | Effect |
//! |---|---|---|
//! | `REG` | none | allocate a client id, reply `[len][id]` |
//! | `CID <id>` | none | bind to an id, cancelling its previous dispatch |
//! | `SUB <topic>` | identity | track topic at offset 0 if new; start dispatch |
//! | `SET <topic> <offset>` | identity | overwrite the committed offset |
//! | `PUB <topic> <payload>` | identity | append; success pulses the topic signal |
//! | `PNG` | identity | refresh the heartbeat |
//!
//! Malformed frames, unknown commands, and identity-requiring commands on
//! an unbound connection all terminate the connection; the client sees a
//! silent disconnect.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use logstream_storage::{LogStore, OffsetStore};

use crate::codec::FrameCodec;
use crate::command::Command;
use crate::config::BrokerConfig;
use crate::dispatch::{Dispatcher, FrameSink};
use crate::error::{BrokerError, BrokerResult};
use crate::session::{ClientRegistry, ClientSession};

/// Shared state for all connections.
pub struct BrokerState {
    pub config: Arc<BrokerConfig>,
    pub log: Arc<LogStore>,
    pub offsets: Arc<OffsetStore>,
    pub registry: Arc<ClientRegistry>,
    next_conn_id: AtomicU64,
}

pub struct Broker;

impl Broker {
    /// Bind the listener and return a server ready to run.
    pub async fn bind(
        config: BrokerConfig,
        log: Arc<LogStore>,
        offsets: Arc<OffsetStore>,
    ) -> BrokerResult<BoundBroker> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        info!("broker listening on {}", listener.local_addr()?);
        let state = Arc::new(BrokerState {
            config: Arc::new(config),
            log,
            offsets,
            registry: Arc::new(ClientRegistry::new()),
            next_conn_id: AtomicU64::new(0),
        });
        Ok(BoundBroker { listener, state })
    }
}

/// A broker bound to its port.
pub struct BoundBroker {
    listener: TcpListener,
    state: Arc<BrokerState>,
}

impl BoundBroker {
    pub fn local_addr(&self) -> BrokerResult<SocketAddr> {
        self.listener.local_addr().map_err(BrokerError::from)
    }

    /// Accept connections until the process ends.
    pub async fn run(self) -> BrokerResult<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => spawn_connection(self.state.clone(), stream, addr),
                Err(e) => error!("failed to accept connection: {}", e),
            }
        }
    }

    /// Accept connections until the shutdown signal fires.
    pub async fn run_until(
        self,
        shutdown: tokio::sync::oneshot::Receiver<()>,
    ) -> BrokerResult<()> {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                result = self.listener.accept() => match result {
                    Ok((stream, addr)) => spawn_connection(self.state.clone(), stream, addr),
                    Err(e) => error!("failed to accept connection: {}", e),
                },
                _ = &mut shutdown => {
                    info!("broker shutting down");
                    return Ok(());
                }
            }
        }
    }
}

fn spawn_connection(state: Arc<BrokerState>, stream: TcpStream, addr: SocketAddr) {
    let conn_id = state.next_conn_id.fetch_add(1, Ordering::Relaxed) + 1;
    tokio::spawn(async move {
        match handle_connection(stream, addr, state, conn_id).await {
            Ok(()) => debug!(%addr, "connection closed"),
            // Malformed clients are disconnected silently; the reason only
            // shows up in debug logs.
            Err(BrokerError::Protocol(reason)) => {
                debug!(%addr, reason, "dropped malformed connection")
            }
            Err(e) => warn!(%addr, error = %e, "connection error"),
        }
    });
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    state: Arc<BrokerState>,
    conn_id: u64,
) -> BrokerResult<()> {
    debug!(%addr, conn_id, "new connection");
    let codec = FrameCodec::with_max_frame_size(state.config.max_frame_bytes);
    let (sink, mut frames) = Framed::new(stream, codec).split();

    let mut conn = Connection {
        state: state.clone(),
        conn_id,
        sink: Arc::new(Mutex::new(sink)),
        client: None,
    };
    let result = conn.run(&mut frames).await;

    // A dispatch task still writing to this connection's socket dies with
    // it; the session and offsets stay for a reconnect.
    if let Some((client_id, _)) = &conn.client {
        state.registry.cancel_dispatch_for_conn(client_id, conn_id);
    }
    result
}

struct Connection {
    state: Arc<BrokerState>,
    conn_id: u64,
    sink: Arc<Mutex<FrameSink>>,
    client: Option<(String, Arc<ClientSession>)>,
}

impl Connection {
    async fn run(
        &mut self,
        frames: &mut SplitStream<Framed<TcpStream, FrameCodec>>,
    ) -> BrokerResult<()> {
        while let Some(frame) = frames.next().await {
            let frame = frame?;
            let command = Command::parse(&frame, self.state.config.publish_checksums)?;
            match command {
                Command::Register => {
                    let client_id = Uuid::new_v4().to_string();
                    let session = self.state.registry.session(&client_id);
                    self.send(Bytes::copy_from_slice(client_id.as_bytes()))
                        .await?;
                    debug!(client = %client_id, "registered new client");
                    self.client = Some((client_id, session));
                }
                Command::Bind { client_id } => {
                    // At most one active deliverer per id: rebind cancels.
                    self.state.registry.cancel_dispatch(&client_id);
                    let session = self.state.registry.session(&client_id);
                    debug!(client = %client_id, conn = self.conn_id, "bound connection");
                    self.client = Some((client_id, session));
                }
                command => {
                    let Some((client_id, session)) = self.client.clone() else {
                        return Err(BrokerError::Protocol(
                            "identity required before this command".to_string(),
                        ));
                    };
                    self.handle_bound(&client_id, &session, command).await?;
                }
            }
        }
        Ok(())
    }

    async fn handle_bound(
        &self,
        client_id: &str,
        session: &Arc<ClientSession>,
        command: Command,
    ) -> BrokerResult<()> {
        match command {
            Command::Subscribe { topic } => {
                self.state.log.create_topic(&topic)?;
                if !self.state.offsets.is_subscribed(client_id, &topic) {
                    self.state.offsets.commit(client_id, &topic, 0).await?;
                }
                debug!(client = %client_id, topic, "subscribed");
                self.start_dispatch(client_id, session);
            }
            Command::Seek { topic, offset } => {
                if let Err(e) = self.state.offsets.reset(client_id, &topic, offset).await {
                    warn!(client = %client_id, topic, error = %e, "offset reset failed");
                }
            }
            Command::Publish {
                topic,
                payload,
                checksum,
            } => {
                let checksum = checksum.as_ref().map(|c| c.as_slice());
                match self.state.log.append(&topic, &payload, checksum).await {
                    Ok(_) => {}
                    // Synchronous rejection: invalid or corrupt publishes
                    // never mutate the log, and the connection survives.
                    Err(e) if e.is_rejection() => {
                        debug!(client = %client_id, topic, error = %e, "publish rejected")
                    }
                    Err(e) => warn!(client = %client_id, topic, error = %e, "publish failed"),
                }
            }
            Command::Ping => session.touch(),
            // Handled in `run`; unreachable here.
            Command::Register | Command::Bind { .. } => {}
        }
        Ok(())
    }

    /// Lazily start this client's dispatch task on first subscription.
    fn start_dispatch(&self, client_id: &str, session: &Arc<ClientSession>) {
        let Some(generation) = self
            .state
            .registry
            .reserve_dispatch(client_id, self.conn_id)
        else {
            return; // already delivering
        };
        let dispatcher = Dispatcher::new(
            client_id.to_string(),
            generation,
            session.clone(),
            self.state.log.clone(),
            self.state.offsets.clone(),
            self.sink.clone(),
            self.state.config.clone(),
        );
        let registry = self.state.registry.clone();
        let handle = tokio::spawn(dispatcher.run(registry));
        self.state
            .registry
            .install_dispatch(client_id, generation, handle);
        debug!(client = %client_id, generation, "started dispatch task");
    }

    async fn send(&self, payload: Bytes) -> BrokerResult<()> {
        self.sink.lock().await.send(payload).await
    }
}
