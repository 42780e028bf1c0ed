//! logstream client
//!
//! A thin framing wrapper over the broker's TCP protocol. Every frame is
//! `[4-byte BE length][payload]`; commands are ASCII with a three-letter
//! code. The client adds nothing beyond framing, registration, and the
//! optional CRC32 trailer on produced messages — delivery state lives
//! entirely on the broker.
//!
//! ```ignore
//! let mut producer = Client::connect("127.0.0.1:1234").await?;
//! let id = producer.register().await?;
//! producer.produce("orders", b"order-1").await?;
//!
//! let mut consumer = Client::connect("127.0.0.1:1234").await?;
//! consumer.login(&id).await?;
//! consumer.subscribe("orders").await?;
//! while let Some((topic, payload)) = consumer.consume().await? {
//!     println!("{topic}: {payload:?}");
//! }
//! ```

use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

use logstream_core::record::checksum;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection closed")]
    ConnectionClosed,
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

pub struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    /// Whether produced messages carry a CRC32 trailer. Must match the
    /// broker's `publish_checksums` setting.
    checksums: bool,
}

impl Client {
    pub async fn connect(addr: impl ToSocketAddrs) -> ClientResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
            checksums: true,
        })
    }

    pub fn with_checksums(mut self, enabled: bool) -> Self {
        self.checksums = enabled;
        self
    }

    /// Register a new identity and bind this connection to it.
    pub async fn register(&mut self) -> ClientResult<String> {
        self.send_frame(b"REG").await?;
        let reply = self.read_frame().await?.ok_or(ClientError::ConnectionClosed)?;
        let id = String::from_utf8(reply)
            .map_err(|_| ClientError::Protocol("registration reply not UTF-8".to_string()))?;
        debug!(client = %id, "registered");
        self.login(&id).await?;
        Ok(id)
    }

    /// Bind this connection to an existing identity.
    pub async fn login(&mut self, id: &str) -> ClientResult<()> {
        self.send_frame(format!("CID {id}").as_bytes()).await
    }

    pub async fn subscribe(&mut self, topic: &str) -> ClientResult<()> {
        self.send_frame(format!("SUB {topic}").as_bytes()).await
    }

    /// Overwrite the committed offset for a topic (seek/reset).
    pub async fn set_offset(&mut self, topic: &str, offset: u64) -> ClientResult<()> {
        self.send_frame(format!("SET {topic} {offset}").as_bytes())
            .await
    }

    pub async fn ping(&mut self) -> ClientResult<()> {
        self.send_frame(b"PNG").await
    }

    /// Publish a message, appending a CRC32 trailer when checksums are on.
    pub async fn produce(&mut self, topic: &str, payload: &[u8]) -> ClientResult<()> {
        let mut frame = format!("PUB {topic} ").into_bytes();
        frame.extend_from_slice(payload);
        if self.checksums {
            frame.extend_from_slice(&checksum(payload));
        }
        self.send_frame(&frame).await
    }

    /// Block until a delivered message arrives; `None` on a clean close.
    pub async fn consume(&mut self) -> ClientResult<Option<(String, Bytes)>> {
        let Some(frame) = self.read_frame().await? else {
            return Ok(None);
        };
        let space = frame
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| ClientError::Protocol("delivery frame missing topic".to_string()))?;
        let topic = std::str::from_utf8(&frame[..space])
            .map_err(|_| ClientError::Protocol("topic not UTF-8".to_string()))?
            .to_string();
        let payload = Bytes::copy_from_slice(&frame[space + 1..]);
        Ok(Some((topic, payload)))
    }

    async fn send_frame(&mut self, payload: &[u8]) -> ClientResult<()> {
        self.writer
            .write_all(&(payload.len() as u32).to_be_bytes())
            .await?;
        self.writer.write_all(payload).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn read_frame(&mut self) -> ClientResult<Option<Vec<u8>>> {
        let mut len_bytes = [0u8; 4];
        match self.reader.read_exact(&mut len_bytes).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_be_bytes(len_bytes) as usize;
        if len == 0 {
            return Ok(None);
        }
        let mut payload = vec![0u8; len];
        self.reader.read_exact(&mut payload).await?;
        Ok(Some(payload))
    }
}
