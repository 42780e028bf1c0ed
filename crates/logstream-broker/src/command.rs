//! Command parsing
//!
//! Command payloads are ASCII, space-separated, with a fixed three-letter
//! command code:
//!
//! | Command | Form |
//! |---|---|
//! | `REG` | `REG` |
//! | `CID` | `CID <id>` |
//! | `SUB` | `SUB <topic>` |
//! | `SET` | `SET <topic> <offset>` |
//! | `PUB` | `PUB <topic> <payload>` plus a 4-byte CRC32 trailer when checksums are enabled |
//! | `PNG` | `PNG` |
//!
//! A PUB payload is raw bytes and may contain spaces; everything after the
//! topic token belongs to it. Any frame that fails to parse terminates the
//! connection.

use bytes::Bytes;

use logstream_core::CHECKSUM_LEN;

use crate::error::{BrokerError, BrokerResult};

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    /// Allocate a new client id and reply with it.
    Register,
    /// Bind this connection to an existing client id.
    Bind { client_id: String },
    /// Subscribe the bound client to a topic.
    Subscribe { topic: String },
    /// Overwrite the bound client's committed offset for a topic.
    Seek { topic: String, offset: u64 },
    /// Append a message to a topic.
    Publish {
        topic: String,
        payload: Bytes,
        checksum: Option<[u8; CHECKSUM_LEN]>,
    },
    /// Heartbeat.
    Ping,
}

impl Command {
    /// Parse one decoded frame. `publish_checksums` selects whether PUB
    /// frames carry a trailing CRC32.
    pub fn parse(frame: &[u8], publish_checksums: bool) -> BrokerResult<Command> {
        let (code, rest) = split_token(frame);
        match code {
            b"REG" => expect_empty(rest).map(|_| Command::Register),
            b"PNG" => expect_empty(rest).map(|_| Command::Ping),
            b"CID" => {
                let client_id = ascii_token(rest, "client id")?;
                Ok(Command::Bind { client_id })
            }
            b"SUB" => {
                let topic = ascii_token(rest, "topic")?;
                Ok(Command::Subscribe { topic })
            }
            b"SET" => {
                let (topic, offset) = split_token(rest);
                let topic = ascii_word(topic, "topic")?;
                let offset = std::str::from_utf8(offset)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| BrokerError::Protocol("SET: invalid offset".to_string()))?;
                Ok(Command::Seek { topic, offset })
            }
            b"PUB" => {
                let (topic, body) = split_token(rest);
                let topic = ascii_word(topic, "topic")?;
                let (payload, checksum) = if publish_checksums {
                    if body.len() <= CHECKSUM_LEN {
                        return Err(BrokerError::Protocol(
                            "PUB: frame too short for checksum trailer".to_string(),
                        ));
                    }
                    let (payload, trailer) = body.split_at(body.len() - CHECKSUM_LEN);
                    let mut checksum = [0u8; CHECKSUM_LEN];
                    checksum.copy_from_slice(trailer);
                    (payload, Some(checksum))
                } else {
                    (body, None)
                };
                if payload.is_empty() {
                    return Err(BrokerError::Protocol("PUB: empty payload".to_string()));
                }
                Ok(Command::Publish {
                    topic,
                    payload: Bytes::copy_from_slice(payload),
                    checksum,
                })
            }
            _ => Err(BrokerError::Protocol(format!(
                "unknown command: {:?}",
                String::from_utf8_lossy(code)
            ))),
        }
    }

    /// Whether this command is allowed before an identity is established.
    pub fn allowed_pre_identity(&self) -> bool {
        matches!(self, Command::Register | Command::Bind { .. })
    }
}

/// Split at the first space: `(token, remainder-after-space)`.
fn split_token(input: &[u8]) -> (&[u8], &[u8]) {
    match input.iter().position(|&b| b == b' ') {
        Some(i) => (&input[..i], &input[i + 1..]),
        None => (input, &[]),
    }
}

/// Commands framed as `"{code} {payload}"` leave an empty payload for
/// argument-less codes; tolerate the trailing space.
fn expect_empty(rest: &[u8]) -> BrokerResult<()> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(BrokerError::Protocol("unexpected arguments".to_string()))
    }
}

fn ascii_token(rest: &[u8], what: &str) -> BrokerResult<String> {
    let (token, tail) = split_token(rest);
    if !tail.is_empty() {
        return Err(BrokerError::Protocol(format!("{what}: trailing data")));
    }
    ascii_word(token, what)
}

fn ascii_word(token: &[u8], what: &str) -> BrokerResult<String> {
    if token.is_empty() {
        return Err(BrokerError::Protocol(format!("{what}: missing")));
    }
    std::str::from_utf8(token)
        .map(str::to_string)
        .map_err(|_| BrokerError::Protocol(format!("{what}: not valid UTF-8")))
}
