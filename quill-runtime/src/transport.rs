//! TCP transport for peer traffic.
//!
//! Outbound: one writer task per peer address, shared by every quorum on
//! the node; connections are established lazily and re-established on
//! failure. A frame that cannot be delivered is dropped — the consensus
//! layer treats silence as a non-ack and retries via its timers.
//!
//! Inbound: [`PeerServer`] accepts connections, decodes frames, posts
//! vote/append traffic to the addressed quorum's serial queue, and answers
//! status/log-status/fetch requests in place.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use quill_core::{PeerAddress, WIRE_MESSAGE_BYTES_MAX};
use quill_raft::RaftEvent;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::codec::{decode_message, encode_message, CodecError, WireMessage};
use crate::quorum::QuorumRegistry;

/// Timeout for establishing an outbound connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Inbound read buffer granularity.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to bind the listen address.
    #[error("failed to bind {addr}: {source}")]
    BindFailed {
        /// The address we tried to bind.
        addr: SocketAddr,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Codec failure on a connection.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// I/O failure on a connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Pooled outbound connections, keyed by peer address.
///
/// Shared across all quorums on the node; no quorum owns a connection.
#[derive(Default)]
pub struct PeerTransport {
    writers: Mutex<HashMap<PeerAddress, mpsc::UnboundedSender<Bytes>>>,
}

impl PeerTransport {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues a message for delivery to `to`.
    ///
    /// Best-effort: encoding or delivery failures are logged and the
    /// message is dropped, which the consensus layer reads as a non-ack.
    pub fn send(&self, to: &PeerAddress, message: &WireMessage) {
        let frame = match encode_message(message) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(peer = %to, error = %err, "dropping unencodable message");
                return;
            }
        };

        let sender = {
            let mut writers = self.writers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            writers
                .entry(to.clone())
                .or_insert_with(|| {
                    let (tx, rx) = mpsc::unbounded_channel();
                    tokio::spawn(writer_loop(to.clone(), rx));
                    tx
                })
                .clone()
        };
        let _ = sender.send(frame);
    }
}

/// Drains one peer's outbound queue, reconnecting as needed.
async fn writer_loop(peer: PeerAddress, mut rx: mpsc::UnboundedReceiver<Bytes>) {
    let mut stream: Option<TcpStream> = None;

    while let Some(frame) = rx.recv().await {
        if stream.is_none() {
            match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(peer.as_str())).await {
                Ok(Ok(connected)) => {
                    debug!(peer = %peer, "connected");
                    stream = Some(connected);
                }
                Ok(Err(err)) => {
                    debug!(peer = %peer, error = %err, "connect failed; dropping frame");
                    continue;
                }
                Err(_) => {
                    debug!(peer = %peer, "connect timed out; dropping frame");
                    continue;
                }
            }
        }

        if let Some(connected) = &mut stream {
            if let Err(err) = connected.write_all(&frame).await {
                warn!(peer = %peer, error = %err, "write failed; dropping connection");
                stream = None;
            }
        }
    }
}

/// Accepts peer connections and dispatches their traffic.
pub struct PeerServer {
    listener: TcpListener,
    registry: Arc<QuorumRegistry>,
}

impl PeerServer {
    /// Binds the listen address. Use port 0 for an ephemeral port.
    ///
    /// # Errors
    /// Returns an error if the address cannot be bound.
    pub async fn bind(
        listen_addr: SocketAddr,
        registry: Arc<QuorumRegistry>,
    ) -> TransportResult<Self> {
        let listener =
            TcpListener::bind(listen_addr)
                .await
                .map_err(|source| TransportError::BindFailed {
                    addr: listen_addr,
                    source,
                })?;
        info!(addr = %listen_addr, "peer server listening");
        Ok(Self { listener, registry })
    }

    /// The actually bound address.
    ///
    /// # Errors
    /// Returns an error if the socket is unusable.
    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Runs the accept loop. Resolves only on listener failure.
    ///
    /// # Errors
    /// Returns an error if accepting fails fatally.
    pub async fn run(self) -> TransportResult<()> {
        loop {
            let (stream, remote) = self.listener.accept().await?;
            debug!(%remote, "accepted peer connection");
            let registry = Arc::clone(&self.registry);
            tokio::spawn(async move {
                if let Err(err) = serve_connection(stream, registry).await {
                    debug!(%remote, error = %err, "peer connection closed");
                }
            });
        }
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    registry: Arc<QuorumRegistry>,
) -> TransportResult<()> {
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

    loop {
        while let Some(body) = take_frame(&mut buf)? {
            let message = decode_message(body)?;
            if let Some(reply) = dispatch(message, &registry).await {
                let frame = encode_message(&reply)?;
                stream.write_all(&frame).await?;
            }
        }

        if stream.read_buf(&mut buf).await? == 0 {
            return Ok(());
        }
    }
}

/// Extracts one complete frame body from the buffer, if available.
fn take_frame(buf: &mut BytesMut) -> Result<Option<Bytes>, CodecError> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let len = u32::from_le_bytes(buf[0..4].try_into().unwrap_or_default());
    if len > WIRE_MESSAGE_BYTES_MAX {
        return Err(CodecError::MessageTooLarge {
            size: len,
            max: WIRE_MESSAGE_BYTES_MAX,
        });
    }
    let len = len as usize;
    if buf.len() < 4 + len {
        return Ok(None);
    }
    buf.advance(4);
    Ok(Some(buf.split_to(len).freeze()))
}

/// Routes one inbound message; returns a reply for request/response pairs.
async fn dispatch(message: WireMessage, registry: &QuorumRegistry) -> Option<WireMessage> {
    match message {
        WireMessage::VoteRequest(req) => {
            if let Some(handle) = registry.get(req.quorum).await {
                handle.post(RaftEvent::VoteRequestReceived(req));
            }
            None
        }
        WireMessage::VoteResponse(resp) => {
            if let Some(handle) = registry.get(resp.quorum).await {
                handle.post(RaftEvent::VoteResponseReceived(resp));
            }
            None
        }
        WireMessage::AppendRequest(req) => {
            if let Some(handle) = registry.get(req.quorum).await {
                handle.post(RaftEvent::AppendRequestReceived(req));
            }
            None
        }
        WireMessage::AppendResponse(resp) => {
            if let Some(handle) = registry.get(resp.quorum).await {
                handle.post(RaftEvent::AppendResponseReceived(resp));
            }
            None
        }
        WireMessage::StatusRequest { quorum } => Some(match registry.get(quorum).await {
            Some(handle) => match handle.status().await {
                Some(status) => WireMessage::StatusResponse(status),
                None => error_reply("quorum unavailable"),
            },
            None => error_reply("unknown quorum"),
        }),
        WireMessage::LogStatusRequest { quorum, min_index } => {
            Some(match registry.get(quorum).await {
                Some(handle) => match handle.log_status(min_index).await {
                    Some(files) => WireMessage::LogStatusResponse { files },
                    None => error_reply("quorum unavailable"),
                },
                None => error_reply("unknown quorum"),
            })
        }
        WireMessage::FetchFileRequest { quorum, name } => {
            Some(match registry.get(quorum).await {
                Some(handle) => match handle.read_segment(name.clone()).await {
                    Some(data) => WireMessage::FetchFileResponse { data },
                    None => error_reply("unknown segment"),
                },
                None => error_reply("unknown quorum"),
            })
        }
        WireMessage::StatusResponse(_)
        | WireMessage::LogStatusResponse { .. }
        | WireMessage::FetchFileResponse { .. }
        | WireMessage::ErrorResponse { .. } => {
            warn!("unsolicited response on inbound connection");
            None
        }
    }
}

fn error_reply(message: &str) -> WireMessage {
    WireMessage::ErrorResponse {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_frame_reassembly() {
        let frame = encode_message(&WireMessage::StatusRequest {
            quorum: quill_core::QuorumId::new(1),
        })
        .unwrap();

        let mut buf = BytesMut::new();

        // Nothing complete while bytes dribble in.
        buf.extend_from_slice(&frame[..3]);
        assert!(take_frame(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&frame[3..frame.len() - 1]);
        assert!(take_frame(&mut buf).unwrap().is_none());

        // The last byte completes exactly one frame.
        buf.extend_from_slice(&frame[frame.len() - 1..]);
        let body = take_frame(&mut buf).unwrap().unwrap();
        assert_eq!(body.len(), frame.len() - 4);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_take_frame_rejects_oversized() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&u32::MAX.to_le_bytes());
        buf.extend_from_slice(&[0u8; 16]);

        assert!(matches!(
            take_frame(&mut buf),
            Err(CodecError::MessageTooLarge { .. })
        ));
    }
}
