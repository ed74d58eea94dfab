//! Request/response client for peer queries.
//!
//! Used by the status probe CLI and by the remote log fetcher. Each
//! request opens a short-lived connection; the consensus fast path never
//! goes through here.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use quill_core::{PeerAddress, QuorumId, WIRE_MESSAGE_BYTES_MAX};
use quill_log::LogFileInfo;
use quill_raft::{FetchError, PeerLogClient, PeerStatus};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::codec::{decode_message, encode_message, CodecError, WireMessage};

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request did not complete within the configured timeout.
    #[error("request to {peer} timed out")]
    Timeout {
        /// The peer that did not answer.
        peer: PeerAddress,
    },

    /// The connection failed.
    #[error("I/O error talking to {peer}: {source}")]
    Io {
        /// The peer the connection was to.
        peer: PeerAddress,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The response could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The peer answered with an error.
    #[error("remote error from {peer}: {message}")]
    Remote {
        /// The peer that answered.
        peer: PeerAddress,
        /// The peer's error message.
        message: String,
    },

    /// The peer answered with the wrong message type.
    #[error("unexpected response from {peer}")]
    UnexpectedResponse {
        /// The peer that answered.
        peer: PeerAddress,
    },
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// One-shot request/response client.
#[derive(Debug, Clone)]
pub struct PeerClient {
    timeout: Duration,
}

impl Default for PeerClient {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }
}

impl PeerClient {
    /// Creates a client with the given per-request timeout.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Sends one request and awaits its reply.
    ///
    /// # Errors
    /// Returns an error on connection failure, timeout, or an error reply.
    pub async fn request(
        &self,
        peer: &PeerAddress,
        message: &WireMessage,
    ) -> ClientResult<WireMessage> {
        let exchange = self.exchange(peer, message);
        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout { peer: peer.clone() }),
        }
    }

    async fn exchange(
        &self,
        peer: &PeerAddress,
        message: &WireMessage,
    ) -> ClientResult<WireMessage> {
        let io_err = |source| ClientError::Io {
            peer: peer.clone(),
            source,
        };

        let mut stream = TcpStream::connect(peer.as_str()).await.map_err(io_err)?;
        let frame = encode_message(message)?;
        stream.write_all(&frame).await.map_err(io_err)?;

        // Read exactly one framed reply.
        let mut prefix = [0u8; 4];
        stream.read_exact(&mut prefix).await.map_err(io_err)?;
        let len = u32::from_le_bytes(prefix);
        if len > WIRE_MESSAGE_BYTES_MAX {
            return Err(ClientError::Codec(CodecError::MessageTooLarge {
                size: len,
                max: WIRE_MESSAGE_BYTES_MAX,
            }));
        }
        let mut body = BytesMut::zeroed(len as usize);
        stream.read_exact(&mut body).await.map_err(io_err)?;

        match decode_message(body.freeze())? {
            WireMessage::ErrorResponse { message } => Err(ClientError::Remote {
                peer: peer.clone(),
                message,
            }),
            reply => Ok(reply),
        }
    }

    /// Probes one peer for a quorum's status.
    ///
    /// # Errors
    /// Returns an error if the peer is unreachable or answers abnormally.
    pub async fn peer_status(
        &self,
        peer: &PeerAddress,
        quorum: QuorumId,
    ) -> ClientResult<PeerStatus> {
        match self
            .request(peer, &WireMessage::StatusRequest { quorum })
            .await?
        {
            WireMessage::StatusResponse(status) => Ok(status),
            _ => Err(ClientError::UnexpectedResponse { peer: peer.clone() }),
        }
    }
}

fn fetch_err(err: &ClientError, peer: &PeerAddress) -> FetchError {
    FetchError::PeerUnavailable {
        peer: peer.clone(),
        message: err.to_string(),
    }
}

#[async_trait]
impl PeerLogClient for PeerClient {
    async fn committed_log_status(
        &self,
        peer: &PeerAddress,
        quorum: QuorumId,
        min_index: u64,
    ) -> Result<Vec<LogFileInfo>, FetchError> {
        match self
            .request(peer, &WireMessage::LogStatusRequest { quorum, min_index })
            .await
        {
            Ok(WireMessage::LogStatusResponse { files }) => Ok(files),
            Ok(_) => Err(FetchError::PeerUnavailable {
                peer: peer.clone(),
                message: "unexpected response".to_string(),
            }),
            Err(err) => Err(fetch_err(&err, peer)),
        }
    }

    async fn fetch_log_file(
        &self,
        peer: &PeerAddress,
        quorum: QuorumId,
        name: &str,
    ) -> Result<Bytes, FetchError> {
        let request = WireMessage::FetchFileRequest {
            quorum,
            name: name.to_string(),
        };
        match self.request(peer, &request).await {
            Ok(WireMessage::FetchFileResponse { data }) => Ok(data),
            Ok(_) => Err(FetchError::PeerUnavailable {
                peer: peer.clone(),
                message: "unexpected response".to_string(),
            }),
            Err(err) => Err(fetch_err(&err, peer)),
        }
    }
}
