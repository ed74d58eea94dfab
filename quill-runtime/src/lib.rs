//! Quill runtime - tokio glue for the consensus engine.
//!
//! Hosts the per-quorum serial event loops, the rank-biased progress and
//! heartbeat timers, the binary wire codec, the pooled TCP transport, and
//! the request/response client used by the status probe and the remote
//! log fetcher.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod codec;
mod quorum;
mod timer;
mod transport;

pub use client::{ClientError, ClientResult, PeerClient};
pub use codec::{decode_message, encode_message, CodecError, CodecResult, WireMessage};
pub use quorum::{spawn_quorum, QuorumCommand, QuorumHandle, QuorumRegistry};
pub use timer::{spawn_timer, TimerConfig, TimerHandle};
pub use transport::{PeerServer, PeerTransport, TransportError, TransportResult};
