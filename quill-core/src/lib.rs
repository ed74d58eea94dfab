//! Quill core - shared types for the consensus engine.
//!
//! This crate holds the value types every other Quill crate builds on:
//! strongly-typed identifiers, the `(term, index)` edit identity, the
//! leadership marker, and peer/quorum descriptors. All of them are plain
//! data with total orderings; none of them perform I/O.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

mod edit;
mod limits;
mod peer;
mod types;

pub use edit::{ConsensusHost, EditId};
pub use limits::{
    ENTRY_PAYLOAD_BYTES_MAX, QUORUM_SIZE_MAX, SEGMENT_BYTES_MAX, WIRE_MESSAGE_BYTES_MAX,
};
pub use peer::{PeerAddress, PeerInfo, QuorumInfo};
pub use types::{PeerRank, QuorumId, Term};
