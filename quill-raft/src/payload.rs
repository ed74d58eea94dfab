//! Internal framing of replicated entry payloads.
//!
//! The engine replicates two kinds of entries over the same log: opaque
//! application edits and its own configuration entries that drive joint
//! membership changes. A one-byte kind tag distinguishes them; the tag is
//! stripped before application payloads reach the data-store listener, so
//! data edits stay opaque end to end.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use quill_core::{PeerAddress, PeerInfo, PeerRank, QuorumId, QuorumInfo};

const KIND_DATA: u8 = 0;
const KIND_JOINT_CONFIG: u8 = 1;
const KIND_NEW_CONFIG: u8 = 2;

/// A decoded entry payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryPayload {
    /// An opaque application edit.
    Data(Bytes),
    /// Proposal to enter the joint configuration toward this config.
    JointConfig(QuorumInfo),
    /// Proposal to retire the old configuration for this one.
    NewConfig(QuorumInfo),
}

impl EntryPayload {
    /// Frames the payload for replication.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        match self {
            Self::Data(data) => {
                let mut buf = BytesMut::with_capacity(1 + data.len());
                buf.put_u8(KIND_DATA);
                buf.put_slice(data);
                buf.freeze()
            }
            Self::JointConfig(config) => encode_config(KIND_JOINT_CONFIG, config),
            Self::NewConfig(config) => encode_config(KIND_NEW_CONFIG, config),
        }
    }

    /// Decodes a framed payload.
    ///
    /// Returns `None` for an empty buffer, an unknown kind tag, or a
    /// malformed configuration body.
    #[must_use]
    pub fn decode(mut framed: Bytes) -> Option<Self> {
        if framed.is_empty() {
            return None;
        }
        let kind = framed.get_u8();
        match kind {
            KIND_DATA => Some(Self::Data(framed)),
            KIND_JOINT_CONFIG => decode_config(&mut framed).map(Self::JointConfig),
            KIND_NEW_CONFIG => decode_config(&mut framed).map(Self::NewConfig),
            _ => None,
        }
    }
}

fn encode_config(kind: u8, config: &QuorumInfo) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(kind);
    buf.put_u64_le(config.id.get());
    // Peer count bounded by the quorum size limit.
    #[allow(clippy::cast_possible_truncation)]
    buf.put_u16_le(config.peers.len() as u16);
    for peer in &config.peers {
        buf.put_u64_le(peer.rank.get());
        let addr = peer.address.as_str().as_bytes();
        #[allow(clippy::cast_possible_truncation)]
        buf.put_u16_le(addr.len() as u16);
        buf.put_slice(addr);
    }
    buf.freeze()
}

fn decode_config(buf: &mut Bytes) -> Option<QuorumInfo> {
    if buf.remaining() < 10 {
        return None;
    }
    let id = QuorumId::new(buf.get_u64_le());
    let count = buf.get_u16_le() as usize;

    let mut peers = Vec::with_capacity(count);
    for _ in 0..count {
        if buf.remaining() < 10 {
            return None;
        }
        let rank = PeerRank::new(buf.get_u64_le());
        let addr_len = buf.get_u16_le() as usize;
        if buf.remaining() < addr_len {
            return None;
        }
        let addr_bytes = buf.copy_to_bytes(addr_len);
        let addr = std::str::from_utf8(&addr_bytes).ok()?;
        peers.push(PeerInfo::new(PeerAddress::new(addr), rank));
    }
    Some(QuorumInfo::new(id, peers))
}
