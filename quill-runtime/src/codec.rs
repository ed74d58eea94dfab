//! Binary codec for consensus messages over TCP.
//!
//! Each message is framed as:
//! - 4 bytes: body length (u32 little-endian, not including this prefix)
//! - 1 byte: message type tag
//! - N bytes: message-specific payload
//!
//! Vote and append traffic is one-way (responses travel as their own
//! framed messages); the status, log-status, and fetch messages form
//! request/response pairs on one connection.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use quill_core::{EditId, PeerAddress, QuorumId, Term, WIRE_MESSAGE_BYTES_MAX};
use quill_log::LogFileInfo;
use quill_raft::{
    AppendRequest, AppendResponse, LogEntry, PeerStatus, RaftRole, VoteRequest, VoteResponse,
};
use thiserror::Error;

const TAG_VOTE_REQUEST: u8 = 0;
const TAG_VOTE_RESPONSE: u8 = 1;
const TAG_APPEND_REQUEST: u8 = 2;
const TAG_APPEND_RESPONSE: u8 = 3;
const TAG_STATUS_REQUEST: u8 = 4;
const TAG_STATUS_RESPONSE: u8 = 5;
const TAG_LOG_STATUS_REQUEST: u8 = 6;
const TAG_LOG_STATUS_RESPONSE: u8 = 7;
const TAG_FETCH_FILE_REQUEST: u8 = 8;
const TAG_FETCH_FILE_RESPONSE: u8 = 9;
const TAG_ERROR_RESPONSE: u8 = 10;

/// Codec errors.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Message exceeds the wire size limit.
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge {
        /// Actual size.
        size: u32,
        /// Maximum allowed.
        max: u32,
    },

    /// Unknown message type tag.
    #[error("unknown message type: {tag}")]
    UnknownMessageType {
        /// The unknown tag value.
        tag: u8,
    },

    /// Body ended before the message was complete.
    #[error("malformed message body (tag {tag})")]
    Malformed {
        /// The tag of the truncated message.
        tag: u8,
    },
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// All messages exchanged between peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// Candidate soliciting a vote.
    VoteRequest(VoteRequest),
    /// Answer to a vote solicitation.
    VoteResponse(VoteResponse),
    /// Leader shipping entries or a heartbeat.
    AppendRequest(AppendRequest),
    /// Answer to an append.
    AppendResponse(AppendResponse),
    /// Probe for a quorum's status.
    StatusRequest {
        /// The quorum being probed.
        quorum: QuorumId,
    },
    /// Answer to a status probe.
    StatusResponse(PeerStatus),
    /// Query for committed segments past an index.
    LogStatusRequest {
        /// The quorum being queried.
        quorum: QuorumId,
        /// Only segments with entries past this index are wanted.
        min_index: u64,
    },
    /// Answer to a log-status query.
    LogStatusResponse {
        /// Advertised segments.
        files: Vec<LogFileInfo>,
    },
    /// Download request for one advertised segment.
    FetchFileRequest {
        /// The quorum the segment belongs to.
        quorum: QuorumId,
        /// Segment file name.
        name: String,
    },
    /// Segment bytes.
    FetchFileResponse {
        /// Raw segment file contents.
        data: Bytes,
    },
    /// Failure answer to any request/response exchange.
    ErrorResponse {
        /// Description of the failure.
        message: String,
    },
}

/// Encodes a message into one length-prefixed frame.
///
/// # Errors
/// Returns an error if the encoded message exceeds the size limit.
pub fn encode_message(message: &WireMessage) -> CodecResult<Bytes> {
    let mut buf = BytesMut::with_capacity(256);
    buf.put_u32_le(0); // Length, filled in below.

    match message {
        WireMessage::VoteRequest(req) => {
            buf.put_u8(TAG_VOTE_REQUEST);
            buf.put_u64_le(req.quorum.get());
            put_string(&mut buf, req.candidate.as_str());
            put_edit(&mut buf, req.edit);
            put_edit(&mut buf, req.prev_edit);
        }
        WireMessage::VoteResponse(resp) => {
            buf.put_u8(TAG_VOTE_RESPONSE);
            buf.put_u64_le(resp.quorum.get());
            put_string(&mut buf, resp.from.as_str());
            buf.put_u64_le(resp.term.get());
            put_edit(&mut buf, resp.edit);
            buf.put_u8(u8::from(resp.granted));
        }
        WireMessage::AppendRequest(req) => {
            buf.put_u8(TAG_APPEND_REQUEST);
            buf.put_u64_le(req.quorum.get());
            put_string(&mut buf, req.leader.as_str());
            buf.put_u64_le(req.term.get());
            put_edit(&mut buf, req.prev_edit);
            buf.put_u64_le(req.committed_index);
            // Entry count bounded by the append batch limit.
            #[allow(clippy::cast_possible_truncation)]
            buf.put_u32_le(req.entries.len() as u32);
            for entry in &req.entries {
                put_edit(&mut buf, entry.edit);
                #[allow(clippy::cast_possible_truncation)]
                buf.put_u32_le(entry.payload.len() as u32);
                buf.put_slice(&entry.payload);
            }
        }
        WireMessage::AppendResponse(resp) => {
            buf.put_u8(TAG_APPEND_RESPONSE);
            buf.put_u64_le(resp.quorum.get());
            put_string(&mut buf, resp.from.as_str());
            buf.put_u64_le(resp.term.get());
            put_edit(&mut buf, resp.edit);
            buf.put_u8(u8::from(resp.success));
            buf.put_u64_le(resp.last_index);
        }
        WireMessage::StatusRequest { quorum } => {
            buf.put_u8(TAG_STATUS_REQUEST);
            buf.put_u64_le(quorum.get());
        }
        WireMessage::StatusResponse(status) => {
            buf.put_u8(TAG_STATUS_RESPONSE);
            buf.put_u64_le(status.quorum.get());
            buf.put_u8(status.role.as_u8());
            buf.put_u64_le(status.term.get());
            buf.put_u64_le(status.committed_index);
            put_edit(&mut buf, status.last_edit);
        }
        WireMessage::LogStatusRequest { quorum, min_index } => {
            buf.put_u8(TAG_LOG_STATUS_REQUEST);
            buf.put_u64_le(quorum.get());
            buf.put_u64_le(*min_index);
        }
        WireMessage::LogStatusResponse { files } => {
            buf.put_u8(TAG_LOG_STATUS_RESPONSE);
            #[allow(clippy::cast_possible_truncation)]
            buf.put_u32_le(files.len() as u32);
            for file in files {
                put_string(&mut buf, &file.name);
                buf.put_u64_le(file.first_index);
                buf.put_u64_le(file.last_index);
                buf.put_u64_le(file.term.get());
            }
        }
        WireMessage::FetchFileRequest { quorum, name } => {
            buf.put_u8(TAG_FETCH_FILE_REQUEST);
            buf.put_u64_le(quorum.get());
            put_string(&mut buf, name);
        }
        WireMessage::FetchFileResponse { data } => {
            buf.put_u8(TAG_FETCH_FILE_RESPONSE);
            #[allow(clippy::cast_possible_truncation)]
            buf.put_u32_le(data.len() as u32);
            buf.put_slice(data);
        }
        WireMessage::ErrorResponse { message } => {
            buf.put_u8(TAG_ERROR_RESPONSE);
            put_string(&mut buf, message);
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    let len = (buf.len() - 4) as u32;
    if len > WIRE_MESSAGE_BYTES_MAX {
        return Err(CodecError::MessageTooLarge {
            size: len,
            max: WIRE_MESSAGE_BYTES_MAX,
        });
    }
    buf[0..4].copy_from_slice(&len.to_le_bytes());
    Ok(buf.freeze())
}

/// Decodes one frame body (tag + payload, without the length prefix).
///
/// # Errors
/// Returns an error for unknown tags or truncated bodies.
pub fn decode_message(body: Bytes) -> CodecResult<WireMessage> {
    let mut buf = body;
    if buf.is_empty() {
        return Err(CodecError::Malformed { tag: 0 });
    }
    let tag = buf.get_u8();
    if tag > TAG_ERROR_RESPONSE {
        return Err(CodecError::UnknownMessageType { tag });
    }
    decode_body(tag, &mut buf).ok_or(CodecError::Malformed { tag })
}

#[allow(clippy::too_many_lines)]
fn decode_body(tag: u8, buf: &mut Bytes) -> Option<WireMessage> {
    match tag {
        TAG_VOTE_REQUEST => Some(WireMessage::VoteRequest(VoteRequest {
            quorum: QuorumId::new(get_u64(buf)?),
            candidate: PeerAddress::new(get_string(buf)?),
            edit: get_edit(buf)?,
            prev_edit: get_edit(buf)?,
        })),
        TAG_VOTE_RESPONSE => Some(WireMessage::VoteResponse(VoteResponse {
            quorum: QuorumId::new(get_u64(buf)?),
            from: PeerAddress::new(get_string(buf)?),
            term: Term::new(get_u64(buf)?),
            edit: get_edit(buf)?,
            granted: get_u8(buf)? != 0,
        })),
        TAG_APPEND_REQUEST => {
            let quorum = QuorumId::new(get_u64(buf)?);
            let leader = PeerAddress::new(get_string(buf)?);
            let term = Term::new(get_u64(buf)?);
            let prev_edit = get_edit(buf)?;
            let committed_index = get_u64(buf)?;
            let count = get_u32(buf)? as usize;
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                let edit = get_edit(buf)?;
                let len = get_u32(buf)? as usize;
                if buf.remaining() < len {
                    return None;
                }
                entries.push(LogEntry::new(edit, buf.copy_to_bytes(len)));
            }
            Some(WireMessage::AppendRequest(AppendRequest {
                quorum,
                leader,
                term,
                prev_edit,
                committed_index,
                entries,
            }))
        }
        TAG_APPEND_RESPONSE => Some(WireMessage::AppendResponse(AppendResponse {
            quorum: QuorumId::new(get_u64(buf)?),
            from: PeerAddress::new(get_string(buf)?),
            term: Term::new(get_u64(buf)?),
            edit: get_edit(buf)?,
            success: get_u8(buf)? != 0,
            last_index: get_u64(buf)?,
        })),
        TAG_STATUS_REQUEST => Some(WireMessage::StatusRequest {
            quorum: QuorumId::new(get_u64(buf)?),
        }),
        TAG_STATUS_RESPONSE => Some(WireMessage::StatusResponse(PeerStatus {
            quorum: QuorumId::new(get_u64(buf)?),
            role: RaftRole::from_u8(get_u8(buf)?)?,
            term: Term::new(get_u64(buf)?),
            committed_index: get_u64(buf)?,
            last_edit: get_edit(buf)?,
        })),
        TAG_LOG_STATUS_REQUEST => Some(WireMessage::LogStatusRequest {
            quorum: QuorumId::new(get_u64(buf)?),
            min_index: get_u64(buf)?,
        }),
        TAG_LOG_STATUS_RESPONSE => {
            let count = get_u32(buf)? as usize;
            let mut files = Vec::with_capacity(count);
            for _ in 0..count {
                let name = get_string(buf)?;
                let first_index = get_u64(buf)?;
                let last_index = get_u64(buf)?;
                let term = Term::new(get_u64(buf)?);
                files.push(LogFileInfo::new(name, first_index, last_index, term));
            }
            Some(WireMessage::LogStatusResponse { files })
        }
        TAG_FETCH_FILE_REQUEST => Some(WireMessage::FetchFileRequest {
            quorum: QuorumId::new(get_u64(buf)?),
            name: get_string(buf)?,
        }),
        TAG_FETCH_FILE_RESPONSE => {
            let len = get_u32(buf)? as usize;
            if buf.remaining() < len {
                return None;
            }
            Some(WireMessage::FetchFileResponse {
                data: buf.copy_to_bytes(len),
            })
        }
        TAG_ERROR_RESPONSE => Some(WireMessage::ErrorResponse {
            message: get_string(buf)?,
        }),
        _ => None,
    }
}

fn put_string(buf: &mut BytesMut, s: &str) {
    #[allow(clippy::cast_possible_truncation)]
    buf.put_u16_le(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

fn get_string(buf: &mut Bytes) -> Option<String> {
    if buf.remaining() < 2 {
        return None;
    }
    let len = buf.get_u16_le() as usize;
    if buf.remaining() < len {
        return None;
    }
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).ok()
}

fn put_edit(buf: &mut BytesMut, edit: EditId) {
    buf.put_u64_le(edit.term.get());
    buf.put_u64_le(edit.index);
}

fn get_edit(buf: &mut Bytes) -> Option<EditId> {
    Some(EditId::new(Term::new(get_u64(buf)?), get_u64(buf)?))
}

fn get_u8(buf: &mut Bytes) -> Option<u8> {
    (buf.remaining() >= 1).then(|| buf.get_u8())
}

fn get_u32(buf: &mut Bytes) -> Option<u32> {
    (buf.remaining() >= 4).then(|| buf.get_u32_le())
}

fn get_u64(buf: &mut Bytes) -> Option<u64> {
    (buf.remaining() >= 8).then(|| buf.get_u64_le())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(message: &WireMessage) -> WireMessage {
        let framed = encode_message(message).unwrap();
        let len = u32::from_le_bytes(framed[0..4].try_into().unwrap()) as usize;
        assert_eq!(len, framed.len() - 4);
        decode_message(framed.slice(4..)).unwrap()
    }

    fn edit(term: u64, index: u64) -> EditId {
        EditId::new(Term::new(term), index)
    }

    #[test]
    fn test_vote_messages_roundtrip() {
        let request = WireMessage::VoteRequest(VoteRequest {
            quorum: QuorumId::new(7),
            candidate: PeerAddress::new("node1:9001"),
            edit: edit(4, 100),
            prev_edit: edit(3, 100),
        });
        assert_eq!(roundtrip(&request), request);

        let response = WireMessage::VoteResponse(VoteResponse {
            quorum: QuorumId::new(7),
            from: PeerAddress::new("node2:9001"),
            term: Term::new(4),
            edit: edit(4, 100),
            granted: true,
        });
        assert_eq!(roundtrip(&response), response);
    }

    #[test]
    fn test_append_request_with_entries_roundtrip() {
        let request = WireMessage::AppendRequest(AppendRequest {
            quorum: QuorumId::new(1),
            leader: PeerAddress::new("node1:9001"),
            term: Term::new(2),
            prev_edit: edit(2, 10),
            committed_index: 9,
            entries: vec![
                LogEntry::new(edit(2, 11), Bytes::from("alpha")),
                LogEntry::new(edit(2, 12), Bytes::from("beta")),
            ],
        });
        assert_eq!(roundtrip(&request), request);
    }

    #[test]
    fn test_status_and_fetch_roundtrip() {
        let status = WireMessage::StatusResponse(PeerStatus {
            quorum: QuorumId::new(2),
            role: RaftRole::Leader,
            term: Term::new(5),
            committed_index: 42,
            last_edit: edit(5, 44),
        });
        assert_eq!(roundtrip(&status), status);

        let files = WireMessage::LogStatusResponse {
            files: vec![LogFileInfo::new(
                "log-1-1.qlog".to_string(),
                1,
                512,
                Term::new(1),
            )],
        };
        assert_eq!(roundtrip(&files), files);

        let fetch = WireMessage::FetchFileResponse {
            data: Bytes::from(vec![7u8; 128]),
        };
        assert_eq!(roundtrip(&fetch), fetch);
    }

    #[test]
    fn test_truncated_body_rejected() {
        let request = WireMessage::StatusRequest {
            quorum: QuorumId::new(1),
        };
        let framed = encode_message(&request).unwrap();
        let result = decode_message(framed.slice(4..framed.len() - 2));
        assert!(matches!(result, Err(CodecError::Malformed { .. })));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let result = decode_message(Bytes::from_static(&[200, 0, 0]));
        assert!(matches!(
            result,
            Err(CodecError::UnknownMessageType { tag: 200 })
        ));
    }
}
