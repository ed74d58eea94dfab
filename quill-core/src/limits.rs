//! Engine-wide limits.
//!
//! Explicit bounds checked at the edges; exceeding one is an error, never
//! silent truncation.

/// Maximum number of peers in a single quorum configuration.
pub const QUORUM_SIZE_MAX: usize = 7;

/// Maximum payload size of a single log entry (16 MiB).
pub const ENTRY_PAYLOAD_BYTES_MAX: u32 = 16 * 1024 * 1024;

/// Maximum size of one log segment file (64 MiB).
pub const SEGMENT_BYTES_MAX: u64 = 64 * 1024 * 1024;

/// Maximum size of one framed wire message (32 MiB).
///
/// Must exceed `ENTRY_PAYLOAD_BYTES_MAX` so a maximal entry still fits in
/// an append request with headroom for framing.
pub const WIRE_MESSAGE_BYTES_MAX: u32 = 32 * 1024 * 1024;
