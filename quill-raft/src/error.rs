//! Consensus error types.

use thiserror::Error;

use crate::storage::StorageError;

/// Errors surfaced by the consensus engine.
///
/// Transient faults (peer silence, stale terms, recoverable storage
/// hiccups) never surface here; the state machine absorbs them and retries
/// via its timers. These errors are for conditions an operator must fix.
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// The quorum configuration is unusable.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Why the configuration was rejected.
        reason: &'static str,
    },

    /// Durable state could not be recovered at startup.
    #[error(transparent)]
    Storage(#[from] StorageError),
}
