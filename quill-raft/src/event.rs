//! Events consumed and actions produced by the state machine.

use bytes::Bytes;
use quill_core::{EditId, PeerAddress, QuorumInfo};

use crate::message::{AppendRequest, AppendResponse, VoteRequest, VoteResponse};

/// An input to the per-quorum state machine.
///
/// Events are posted to a quorum's serial queue and processed in arrival
/// order; no two events of one quorum are ever processed concurrently.
#[derive(Debug, Clone)]
pub enum RaftEvent {
    /// A peer solicited our vote.
    VoteRequestReceived(VoteRequest),
    /// A peer answered our vote solicitation.
    VoteResponseReceived(VoteResponse),
    /// The leader shipped entries (or a heartbeat).
    AppendRequestReceived(AppendRequest),
    /// A peer answered our append.
    AppendResponseReceived(AppendResponse),
    /// The progress (election) timer expired without leader contact.
    ProgressTimeout,
    /// The heartbeat timer fired (leader only).
    HeartbeatTimeout,
    /// The host application asked to replicate a payload.
    ReplicateEntries(Bytes),
    /// An operator requested a membership change to the given config.
    MembershipChangeRequested(QuorumInfo),
    /// Abandon all in-flight work and fall back to follower.
    Halt {
        /// Why the quorum is being halted.
        reason: String,
    },
}

/// A side effect requested by the state machine.
///
/// The runtime executes these after `on_event` returns: network sends go
/// to the transport, timer actions to the quorum's timer tasks, and the
/// remaining variants are surfaced to the host for observability.
#[derive(Debug, Clone)]
pub enum RaftAction {
    /// Send a vote solicitation to a peer.
    SendVoteRequest {
        /// Destination peer.
        to: PeerAddress,
        /// The request to deliver.
        request: VoteRequest,
    },
    /// Answer a peer's vote solicitation.
    SendVoteResponse {
        /// Destination peer.
        to: PeerAddress,
        /// The response to deliver.
        response: VoteResponse,
    },
    /// Ship entries (or a heartbeat) to a peer.
    SendAppendRequest {
        /// Destination peer.
        to: PeerAddress,
        /// The request to deliver.
        request: AppendRequest,
    },
    /// Answer the leader's append.
    SendAppendResponse {
        /// Destination peer.
        to: PeerAddress,
        /// The response to deliver.
        response: AppendResponse,
    },
    /// Restart the progress (election) timer.
    ResetProgressTimer,
    /// Stop the progress timer (on leader promotion).
    StopProgressTimer,
    /// Start the periodic heartbeat timer.
    StartHeartbeatTimer,
    /// Stop the heartbeat timer (on step-down).
    StopHeartbeatTimer,
    /// An entry reached commit; `payload` is the application bytes.
    CommitEntry {
        /// Identity of the committed entry.
        edit: EditId,
        /// The committed payload as handed to the data store.
        payload: Bytes,
    },
    /// This node was promoted to leader.
    BecameLeader,
    /// This node gave up leadership.
    SteppedDown,
}
