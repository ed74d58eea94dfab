//! Per-quorum serial event loops.
//!
//! Each quorum gets one task that owns its [`RaftContext`] and drains a
//! command queue strictly serially, so no two events for the same quorum
//! are ever processed concurrently while different quorums proceed in
//! parallel on the shared worker pool. Status and reconciliation-export
//! reads travel through the same queue, which keeps them consistent with
//! the append tail without extra locking.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use quill_core::{QuorumId, QuorumInfo};
use quill_log::LogFileInfo;
use quill_raft::{
    LogExport, LogStore, PeerStatus, RaftAction, RaftContext, RaftEvent, VoteStore,
};
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info};

use crate::codec::WireMessage;
use crate::timer::{spawn_timer, TimerConfig, TimerHandle};
use crate::transport::PeerTransport;

/// Commands accepted by a quorum's event loop.
pub enum QuorumCommand {
    /// A state machine event.
    Event(RaftEvent),
    /// Diagnostic status query.
    Status(oneshot::Sender<PeerStatus>),
    /// Committed-segment inventory query (reconciliation export).
    LogStatus {
        /// Only segments with entries past this index are wanted.
        min_index: u64,
        /// Where to deliver the advertisement.
        reply: oneshot::Sender<Vec<LogFileInfo>>,
    },
    /// Raw segment read (reconciliation export).
    ReadSegment {
        /// Segment file name.
        name: String,
        /// Where to deliver the bytes.
        reply: oneshot::Sender<Option<Bytes>>,
    },
}

/// Handle for posting work to one quorum's serial queue.
#[derive(Clone)]
pub struct QuorumHandle {
    sender: mpsc::UnboundedSender<QuorumCommand>,
}

impl QuorumHandle {
    /// Posts a state machine event.
    pub fn post(&self, event: RaftEvent) {
        let _ = self.sender.send(QuorumCommand::Event(event));
    }

    /// Asks the quorum to replicate an opaque payload.
    pub fn replicate(&self, payload: Bytes) {
        self.post(RaftEvent::ReplicateEntries(payload));
    }

    /// Queries the quorum's status. `None` if the quorum shut down.
    pub async fn status(&self) -> Option<PeerStatus> {
        let (reply, rx) = oneshot::channel();
        if self.sender.send(QuorumCommand::Status(reply)).is_err() {
            return None;
        }
        rx.await.ok()
    }

    /// Queries the committed-segment inventory past `min_index`.
    pub async fn log_status(&self, min_index: u64) -> Option<Vec<LogFileInfo>> {
        let (reply, rx) = oneshot::channel();
        if self
            .sender
            .send(QuorumCommand::LogStatus { min_index, reply })
            .is_err()
        {
            return None;
        }
        rx.await.ok()
    }

    /// Reads one advertised segment's bytes.
    pub async fn read_segment(&self, name: String) -> Option<Bytes> {
        let (reply, rx) = oneshot::channel();
        if self
            .sender
            .send(QuorumCommand::ReadSegment { name, reply })
            .is_err()
        {
            return None;
        }
        rx.await.ok().flatten()
    }
}

/// Maps quorum ids to their handles for inbound dispatch.
#[derive(Default)]
pub struct QuorumRegistry {
    map: RwLock<HashMap<QuorumId, QuorumHandle>>,
}

impl QuorumRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a quorum's handle.
    pub async fn register(&self, quorum: QuorumId, handle: QuorumHandle) {
        self.map.write().await.insert(quorum, handle);
    }

    /// Removes a quorum.
    pub async fn remove(&self, quorum: QuorumId) {
        self.map.write().await.remove(&quorum);
    }

    /// Looks up a quorum's handle.
    pub async fn get(&self, quorum: QuorumId) -> Option<QuorumHandle> {
        self.map.read().await.get(&quorum).cloned()
    }
}

/// Spawns the event loop and timers for one quorum.
///
/// `config` must be the same configuration the context was built with;
/// it supplies the ranks that bias the progress timer.
pub fn spawn_quorum<V, L>(
    config: &QuorumInfo,
    ctx: RaftContext<V, L>,
    transport: Arc<PeerTransport>,
    timers: TimerConfig,
) -> QuorumHandle
where
    V: VoteStore + 'static,
    L: LogStore + LogExport + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();

    let rank = config
        .peer(ctx.address())
        .map_or(1, |p| p.rank.get());
    let max_rank = config.max_rank().get().max(rank);

    let events = tx.clone();
    let progress = spawn_timer(
        "progress",
        true,
        timers.progress_durations(rank, max_rank),
        move || {
            let _ = events.send(QuorumCommand::Event(RaftEvent::ProgressTimeout));
        },
    );

    let events = tx.clone();
    let interval = timers.heartbeat_interval;
    let heartbeat = spawn_timer(
        "heartbeat",
        false,
        move || interval,
        move || {
            let _ = events.send(QuorumCommand::Event(RaftEvent::HeartbeatTimeout));
        },
    );

    tokio::spawn(run_quorum(ctx, rx, transport, progress, heartbeat));
    QuorumHandle { sender: tx }
}

async fn run_quorum<V, L>(
    mut ctx: RaftContext<V, L>,
    mut rx: mpsc::UnboundedReceiver<QuorumCommand>,
    transport: Arc<PeerTransport>,
    progress: TimerHandle,
    heartbeat: TimerHandle,
) where
    V: VoteStore,
    L: LogStore + LogExport,
{
    let quorum = ctx.quorum_id();
    info!(%quorum, address = %ctx.address(), "quorum event loop started");

    while let Some(command) = rx.recv().await {
        match command {
            QuorumCommand::Event(event) => {
                for action in ctx.on_event(event) {
                    execute(quorum, &transport, &progress, &heartbeat, action);
                }
            }
            QuorumCommand::Status(reply) => {
                let _ = reply.send(ctx.status());
            }
            QuorumCommand::LogStatus { min_index, reply } => {
                let committed = ctx.committed_edit().index;
                let _ = reply.send(ctx.log().advertise(min_index, committed));
            }
            QuorumCommand::ReadSegment { name, reply } => {
                let _ = reply.send(ctx.log().read_segment(&name));
            }
        }
    }

    info!(%quorum, "quorum event loop stopped");
}

fn execute(
    quorum: QuorumId,
    transport: &PeerTransport,
    progress: &TimerHandle,
    heartbeat: &TimerHandle,
    action: RaftAction,
) {
    match action {
        RaftAction::SendVoteRequest { to, request } => {
            transport.send(&to, &WireMessage::VoteRequest(request));
        }
        RaftAction::SendVoteResponse { to, response } => {
            transport.send(&to, &WireMessage::VoteResponse(response));
        }
        RaftAction::SendAppendRequest { to, request } => {
            transport.send(&to, &WireMessage::AppendRequest(request));
        }
        RaftAction::SendAppendResponse { to, response } => {
            transport.send(&to, &WireMessage::AppendResponse(response));
        }
        RaftAction::ResetProgressTimer => progress.reset(),
        RaftAction::StopProgressTimer => progress.stop(),
        RaftAction::StartHeartbeatTimer => heartbeat.start(),
        RaftAction::StopHeartbeatTimer => heartbeat.stop(),
        RaftAction::CommitEntry { edit, .. } => {
            debug!(%quorum, %edit, "entry committed");
        }
        RaftAction::BecameLeader => info!(%quorum, "became leader"),
        RaftAction::SteppedDown => info!(%quorum, "stepped down"),
    }
}
