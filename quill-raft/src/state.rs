//! The per-quorum consensus state machine.
//!
//! [`RaftContext`] owns all mutable consensus state for one quorum. Its
//! single entry point, [`RaftContext::on_event`], is invoked serially by
//! the quorum's event loop and returns the side effects to execute as
//! [`RaftAction`] values. Durable writes (vote state, log entries) happen
//! synchronously inside the handler, so the hard-state invariants hold
//! before any response action is emitted; long-running rounds are
//! represented by sessions that later response events complete on the same
//! serial queue.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use quill_core::{
    ConsensusHost, EditId, PeerAddress, PeerRank, QuorumId, QuorumInfo, Term, QUORUM_SIZE_MAX,
};
use tracing::{debug, info, warn};

use crate::error::ConsensusError;
use crate::event::{RaftAction, RaftEvent};
use crate::message::{
    AppendRequest, AppendResponse, LogEntry, PeerStatus, RaftRole, VoteRequest, VoteResponse,
};
use crate::metrics::ConsensusMetrics;
use crate::payload::EntryPayload;
use crate::peer::{MembershipChangeState, PeerManager};
use crate::session::ConsensusSession;
use crate::storage::{LogStore, VoteState, VoteStore};

/// Maximum entries shipped in one append request or catch-up batch.
pub const APPEND_BATCH_MAX: usize = 64;

/// Hook for the external data store the quorum replicates for.
///
/// The engine treats entry payloads as opaque; this listener is how
/// committed edits reach storage and how a fresh leader contributes its
/// initial marker entry.
pub trait DataStoreListener: Send {
    /// Called on promotion. A returned payload is replicated as the
    /// leader's first entry; `None` sends an empty append instead.
    fn became_leader(&mut self) -> Option<Bytes> {
        None
    }

    /// Called for every committed data entry, in index order.
    fn on_commit(&mut self, edit: EditId, payload: &Bytes);
}

/// An open vote round: the request (for idempotent retries) and its acks.
struct VoteRound {
    request: VoteRequest,
    session: ConsensusSession,
}

/// An open append round.
struct AppendRound {
    session: ConsensusSession,
}

/// Mutable consensus root for one quorum.
///
/// Owned exclusively by the quorum's serial event loop; external threads
/// interact only by posting [`RaftEvent`]s.
pub struct RaftContext<V: VoteStore, L: LogStore> {
    quorum: QuorumId,
    address: PeerAddress,
    rank: PeerRank,
    peer_manager: PeerManager,
    role: RaftRole,
    current_edit: EditId,
    committed: EditId,
    leader: Option<ConsensusHost>,
    voted_for: Option<ConsensusHost>,
    vote_store: V,
    log: L,
    election: Option<VoteRound>,
    append: Option<AppendRound>,
    pending: VecDeque<EntryPayload>,
    peer_match: HashMap<PeerAddress, u64>,
    membership: Option<MembershipChangeState>,
    listener: Option<Box<dyn DataStoreListener>>,
    metrics: Arc<ConsensusMetrics>,
}

impl<V: VoteStore, L: LogStore> RaftContext<V, L> {
    /// Creates the context for one quorum member.
    ///
    /// Recovers the hard state from `vote_store` and the log position from
    /// `log`; the commit index is relearned from the leader.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or recovery fails.
    pub fn new(
        config: QuorumInfo,
        address: PeerAddress,
        vote_store: V,
        log: L,
        metrics: Arc<ConsensusMetrics>,
    ) -> Result<Self, ConsensusError> {
        if config.peers.is_empty() {
            return Err(ConsensusError::InvalidConfiguration {
                reason: "quorum has no peers",
            });
        }
        if config.peers.len() > QUORUM_SIZE_MAX {
            return Err(ConsensusError::InvalidConfiguration {
                reason: "quorum exceeds maximum size",
            });
        }
        let Some(this) = config.peer(&address) else {
            return Err(ConsensusError::InvalidConfiguration {
                reason: "this node is not in the quorum",
            });
        };
        let rank = this.rank;
        if rank.get() == 0 {
            return Err(ConsensusError::InvalidConfiguration {
                reason: "peer ranks start at 1",
            });
        }

        let recovered = vote_store.load()?;
        let last = log.last_edit();
        let term = recovered
            .as_ref()
            .map_or(last.term, |s| s.term.max(last.term));

        metrics.set_role(RaftRole::Follower);
        Ok(Self {
            quorum: config.id,
            address,
            rank,
            peer_manager: PeerManager::new(config),
            role: RaftRole::Follower,
            current_edit: EditId::new(term, last.index),
            committed: EditId::initial(),
            leader: None,
            voted_for: recovered.and_then(|s| s.voted_for),
            vote_store,
            log,
            election: None,
            append: None,
            pending: VecDeque::new(),
            peer_match: HashMap::new(),
            membership: None,
            listener: None,
            metrics,
        })
    }

    /// Attaches the data-store listener.
    #[must_use]
    pub fn with_listener(mut self, listener: Box<dyn DataStoreListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// This node's address.
    #[must_use]
    pub fn address(&self) -> &PeerAddress {
        &self.address
    }

    /// The quorum this context drives.
    #[must_use]
    pub const fn quorum_id(&self) -> QuorumId {
        self.quorum
    }

    /// Current role.
    #[must_use]
    pub const fn role(&self) -> RaftRole {
        self.role
    }

    /// True if this node currently leads the quorum.
    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.role == RaftRole::Leader
    }

    /// Current term.
    #[must_use]
    pub const fn current_term(&self) -> Term {
        self.current_edit.term
    }

    /// Current edit id (highest term seen, last appended index).
    #[must_use]
    pub const fn current_edit(&self) -> EditId {
        self.current_edit
    }

    /// Identity of the last committed edit.
    #[must_use]
    pub const fn committed_edit(&self) -> EditId {
        self.committed
    }

    /// The leader this node recognizes, if any.
    #[must_use]
    pub const fn leader(&self) -> Option<&ConsensusHost> {
        self.leader.as_ref()
    }

    /// The peer configuration manager.
    #[must_use]
    pub const fn peer_manager(&self) -> &PeerManager {
        &self.peer_manager
    }

    /// Read access to the log store (reconciliation export).
    #[must_use]
    pub const fn log(&self) -> &L {
        &self.log
    }

    /// Diagnostic status for the probe RPC.
    #[must_use]
    pub fn status(&self) -> PeerStatus {
        PeerStatus {
            quorum: self.quorum,
            role: self.role,
            term: self.current_edit.term,
            committed_index: self.committed.index,
            last_edit: self.log.last_edit(),
        }
    }

    /// Processes one event and returns the side effects to execute.
    ///
    /// Invoked serially per quorum; never concurrently.
    pub fn on_event(&mut self, event: RaftEvent) -> Vec<RaftAction> {
        match event {
            RaftEvent::ProgressTimeout => self.send_vote_request(),
            RaftEvent::HeartbeatTimeout => self.on_heartbeat_timeout(),
            RaftEvent::VoteRequestReceived(req) => self.handle_vote_request(req),
            RaftEvent::VoteResponseReceived(resp) => self.handle_vote_response(resp),
            RaftEvent::AppendRequestReceived(req) => self.handle_append_request(&req),
            RaftEvent::AppendResponseReceived(resp) => self.handle_append_response(resp),
            RaftEvent::ReplicateEntries(payload) => self.handle_replicate(payload),
            RaftEvent::MembershipChangeRequested(config) => self.handle_membership_change(config),
            RaftEvent::Halt { reason } => self.abdicate(&reason),
        }
    }

    /// Starts (or retries) an election round.
    fn send_vote_request(&mut self) -> Vec<RaftAction> {
        if self.role == RaftRole::Leader {
            return Vec::new();
        }
        let mut actions = Vec::new();

        // An open round for the current edit is retried with the same
        // request; a fresh term increment on every transient failure would
        // inflate terms across the quorum.
        if let Some(round) = &self.election {
            if !round.session.is_complete() && round.request.edit == self.current_edit {
                let request = round.request.clone();
                debug!(quorum = %self.quorum, edit = %request.edit, "retrying open election round");
                self.broadcast_vote_request(&request, &mut actions);
                actions.push(RaftAction::ResetProgressTimer);
                return actions;
            }
        }

        let election_edit = EditId::election_id(self.current_edit, self.rank);
        let prev_edit = self.log.last_edit();
        let self_vote = ConsensusHost::new(election_edit.term, self.address.clone());

        // The self-vote must be durable before any solicitation leaves.
        if let Err(err) = self.persist_hard_state(election_edit.term, Some(self_vote.clone()), None)
        {
            warn!(quorum = %self.quorum, error = %err, "abandoning candidacy: vote state not durable");
            self.role = RaftRole::Follower;
            self.metrics.set_role(self.role);
            actions.push(RaftAction::ResetProgressTimer);
            return actions;
        }

        self.current_edit = election_edit;
        self.leader = None;
        self.voted_for = Some(self_vote);
        self.role = RaftRole::Candidate;
        self.metrics.set_role(self.role);
        self.metrics.election_started();
        info!(quorum = %self.quorum, edit = %election_edit, "starting election");

        let request = VoteRequest {
            quorum: self.quorum,
            candidate: self.address.clone(),
            edit: election_edit,
            prev_edit,
        };
        let mut session = self.peer_manager.create_vote_session(election_edit);
        let won = session.increment_ack(election_edit, &self.address);
        self.election = Some(VoteRound {
            request: request.clone(),
            session,
        });

        self.broadcast_vote_request(&request, &mut actions);
        actions.push(RaftAction::ResetProgressTimer);
        if won {
            // Single-node quorum: the self-vote already is a majority.
            actions.extend(self.become_leader());
        }
        actions
    }

    fn broadcast_vote_request(&self, request: &VoteRequest, actions: &mut Vec<RaftAction>) {
        for to in self.peer_manager.broadcast_targets(&self.address) {
            actions.push(RaftAction::SendVoteRequest {
                to,
                request: request.clone(),
            });
        }
    }

    /// Responds to a peer's vote solicitation.
    fn handle_vote_request(&mut self, req: VoteRequest) -> Vec<RaftAction> {
        let mut actions = Vec::new();

        if req.edit.term > self.current_edit.term {
            actions.extend(self.step_down(req.edit.term));
        }

        let granted = if req.edit.term < self.current_edit.term {
            false
        } else {
            let can_vote = match &self.voted_for {
                None => true,
                Some(host) => {
                    host.term < req.edit.term || host.address == req.candidate
                }
            };
            let up_to_date = req.prev_edit.is_up_to_date_with(self.log.last_edit());
            can_vote && up_to_date
        };

        if granted {
            let host = ConsensusHost::new(req.edit.term, req.candidate.clone());
            // Durable before the response leaves, or no response at all;
            // the candidate treats silence as a non-ack and retries.
            if let Err(err) = self.persist_hard_state(
                self.current_edit.term,
                Some(host.clone()),
                self.leader.clone(),
            ) {
                warn!(quorum = %self.quorum, error = %err, "dropping vote response: vote state not durable");
                return actions;
            }
            self.voted_for = Some(host);
            self.metrics.vote_granted();
            actions.push(RaftAction::ResetProgressTimer);
        }

        let response = VoteResponse {
            quorum: self.quorum,
            from: self.address.clone(),
            term: self.current_edit.term,
            edit: req.edit,
            granted,
        };
        actions.push(RaftAction::SendVoteResponse {
            to: req.candidate,
            response,
        });
        actions
    }

    /// Counts a vote response toward the open election round.
    fn handle_vote_response(&mut self, resp: VoteResponse) -> Vec<RaftAction> {
        if resp.term > self.current_edit.term {
            return self.step_down(resp.term);
        }
        if self.role != RaftRole::Candidate || !resp.granted {
            return Vec::new();
        }
        let Some(round) = &mut self.election else {
            return Vec::new();
        };
        // Stale-edit acks fall out here: the session only counts its own id.
        if round.session.increment_ack(resp.edit, &resp.from) {
            return self.become_leader();
        }
        Vec::new()
    }

    /// Promotion side effects.
    fn become_leader(&mut self) -> Vec<RaftAction> {
        debug_assert!(
            self.append.is_none(),
            "no append round may be outstanding at promotion"
        );
        let mut actions = Vec::new();
        self.election = None;

        let term = self.current_edit.term;
        let host = ConsensusHost::new(term, self.address.clone());
        if let Err(err) =
            self.persist_hard_state(term, self.voted_for.clone(), Some(host.clone()))
        {
            warn!(quorum = %self.quorum, error = %err, "abandoning promotion: leader marker not durable");
            self.role = RaftRole::Follower;
            self.metrics.set_role(self.role);
            actions.push(RaftAction::ResetProgressTimer);
            return actions;
        }

        self.leader = Some(host);
        self.role = RaftRole::Leader;
        self.metrics.set_role(self.role);
        self.metrics.election_won();
        info!(quorum = %self.quorum, edit = %self.current_edit, "promoted to leader");

        // Optimistic replication cursors; conflict hints walk them back.
        let last_index = self.log.last_edit().index;
        self.peer_match.clear();
        for peer in self.peer_manager.broadcast_targets(&self.address) {
            self.peer_match.insert(peer, last_index);
        }

        actions.push(RaftAction::StopProgressTimer);
        actions.push(RaftAction::StartHeartbeatTimer);
        actions.push(RaftAction::BecameLeader);

        // The data store may contribute an initial marker entry.
        if let Some(marker) = self.listener.as_mut().and_then(|l| l.became_leader()) {
            self.pending.push_back(EntryPayload::Data(marker));
        }

        // A joint configuration found at promotion means a membership
        // change was interrupted; drive it to completion.
        if let Some(new_config) = self.peer_manager.configs().1.cloned() {
            self.membership = Some(MembershipChangeState::JointConfigCommitInProgress);
            self.pending.push_back(EntryPayload::JointConfig(new_config));
        }

        if self.pending.is_empty() {
            actions.extend(self.send_heartbeats());
        } else {
            actions.extend(self.start_append_round());
        }
        actions
    }

    /// Ships queued payloads as a new append round, if none is open.
    fn start_append_round(&mut self) -> Vec<RaftAction> {
        // Leadership may have been abandoned mid-commit (e.g. this node
        // was removed from the configuration); queued payloads die with it.
        if self.role != RaftRole::Leader || self.append.is_some() || self.pending.is_empty() {
            return Vec::new();
        }
        let mut actions = Vec::new();

        let term = self.current_edit.term;
        let prev_edit = self.log.last_edit();
        let mut next_index = prev_edit.index + 1;
        let mut entries = Vec::new();

        while entries.len() < APPEND_BATCH_MAX {
            let Some(payload) = self.pending.pop_front() else {
                break;
            };
            let edit = EditId::new(term, next_index);
            let framed = payload.encode();
            if let Err(err) = self.log.append(edit, framed.clone()) {
                warn!(quorum = %self.quorum, error = %err, "log append failed");
                return self.abdicate("log append failed");
            }
            entries.push(LogEntry::new(edit, framed));
            next_index += 1;
        }
        if let Err(err) = self.log.sync() {
            warn!(quorum = %self.quorum, error = %err, "log sync failed");
            return self.abdicate("log sync failed");
        }

        let round_edit = entries
            .last()
            .map_or(prev_edit, |e| e.edit);
        self.current_edit = round_edit;

        let request = AppendRequest {
            quorum: self.quorum,
            leader: self.address.clone(),
            term,
            prev_edit,
            committed_index: self.committed.index,
            entries,
        };
        let mut session = self.peer_manager.create_append_session(round_edit);
        let complete = session.increment_ack(round_edit, &self.address);
        self.append = Some(AppendRound { session });

        let targets = self.peer_manager.broadcast_targets(&self.address);
        self.metrics.appends_sent(targets.len() as u64);
        for to in targets {
            actions.push(RaftAction::SendAppendRequest {
                to,
                request: request.clone(),
            });
        }

        if complete {
            // Single-node quorum commits at the local ack.
            actions.extend(self.complete_append_round());
        }
        actions
    }

    /// Responds to the leader's append (entries or heartbeat).
    fn handle_append_request(&mut self, req: &AppendRequest) -> Vec<RaftAction> {
        let mut actions = Vec::new();

        if req.term > self.current_edit.term {
            actions.extend(self.step_down(req.term));
        }
        if req.term < self.current_edit.term {
            // Stale leader: answer with the current term so it steps down.
            actions.push(RaftAction::SendAppendResponse {
                to: req.leader.clone(),
                response: AppendResponse {
                    quorum: self.quorum,
                    from: self.address.clone(),
                    term: self.current_edit.term,
                    edit: req.round_edit(),
                    success: false,
                    last_index: self.log.last_edit().index,
                },
            });
            return actions;
        }

        // Valid append at our term: a candidate yields to the leader.
        if self.role == RaftRole::Candidate {
            self.role = RaftRole::Follower;
            self.metrics.set_role(self.role);
            self.election = None;
        }
        self.leader = Some(ConsensusHost::new(req.term, req.leader.clone()));
        actions.push(RaftAction::ResetProgressTimer);

        let local_last = self.log.last_edit();
        let matches_prefix = req.prev_edit == EditId::initial()
            || self.log.term_at(req.prev_edit.index) == Some(req.prev_edit.term);

        if !matches_prefix {
            // Missing or conflicting prefix. Hint where replication can
            // safely resume: the committed index on a term conflict, the
            // log end on a simple gap.
            let hint = if req.prev_edit.index > local_last.index {
                local_last.index
            } else {
                self.committed.index
            };
            actions.push(RaftAction::SendAppendResponse {
                to: req.leader.clone(),
                response: AppendResponse {
                    quorum: self.quorum,
                    from: self.address.clone(),
                    term: self.current_edit.term,
                    edit: req.round_edit(),
                    success: false,
                    last_index: hint,
                },
            });
            return actions;
        }

        // Drop any tail a deposed leader left past the matching prefix.
        if local_last.index > req.prev_edit.index {
            debug_assert!(
                req.prev_edit.index >= self.committed.index,
                "a correct leader never truncates committed entries"
            );
            if let Err(err) = self.log.truncate_after(req.prev_edit.index) {
                warn!(quorum = %self.quorum, error = %err, "tail truncation failed; withholding ack");
                return actions;
            }
        }

        for entry in &req.entries {
            if entry.edit.index <= self.log.last_edit().index {
                continue; // Duplicate delivery of an entry we hold.
            }
            if let Err(err) = self.log.append(entry.edit, entry.payload.clone()) {
                warn!(quorum = %self.quorum, error = %err, "entry append failed; withholding ack");
                return actions;
            }
        }
        if !req.entries.is_empty() {
            if let Err(err) = self.log.sync() {
                warn!(quorum = %self.quorum, error = %err, "log sync failed; withholding ack");
                return actions;
            }
            self.current_edit = self.log.last_edit();
        }

        let commit_target = req.committed_index.min(self.log.last_edit().index);
        actions.extend(self.advance_commit(commit_target));

        actions.push(RaftAction::SendAppendResponse {
            to: req.leader.clone(),
            response: AppendResponse {
                quorum: self.quorum,
                from: self.address.clone(),
                term: self.current_edit.term,
                edit: req.round_edit(),
                success: true,
                last_index: self.log.last_edit().index,
            },
        });
        actions
    }

    /// Counts an append acknowledgment; repairs lagging peers.
    fn handle_append_response(&mut self, resp: AppendResponse) -> Vec<RaftAction> {
        if resp.term > self.current_edit.term {
            return self.step_down(resp.term);
        }
        if self.role != RaftRole::Leader {
            return Vec::new();
        }

        if resp.success {
            self.peer_match.insert(resp.from.clone(), resp.last_index);
            if let Some(round) = &mut self.append {
                if round.session.increment_ack(resp.edit, &resp.from) {
                    return self.complete_append_round();
                }
            }
            return Vec::new();
        }

        // The follower rejected: resume from its hint.
        let matched = resp.last_index;
        self.peer_match.insert(resp.from.clone(), matched);
        self.catch_up(resp.from, matched)
    }

    /// Ships a catch-up batch to one peer starting after `matched`.
    fn catch_up(&mut self, to: PeerAddress, matched: u64) -> Vec<RaftAction> {
        let entries = match self.log.entries_from(matched + 1, APPEND_BATCH_MAX) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(quorum = %self.quorum, error = %err, "catch-up read failed");
                return Vec::new();
            }
        };
        if entries.is_empty() {
            return Vec::new();
        }

        let prev_edit = if matched == 0 {
            EditId::initial()
        } else {
            match self.log.term_at(matched) {
                Some(term) => EditId::new(term, matched),
                None => {
                    warn!(quorum = %self.quorum, matched, "catch-up point precedes local log");
                    return Vec::new();
                }
            }
        };

        let request = AppendRequest {
            quorum: self.quorum,
            leader: self.address.clone(),
            term: self.current_edit.term,
            prev_edit,
            committed_index: self.committed.index,
            entries: entries
                .into_iter()
                .map(|(edit, payload)| LogEntry::new(edit, payload))
                .collect(),
        };
        self.metrics.appends_sent(1);
        vec![RaftAction::SendAppendRequest { to, request }]
    }

    /// Commits the finished round and starts the next queued one.
    fn complete_append_round(&mut self) -> Vec<RaftAction> {
        let Some(round) = self.append.take() else {
            return Vec::new();
        };
        debug_assert!(round.session.is_complete());

        let mut actions = self.advance_commit(round.session.edit().index);
        actions.extend(self.start_append_round());
        actions
    }

    /// Advances the commit frontier to `target`, applying each entry.
    fn advance_commit(&mut self, target: u64) -> Vec<RaftAction> {
        let mut actions = Vec::new();
        if target <= self.committed.index {
            return actions;
        }

        let first = self.committed.index + 1;
        let want = usize::try_from(target - self.committed.index).unwrap_or(usize::MAX);
        let batch = match self.log.entries_from(first, want) {
            Ok(batch) => batch,
            Err(err) => {
                warn!(quorum = %self.quorum, error = %err, "commit read failed");
                return actions;
            }
        };

        for (edit, framed) in batch {
            if edit.index != self.committed.index + 1 {
                warn!(quorum = %self.quorum, index = edit.index, "gap at commit frontier");
                break;
            }
            self.committed = edit;
            actions.extend(self.apply_committed(edit, framed));
        }

        debug_assert!(self.committed.index <= target);
        actions
    }

    /// Applies one committed entry: data goes to the listener, config
    /// entries advance the membership change.
    fn apply_committed(&mut self, edit: EditId, framed: Bytes) -> Vec<RaftAction> {
        let mut actions = Vec::new();
        match EntryPayload::decode(framed) {
            Some(EntryPayload::Data(payload)) => {
                self.metrics.entries_committed(1);
                if let Some(listener) = self.listener.as_mut() {
                    listener.on_commit(edit, &payload);
                }
                actions.push(RaftAction::CommitEntry { edit, payload });
            }
            Some(EntryPayload::JointConfig(new_config)) => {
                info!(quorum = %self.quorum, edit = %edit, "joint configuration committed");
                self.peer_manager.begin_joint(new_config.clone());
                if self.role == RaftRole::Leader
                    && self.membership == Some(MembershipChangeState::JointConfigCommitInProgress)
                {
                    self.membership = Some(MembershipChangeState::NewConfigCommitInProgress);
                    self.pending.push_back(EntryPayload::NewConfig(new_config));
                }
            }
            Some(EntryPayload::NewConfig(_)) => {
                info!(quorum = %self.quorum, edit = %edit, "new configuration committed");
                self.peer_manager.complete_joint();
                if self.role == RaftRole::Leader {
                    self.membership = None;
                }
                if !self.peer_manager.contains(&self.address) {
                    actions.extend(self.abdicate("removed from configuration"));
                }
            }
            None => {
                warn!(quorum = %self.quorum, edit = %edit, "undecodable engine entry at commit");
            }
        }
        actions
    }

    /// Leader heartbeat: empty appends to healthy peers, catch-up batches
    /// to lagging ones.
    fn on_heartbeat_timeout(&mut self) -> Vec<RaftAction> {
        if self.role != RaftRole::Leader {
            return Vec::new();
        }
        self.send_heartbeats()
    }

    fn send_heartbeats(&mut self) -> Vec<RaftAction> {
        debug_assert!(self.role == RaftRole::Leader);
        let mut actions = Vec::new();
        let last = self.log.last_edit();
        let targets = self.peer_manager.broadcast_targets(&self.address);
        self.metrics.appends_sent(targets.len() as u64);

        for to in targets {
            let matched = self.peer_match.get(&to).copied().unwrap_or(last.index);
            if matched < last.index {
                actions.extend(self.catch_up(to, matched));
            } else {
                let request = AppendRequest {
                    quorum: self.quorum,
                    leader: self.address.clone(),
                    term: self.current_edit.term,
                    prev_edit: last,
                    committed_index: self.committed.index,
                    entries: Vec::new(),
                };
                actions.push(RaftAction::SendAppendRequest { to, request });
            }
        }
        actions
    }

    /// Queues a host payload for replication (leader only).
    fn handle_replicate(&mut self, payload: Bytes) -> Vec<RaftAction> {
        if self.role != RaftRole::Leader {
            debug!(quorum = %self.quorum, "dropping replicate request: not leader");
            return Vec::new();
        }
        self.pending.push_back(EntryPayload::Data(payload));
        self.start_append_round()
    }

    /// Begins a joint membership change toward `new_config`.
    fn handle_membership_change(&mut self, new_config: QuorumInfo) -> Vec<RaftAction> {
        if self.role != RaftRole::Leader {
            warn!(quorum = %self.quorum, "ignoring membership change: not leader");
            return Vec::new();
        }
        if self.membership.is_some() || self.peer_manager.is_joint() {
            warn!(quorum = %self.quorum, "ignoring membership change: one is already in flight");
            return Vec::new();
        }
        if new_config.id != self.quorum
            || new_config.peers.is_empty()
            || new_config.peers.len() > QUORUM_SIZE_MAX
        {
            warn!(quorum = %self.quorum, "ignoring membership change: invalid configuration");
            return Vec::new();
        }

        info!(quorum = %self.quorum, peers = new_config.peers.len(), "starting membership change");
        self.peer_manager.begin_joint(new_config.clone());
        self.membership = Some(MembershipChangeState::JointConfigCommitInProgress);
        self.pending.push_back(EntryPayload::JointConfig(new_config));
        self.start_append_round()
    }

    /// Abandons leadership/candidacy without a term change.
    fn abdicate(&mut self, reason: &str) -> Vec<RaftAction> {
        warn!(quorum = %self.quorum, reason, "reverting to follower");
        let was_leader = self.role == RaftRole::Leader;
        self.role = RaftRole::Follower;
        self.metrics.set_role(self.role);
        self.metrics.stepped_down();
        self.leader = None;
        self.election = None;
        self.append = None;
        self.pending.clear();
        self.membership = None;

        let mut actions = Vec::new();
        if was_leader {
            actions.push(RaftAction::StopHeartbeatTimer);
            actions.push(RaftAction::SteppedDown);
        }
        actions.push(RaftAction::ResetProgressTimer);
        actions
    }

    /// Adopts a higher term observed on the wire and becomes follower.
    fn step_down(&mut self, new_term: Term) -> Vec<RaftAction> {
        debug_assert!(new_term > self.current_edit.term);
        let was_leader = self.role == RaftRole::Leader;

        self.current_edit = EditId::new(new_term, self.current_edit.index);
        self.voted_for = None;
        self.leader = None;
        self.election = None;
        self.append = None;
        self.pending.clear();
        self.membership = None;
        self.role = RaftRole::Follower;
        self.metrics.set_role(self.role);
        if was_leader {
            self.metrics.stepped_down();
        }

        // Best-effort: a failure here only delays term adoption on disk;
        // any vote at this term persists again before it is answered.
        if let Err(err) = self.persist_hard_state(new_term, None, None) {
            warn!(quorum = %self.quorum, error = %err, "term adoption not persisted");
        }

        let mut actions = Vec::new();
        if was_leader {
            actions.push(RaftAction::StopHeartbeatTimer);
            actions.push(RaftAction::SteppedDown);
        }
        actions.push(RaftAction::ResetProgressTimer);
        actions
    }

    fn persist_hard_state(
        &mut self,
        term: Term,
        voted_for: Option<ConsensusHost>,
        leader: Option<ConsensusHost>,
    ) -> Result<(), crate::storage::StorageError> {
        self.vote_store.save(&VoteState {
            term,
            voted_for,
            leader,
        })
    }
}
