//! Durable storage integration: the consensus context over on-disk
//! stores, across restarts.

use bytes::Bytes;
use quill_core::{EditId, PeerAddress, PeerInfo, PeerRank, QuorumId, QuorumInfo, Term};
use quill_raft::{
    ConsensusMetrics, DataStoreListener, FileVoteStore, LogStore, RaftContext, RaftEvent,
    RaftRole, SegmentLogStore,
};
use tempfile::tempdir;

fn single_node_config() -> QuorumInfo {
    QuorumInfo::new(
        QuorumId::new(1),
        vec![PeerInfo::new(PeerAddress::new("n1:1"), PeerRank::new(1))],
    )
}

fn open_context(dir: &std::path::Path) -> RaftContext<FileVoteStore, SegmentLogStore> {
    let vote_store = FileVoteStore::new(dir.join("vote.state"));
    let log = SegmentLogStore::open(dir.join("log")).unwrap();
    RaftContext::new(
        single_node_config(),
        PeerAddress::new("n1:1"),
        vote_store,
        log,
        ConsensusMetrics::handle(),
    )
    .unwrap()
}

/// Collects commits handed to the data-store surface.
struct Recorder(std::sync::mpsc::Sender<(EditId, Bytes)>);

impl DataStoreListener for Recorder {
    fn on_commit(&mut self, edit: EditId, payload: &Bytes) {
        let _ = self.0.send((edit, payload.clone()));
    }
}

#[test]
fn test_single_node_commits_through_durable_stores() {
    let dir = tempdir().unwrap();
    let (tx, rx) = std::sync::mpsc::channel();
    let mut ctx = open_context(dir.path()).with_listener(Box::new(Recorder(tx)));

    // A single-node quorum elects itself and commits at the local ack.
    ctx.on_event(RaftEvent::ProgressTimeout);
    assert_eq!(ctx.role(), RaftRole::Leader);

    ctx.on_event(RaftEvent::ReplicateEntries(Bytes::from("one")));
    ctx.on_event(RaftEvent::ReplicateEntries(Bytes::from("two")));

    assert_eq!(ctx.committed_edit().index, 2);
    let commits: Vec<_> = rx.try_iter().collect();
    assert_eq!(commits.len(), 2);
    assert_eq!(commits[0].1, Bytes::from("one"));
    assert_eq!(commits[1].1, Bytes::from("two"));
}

#[test]
fn test_hard_state_survives_restart() {
    let dir = tempdir().unwrap();
    let first_term;
    {
        let mut ctx = open_context(dir.path());
        ctx.on_event(RaftEvent::ProgressTimeout);
        ctx.on_event(RaftEvent::ReplicateEntries(Bytes::from("persisted")));
        first_term = ctx.current_term();
        assert_eq!(ctx.log().last_edit().index, 1);
    }

    // A restarted node recovers its term and log position.
    let mut ctx = open_context(dir.path());
    assert_eq!(ctx.role(), RaftRole::Follower);
    assert_eq!(ctx.current_term(), first_term);
    assert_eq!(ctx.log().last_edit(), EditId::new(first_term, 1));

    // A new candidacy moves strictly past the recovered term.
    ctx.on_event(RaftEvent::ProgressTimeout);
    assert!(ctx.current_term() > first_term);
    assert_eq!(ctx.role(), RaftRole::Leader);

    // The log extends, it is not rewritten.
    ctx.on_event(RaftEvent::ReplicateEntries(Bytes::from("more")));
    assert_eq!(ctx.log().last_edit().index, 2);
}

#[test]
fn test_segment_rotation_follows_leadership_terms() {
    let dir = tempdir().unwrap();
    {
        let mut ctx = open_context(dir.path());
        ctx.on_event(RaftEvent::ProgressTimeout);
        ctx.on_event(RaftEvent::ReplicateEntries(Bytes::from("term-one")));
    }
    {
        let mut ctx = open_context(dir.path());
        ctx.on_event(RaftEvent::ProgressTimeout); // New term.
        ctx.on_event(RaftEvent::ReplicateEntries(Bytes::from("term-two")));

        // One sealed segment per finished term plus the active one.
        let summaries = ctx.log().describe().unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].entry_count, 1);
        assert_eq!(summaries[1].entry_count, 1);
        assert!(summaries[0].term < summaries[1].term);
    }
}

#[test]
fn test_truncated_then_reextended_log_recovers_cleanly() {
    let dir = tempdir().unwrap();
    let log_dir = dir.path().join("log");

    {
        let mut log = SegmentLogStore::open(&log_dir).unwrap();
        for i in 1..=5 {
            log.append(EditId::new(Term::new(1), i), Bytes::from(format!("e{i}")))
                .unwrap();
        }
        log.truncate_after(3).unwrap();
        log.append(EditId::new(Term::new(2), 4), Bytes::from("replacement"))
            .unwrap();
        log.sync().unwrap();
    }

    let log = SegmentLogStore::open(&log_dir).unwrap();
    assert_eq!(log.last_edit(), EditId::new(Term::new(2), 4));

    let entries = log.entries_from(1, 10).unwrap();
    assert_eq!(entries.len(), 4);
    assert_eq!(entries[3].1, Bytes::from("replacement"));
}
