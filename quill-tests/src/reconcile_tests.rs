//! End-to-end reconciliation over on-disk segment stores.

use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use quill_core::{EditId, PeerAddress, QuorumId, Term};
use quill_log::LogFileInfo;
use quill_raft::{
    FetchError, LogExport, LogStore, PeerLogClient, RemoteLogFetcher, SegmentLogStore,
};
use tempfile::tempdir;

/// Serves one on-disk store's sealed segments as a peer would.
struct StoreClient {
    store: Mutex<SegmentLogStore>,
    committed_index: u64,
}

#[async_trait]
impl PeerLogClient for StoreClient {
    async fn committed_log_status(
        &self,
        _peer: &PeerAddress,
        _quorum: QuorumId,
        min_index: u64,
    ) -> Result<Vec<LogFileInfo>, FetchError> {
        Ok(self
            .store
            .lock()
            .unwrap()
            .advertise(min_index, self.committed_index))
    }

    async fn fetch_log_file(
        &self,
        peer: &PeerAddress,
        _quorum: QuorumId,
        name: &str,
    ) -> Result<Bytes, FetchError> {
        self.store
            .lock()
            .unwrap()
            .read_segment(name)
            .ok_or_else(|| FetchError::PeerUnavailable {
                peer: peer.clone(),
                message: format!("no such segment {name}"),
            })
    }
}

/// Builds a source store with sealed history:
/// indexes 1..=10 at term 1, 11..=15 at term 2, and an active tail at
/// term 3 that must never be offered to peers.
fn populated_store(path: &std::path::Path) -> SegmentLogStore {
    let mut store = SegmentLogStore::open(path).unwrap();
    for i in 1..=10 {
        store
            .append(EditId::new(Term::new(1), i), Bytes::from(format!("edit-{i}")))
            .unwrap();
    }
    for i in 11..=15 {
        store
            .append(EditId::new(Term::new(2), i), Bytes::from(format!("edit-{i}")))
            .unwrap();
    }
    store
        .append(EditId::new(Term::new(3), 16), Bytes::from("uncommitted"))
        .unwrap();
    store.sync().unwrap();
    store
}

#[tokio::test]
async fn test_fresh_replica_repairs_from_peer() {
    let source_dir = tempdir().unwrap();
    let client = StoreClient {
        store: Mutex::new(populated_store(source_dir.path())),
        committed_index: 15,
    };

    let target_dir = tempdir().unwrap();
    let mut target = SegmentLogStore::open(target_dir.path()).unwrap();

    let peers = vec![PeerAddress::new("n1:1")];
    let mut fetcher = RemoteLogFetcher::new(QuorumId::new(1), peers, &client, &mut target);
    let report = fetcher.reconcile(0).await.unwrap();

    assert_eq!(report.files_fetched, 2);
    assert_eq!(report.entries_applied, 15);

    // The committed history was copied with terms intact; the source's
    // active tail was not.
    assert_eq!(target.last_edit(), EditId::new(Term::new(2), 15));
    assert_eq!(target.term_at(10), Some(Term::new(1)));
    assert_eq!(target.term_at(11), Some(Term::new(2)));

    let entries = target.entries_from(1, 100).unwrap();
    assert_eq!(entries.len(), 15);
    assert_eq!(entries[0].1, Bytes::from("edit-1"));
    assert_eq!(entries[14].1, Bytes::from("edit-15"));
}

#[tokio::test]
async fn test_partially_caught_up_replica_fetches_the_difference() {
    let source_dir = tempdir().unwrap();
    let client = StoreClient {
        store: Mutex::new(populated_store(source_dir.path())),
        committed_index: 15,
    };

    // The replica already holds the first eight entries.
    let target_dir = tempdir().unwrap();
    let mut target = SegmentLogStore::open(target_dir.path()).unwrap();
    for i in 1..=8 {
        target
            .append(EditId::new(Term::new(1), i), Bytes::from(format!("edit-{i}")))
            .unwrap();
    }
    target.sync().unwrap();

    let peers = vec![PeerAddress::new("n1:1")];
    let mut fetcher = RemoteLogFetcher::new(QuorumId::new(1), peers, &client, &mut target);
    let report = fetcher.reconcile(8).await.unwrap();

    // Both files are transferred (the first overlaps), but only the
    // missing entries are applied.
    assert_eq!(report.entries_applied, 7);
    assert_eq!(target.last_edit(), EditId::new(Term::new(2), 15));
}

#[tokio::test]
async fn test_repeated_reconciliation_is_idempotent() {
    let source_dir = tempdir().unwrap();
    let client = StoreClient {
        store: Mutex::new(populated_store(source_dir.path())),
        committed_index: 15,
    };

    let target_dir = tempdir().unwrap();
    let mut target = SegmentLogStore::open(target_dir.path()).unwrap();

    let peers = vec![PeerAddress::new("n1:1")];
    let mut fetcher = RemoteLogFetcher::new(QuorumId::new(1), peers.clone(), &client, &mut target);
    fetcher.reconcile(0).await.unwrap();

    let mut fetcher = RemoteLogFetcher::new(QuorumId::new(1), peers, &client, &mut target);
    let second = fetcher.reconcile(15).await.unwrap();

    assert_eq!(second.files_fetched, 0);
    assert_eq!(second.entries_applied, 0);
    assert_eq!(target.last_edit(), EditId::new(Term::new(2), 15));
}
