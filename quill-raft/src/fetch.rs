//! Peer log reconciliation.
//!
//! A replica that is missing committed log segments repairs itself before
//! rejoining replication: it asks every peer for an inventory of committed
//! segments past its own committed index, merges the inventories into a
//! fetch plan, and downloads and splices the missing segments strictly in
//! index order. Only already-committed, already-replicated segments are
//! ever copied, so reconciliation introduces no new commitment risk; its
//! correctness obligations are ordering and no double application.

use std::collections::HashSet;

use async_trait::async_trait;
use bytes::Bytes;
use quill_core::{EditId, PeerAddress, QuorumId};
use quill_log::{LogError, LogFileInfo, LogReader};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::storage::{LogStore, StorageError};

/// Errors from reconciliation.
#[derive(Debug, Error)]
pub enum FetchError {
    /// A peer could not be queried or did not deliver a file.
    #[error("peer {peer} unavailable: {message}")]
    PeerUnavailable {
        /// The unreachable peer.
        peer: PeerAddress,
        /// Description of the failure.
        message: String,
    },

    /// A downloaded segment does not match its advertisement.
    #[error("segment {name} does not match its advertisement")]
    SegmentMismatch {
        /// The offending segment's name.
        name: String,
    },

    /// A segment would apply entries out of order.
    #[error("segment entries out of order: got {index}, expected {expected}")]
    OutOfOrder {
        /// The first out-of-order index.
        index: u64,
        /// The index the local log needed next.
        expected: u64,
    },

    /// An index is missing locally and no reachable peer offers it.
    #[error("no reachable source for index {index}")]
    NoSource {
        /// The index that could not be sourced.
        index: u64,
    },

    /// A downloaded segment failed validation.
    #[error(transparent)]
    Log(#[from] LogError),

    /// The local log rejected a splice.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// One unit of fetch work: an ordered list of files from one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTask {
    /// The peer to download from.
    pub peer: PeerAddress,
    /// Files to download, in index order.
    pub files: Vec<LogFileInfo>,
}

/// Remote access to peers' committed logs.
#[async_trait]
pub trait PeerLogClient: Send + Sync {
    /// Asks `peer` for its committed segments with entries past
    /// `min_index`.
    async fn committed_log_status(
        &self,
        peer: &PeerAddress,
        quorum: QuorumId,
        min_index: u64,
    ) -> Result<Vec<LogFileInfo>, FetchError>;

    /// Downloads one advertised segment from `peer` by name.
    async fn fetch_log_file(
        &self,
        peer: &PeerAddress,
        quorum: QuorumId,
        name: &str,
    ) -> Result<Bytes, FetchError>;
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FetchReport {
    /// Segments downloaded and applied.
    pub files_fetched: usize,
    /// Entries appended to the local log.
    pub entries_applied: u64,
}

/// Builds the fetch plan from per-peer inventories.
///
/// For each missing index range the source offering the longest
/// contiguous run is selected, minimizing request count; consecutive
/// selections from the same peer coalesce into one task. Peers whose
/// inventories do not cover the next needed index are skipped for that
/// range.
#[must_use]
pub fn build_fetch_plan(
    inventories: &[(PeerAddress, Vec<LogFileInfo>)],
    local_last_index: u64,
) -> Vec<FetchTask> {
    let mut tasks: Vec<FetchTask> = Vec::new();
    let mut next = local_last_index + 1;

    loop {
        let mut best: Option<(&PeerAddress, Vec<LogFileInfo>, u64)> = None;

        for (peer, files) in inventories {
            let Some((run_files, run_end)) = contiguous_run(files, next) else {
                continue;
            };
            let better = best.as_ref().is_none_or(|(_, _, end)| run_end > *end);
            if better {
                best = Some((peer, run_files, run_end));
            }
        }

        let Some((peer, files, run_end)) = best else {
            break;
        };
        debug!(peer = %peer, next, run_end, "selected reconciliation source");

        match tasks.last_mut() {
            Some(task) if task.peer == *peer => task.files.extend(files),
            _ => tasks.push(FetchTask {
                peer: peer.clone(),
                files,
            }),
        }
        next = run_end + 1;
    }

    tasks
}

/// The longest contiguous run of files covering `next`, if any.
fn contiguous_run(files: &[LogFileInfo], next: u64) -> Option<(Vec<LogFileInfo>, u64)> {
    let mut sorted: Vec<&LogFileInfo> = files.iter().collect();
    sorted.sort_by_key(|f| f.first_index);

    let start = sorted.iter().position(|f| f.contains(next))?;
    let mut run = vec![sorted[start].clone()];
    let mut end = sorted[start].last_index;

    for file in &sorted[start + 1..] {
        if file.first_index == end + 1 {
            run.push((*file).clone());
            end = file.last_index;
        } else if file.first_index > end + 1 {
            break;
        }
    }
    Some((run, end))
}

/// Repairs the local log by fetching committed segments from peers.
pub struct RemoteLogFetcher<'a, C: PeerLogClient, L: LogStore> {
    quorum: QuorumId,
    peers: Vec<PeerAddress>,
    client: &'a C,
    log: &'a mut L,
}

impl<'a, C: PeerLogClient, L: LogStore> RemoteLogFetcher<'a, C, L> {
    /// Creates a fetcher for one quorum.
    pub fn new(
        quorum: QuorumId,
        peers: Vec<PeerAddress>,
        client: &'a C,
        log: &'a mut L,
    ) -> Self {
        Self {
            quorum,
            peers,
            client,
            log,
        }
    }

    /// Runs one reconciliation pass.
    ///
    /// Queries every peer for committed segments past `committed_index`,
    /// then downloads and splices until the local log covers everything
    /// any reachable peer advertised. A peer that fails mid-plan is
    /// excluded and the plan rebuilt against the remaining inventories.
    ///
    /// # Errors
    /// Returns `NoSource` if an advertised index could not be fetched from
    /// any peer; the pass can simply be retried later. Storage errors
    /// surface as-is.
    pub async fn reconcile(&mut self, committed_index: u64) -> Result<FetchReport, FetchError> {
        let mut inventories: Vec<(PeerAddress, Vec<LogFileInfo>)> = Vec::new();
        for peer in self.peers.clone() {
            match self
                .client
                .committed_log_status(&peer, self.quorum, committed_index)
                .await
            {
                Ok(files) if !files.is_empty() => inventories.push((peer, files)),
                Ok(_) => {}
                Err(err) => {
                    warn!(peer = %peer, error = %err, "inventory query failed; skipping peer");
                }
            }
        }

        let target = inventories
            .iter()
            .flat_map(|(_, files)| files.iter().map(|f| f.last_index))
            .max()
            .unwrap_or(0);

        let mut report = FetchReport::default();
        let mut excluded: HashSet<PeerAddress> = HashSet::new();

        loop {
            let progress = self.log.last_edit().index;
            if progress >= target {
                break;
            }

            let live: Vec<(PeerAddress, Vec<LogFileInfo>)> = inventories
                .iter()
                .filter(|(peer, _)| !excluded.contains(peer))
                .cloned()
                .collect();
            let plan = build_fetch_plan(&live, progress);
            let Some(task) = plan.into_iter().next() else {
                // Some advertised range has no remaining source.
                self.log.sync()?;
                return Err(FetchError::NoSource { index: progress + 1 });
            };

            match self.execute_task(&task).await {
                Ok((files, entries)) => {
                    report.files_fetched += files;
                    report.entries_applied += entries;
                }
                Err(FetchError::PeerUnavailable { peer, message }) => {
                    warn!(peer = %peer, message = %message, "fetch failed; trying an alternate source");
                    excluded.insert(peer);
                }
                Err(FetchError::SegmentMismatch { name }) => {
                    warn!(peer = %task.peer, name = %name, "invalid segment; trying an alternate source");
                    excluded.insert(task.peer);
                }
                Err(err) => return Err(err),
            }
        }

        self.log.sync()?;
        info!(
            quorum = %self.quorum,
            files = report.files_fetched,
            entries = report.entries_applied,
            "reconciliation pass finished"
        );
        Ok(report)
    }

    /// Downloads and applies one task's files in order.
    async fn execute_task(&mut self, task: &FetchTask) -> Result<(usize, u64), FetchError> {
        let mut files_fetched = 0;
        let mut entries_applied = 0;

        for info in &task.files {
            let data = self
                .client
                .fetch_log_file(&task.peer, self.quorum, &info.name)
                .await?;
            entries_applied += self.apply_segment(info, data)?;
            files_fetched += 1;
        }
        Ok((files_fetched, entries_applied))
    }

    /// Validates downloaded bytes against the advertisement and splices
    /// the entries the local log is missing.
    fn apply_segment(&mut self, info: &LogFileInfo, data: Bytes) -> Result<u64, FetchError> {
        let parsed = LogReader::parse(data)?;
        let matches = parsed.header.term == info.term
            && parsed.header.start_index == info.first_index
            && parsed.last_index() == Some(info.last_index);
        if !matches {
            return Err(FetchError::SegmentMismatch {
                name: info.name.clone(),
            });
        }

        let mut local_last = self.log.last_edit().index;
        let mut applied = 0;
        for record in parsed.entries {
            if record.index <= local_last {
                continue; // Overlap with entries we already hold.
            }
            if record.index != local_last + 1 {
                return Err(FetchError::OutOfOrder {
                    index: record.index,
                    expected: local_last + 1,
                });
            }
            self.log
                .append(EditId::new(info.term, record.index), record.payload)?;
            local_last = record.index;
            applied += 1;
        }
        Ok(applied)
    }
}
