//! Shared state passed to every strategy transition (§9 "shared state
//! lives in a context value").

use std::sync::Arc;
use std::time::Instant;

use crate::ids::{AccountId, FolderId};
use crate::protocol::ProtocolConnection;
use crate::store::MailStore;

/// Default batch size for `selectNextMessageSequence` (§4.3 "Message-list
/// selection"): the number of UIDs folded into one `UID FETCH` command
/// before a fresh round-trip is started.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Message-list selection: UIDs partitioned by folder, walked in folder
/// insertion order and UID-ascending order within each folder (§4.3).
#[derive(Debug, Clone, Default)]
pub struct SelectionCursor {
    folders: Vec<(FolderId, Vec<u32>)>,
    folder_index: usize,
    uid_index: usize,
}

impl SelectionCursor {
    pub fn new(mut folders: Vec<(FolderId, Vec<u32>)>) -> Self {
        for (_, uids) in &mut folders {
            uids.sort_unstable();
        }
        Self {
            folders,
            folder_index: 0,
            uid_index: 0,
        }
    }

    pub fn is_done(&self) -> bool {
        self.folder_index >= self.folders.len()
    }

    pub fn current_folder(&self) -> Option<&FolderId> {
        self.folders.get(self.folder_index).map(|(f, _)| f)
    }

    /// Pull up to `max` UIDs from the current folder. Never mixes UIDs
    /// across folders in one batch — when the current folder is
    /// exhausted, advances to the next and returns `None` for this call so
    /// the caller can SELECT the new folder before fetching.
    pub fn next_batch(&mut self, max: usize) -> Option<(FolderId, Vec<u32>)> {
        loop {
            let (folder, uids) = self.folders.get(self.folder_index)?;
            if self.uid_index >= uids.len() {
                self.folder_index += 1;
                self.uid_index = 0;
                continue;
            }
            let end = (self.uid_index + max).min(uids.len());
            let batch = uids[self.uid_index..end].to_vec();
            self.uid_index = end;
            let folder = folder.clone();
            if self.uid_index >= uids.len() {
                self.folder_index += 1;
                self.uid_index = 0;
            }
            return Some((folder, batch));
        }
    }
}

/// Per-UID retrieval progress record (§4.3.1): indicative size, observed
/// byte size so far, and a monotonic percent-done.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetrievalProgress {
    pub indicative_size: u64,
    pub byte_size: u64,
    pub percent_done: f64,
}

pub struct StrategyContext {
    pub store: Arc<dyn MailStore>,
    pub connection: ProtocolConnection,
    pub account: AccountId,
    /// Gates whether messages are fetched whole or previewed (§4.3
    /// "Retrieval budget").
    pub header_limit: u64,
    pub batch_size: usize,
    pub progress_retrieval_size: u64,
    pub total_retrieval_size: u64,
    last_progress: Instant,
}

impl StrategyContext {
    pub fn new(store: Arc<dyn MailStore>, connection: ProtocolConnection, account: AccountId) -> Self {
        Self {
            store,
            connection,
            account,
            header_limit: 4096,
            batch_size: DEFAULT_BATCH_SIZE,
            progress_retrieval_size: 0,
            total_retrieval_size: 0,
            last_progress: Instant::now(),
        }
    }

    /// Called on every transition, progress, status, or completion event
    /// so the orchestrator's expiry timer (§4.4) can observe liveness.
    pub fn touch(&mut self) {
        self.last_progress = Instant::now();
    }

    pub fn last_progress_at(&self) -> Instant {
        self.last_progress
    }

    pub fn bump_progress(&mut self, delta: u64) {
        self.progress_retrieval_size += delta;
        self.touch();
    }
}
