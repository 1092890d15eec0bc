//! Request journal (§4.4 "Journal", §6 "Persisted state"): a text file
//! holding one decimal action-id per line, one per outstanding action. On
//! submission the id is appended; on any terminal event the file is
//! rewritten with the remaining set. A PID file next to it enforces the
//! "single-process file lock" requirement without pulling in a file-locking
//! crate the source codebase never carried.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{OrchestratorError, Result};

/// Ids left in the journal at startup are reported failed only after this
/// settle delay, giving a fast restart a chance to finish in-flight work
/// that never touched disk (§4.4).
pub const STARTUP_SETTLE_DELAY: std::time::Duration = std::time::Duration::from_secs(2);

pub struct Journal {
    path: PathBuf,
    lock_path: PathBuf,
}

impl Journal {
    /// Open the journal at `path`, taking the advisory PID lock. Fails with
    /// `FrameworkFault` if another process already holds the lock.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let lock_path = lock_path_for(&path);

        if fs::metadata(&lock_path).await.is_ok() {
            return Err(OrchestratorError::FrameworkFault(format!(
                "journal lock already held: {}",
                lock_path.display()
            )));
        }

        let pid = std::process::id();
        let mut lock_file = fs::File::create(&lock_path).await?;
        lock_file.write_all(pid.to_string().as_bytes()).await?;
        lock_file.flush().await?;

        if fs::metadata(&path).await.is_err() {
            fs::File::create(&path).await?;
        }

        Ok(Self { path, lock_path })
    }

    /// Ids currently in the journal, i.e. unfinished (§3 invariant: "a given
    /// action-id appears in the journal file iff it is unfinished").
    pub async fn outstanding(&self) -> Result<Vec<u64>> {
        let contents = fs::read_to_string(&self.path).await.unwrap_or_default();
        Ok(contents
            .lines()
            .filter_map(|line| line.trim().parse::<u64>().ok())
            .collect())
    }

    pub async fn record(&self, id: u64) -> Result<()> {
        let mut ids: BTreeSet<u64> = self.outstanding().await?.into_iter().collect();
        ids.insert(id);
        self.rewrite(&ids).await
    }

    /// Remove `ids` from the journal (terminal event: success, fail,
    /// cancel, or expire).
    pub async fn clear(&self, ids: &[u64]) -> Result<()> {
        let mut current: BTreeSet<u64> = self.outstanding().await?.into_iter().collect();
        for id in ids {
            current.remove(id);
        }
        self.rewrite(&current).await
    }

    async fn rewrite(&self, ids: &BTreeSet<u64>) -> Result<()> {
        let text = ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join("\n");
        fs::write(&self.path, text).await?;
        Ok(())
    }

    /// Release the advisory lock on clean shutdown.
    pub async fn release(self) -> Result<()> {
        let _ = fs::remove_file(&self.lock_path).await;
        Ok(())
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut lock = path.as_os_str().to_owned();
    lock.push(".lock");
    PathBuf::from(lock)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("corvid-journal-test-{}-{}", std::process::id(), name))
    }

    #[tokio::test]
    async fn record_then_clear_round_trips() {
        let path = temp_path("round-trip");
        let _ = fs::remove_file(&path).await;
        let _ = fs::remove_file(lock_path_for(&path)).await;

        let journal = Journal::open(&path).await.unwrap();
        journal.record(1).await.unwrap();
        journal.record(2).await.unwrap();
        assert_eq!(journal.outstanding().await.unwrap(), vec![1, 2]);

        journal.clear(&[1]).await.unwrap();
        assert_eq!(journal.outstanding().await.unwrap(), vec![2]);

        journal.release().await.unwrap();
        let _ = fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn second_open_while_locked_fails() {
        let path = temp_path("locked");
        let _ = fs::remove_file(&path).await;
        let _ = fs::remove_file(lock_path_for(&path)).await;

        let journal = Journal::open(&path).await.unwrap();
        let second = Journal::open(&path).await;
        assert!(second.is_err());

        journal.release().await.unwrap();
        let _ = fs::remove_file(&path).await;
    }
}
