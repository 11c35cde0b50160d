//! Resume helpers for long-running ingestion jobs.
//!
//! Kept and adapted from the teacher's URL-keyed tracker: the key is now a
//! document source URI rather than a crawled page URL, everything else
//! (JSON-persisted `HashSet`, load/contains/mark_processed) is unchanged.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio::sync::Mutex;

use crate::error::PkeResult;

/// Tracks which document source URIs have already been processed so
/// ingest jobs can resume after a crash.
#[derive(Clone, Debug)]
pub struct ResumeTracker {
    path: PathBuf,
    state: Arc<Mutex<HashSet<String>>>,
}

impl ResumeTracker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads previously persisted state, if any.
    pub async fn load(&self) -> PkeResult<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let data = fs::read_to_string(&self.path).await?;
        let uris: Vec<String> = serde_json::from_str(&data)?;
        let mut guard = self.state.lock().await;
        guard.clear();
        guard.extend(uris);
        Ok(())
    }

    /// Returns `true` if the given document source URI has already been
    /// processed.
    pub async fn contains(&self, source_uri: &str) -> bool {
        let guard = self.state.lock().await;
        guard.contains(source_uri)
    }

    /// Marks a document source URI as processed and persists the updated
    /// state.
    pub async fn mark_processed(&self, source_uri: &str) -> PkeResult<()> {
        let mut guard = self.state.lock().await;
        let inserted = guard.insert(source_uri.to_string());
        if !inserted && self.path.exists() {
            return Ok(());
        }
        let uris: Vec<String> = guard.iter().cloned().collect();
        drop(guard);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let serialized = serde_json::to_string(&uris)?;
        fs::write(&self.path, serialized).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn tracker_persists_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let tracker = ResumeTracker::new(&path);
        tracker.load().await.unwrap();

        let source = "s3://brochures/civic-2026.md";
        assert!(!tracker.contains(source).await);

        tracker.mark_processed(source).await.unwrap();
        assert!(tracker.contains(source).await);

        let tracker_two = ResumeTracker::new(&path);
        tracker_two.load().await.unwrap();
        assert!(tracker_two.contains(source).await);
    }
}
