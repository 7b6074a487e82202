//! Durable on-disk index of sandbox records.
//!
//! The store owns `<home>/.dcsandbox/sandboxes/`, one directory per record
//! holding `config.json`, the bind-mounted `workspace/`, and build
//! artifacts. Record writes are write-to-temp-then-rename; enumeration
//! tolerates partial trees left behind by crashes.

mod record;

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::{
    utils::{RECORD_FILENAME, SANDBOXES_SUBDIR, WORKSPACE_SUBDIR},
    DcsandboxError, DcsandboxResult,
};

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use record::*;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The sandbox record store rooted at a dcsandbox home directory.
#[derive(Debug, Clone)]
pub struct Store {
    sandboxes_dir: PathBuf,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Store {
    /// Creates a store rooted at the given dcsandbox home directory.
    pub fn new(home: impl AsRef<Path>) -> Self {
        Self {
            sandboxes_dir: home.as_ref().join(SANDBOXES_SUBDIR),
        }
    }

    /// Returns the directory owned by the given sandbox id.
    pub fn sandbox_dir(&self, id: &str) -> PathBuf {
        self.sandboxes_dir.join(id)
    }

    /// Returns the workspace directory for the given sandbox id.
    pub fn workspace_dir(&self, id: &str) -> PathBuf {
        self.sandbox_dir(id).join(WORKSPACE_SUBDIR)
    }

    /// Returns the record file path for the given sandbox id.
    pub fn record_path(&self, id: &str) -> PathBuf {
        self.sandbox_dir(id).join(RECORD_FILENAME)
    }

    /// Persists a record atomically, creating the sandbox directory if
    /// needed. The record is written to a sibling temp file and renamed
    /// over `config.json`.
    pub async fn save(&self, record: &SandboxRecord) -> DcsandboxResult<()> {
        let dir = self.sandbox_dir(&record.id);
        fs::create_dir_all(&dir).await?;

        let final_path = dir.join(RECORD_FILENAME);
        let temp_path = dir.join(format!("{}.tmp", RECORD_FILENAME));

        let json = serde_json::to_vec_pretty(record)?;
        fs::write(&temp_path, &json).await?;
        fs::rename(&temp_path, &final_path).await?;

        tracing::trace!(id = %record.id, status = %record.status, "persisted sandbox record");
        Ok(())
    }

    /// Loads the record for the given id.
    pub async fn load(&self, id: &str) -> DcsandboxResult<SandboxRecord> {
        let path = self.record_path(id);
        if !path.exists() {
            return Err(DcsandboxError::SandboxNotFound(id.to_string()));
        }

        let contents = fs::read(&path).await?;
        serde_json::from_slice(&contents).map_err(|e| DcsandboxError::MalformedRecord {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Returns whether a record exists for the given id.
    pub fn contains(&self, id: &str) -> bool {
        self.record_path(id).exists()
    }

    /// Enumerates all records, newest first.
    ///
    /// Directories without a readable `config.json` are skipped with a
    /// warning rather than failing the listing.
    pub async fn list(&self) -> DcsandboxResult<Vec<SandboxRecord>> {
        if !self.sandboxes_dir.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        let mut entries = fs::read_dir(&self.sandboxes_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().to_string();
            match self.load(&id).await {
                Result::Ok(record) => records.push(record),
                Result::Err(e) => {
                    tracing::warn!(id = %id, error = %e, "skipping unreadable sandbox entry");
                }
            }
        }

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    /// Removes the sandbox directory and everything under it.
    pub async fn remove(&self, id: &str) -> DcsandboxResult<()> {
        let dir = self.sandbox_dir(id);
        if dir.exists() {
            fs::remove_dir_all(&dir).await?;
        }
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tempfile::TempDir;

    use super::*;

    fn sample_record(id: &str, name: &str) -> SandboxRecord {
        SandboxRecord {
            id: id.into(),
            name: name.into(),
            status: SandboxStatus::Creating,
            created_at: Utc::now(),
            template: "base".into(),
            git: None,
            mcp: McpSettings {
                enabled: true,
                servers: vec![],
                port: None,
            },
            resources: Resources {
                memory_bytes: 1 << 30,
                cpu_millicores: 1000,
                disk_bytes: 10 << 30,
                timeout_seconds: 7200,
            },
            container_id: None,
        }
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = Store::new(temp.path());

        let record = sample_record("aaaa000001", "one");
        store.save(&record).await.unwrap();

        let loaded = store.load("aaaa000001").await.unwrap();
        assert_eq!(record, loaded);

        // A second save replaces the file, never appends.
        store.save(&record).await.unwrap();
        let reloaded = store.load("aaaa000001").await.unwrap();
        assert_eq!(record, reloaded);
    }

    #[tokio::test]
    async fn test_load_missing_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = Store::new(temp.path());

        let err = store.load("nope").await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_list_is_newest_first_and_skips_partial_trees() {
        let temp = TempDir::new().unwrap();
        let store = Store::new(temp.path());

        let mut first = sample_record("aaaa000001", "one");
        first.created_at = Utc::now() - chrono::Duration::seconds(60);
        store.save(&first).await.unwrap();

        let second = sample_record("bbbb000002", "two");
        store.save(&second).await.unwrap();

        // A directory with no config.json must not break enumeration.
        std::fs::create_dir_all(store.sandbox_dir("cccc000003").join("workspace")).unwrap();

        let records = store.list().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "bbbb000002");
        assert_eq!(records[1].id, "aaaa000001");
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = Store::new(temp.path());

        let record = sample_record("aaaa000001", "one");
        store.save(&record).await.unwrap();

        store.remove("aaaa000001").await.unwrap();
        assert!(!store.contains("aaaa000001"));

        // Removing again is a no-op.
        store.remove("aaaa000001").await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_record_is_reported() {
        let temp = TempDir::new().unwrap();
        let store = Store::new(temp.path());

        let dir = store.sandbox_dir("dddd000004");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(RECORD_FILENAME), b"{not json").unwrap();

        let err = store.load("dddd000004").await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_RECORD");
    }
}
