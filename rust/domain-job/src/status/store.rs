//! Where status documents are flushed to.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::JobResult;
use crate::record::JobRecord;

use super::job::format_status;

/// Durable storage for per-domain status documents.
///
/// `save_status` is called with the domain lock held, so implementations
/// must not call back into the job controller.
pub trait StatusStore: Send + Sync {
    /// Persists the current state of `record` for the domain `name`.
    fn save_status(&self, name: &str, record: &JobRecord) -> JobResult<()>;

    /// Loads the last document saved for `name`, if any.
    fn load_status(&self, name: &str) -> JobResult<Option<String>>;

    /// Forgets the domain.
    fn remove_status(&self, name: &str) -> JobResult<()>;
}

#[derive(Debug, Default)]
struct StoredStatus {
    document: String,
    flushes: u64,
}

/// In-memory status store for testing and development.
#[derive(Debug, Default)]
pub struct InMemoryStatusStore {
    documents: parking_lot::RwLock<HashMap<String, StoredStatus>>,
}

impl InMemoryStatusStore {
    /// Create a new in-memory status store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of flushes recorded for `name`.
    pub fn flush_count(&self, name: &str) -> u64 {
        self.documents.read().get(name).map_or(0, |s| s.flushes)
    }

    pub fn document(&self, name: &str) -> Option<String> {
        self.documents.read().get(name).map(|s| s.document.clone())
    }

    /// Seeds a document as if it had been written by a previous daemon.
    pub fn insert_document(&self, name: &str, document: impl Into<String>) {
        self.documents.write().insert(
            name.to_string(),
            StoredStatus {
                document: document.into(),
                flushes: 0,
            },
        );
    }
}

impl StatusStore for InMemoryStatusStore {
    fn save_status(&self, name: &str, record: &JobRecord) -> JobResult<()> {
        let document = format_status(name, record)?;
        let mut documents = self.documents.write();
        let stored = documents.entry(name.to_string()).or_default();
        stored.document = document;
        stored.flushes += 1;
        Ok(())
    }

    fn load_status(&self, name: &str) -> JobResult<Option<String>> {
        Ok(self.document(name))
    }

    fn remove_status(&self, name: &str) -> JobResult<()> {
        self.documents.write().remove(name);
        Ok(())
    }
}

/// Status store keeping one `<name>.xml` document per domain in a directory.
///
/// Documents are replaced atomically so a crash never leaves a torn file.
#[derive(Debug, Clone)]
pub struct StatusDirStore {
    base_dir: PathBuf,
}

impl StatusDirStore {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn status_path(&self, name: &str) -> PathBuf {
        self.base_dir.join(format!("{name}.xml"))
    }
}

impl StatusStore for StatusDirStore {
    fn save_status(&self, name: &str, record: &JobRecord) -> JobResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;

        let document = format_status(name, record)?;
        let mut file = tempfile::NamedTempFile::new_in(&self.base_dir)?;
        file.write_all(document.as_bytes())?;
        file.write_all(b"\n")?;
        file.as_file().sync_all()?;
        file.persist(self.status_path(name))
            .map_err(|e| e.error)?;
        Ok(())
    }

    fn load_status(&self, name: &str) -> JobResult<Option<String>> {
        match std::fs::read_to_string(self.status_path(name)) {
            Ok(document) => Ok(Some(document)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn remove_status(&self, name: &str) -> JobResult<()> {
        match std::fs::remove_file(self.status_path(name)) {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }
}
