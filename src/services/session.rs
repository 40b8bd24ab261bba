use crate::models::MergeOutcome;
use crate::services::reducer::Accumulator;
use crate::services::stager::StagedFile;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use tempfile::{TempDir, TempPath};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Prefix of every session work directory under the staging root
pub const SESSION_DIR_PREFIX: &str = "session-";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session {0} not found")]
    NotFound(Uuid),

    #[error("session {0} is busy with another operation")]
    Busy(Uuid),

    #[error("could not create session directory: {0}")]
    Io(#[from] std::io::Error),
}

/// A file produced by finalisation, downloadable by name
#[derive(Debug)]
pub struct Artifact {
    pub name: String,
    pub path: TempPath,
    pub size: u64,
    pub content_type: mime::Mime,
}

/// All state of one merge job. Dropping it removes its work directory.
#[derive(Debug)]
pub struct MergeSession {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub staged: VecDeque<StagedFile>,
    pub accumulator: Option<Accumulator>,
    pub artifacts: Vec<Artifact>,
    pub outcome: Option<MergeOutcome>,
    /// Uploads are numbered from 1; 0 marks intermediate results
    next_sequence: u64,
    // Declared last so the files above are removed before their directory
    workdir: TempDir,
}

impl MergeSession {
    pub fn create(root: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(root)?;
        let workdir = tempfile::Builder::new()
            .prefix(SESSION_DIR_PREFIX)
            .tempdir_in(root)?;

        Ok(Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            staged: VecDeque::new(),
            accumulator: None,
            artifacts: Vec::new(),
            outcome: None,
            next_sequence: 1,
            workdir,
        })
    }

    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }

    pub fn next_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    /// Removes one staged file and its bytes on disk.
    pub fn remove_staged(&mut self, file_id: Uuid) -> Option<StagedFile> {
        let index = self.staged.iter().position(|f| f.id == file_id)?;
        self.staged.remove(index)
    }

    /// Display names of staged files that keep the merge disabled
    pub fn blocking_names(&self) -> Vec<String> {
        self.staged
            .iter()
            .filter(|f| f.inspection.is_blocking())
            .map(|f| f.display_name.clone())
            .collect()
    }

    pub fn artifact(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.name == name)
    }

    /// Drops the previous outcome before a new finalisation
    pub fn clear_outcome(&mut self) {
        self.artifacts.clear();
        self.outcome = None;
    }

    pub fn staged_bytes(&self) -> u64 {
        self.staged.iter().map(|f| f.size).sum()
    }
}

/// Live sessions by id
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<Uuid, Arc<Mutex<MergeSession>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, root: &Path) -> Result<Uuid, SessionError> {
        let session = MergeSession::create(root)?;
        let id = session.id;
        tracing::info!(
            "🗂️  Session {} created at {}",
            id,
            session.workdir().display()
        );
        self.sessions.insert(id, Arc::new(Mutex::new(session)));
        Ok(id)
    }

    /// Locks a session for one operation. A second operation arriving while
    /// the first still runs gets [`SessionError::Busy`] instead of waiting.
    pub fn acquire(&self, id: Uuid) -> Result<OwnedMutexGuard<MergeSession>, SessionError> {
        let session = self
            .sessions
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(SessionError::NotFound(id))?;
        session.try_lock_owned().map_err(|_| SessionError::Busy(id))
    }

    /// Forgets a session. Its files go away once the last lock holder is done.
    pub fn remove(&self, id: Uuid) -> Result<(), SessionError> {
        // Refuse while an operation is running on it
        drop(self.acquire(id)?);
        self.sessions
            .remove(&id)
            .map(|_| ())
            .ok_or(SessionError::NotFound(id))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
