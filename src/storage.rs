//! On-disk state: the browser session blob and the last task's history.

use std::fs::OpenOptions;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StorageError;
use crate::history::HistoryEntry;
use crate::types::Task;

pub const SESSION_FILE: &str = "session.bin";
pub const HISTORY_FILE: &str = "history.json";

/// The last task together with everything it recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedTask {
    pub task: Task,
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store the opaque session blob exactly as the browser produced it.
    pub fn save_session(&self, blob: &[u8]) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.dir.join(SESSION_FILE), blob)?;
        debug!(bytes = blob.len(), "session state saved");
        Ok(())
    }

    pub fn load_session(&self) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.dir.join(SESSION_FILE);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read(path)?))
    }

    pub fn save_task(&self, saved: &SavedTask) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.dir)?;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.dir.join(HISTORY_FILE))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, saved)?;
        writer.flush()?;
        debug!(entries = saved.history.len(), "history saved");
        Ok(())
    }

    pub fn load_task(&self) -> Result<Option<SavedTask>, StorageError> {
        let path = self.dir.join(HISTORY_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let file = std::fs::File::open(path)?;
        let saved = serde_json::from_reader(BufReader::new(file))?;
        Ok(Some(saved))
    }
}
