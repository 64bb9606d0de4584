//! Whole-document persistence for the state file.
//!
//! Every mutation is a read-modify-write of the full document, persisted via
//! an atomic rewrite (temp file + rename). No cross-process locking; a single
//! orchestrating process is assumed.

use std::path::{Path, PathBuf};

use thiserror::Error;

use super::schema::{JobRecord, StateDoc};

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Failed to read state file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write state file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse state document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unknown job id: {0}")]
    UnknownJob(String),
}

#[derive(Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// A missing file on first read yields an empty document, never an error.
    pub fn load(&self) -> Result<StateDoc, StateError> {
        if !self.path.is_file() {
            return Ok(StateDoc::default());
        }
        let content = std::fs::read_to_string(&self.path).map_err(|e| StateError::ReadFile {
            path: self.path.clone(),
            source: e,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Atomic rewrite: write a sibling temp file, then rename over the target.
    pub fn save(&self, doc: &StateDoc) -> Result<(), StateError> {
        let write_err = |e| StateError::WriteFile {
            path: self.path.clone(),
            source: e,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }

        let content = serde_json::to_string_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(write_err)?;
        std::fs::rename(&tmp, &self.path).map_err(write_err)
    }

    /// Loads the document, applies `f`, and saves before returning.
    pub fn mutate<T>(&self, f: impl FnOnce(&mut StateDoc) -> T) -> Result<T, StateError> {
        let mut doc = self.load()?;
        let out = f(&mut doc);
        self.save(&doc)?;
        Ok(out)
    }

    /// Read-modify-write of a single existing job record.
    pub fn update_job(
        &self,
        job_id: &str,
        f: impl FnOnce(&mut JobRecord),
    ) -> Result<(), StateError> {
        let mut doc = self.load()?;
        let job = doc
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StateError::UnknownJob(job_id.to_string()))?;
        f(job);
        self.save(&doc)
    }

    /// Clears the user's running marker. Called on every job exit path.
    pub fn clear_running_marker(&self, user_id: &str) -> Result<(), StateError> {
        self.mutate(|doc| {
            doc.user_mut(user_id).running_job = None;
        })
    }
}
