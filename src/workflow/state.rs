//! Fingerprint Persistence
//!
//! Records, per output file, which rule produced it, the hash of that
//! rule's action and the inputs it was built from. The staleness oracle
//! compares these records with the current rules to detect changes to the
//! workflow itself.
//!
//! Records are saved to `.rulerunner/fingerprints.json` in the working
//! directory after every finished job. A failed job leaves its outputs
//! marked incomplete until a later run of the job succeeds.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::dag::Job;
use crate::error::{BuildError, Result};

/// Directory holding engine metadata, relative to the working directory.
pub const STATE_DIR: &str = ".rulerunner";

const STORE_FILE: &str = "fingerprints.json";

/// What was recorded when an output was last produced.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FingerprintRecord {
    /// Rule that produced the output
    pub rule: String,
    /// Hash of the rule's action at that time
    pub code_hash: String,
    /// Inputs the job consumed
    pub inputs: Vec<String>,
    /// When the job finished
    pub recorded_at: DateTime<Utc>,
    /// Set when the producing job failed
    #[serde(default)]
    pub incomplete: bool,
}

/// Persistent map of output path to [`FingerprintRecord`].
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct FingerprintStore {
    #[serde(skip)]
    path: PathBuf,
    records: BTreeMap<String, FingerprintRecord>,
}

impl FingerprintStore {
    /// Creates an empty store that will save under `working_dir`.
    pub fn new(working_dir: &Path) -> Self {
        Self {
            path: Self::store_path_for(working_dir),
            records: BTreeMap::new(),
        }
    }

    /// Loads the store for `working_dir`.
    ///
    /// A missing file yields an empty store. An unreadable or corrupt file is
    /// reported and replaced by an empty store, which makes every record-based
    /// check pass until outputs are rebuilt.
    pub fn open(working_dir: &Path) -> Self {
        let path = Self::store_path_for(working_dir);
        if !path.exists() {
            debug!("No fingerprint store at {}", path.display());
            return Self::new(working_dir);
        }

        let loaded = fs::read_to_string(&path)
            .map_err(|e| BuildError::io(&path, e))
            .and_then(|content| serde_json::from_str::<FingerprintStore>(&content).map_err(BuildError::from));

        match loaded {
            Ok(mut store) => {
                store.path = path;
                info!(
                    "Loaded {} fingerprints from {}",
                    store.records.len(),
                    store.path.display()
                );
                store
            }
            Err(e) => {
                warn!("Ignoring unreadable fingerprint store: {}", e);
                Self::new(working_dir)
            }
        }
    }

    /// Writes the store to disk.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&self.path, json).map_err(|e| BuildError::io(&self.path, e))?;
        debug!("Saved fingerprint store to {}", self.path.display());
        Ok(())
    }

    /// Records every output of a job that just succeeded.
    pub fn record(&mut self, job: &Job) {
        self.insert(job, false);
    }

    /// Records every output of a job that just failed. Whatever is left of
    /// those outputs on disk must not be trusted by the next build.
    pub fn mark_incomplete(&mut self, job: &Job) {
        self.insert(job, true);
    }

    fn insert(&mut self, job: &Job, incomplete: bool) {
        let now = Utc::now();
        for output in &job.outputs {
            self.records.insert(
                output.clone(),
                FingerprintRecord {
                    rule: job.rule.clone(),
                    code_hash: job.code_hash.clone(),
                    inputs: job.inputs.clone(),
                    recorded_at: now,
                    incomplete,
                },
            );
        }
    }

    pub fn get(&self, output: &str) -> Option<&FingerprintRecord> {
        self.records.get(output)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn store_path_for(working_dir: &Path) -> PathBuf {
        working_dir.join(STATE_DIR).join(STORE_FILE)
    }
}
