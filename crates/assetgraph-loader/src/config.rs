//! Loader configuration, read from JSON. Every field has a default so a
//! config file only needs the settings that differ.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{LoaderError, Result};

// ============================================================================
// Pipeline
// ============================================================================

pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 5_000;

/// Settings for the mutation pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Tasks submitting batches to the store
    pub workers: usize,
    /// Batches buffered between producers and workers
    pub channel_capacity: usize,
    /// Failed batches buffered before the retry handler picks them up
    pub retry_capacity: usize,
    /// Retries waiting for room on the main channel at once
    pub max_concurrent_retries: usize,
    /// First retry delay; doubles per failed attempt
    pub retry_backoff_ms: u64,
    pub max_retry_backoff_ms: u64,
    /// Upper bound on the wait for in-flight batches once producers are
    /// finished; done fires when it elapses. `null` waits until the pipeline
    /// is idle, which never happens while a batch keeps failing.
    pub drain_timeout_ms: Option<u64>,
    /// JSON-lines file receiving batches that were never applied
    pub dead_letter_file: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            channel_capacity: 64,
            retry_capacity: 64,
            max_concurrent_retries: 16,
            retry_backoff_ms: 100,
            max_retry_backoff_ms: 10_000,
            drain_timeout_ms: Some(DEFAULT_DRAIN_TIMEOUT_MS),
            dead_letter_file: None,
        }
    }
}

impl PipelineConfig {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(32);
        let ms = self
            .retry_backoff_ms
            .saturating_mul(factor)
            .min(self.max_retry_backoff_ms);
        Duration::from_millis(ms)
    }

    pub fn drain_timeout(&self) -> Option<Duration> {
        self.drain_timeout_ms.map(Duration::from_millis)
    }
}

// ============================================================================
// Loader
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdMapKind {
    #[default]
    Memory,
    /// Append-only log under `id_map_dir`, reused across runs
    Persistent,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataFiles {
    /// Equipment files, relative to `scope_skeleton`
    pub equip_files: Vec<String>,
}

/// Configuration for one loader run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub drop_schema: bool,
    pub create_schema: bool,
    pub load_metadata: bool,
    pub load_default_equipment_types: bool,
    pub load_equipments: bool,
    pub load_static_data: bool,

    /// Triples per batch before it is handed to the pipeline
    pub batch_size: usize,
    /// Re-assert `type_name` and primary key triples for known nodes
    pub ignore_new: bool,
    pub id_map: IdMapKind,
    pub id_map_dir: PathBuf,

    /// Persisted loader tree
    pub state_file: PathBuf,
    /// Root holding `<scope>/<version>/<file>`
    pub master_dir: PathBuf,
    /// Directory with the reference equipment files used for metadata
    pub scope_skeleton: PathBuf,
    pub scopes: Vec<String>,

    pub product_files: Vec<String>,
    pub app_files: Vec<String>,
    pub inst_files: Vec<String>,
    pub acq_rights_files: Vec<String>,
    pub users_files: Vec<String>,
    pub equipment_files: Vec<String>,
    pub metadata_files: MetadataFiles,

    /// Schema definitions applied by `create_schema`
    pub schema_files: Vec<PathBuf>,
    /// Type definitions applied after the schema files
    pub type_files: Vec<PathBuf>,

    pub pipeline: PipelineConfig,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            drop_schema: false,
            create_schema: false,
            load_metadata: false,
            load_default_equipment_types: false,
            load_equipments: false,
            load_static_data: false,
            batch_size: 1000,
            ignore_new: false,
            id_map: IdMapKind::Memory,
            id_map_dir: PathBuf::from("idmap"),
            state_file: PathBuf::from("state.json"),
            master_dir: PathBuf::from("data"),
            scope_skeleton: PathBuf::from("skeletonscope"),
            scopes: Vec::new(),
            product_files: Vec::new(),
            app_files: Vec::new(),
            inst_files: Vec::new(),
            acq_rights_files: Vec::new(),
            users_files: Vec::new(),
            equipment_files: Vec::new(),
            metadata_files: MetadataFiles::default(),
            schema_files: Vec::new(),
            type_files: Vec::new(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl LoaderConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| LoaderError::io(path, e))?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Whether any step after schema handling is requested.
    pub fn loads_data(&self) -> bool {
        self.load_metadata || self.load_equipments || self.load_static_data
    }
}
