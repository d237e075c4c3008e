//! Resumable loader tree
//!
//! ```text
//! MasterLoader
//!   └─ scope ─► ScopeLoader        (state)
//!                 └─ file ─► FileLoader   (state, version, updated)
//! ```
//!
//! The tree is persisted as JSON between runs. Each file walks the version
//! directories of its scope in ascending order; a recorded `Updated` version
//! resumes after it, a recorded `Failed` version is retried.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::error::{LoaderError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoaderState {
    /// Never loaded; every row is imported.
    #[default]
    Created,
    /// Last version loaded completely.
    Updated,
    /// Last attempted version did not complete.
    Failed,
}

impl fmt::Display for LoaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoaderState::Created => "Created",
            LoaderState::Updated => "Updated",
            LoaderState::Failed => "Failed",
        })
    }
}

/// What a version loader knows about the file before it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadCursor {
    pub state: LoaderState,
    pub watermark: Option<DateTime<Utc>>,
}

/// Loads one version directory of one file.
#[async_trait]
pub trait VersionLoader: Send + Sync {
    /// Returns the newest row timestamp imported, if any.
    async fn load_version(&self, version: &str, cursor: LoadCursor) -> Result<Option<DateTime<Utc>>>;
}

// ============================================================================
// File
// ============================================================================

#[derive(Clone, Serialize, Deserialize)]
pub struct FileLoader {
    pub file: String,
    pub state: LoaderState,
    #[serde(default)]
    pub version: Option<String>,
    /// Watermark.
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
    #[serde(skip)]
    loader: Option<Arc<dyn VersionLoader>>,
    #[serde(skip)]
    error: Option<String>,
}

impl fmt::Debug for FileLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileLoader")
            .field("file", &self.file)
            .field("state", &self.state)
            .field("version", &self.version)
            .field("updated", &self.updated)
            .field("has_loader", &self.loader.is_some())
            .field("error", &self.error)
            .finish()
    }
}

impl FileLoader {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            state: LoaderState::Created,
            version: None,
            updated: None,
            loader: None,
            error: None,
        }
    }

    pub fn set_loader(&mut self, loader: Arc<dyn VersionLoader>) {
        self.loader = Some(loader);
    }

    pub fn has_loader(&self) -> bool {
        self.loader.is_some()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn cursor(&self) -> LoadCursor {
        LoadCursor {
            state: self.state,
            watermark: self.updated,
        }
    }

    /// Versions still to process given the recorded state.
    pub fn pending_versions<'a>(&self, version_dirs: &'a [String]) -> &'a [String] {
        let recorded = self
            .version
            .as_deref()
            .and_then(|v| version_dirs.iter().position(|d| d == v));
        match (recorded, self.state) {
            (Some(i), LoaderState::Updated) => &version_dirs[i + 1..],
            (Some(i), LoaderState::Failed) => &version_dirs[i..],
            _ => version_dirs,
        }
    }

    /// Run the injected loader over the pending versions, stopping at the
    /// first failure.
    pub async fn load(&mut self, version_dirs: &[String]) {
        let Some(loader) = self.loader.clone() else {
            return;
        };
        self.error = None;

        let pending = self.pending_versions(version_dirs);
        tracing::info!(file = %self.file, recorded = ?self.version, versions = ?pending, "loading file");

        for version in pending {
            let cursor = self.cursor();
            self.state = LoaderState::Failed;
            self.version = Some(version.clone());

            match loader.load_version(version, cursor).await {
                Ok(stamp) => self.succeeded(stamp),
                Err(e) => {
                    tracing::error!(file = %self.file, version = %version, error = %e, "version failed");
                    self.set_error(e.to_string());
                    return;
                }
            }
        }
    }

    fn succeeded(&mut self, stamp: Option<DateTime<Utc>>) {
        if let Some(t) = stamp {
            if self.updated.map_or(true, |w| t > w) {
                self.updated = Some(t);
            }
        }
        self.state = LoaderState::Updated;
    }

    fn set_error(&mut self, error: String) {
        self.error = Some(error);
        self.state = LoaderState::Failed;
    }
}

// ============================================================================
// Scope
// ============================================================================

/// Sort key for version directories: `v10` after `v9`; names without a
/// number come first.
fn version_key(dir: &str) -> (Option<u64>, &str) {
    (dir.strip_prefix('v').and_then(|n| n.parse().ok()), dir)
}

pub fn sort_versions(dirs: &mut [String]) {
    for dir in dirs.iter() {
        if version_key(dir).0.is_none() {
            tracing::warn!(dir = %dir, "version directory has no numeric suffix");
        }
    }
    dirs.sort_by(|a, b| version_key(a).cmp(&version_key(b)));
}

async fn list_version_dirs(scope_dir: &Path) -> Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(scope_dir)
        .await
        .map_err(|e| LoaderError::io(scope_dir, e))?;
    let mut dirs = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| LoaderError::io(scope_dir, e))?
    {
        let is_dir = entry
            .file_type()
            .await
            .map_err(|e| LoaderError::io(entry.path(), e))?
            .is_dir();
        if is_dir {
            dirs.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    sort_versions(&mut dirs);
    Ok(dirs)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeLoader {
    pub scope: String,
    pub state: LoaderState,
    #[serde(default)]
    pub loaders: BTreeMap<String, FileLoader>,
    #[serde(skip)]
    error: Option<String>,
}

impl ScopeLoader {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            state: LoaderState::Created,
            loaders: BTreeMap::new(),
            error: None,
        }
    }

    /// File loader for `file`, created in the `Created` state on first sight.
    pub fn file_mut(&mut self, file: &str) -> &mut FileLoader {
        self.loaders
            .entry(file.to_string())
            .or_insert_with(|| FileLoader::new(file))
    }

    pub fn register(&mut self, file: &str, loader: Arc<dyn VersionLoader>) {
        self.file_mut(file).set_loader(loader);
    }

    pub async fn load(&mut self, master_dir: &Path) {
        if !self.loaders.values().any(FileLoader::has_loader) {
            return;
        }
        self.error = None;

        let scope_dir = master_dir.join(&self.scope);
        let versions = match list_version_dirs(&scope_dir).await {
            Ok(v) => Arc::new(v),
            Err(e) => {
                tracing::error!(scope = %self.scope, error = %e, "cannot list version directories");
                self.error = Some(e.to_string());
                self.state = LoaderState::Failed;
                return;
            }
        };

        let snapshot = self.loaders.clone();
        let mut tasks = JoinSet::new();
        for (_, mut fl) in std::mem::take(&mut self.loaders) {
            let versions = Arc::clone(&versions);
            tasks.spawn(async move {
                fl.load(&versions).await;
                fl
            });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(fl) => {
                    self.loaders.insert(fl.file.clone(), fl);
                }
                Err(e) => tracing::error!(scope = %self.scope, error = %e, "file loader task failed"),
            }
        }
        // A file whose task died keeps its last persisted position and is
        // retried next run.
        for (file, mut fl) in snapshot {
            self.loaders.entry(file).or_insert_with(|| {
                fl.set_error("file loader task failed".to_string());
                fl
            });
        }

        self.state = if self.loaders.values().any(|fl| fl.error.is_some()) {
            LoaderState::Failed
        } else {
            LoaderState::Updated
        };
    }

    /// `"<file>: <error>"` lines for every failed file.
    pub fn error(&self) -> Option<LoaderError> {
        let mut errors: Vec<String> = self.error.iter().cloned().collect();
        errors.extend(
            self.loaders
                .iter()
                .filter_map(|(file, fl)| fl.error.as_ref().map(|e| format!("{file}: {e}"))),
        );
        (!errors.is_empty()).then_some(LoaderError::Aggregate(errors))
    }
}

// ============================================================================
// Master
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MasterLoader {
    #[serde(default)]
    pub loaders: BTreeMap<String, ScopeLoader>,
}

impl MasterLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scope loader keyed by the base name of `scope`.
    pub fn scope_mut(&mut self, scope: &str) -> &mut ScopeLoader {
        let name = scope_name(scope);
        self.loaders
            .entry(name.to_string())
            .or_insert_with(|| ScopeLoader::new(name))
    }

    pub async fn load(&mut self, master_dir: &Path) {
        let master_dir = Arc::new(master_dir.to_path_buf());
        let snapshot = self.loaders.clone();
        let mut tasks = JoinSet::new();
        for (_, mut sl) in std::mem::take(&mut self.loaders) {
            let master_dir = Arc::clone(&master_dir);
            tasks.spawn(async move {
                sl.load(&master_dir).await;
                sl
            });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(sl) => {
                    self.loaders.insert(sl.scope.clone(), sl);
                }
                Err(e) => tracing::error!(error = %e, "scope loader task failed"),
            }
        }
        for (scope, mut sl) in snapshot {
            self.loaders.entry(scope).or_insert_with(|| {
                sl.error = Some("scope loader task failed".to_string());
                sl.state = LoaderState::Failed;
                sl
            });
        }
    }

    /// `"<scope>: <scope error>"` lines for every failed scope.
    pub fn error(&self) -> Option<LoaderError> {
        let errors: Vec<String> = self
            .loaders
            .iter()
            .filter_map(|(scope, sl)| sl.error().map(|e| format!("{scope}: {e}")))
            .collect();
        (!errors.is_empty()).then_some(LoaderError::Aggregate(errors))
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| LoaderError::io(path, e))?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Restore from `path`, starting from an empty tree when the file is
    /// missing or unreadable.
    pub async fn from_file_or_default(path: &Path) -> Self {
        match Self::from_file(path).await {
            Ok(ml) => ml,
            Err(e) => {
                tracing::warn!(state_file = %path.display(), error = %e, "state not restored, all data will be processed");
                Self::new()
            }
        }
    }

    /// Write the tree through a temporary file so a crash never leaves a
    /// truncated state file.
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| LoaderError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| LoaderError::io(path, e))
    }
}

fn scope_name(scope: &str) -> &str {
    Path::new(scope)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(scope)
}
