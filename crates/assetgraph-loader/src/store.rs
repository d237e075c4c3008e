//! Graph store boundary
//!
//! The loader needs two operations from the target store: schema alteration
//! and batch mutation. [`MemoryGraphStore`] keeps everything in process (tests,
//! dry runs); [`NQuadsFileStore`] appends RDF N-Quad lines to a file that a bulk
//! importer can pick up.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};

use crate::quad::{Mutation, NQuad, Object, TYPE_PREDICATE};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Transaction aborted, typically a write conflict; safe to retry.
    #[error("transaction aborted: {0}")]
    Aborted(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store rejected request: {0}")]
    Rejected(String),
    #[error("store I/O: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether the same batch may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Aborted(_) | StoreError::Unavailable(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlterOp {
    /// Drop every predicate, type and node.
    DropAll,
    /// Apply schema or type declarations.
    Schema(String),
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn alter(&self, op: AlterOp) -> Result<(), StoreError>;

    /// Apply `mutation` atomically.
    async fn mutate(&self, mutation: &Mutation) -> Result<(), StoreError>;
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Debug, Default)]
struct MemoryGraph {
    mutations: Vec<Mutation>,
    schema: Vec<String>,
    drops: usize,
}

/// Store that keeps every applied batch in memory.
#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    graph: Mutex<MemoryGraph>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mutation_count(&self) -> usize {
        self.graph.lock().mutations.len()
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.graph.lock().mutations.clone()
    }

    /// Every applied triple, in application order.
    pub fn quads(&self) -> Vec<NQuad> {
        self.graph
            .lock()
            .mutations
            .iter()
            .flat_map(|m| m.set.iter().cloned())
            .collect()
    }

    pub fn schema(&self) -> Vec<String> {
        self.graph.lock().schema.clone()
    }

    pub fn drop_count(&self) -> usize {
        self.graph.lock().drops
    }

    /// Objects of `(subject, predicate, _)` rendered as strings (ids or literals).
    pub fn objects(&self, subject: &str, predicate: &str) -> Vec<String> {
        self.quads()
            .into_iter()
            .filter(|q| q.subject == subject && q.predicate == predicate)
            .map(|q| match q.object {
                Object::Id(id) => id,
                Object::Value(v) => match v {
                    crate::quad::Value::Str(s) | crate::quad::Value::Default(s) => s,
                    crate::quad::Value::Int(i) => i.to_string(),
                    crate::quad::Value::Float(f) => f.to_string(),
                },
            })
            .collect()
    }

    /// Subjects carrying `predicate` with string literal `value`.
    pub fn subjects_with(&self, predicate: &str, value: &str) -> BTreeSet<String> {
        self.quads()
            .into_iter()
            .filter(|q| q.predicate == predicate && q.object_str() == Some(value))
            .map(|q| q.subject)
            .collect()
    }

    /// Distinct subjects declared with `type_name = type_name`.
    pub fn nodes_of_type(&self, type_name: &str) -> BTreeSet<String> {
        self.subjects_with(TYPE_PREDICATE, type_name)
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn alter(&self, op: AlterOp) -> Result<(), StoreError> {
        let mut graph = self.graph.lock();
        match op {
            AlterOp::DropAll => {
                graph.mutations.clear();
                graph.schema.clear();
                graph.drops += 1;
            }
            AlterOp::Schema(text) => graph.schema.push(text),
        }
        Ok(())
    }

    async fn mutate(&self, mutation: &Mutation) -> Result<(), StoreError> {
        self.graph.lock().mutations.push(mutation.clone());
        Ok(())
    }
}

// ============================================================================
// N-Quads file store
// ============================================================================

/// Appends applied batches as N-Quad lines to `path`; schema text goes to
/// `<path>.schema`.
pub struct NQuadsFileStore {
    path: PathBuf,
    schema_path: PathBuf,
    out: tokio::sync::Mutex<BufWriter<tokio::fs::File>>,
}

impl NQuadsFileStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let mut schema_path = path.clone().into_os_string();
        schema_path.push(".schema");

        Ok(Self {
            path,
            schema_path: PathBuf::from(schema_path),
            out: tokio::sync::Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema_path(&self) -> &Path {
        &self.schema_path
    }

    pub async fn flush(&self) -> Result<(), StoreError> {
        self.out.lock().await.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl GraphStore for NQuadsFileStore {
    async fn alter(&self, op: AlterOp) -> Result<(), StoreError> {
        match op {
            AlterOp::DropAll => {
                let mut out = self.out.lock().await;
                out.flush().await?;
                let file = out.get_mut();
                file.set_len(0).await?;
                file.seek(std::io::SeekFrom::Start(0)).await?;
                if tokio::fs::try_exists(&self.schema_path).await? {
                    tokio::fs::remove_file(&self.schema_path).await?;
                }
            }
            AlterOp::Schema(text) => {
                let mut schema = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.schema_path)
                    .await?;
                schema.write_all(text.as_bytes()).await?;
                if !text.ends_with('\n') {
                    schema.write_all(b"\n").await?;
                }
                schema.flush().await?;
            }
        }
        Ok(())
    }

    async fn mutate(&self, mutation: &Mutation) -> Result<(), StoreError> {
        let mut block = String::with_capacity(mutation.len() * 64);
        for quad in &mutation.set {
            block.push_str(&quad.to_string());
            block.push('\n');
        }
        let mut out = self.out.lock().await;
        out.write_all(block.as_bytes()).await?;
        if mutation.commit_now {
            out.flush().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quad::NQuad;
    use tempfile::tempdir;

    #[test]
    fn test_only_transient_errors_are_retryable() {
        assert!(StoreError::Aborted("conflict".into()).is_retryable());
        assert!(StoreError::Unavailable("connection reset".into()).is_retryable());
        assert!(!StoreError::Rejected("bad predicate".into()).is_retryable());
        assert!(!StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")).is_retryable());
    }

    #[tokio::test]
    async fn test_memory_store_drop_all_clears_data() {
        let store = MemoryGraphStore::new();
        store
            .mutate(&Mutation::from_quads(vec![NQuad::string("0x1", "type_name", "product")]))
            .await
            .unwrap();
        store.alter(AlterOp::Schema("product.name: string .".into())).await.unwrap();
        assert_eq!(store.nodes_of_type("product").len(), 1);

        store.alter(AlterOp::DropAll).await.unwrap();
        assert!(store.quads().is_empty());
        assert!(store.schema().is_empty());
        assert_eq!(store.drop_count(), 1);
    }

    #[tokio::test]
    async fn test_nquads_store_writes_lines_and_schema() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out/graph.rdf");
        let store = NQuadsFileStore::open(&path).await.unwrap();
        store
            .alter(AlterOp::Schema("product.swidtag: string @index(exact) .".into()))
            .await
            .unwrap();
        store
            .mutate(&Mutation::from_quads(vec![
                NQuad::string("0x1", "product.swidtag", "P1"),
                NQuad::edge("0x1", "product.equipment", "0x2"),
            ]))
            .await
            .unwrap();
        store.flush().await.unwrap();

        let body = std::fs::read_to_string(&path).unwrap();
        assert_eq!(body.lines().count(), 2);
        assert!(body.contains("<0x1> <product.equipment> <0x2> ."));
        let schema = std::fs::read_to_string(store.schema_path()).unwrap();
        assert!(schema.contains("product.swidtag"));

        store.alter(AlterOp::DropAll).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
        assert!(!store.schema_path().exists());
    }
}
