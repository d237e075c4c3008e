use std::path::PathBuf;

use assetgraph_idmap::IdMapError;

use crate::store::StoreError;

pub type Result<T, E = LoaderError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: malformed csv: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{}: column {column:?} not found in header", path.display())]
    MissingColumn { path: PathBuf, column: String },
    #[error("{}: file has no header row", .0.display())]
    EmptyFile(PathBuf),
    #[error("graph store: {0}")]
    Store(#[from] StoreError),
    #[error("equipment type: {0}")]
    EquipmentType(String),
    /// The done signal fired before a producer could hand off all its batches.
    #[error("{0}")]
    Stopped(String),
    #[error("{}", .0.join(",\n"))]
    Aggregate(Vec<String>),
    /// Batches were lost. The state of their versions is saved as loaded, so
    /// their rows are not imported again by a later run.
    #[error(
        "cannot complete: {count} aborted mutations, their rows will not be re-imported{}",
        .cause.as_ref().map(|c| format!("\n{c}")).unwrap_or_default()
    )]
    AbortedMutations {
        count: u64,
        cause: Option<Box<LoaderError>>,
    },
    #[error(transparent)]
    IdMap(#[from] IdMapError),
    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl LoaderError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Self::Csv {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aborted_mutations_message_names_the_loss() {
        let err = LoaderError::AbortedMutations {
            count: 2,
            cause: Some(Box::new(LoaderError::Aggregate(vec!["products.csv: bad".into()]))),
        };
        assert_eq!(
            err.to_string(),
            "cannot complete: 2 aborted mutations, their rows will not be re-imported\nproducts.csv: bad"
        );
    }
}
