//! Assetgraph bulk loader
//!
//! Ingests `;`-delimited CSV master data (products, applications, instances,
//! acquired rights, users, equipment) into a graph store:
//!
//! ```text
//!   <master_dir>/<scope>/<version>/<file>.csv
//!        │
//!        ▼
//!   MasterLoader ─► ScopeLoader ─► FileLoader ─► VersionLoader
//!                                                    │ rows → dirty gate → converter
//!                                                    ▼
//!                                        MutationPipeline ─► GraphStore
//! ```
//!
//! ## Key Features
//!
//! - **Stable identity**: external keys resolve to the same node id across
//!   files, and across runs with the persistent identifier map.
//! - **Incremental**: rows older than a file's watermark are skipped.
//! - **Resumable**: per-file state is saved as JSON; a failed version is
//!   retried on the next run, completed versions are not.
//! - **Retry until done**: failed batches are retried with backoff until the
//!   run is stopped; lost batches are counted and reported.

pub mod aggregate;
pub mod config;
pub mod convert;
pub mod csv_file;
pub mod dirty;
pub mod equipment_type;
pub mod error;
pub mod file_load;
pub mod ids;
pub mod pipeline;
pub mod quad;
pub mod state;
pub mod store;

pub use aggregate::AggregateLoader;
pub use config::{IdMapKind, LoaderConfig, PipelineConfig};
pub use equipment_type::{
    Attribute, DataType, EquipmentType, EquipmentTypeRepository, JsonEquipmentTypeRepository,
    MemoryEquipmentTypeRepository,
};
pub use error::{LoaderError, Result};
pub use ids::NodeIds;
pub use pipeline::{AbortCounter, BatchSender, MutationPipeline, PipelineHandle, PipelineReport};
pub use quad::{Mutation, NQuad, Object, Value};
pub use state::{FileLoader, LoadCursor, LoaderState, MasterLoader, ScopeLoader, VersionLoader};
pub use store::{AlterOp, GraphStore, MemoryGraphStore, NQuadsFileStore, StoreError};
