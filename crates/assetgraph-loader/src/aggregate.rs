//! One loader run: schema, metadata, equipment types, equipment and static
//! entities, all flowing through a single mutation pipeline.

use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use assetgraph_idmap::{IdentifierAllocator, MemoryAllocator, PersistentAllocator};

use crate::config::{IdMapKind, LoaderConfig};
use crate::convert::metadata::equipment_metadata_quads;
use crate::convert::{ConvertContext, Schemas, StaticKind};
use crate::csv_file::read_columns;
use crate::equipment_type::{load_default_equipment_types, EquipmentTypeRepository};
use crate::error::{LoaderError, Result};
use crate::file_load::{EquipmentFileLoader, FileSource, StaticFileLoader};
use crate::ids::NodeIds;
use crate::pipeline::{BatchSender, MutationPipeline, PipelineReport};
use crate::quad::Mutation;
use crate::state::MasterLoader;
use crate::store::{AlterOp, GraphStore};

fn base_name(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(path)
}

pub struct AggregateLoader {
    config: LoaderConfig,
    store: Arc<dyn GraphStore>,
    equipment_types: Arc<dyn EquipmentTypeRepository>,
    schemas: Arc<Schemas>,
    node_ids: Option<NodeIds>,
    done: CancellationToken,
    handle_interrupt: bool,
}

impl AggregateLoader {
    pub fn new(
        config: LoaderConfig,
        store: Arc<dyn GraphStore>,
        equipment_types: Arc<dyn EquipmentTypeRepository>,
    ) -> Self {
        Self {
            config,
            store,
            equipment_types,
            schemas: Arc::new(Schemas::builtin()),
            node_ids: None,
            done: CancellationToken::new(),
            handle_interrupt: true,
        }
    }

    /// Use `ids` instead of building an allocator from the configuration.
    pub fn with_node_ids(mut self, ids: NodeIds) -> Self {
        self.node_ids = Some(ids);
        self
    }

    /// Whether ctrl-c fires the done token (on by default).
    pub fn handle_interrupt(mut self, on: bool) -> Self {
        self.handle_interrupt = on;
        self
    }

    /// Cancelling this token stops the run: producers fail their current file,
    /// unapplied batches are counted as lost, state is saved.
    pub fn done_token(&self) -> CancellationToken {
        self.done.clone()
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub async fn load(&self) -> Result<PipelineReport> {
        tracing::info!("loader started");
        let config = &self.config;

        if config.drop_schema {
            self.drop_schema().await?;
        }
        if config.create_schema {
            self.create_schema().await?;
        }
        if config.load_default_equipment_types {
            load_default_equipment_types(self.equipment_types.as_ref()).await?;
        }
        if !config.loads_data() {
            return Ok(PipelineReport::default());
        }

        let ids = match &self.node_ids {
            Some(ids) => ids.clone(),
            None => self.open_node_ids().await?,
        };
        let ctx = ConvertContext::new(ids.clone(), Arc::clone(&self.schemas));

        let (sender, handle) =
            MutationPipeline::start(Arc::clone(&self.store), config.pipeline.clone(), self.done.clone()).await?;
        let interrupt = self.handle_interrupt.then(|| spawn_interrupt_watch(self.done.clone()));

        let mut producers = JoinSet::new();
        if config.load_metadata {
            for file in &config.metadata_files.equip_files {
                let path = config.scope_skeleton.join(file);
                let ids = ids.clone();
                let sender = sender.clone();
                producers.spawn(async move { load_equipment_metadata(&path, &ids, &sender).await });
            }
        }

        let mut master = None;
        if config.load_equipments || config.load_static_data {
            let mut ml = MasterLoader::from_file_or_default(&config.state_file).await;
            if config.load_equipments {
                self.load_equipments(&mut ml, &ctx, &sender).await;
            }
            if config.load_static_data {
                self.load_static_data(&mut ml, &ctx, &sender);
            }
            let master_dir = config.master_dir.clone();
            master = Some(tokio::spawn(async move {
                ml.load(&master_dir).await;
                ml
            }));
        }
        drop(sender);

        while let Some(joined) = producers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "metadata task failed");
            }
        }
        let (master, master_panic) = match master {
            Some(task) => match task.await {
                Ok(ml) => (Some(ml), None),
                Err(e) => (None, Some(LoaderError::Join(e))),
            },
            None => (None, None),
        };

        let report = handle.finish().await;
        if let Some(task) = interrupt {
            task.abort();
        }

        let master_err = match &master {
            Some(ml) => {
                if let Err(e) = ml.save_to_file(&config.state_file).await {
                    tracing::error!(state_file = %config.state_file.display(), error = %e, "cannot save state");
                }
                ml.error()
            }
            None => master_panic,
        };
        if let Err(e) = ids.allocator().flush() {
            tracing::error!(error = %e, "cannot flush identifier map");
        }

        let report = report?;
        if report.aborted != 0 {
            return Err(LoaderError::AbortedMutations {
                count: report.aborted,
                cause: master_err.map(Box::new),
            });
        }
        if let Some(e) = master_err {
            return Err(e);
        }
        tracing::info!(mutations = report.mutations, quads = report.quads, "loader finished");
        Ok(report)
    }

    pub async fn drop_schema(&self) -> Result<()> {
        tracing::info!("dropping schema and data");
        self.store.alter(AlterOp::DropAll).await?;
        Ok(())
    }

    /// Apply every schema file, then every type file.
    pub async fn create_schema(&self) -> Result<()> {
        for path in self.config.schema_files.iter().chain(&self.config.type_files) {
            let text = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| LoaderError::io(path, e))?;
            tracing::info!(file = %path.display(), "applying schema");
            self.store.alter(AlterOp::Schema(text)).await?;
        }
        Ok(())
    }

    async fn open_node_ids(&self) -> Result<NodeIds> {
        let allocator: Arc<dyn IdentifierAllocator> = match self.config.id_map {
            IdMapKind::Memory => Arc::new(MemoryAllocator::new()),
            IdMapKind::Persistent => {
                let dir = self.config.id_map_dir.clone();
                let allocator = tokio::task::spawn_blocking(move || PersistentAllocator::open(dir)).await??;
                tracing::info!(known = allocator.len(), "identifier map restored");
                Arc::new(allocator)
            }
        };
        Ok(NodeIds::new(allocator, self.config.ignore_new))
    }

    fn source(&self, scope: &str, file: &str, sender: &BatchSender) -> FileSource {
        FileSource {
            master_dir: self.config.master_dir.clone(),
            scope: scope.to_string(),
            file: file.to_string(),
            batch_size: self.config.batch_size.max(1),
            sender: sender.clone(),
        }
    }

    /// Register an equipment loader for every `(scope, file)` whose file name
    /// matches an equipment type.
    async fn load_equipments(&self, ml: &mut MasterLoader, ctx: &ConvertContext, sender: &BatchSender) {
        let eq_types = match self.equipment_types.equipment_types().await {
            Ok(types) if !types.is_empty() => types,
            Ok(_) => {
                tracing::warn!("no equipment types defined, skipping equipments");
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "cannot list equipment types, skipping equipments");
                return;
            }
        };

        for scope in &self.config.scopes {
            let scope = base_name(scope);
            let sl = ml.scope_mut(scope);
            for file in &self.config.equipment_files {
                let file = base_name(file);
                let Some(eq_type) = eq_types.iter().find(|t| t.source_name == file) else {
                    tracing::info!(scope, file, "no equipment type for file");
                    continue;
                };
                let loader = EquipmentFileLoader::new(self.source(scope, file, sender), eq_type.clone(), ctx.clone());
                sl.register(file, Arc::new(loader));
            }
        }
    }

    fn load_static_data(&self, ml: &mut MasterLoader, ctx: &ConvertContext, sender: &BatchSender) {
        let config = &self.config;
        for kind in StaticKind::ALL {
            let files = match kind {
                StaticKind::Products => &config.product_files,
                StaticKind::Applications => &config.app_files,
                StaticKind::Instances => &config.inst_files,
                StaticKind::AcquiredRights => &config.acq_rights_files,
                StaticKind::Users => &config.users_files,
            };
            for scope in &config.scopes {
                let scope = base_name(scope);
                let sl = ml.scope_mut(scope);
                for file in files {
                    let file = base_name(file);
                    let loader = StaticFileLoader::new(self.source(scope, file, sender), kind, ctx.clone());
                    sl.register(file, Arc::new(loader));
                }
            }
        }
    }
}

async fn load_equipment_metadata(path: &Path, ids: &NodeIds, sender: &BatchSender) {
    tracing::info!(file = %path.display(), "started metadata loading");
    let columns = match read_columns(path).await {
        Ok(columns) => columns,
        Err(e) => {
            tracing::error!(file = %path.display(), error = %e, "cannot read metadata header");
            return;
        }
    };
    let source = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let rq = equipment_metadata_quads(ids, &source, &columns);
    if let Err(e) = sender.send(Mutation::from_quads(rq.quads)).await {
        tracing::error!(file = %path.display(), error = %e, "metadata not loaded");
    }
}

fn spawn_interrupt_watch(done: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = done.cancelled() => {}
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => tracing::warn!("interrupt received, draining"),
                    Err(e) => {
                        tracing::error!(error = %e, "cannot listen for interrupt");
                        return;
                    }
                }
                done.cancel();
            }
        }
    })
}
