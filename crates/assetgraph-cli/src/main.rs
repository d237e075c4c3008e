//! Assetgraph CLI
//!
//! - `load`: run the bulk loader from a JSON configuration, with flag
//!   overrides, into an N-Quads file or a dry-run in-memory store
//! - `state`: print the saved loader state tree

use anyhow::{anyhow, Context, Result};
use clap::{ArgGroup, Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use assetgraph_loader::{
    AggregateLoader, EquipmentTypeRepository, GraphStore, JsonEquipmentTypeRepository, LoaderConfig,
    MasterLoader, MemoryEquipmentTypeRepository, MemoryGraphStore, NQuadsFileStore, PipelineReport,
};

#[derive(Parser)]
#[command(name = "assetgraph")]
#[command(author, version, about = "Assetgraph: incremental CSV master-data loader")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load schema, metadata, equipment and static data.
    Load(LoadArgs),

    /// Print the per-scope, per-file state saved by previous runs.
    State {
        #[arg(long, default_value = "state.json")]
        state_file: PathBuf,
        /// Print the raw JSON tree
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("target").required(true).args(["out", "dry_run"])))]
struct LoadArgs {
    /// Loader configuration (JSON); flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(long)]
    state_file: Option<PathBuf>,
    #[arg(long)]
    master_dir: Option<PathBuf>,
    #[arg(long)]
    batch_size: Option<usize>,
    /// Pipeline workers
    #[arg(long)]
    workers: Option<usize>,
    /// Re-assert type and key triples for every lookup
    #[arg(long)]
    ignore_new: bool,
    #[arg(long)]
    drop_schema: bool,
    #[arg(long)]
    create_schema: bool,
    #[arg(long)]
    load_metadata: bool,
    #[arg(long)]
    load_default_equipment_types: bool,
    #[arg(long)]
    load_equipments: bool,
    #[arg(long)]
    load_static_data: bool,
    /// Equipment type repository (JSON); in-memory when omitted
    #[arg(long)]
    equipment_types: Option<PathBuf>,
    /// Append applied batches as N-Quads to this file
    #[arg(short, long)]
    out: Option<PathBuf>,
    /// Load into memory only and report counts
    #[arg(long)]
    dry_run: bool,
}

impl LoadArgs {
    fn loader_config(&self) -> Result<LoaderConfig> {
        let mut config = match &self.config {
            Some(path) => LoaderConfig::from_json_file(path)
                .with_context(|| format!("cannot read config {}", path.display()))?,
            None => LoaderConfig::default(),
        };
        self.apply(&mut config);
        Ok(config)
    }

    /// Flags only ever switch operations on; values replace the file's.
    fn apply(&self, config: &mut LoaderConfig) {
        if let Some(path) = &self.state_file {
            config.state_file = path.clone();
        }
        if let Some(path) = &self.master_dir {
            config.master_dir = path.clone();
        }
        if let Some(n) = self.batch_size {
            config.batch_size = n;
        }
        if let Some(n) = self.workers {
            config.pipeline.workers = n;
        }
        config.ignore_new |= self.ignore_new;
        config.drop_schema |= self.drop_schema;
        config.create_schema |= self.create_schema;
        config.load_metadata |= self.load_metadata;
        config.load_default_equipment_types |= self.load_default_equipment_types;
        config.load_equipments |= self.load_equipments;
        config.load_static_data |= self.load_static_data;
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow!("failed to initialize tokio runtime: {e}"))?;

    let result = rt.block_on(async move {
        match cli.command {
            Commands::Load(args) => cmd_load(&args).await,
            Commands::State { state_file, json } => cmd_state(&state_file, json).await,
        }
    });
    if let Err(e) = &result {
        tracing::error!("{e:#}");
    }
    result
}

async fn cmd_load(args: &LoadArgs) -> Result<()> {
    let config = args.loader_config()?;
    let repo: Arc<dyn EquipmentTypeRepository> = match &args.equipment_types {
        Some(path) => Arc::new(JsonEquipmentTypeRepository::new(path)),
        None => Arc::new(MemoryEquipmentTypeRepository::new()),
    };

    let report = match &args.out {
        Some(out) => {
            let store = Arc::new(
                NQuadsFileStore::open(out)
                    .await
                    .with_context(|| format!("cannot open {}", out.display()))?,
            );
            let result = run(config, store.clone(), repo).await;
            store.flush().await?;
            tracing::info!(out = %store.path().display(), "n-quads written");
            result?
        }
        None => {
            let store = Arc::new(MemoryGraphStore::new());
            let result = run(config, store.clone(), repo).await;
            tracing::info!(
                batches = store.mutation_count(),
                triples = store.quads().len(),
                "dry run, nothing written"
            );
            result?
        }
    };

    println!(
        "loaded {} batches ({} triples), {} lost",
        report.mutations, report.quads, report.aborted
    );
    Ok(())
}

async fn run(
    config: LoaderConfig,
    store: Arc<dyn GraphStore>,
    repo: Arc<dyn EquipmentTypeRepository>,
) -> Result<PipelineReport> {
    let loader = AggregateLoader::new(config, store, repo);
    Ok(loader.load().await?)
}

async fn cmd_state(state_file: &Path, json: bool) -> Result<()> {
    let ml = MasterLoader::from_file(state_file)
        .await
        .with_context(|| format!("cannot read state {}", state_file.display()))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&ml)?);
        return Ok(());
    }
    for (name, scope) in &ml.loaders {
        println!("{name}: {}", scope.state);
        for (file, fl) in &scope.loaders {
            println!(
                "  {file}: {} version={} updated={}",
                fl.state,
                fl.version.as_deref().unwrap_or("-"),
                fl.updated.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".into()),
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_args(argv: &[&str]) -> LoadArgs {
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Commands::Load(args) => args,
            Commands::State { .. } => panic!("expected load"),
        }
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loader.json");
        std::fs::write(
            &path,
            r#"{"batch_size": 10, "load_static_data": true, "scopes": ["France"], "master_dir": "in"}"#,
        )
        .unwrap();
        let config_arg = path.to_string_lossy().into_owned();
        let args = load_args(&[
            "assetgraph",
            "load",
            "--config",
            &config_arg,
            "--batch-size",
            "50",
            "--workers",
            "4",
            "--create-schema",
            "--dry-run",
        ]);

        let config = args.loader_config().unwrap();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.pipeline.workers, 4);
        assert!(config.create_schema);
        assert!(config.load_static_data);
        assert_eq!(config.scopes, ["France"]);
        assert_eq!(config.master_dir, PathBuf::from("in"));
    }

    #[test]
    fn test_load_needs_a_target() {
        assert!(Cli::try_parse_from(["assetgraph", "load"]).is_err());
        assert!(Cli::try_parse_from(["assetgraph", "load", "--dry-run", "--out", "x.nq"]).is_err());
        assert!(Cli::try_parse_from(["assetgraph", "load", "--out", "x.nq"]).is_ok());
    }

    #[tokio::test]
    async fn test_dry_run_without_data_steps() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state.json");
        let state_arg = state.to_string_lossy().into_owned();
        let args = load_args(&["assetgraph", "load", "--state-file", &state_arg, "--dry-run"]);
        cmd_load(&args).await.unwrap();
        assert!(!state.exists());
    }
}
