//! Integration tests for the complete Assetgraph load path
//!
//! These tests run the loader across crates:
//! - CSV master data → converters → pipeline → N-Quads file
//! - Persistent identifier map → stable node ids across runs
//!
//! Run with: cargo test --test integration_tests

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

use assetgraph_idmap::{IdentifierAllocator, PersistentAllocator};
use assetgraph_loader::{
    AggregateLoader, IdMapKind, LoaderConfig, LoaderState, MasterLoader, MemoryEquipmentTypeRepository,
    NQuadsFileStore,
};

fn write(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
}

/// `swidtag → subject` for every `product.swidtag` line of an N-Quads file.
fn product_subjects(nquads: &str) -> HashMap<String, String> {
    nquads
        .lines()
        .filter(|l| l.contains("<product.swidtag>"))
        .map(|l| {
            let subject = l.split_whitespace().next().unwrap().trim_matches(|c| c == '<' || c == '>');
            let literal = l.split('"').nth(1).unwrap();
            (literal.to_string(), subject.to_string())
        })
        .collect()
}

fn config(root: &Path) -> LoaderConfig {
    let mut cfg = LoaderConfig::default();
    cfg.master_dir = root.join("data");
    cfg.state_file = root.join("state.json");
    cfg.id_map = IdMapKind::Persistent;
    cfg.id_map_dir = root.join("idmap");
    cfg.scopes = vec!["France".into()];
    cfg.load_static_data = true;
    cfg.product_files = vec!["products.csv".into()];
    cfg.app_files = vec!["applications.csv".into()];
    cfg
}

async fn run_into(root: &Path, out: &Path) {
    let store = Arc::new(NQuadsFileStore::open(out).await.unwrap());
    let loader = AggregateLoader::new(
        config(root),
        store.clone(),
        Arc::new(MemoryEquipmentTypeRepository::new()),
    )
    .handle_interrupt(false);
    let report = loader.load().await.unwrap();
    assert_eq!(report.aborted, 0);
    store.flush().await.unwrap();
}

// ============================================================================
// Persistent identity across runs
// ============================================================================

#[tokio::test]
async fn test_node_ids_survive_between_runs() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(root, "data/France/v1/products.csv", "SWIDTag;Name\nP1;Oracle DB\nP2;Java\n");
    write(root, "data/France/v1/applications.csv", "IdApplication;Name;SWIDTag\nA1;Billing;P1\n");

    let first_out = root.join("run1.nq");
    run_into(root, &first_out).await;
    let first = product_subjects(&std::fs::read_to_string(&first_out).unwrap());
    assert_eq!(first.len(), 2);

    write(root, "data/France/v2/products.csv", "SWIDTag;Name\nP1;Oracle DB 19c\nP3;Postgres\n");
    let second_out = root.join("run2.nq");
    run_into(root, &second_out).await;
    let second = product_subjects(&std::fs::read_to_string(&second_out).unwrap());

    // v1 was not reloaded, and P1 kept its node.
    assert_eq!(second.len(), 2);
    assert_eq!(second["P1"], first["P1"]);
    assert!(!second.contains_key("P2"));
    let fresh = &second["P3"];
    assert!(first.values().all(|uid| uid != fresh));

    let ml = MasterLoader::from_file(&root.join("state.json")).await.unwrap();
    let products = &ml.loaders["France"].loaders["products.csv"];
    assert_eq!(products.state, LoaderState::Updated);
    assert_eq!(products.version.as_deref(), Some("v2"));
    assert_eq!(ml.loaders["France"].loaders["applications.csv"].version.as_deref(), Some("v1"));
}

#[tokio::test]
async fn test_reopened_id_map_resolves_loaded_keys() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(root, "data/France/v1/products.csv", "SWIDTag;Editor\nP1;Oracle\n");
    write(root, "data/France/v1/applications.csv", "IdApplication;SWIDTag\nA1;P1\n");
    let out = root.join("graph.nq");
    run_into(root, &out).await;
    let loaded = product_subjects(&std::fs::read_to_string(&out).unwrap());

    let ids = PersistentAllocator::open(root.join("idmap")).unwrap();
    // P1, its editor node and the application.
    assert_eq!(ids.len(), 3);
    let (p1, is_new) = ids.assign_id("P1");
    assert!(!is_new);
    assert_eq!(p1.to_string(), loaded["P1"]);
    assert!(!ids.assign_id("app_A1").1);
    assert!(!ids.assign_id("editor_Oracle").1);
}

// ============================================================================
// N-Quads output
// ============================================================================

#[tokio::test]
async fn test_nquads_output_is_scoped_and_typed() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(root, "data/France/v1/products.csv", "SWIDTag;Name\nP1;Oracle DB\n");
    write(root, "data/France/v1/applications.csv", "IdApplication;Name\nA1;Billing\n");
    let out = root.join("graph.nq");
    run_into(root, &out).await;

    let body = std::fs::read_to_string(&out).unwrap();
    let p1 = &product_subjects(&body)["P1"];
    assert!(body.contains(&format!("<{p1}> <type_name> \"product\"^^<xs:string> .")));
    assert!(body.contains(&format!("<{p1}> <scopes> \"France\"^^<xs:string> .")));
    assert!(body.contains(&format!("<{p1}> <product.name> \"Oracle DB\"^^<xs:string> .")));
    assert!(body.lines().all(|l| l.ends_with(" .")));
    assert_eq!(body.matches("<application.name> \"Billing\"").count(), 1);
}
