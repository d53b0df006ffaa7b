use oxigraph::model::{NamedNode, Term};
use quadstore::{OpenMode, OpenStatus, QuadStore, TripleStore};
use quadstore_cli::run_from_args;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn iri(s: &str) -> Term {
    NamedNode::new_unchecked(s).into()
}

fn run(args: &[&str]) -> anyhow::Result<()> {
    run_from_args(std::iter::once("quadstore").chain(args.iter().copied()))
}

fn reopen(path: &Path) -> QuadStore {
    let mut store = QuadStore::new();
    assert_eq!(store.open(path, OpenMode::Existing).unwrap(), OpenStatus::Valid);
    store
}

#[test]
fn init_add_and_remove() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("db");
    let db_str = db.to_str().unwrap();

    run(&["init", db_str]).unwrap();
    assert!(run(&["init", db_str]).is_err(), "init over an existing store");

    run(&["add", db_str, "urn:a", "urn:b", "urn:c", "--graph", "urn:g1"]).unwrap();
    run(&["add", db_str, "<urn:a>", "<urn:b>", "<urn:c>", "-g", "<urn:g2>"]).unwrap();
    run(&["add-graph", db_str, "urn:empty"]).unwrap();
    run(&["query", db_str, "-s", "urn:a", "--json"]).unwrap();
    run(&["len", db_str, "-g", "urn:g1"]).unwrap();
    run(&["contexts", db_str, "--triple", "urn:a", "urn:b", "urn:c"]).unwrap();
    run(&["stats", db_str, "--json"]).unwrap();
    {
        let store = reopen(&db);
        assert_eq!(store.len(None).unwrap(), 1);
        assert_eq!(store.contexts(None).unwrap().count(), 3);
    }

    run(&["remove", db_str, "-s", "urn:a", "-g", "urn:g1"]).unwrap();
    run(&["remove-graph", db_str, "urn:empty"]).unwrap();
    {
        let store = reopen(&db);
        assert_eq!(store.len(Some(&iri("urn:g1"))).unwrap(), 0);
        assert_eq!(store.len(None).unwrap(), 1);
        assert_eq!(store.contexts(None).unwrap().count(), 2);
    }

    run(&["destroy", db_str, "--force"]).unwrap();
    assert!(!db.exists());
}

#[test]
fn load_turtle_into_a_graph() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("db");
    let db_str = db.to_str().unwrap();
    let ttl = dir.path().join("data.ttl");
    fs::write(
        &ttl,
        "@prefix ex: <http://example.org/> .\n\
         ex:a ex:knows ex:b , ex:c .\n\
         ex:b ex:name \"Bee\"@en .\n",
    )
    .unwrap();

    run(&["init", db_str]).unwrap();
    run(&["load", db_str, ttl.to_str().unwrap(), "--graph", "http://example.org/g"]).unwrap();

    let store = reopen(&db);
    let g = iri("http://example.org/g");
    assert_eq!(store.len(Some(&g)).unwrap(), 3);
    assert_eq!(store.len(None).unwrap(), 3);
    let knows = iri("http://example.org/knows");
    assert_eq!(store.triples(None, Some(&knows), None, None).unwrap().count(), 2);
}

#[test]
fn load_nquads_keeps_file_graphs() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("db");
    let db_str = db.to_str().unwrap();
    let nq = dir.path().join("data.nq");
    fs::write(
        &nq,
        "<urn:a> <urn:p> <urn:b> <urn:g1> .\n\
         <urn:a> <urn:p> <urn:b> <urn:g2> .\n\
         <urn:c> <urn:p> <urn:d> .\n",
    )
    .unwrap();

    run(&["init", db_str]).unwrap();
    run(&["load", db_str, nq.to_str().unwrap(), "--quoted"]).unwrap();

    let store = reopen(&db);
    assert_eq!(store.len(None).unwrap(), 0, "quoted triples stay out of the union");
    assert_eq!(store.len(Some(&iri("urn:g1"))).unwrap(), 1);
    assert_eq!(store.len(Some(&iri("urn:g2"))).unwrap(), 1);
    // the default graph is named after the file
    assert_eq!(store.contexts(None).unwrap().count(), 3);
}

#[test]
fn missing_store_is_reported() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("nothing-here");
    let err = run(&["len", db.to_str().unwrap()]).unwrap_err();
    assert!(err.to_string().contains("No store found"));
}

#[test]
fn config_file_is_applied() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("db");
    let cfg = dir.path().join("options.json");
    fs::write(&cfg, r#"{"multiple_processes": false, "scan_batch": 2}"#).unwrap();
    run(&["--config", cfg.to_str().unwrap(), "init", db.to_str().unwrap(), "--save-config"]).unwrap();
    let saved = quadstore::StoreOptions::from_file(&db.join("options.json")).unwrap();
    assert!(!saved.multiple_processes);
    assert_eq!(saved.scan_batch, 2);
    assert!(db.join("store.lock").exists());

    // later commands pick up the saved options without --config
    fs::remove_file(db.join("store.lock")).unwrap();
    run(&["len", db.to_str().unwrap()]).unwrap();
    assert!(db.join("store.lock").exists());

    fs::write(&cfg, r#"{"cache_capacity": 0}"#).unwrap();
    assert!(run(&["--config", cfg.to_str().unwrap(), "len", db.to_str().unwrap()]).is_err());

    // an explicit --config wins over the saved file
    fs::write(db.join("options.json"), r#"{"cache_capacity": 0}"#).unwrap();
    assert!(run(&["len", db.to_str().unwrap()]).is_err());
    fs::write(&cfg, r#"{"multiple_processes": true}"#).unwrap();
    run(&["--config", cfg.to_str().unwrap(), "len", db.to_str().unwrap()]).unwrap();
}
