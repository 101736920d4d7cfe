use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use proptest::prelude::*;

use super::snapshot::{load, persist};
use super::*;
use crate::model::{CellValue, IndexedRow, RowField};
use crate::semantic::{LocalHashEmbedder, squared_l2_distance};

fn row(table: &str, fields: &[(&str, CellValue)]) -> IndexedRow {
    IndexedRow {
        source_table: table.to_string(),
        field_values: fields
            .iter()
            .map(|(name, value)| RowField {
                name: (*name).to_string(),
                value: value.clone(),
            })
            .collect(),
    }
}

fn text(value: &str) -> CellValue {
    CellValue::Text(value.to_string())
}

fn sample_rows() -> Vec<IndexedRow> {
    vec![
        row(
            "products",
            &[("sku", text("SKU-100")), ("name", text("red running shoe"))],
        ),
        row(
            "products",
            &[("sku", text("SKU-200")), ("name", text("blue rain jacket"))],
        ),
        row(
            "customers",
            &[("name", text("Grace Hopper")), ("city", text("Arlington"))],
        ),
        row(
            "customers",
            &[("name", text("Alan Turing")), ("city", text("Wilmslow"))],
        ),
    ]
}

fn embedder() -> Arc<dyn Embedder> {
    Arc::new(LocalHashEmbedder::default())
}

fn sample_engine() -> EvidenceEngine {
    EvidenceEngine::build(sample_rows(), embedder()).expect("engine should build")
}

fn source(model_id: &str, tables: &[&str]) -> SnapshotSource {
    SnapshotSource {
        model_id: model_id.to_string(),
        db_path: "/data/shop.sqlite".to_string(),
        db_bytes: 8192,
        db_modified_ms: 1_700_000_000_000,
        tables: tables.iter().map(|table| (*table).to_string()).collect(),
    }
}

fn field<'a>(row: &'a IndexedRow, name: &str) -> Option<&'a CellValue> {
    row.field_values
        .iter()
        .find(|field| field.name == name)
        .map(|field| &field.value)
}

#[test]
fn build_fails_when_no_row_is_embeddable() {
    let rows = vec![
        row("t", &[("a", CellValue::Null)]),
        row("t", &[("b", text("   "))]),
    ];
    let err = EvidenceEngine::build(rows, embedder()).err().expect("build must fail");
    assert!(matches!(err, IndexError::EmptyCorpus));
}

#[test]
fn build_counts_skipped_rows() {
    let mut rows = sample_rows();
    rows.push(row("t", &[("a", CellValue::Null)]));
    let engine = EvidenceEngine::build(rows, embedder()).expect("engine should build");
    assert_eq!(engine.index().len(), 4);
    assert_eq!(engine.skipped_rows(), 1);
}

#[test]
fn search_returns_best_match_first() {
    let engine = sample_engine();
    let hits = engine.search("Grace Hopper", 2).expect("search");
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].table, "customers");
    assert_eq!(hits[0].raw_row["name"], "Grace Hopper");
    assert!(hits[0].similarity_score >= hits[1].similarity_score);
    assert!(hits[0].row_preview.contains("name=Grace Hopper"));
}

#[test]
fn search_caps_results_at_corpus_size() {
    let engine = sample_engine();
    let hits = engine.search("anything", 50).expect("search");
    assert_eq!(hits.len(), 4);
    assert!(engine.search("anything", 0).expect("search").is_empty());
}

#[test]
fn equal_distances_keep_insertion_order() {
    let rows = vec![
        row("t", &[("v", text("same words"))]),
        row("t", &[("v", text("same words"))]),
        row("t", &[("v", text("same words"))]),
    ];
    let engine = EvidenceEngine::build(rows, embedder()).expect("engine should build");
    let positions = engine
        .search("same words", 3)
        .expect("search")
        .into_iter()
        .map(|hit| hit.position)
        .collect::<Vec<usize>>();
    assert_eq!(positions, vec![0, 1, 2]);
}

#[test]
fn nearest_rejects_wrong_query_dimension() {
    let engine = sample_engine();
    let err = engine
        .index()
        .nearest(&[0.0, 1.0], 1)
        .err()
        .expect("dimension mismatch");
    assert!(matches!(err, IndexError::DimensionMismatch { .. }));
}

#[test]
fn search_many_skips_short_and_repeated_terms() {
    let engine = sample_engine();
    let terms = vec![
        "ab".to_string(),
        "Wilmslow".to_string(),
        " Wilmslow ".to_string(),
        "SKU-200".to_string(),
    ];
    let evidence = engine.search_many(&terms, 2).expect("search_many");
    let searched = evidence
        .iter()
        .map(|entry| entry.term.as_str())
        .collect::<Vec<&str>>();
    assert_eq!(searched, vec!["Wilmslow", "SKU-200"]);
    assert!(evidence.iter().all(|entry| entry.hits.len() <= 2));
}

#[test]
fn summary_lists_terms_then_whole_question() {
    let engine = sample_engine();
    let bundle = EvidenceBundle {
        per_term: engine
            .search_many(&["Arlington".to_string()], 1)
            .expect("search_many"),
        whole_query: engine.search("who lives in Arlington", 1).expect("search"),
    };
    let summary = bundle.summary("who lives in Arlington");
    let term_at = summary.find("Arlington:").expect("term header");
    let question_at = summary
        .find("who lives in Arlington:")
        .expect("question header");
    assert!(term_at < question_at);
    assert!(summary.contains("\"similarity_score\""));
    assert_eq!(bundle.hit_count(), 2);
}

#[test]
fn snapshot_round_trip_is_exact() {
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = SnapshotPaths::from_base(&dir.path().join("evidence"));
    let engine = sample_engine();
    let built_from = source(engine.model_id(), &[]);

    persist(engine.index(), 3, &built_from, &paths).expect("persist");
    assert!(paths.both_exist());
    let restored = load(&paths, &built_from).expect("snapshot should load");
    assert_eq!(&restored.index, engine.index());
    assert_eq!(restored.skipped_rows, 3);

    let leftovers = fs::read_dir(dir.path())
        .expect("read dir")
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
        .count();
    assert_eq!(leftovers, 0);
}

#[test]
fn missing_companion_artifact_means_no_snapshot() {
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = SnapshotPaths::from_base(&dir.path().join("evidence"));
    let engine = sample_engine();
    let built_from = source(engine.model_id(), &[]);
    persist(engine.index(), 0, &built_from, &paths).expect("persist");

    fs::remove_file(&paths.metadata_path).expect("remove metadata");
    assert!(load(&paths, &built_from).is_none());
}

#[test]
fn tampered_index_blob_is_discarded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = SnapshotPaths::from_base(&dir.path().join("evidence"));
    let engine = sample_engine();
    let built_from = source(engine.model_id(), &[]);
    persist(engine.index(), 0, &built_from, &paths).expect("persist");

    let mut blob = fs::read(&paths.index_path).expect("read index");
    let last = blob.len() - 1;
    blob[last] ^= 0xFF;
    fs::write(&paths.index_path, blob).expect("write index");

    assert!(load(&paths, &built_from).is_none());
    assert!(!paths.index_path.exists());
    assert!(!paths.metadata_path.exists());
}

#[test]
fn unreadable_metadata_is_discarded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = SnapshotPaths::from_base(&dir.path().join("evidence"));
    let engine = sample_engine();
    let built_from = source(engine.model_id(), &[]);
    persist(engine.index(), 0, &built_from, &paths).expect("persist");

    fs::write(&paths.metadata_path, b"{ not json").expect("write metadata");
    assert!(load(&paths, &built_from).is_none());
    assert!(!paths.both_exist());
}

#[test]
fn snapshot_from_other_model_is_discarded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = SnapshotPaths::from_base(&dir.path().join("evidence"));
    let engine = sample_engine();
    persist(engine.index(), 0, &source(engine.model_id(), &[]), &paths).expect("persist");

    assert!(load(&paths, &source("some-other-model", &[])).is_none());
    assert!(!paths.both_exist());
}

#[test]
fn snapshot_from_other_database_or_tables_is_discarded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = SnapshotPaths::from_base(&dir.path().join("evidence"));
    let engine = sample_engine();
    let built_from = source(engine.model_id(), &["customers"]);

    persist(engine.index(), 0, &built_from, &paths).expect("persist");
    assert!(load(&paths, &source(engine.model_id(), &["products"])).is_none());
    assert!(!paths.both_exist());

    persist(engine.index(), 0, &built_from, &paths).expect("persist");
    let moved = SnapshotSource {
        db_path: "/data/other.sqlite".to_string(),
        ..built_from.clone()
    };
    assert!(load(&paths, &moved).is_none());

    persist(engine.index(), 0, &built_from, &paths).expect("persist");
    let rewritten = SnapshotSource {
        db_bytes: built_from.db_bytes + 4096,
        ..built_from.clone()
    };
    assert!(load(&paths, &rewritten).is_none());
}

#[test]
fn non_finite_reals_are_not_persisted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = SnapshotPaths::from_base(&dir.path().join("evidence"));
    let rows = vec![
        row("readings", &[("label", text("sensor overflow")), ("value", CellValue::Real(f64::INFINITY))]),
        row("readings", &[("label", text("sensor nominal")), ("value", CellValue::Real(1.5))]),
    ];
    let engine = EvidenceEngine::build(rows, embedder()).expect("engine should build");

    let err = persist(engine.index(), 0, &source(engine.model_id(), &[]), &paths)
        .err()
        .expect("persist must refuse");
    assert!(matches!(err, IndexError::Persist(_)));
    assert!(!paths.index_path.exists());
    assert!(!paths.metadata_path.exists());
}

#[test]
fn shared_evidence_initializes_once_under_contention() {
    let builds = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&builds);
    let shared = Arc::new(SharedEvidence::lazy(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_millis(20));
        EvidenceEngine::build(sample_rows(), embedder())
    }));

    let handles = (0..8)
        .map(|_| {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || shared.search("Alan Turing", 1).expect("search").len())
        })
        .collect::<Vec<_>>();
    for handle in handles {
        assert_eq!(handle.join().expect("thread"), 1);
    }

    assert_eq!(builds.load(Ordering::SeqCst), 1);
    assert!(shared.is_initialized());
}

#[test]
fn shared_evidence_retries_after_failed_load() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let shared = SharedEvidence::lazy(move || {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(IndexError::Unavailable("first load fails".to_string()))
        } else {
            EvidenceEngine::build(sample_rows(), embedder())
        }
    });

    assert!(shared.get().is_err());
    assert!(!shared.is_initialized());
    assert!(shared.get().is_ok());
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

fn write_fixture_db(path: &std::path::Path) {
    let connection = rusqlite::Connection::open(path).expect("open fixture db");
    connection
        .execute_batch(
            "
            CREATE TABLE products (id INTEGER PRIMARY KEY, name TEXT, photo BLOB);
            INSERT INTO products (name, photo) VALUES ('red running shoe', x'0102');
            INSERT INTO products (name, photo) VALUES ('blue rain jacket', NULL);
            CREATE TABLE empty_notes (body TEXT);
            INSERT INTO empty_notes (body) VALUES (NULL);
            ",
        )
        .expect("seed fixture db");
}

#[test]
fn corpus_reads_every_user_table_without_blobs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("shop.sqlite");
    write_fixture_db(&db_path);

    let connection = open_corpus_connection(&db_path).expect("open");
    assert_eq!(
        list_user_tables(&connection).expect("tables"),
        vec!["empty_notes".to_string(), "products".to_string()]
    );

    let corpus = load_corpus_rows(&connection, &[]).expect("corpus");
    assert_eq!(corpus.rows.len(), 3);
    let shoe = corpus
        .rows
        .iter()
        .find(|row| field(row, "name") == Some(&text("red running shoe")))
        .expect("shoe row");
    assert!(field(shoe, "photo").is_none());

    let filtered = load_corpus_rows(&connection, &["products".to_string()]).expect("corpus");
    assert_eq!(filtered.tables.len(), 1);
    assert_eq!(filtered.rows.len(), 2);
}

#[test]
fn load_or_build_rebuilds_then_reuses_snapshot() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("shop.sqlite");
    write_fixture_db(&db_path);
    let request = EvidenceLoadRequest {
        db_path: db_path.clone(),
        snapshot: SnapshotPaths::from_base(&dir.path().join("cache").join("evidence")),
        tables: Vec::new(),
        force_rebuild: false,
    };
    fs::create_dir_all(dir.path().join("cache")).expect("cache dir");

    let first = load_or_build(&request, embedder()).expect("first load");
    assert_eq!(first.origin, LoadOrigin::Rebuilt);
    assert_eq!(first.engine.index().len(), 2);
    assert_eq!(first.engine.skipped_rows(), 1);
    let products = first
        .tables
        .iter()
        .find(|table| table.table == "products")
        .expect("products count");
    assert_eq!(products.rows_embedded, 2);

    let second = load_or_build(&request, embedder()).expect("second load");
    assert_eq!(second.origin, LoadOrigin::Snapshot);
    assert_eq!(second.engine.index(), first.engine.index());
    assert_eq!(second.engine.skipped_rows(), 1);

    let forced = EvidenceLoadRequest {
        force_rebuild: true,
        ..request
    };
    let third = load_or_build(&forced, embedder()).expect("forced load");
    assert_eq!(third.origin, LoadOrigin::Rebuilt);
}

fn write_labelled_db(path: &std::path::Path, label: &str) {
    let connection = rusqlite::Connection::open(path).expect("open fixture db");
    connection
        .execute_batch(&format!(
            "
            CREATE TABLE a (note TEXT);
            INSERT INTO a (note) VALUES ('{label} alpha note');
            CREATE TABLE b (note TEXT);
            INSERT INTO b (note) VALUES ('{label} bravo note');
            INSERT INTO b (note) VALUES ('{label} bravo extra');
            "
        ))
        .expect("seed fixture db");
}

fn notes(loaded: &LoadedEvidence) -> Vec<String> {
    loaded
        .engine
        .index()
        .metadata()
        .iter()
        .filter_map(|row| field(row, "note").map(ToString::to_string))
        .collect()
}

#[test]
fn load_or_build_rebuilds_when_database_or_tables_change() {
    let dir = tempfile::tempdir().expect("tempdir");
    let one = dir.path().join("one.sqlite");
    let two = dir.path().join("two.sqlite");
    write_labelled_db(&one, "one");
    write_labelled_db(&two, "two");
    let request = EvidenceLoadRequest {
        db_path: one.clone(),
        snapshot: SnapshotPaths::from_base(&dir.path().join("evidence")),
        tables: vec!["a".to_string()],
        force_rebuild: false,
    };

    let first = load_or_build(&request, embedder()).expect("first load");
    assert_eq!(first.origin, LoadOrigin::Rebuilt);
    let again = load_or_build(&request, embedder()).expect("repeat load");
    assert_eq!(again.origin, LoadOrigin::Snapshot);

    let other_tables = EvidenceLoadRequest {
        tables: vec!["b".to_string()],
        ..request.clone()
    };
    let by_table = load_or_build(&other_tables, embedder()).expect("table change");
    assert_eq!(by_table.origin, LoadOrigin::Rebuilt);
    assert_eq!(notes(&by_table), vec!["one bravo note", "one bravo extra"]);

    let other_db = EvidenceLoadRequest {
        db_path: two.clone(),
        ..other_tables
    };
    let by_db = load_or_build(&other_db, embedder()).expect("database change");
    assert_eq!(by_db.origin, LoadOrigin::Rebuilt);
    assert!(notes(&by_db).iter().all(|note| note.starts_with("two")));
}

#[test]
fn load_or_build_warns_when_rows_cannot_be_persisted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("readings.sqlite");
    let connection = rusqlite::Connection::open(&db_path).expect("open fixture db");
    connection
        .execute_batch(
            "
            CREATE TABLE readings (label TEXT, value REAL);
            INSERT INTO readings VALUES ('overflow', 9e999);
            INSERT INTO readings VALUES ('nominal', 1.5);
            ",
        )
        .expect("seed fixture db");
    drop(connection);

    let request = EvidenceLoadRequest {
        db_path,
        snapshot: SnapshotPaths::from_base(&dir.path().join("evidence")),
        tables: Vec::new(),
        force_rebuild: false,
    };
    let loaded = load_or_build(&request, embedder()).expect("load");
    assert_eq!(loaded.origin, LoadOrigin::Rebuilt);
    assert_eq!(loaded.engine.index().len(), 2);
    assert_eq!(loaded.warnings.len(), 1);
    assert!(!request.snapshot.both_exist());
}

#[test]
fn load_or_build_reports_missing_database() {
    let dir = tempfile::tempdir().expect("tempdir");
    let request = EvidenceLoadRequest {
        db_path: dir.path().join("absent.sqlite"),
        snapshot: SnapshotPaths::from_base(&dir.path().join("evidence")),
        tables: Vec::new(),
        force_rebuild: false,
    };
    let err = load_or_build(&request, embedder()).err().expect("must fail");
    assert!(matches!(err, IndexError::Unavailable(_)));
}

proptest! {
    #[test]
    fn search_hits_are_bounded_and_ordered(query in "[a-z ]{0,24}", k in 0usize..8) {
        let engine = sample_engine();
        let hits = engine.search(&query, k).expect("search");
        prop_assert!(hits.len() <= k);
        for hit in &hits {
            prop_assert!(hit.similarity_score > 0.0 && hit.similarity_score <= 1.0);
        }
        for pair in hits.windows(2) {
            prop_assert!(pair[0].similarity_score >= pair[1].similarity_score);
        }
    }

    #[test]
    fn nearest_distances_match_brute_force(k in 1usize..5) {
        let engine = sample_engine();
        let dimensions = engine.index().dimensions();
        let vectors = engine.index().raw_vectors().chunks(dimensions).collect::<Vec<&[f32]>>();
        let query = vectors[1].to_vec();
        let neighbors = engine.index().nearest(&query, k).expect("nearest");
        prop_assert_eq!(neighbors[0].position, 1);
        for neighbor in neighbors {
            prop_assert_eq!(neighbor.distance, squared_l2_distance(&query, vectors[neighbor.position]));
        }
    }
}
