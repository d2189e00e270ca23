// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

mod common;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use assert_approx_eq::assert_approx_eq;

use common::MockDb;
use mimir_core::config::StatsConfig;
use mimir_core::histogram::HistogramType;
use mimir_core::ndv::multi::MultiColumnMethod;
use mimir_core::value::SampleValue;
use mimir_sample::pipeline::analyze_tables;
use mimir_sample::{BlockSampler, TableAnalyzer};

fn int_cell(v: i64) -> Option<SampleValue> {
    Some(SampleValue::Int(v))
}

/// A config that keeps the adaptive loop quiet so tests drive it explicitly.
fn relaxed_config() -> StatsConfig {
    StatsConfig {
        delta_req: 100.0,
        ..Default::default()
    }
}

fn tiny_distinct_db() -> MockDb {
    let values = [1i64, 2, 3, 4, 5, 6, 7, 8, 9, 10, 1, 2];
    let mut db = MockDb::new();
    db.add_table(
        "testdb",
        "tiny",
        vec![("id", "bigint"), ("v", "int")],
        vec!["id"],
        10_000,
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| vec![int_cell(i as i64 + 1), int_cell(v)])
            .collect(),
    );
    db
}

#[test]
fn tiny_distinct_end_to_end() {
    let db = tiny_distinct_db();
    let stats = TableAnalyzer::new(&db, relaxed_config())
        .analyze("testdb", "tiny")
        .unwrap();

    assert!(stats.is_sample_success);
    assert_eq!(stats.sample_rows, 12);
    assert!(stats.ndv_dict["v"] >= 10.0);

    let hist = &stats.histogram_dict["v"];
    assert_eq!(hist.histogram_type, HistogramType::Singleton);
    assert_eq!(hist.buckets.len(), 10);
    assert_approx_eq!(hist.buckets.last().unwrap().cum_freq, 1.0, 1e-9);
    assert_eq!(hist.buckets.iter().map(|b| b.size).sum::<u64>(), 12);

    assert_approx_eq!(stats.not_null_ratio_dict["v"], 1.0, 1e-9);
    assert_eq!(stats.min_pk[0].column_name, "id");
    assert_eq!(stats.min_pk[0].value, "1");
    assert_eq!(stats.max_pk[0].value, "12");
}

#[test]
fn pipeline_is_idempotent() {
    let db = tiny_distinct_db();
    let a = TableAnalyzer::new(&db, relaxed_config())
        .analyze("testdb", "tiny")
        .unwrap();
    let b = TableAnalyzer::new(&db, relaxed_config())
        .analyze("testdb", "tiny")
        .unwrap();
    assert_eq!(
        serde_json::to_string(&a).unwrap(),
        serde_json::to_string(&b).unwrap()
    );
}

fn wide_table_db() -> MockDb {
    let mut db = MockDb::new();
    db.add_table(
        "testdb",
        "wide",
        vec![("id", "bigint"), ("v", "int")],
        vec!["id"],
        10_000,
        (0..10_000i64)
            .map(|i| vec![int_cell(i), int_cell(i % 50)])
            .collect(),
    );
    db
}

#[test]
fn failing_block_keeps_partial_sample() {
    let db = wide_table_db();
    db.fail_block_fetch(3);

    let stats = TableAnalyzer::new(&db, relaxed_config())
        .analyze("testdb", "wide")
        .unwrap();

    // Two blocks survived; the pipeline absorbed the failure.
    assert!(stats.is_sample_success);
    assert!(stats.sample_rows > 0);
    assert!(stats.sample_rows < 10_000);
    assert_eq!(stats.block_size_list.len(), 2);
    let annotation = stats.sample_error_dict.get("id").expect("block error recorded");
    assert!(annotation.contains("injected failure"));
    // Statistics still came out for both columns.
    assert!(stats.ndv_dict.contains_key("v"));
    assert!(!stats.histogram_dict["v"].is_empty());
}

#[test]
fn cancellation_between_blocks_returns_partial_sample() {
    let db = wide_table_db();
    let sampler = BlockSampler::new(&db);
    let flag: Arc<AtomicBool> = sampler.cancel_flag();
    db.cancel_after_blocks(2, flag);

    let outcome = sampler.sample("testdb", "wide", "id", 5_000);
    // Exactly the two blocks fetched before the flag was raised.
    assert_eq!(outcome.block_sizes.len(), 2);
    assert_eq!(
        outcome.frame.len(),
        outcome.block_sizes.iter().sum::<usize>()
    );
    assert!(outcome.frame.len() > 0);
    assert!(outcome.frame.len() < 5_000);
    assert!(outcome.errors.is_empty());
    // The partial frame is a well-formed sample.
    assert_eq!(outcome.values("id").len(), outcome.frame.len());
}

#[test]
fn no_pk_table_uses_offset_scans() {
    let mut db = MockDb::new();
    db.add_table(
        "testdb",
        "heap",
        vec![("v", "int")],
        vec![],
        500,
        (0..500i64).map(|i| vec![int_cell(i % 20)]).collect(),
    );

    let stats = TableAnalyzer::new(&db, relaxed_config())
        .analyze("testdb", "heap")
        .unwrap();
    assert!(stats.sample_rows > 0);
    assert!(stats.min_pk.is_empty());
    assert!(db
        .logged_queries()
        .iter()
        .any(|q| q.contains("OFFSET") && !q.contains("ORDER BY")));
    // The forbidden full-scan shapes never show up.
    assert!(db.logged_queries().iter().all(|q| !q.starts_with("SELECT *")));
}

#[test]
fn string_pk_takes_keyset_path() {
    let mut db = MockDb::new();
    db.add_table(
        "testdb",
        "codes",
        vec![("code", "varchar"), ("v", "int")],
        vec!["code"],
        300,
        (0..300i64)
            .map(|i| {
                vec![
                    Some(SampleValue::Str(format!("c{i:03}"))),
                    int_cell(i % 7),
                ]
            })
            .collect(),
    );

    let sampler = BlockSampler::new(&db);
    let outcome = sampler.sample_columns("testdb", "codes", &["code", "v"], 120);
    assert_eq!(outcome.frame.len(), 120);
    assert!(outcome.errors.is_empty());

    // The fetch used a quoted tuple anchor.
    let queries = db.logged_queries();
    assert!(queries
        .iter()
        .any(|q| q.contains("WHERE (code) >= ('c000')")));
}

#[test]
fn null_cells_shape_not_null_ratio() {
    let mut db = MockDb::new();
    // No PK, so the sampler reads one deterministic OFFSET block; v2 is null
    // on every odd row.
    db.add_table(
        "testdb",
        "holes",
        vec![("v1", "bigint"), ("v2", "int")],
        vec![],
        400,
        (0..400i64)
            .map(|i| {
                vec![
                    int_cell(i),
                    if i % 2 == 0 { int_cell(i % 5) } else { None },
                ]
            })
            .collect(),
    );

    let stats = TableAnalyzer::new(&db, relaxed_config())
        .analyze("testdb", "holes")
        .unwrap();
    assert_approx_eq!(stats.not_null_ratio_dict["v2"], 0.5, 1e-9);
    assert_approx_eq!(stats.not_null_ratio_dict["v1"], 1.0, 1e-9);
}

#[test]
fn unsupported_column_type_is_annotated_not_fatal() {
    let mut db = MockDb::new();
    db.add_table(
        "testdb",
        "mixed",
        vec![("id", "bigint"), ("shape", "geometry")],
        vec!["id"],
        100,
        (0..100i64).map(|i| vec![int_cell(i), None]).collect(),
    );

    let stats = TableAnalyzer::new(&db, relaxed_config())
        .analyze("testdb", "mixed")
        .unwrap();
    assert!(stats.is_sample_success);
    assert!(stats.sample_error_dict["shape"].contains("unsupported data type"));
    assert!(stats.ndv_dict.contains_key("id"));
    assert!(!stats.ndv_dict.contains_key("shape"));
}

#[test]
fn unknown_method_key_is_fatal() {
    let db = tiny_distinct_db();
    let config = StatsConfig {
        ndv_method: "not-a-method".to_string(),
        ..relaxed_config()
    };
    assert!(TableAnalyzer::new(&db, config)
        .analyze("testdb", "tiny")
        .is_err());
}

#[test]
fn missing_table_degrades_to_marked_record() {
    let db = MockDb::new();
    let stats = TableAnalyzer::new(&db, relaxed_config())
        .analyze("testdb", "ghost")
        .unwrap();
    assert!(!stats.is_sample_success);
    assert!(stats.unsupported_reason.is_some());
    assert!(stats.ndv_dict.is_empty());
}

#[test]
fn joint_ndv_over_two_columns() {
    let mut db = MockDb::new();
    // (a, b) = (i % 4, i % 10): 20 distinct pairs over the 400-row table.
    db.add_table(
        "testdb",
        "pairs",
        vec![("id", "bigint"), ("a", "int"), ("b", "int")],
        vec!["id"],
        400,
        (0..400i64)
            .map(|i| vec![int_cell(i), int_cell(i % 4), int_cell(i % 10)])
            .collect(),
    );

    let analyzer = TableAnalyzer::new(&db, relaxed_config());
    let ndv = analyzer
        .joint_ndv(
            "testdb",
            "pairs",
            &["a", "b"],
            MultiColumnMethod::Estimator(mimir_core::ndv::NdvMethod::Gee),
        )
        .unwrap();
    // Every pair repeats heavily in the sample, so GEE stays near the true
    // joint count of 20 and far from the single-column counts.
    assert!(ndv >= 20.0);
    assert!(ndv <= 400.0);
}

#[test]
fn batch_driver_covers_every_table() {
    let mut db = MockDb::new();
    for name in ["t1", "t2", "t3"] {
        db.add_table(
            "testdb",
            name,
            vec![("id", "bigint"), ("v", "int")],
            vec!["id"],
            1000,
            (0..1000i64).map(|i| vec![int_cell(i), int_cell(i % 11)]).collect(),
        );
    }
    let tables: Vec<(String, String)> = ["t1", "t2", "t3"]
        .iter()
        .map(|t| ("testdb".to_string(), t.to_string()))
        .collect();

    let results = analyze_tables(&db, &relaxed_config(), &tables).unwrap();
    assert_eq!(results.len(), 3);
    for stats in &results {
        assert!(stats.is_sample_success);
        assert!(stats.ndv_dict["v"] >= 11.0);
    }
}
