// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! An in-memory database handle that understands exactly the query shapes
//! the block sampler emits: bounded probes, range fetches, keyset fetches and
//! OFFSET scans. Fault injection hooks let tests fail or cancel a run at a
//! chosen block boundary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mimir_core::frame::DataFrame;
use mimir_core::value::SampleValue;
use mimir_core::{StatsError, StatsResult};
use mimir_sample::handle::{ColumnMeta, DatabaseHandle, TableMeta};

pub struct MockTable {
    pub meta: TableMeta,
    pub pk: Vec<String>,
    /// Rows in PK-ascending order, columns matching `meta.columns`.
    pub rows: Vec<Vec<Option<SampleValue>>>,
}

#[derive(Default)]
pub struct MockDb {
    tables: HashMap<(String, String), MockTable>,
    pub query_log: Mutex<Vec<String>>,
    /// Fail the nth (1-based) block fetch, counted over queries that carry an
    /// `IS NOT NULL` filter.
    fail_block: Mutex<Option<u32>>,
    /// Raise the given flag after this many block fetches.
    cancel_after: Mutex<Option<(u32, Arc<AtomicBool>)>>,
    block_queries: Mutex<u32>,
}

impl MockDb {
    pub fn new() -> MockDb {
        MockDb::default()
    }

    pub fn add_table(
        &mut self,
        db: &str,
        table: &str,
        columns: Vec<(&str, &str)>,
        pk: Vec<&str>,
        estimated_rows: u64,
        rows: Vec<Vec<Option<SampleValue>>>,
    ) {
        let meta = TableMeta {
            rows: estimated_rows,
            columns: columns
                .into_iter()
                .map(|(name, data_type)| ColumnMeta {
                    name: name.to_string(),
                    data_type: data_type.to_string(),
                })
                .collect(),
        };
        self.tables.insert(
            (db.to_string(), table.to_string()),
            MockTable {
                meta,
                pk: pk.into_iter().map(|c| c.to_string()).collect(),
                rows,
            },
        );
    }

    pub fn fail_block_fetch(&self, nth: u32) {
        *self.fail_block.lock().unwrap() = Some(nth);
    }

    pub fn cancel_after_blocks(&self, blocks: u32, flag: Arc<AtomicBool>) {
        *self.cancel_after.lock().unwrap() = Some((blocks, flag));
    }

    pub fn logged_queries(&self) -> Vec<String> {
        self.query_log.lock().unwrap().clone()
    }

    fn run(&self, sql: &str) -> StatsResult<DataFrame> {
        let select_list = between(sql, "SELECT ", " FROM ")
            .ok_or_else(|| StatsError::Query(format!("unparsable query: {sql}")))?;
        let table_ref = after(sql, " FROM ")
            .and_then(|rest| rest.split_whitespace().next())
            .ok_or_else(|| StatsError::Query(format!("missing table: {sql}")))?;
        let (db, table) = table_ref
            .split_once('.')
            .ok_or_else(|| StatsError::Query(format!("unqualified table: {table_ref}")))?;
        let t = self
            .tables
            .get(&(db.to_string(), table.to_string()))
            .ok_or_else(|| StatsError::Query(format!("unknown table {table_ref}")))?;

        let limit = number_after(sql, " LIMIT ");
        let offset = number_after(sql, " OFFSET ").unwrap_or(0);
        let descending = sql.contains(" DESC");

        let mut rows: Vec<&Vec<Option<SampleValue>>> = t.rows.iter().collect();
        let where_clause =
            between(sql, " WHERE ", " ORDER BY ").or_else(|| between(sql, " WHERE ", " LIMIT "));
        if let Some(clause) = where_clause {
            for cond in clause.split(" AND ") {
                if cond.starts_with('(') {
                    // Tuple keyset: "(pk, ...) >= (lit, ...)". The first
                    // component decides for these fixtures.
                    let literals = between(cond, ">= (", ")")
                        .ok_or_else(|| StatsError::Query(format!("bad tuple cond: {cond}")))?;
                    let anchor = parse_literal(literals.split(", ").next().unwrap());
                    let idx = column_index(t, &t.pk[0])?;
                    rows.retain(|r| r[idx].as_ref().is_some_and(|v| *v >= anchor));
                } else if let Some((col, lit)) = cond.split_once(" >= ") {
                    let anchor = parse_literal(lit.trim());
                    let idx = column_index(t, col.trim())?;
                    rows.retain(|r| r[idx].as_ref().is_some_and(|v| *v >= anchor));
                } else if let Some(col) = cond.strip_suffix(" IS NOT NULL") {
                    let idx = column_index(t, col.trim())?;
                    rows.retain(|r| r[idx].is_some());
                } else {
                    return Err(StatsError::Query(format!("unsupported condition: {cond}")));
                }
            }
        }

        if descending {
            rows.reverse();
        }

        let names: Vec<String> = select_list.split(", ").map(|c| c.to_string()).collect();
        let idxs: Vec<usize> = names
            .iter()
            .map(|c| column_index(t, c))
            .collect::<StatsResult<_>>()?;
        let projected: Vec<Vec<Option<SampleValue>>> = rows
            .into_iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .map(|r| idxs.iter().map(|&i| r[i].clone()).collect())
            .collect();
        DataFrame::from_rows(names, projected)
    }
}

impl DatabaseHandle for MockDb {
    fn query_dataframe(&self, sql: &str, _deadline: Option<Duration>) -> StatsResult<DataFrame> {
        self.query_log.lock().unwrap().push(sql.to_string());

        if sql.contains(" IS NOT NULL") {
            let mut count = self.block_queries.lock().unwrap();
            *count += 1;
            if let Some(nth) = *self.fail_block.lock().unwrap() {
                if *count == nth {
                    return Err(StatsError::Query(format!("injected failure at block {nth}")));
                }
            }
            if let Some((blocks, flag)) = self.cancel_after.lock().unwrap().as_ref() {
                if *count >= *blocks {
                    flag.store(true, Ordering::Relaxed);
                }
            }
        }
        self.run(sql)
    }

    fn table_meta(&self, db: &str, table: &str) -> StatsResult<TableMeta> {
        self.tables
            .get(&(db.to_string(), table.to_string()))
            .map(|t| t.meta.clone())
            .ok_or_else(|| StatsError::MetadataUnavailable(format!("{db}.{table}")))
    }

    fn primary_key_columns(&self, db: &str, table: &str) -> StatsResult<Vec<String>> {
        self.tables
            .get(&(db.to_string(), table.to_string()))
            .map(|t| t.pk.clone())
            .ok_or_else(|| StatsError::MetadataUnavailable(format!("{db}.{table}")))
    }
}

fn column_index(t: &MockTable, name: &str) -> StatsResult<usize> {
    t.meta
        .columns
        .iter()
        .position(|c| c.name == name)
        .ok_or_else(|| StatsError::Query(format!("unknown column {name}")))
}

fn parse_literal(raw: &str) -> SampleValue {
    if let Some(inner) = raw.strip_prefix('\'').and_then(|r| r.strip_suffix('\'')) {
        SampleValue::Str(inner.replace("''", "'"))
    } else if raw.contains('.') {
        SampleValue::float(raw.parse().unwrap())
    } else {
        SampleValue::Int(raw.parse().unwrap())
    }
}

fn between<'a>(s: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let i = s.find(start)? + start.len();
    let j = s[i..].find(end)? + i;
    Some(&s[i..j])
}

fn after<'a>(s: &'a str, needle: &str) -> Option<&'a str> {
    s.find(needle).map(|i| &s[i + needle.len()..])
}

fn number_after(s: &str, needle: &str) -> Option<usize> {
    after(s, needle)?
        .split_whitespace()
        .next()?
        .parse()
        .ok()
}
