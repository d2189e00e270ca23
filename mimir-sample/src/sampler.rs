// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! Block-level table sampling.
//!
//! The sampler collects up to R rows per run through bounded key-range scans
//! without ever touching all table pages: no `SELECT *`, no unbounded ORDER
//! BY over the sampled column. Three strategies, tried in order:
//!
//! 1. numeric first-PK column: progressive range scans with an adaptive
//!    anchor step;
//! 2. non-numeric or composite PK: tuple keyset pagination anchored by
//!    bounded OFFSET probes;
//! 3. no PK at all: progressive OFFSET scans over the filter column.
//!
//! Every failure mode is non-fatal: the sampler shrinks its ambition and
//! returns whatever it has, annotated.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use mimir_core::frame::DataFrame;
use mimir_core::stats::PkEntry;
use mimir_core::value::SampleValue;
use mimir_core::StatsResult;

use crate::handle::DatabaseHandle;

/// Heuristic page-worth of rows used to derive the block layout.
const BLOCK_ROWS_APPROX: u64 = 128;
const MAX_BLOCKS: u64 = 64;
/// Anchor step bounds for the numeric path.
const STEP_MAX: i64 = 10_000;
const STEP_MIN: i64 = 100;
const MAX_CONSECUTIVE_EMPTY: u32 = 5;
const MAX_ATTEMPTS: u32 = 50;
/// Deep OFFSET cap shared by the keyset and fallback paths.
const OFFSET_CAP: u64 = 100_000;
const OFFSET_STEP: u64 = 1_000;

/// What one sampler run produced. Partial results are normal; `errors`
/// carries the block-level failures that shrank the run.
#[derive(Debug, Clone, Default)]
pub struct SampleOutcome {
    pub frame: DataFrame,
    pub block_sizes: Vec<usize>,
    pub errors: Vec<String>,
}

impl SampleOutcome {
    fn new(columns: &[&str]) -> SampleOutcome {
        SampleOutcome {
            frame: DataFrame::new(columns.iter().map(|c| c.to_string()).collect()),
            block_sizes: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Non-null values of one sampled column.
    pub fn values(&self, column: &str) -> Vec<SampleValue> {
        self.frame.non_null_column(column).unwrap_or_default()
    }

    fn absorb(&mut self, frame: DataFrame) {
        let rows = frame.len();
        if let Err(e) = self.frame.append(frame) {
            self.errors.push(e.to_string());
            return;
        }
        self.block_sizes.push(rows);
    }
}

pub struct BlockSampler<'a, H: DatabaseHandle> {
    handle: &'a H,
    cancel: Arc<AtomicBool>,
    deadline: Option<Duration>,
    seed: u64,
}

impl<'a, H: DatabaseHandle> BlockSampler<'a, H> {
    pub fn new(handle: &'a H) -> BlockSampler<'a, H> {
        BlockSampler {
            handle,
            cancel: Arc::new(AtomicBool::new(false)),
            deadline: None,
            seed: 0,
        }
    }

    /// Deadline applied to every SQL round trip of this run.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Shares the cooperative cancellation flag; setting it makes the run
    /// stop at the next block boundary and return the partial sample.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Samples one column; the single-column form of the public contract.
    pub fn sample(
        &self,
        db: &str,
        table: &str,
        column: &str,
        rows_target: u64,
    ) -> SampleOutcome {
        self.sample_columns(db, table, &[column], rows_target)
    }

    /// Draws up to `rows_target` joint rows over `columns`. The first column
    /// drives the `IS NOT NULL` filter, so every returned row carries a value
    /// for it; the other columns may contain nulls.
    pub fn sample_columns(
        &self,
        db: &str,
        table: &str,
        columns: &[&str],
        rows_target: u64,
    ) -> SampleOutcome {
        let rows_target = rows_target.max(1);
        let num_blocks = (rows_target / BLOCK_ROWS_APPROX).clamp(1, MAX_BLOCKS);
        let rows_per_block = (rows_target / num_blocks).max(1);
        let mut outcome = SampleOutcome::new(columns);

        let pk_cols = match self.handle.primary_key_columns(db, table) {
            Ok(cols) => cols,
            Err(e) => {
                debug!(error = %e, "primary key lookup failed, using offset fallback");
                outcome.errors.push(e.to_string());
                Vec::new()
            }
        };

        if pk_cols.is_empty() {
            self.sample_by_offset(db, table, columns, rows_target, rows_per_block, &mut outcome);
            return outcome;
        }

        if self.first_pk_is_numeric(db, table, &pk_cols[0]) {
            self.sample_numeric_range(
                db,
                table,
                columns,
                &pk_cols[0],
                rows_target,
                rows_per_block,
                &mut outcome,
            );
        } else {
            self.sample_keyset(
                db,
                table,
                columns,
                &pk_cols,
                rows_target,
                num_blocks,
                rows_per_block,
                &mut outcome,
            );
        }
        outcome
    }

    /// Single bounded probe deciding the strategy. All-negative numeric
    /// columns come back empty and are (wrongly but harmlessly) routed to the
    /// keyset path.
    fn first_pk_is_numeric(&self, db: &str, table: &str, pk: &str) -> bool {
        let sql = format!("SELECT {pk} FROM {db}.{table} WHERE {pk} >= 0 ORDER BY {pk} LIMIT 1");
        match self.handle.query_dataframe(&sql, self.deadline) {
            Ok(frame) => frame
                .non_null_column(pk)
                .and_then(|v| v.into_iter().next())
                .map(|v| matches!(v, SampleValue::Int(_) | SampleValue::Float(_)))
                .unwrap_or(false),
            Err(e) => {
                debug!(error = %e, "numeric probe failed");
                false
            }
        }
    }

    /// Progressive range sampling over a numeric PK prefix.
    #[allow(clippy::too_many_arguments)]
    fn sample_numeric_range(
        &self,
        db: &str,
        table: &str,
        columns: &[&str],
        pk: &str,
        rows_target: u64,
        rows_per_block: u64,
        outcome: &mut SampleOutcome,
    ) {
        let anchor = match self.probe_start_anchor(db, table, pk) {
            Some(a) => a,
            None => {
                outcome
                    .errors
                    .push("no starting anchor responded".to_string());
                return;
            }
        };

        let select_list = columns.join(", ");
        let filter = columns[0];
        let mut rng = StdRng::seed_from_u64(self.seed);
        // Seeded jitter keeps repeated runs from always walking the exact
        // same anchors.
        let mut step: i64 = BLOCK_ROWS_APPROX as i64 + rng.gen_range(0..BLOCK_ROWS_APPROX as i64);
        let mut anchor = anchor;
        let mut consecutive_empty = 0u32;
        let mut attempts = 0u32;

        while (outcome.frame.len() as u64) < rows_target
            && attempts < MAX_ATTEMPTS
            && consecutive_empty < MAX_CONSECUTIVE_EMPTY
        {
            if self.cancelled() {
                debug!("sampler cancelled between blocks");
                break;
            }
            attempts += 1;
            let sql = format!(
                "SELECT {select_list} FROM {db}.{table} \
                 WHERE {pk} >= {anchor} AND {filter} IS NOT NULL \
                 ORDER BY {pk} LIMIT {rows_per_block}"
            );
            let block = match self.handle.query_dataframe(&sql, self.deadline) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "block query failed, keeping partial sample");
                    outcome.errors.push(e.to_string());
                    break;
                }
            };

            let block_len = block.len() as u64;
            outcome.absorb(block);
            anchor += step;
            if block_len == rows_per_block {
                consecutive_empty = 0;
                step = (step * 2).min(STEP_MAX);
            } else if block_len == 0 {
                consecutive_empty += 1;
                step = (step / 2).max(STEP_MIN);
            } else {
                // A short, non-empty block means the scan ran off the end of
                // the data.
                break;
            }
        }
    }

    /// Probes a small fan of starting anchors and keeps the first that has a
    /// row above it.
    fn probe_start_anchor(&self, db: &str, table: &str, pk: &str) -> Option<i64> {
        for anchor in [0i64, -1_000, 1_000, -10_000, 10_000] {
            if self.cancelled() {
                return None;
            }
            let sql = format!(
                "SELECT {pk} FROM {db}.{table} WHERE {pk} >= {anchor} ORDER BY {pk} LIMIT 1"
            );
            match self.handle.query_dataframe(&sql, self.deadline) {
                Ok(frame) if !frame.is_empty() => return Some(anchor),
                Ok(_) => continue,
                Err(e) => {
                    debug!(anchor, error = %e, "anchor probe failed");
                    continue;
                }
            }
        }
        None
    }

    /// Tuple keyset pagination for non-numeric or composite PKs. Each block
    /// costs at most two catalog queries: one bounded OFFSET probe for the
    /// anchor tuple and one range fetch.
    #[allow(clippy::too_many_arguments)]
    fn sample_keyset(
        &self,
        db: &str,
        table: &str,
        columns: &[&str],
        pk_cols: &[String],
        rows_target: u64,
        num_blocks: u64,
        rows_per_block: u64,
        outcome: &mut SampleOutcome,
    ) {
        let estimated_rows = match self.handle.table_meta(db, table) {
            Ok(meta) => meta.rows,
            Err(e) => {
                debug!(error = %e, "table meta unavailable, using offset fallback");
                outcome.errors.push(e.to_string());
                self.sample_by_offset(db, table, columns, rows_target, rows_per_block, outcome);
                return;
            }
        };

        let stride = (estimated_rows / (num_blocks + 1)).max(1);
        let pk_list = pk_cols.join(", ");
        let select_list = columns.join(", ");
        let filter = columns[0];

        for block_no in 1..=num_blocks {
            if self.cancelled() || (outcome.frame.len() as u64) >= rows_target {
                break;
            }
            let offset = ((block_no - 1) * stride).min(OFFSET_CAP);
            let probe_sql = format!(
                "SELECT {pk_list} FROM {db}.{table} ORDER BY {pk_list} LIMIT 1 OFFSET {offset}"
            );
            let anchor_row = match self.handle.query_dataframe(&probe_sql, self.deadline) {
                Ok(frame) if !frame.is_empty() => frame,
                Ok(_) => break, // ran off the end of the table
                Err(e) => {
                    outcome.errors.push(e.to_string());
                    continue;
                }
            };

            let anchor_tuple: Option<Vec<SampleValue>> = pk_cols
                .iter()
                .map(|c| {
                    anchor_row
                        .non_null_column(c)
                        .and_then(|v| v.into_iter().next())
                })
                .collect();
            let anchor_tuple = match anchor_tuple {
                Some(t) => t,
                None => continue,
            };
            let literals = anchor_tuple
                .iter()
                .map(|v| v.sql_literal())
                .collect::<Vec<_>>()
                .join(", ");

            let fetch_sql = format!(
                "SELECT {select_list} FROM {db}.{table} \
                 WHERE ({pk_list}) >= ({literals}) AND {filter} IS NOT NULL \
                 ORDER BY {pk_list} LIMIT {rows_per_block}"
            );
            match self.handle.query_dataframe(&fetch_sql, self.deadline) {
                Ok(block) => outcome.absorb(block),
                Err(e) => {
                    warn!(error = %e, "keyset block failed, keeping partial sample");
                    outcome.errors.push(e.to_string());
                    break;
                }
            }
        }
    }

    /// No-PK fallback: progressive OFFSET scans over the filter column,
    /// deliberately without any ORDER BY so the server never sorts the table.
    fn sample_by_offset(
        &self,
        db: &str,
        table: &str,
        columns: &[&str],
        rows_target: u64,
        rows_per_block: u64,
        outcome: &mut SampleOutcome,
    ) {
        let select_list = columns.join(", ");
        let filter = columns[0];
        let mut offset = 0u64;
        let mut attempts = 0u32;

        while (outcome.frame.len() as u64) < rows_target
            && offset <= OFFSET_CAP
            && attempts < MAX_ATTEMPTS
        {
            if self.cancelled() {
                debug!("sampler cancelled between blocks");
                break;
            }
            attempts += 1;
            let sql = format!(
                "SELECT {select_list} FROM {db}.{table} \
                 WHERE {filter} IS NOT NULL LIMIT {rows_per_block} OFFSET {offset}"
            );
            match self.handle.query_dataframe(&sql, self.deadline) {
                Ok(block) if block.is_empty() => break,
                Ok(block) => outcome.absorb(block),
                Err(e) => {
                    warn!(error = %e, "offset block failed, keeping partial sample");
                    outcome.errors.push(e.to_string());
                    break;
                }
            }
            offset += OFFSET_STEP;
        }
    }

    /// Min and max PK tuples via two bounded single-row scans.
    pub fn probe_pk_bounds(
        &self,
        db: &str,
        table: &str,
        pk_cols: &[String],
    ) -> StatsResult<(Vec<PkEntry>, Vec<PkEntry>)> {
        let min = self.pk_bound(db, table, pk_cols, false)?;
        let max = self.pk_bound(db, table, pk_cols, true)?;
        Ok((min, max))
    }

    fn pk_bound(
        &self,
        db: &str,
        table: &str,
        pk_cols: &[String],
        descending: bool,
    ) -> StatsResult<Vec<PkEntry>> {
        let pk_list = pk_cols.join(", ");
        let order = if descending {
            pk_cols
                .iter()
                .map(|c| format!("{c} DESC"))
                .collect::<Vec<_>>()
                .join(", ")
        } else {
            pk_list.clone()
        };
        let sql = format!("SELECT {pk_list} FROM {db}.{table} ORDER BY {order} LIMIT 1");
        let frame = self.handle.query_dataframe(&sql, self.deadline)?;
        Ok(pk_cols
            .iter()
            .filter_map(|c| {
                frame
                    .non_null_column(c)
                    .and_then(|v| v.into_iter().next())
                    .map(|v| PkEntry {
                        column_name: c.clone(),
                        value: v.encode(),
                    })
            })
            .collect())
    }
}
