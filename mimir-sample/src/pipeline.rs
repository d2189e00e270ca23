// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! Per-table orchestration: sample → validate → estimate → histogram →
//! assemble the statistics record.
//!
//! A single column's failure never aborts its table; it degrades to an entry
//! in the record's error annotations. Only configuration mistakes (an
//! unknown method key) are fatal. Tables are independent, so the multi-table
//! driver fans out over rayon.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use mimir_core::config::StatsConfig;
use mimir_core::frame::DataFrame;
use mimir_core::histogram::HistogramBuilder;
use mimir_core::ndv::multi::{estimate_multi_columns, MultiColumnMethod};
use mimir_core::ndv::{NdvEstimator, NdvMethod, INSUFFICIENT_NDV};
use mimir_core::profile::FrequencyProfile;
use mimir_core::stats::TableStatistics;
use mimir_core::twophase::{AdaptiveController, Decision, TwoPhaseConfig};
use mimir_core::value::{DataTypeTag, SampleValue};
use mimir_core::StatsResult;

use mimir_models::plm4ndv::{ColumnInput, HashProjectionEncoder, SentenceEncoder};
use mimir_models::registry::MODELS;

use crate::handle::DatabaseHandle;
use crate::sampler::BlockSampler;

struct ColumnPrep {
    name: String,
    raw_type: String,
    tag: DataTypeTag,
    values: Vec<SampleValue>,
    profile: FrequencyProfile,
}

pub struct TableAnalyzer<'a, H: DatabaseHandle> {
    handle: &'a H,
    config: StatsConfig,
    cancel: Arc<AtomicBool>,
    deadline: Option<Duration>,
    seed: u64,
}

impl<'a, H: DatabaseHandle> TableAnalyzer<'a, H> {
    pub fn new(handle: &'a H, config: StatsConfig) -> TableAnalyzer<'a, H> {
        TableAnalyzer {
            handle,
            config,
            cancel: Arc::new(AtomicBool::new(false)),
            deadline: None,
            seed: 0,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Cooperative cancellation flag shared with every sampler run this
    /// analyzer starts.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Produces the statistics record for one table, using the deterministic
    /// built-in description encoder for the PLM path.
    pub fn analyze(&self, db: &str, table: &str) -> StatsResult<TableStatistics> {
        self.analyze_with_encoder(db, table, &HashProjectionEncoder)
    }

    /// As [`analyze`](Self::analyze), with a caller-supplied sentence encoder
    /// for PLM4NDV column descriptions.
    pub fn analyze_with_encoder(
        &self,
        db: &str,
        table: &str,
        encoder: &dyn SentenceEncoder,
    ) -> StatsResult<TableStatistics> {
        // Unknown method keys are the one fatal error.
        let method = self.config.method()?;

        let mut stats = TableStatistics::new(db, table);
        let meta = match self.handle.table_meta(db, table) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(db, table, error = %e, "table metadata unavailable");
                stats.is_sample_success = false;
                stats.unsupported_reason = Some(e.to_string());
                return Ok(stats);
            }
        };
        stats.num_of_rows = meta.rows;

        // Columns the engine can type; the rest are annotated and skipped.
        let mut eligible: Vec<(String, String, DataTypeTag)> = Vec::new();
        for col in &meta.columns {
            match DataTypeTag::from_column_type(&col.data_type) {
                Some(tag) => eligible.push((col.name.clone(), col.data_type.clone(), tag)),
                None => {
                    stats.sample_error_dict.insert(
                        col.name.clone(),
                        format!("unsupported data type: {}", col.data_type),
                    );
                }
            }
        }
        if eligible.is_empty() {
            stats.is_sample_success = false;
            stats.unsupported_reason = Some("no supported columns".to_string());
            return Ok(stats);
        }

        let frame = self.collect_sample(db, table, &eligible, &mut stats);
        stats.sample_rows = frame.len() as u64;

        let preps = self.prepare_columns(&frame, &eligible);
        self.fill_ndv(&mut stats, &preps, frame.len() as u64, method, encoder);
        self.fill_histograms(&mut stats, &preps);
        for prep in &preps {
            if let Some(ratio) = frame.not_null_ratio(&prep.name) {
                stats.not_null_ratio_dict.insert(prep.name.clone(), ratio);
            }
        }

        self.fill_pk_bounds(db, table, &mut stats);
        info!(
            db,
            table,
            sample_rows = stats.sample_rows,
            columns = preps.len(),
            "table statistics assembled"
        );
        Ok(stats)
    }

    /// Joint NDV over a column combination, e.g. for index statistics. Draws
    /// a fresh joint sample over exactly the target columns and runs the
    /// requested multi-column estimator on the tuple stream.
    pub fn joint_ndv(
        &self,
        db: &str,
        table: &str,
        columns: &[&str],
        method: MultiColumnMethod,
    ) -> StatsResult<f64> {
        let meta = self.handle.table_meta(db, table)?;
        let sampler = BlockSampler::new(self.handle)
            .with_deadline(self.deadline)
            .with_seed(self.seed)
            .with_cancel(self.cancel.clone());
        let outcome = sampler.sample_columns(db, table, columns, self.config.rows_target);
        Ok(estimate_multi_columns(
            &outcome.frame,
            columns,
            meta.rows,
            method,
        ))
    }

    /// Initial sampling plus the 2PHASE extension loop.
    fn collect_sample(
        &self,
        db: &str,
        table: &str,
        eligible: &[(String, String, DataTypeTag)],
        stats: &mut TableStatistics,
    ) -> DataFrame {
        let columns: Vec<&str> = eligible.iter().map(|(name, _, _)| name.as_str()).collect();
        let sampler = BlockSampler::new(self.handle)
            .with_deadline(self.deadline)
            .with_seed(self.seed)
            .with_cancel(self.cancel.clone());

        let mut controller = AdaptiveController::new(TwoPhaseConfig {
            delta_req: self.config.delta_req,
            lmax: self.config.lmax,
            bucket_len: self.config.bucket_len,
            max_sample_rows: self.config.max_sample_rows,
        });

        let initial = controller.initial_request(self.config.rows_target);
        let mut outcome = sampler.sample_columns(db, table, &columns, initial);

        // Each extension round costs another sampler pass over the table, so
        // a validation curve that refuses to flatten is cut off here.
        const MAX_EXTEND_ROUNDS: u32 = 4;
        let mut rounds = 0u32;
        loop {
            match controller.assess(&outcome.frame) {
                Decision::Done => break,
                Decision::Truncated { required_rows } => {
                    stats.unsupported_reason = Some(format!(
                        "sample truncated at {} rows; validation asked for {}",
                        outcome.frame.len(),
                        required_rows
                    ));
                    break;
                }
                Decision::Extend { additional_rows } => {
                    rounds += 1;
                    if rounds > MAX_EXTEND_ROUNDS {
                        stats.unsupported_reason = Some(format!(
                            "adaptive sampling stopped after {MAX_EXTEND_ROUNDS} extensions"
                        ));
                        break;
                    }
                    debug!(additional_rows, "extending sample");
                    let extra = sampler.sample_columns(db, table, &columns, additional_rows);
                    let grew = !extra.frame.is_empty();
                    outcome.block_sizes.extend(extra.block_sizes);
                    outcome.errors.extend(extra.errors);
                    if let Err(e) = outcome.frame.append(extra.frame) {
                        outcome.errors.push(e.to_string());
                        break;
                    }
                    if !grew {
                        // The table has nothing more to give; stop asking.
                        stats.unsupported_reason =
                            Some("sample extension returned no rows".to_string());
                        break;
                    }
                }
            }
        }

        if !outcome.errors.is_empty() {
            // Degraded blocks are annotated under the filter column that
            // drove the scan; the sample itself stays usable.
            stats
                .sample_error_dict
                .insert(columns[0].to_string(), outcome.errors.join("; "));
        }
        stats.block_size_list = outcome.block_sizes.clone();
        outcome.frame
    }

    fn prepare_columns(
        &self,
        frame: &DataFrame,
        eligible: &[(String, String, DataTypeTag)],
    ) -> Vec<ColumnPrep> {
        eligible
            .iter()
            .map(|(name, raw_type, tag)| {
                let values = frame.non_null_column(name).unwrap_or_default();
                let profile = FrequencyProfile::build(&values);
                ColumnPrep {
                    name: name.clone(),
                    raw_type: raw_type.clone(),
                    tag: *tag,
                    values,
                    profile,
                }
            })
            .collect()
    }

    /// NDV per column. The sample size fed to the estimators is the frame
    /// length, nulls included, matching how the scale factor is consumed by
    /// the planner.
    fn fill_ndv(
        &self,
        stats: &mut TableStatistics,
        preps: &[ColumnPrep],
        sample_rows: u64,
        method: NdvMethod,
        encoder: &dyn SentenceEncoder,
    ) {
        let table_rows = stats.num_of_rows;

        if method == NdvMethod::Plm {
            let predictions = self.plm_predictions(preps, table_rows, encoder);
            for (prep, ndv) in preps.iter().zip(predictions) {
                stats.ndv_dict.insert(prep.name.clone(), ndv);
            }
            return;
        }

        let estimator = NdvEstimator::new(table_rows);
        for prep in preps {
            if prep.values.len() < 2 {
                stats.ndv_dict.insert(prep.name.clone(), INSUFFICIENT_NDV);
                continue;
            }
            let ndv = match method {
                NdvMethod::Ada => match MODELS.adandv(self.config.adandv_model_path.as_deref()) {
                    Some(model) => model.estimate(table_rows, sample_rows, &prep.profile),
                    None => estimator.estimate(sample_rows, &prep.profile, NdvMethod::Gee),
                },
                NdvMethod::Ls => match MODELS.ls(self.config.ls_model_path.as_deref()) {
                    Some(model) => model.predict(&prep.profile, table_rows),
                    None => estimator.estimate(sample_rows, &prep.profile, NdvMethod::Gee),
                },
                closed_form => estimator.estimate(sample_rows, &prep.profile, closed_form),
            };
            stats.ndv_dict.insert(prep.name.clone(), ndv);
        }
    }

    /// PLM4NDV runs per table, contextualising every column at once.
    fn plm_predictions(
        &self,
        preps: &[ColumnPrep],
        table_rows: u64,
        encoder: &dyn SentenceEncoder,
    ) -> Vec<f64> {
        let model = MODELS.plm4ndv(
            self.config.plm4ndv_model_path.as_deref(),
            self.config.use_sample,
        );
        match model {
            Some(model) => {
                let inputs: Vec<ColumnInput<'_>> = preps
                    .iter()
                    .map(|p| ColumnInput {
                        name: &p.name,
                        column_type: &p.raw_type,
                        table_rows,
                        profile: &p.profile,
                    })
                    .collect();
                model.predict_table(encoder, &inputs)
            }
            None => preps
                .iter()
                .map(|p| 2.0 * p.profile.distinct() as f64)
                .collect(),
        }
    }

    fn fill_histograms(&self, stats: &mut TableStatistics, preps: &[ColumnPrep]) {
        let builder = HistogramBuilder::new(stats.num_of_rows, self.config.bucket_len);
        for prep in preps {
            let hist = builder.build(&prep.values, prep.tag);
            stats.histogram_error_dict.insert(
                prep.name.clone(),
                hist.delta_max_error(stats.num_of_rows, self.config.bucket_len),
            );
            stats.histogram_dict.insert(prep.name.clone(), hist);
        }
    }

    fn fill_pk_bounds(&self, db: &str, table: &str, stats: &mut TableStatistics) {
        let pk_cols = match self.handle.primary_key_columns(db, table) {
            Ok(cols) if !cols.is_empty() => cols,
            _ => return,
        };
        let sampler = BlockSampler::new(self.handle).with_deadline(self.deadline);
        match sampler.probe_pk_bounds(db, table, &pk_cols) {
            Ok((min_pk, max_pk)) => {
                stats.min_pk = min_pk;
                stats.max_pk = max_pk;
            }
            Err(e) => {
                debug!(error = %e, "pk bound probe failed");
            }
        }
    }
}

/// Analyzes many tables, fanning out across a rayon pool. Each table's
/// pipeline is independent; a configuration error aborts the whole batch
/// since every table would fail identically.
pub fn analyze_tables<H>(
    handle: &H,
    config: &StatsConfig,
    tables: &[(String, String)],
) -> anyhow::Result<Vec<TableStatistics>>
where
    H: DatabaseHandle + Sync,
{
    tables
        .par_iter()
        .map(|(db, table)| {
            TableAnalyzer::new(handle, config.clone())
                .analyze(db, table)
                .with_context(|| format!("collecting statistics for {db}.{table}"))
        })
        .collect()
}
