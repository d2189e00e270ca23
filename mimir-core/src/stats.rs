// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! The per-table statistics record handed to downstream planners.
//!
//! This is the single serialisable artifact the pipeline produces; its JSON
//! schema is the external interface. Maps are BTree-backed so the serialised
//! record is identical regardless of column processing order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::histogram::HistogramStats;

/// One primary-key boundary component. Values are carried as strings so
/// 64-bit and wider keys survive JSON round trips unmangled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkEntry {
    #[serde(rename = "ColumnName")]
    pub column_name: String,
    #[serde(rename = "Value")]
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableStatistics {
    pub db_name: String,
    pub table_name: String,

    /// Estimated table cardinality from the catalog.
    pub num_of_rows: u64,
    /// Rows actually collected by the sampler.
    pub sample_rows: u64,

    /// Estimated NDV per column.
    pub ndv_dict: BTreeMap<String, f64>,
    pub histogram_dict: BTreeMap<String, HistogramStats>,
    /// Fraction of non-null cells per column, in [0, 1].
    pub not_null_ratio_dict: BTreeMap<String, f64>,

    pub min_pk: Vec<PkEntry>,
    pub max_pk: Vec<PkEntry>,

    pub is_sample_success: bool,
    pub is_sample_supported: bool,
    /// Set when sampling was truncated or degraded; the record stays usable.
    pub unsupported_reason: Option<String>,

    /// Per-block row counts, in collection order.
    pub block_size_list: Vec<usize>,
    /// Per-column sampling failures, as human-readable annotations.
    pub sample_error_dict: BTreeMap<String, String>,
    /// Per-column Δmax histogram error.
    pub histogram_error_dict: BTreeMap<String, f64>,

    pub shard_no: u32,
    pub msg: Option<String>,
    pub extra_info: BTreeMap<String, serde_json::Value>,
}

impl TableStatistics {
    pub fn new(db_name: impl Into<String>, table_name: impl Into<String>) -> TableStatistics {
        TableStatistics {
            db_name: db_name.into(),
            table_name: table_name.into(),
            num_of_rows: 0,
            sample_rows: 0,
            ndv_dict: BTreeMap::new(),
            histogram_dict: BTreeMap::new(),
            not_null_ratio_dict: BTreeMap::new(),
            min_pk: Vec::new(),
            max_pk: Vec::new(),
            is_sample_success: true,
            is_sample_supported: true,
            unsupported_reason: None,
            block_size_list: Vec::new(),
            sample_error_dict: BTreeMap::new(),
            histogram_error_dict: BTreeMap::new(),
            shard_no: 0,
            msg: None,
            extra_info: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::{HistogramBucket, HistogramType};
    use crate::value::DataTypeTag;

    #[test]
    fn serialised_schema_is_stable() {
        let mut stats = TableStatistics::new("tpch", "customer");
        stats.num_of_rows = 150_000;
        stats.sample_rows = 1200;
        stats.ndv_dict.insert("C_CUSTKEY".to_string(), 150_000.0);
        stats.min_pk.push(PkEntry {
            column_name: "C_CUSTKEY".to_string(),
            value: "1".to_string(),
        });
        stats.histogram_dict.insert(
            "C_CUSTKEY".to_string(),
            HistogramStats {
                data_type: DataTypeTag::Int,
                histogram_type: HistogramType::EquiDepth,
                buckets: vec![HistogramBucket {
                    min_value: "1".to_string(),
                    max_value: "75000".to_string(),
                    cum_freq: 0.5,
                    row_count: 600,
                    size: 600,
                }],
            },
        );

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["db_name"], "tpch");
        assert_eq!(json["min_pk"][0]["ColumnName"], "C_CUSTKEY");
        assert_eq!(json["min_pk"][0]["Value"], "1");
        assert_eq!(json["histogram_dict"]["C_CUSTKEY"]["data_type"], "int");
        assert_eq!(
            json["histogram_dict"]["C_CUSTKEY"]["histogram_type"],
            "equi-depth"
        );
        assert_eq!(json["is_sample_success"], true);

        // And the record round-trips.
        let back: TableStatistics = serde_json::from_value(json).unwrap();
        assert_eq!(back.ndv_dict["C_CUSTKEY"], 150_000.0);
    }

    #[test]
    fn insertion_order_does_not_change_serialisation() {
        let mut a = TableStatistics::new("db", "t");
        a.ndv_dict.insert("b".to_string(), 2.0);
        a.ndv_dict.insert("a".to_string(), 1.0);

        let mut b = TableStatistics::new("db", "t");
        b.ndv_dict.insert("a".to_string(), 1.0);
        b.ndv_dict.insert("b".to_string(), 2.0);

        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }
}
