// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! A minimal row-major frame with named columns.
//!
//! This is the shape the database seam returns (`query_dataframe`) and the
//! shape the sampler accumulates. Cells are `Option<SampleValue>`; `None`
//! models SQL NULL.

use serde::{Deserialize, Serialize};

use crate::error::{StatsError, StatsResult};
use crate::value::SampleValue;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataFrame {
    columns: Vec<String>,
    rows: Vec<Vec<Option<SampleValue>>>,
}

impl DataFrame {
    pub fn new(columns: Vec<String>) -> DataFrame {
        DataFrame {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn from_rows(
        columns: Vec<String>,
        rows: Vec<Vec<Option<SampleValue>>>,
    ) -> StatsResult<DataFrame> {
        let width = columns.len();
        if let Some(bad) = rows.iter().find(|r| r.len() != width) {
            return Err(StatsError::Query(format!(
                "row arity {} does not match {} columns",
                bad.len(),
                width
            )));
        }
        Ok(DataFrame { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push_row(&mut self, row: Vec<Option<SampleValue>>) -> StatsResult<()> {
        if row.len() != self.columns.len() {
            return Err(StatsError::Query(format!(
                "row arity {} does not match {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Appends every row of `other`. Column lists must match exactly.
    pub fn append(&mut self, other: DataFrame) -> StatsResult<()> {
        if other.columns != self.columns {
            return Err(StatsError::Query(
                "cannot merge frames with different columns".to_string(),
            ));
        }
        self.rows.extend(other.rows);
        Ok(())
    }

    /// Resolves a column by exact name, then case-insensitively. The sampled
    /// frame may carry upper-cased names depending on the driver.
    pub fn resolve_column(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .or_else(|| self.columns.iter().position(|c| c.eq_ignore_ascii_case(name)))
    }

    pub fn column_cells(&self, idx: usize) -> impl Iterator<Item = &Option<SampleValue>> {
        self.rows.iter().map(move |r| &r[idx])
    }

    /// All non-null values of a column, in row order.
    pub fn non_null_column(&self, name: &str) -> Option<Vec<SampleValue>> {
        let idx = self.resolve_column(name)?;
        Some(
            self.column_cells(idx)
                .filter_map(|c| c.as_ref().cloned())
                .collect(),
        )
    }

    /// Fraction of non-null cells in a column, in [0, 1]. Empty frames count
    /// as fully non-null.
    pub fn not_null_ratio(&self, name: &str) -> Option<f64> {
        let idx = self.resolve_column(name)?;
        if self.rows.is_empty() {
            return Some(1.0);
        }
        let non_null = self.column_cells(idx).filter(|c| c.is_some()).count();
        Some(non_null as f64 / self.rows.len() as f64)
    }

    /// Materialises the per-row tuple stream over the given column indices.
    pub fn project_tuples(&self, idxs: &[usize]) -> Vec<Vec<Option<SampleValue>>> {
        self.rows
            .iter()
            .map(|r| idxs.iter().map(|&i| r[i].clone()).collect())
            .collect()
    }
}
