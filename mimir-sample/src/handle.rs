// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! The narrow seam to the physical database.
//!
//! Everything the statistics engine needs from a connection fits in three
//! operations; drivers implement them however they like (tokio-postgres,
//! mysql, a test mock). Each round trip carries an optional deadline; on
//! expiry drivers return a query error, which the sampler absorbs.

use std::time::Duration;

use mimir_core::frame::DataFrame;
use mimir_core::StatsResult;

#[derive(Debug, Clone)]
pub struct ColumnMeta {
    pub name: String,
    /// Raw catalog type name, e.g. "bigint", "varchar".
    pub data_type: String,
}

#[derive(Debug, Clone)]
pub struct TableMeta {
    /// Catalog-estimated row count.
    pub rows: u64,
    pub columns: Vec<ColumnMeta>,
}

impl TableMeta {
    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns
            .iter()
            .find(|c| c.name == name || c.name.eq_ignore_ascii_case(name))
    }
}

pub trait DatabaseHandle {
    /// Runs a query and returns the rows as a named-column frame.
    fn query_dataframe(&self, sql: &str, deadline: Option<Duration>) -> StatsResult<DataFrame>;

    /// Catalog metadata for one table.
    fn table_meta(&self, db: &str, table: &str) -> StatsResult<TableMeta>;

    /// Ordered PRIMARY KEY column names; empty when the table has none.
    fn primary_key_columns(&self, db: &str, table: &str) -> StatsResult<Vec<String>>;
}
