// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! Typed sample values and the closed set of histogram data types.
//!
//! Histogram bucket boundaries are serialised as strings; [`DataTypeTag`]
//! carries enough information for downstream consumers to re-parse them.

use chrono::{NaiveDate, NaiveDateTime};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// MySQL zero-date marker. Treated as a null equivalent for date columns and
/// dropped before histogram construction.
pub const ZERO_DATE_SENTINEL: &str = "0000-00-00 00:00:00";

/// Closed set of data types a histogram can be tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataTypeTag {
    Int,
    Float,
    Double,
    Decimal,
    Date,
    String,
}

impl DataTypeTag {
    /// Maps a raw column type name (MySQL spelling) to the inner tag.
    /// Returns `None` for types statistics cannot be built over.
    pub fn from_column_type(column_type: &str) -> Option<DataTypeTag> {
        let ct = column_type.to_ascii_lowercase();
        if ct.contains("int") {
            Some(DataTypeTag::Int)
        } else if ct == "float" {
            Some(DataTypeTag::Float)
        } else if ct == "double" {
            Some(DataTypeTag::Double)
        } else if ct.starts_with("decimal") {
            Some(DataTypeTag::Decimal)
        } else if matches!(ct.as_str(), "date" | "datetime" | "timestamp") {
            Some(DataTypeTag::Date)
        } else if matches!(
            ct.as_str(),
            "string" | "varchar" | "char" | "text" | "longtext"
        ) {
            Some(DataTypeTag::String)
        } else {
            None
        }
    }

    /// Re-parses an encoded boundary string back into a value.
    pub fn parse(&self, raw: &str) -> Option<SampleValue> {
        match self {
            DataTypeTag::Int => raw.parse::<i64>().ok().map(SampleValue::Int),
            DataTypeTag::Float | DataTypeTag::Double | DataTypeTag::Decimal => raw
                .parse::<f64>()
                .ok()
                .map(|v| SampleValue::Float(OrderedFloat(v))),
            DataTypeTag::Date => parse_datetime(raw).map(SampleValue::Date),
            DataTypeTag::String => Some(SampleValue::Str(raw.to_string())),
        }
    }
}

fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(dt);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// One non-null value drawn from a sampled column.
///
/// The enum is totally ordered (floats through `OrderedFloat`) so samples can
/// be sorted for histogram construction, and hashable so frequency profiles
/// can be built over plain hash maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SampleValue {
    Int(i64),
    Float(OrderedFloat<f64>),
    Date(NaiveDateTime),
    Str(String),
}

impl SampleValue {
    pub fn float(v: f64) -> SampleValue {
        SampleValue::Float(OrderedFloat(v))
    }

    /// Whether this value is the null-equivalent zero-date marker for the
    /// given column type.
    pub fn is_null_sentinel(&self, tag: DataTypeTag) -> bool {
        match self {
            SampleValue::Str(s) => tag == DataTypeTag::Date && s == ZERO_DATE_SENTINEL,
            _ => false,
        }
    }

    /// Encodes the value as a histogram boundary string.
    ///
    /// Integers print in decimal, floats in the shortest round-trippable
    /// decimal, dates as `YYYY-MM-DD` (with a time suffix only when the time
    /// part is non-zero), strings pass through.
    pub fn encode(&self) -> String {
        match self {
            SampleValue::Int(i) => i.to_string(),
            SampleValue::Float(f) => f.into_inner().to_string(),
            SampleValue::Date(dt) => {
                if dt.time() == chrono::NaiveTime::MIN {
                    dt.format("%Y-%m-%d").to_string()
                } else {
                    dt.format("%Y-%m-%d %H:%M:%S").to_string()
                }
            }
            SampleValue::Str(s) => s.clone(),
        }
    }

    /// Renders the value as a SQL literal: numbers bare, everything else
    /// single-quoted with embedded quotes doubled.
    pub fn sql_literal(&self) -> String {
        match self {
            SampleValue::Int(i) => i.to_string(),
            SampleValue::Float(f) => f.into_inner().to_string(),
            SampleValue::Date(dt) => format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S")),
            SampleValue::Str(s) => format!("'{}'", s.replace('\'', "''")),
        }
    }
}
