// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

#![allow(clippy::new_without_default)]

pub mod config;
pub mod error;
pub mod frame;
pub mod histogram;
pub mod ndv;
pub mod profile;
pub mod stats;
pub mod twophase;
pub mod value;

pub use error::{StatsError, StatsResult};
pub use value::{DataTypeTag, SampleValue};
