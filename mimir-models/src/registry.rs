// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! Process-wide model registry.
//!
//! Models are loaded eagerly on first use and live for the process; they are
//! never hot-swapped. A failed load is warned about once and remembered, so a
//! missing weight file does not spam the log on every column.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;
use tracing::warn;

use crate::adandv::AdaNdvModel;
use crate::ls::LsModel;
use crate::plm4ndv::Plm4NdvModel;

enum Slot<T> {
    Unloaded,
    Failed(PathBuf),
    Ready(Arc<T>),
}

impl<T> Slot<T> {
    fn get_or_load<F>(&mut self, path: &Path, load: F) -> Option<Arc<T>>
    where
        F: FnOnce(&Path) -> Result<T, mimir_core::StatsError>,
    {
        match self {
            Slot::Ready(model) => Some(model.clone()),
            Slot::Failed(failed_path) if failed_path.as_path() == path => None,
            _ => match load(path) {
                Ok(model) => {
                    let model = Arc::new(model);
                    *self = Slot::Ready(model.clone());
                    Some(model)
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "model load failed, falling back");
                    *self = Slot::Failed(path.to_path_buf());
                    None
                }
            },
        }
    }
}

pub struct ModelRegistry {
    adandv: Mutex<Slot<AdaNdvModel>>,
    plm4ndv: Mutex<Slot<Plm4NdvModel>>,
    ls: Mutex<Slot<LsModel>>,
}

lazy_static! {
    /// The shared registry. Lifetime = process.
    pub static ref MODELS: ModelRegistry = ModelRegistry::new();
}

impl ModelRegistry {
    pub fn new() -> ModelRegistry {
        ModelRegistry {
            adandv: Mutex::new(Slot::Unloaded),
            plm4ndv: Mutex::new(Slot::Unloaded),
            ls: Mutex::new(Slot::Unloaded),
        }
    }

    /// Returns the AdaNDV model, loading it on first call. `None` means the
    /// caller should use its closed-form fallback.
    pub fn adandv(&self, path: Option<&Path>) -> Option<Arc<AdaNdvModel>> {
        let path = path?;
        self.adandv
            .lock()
            .unwrap()
            .get_or_load(path, AdaNdvModel::load)
    }

    pub fn plm4ndv(&self, path: Option<&Path>, use_sample: bool) -> Option<Arc<Plm4NdvModel>> {
        let path = path?;
        self.plm4ndv
            .lock()
            .unwrap()
            .get_or_load(path, |p| Plm4NdvModel::load(p, use_sample))
    }

    pub fn ls(&self, path: Option<&Path>) -> Option<Arc<LsModel>> {
        let path = path?;
        self.ls.lock().unwrap().get_or_load(path, LsModel::load)
    }
}
