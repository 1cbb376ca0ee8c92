//! Parameter addressing: the ordered list of optimizable scalar slots a
//! model exposes, tagged Global or Local×Series.
//!
//! Addresses are plain indices resolved against the model accessor API on
//! every read and write, so they stay valid across cloned models.  The list
//! is built once per run and never changes mid-run.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{keys, ControllerConfig};
use crate::errors::{CbResult, SearchError};
use crate::model::Model;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Shared across all data series.
    Global,
    /// One value per data series.
    Local,
}

impl ParameterKind {
    /// Label used in result records.
    pub fn label(self) -> &'static str {
        match self {
            Self::Global => "Global",
            Self::Local => "Local",
        }
    }
}

/// Stable address of one optimizable scalar slot, valid for one run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterAddress {
    pub kind: ParameterKind,
    /// Index within its kind: global index, or local parameter index.
    pub index: usize,
    /// Series the slot belongs to; `None` for globals.
    pub series: Option<usize>,
    /// Position in the model's flat optimizable vector.
    pub flat: usize,
    /// The model actually exposes this slot.
    pub enabled: bool,
    /// Held constant for this run.
    pub locked: bool,
    /// Selected for variation by the controller.
    pub checked: bool,
}

impl ParameterAddress {
    /// Whether this slot participates in the search.
    pub fn varied(&self) -> bool {
        self.enabled && self.checked && !self.locked
    }
}

/// Ordered slot list for one run: globals first, then local parameters
/// series by series, matching the model's flat optimizable vector.
#[derive(Debug, Clone, Default)]
pub struct AddressBook {
    addresses: Vec<ParameterAddress>,
}

impl AddressBook {
    /// Build the slot list from the model layout and the controller's
    /// selection lists.  Fails early on a parameter-count mismatch, before
    /// any clone or dispatch happens.
    pub fn from_model(model: &dyn Model, config: &ControllerConfig) -> CbResult<Self> {
        let globals = model.global_parameter_size();
        let locals = model.local_parameter_size();
        let series = model.series_count();
        let expected = globals + locals * series;

        let flat_len = model.optimize_parameters().len();
        if flat_len != expected {
            warn!(expected, got = flat_len, "model parameter layout mismatch");
            return Err(SearchError::ParameterMismatch {
                expected,
                got: flat_len,
            });
        }

        let global_checked = config.index_flags(keys::GLOBAL_PARAMETER_LIST, globals);
        let local_checked = config.index_flags(keys::LOCAL_PARAMETER_LIST, locals);

        let mut addresses = Vec::with_capacity(expected);
        for index in 0..globals {
            addresses.push(ParameterAddress {
                kind: ParameterKind::Global,
                index,
                series: None,
                flat: index,
                enabled: true,
                locked: false,
                checked: global_checked[index],
            });
        }
        let mut flat = globals;
        for series_index in 0..series {
            for index in 0..locals {
                addresses.push(ParameterAddress {
                    kind: ParameterKind::Local,
                    index,
                    series: Some(series_index),
                    flat,
                    enabled: true,
                    locked: false,
                    checked: local_checked[index],
                });
                flat += 1;
            }
        }

        let book = Self { addresses };
        debug!(
            slots = book.len(),
            varied = book.varied().len(),
            "address book built"
        );
        Ok(book)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParameterAddress> {
        self.addresses.iter()
    }

    pub fn get(&self, flat: usize) -> Option<&ParameterAddress> {
        self.addresses.get(flat)
    }

    /// Lock or unlock one slot for the rest of the run.
    pub fn set_locked(&mut self, flat: usize, locked: bool) {
        if let Some(address) = self.addresses.get_mut(flat) {
            address.locked = locked;
        }
    }

    /// Slots selected for variation.
    pub fn varied(&self) -> Vec<ParameterAddress> {
        self.addresses.iter().filter(|a| a.varied()).copied().collect()
    }

    /// Varied slots, dropping per-series locals when series inclusion is
    /// disabled and the model handles series natively.
    pub fn eligible(&self, include_series: bool, model_supports_series: bool) -> Vec<ParameterAddress> {
        self.addresses
            .iter()
            .filter(|a| a.varied())
            .filter(|a| {
                include_series || !model_supports_series || a.kind == ParameterKind::Global
            })
            .copied()
            .collect()
    }

    /// Read one slot through the model accessor API.
    pub fn read(&self, model: &dyn Model, address: &ParameterAddress) -> f64 {
        model
            .optimize_parameters()
            .get(address.flat)
            .copied()
            .unwrap_or(f64::NAN)
    }

    /// Write one slot, leaving every other slot untouched.
    pub fn write(&self, model: &mut dyn Model, address: &ParameterAddress, value: f64) {
        let mut values = model.optimize_parameters();
        if address.flat < values.len() {
            values[address.flat] = value;
            model.set_parameter(&values);
        }
    }

    /// Lock mask holding exactly `target` fixed; everything else stays free.
    pub fn lock_only(&self, target: &ParameterAddress) -> Vec<bool> {
        let mut mask = vec![false; self.addresses.len()];
        if target.flat < mask.len() {
            mask[target.flat] = true;
        }
        mask
    }

    /// Lock mask holding all of `targets` fixed.
    pub fn lock_all(&self, targets: &[ParameterAddress]) -> Vec<bool> {
        let mut mask = vec![false; self.addresses.len()];
        for target in targets {
            if target.flat < mask.len() {
                mask[target.flat] = true;
            }
        }
        mask
    }
}
