//! Flat controller configuration for one search run.
//!
//! All tunable knobs travel in a single key→value map so the GUI and
//! import layers can pass settings through without knowing the strategy
//! they configure.  List-valued keys are accepted either as JSON arrays or
//! as space-separated strings (the transport encoding used for results).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::errors::{CbResult, SearchError};

/// Well-known controller keys.
pub mod keys {
    pub const MAX_STEPS: &str = "MaxSteps";
    /// Which [`crate::Statistic`] slot to bound.
    pub const PARAMETER_INDEX: &str = "ParameterIndex";
    /// Threshold on the selected statistic.
    pub const MAX_PARAMETER: &str = "MaxParameter";
    pub const ERROR_CONVERGENCY: &str = "ErrorConvergency";
    pub const ERROR_CONVERGENCY_COUNTER: &str = "ErrorConvergencyCounter";
    pub const ERROR_DECREASE_COUNTER: &str = "ErrorDecreaseCounter";
    pub const OVERSHOT_COUNTER: &str = "OverShotCounter";
    pub const STEP_SCALING_FACTOR: &str = "StepScalingFactor";
    pub const BOX_SCALING_FACTOR: &str = "BoxScalingFactor";
    pub const GLOBAL_PARAMETER_SCALING_LIST: &str = "GlobalParameterScalingList";
    pub const LOCAL_PARAMETER_SCALING_LIST: &str = "LocalParameterScalingList";
    pub const GLOBAL_PARAMETER_LIST: &str = "GlobalParameterList";
    pub const LOCAL_PARAMETER_LIST: &str = "LocalParameterList";
    pub const FAST_CONFIDENCE_SCALING: &str = "FastConfidenceScaling";
    pub const MAX_STEPS_FAST_CONFIDENCE: &str = "MaxStepsFastConfidence";
    /// Accepted alias for [`MAX_STEPS_FAST_CONFIDENCE`].
    pub const FAST_CONFIDENCE_STEPS: &str = "FastConfidenceSteps";
    pub const CONFIDENCE: &str = "confidence";
    pub const INCLUDE_SERIES: &str = "IncludeSeries";
    pub const THREADS: &str = "threads";
    /// Grid scan `[min, max, step]` triples, one per varied parameter.
    pub const PARAMETER_RANGES: &str = "ParameterRanges";
    /// Grid scan mode: fix tuples as constants instead of refitting.
    pub const CONSTANTS_SCAN: &str = "ConstantsScan";
    /// Optional Monte-Carlo base seed for reproducible runs.
    pub const SEED: &str = "Seed";
}

/// Flat key→value settings for one search run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(flatten)]
    values: HashMap<String, Value>,
}

impl ControllerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Scalar lookup; numeric strings are accepted alongside JSON numbers.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.values.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn f64_or(&self, key: &str, default: f64) -> f64 {
        self.get_f64(key).unwrap_or(default)
    }

    /// Scalar lookup that fails with a configuration error when absent.
    pub fn require_f64(&self, key: &str) -> CbResult<f64> {
        self.get_f64(key)
            .ok_or_else(|| SearchError::Config(format!("missing required key `{key}`")))
    }

    pub fn usize_or(&self, key: &str, default: usize) -> usize {
        self.get_f64(key)
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(|v| v as usize)
            .unwrap_or(default)
    }

    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        self.get_f64(key).map(|v| v != 0.0).unwrap_or(default)
    }

    pub fn u64_or(&self, key: &str, default: u64) -> u64 {
        self.get_f64(key)
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(|v| v as u64)
            .unwrap_or(default)
    }

    /// Numeric list: JSON array of numbers or a space-separated string.
    pub fn get_list(&self, key: &str) -> Option<Vec<f64>> {
        match self.values.get(key)? {
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(|item| match item {
                        Value::Number(n) => n.as_f64(),
                        Value::String(s) => s.trim().parse().ok(),
                        _ => None,
                    })
                    .collect(),
            ),
            Value::String(s) => Some(
                s.split_whitespace()
                    .filter_map(|token| token.parse().ok())
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Per-index 0/1 selection flags padded to `len`.  A missing key selects
    /// every index.
    pub fn index_flags(&self, key: &str, len: usize) -> Vec<bool> {
        match self.get_list(key) {
            Some(flags) => (0..len)
                .map(|i| flags.get(i).map(|v| *v != 0.0).unwrap_or(false))
                .collect(),
            None => vec![true; len],
        }
    }

    /// Per-index scaling exponent, falling back to `default` when the list
    /// is absent or shorter than `index`.
    pub fn scaling(&self, key: &str, index: usize, default: f64) -> f64 {
        self.get_list(key)
            .and_then(|list| list.get(index).copied())
            .unwrap_or(default)
    }

    /// `[min, max, step]` triples: a JSON array of 3-element arrays, or a
    /// string of `;`-separated space-joined triples.
    pub fn ranges(&self, key: &str) -> Option<Vec<[f64; 3]>> {
        match self.values.get(key)? {
            Value::Array(rows) => {
                let mut out = Vec::with_capacity(rows.len());
                for row in rows {
                    let items = row.as_array()?;
                    if items.len() != 3 {
                        return None;
                    }
                    let mut triple = [0.0; 3];
                    for (slot, item) in triple.iter_mut().zip(items) {
                        *slot = item.as_f64()?;
                    }
                    out.push(triple);
                }
                Some(out)
            }
            Value::String(s) => {
                let mut out = Vec::new();
                for row in s.split(';') {
                    let row = row.trim();
                    if row.is_empty() {
                        continue;
                    }
                    let values: Vec<f64> = row
                        .split_whitespace()
                        .filter_map(|token| token.parse().ok())
                        .collect();
                    if values.len() != 3 {
                        return None;
                    }
                    out.push([values[0], values[1], values[2]]);
                }
                Some(out)
            }
            _ => None,
        }
    }

    /// Configured worker-thread count, at least one.
    pub fn threads(&self) -> usize {
        self.usize_or(keys::THREADS, 4).max(1)
    }

    /// Iteration cap for FastConfidence line searches; both spellings of the
    /// key are honored.
    pub fn fast_confidence_steps(&self, default: usize) -> usize {
        if self.contains(keys::MAX_STEPS_FAST_CONFIDENCE) {
            self.usize_or(keys::MAX_STEPS_FAST_CONFIDENCE, default)
        } else {
            self.usize_or(keys::FAST_CONFIDENCE_STEPS, default)
        }
    }
}
