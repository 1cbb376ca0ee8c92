//! Result records and their transport encoding.
//!
//! Strategies return a flat sequence of per-parameter [`SearchResult`]
//! records; numeric lists are string-serialized for transport to the
//! persistence/GUI layer, which is outside this engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::address::ParameterKind;

/// Space-separated transport encoding for numeric lists.
pub fn encode_list(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Inverse of [`encode_list`]; unparsable tokens are skipped.
pub fn decode_list(text: &str) -> Vec<f64> {
    text.split_whitespace()
        .filter_map(|token| token.parse().ok())
        .collect()
}

/// (lower, upper) bound pair at a stated confidence level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Confidence {
    pub lower: f64,
    pub upper: f64,
    /// Confidence level in percent.
    pub error: f64,
}

/// Step counters of one directional walk, or of two merged legs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkCounters {
    pub steps: usize,
    /// Steps whose statistic exceeded the threshold.
    pub overshot: usize,
    /// Steps whose statistic fell below the walk's starting statistic.
    pub error_decrease: usize,
    /// Consecutive steps within the convergency window at the halt.
    pub error_convergency: usize,
}

impl WalkCounters {
    pub fn merge(self, other: Self) -> Self {
        Self {
            steps: self.steps + other.steps,
            overshot: self.overshot + other.overshot,
            error_decrease: self.error_decrease + other.error_decrease,
            error_convergency: self.error_convergency + other.error_convergency,
        }
    }
}

/// Per-walk convergence verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkFlags {
    /// The error trended upward/plateaued; the starting point held up as a
    /// minimum.
    pub converged: bool,
    /// The convergency counter saturated (flat error surface).
    pub stationary: bool,
    /// Ran to completion uninterrupted.
    pub finished: bool,
}

impl WalkFlags {
    /// Overall reliability verdict.
    pub fn fine(&self) -> bool {
        self.converged && self.finished && !self.stationary
    }

    pub fn combine(self, other: Self) -> Self {
        Self {
            converged: self.converged && other.converged,
            stationary: self.stationary || other.stationary,
            finished: self.finished && other.finished,
        }
    }
}

/// Method-specific diagnostic payload attached to a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Diagnostics {
    /// Raw accepted samples (Monte-Carlo), with an optional histogram
    /// entropy as a peakedness diagnostic.
    Samples { values: Vec<f64>, entropy: Option<f64> },
    /// Visited (value, statistic) pairs (line searches).
    Series { points: Vec<(f64, f64)> },
    /// Directional-walk trace with its counters and error-curve integrals.
    Walk {
        points: Vec<(f64, f64)>,
        counters: WalkCounters,
        flags: WalkFlags,
        integral_total: f64,
        integral_near_optimum: f64,
    },
}

/// One per-parameter confidence record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub name: String,
    pub kind: ParameterKind,
    /// The fitted optimum.
    pub value: f64,
    pub confidence: Confidence,
    /// False when an iteration cap cut the search short; the best
    /// intermediate bound is still reported.
    pub converged: bool,
    pub diagnostics: Diagnostics,
}

impl SearchResult {
    /// Whether `lower ≤ value ≤ upper` holds; may legitimately be false on a
    /// non-converged result.
    pub fn bounds_consistent(&self) -> bool {
        self.confidence.lower <= self.value && self.value <= self.confidence.upper
    }

    /// Transport record with string-serialized numeric lists.
    pub fn to_record(&self) -> Value {
        let mut record = json!({
            "name": self.name,
            "type": format!("{} Parameter", self.kind.label()),
            "value": self.value,
            "error": self.confidence.error,
            "converged": self.converged,
            "confidence": {
                "lower": self.confidence.lower,
                "upper": self.confidence.upper,
                "error": self.confidence.error,
            },
        });
        let extra = match &self.diagnostics {
            Diagnostics::Samples { values, entropy } => json!({
                "samples": encode_list(values),
                "entropy": entropy,
            }),
            Diagnostics::Series { points } => series_record(points),
            Diagnostics::Walk {
                points,
                counters,
                flags,
                integral_total,
                integral_near_optimum,
            } => {
                let mut walk = series_record(points);
                walk["counters"] = json!(counters);
                walk["flags"] = json!(flags);
                walk["integral_total"] = json!(integral_total);
                walk["integral_near_optimum"] = json!(integral_near_optimum);
                walk
            }
        };
        for (key, value) in extra.as_object().into_iter().flatten() {
            record[key] = value.clone();
        }
        record
    }
}

fn series_record(points: &[(f64, f64)]) -> Value {
    let xs: Vec<f64> = points.iter().map(|(x, _)| *x).collect();
    let ys: Vec<f64> = points.iter().map(|(_, y)| *y).collect();
    json!({ "x": encode_list(&xs), "y": encode_list(&ys) })
}

/// Which strategy produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchMethod {
    GlobalSearch,
    FastConfidence,
    ModelComparison,
    WeakenedGridSearch,
}

impl std::fmt::Display for SearchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::GlobalSearch => "global search",
            Self::FastConfidence => "fast confidence",
            Self::ModelComparison => "model comparison",
            Self::WeakenedGridSearch => "weakened grid search",
        };
        write!(f, "{name}")
    }
}

/// A finished strategy run: per-parameter results plus run metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchReport {
    pub id: Uuid,
    pub method: SearchMethod,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// The run was cancelled; the results are valid partials.
    pub interrupted: bool,
    pub results: Vec<SearchResult>,
}

impl SearchReport {
    pub fn new(method: SearchMethod) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            method,
            started_at: now,
            finished_at: now,
            interrupted: false,
            results: Vec::new(),
        }
    }

    pub fn finish(&mut self, interrupted: bool) {
        self.finished_at = Utc::now();
        self.interrupted = interrupted;
    }

    /// Flat transport records for the persistence/GUI layer.
    pub fn to_records(&self) -> Value {
        json!({
            "id": self.id,
            "method": self.method.to_string(),
            "interrupted": self.interrupted,
            "results": self.results.iter().map(SearchResult::to_record).collect::<Vec<_>>(),
        })
    }
}
