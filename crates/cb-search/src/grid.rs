//! Exhaustive Cartesian grid scan around a fitted optimum.

use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use cb_types::{
    encode_list, keys, AddressBook, CbResult, ControllerConfig, Minimizer, Model, SearchError,
};

use crate::pool::{run_pool, Interrupt, Progress};

/// Inclusive scan range of one grid dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

/// Lazy, restartable odometer over per-dimension value lists; the last
/// dimension increments fastest.  Decoupled from job dispatch so callers can
/// count, peek or restart without touching the pool.
#[derive(Debug, Clone)]
pub struct CartesianProduct {
    axes: Vec<Vec<f64>>,
    position: Vec<usize>,
    done: bool,
}

impl CartesianProduct {
    pub fn new(axes: Vec<Vec<f64>>) -> Self {
        let done = axes.is_empty() || axes.iter().any(Vec::is_empty);
        let position = vec![0; axes.len()];
        Self {
            axes,
            position,
            done,
        }
    }

    /// Total number of tuples the full iteration visits.
    pub fn len(&self) -> usize {
        if self.axes.is_empty() {
            return 0;
        }
        self.axes.iter().map(Vec::len).product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reset to the first tuple.
    pub fn restart(&mut self) {
        for slot in &mut self.position {
            *slot = 0;
        }
        self.done = self.axes.is_empty() || self.axes.iter().any(Vec::is_empty);
    }
}

impl Iterator for CartesianProduct {
    type Item = Vec<f64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let tuple: Vec<f64> = self
            .axes
            .iter()
            .zip(&self.position)
            .map(|(axis, index)| axis[*index])
            .collect();

        // Odometer increment, last dimension fastest.
        let mut carry = true;
        for dimension in (0..self.axes.len()).rev() {
            if !carry {
                break;
            }
            self.position[dimension] += 1;
            if self.position[dimension] == self.axes[dimension].len() {
                self.position[dimension] = 0;
            } else {
                carry = false;
            }
        }
        if carry {
            self.done = true;
        }

        Some(tuple)
    }
}

/// One evaluated grid point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSnapshot {
    /// Odometer position of the tuple; the aggregation key, so the logical
    /// result set is deterministic regardless of completion order.
    pub index: usize,
    pub tuple: Vec<f64>,
    /// Full flat parameter vector after the job ran.
    pub optimized: Vec<f64>,
    pub statistics: Vec<f64>,
    pub sse: f64,
    pub converged: bool,
    /// A NaN/Inf statistic was seen at this point.  The point is still a
    /// data point; it is never retried or dropped.
    pub corrupt: bool,
}

/// Aggregated output of one grid scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridReport {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub interrupted: bool,
    /// Planned grid size; `snapshots.len()` is smaller after an interrupt.
    pub total: usize,
    pub snapshots: Vec<GridSnapshot>,
    /// `(first parameter, SSE, second parameter)` triples for 2-D
    /// visualization; populated by general-scan runs with two or more
    /// varied parameters.
    pub series: Vec<(f64, f64, f64)>,
}

impl GridReport {
    /// Keep snapshots below the SSE threshold, optionally requiring strictly
    /// positive tuple values, serialized for export.
    pub fn export_filtered(&self, threshold: f64, allow_nonpositive: bool) -> Value {
        let mut toplevel = serde_json::Map::new();
        let mut kept = 0usize;
        for snapshot in &self.snapshots {
            let valid = allow_nonpositive || snapshot.tuple.iter().all(|v| *v > 0.0);
            if snapshot.sse < threshold && valid {
                toplevel.insert(
                    format!("model_{kept}"),
                    json!({
                        "tuple": encode_list(&snapshot.tuple),
                        "optimized": encode_list(&snapshot.optimized),
                        "statistics": encode_list(&snapshot.statistics),
                        "sse": snapshot.sse,
                        "corrupt": snapshot.corrupt,
                    }),
                );
                kept += 1;
            }
        }
        Value::Object(toplevel)
    }
}

struct GridJob {
    index: usize,
    tuple: Vec<f64>,
}

/// Exhaustive Cartesian grid scan over user ranges.
pub struct GlobalSearch {
    config: ControllerConfig,
    interrupt: Interrupt,
    progress: Option<Sender<Progress>>,
}

impl GlobalSearch {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            interrupt: Interrupt::new(),
            progress: None,
        }
    }

    pub fn with_progress(mut self, sender: Sender<Progress>) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Handle for cancelling this search from another thread.
    pub fn interrupt_handle(&self) -> Interrupt {
        self.interrupt.clone()
    }

    /// Per-dimension value lists `[min, min+step, …, max]`, inclusive of the
    /// endpoint.  A non-positive step invalidates only this sub-search.
    pub fn param_list(ranges: &[GridRange]) -> CbResult<Vec<Vec<f64>>> {
        let mut axes = Vec::with_capacity(ranges.len());
        for (dimension, range) in ranges.iter().enumerate() {
            if !(range.step > 0.0) || !range.step.is_finite() {
                return Err(SearchError::ZeroStep {
                    dimension,
                    step: range.step,
                });
            }
            if range.max < range.min {
                return Err(SearchError::Config(format!(
                    "grid dimension {dimension}: max {} below min {}",
                    range.max, range.min
                )));
            }
            let mut values = Vec::new();
            let mut index = 0usize;
            loop {
                let value = range.min + index as f64 * range.step;
                if value > range.max + range.step * 1e-9 {
                    break;
                }
                values.push(value);
                index += 1;
            }
            axes.push(values);
        }
        Ok(axes)
    }

    /// Total number of grid points the run will visit, reported before
    /// any job is dispatched.
    pub fn job_count(&self, model: &dyn Model) -> CbResult<usize> {
        let ranges = self.ranges(model)?;
        let axes = Self::param_list(&ranges)?;
        Ok(CartesianProduct::new(axes).len())
    }

    fn ranges(&self, model: &dyn Model) -> CbResult<Vec<GridRange>> {
        let book = AddressBook::from_model(model, &self.config)?;
        let varied = book.varied();
        if varied.is_empty() {
            return Err(SearchError::NoVariedParameters);
        }
        let triples = self
            .config
            .ranges(keys::PARAMETER_RANGES)
            .ok_or_else(|| SearchError::Config("missing or malformed ParameterRanges".into()))?;
        if triples.len() != varied.len() {
            return Err(SearchError::Config(format!(
                "ParameterRanges carries {} triples for {} varied parameters",
                triples.len(),
                varied.len()
            )));
        }
        Ok(triples
            .into_iter()
            .map(|[min, max, step]| GridRange { min, max, step })
            .collect())
    }

    pub fn run(&self, model: &dyn Model, minimizer: &dyn Minimizer) -> CbResult<GridReport> {
        let started_at = Utc::now();
        let book = AddressBook::from_model(model, &self.config)?;
        let varied = book.varied();
        let ranges = self.ranges(model)?;
        let axes = Self::param_list(&ranges)?;

        let stat_index = self.config.usize_or(keys::PARAMETER_INDEX, 0);
        let available = model.statistic_vector().len();
        if stat_index >= available {
            return Err(SearchError::StatisticOutOfRange {
                index: stat_index,
                len: available,
            });
        }

        let constants_scan = self.config.bool_or(keys::CONSTANTS_SCAN, true);
        let mut grid = CartesianProduct::new(axes);
        let total = grid.len();
        let row = grid.axes.last().map(Vec::len).unwrap_or(1).max(1);
        info!(total, constants_scan, "starting grid scan");

        // Enumerate up front; the abort flag is checked at the top of the
        // loop so an early interrupt skips the tail of the grid entirely.
        let mut jobs = Vec::with_capacity(total);
        let mut interrupted = false;
        for (index, tuple) in grid.by_ref().enumerate() {
            if self.interrupt.interrupted() {
                interrupted = true;
                break;
            }
            jobs.push(GridJob { index, tuple });
        }

        let lock_varied = book.lock_all(&varied);
        let evaluate = |job: GridJob| -> GridSnapshot {
            let mut clone = model.clone_model();
            for (address, value) in varied.iter().zip(&job.tuple) {
                book.write(clone.as_mut(), address, *value);
            }
            let converged = if constants_scan {
                let values = clone.optimize_parameters();
                clone.set_constants(&values);
                clone.calculate();
                true
            } else {
                cb_types::refit(clone.as_mut(), minimizer, &lock_varied)
            };
            let statistics = clone.statistic_vector();
            let corrupt = statistics.iter().any(|v| !v.is_finite());
            let sse = statistics.first().copied().unwrap_or(f64::NAN);
            GridSnapshot {
                index: job.index,
                tuple: job.tuple,
                optimized: clone.optimize_parameters(),
                statistics,
                sse,
                converged,
                corrupt,
            }
        };

        let mut snapshots = if model.support_threads() {
            // One thread stays reserved for coordination.
            let workers = self.config.threads().saturating_sub(1).max(1);
            run_pool(
                jobs,
                workers,
                &self.interrupt,
                self.progress.as_ref(),
                evaluate,
            )
        } else {
            // Serial fallback: the coordinator runs every job itself and
            // drains at row boundaries.
            let mut collected = Vec::with_capacity(jobs.len());
            for chunk in jobs.chunks(row) {
                if self.interrupt.interrupted() {
                    interrupted = true;
                    break;
                }
                for job in chunk {
                    collected.push(evaluate(GridJob {
                        index: job.index,
                        tuple: job.tuple.clone(),
                    }));
                }
                if let Some(sender) = &self.progress {
                    let _ = sender.send(Progress {
                        completed: collected.len(),
                        total,
                    });
                }
            }
            collected
        };
        interrupted = interrupted || self.interrupt.interrupted();

        snapshots.sort_by_key(|snapshot| snapshot.index);
        let corrupt = snapshots.iter().filter(|s| s.corrupt).count();
        if corrupt > 0 {
            warn!(corrupt, "grid points with non-finite statistics");
        }

        let series = if !constants_scan && varied.len() >= 2 {
            snapshots
                .iter()
                .map(|s| (s.tuple[0], s.statistics[stat_index], s.tuple[1]))
                .collect()
        } else {
            Vec::new()
        };

        debug!(
            evaluated = snapshots.len(),
            total, interrupted, "grid scan drained"
        );

        Ok(GridReport {
            id: Uuid::new_v4(),
            started_at,
            finished_at: Utc::now(),
            interrupted,
            total,
            snapshots,
            series,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_list_is_inclusive_of_the_endpoint() {
        let axes = GlobalSearch::param_list(&[GridRange {
            min: 0.0,
            max: 10.0,
            step: 2.0,
        }])
        .unwrap();
        assert_eq!(axes, vec![vec![0.0, 2.0, 4.0, 6.0, 8.0, 10.0]]);
    }

    #[test]
    fn param_list_rejects_zero_step() {
        let err = GlobalSearch::param_list(&[GridRange {
            min: 0.0,
            max: 1.0,
            step: 0.0,
        }])
        .unwrap_err();
        match err {
            SearchError::ZeroStep { dimension, .. } => assert_eq!(dimension, 0),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn odometer_visits_last_dimension_fastest() {
        let mut grid = CartesianProduct::new(vec![vec![1.0, 2.0], vec![10.0, 20.0, 30.0]]);
        assert_eq!(grid.len(), 6);
        let tuples: Vec<Vec<f64>> = grid.by_ref().collect();
        assert_eq!(
            tuples,
            vec![
                vec![1.0, 10.0],
                vec![1.0, 20.0],
                vec![1.0, 30.0],
                vec![2.0, 10.0],
                vec![2.0, 20.0],
                vec![2.0, 30.0],
            ]
        );
        assert_eq!(grid.next(), None);

        grid.restart();
        assert_eq!(grid.next(), Some(vec![1.0, 10.0]));
    }

    #[test]
    fn empty_axis_yields_nothing() {
        let mut grid = CartesianProduct::new(vec![vec![1.0], vec![]]);
        assert_eq!(grid.next(), None);
        assert!(CartesianProduct::new(vec![]).is_empty());
    }
}
