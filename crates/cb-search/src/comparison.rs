//! Model comparison: per-parameter line searches (FastConfidence) and the
//! Monte-Carlo box search they seed.

use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use cb_stats::{histogram, shannon_entropy};
use cb_types::{
    keys, refit, AddressBook, CbResult, Confidence, ControllerConfig, Diagnostics, Minimizer,
    Model, ParameterAddress, SearchError, SearchMethod, SearchReport, SearchResult,
};

use crate::magnitude_step;
use crate::pool::{Interrupt, Progress};

/// Convergence tolerance on `|statistic − threshold|`.
const LIMIT_TOLERANCE: f64 = 1e-7;
/// Consecutive overshoots before the shrink factor collapses to 0.05 %.
const OVERSHOOT_PATIENCE: usize = 10;
/// Monte-Carlo steps between progress ticks.
const UPDATE_INTERVAL: usize = 100;
/// Perturbation retries per dimension in the high-dimensional regime.
const PERTURBATION_RETRIES: usize = 10;
/// Varied-parameter count at or below which the sampler draws full vectors.
const FULL_VECTOR_REGIME: usize = 4;

/// Outcome of one directional line search.
struct LimitWalk {
    bound: f64,
    converged: bool,
    points: Vec<(f64, f64)>,
}

/// Aggregated output of a full Monte-Carlo confidence run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub interrupted: bool,
    /// The FastConfidence seeding run.
    pub fast: SearchReport,
    /// Per-parameter Monte-Carlo bounds.
    pub results: Vec<SearchResult>,
    /// Hyper-volume of the sampling box.
    pub box_volume: f64,
    /// `accepted/total × box_volume`, approximating the confidence-region
    /// hyper-volume.
    pub region_volume: f64,
    pub accepted: usize,
    pub total_steps: usize,
}

#[derive(Default)]
struct McAccumulator {
    accepted: Vec<Vec<f64>>,
    total: usize,
}

/// FastConfidence per-parameter line search plus the Monte-Carlo box search
/// seeded by it.
pub struct ModelComparison {
    config: ControllerConfig,
    interrupt: Interrupt,
    progress: Option<Sender<Progress>>,
}

impl ModelComparison {
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

    pub fn interrupt_handle(&self) -> Interrupt {
        self.interrupt.clone()
    }

    fn eligible_slots(
        &self,
        model: &dyn Model,
    ) -> CbResult<(AddressBook, Vec<ParameterAddress>)> {
        let book = AddressBook::from_model(model, &self.config)?;
        let include_series = self.config.bool_or(keys::INCLUDE_SERIES, true);
        let eligible = book.eligible(include_series, model.support_series());
        if eligible.is_empty() {
            return Err(SearchError::NoVariedParameters);
        }
        Ok((book, eligible))
    }

    fn statistic_index(&self, model: &dyn Model) -> CbResult<usize> {
        let index = self.config.usize_or(keys::PARAMETER_INDEX, 0);
        let available = model.statistic_vector().len();
        if index >= available {
            return Err(SearchError::StatisticOutOfRange {
                index,
                len: available,
            });
        }
        Ok(index)
    }

    /// Per-parameter 1-D line search: one independent job per eligible
    /// parameter, each bounding the statistic from both directions.
    pub fn fast_confidence(
        &self,
        model: &dyn Model,
        minimizer: &dyn Minimizer,
    ) -> CbResult<SearchReport> {
        let (book, eligible) = self.eligible_slots(model)?;
        let stat_index = self.statistic_index(model)?;
        let threshold = self.config.require_f64(keys::MAX_PARAMETER)?;
        let scaling = self.config.f64_or(keys::FAST_CONFIDENCE_SCALING, -4.0);
        let max_iter = self.config.fast_confidence_steps(100);
        let confidence = self.config.f64_or(keys::CONFIDENCE, 95.0);

        let mut report = SearchReport::new(SearchMethod::FastConfidence);
        info!(parameters = eligible.len(), threshold, "fast confidence");

        let bound_parameter = |address: &ParameterAddress| {
            let optimum = book.read(model, address);
            let upper = {
                let mut clone = model.clone_model();
                self.single_limit(
                    clone.as_mut(),
                    minimizer,
                    &book,
                    address,
                    1.0,
                    threshold,
                    stat_index,
                    scaling,
                    max_iter,
                )
            };
            let lower = {
                let mut clone = model.clone_model();
                self.single_limit(
                    clone.as_mut(),
                    minimizer,
                    &book,
                    address,
                    -1.0,
                    threshold,
                    stat_index,
                    scaling,
                    max_iter,
                )
            };

            let mut points: Vec<(f64, f64)> = lower.points.iter().rev().copied().collect();
            points.extend(upper.points.iter().copied());

            SearchResult {
                name: model.parameter_name(address.flat),
                kind: address.kind,
                value: optimum,
                confidence: Confidence {
                    lower: lower.bound.min(optimum),
                    upper: upper.bound.max(optimum),
                    error: confidence,
                },
                converged: lower.converged && upper.converged,
                diagnostics: Diagnostics::Series { points },
            }
        };

        // Clones only leave this thread when the model allows it.
        report.results = if model.support_threads() {
            eligible.par_iter().map(bound_parameter).collect()
        } else {
            eligible.iter().map(bound_parameter).collect()
        };

        report.finish(self.interrupt.interrupted());
        Ok(report)
    }

    /// Walk one parameter away from its optimum until the refit statistic
    /// meets the threshold: advance and double the step while under, shrink
    /// and back off on overshoot.
    #[allow(clippy::too_many_arguments)]
    fn single_limit(
        &self,
        model: &mut dyn Model,
        minimizer: &dyn Minimizer,
        book: &AddressBook,
        target: &ParameterAddress,
        direction: f64,
        threshold: f64,
        stat_index: usize,
        scaling: f64,
        max_iter: usize,
    ) -> LimitWalk {
        let optimum = book.read(model, target);
        let locked = book.lock_only(target);
        let mut step = magnitude_step(optimum, scaling);
        let mut old_param = optimum;
        let mut bound = optimum;
        let mut overshoots = 0usize;
        let mut converged = false;
        let mut points = Vec::new();

        for _ in 0..max_iter {
            if self.interrupt.interrupted() {
                break;
            }
            let param = old_param + direction * step;
            book.write(model, target, param);
            refit(model, minimizer, &locked);
            let statistic = model
                .statistic_vector()
                .get(stat_index)
                .copied()
                .unwrap_or(f64::NAN);
            points.push((param, statistic));

            if (statistic - threshold).abs() < LIMIT_TOLERANCE {
                bound = param;
                converged = true;
                break;
            }
            if statistic < threshold {
                // Still inside the region: commit and grow.
                old_param = param;
                bound = param;
                step *= 2.0;
                overshoots = 0;
            } else {
                // Overshot (a NaN statistic lands here too): back off toward
                // the threshold from the last committed value.
                overshoots += 1;
                step *= if overshoots >= OVERSHOOT_PATIENCE {
                    5e-4
                } else {
                    0.5
                };
            }
        }

        LimitWalk {
            bound,
            converged,
            points,
        }
    }

    /// Full Monte-Carlo confidence: sample the box derived from the
    /// FastConfidence bounds, sharded across the configured thread count
    /// with worker-private accumulators.
    pub fn confidence(
        &self,
        model: &dyn Model,
        minimizer: &dyn Minimizer,
    ) -> CbResult<ComparisonReport> {
        let started_at = Utc::now();
        let fast = self.fast_confidence(model, minimizer)?;
        let (book, eligible) = self.eligible_slots(model)?;
        let stat_index = self.statistic_index(model)?;
        let threshold = self.config.require_f64(keys::MAX_PARAMETER)?;
        let confidence = self.config.f64_or(keys::CONFIDENCE, 95.0);
        let box_multi = self.config.f64_or(keys::BOX_SCALING_FACTOR, 1.5);
        let max_steps = self.config.usize_or(keys::MAX_STEPS, 10_000);

        // Sampling box from the fast bounds; the hyper-volume is cached for
        // the acceptance-ratio estimate.
        let mut box_volume = 1.0;
        let boxes: Vec<(f64, f64)> = fast
            .results
            .iter()
            .map(|result| {
                let value = result.value;
                let mut low = value - box_multi * (value - result.confidence.lower);
                let mut high = value + box_multi * (result.confidence.upper - value);
                if !low.is_finite() || !high.is_finite() || high < low {
                    low = value;
                    high = value;
                }
                box_volume *= high - low;
                (low, high)
            })
            .collect();

        let threads = self.config.threads();
        let shard_steps = (max_steps / threads).max(1);
        let base_seed = if self.config.contains(keys::SEED) {
            self.config.u64_or(keys::SEED, 0)
        } else {
            rand::rng().random()
        };
        info!(
            parameters = eligible.len(),
            threads, shard_steps, box_volume, "monte-carlo confidence"
        );

        // Progress ticks count against the whole planned run, not the
        // per-shard share.
        let planned = shard_steps * threads;
        let ticker = AtomicUsize::new(0);
        let run_shard = |shard: usize| {
            self.mc_shard(
                model,
                base_seed.wrapping_add(shard as u64),
                shard_steps,
                &book,
                &eligible,
                &boxes,
                threshold,
                stat_index,
                &ticker,
                planned,
            )
        };
        let partials: Vec<McAccumulator> = if model.support_threads() {
            (0..threads).into_par_iter().map(run_shard).collect()
        } else {
            (0..threads).map(run_shard).collect()
        };

        // Fold the worker-private accumulators after the pool drained.
        let mut accepted_points: Vec<Vec<f64>> = Vec::new();
        let mut total = 0usize;
        for partial in partials {
            total += partial.total;
            accepted_points.extend(partial.accepted);
        }
        let accepted = accepted_points.len();
        let region_volume = if total > 0 {
            accepted as f64 / total as f64 * box_volume
        } else {
            0.0
        };
        debug!(accepted, total, region_volume, "monte-carlo drained");

        let results = eligible
            .iter()
            .enumerate()
            .map(|(column, address)| {
                let optimum = book.read(model, address);
                let samples: Vec<f64> =
                    accepted_points.iter().map(|point| point[column]).collect();
                let (lower, upper) = samples.iter().fold(
                    (f64::INFINITY, f64::NEG_INFINITY),
                    |(lo, hi), v| (lo.min(*v), hi.max(*v)),
                );
                let entropy = histogram(&samples, None)
                    .ok()
                    .map(|h| shannon_entropy(&h));
                let found = !samples.is_empty();
                SearchResult {
                    name: model.parameter_name(address.flat),
                    kind: address.kind,
                    value: optimum,
                    confidence: Confidence {
                        lower: if found { lower.min(optimum) } else { optimum },
                        upper: if found { upper.max(optimum) } else { optimum },
                        error: confidence,
                    },
                    converged: found,
                    diagnostics: Diagnostics::Samples {
                        values: samples,
                        entropy,
                    },
                }
            })
            .collect();

        Ok(ComparisonReport {
            id: Uuid::new_v4(),
            started_at,
            finished_at: Utc::now(),
            interrupted: self.interrupt.interrupted(),
            fast,
            results,
            box_volume,
            region_volume,
            accepted,
            total_steps: total,
        })
    }

    /// One worker's share of the Monte-Carlo steps, on its own model clone
    /// and private accumulator.  The abort flag is polled every step.
    #[allow(clippy::too_many_arguments)]
    fn mc_shard(
        &self,
        model: &dyn Model,
        seed: u64,
        steps: usize,
        book: &AddressBook,
        eligible: &[ParameterAddress],
        boxes: &[(f64, f64)],
        threshold: f64,
        stat_index: usize,
        ticker: &AtomicUsize,
        planned: usize,
    ) -> McAccumulator {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut clone = model.clone_model();
        let mut current: Vec<f64> = eligible.iter().map(|a| book.read(model, a)).collect();
        let mut accumulator = McAccumulator::default();
        let dimensions = eligible.len();

        for step in 0..steps {
            if self.interrupt.interrupted() {
                break;
            }
            accumulator.total += 1;

            let accepted = if dimensions <= FULL_VECTOR_REGIME {
                // Regime A: independent uniform draw per parameter, accept
                // the full vector when under threshold.
                let candidate: Vec<f64> = boxes
                    .iter()
                    .map(|(low, high)| rng.random_range(*low..=*high))
                    .collect();
                let statistic =
                    evaluate(clone.as_mut(), book, eligible, &candidate, stat_index);
                if statistic <= threshold {
                    current = candidate;
                    true
                } else {
                    false
                }
            } else {
                // Regime B: perturb a bounded non-repeating subset of
                // dimensions, each with a bounded retry budget; a dimension
                // that exhausts its retries reverts to the previous
                // accepted value.
                let subset = sample_subset(&mut rng, dimensions, FULL_VECTOR_REGIME);
                let mut moved = false;
                for dimension in subset {
                    let (low, high) = boxes[dimension];
                    let previous = current[dimension];
                    let mut placed = false;
                    for _ in 0..PERTURBATION_RETRIES {
                        current[dimension] = rng.random_range(low..=high);
                        let statistic =
                            evaluate(clone.as_mut(), book, eligible, &current, stat_index);
                        if statistic <= threshold {
                            placed = true;
                            break;
                        }
                    }
                    if placed {
                        moved = true;
                    } else {
                        current[dimension] = previous;
                    }
                }
                moved
            };

            if accepted {
                accumulator.accepted.push(current.clone());
            }
            if let Some(sender) = &self.progress {
                if (step + 1) % UPDATE_INTERVAL == 0 {
                    let done = ticker.fetch_add(UPDATE_INTERVAL, Ordering::Relaxed)
                        + UPDATE_INTERVAL;
                    let _ = sender.send(Progress {
                        completed: done,
                        total: planned,
                    });
                }
            }
        }

        accumulator
    }
}

fn evaluate(
    model: &mut dyn Model,
    book: &AddressBook,
    eligible: &[ParameterAddress],
    values: &[f64],
    stat_index: usize,
) -> f64 {
    for (address, value) in eligible.iter().zip(values) {
        book.write(model, address, *value);
    }
    model.calculate();
    model
        .statistic_vector()
        .get(stat_index)
        .copied()
        .unwrap_or(f64::NAN)
}

/// Uniformly sized random subset of `1..=cap.min(n)` distinct dimensions,
/// via a partial Fisher-Yates shuffle.
fn sample_subset(rng: &mut StdRng, n: usize, cap: usize) -> Vec<usize> {
    let size = rng.random_range(1..=cap.min(n));
    let mut indices: Vec<usize> = (0..n).collect();
    for slot in 0..size {
        let other = rng.random_range(slot..n);
        indices.swap(slot, other);
    }
    indices.truncate(size);
    indices
}
