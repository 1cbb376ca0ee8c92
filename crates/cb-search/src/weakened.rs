//! Weakened grid search: per-parameter directional walks approximating a
//! confidence bound without a full joint search.

use std::collections::HashMap;

use crossbeam_channel::Sender;
use tracing::{debug, info};

use cb_types::{
    keys, refit, AddressBook, CbResult, Confidence, ControllerConfig, Diagnostics, Minimizer,
    Model, ParameterAddress, ParameterKind, SearchError, SearchMethod, SearchReport,
    SearchResult, WalkCounters, WalkFlags,
};

use crate::magnitude_step;
use crate::pool::{run_pool, Interrupt, Progress};

/// Relative error band over the starting statistic that still counts as
/// "near the optimum" for the error-curve integral.
const NEAR_OPTIMUM_RATIO: f64 = 1.005;

#[derive(Clone, Copy)]
struct WalkSettings {
    threshold: f64,
    stat_index: usize,
    max_steps: usize,
    convergency: f64,
    convergency_cap: usize,
    decrease_cap: usize,
    overshot_cap: usize,
    default_scaling: f64,
}

/// Trace of one directional leg.
struct WalkLeg {
    points: Vec<(f64, f64)>,
    counters: WalkCounters,
    flags: WalkFlags,
    integral_total: f64,
    integral_near_optimum: f64,
    /// Last visited value still at or under the threshold.
    bound: f64,
}

impl WalkLeg {
    fn empty(start: f64) -> Self {
        Self {
            points: Vec::new(),
            counters: WalkCounters::default(),
            flags: WalkFlags::default(),
            integral_total: 0.0,
            integral_near_optimum: 0.0,
            bound: start,
        }
    }
}

/// Bidirectional single-parameter incremental walk with convergence
/// heuristics.  Both legs of every varied parameter run as independent
/// pool jobs on their own model clones.
pub struct WeakenedGridSearch {
    config: ControllerConfig,
    interrupt: Interrupt,
    progress: Option<Sender<Progress>>,
}

impl WeakenedGridSearch {
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

    fn settings(&self, model: &dyn Model) -> CbResult<WalkSettings> {
        let stat_index = self.config.usize_or(keys::PARAMETER_INDEX, 0);
        let available = model.statistic_vector().len();
        if stat_index >= available {
            return Err(SearchError::StatisticOutOfRange {
                index: stat_index,
                len: available,
            });
        }
        Ok(WalkSettings {
            threshold: self.config.require_f64(keys::MAX_PARAMETER)?,
            stat_index,
            max_steps: self.config.usize_or(keys::MAX_STEPS, 1_000),
            convergency: self.config.f64_or(keys::ERROR_CONVERGENCY, 1e-10),
            convergency_cap: self.config.usize_or(keys::ERROR_CONVERGENCY_COUNTER, 5),
            decrease_cap: self.config.usize_or(keys::ERROR_DECREASE_COUNTER, 50),
            overshot_cap: self.config.usize_or(keys::OVERSHOT_COUNTER, 5),
            default_scaling: self.config.f64_or(keys::STEP_SCALING_FACTOR, -4.0),
        })
    }

    fn scaling_for(&self, address: &ParameterAddress, default: f64) -> f64 {
        let key = match address.kind {
            ParameterKind::Global => keys::GLOBAL_PARAMETER_SCALING_LIST,
            ParameterKind::Local => keys::LOCAL_PARAMETER_SCALING_LIST,
        };
        self.config.scaling(key, address.index, default)
    }

    pub fn run(
        &self,
        model: &dyn Model,
        minimizer: &dyn Minimizer,
    ) -> CbResult<SearchReport> {
        let book = AddressBook::from_model(model, &self.config)?;
        let include_series = self.config.bool_or(keys::INCLUDE_SERIES, true);
        let eligible = book.eligible(include_series, model.support_series());
        if eligible.is_empty() {
            return Err(SearchError::NoVariedParameters);
        }
        let settings = self.settings(model)?;
        let threads = self.config.threads();

        // Two directional legs per parameter, each an independent job.
        let jobs: Vec<(ParameterAddress, f64)> = eligible
            .iter()
            .flat_map(|address| [(*address, 1.0), (*address, -1.0)])
            .collect();
        info!(
            parameters = eligible.len(),
            jobs = jobs.len(),
            threads,
            "weakened grid search"
        );

        let mut report = SearchReport::new(SearchMethod::WeakenedGridSearch);
        let work = |(address, direction): (ParameterAddress, f64)| {
            let mut clone = model.clone_model();
            let leg = self.walk(clone.as_mut(), minimizer, &book, &address, direction, settings);
            (address.flat, direction, leg)
        };
        let legs = if model.support_threads() {
            run_pool(jobs, threads, &self.interrupt, self.progress.as_ref(), &work)
        } else {
            // Serial fallback: every leg walks on the coordinator thread.
            let total = jobs.len();
            let mut collected = Vec::with_capacity(total);
            for job in jobs {
                if self.interrupt.interrupted() {
                    break;
                }
                collected.push(work(job));
                if let Some(sender) = &self.progress {
                    let _ = sender.send(Progress {
                        completed: collected.len(),
                        total,
                    });
                }
            }
            collected
        };

        // Pair the legs back up; a leg discarded by an interrupt stays an
        // unfinished stub.
        let mut by_flat: HashMap<usize, (Option<WalkLeg>, Option<WalkLeg>)> = HashMap::new();
        for (flat, direction, leg) in legs {
            let slot = by_flat.entry(flat).or_insert((None, None));
            if direction < 0.0 {
                slot.0 = Some(leg);
            } else {
                slot.1 = Some(leg);
            }
        }

        report.results = eligible
            .iter()
            .map(|address| {
                let optimum = book.read(model, address);
                let (down, up) = by_flat
                    .remove(&address.flat)
                    .unwrap_or((None, None));
                let down = down.unwrap_or_else(|| WalkLeg::empty(optimum));
                let up = up.unwrap_or_else(|| WalkLeg::empty(optimum));
                merge_legs(
                    model.parameter_name(address.flat),
                    address.kind,
                    optimum,
                    self.config.f64_or(keys::CONFIDENCE, 95.0),
                    down,
                    up,
                )
            })
            .collect();

        report.finish(self.interrupt.interrupted());
        Ok(report)
    }

    /// One directional leg: step the target by a fixed increment, refit the
    /// remaining parameters each step, and track the counters that decide
    /// when to halt.
    fn walk(
        &self,
        model: &mut dyn Model,
        minimizer: &dyn Minimizer,
        book: &AddressBook,
        target: &ParameterAddress,
        direction: f64,
        settings: WalkSettings,
    ) -> WalkLeg {
        let start = book.read(model, target);
        let increment = magnitude_step(start, self.scaling_for(target, settings.default_scaling));
        let locked = book.lock_only(target);

        model.calculate();
        let start_error = model
            .statistic_vector()
            .get(settings.stat_index)
            .copied()
            .unwrap_or(f64::NAN);

        let mut leg = WalkLeg::empty(start);
        let mut last_error = start_error;
        let mut convergency_streak = 0usize;
        let mut decrease_exhausted = false;
        let mut interrupted = false;

        for step in 1..=settings.max_steps {
            if self.interrupt.interrupted() {
                interrupted = true;
                break;
            }
            let par = start + direction * step as f64 * increment;
            book.write(model, target, par);
            refit(model, minimizer, &locked);
            let statistic = model
                .statistic_vector()
                .get(settings.stat_index)
                .copied()
                .unwrap_or(f64::NAN);
            leg.points.push((par, statistic));
            leg.counters.steps += 1;

            // Trapezoid strip under the error curve for this increment.
            if statistic.is_finite() && last_error.is_finite() {
                let strip = increment * statistic.min(last_error)
                    + 0.5 * increment * (statistic - last_error).abs();
                leg.integral_total += strip;
                if statistic > start_error && statistic / start_error <= NEAR_OPTIMUM_RATIO {
                    leg.integral_near_optimum += strip;
                }
            }

            if statistic <= settings.threshold {
                leg.bound = par;
            }

            if statistic > settings.threshold {
                leg.counters.overshot += 1;
                if leg.counters.overshot >= settings.overshot_cap {
                    debug!(par, statistic, "overshot counter saturated");
                    break;
                }
            }
            if statistic < start_error {
                leg.counters.error_decrease += 1;
                if leg.counters.error_decrease >= settings.decrease_cap {
                    // The error keeps dropping away from the optimum: the
                    // starting point did not hold up as a minimum.
                    decrease_exhausted = true;
                    debug!(par, statistic, "error decrease counter saturated");
                    break;
                }
            }
            if (statistic - last_error).abs() < settings.convergency {
                convergency_streak += 1;
                if convergency_streak >= settings.convergency_cap {
                    leg.flags.stationary = true;
                    debug!(par, statistic, "convergency counter saturated");
                    break;
                }
            } else {
                convergency_streak = 0;
            }

            last_error = statistic;
        }

        leg.counters.error_convergency = convergency_streak;
        leg.flags.finished = !interrupted;
        leg.flags.converged = !interrupted && !decrease_exhausted;
        leg
    }
}

/// One merged per-parameter record: descending-leg trace reversed and
/// prepended, ascending appended, counters summed, flags combined
/// pessimistically.
fn merge_legs(
    name: String,
    kind: ParameterKind,
    optimum: f64,
    confidence: f64,
    down: WalkLeg,
    up: WalkLeg,
) -> SearchResult {
    let mut points: Vec<(f64, f64)> = down.points.iter().rev().copied().collect();
    points.extend(up.points.iter().copied());
    let flags = down.flags.combine(up.flags);
    SearchResult {
        name,
        kind,
        value: optimum,
        confidence: Confidence {
            lower: down.bound.min(optimum),
            upper: up.bound.max(optimum),
            error: confidence,
        },
        converged: flags.fine(),
        diagnostics: Diagnostics::Walk {
            points,
            counters: down.counters.merge(up.counters),
            flags,
            integral_total: down.integral_total + up.integral_total,
            integral_near_optimum: down.integral_near_optimum + up.integral_near_optimum,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leg(points: Vec<(f64, f64)>, bound: f64, flags: WalkFlags) -> WalkLeg {
        let counters = WalkCounters {
            steps: points.len(),
            ..WalkCounters::default()
        };
        WalkLeg {
            points,
            counters,
            flags,
            integral_total: 1.0,
            integral_near_optimum: 0.25,
            bound,
        }
    }

    #[test]
    fn merged_trace_runs_ascending_through_the_optimum() {
        let fine = WalkFlags {
            converged: true,
            stationary: false,
            finished: true,
        };
        let down = leg(vec![(4.0, 1.0), (3.0, 2.0), (2.0, 4.0)], 2.0, fine);
        let up = leg(vec![(6.0, 1.0), (7.0, 2.0)], 7.0, fine);
        let result = merge_legs("K1".into(), ParameterKind::Global, 5.0, 95.0, down, up);

        let points = match &result.diagnostics {
            Diagnostics::Walk { points, counters, .. } => {
                assert_eq!(counters.steps, 5);
                points.clone()
            }
            other => panic!("unexpected diagnostics {other:?}"),
        };
        let xs: Vec<f64> = points.iter().map(|(x, _)| *x).collect();
        assert_eq!(xs, vec![2.0, 3.0, 4.0, 6.0, 7.0]);
        assert_eq!(result.confidence.lower, 2.0);
        assert_eq!(result.confidence.upper, 7.0);
        assert!(result.converged);
        assert!(result.bounds_consistent());
    }

    #[test]
    fn unfinished_leg_poisons_the_verdict() {
        let fine = WalkFlags {
            converged: true,
            stationary: false,
            finished: true,
        };
        let cut = WalkFlags {
            converged: false,
            stationary: false,
            finished: false,
        };
        let down = leg(vec![(4.0, 1.0)], 4.0, cut);
        let up = leg(vec![(6.0, 1.0)], 6.0, fine);
        let result = merge_legs("K1".into(), ParameterKind::Global, 5.0, 95.0, down, up);
        assert!(!result.converged);
    }
}
