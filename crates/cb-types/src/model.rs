//! Contracts the search strategies consume: the fitted model under test and
//! the local nonlinear minimizer used to refit free parameters.

use serde::{Deserialize, Serialize};

use crate::address::ParameterKind;

/// Conventional indices into [`Model::statistic_vector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Statistic {
    /// Sum of squared errors.
    Sse,
    /// Standard error of the estimate.
    SEy,
    /// Chi-squared.
    ChiSquared,
    /// Residual standard deviation.
    Sigma,
}

impl Statistic {
    pub fn index(self) -> usize {
        match self {
            Self::Sse => 0,
            Self::SEy => 1,
            Self::ChiSquared => 2,
            Self::Sigma => 3,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Sse),
            1 => Some(Self::SEy),
            2 => Some(Self::ChiSquared),
            3 => Some(Self::Sigma),
            _ => None,
        }
    }
}

/// A model that has already been fit to its optimum.
///
/// Every job mutates its own clone obtained via [`Model::clone_model`]; the
/// caller's instance is only ever read (and cloned from) across threads.
/// Parameters are addressed through the flat ordered vector exposed by
/// [`Model::optimize_parameters`] (globals first, then local parameters
/// series by series).
pub trait Model: Send + Sync {
    /// Deep copy, giving the job an instance it exclusively owns.
    fn clone_model(&self) -> Box<dyn Model>;

    /// Fix the given values as constants (they keep their slot but are not
    /// expected to be refit).
    fn set_constants(&mut self, values: &[f64]);

    /// Overwrite the flat optimizable parameter vector.
    fn set_parameter(&mut self, values: &[f64]);

    /// Recompute the model curve and its statistics for the current
    /// parameter values.
    fn calculate(&mut self);

    /// Residual-magnitude statistics, index-addressed per [`Statistic`].
    fn statistic_vector(&self) -> Vec<f64>;

    /// Current values of the optimizable parameters, flat.
    fn optimize_parameters(&self) -> Vec<f64>;

    fn global_parameter_size(&self) -> usize;

    fn local_parameter_size(&self) -> usize;

    fn series_count(&self) -> usize;

    /// Resolve a flat slot index to its per-kind parameter index.
    fn index_parameters(&self, flat: usize) -> (usize, ParameterKind);

    /// Human-readable name of the slot (used in result records).
    fn parameter_name(&self, flat: usize) -> String;

    /// Whether clones of this model may run on worker threads.
    fn support_threads(&self) -> bool;

    /// Whether the model natively handles per-series local parameters.
    fn support_series(&self) -> bool;

    /// The selected residual statistic, NaN when out of range.
    fn statistic(&self, which: Statistic) -> f64 {
        self.statistic_vector()
            .get(which.index())
            .copied()
            .unwrap_or(f64::NAN)
    }
}

/// Outcome of one local nonlinear fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitOutcome {
    pub converged: bool,
    /// Best parameter snapshot seen during the fit.
    pub best_intermediate: Vec<f64>,
    /// Parameter snapshot at convergence; meaningful when `converged`.
    pub converged_parameter: Vec<f64>,
}

impl FitOutcome {
    /// The snapshot a caller should apply: the converged parameters when the
    /// fit converged, the best intermediate ones otherwise.
    pub fn parameter(&self) -> &[f64] {
        if self.converged {
            &self.converged_parameter
        } else {
            &self.best_intermediate
        }
    }
}

/// One local nonlinear fit of the unlocked parameters.
pub trait Minimizer: Send + Sync {
    /// Fit the model's free parameters; `locked[i]` holds flat slot `i`
    /// fixed at its current value.
    fn fit(&self, model: &mut dyn Model, locked: &[bool]) -> FitOutcome;
}

/// Refit the unlocked parameters and leave the model evaluated at the
/// resulting snapshot.  Returns the minimizer's converged flag.
pub fn refit(model: &mut dyn Model, minimizer: &dyn Minimizer, locked: &[bool]) -> bool {
    let outcome = minimizer.fit(model, locked);
    model.set_parameter(outcome.parameter());
    model.calculate();
    outcome.converged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statistic_index_round_trip() {
        for statistic in [
            Statistic::Sse,
            Statistic::SEy,
            Statistic::ChiSquared,
            Statistic::Sigma,
        ] {
            assert_eq!(Statistic::from_index(statistic.index()), Some(statistic));
        }
        assert_eq!(Statistic::from_index(4), None);
    }

    #[test]
    fn fit_outcome_prefers_converged_snapshot() {
        let outcome = FitOutcome {
            converged: true,
            best_intermediate: vec![1.0],
            converged_parameter: vec![2.0],
        };
        assert_eq!(outcome.parameter(), &[2.0]);

        let outcome = FitOutcome {
            converged: false,
            best_intermediate: vec![1.0],
            converged_parameter: vec![2.0],
        };
        assert_eq!(outcome.parameter(), &[1.0]);
    }
}
