//! Shared test fixtures: a convex analytic model with a closed-form fit.
#![allow(dead_code)]

use std::sync::Once;
use std::thread;
use std::time::Duration;

use cb_types::{FitOutcome, Minimizer, Model, ParameterKind};

static TRACING: Once = Once::new();

/// Route engine logs through the test harness; `RUST_LOG` filters apply.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Convex error surface `sse = base + Σ wᵢ (pᵢ − cᵢ)²`, evaluated over a
/// synthetic residual count so the derived statistics stay meaningful.
#[derive(Clone)]
pub struct QuadraticModel {
    params: Vec<f64>,
    centers: Vec<f64>,
    weights: Vec<f64>,
    base: f64,
    points: usize,
    delay: Option<Duration>,
    threaded: bool,
    statistics: Vec<f64>,
}

impl QuadraticModel {
    pub fn new(centers: Vec<f64>, weights: Vec<f64>, base: f64) -> Self {
        let params = centers.clone();
        let mut model = Self {
            params,
            centers,
            weights,
            base,
            points: 20,
            delay: None,
            threaded: true,
            statistics: Vec::new(),
        };
        model.calculate();
        model
    }

    /// Artificial per-evaluation delay, for interrupt tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self.calculate();
        self
    }

    pub fn serial(mut self) -> Self {
        self.threaded = false;
        self
    }

    pub fn centers(&self) -> &[f64] {
        &self.centers
    }
}

impl Model for QuadraticModel {
    fn clone_model(&self) -> Box<dyn Model> {
        Box::new(self.clone())
    }

    fn set_constants(&mut self, values: &[f64]) {
        for (slot, value) in self.params.iter_mut().zip(values) {
            *slot = *value;
        }
    }

    fn set_parameter(&mut self, values: &[f64]) {
        for (slot, value) in self.params.iter_mut().zip(values) {
            *slot = *value;
        }
    }

    fn calculate(&mut self) {
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        let sse = self.base
            + self
                .params
                .iter()
                .zip(&self.centers)
                .zip(&self.weights)
                .map(|((p, c), w)| w * (p - c).powi(2))
                .sum::<f64>();
        let n = self.points as f64;
        let k = self.params.len() as f64;
        self.statistics = vec![
            sse,
            (sse / n).sqrt(),
            sse / (n - k).max(1.0),
            (sse / (n - 1.0)).sqrt(),
        ];
    }

    fn statistic_vector(&self) -> Vec<f64> {
        self.statistics.clone()
    }

    fn optimize_parameters(&self) -> Vec<f64> {
        self.params.clone()
    }

    fn global_parameter_size(&self) -> usize {
        self.params.len()
    }

    fn local_parameter_size(&self) -> usize {
        0
    }

    fn series_count(&self) -> usize {
        1
    }

    fn index_parameters(&self, flat: usize) -> (usize, ParameterKind) {
        (flat, ParameterKind::Global)
    }

    fn parameter_name(&self, flat: usize) -> String {
        format!("K{}", flat + 1)
    }

    fn support_threads(&self) -> bool {
        self.threaded
    }

    fn support_series(&self) -> bool {
        false
    }
}

/// Closed-form fit of the quadratic surface: every unlocked parameter lands
/// exactly on its center.
pub struct AnalyticMinimizer {
    optimum: Vec<f64>,
}

impl AnalyticMinimizer {
    pub fn for_model(model: &QuadraticModel) -> Self {
        Self {
            optimum: model.centers().to_vec(),
        }
    }
}

impl Minimizer for AnalyticMinimizer {
    fn fit(&self, model: &mut dyn Model, locked: &[bool]) -> FitOutcome {
        let mut snapshot = model.optimize_parameters();
        for (index, value) in snapshot.iter_mut().enumerate() {
            let held = locked.get(index).copied().unwrap_or(false);
            if !held {
                if let Some(best) = self.optimum.get(index) {
                    *value = *best;
                }
            }
        }
        FitOutcome {
            converged: true,
            best_intermediate: snapshot.clone(),
            converged_parameter: snapshot,
        }
    }
}
