mod common;

use std::thread;
use std::time::Duration;

use cb_search::weakened::WeakenedGridSearch;
use cb_types::{keys, ControllerConfig, Diagnostics};
use common::{AnalyticMinimizer, QuadraticModel};

fn surface(dimensions: usize) -> (QuadraticModel, AnalyticMinimizer) {
    common::init_tracing();
    let centers = vec![5.0; dimensions];
    let weights = vec![2.0; dimensions];
    let model = QuadraticModel::new(centers, weights, 1.0);
    let minimizer = AnalyticMinimizer::for_model(&model);
    (model, minimizer)
}

fn base_config() -> ControllerConfig {
    ControllerConfig::new()
        .with(keys::MAX_PARAMETER, 9.0)
        .with(keys::STEP_SCALING_FACTOR, -1.0)
        .with(keys::MAX_STEPS, 1_000)
        .with(keys::THREADS, 2)
}

#[test]
fn monotone_surface_saturates_the_overshot_counter() {
    // With unit increments on sse = 1 + 2(p−5)², the walk crosses the
    // threshold 9 exactly at 5 ± 2 and then overshoots until the counter
    // cap of 5 halts each leg well before MaxSteps.
    let (model, minimizer) = surface(1);
    let report = WeakenedGridSearch::new(base_config())
        .run(&model, &minimizer)
        .unwrap();

    assert!(!report.interrupted);
    assert_eq!(report.results.len(), 1);
    let result = &report.results[0];

    assert_eq!(result.confidence.lower, 3.0);
    assert_eq!(result.confidence.upper, 7.0);
    assert!(result.converged);
    assert!(result.bounds_consistent());

    match &result.diagnostics {
        Diagnostics::Walk {
            points,
            counters,
            flags,
            integral_total,
            integral_near_optimum,
        } => {
            // Seven unit steps per leg: two under threshold, then five
            // overshoots saturate the cap.
            assert_eq!(counters.steps, 14);
            assert_eq!(counters.overshot, 10);
            assert_eq!(counters.error_decrease, 0);
            assert!(flags.converged);
            assert!(flags.finished);
            assert!(!flags.stationary);
            assert_eq!(points.len(), 14);
            let xs: Vec<f64> = points.iter().map(|(x, _)| *x).collect();
            let mut sorted = xs.clone();
            sorted.sort_by(f64::total_cmp);
            assert_eq!(xs, sorted, "trace should run ascending through the optimum");
            assert!(*integral_total > 0.0);
            assert!(*integral_total >= *integral_near_optimum);
        }
        other => panic!("unexpected diagnostics {other:?}"),
    }
}

#[test]
fn flat_surface_is_flagged_stationary() {
    // Zero weight and zero base: the statistic never moves, so the
    // convergency counter saturates immediately and the walk is anything
    // but a reliable bound.
    let model = QuadraticModel::new(vec![5.0], vec![0.0], 1.0);
    let minimizer = AnalyticMinimizer::for_model(&model);
    let report = WeakenedGridSearch::new(base_config())
        .run(&model, &minimizer)
        .unwrap();

    let result = &report.results[0];
    assert!(!result.converged);
    match &result.diagnostics {
        Diagnostics::Walk { counters, flags, .. } => {
            assert!(flags.stationary);
            assert!(flags.finished);
            // Each leg halts after its convergency streak, far short of
            // MaxSteps.
            assert!(counters.steps < 20);
        }
        other => panic!("unexpected diagnostics {other:?}"),
    }
}

#[test]
fn every_varied_parameter_gets_a_merged_record() {
    let (model, minimizer) = surface(3);
    let report = WeakenedGridSearch::new(base_config())
        .run(&model, &minimizer)
        .unwrap();

    assert_eq!(report.results.len(), 3);
    let names: Vec<&str> = report.results.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["K1", "K2", "K3"]);
    for result in &report.results {
        assert_eq!(result.confidence.lower, 3.0);
        assert_eq!(result.confidence.upper, 7.0);
        assert!(result.converged);
    }
}

#[test]
fn serial_model_walks_match_the_threaded_run() {
    let (threaded, minimizer) = surface(2);
    let serial = QuadraticModel::new(vec![5.0; 2], vec![2.0; 2], 1.0).serial();

    let a = WeakenedGridSearch::new(base_config())
        .run(&threaded, &minimizer)
        .unwrap();
    let b = WeakenedGridSearch::new(base_config())
        .run(&serial, &minimizer)
        .unwrap();

    assert_eq!(a.results.len(), b.results.len());
    for (x, y) in a.results.iter().zip(&b.results) {
        assert_eq!(x.confidence.lower, y.confidence.lower);
        assert_eq!(x.confidence.upper, y.confidence.upper);
        assert_eq!(x.converged, y.converged);
        match (&x.diagnostics, &y.diagnostics) {
            (
                Diagnostics::Walk { counters: c, .. },
                Diagnostics::Walk { counters: d, .. },
            ) => assert_eq!(c, d),
            other => panic!("unexpected diagnostics {other:?}"),
        }
    }
}

#[test]
fn interrupted_walks_never_report_converged() {
    let (model, minimizer) = surface(2);
    let model = model.with_delay(Duration::from_millis(5));
    let search = WeakenedGridSearch::new(base_config());
    let handle = search.interrupt_handle();

    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        handle.interrupt();
    });
    let report = search.run(&model, &minimizer).unwrap();
    stopper.join().unwrap();

    assert!(report.interrupted);
    for result in &report.results {
        assert!(!result.converged);
    }
}
