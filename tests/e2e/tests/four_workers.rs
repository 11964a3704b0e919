//! Four workers, ten rounds, one accumulator

use once_cell::sync::Lazy;
use spindle::{Registry, WorkerOptions};
use spindle_e2e_tests::{expected_total, registry, run_rounds, DEFAULT_ROUNDS};
use std::sync::Arc;

static REGISTRY: Lazy<Arc<Registry>> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    registry()
        .and_then(|builder| builder.install())
        .expect("scenario registry installs")
});

#[tokio::test]
async fn test_accumulator_sums_every_round() {
    Lazy::force(&REGISTRY);

    let report = run_rounds(DEFAULT_ROUNDS, WorkerOptions::default())
        .await
        .unwrap();
    assert_eq!(report.rounds, 10);
    assert_eq!(report.total, 100);
    assert_eq!(expected_total(DEFAULT_ROUNDS), 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scenario_repeats_on_a_multi_thread_host() {
    Lazy::force(&REGISTRY);

    for rounds in [1, 3] {
        let report = run_rounds(rounds, WorkerOptions::named("e2e-worker"))
            .await
            .unwrap();
        assert_eq!(report.rounds, rounds as i64);
        assert_eq!(report.total, expected_total(rounds));
    }
}

#[test]
fn test_coordinator_runs_as_main() {
    Lazy::force(&REGISTRY);
    assert_eq!(spindle::run_main(vec!["4".to_string()]).unwrap(), 0);
}
