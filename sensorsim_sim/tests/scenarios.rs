//! Every scenario across a spread of seeds.

use sensorsim_sim::scenarios::ScenarioId;
use sensorsim_sim::ScenarioRunner;

#[test]
fn test_all_scenarios_pass_across_seeds() {
    for seed in [1, 42, 1337, 0xDEAD_BEEF] {
        let runner = ScenarioRunner::new(seed);
        for scenario in ScenarioId::all() {
            let result = runner.run(scenario);
            assert!(
                result.passed,
                "{} (seed={}) failed: {:?}",
                scenario,
                seed,
                result.failure_reason
            );
        }
    }
}

#[test]
fn test_same_seed_same_metrics() {
    for scenario in [ScenarioId::InitialSync, ScenarioId::CatalogOutage, ScenarioId::Shutdown] {
        let first = ScenarioRunner::new(99).run(scenario);
        let second = ScenarioRunner::new(99).run(scenario);
        assert_eq!(first.metrics, second.metrics, "{} diverged", scenario);
        assert_eq!(first.virtual_secs, second.virtual_secs);
    }
}
