//! Predefined test scenarios for agreement verification
//!
//! Provides ready-to-run test scenarios that combine:
//! - Cluster configuration
//! - Workload generation
//! - Fault injection
//! - Agreement checking

use crate::checker::{self, CheckReport};
use crate::cluster::Cluster;
use crate::fault_injection::{FaultInjector, FaultScenario};
use crate::metrics::MetricsSummary;
use crate::workload::{WorkloadConfig, WorkloadGenerator, WorkloadPattern};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn};

/// Errors from scenario execution
#[derive(Error, Debug)]
pub enum ScenarioError {
    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),

    #[error("A cluster needs at least one node")]
    EmptyCluster,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Scenario configuration
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub name: String,
    pub description: String,
    pub fault_scenario: FaultScenario,
    pub workload_config: WorkloadConfig,
    pub recommended_nodes: usize,
    pub inject_fault_at_op: Option<usize>, // When to inject fault (operation number)
    pub heal_fault_at_op: Option<usize>,   // When to heal fault
    /// Chance per operation that a random node revokes a random instance
    pub revoke_rate: f64,
    /// Network steps simulated between two submissions
    pub steps_per_op: usize,
}

/// Scenario execution results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResults {
    pub scenario: String,
    pub seed: u64,
    pub nodes: usize,
    pub operations: usize,
    pub submitted: usize,
    pub rejected: usize,
    /// Total simulation steps, recovery included
    pub steps: u64,
    pub converged: bool,
    pub duration_ms: u64,
    pub check: CheckReport,
    pub metrics: MetricsSummary,
    pub message_counts: BTreeMap<String, u64>,
    /// Store contents of the first node after recovery
    pub final_state: BTreeMap<String, String>,
}

impl ScenarioResults {
    /// Safe, converged, and every instance decided everywhere
    pub fn passed(&self) -> bool {
        self.converged && self.check.is_complete()
    }
}

/// Test suite results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResults {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub seed: u64,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<ScenarioResults>,
}

impl SuiteResults {
    /// Generate JUnit XML report
    pub fn to_junit_xml(&self) -> String {
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str(&format!(
            "<testsuite name=\"Synod Agreement Tests\" tests=\"{}\" failures=\"{}\" errors=\"0\">\n",
            self.total, self.failed
        ));

        for result in &self.results {
            xml.push_str(&format!(
                "  <testcase name=\"{}\" time=\"{:.3}\"",
                result.scenario,
                result.duration_ms as f64 / 1000.0
            ));

            if result.passed() {
                xml.push_str(" />\n");
            } else {
                xml.push_str(">\n");
                let msg = match result.check.violations.first() {
                    Some(violation) => violation.to_string(),
                    None => format!("undecided instances: {:?}", result.check.undecided),
                };
                xml.push_str(&format!("    <failure message=\"{}\"/>\n", escape_xml(&msg)));
                xml.push_str("  </testcase>\n");
            }
        }

        xml.push_str("</testsuite>\n");
        xml
    }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

impl ScenarioConfig {
    /// Replace the scenario's workload with a predefined pattern
    pub fn with_workload(mut self, pattern: WorkloadPattern) -> Self {
        self.workload_config = pattern.config();
        self
    }
}

/// Get a predefined scenario by name
pub fn get_scenario(name: &str) -> Result<ScenarioConfig, ScenarioError> {
    let base = ScenarioConfig {
        name: String::new(),
        description: String::new(),
        fault_scenario: FaultScenario::None,
        workload_config: WorkloadConfig::default(),
        recommended_nodes: 3,
        inject_fault_at_op: None,
        heal_fault_at_op: None,
        revoke_rate: 0.0,
        steps_per_op: 30,
    };

    match name.to_lowercase().as_str() {
        "happy" | "none" => Ok(ScenarioConfig {
            name: "happy".to_string(),
            description: "No faults - baseline test".to_string(),
            ..base
        }),

        "lossy" | "message-loss" | "message_loss" => Ok(ScenarioConfig {
            name: "lossy".to_string(),
            description: "15% message loss with reordering throughout".to_string(),
            fault_scenario: FaultScenario::Lossy,
            recommended_nodes: 5,
            ..base
        }),

        "duplicates" => Ok(ScenarioConfig {
            name: "duplicates".to_string(),
            description: "Heavy message duplication and reordering".to_string(),
            fault_scenario: FaultScenario::Duplicates,
            ..base
        }),

        "partition" => Ok(ScenarioConfig {
            name: "partition".to_string(),
            description: "Network partition mid-test".to_string(),
            fault_scenario: FaultScenario::Partition,
            recommended_nodes: 5,
            inject_fault_at_op: Some(30),
            heal_fault_at_op: Some(70),
            ..base
        }),

        "crash" => Ok(ScenarioConfig {
            name: "crash".to_string(),
            description: "Nodes crash mid-test and recover at the end".to_string(),
            fault_scenario: FaultScenario::Crash,
            recommended_nodes: 5,
            inject_fault_at_op: Some(40),
            ..base
        }),

        "contention" => Ok(ScenarioConfig {
            name: "contention".to_string(),
            description: "Single key, competing revokes on live instances".to_string(),
            workload_config: WorkloadPattern::SingleKey.config(),
            revoke_rate: 0.5,
            steps_per_op: 10,
            ..base
        }),

        "heavy" => Ok(ScenarioConfig {
            name: "heavy".to_string(),
            description: "Moderate loss and duplication with a partition and a crash".to_string(),
            fault_scenario: FaultScenario::Heavy,
            recommended_nodes: 5,
            inject_fault_at_op: Some(25),
            heal_fault_at_op: Some(65),
            revoke_rate: 0.1,
            ..base
        }),

        "chaos" => Ok(ScenarioConfig {
            name: "chaos".to_string(),
            description: "Loss, duplication, reordering, partitions, crashes and revokes".to_string(),
            fault_scenario: FaultScenario::Chaos,
            recommended_nodes: 5,
            inject_fault_at_op: Some(20),
            heal_fault_at_op: Some(60),
            revoke_rate: 0.2,
            steps_per_op: 20,
            ..base
        }),

        _ => Err(ScenarioError::UnknownScenario(name.to_string())),
    }
}

/// Get all predefined scenario names
pub fn list_scenarios() -> Vec<&'static str> {
    vec![
        "happy",
        "lossy",
        "duplicates",
        "partition",
        "crash",
        "contention",
        "heavy",
        "chaos",
    ]
}

/// Run a scenario to completion and check the outcome
pub fn run_scenario(
    config: &ScenarioConfig,
    num_nodes: usize,
    num_operations: usize,
    seed: u64,
) -> Result<ScenarioResults, ScenarioError> {
    if num_nodes == 0 {
        return Err(ScenarioError::EmptyCluster);
    }

    let start = Instant::now();
    info!(
        "Starting scenario: {} ({} nodes, {} ops, seed {})",
        config.name, num_nodes, num_operations, seed
    );

    let mut cluster = Cluster::new(num_nodes, seed);
    let mut injector = FaultInjector::new(config.fault_scenario.config(), seed.wrapping_add(1));
    let mut generator = WorkloadGenerator::new(config.workload_config.clone(), seed.wrapping_add(2));
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(3));

    let mut submitted = 0;
    let mut rejected = 0;

    // Execute operations
    for i in 0..num_operations {
        // Check for fault injection point
        if Some(i) == config.inject_fault_at_op {
            match config.fault_scenario {
                FaultScenario::Partition => injector.inject_partition(&mut cluster),
                FaultScenario::Crash => {
                    injector.inject_random_crash(&mut cluster);
                    injector.inject_random_crash(&mut cluster);
                }
                FaultScenario::Heavy | FaultScenario::Chaos => {
                    injector.inject_partition(&mut cluster);
                    injector.inject_random_crash(&mut cluster);
                }
                _ => {}
            }
        }

        // Check for fault healing point
        if Some(i) == config.heal_fault_at_op {
            injector.heal_all(&mut cluster);
        }

        // Rotate proposers over the live nodes
        let live = cluster.live_nodes();
        let proposer = live[i % live.len()];
        match cluster.submit(proposer, generator.next_command()) {
            Ok(_) => submitted += 1,
            Err(e) => {
                warn!("Submit on node {} rejected: {}", proposer, e);
                rejected += 1;
            }
        }

        // Competing proposer takes over a random instance
        if config.revoke_rate > 0.0 && rng.gen::<f64>() < config.revoke_rate {
            if let Some(highest) = cluster.highest_instance() {
                let node = live[rng.gen_range(0..live.len())];
                let instance = rng.gen_range(0..=highest);
                cluster.revoke(node, instance);
            }
        }

        for _ in 0..config.steps_per_op {
            if !cluster.step(&mut injector) {
                break;
            }
        }
        cluster.tick();
    }

    // Heal everything and let the cluster catch up
    let converged = cluster.converge(&mut injector, 20);
    let check = checker::check(&cluster);

    if !check.is_safe() {
        for violation in &check.violations {
            error!("Scenario {}: {}", config.name, violation);
        }
    }

    let duration = start.elapsed();
    info!(
        "Scenario {} completed in {:?}: {} decided, converged={}",
        config.name, duration, check.decided, converged
    );

    Ok(ScenarioResults {
        scenario: config.name.clone(),
        seed,
        nodes: num_nodes,
        operations: num_operations,
        submitted,
        rejected,
        steps: cluster.clock,
        converged,
        duration_ms: duration.as_millis() as u64,
        check,
        metrics: cluster.metrics.summary(),
        message_counts: cluster.metrics.message_counts.clone(),
        final_state: cluster.nodes[0].store.data().clone(),
    })
}

/// Run every predefined scenario, optionally forcing one workload pattern
pub fn run_suite(
    num_nodes: Option<usize>,
    num_operations: usize,
    seed: u64,
    workload: Option<WorkloadPattern>,
) -> Result<SuiteResults, ScenarioError> {
    let run_id = uuid::Uuid::new_v4().to_string();
    let started_at = Utc::now();
    info!("Suite run {} (seed {})", run_id, seed);

    let scenarios = list_scenarios();
    let mut results = Vec::new();
    let mut passed = 0;
    let mut failed = 0;

    for scenario_name in &scenarios {
        let mut config = get_scenario(scenario_name)?;
        if let Some(pattern) = workload {
            config = config.with_workload(pattern);
        }
        let nodes = num_nodes.unwrap_or(config.recommended_nodes);
        let result = run_scenario(&config, nodes, num_operations, seed)?;

        if result.passed() {
            info!("Scenario {} PASSED", scenario_name);
            passed += 1;
        } else {
            error!("Scenario {} FAILED", scenario_name);
            failed += 1;
        }
        results.push(result);
    }

    Ok(SuiteResults {
        run_id,
        started_at,
        seed,
        total: scenarios.len(),
        passed,
        failed,
        results,
    })
}

/// Write `<scenario>-summary.json` into `output_dir`, creating it if needed
pub fn write_results(output_dir: &Path, results: &ScenarioResults) -> Result<PathBuf, ScenarioError> {
    std::fs::create_dir_all(output_dir)?;
    let path = output_dir.join(format!("{}-summary.json", results.scenario));
    std::fs::write(&path, serde_json::to_string_pretty(results)?)?;
    Ok(path)
}

/// Write a whole suite run as `suite-<run_id>.json`
pub fn write_suite(output_dir: &Path, suite: &SuiteResults) -> Result<PathBuf, ScenarioError> {
    std::fs::create_dir_all(output_dir)?;
    let path = output_dir.join(format!("suite-{}.json", suite.run_id));
    std::fs::write(&path, serde_json::to_string_pretty(suite)?)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_scenario() {
        let happy = get_scenario("happy").unwrap();
        assert_eq!(happy.name, "happy");
        assert_eq!(happy.fault_scenario, FaultScenario::None);

        let partition = get_scenario("partition").unwrap();
        assert_eq!(partition.name, "partition");
        assert_eq!(partition.fault_scenario, FaultScenario::Partition);

        assert!(matches!(
            get_scenario("nonexistent"),
            Err(ScenarioError::UnknownScenario(_))
        ));
    }

    #[test]
    fn test_every_listed_scenario_resolves() {
        for name in list_scenarios() {
            assert_eq!(get_scenario(name).unwrap().name, name);
        }
    }

    #[test]
    fn test_run_happy_scenario() {
        let config = get_scenario("happy").unwrap();
        let result = run_scenario(&config, 3, 30, 1).unwrap();

        assert_eq!(result.scenario, "happy");
        assert_eq!(result.submitted, 30);
        assert!(result.passed(), "{:?}", result.check);
        assert!(result.check.decided >= 30);
        assert_eq!(result.metrics.dropped, 0);
        assert_eq!(result.metrics.decided_ops, 30);
    }

    #[test]
    fn test_workload_override() {
        let config = get_scenario("heavy")
            .unwrap()
            .with_workload(WorkloadPattern::ReadHeavy);
        assert_eq!(config.fault_scenario, FaultScenario::Heavy);
        assert_eq!(config.workload_config.put_ratio, 0.2);

        let result = run_scenario(&config, 5, 40, 3).unwrap();
        assert!(result.passed(), "{:?}", result.check);
    }

    #[test]
    fn test_empty_cluster_is_rejected() {
        let config = get_scenario("happy").unwrap();
        assert!(matches!(
            run_scenario(&config, 0, 10, 0),
            Err(ScenarioError::EmptyCluster)
        ));
    }

    #[test]
    fn test_same_seed_same_run() {
        let config = get_scenario("chaos").unwrap();
        let a = run_scenario(&config, 5, 40, 7).unwrap();
        let b = run_scenario(&config, 5, 40, 7).unwrap();

        assert_eq!(a.steps, b.steps);
        assert_eq!(a.metrics, b.metrics);
        assert_eq!(a.final_state, b.final_state);
    }

    #[test]
    fn test_agreement_holds_across_seeds() {
        for name in ["lossy", "duplicates", "partition", "crash", "contention", "heavy", "chaos"] {
            let config = get_scenario(name).unwrap();
            for seed in 0..8 {
                let result = run_scenario(&config, config.recommended_nodes, 60, seed).unwrap();
                assert!(result.check.is_safe(), "{} seed {}: {:?}", name, seed, result.check.violations);
                assert!(result.passed(), "{} seed {} did not converge: {:?}", name, seed, result.check.undecided);
            }
        }
    }

    #[test]
    fn test_write_results() {
        let dir = tempfile::tempdir().unwrap();
        let config = get_scenario("happy").unwrap();
        let result = run_scenario(&config, 3, 5, 0).unwrap();

        let path = write_results(&dir.path().join("out"), &result).unwrap();
        assert!(path.ends_with("happy-summary.json"));

        let loaded: ScenarioResults =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(loaded.seed, 0);
        assert_eq!(loaded.check, result.check);
    }

    #[test]
    fn test_suite_results_junit() {
        let config = get_scenario("happy").unwrap();
        let ok = run_scenario(&config, 3, 5, 0).unwrap();
        let mut bad = ok.clone();
        bad.scenario = "broken".to_string();
        bad.check.undecided = vec![3];

        let suite = SuiteResults {
            run_id: "test".to_string(),
            started_at: Utc::now(),
            seed: 0,
            total: 2,
            passed: 1,
            failed: 1,
            results: vec![ok, bad],
        };

        let xml = suite.to_junit_xml();
        assert!(xml.contains("tests=\"2\""));
        assert!(xml.contains("failures=\"1\""));
        assert!(xml.contains("<testcase name=\"happy\""));
        assert!(xml.contains("undecided instances: [3]"));
    }
}
