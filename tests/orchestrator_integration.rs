//! End-to-end orchestrator runs against in-memory sites.
//!
//! Every test drives the full phase sequence with mocked control planes, a
//! loopback data exchange and a scripted SSH executor. Tests that wait on
//! failover run with a paused clock so polling advances instantly.

#[allow(dead_code)]
mod common;

use common::*;
use failover_tester::config::{ExpectedMetric, TestScenario, TesterConfig, ToolkitConfig};
use failover_tester::orchestrator::{RunOptions, TestOrchestrator, TestPhase, TestResult};
use failover_tester::Site;
use std::time::Duration;

const ALL_PHASES: [TestPhase; 7] = TestPhase::ALL;

async fn run(env: &TestEnv, sites: &Sites, scenario: TestScenario) -> TestResult {
    run_with(env.config(), sites, scenario, RunOptions::default()).await
}

async fn run_with(
    config: TesterConfig,
    sites: &Sites,
    scenario: TestScenario,
    options: RunOptions,
) -> TestResult {
    let mut orchestrator = TestOrchestrator::new(config, scenario, sites.collaborators(), options)
        .expect("orchestrator should build");
    orchestrator.run_test().await
}

// ============================================================================
// Happy Path
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_api_stop_job_fails_over() {
    let env = TestEnv::new();
    let sites = Sites::failover_pair();
    let scenario = api_stop_scenario("api-stop", 200);

    let result = run(&env, &sites, scenario).await;

    assert!(result.success, "issues: {:?}", result.issues);
    assert_phases(&result, &ALL_PHASES).assert();
    assert!(result.issues.is_empty());

    let rto = result.rto_seconds.expect("failover should be detected");
    assert!(rto < 10.0, "rto {} should be within expectation", rto);
    assert_eq!(result.rpo_events, Some(0));
    assert_eq!(result.metrics["failover_completed"], true);
    assert_eq!(result.metrics["expected_recovery_time_seconds"], 10.0);
    assert_eq!(result.metrics["data_injection"]["count"], 200);
    assert!(result.metrics.contains_key("fault_injection"));

    assert_eq!(sites.primary.count("DELETE instances/instance-a/jobs/job-1"), 1);
    assert!(sites.executor.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_data_flows_primary_to_secondary() {
    let env = TestEnv::new();
    let sites = Sites::failover_pair();

    let result = run(&env, &sites, api_stop_scenario("flow", 50)).await;
    assert!(result.success, "issues: {:?}", result.issues);

    let calls = sites.exchange.calls();
    assert_eq!(calls.first().map(|c| (c.0.as_str(), c.1)), Some(("inject", Site::Primary)));
    assert_eq!(
        calls.last().map(|c| (c.0.as_str(), c.1, c.2)),
        Some(("retrieve", Site::Secondary, 50))
    );

    let snapshots = env.snapshots();
    assert_eq!(snapshots.len(), 2, "snapshots: {:?}", snapshots);
    assert!(snapshots.iter().any(|s| s.ends_with("_injected_data.json")));
    assert!(snapshots.iter().any(|s| s.ends_with("_retrieved_data.json")));
}

#[tokio::test(start_paused = true)]
async fn test_loss_within_budget_passes() {
    let env = TestEnv::new();
    let sites = Sites::failover_pair();
    sites.exchange.drop_first(10);

    let result = run(&env, &sites, api_stop_scenario("within", 1000)).await;

    assert!(result.success, "issues: {:?}", result.issues);
    assert_eq!(result.rpo_events, Some(10));
    let validation = result.validation.expect("validation should run");
    assert!(validation.rpo_satisfied);
    assert!((validation.data_loss_percentage - 1.0).abs() < 1e-9);
    assert_eq!(validation.data_validation.retrieved_count, 990);
}

// ============================================================================
// Recovery Time
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_rto_measures_time_to_secondary_activation() {
    let env = TestEnv::new();
    let primary = MockControlPlane::running(JOB_ID);
    let secondary = MockControlPlane::standby(JOB_ID);
    let sites = Sites {
        primary: primary.clone(),
        secondary: secondary.clone(),
        exchange: LoopbackExchange::new(),
        executor: ScriptedExecutor::new(),
    };
    sites.executor.reply("sudo iptables -L -n", "DROP       all  --  10.20.0.0/16  0.0.0.0/0", 0);

    // The partition takes the primary job down at once; the secondary needs
    // three seconds to come up.
    let promote = tokio::spawn(async move {
        primary.remove_job(JOB_ID);
        tokio::time::sleep(Duration::from_secs(3)).await;
        secondary.set_job(JOB_ID, "running", "healthy");
    });

    let result = run(&env, &sites, partition_scenario("rto", 20)).await;
    promote.await.unwrap();

    assert!(result.success, "issues: {:?}", result.issues);
    let rto = result.rto_seconds.expect("failover should be detected");
    assert!((3.0..=4.5).contains(&rto), "rto was {}", rto);
    assert_eq!(result.metrics["recovery_time_seconds"], rto);
    assert!(sites.executor.ran("sudo iptables -A INPUT -s 10.20.0.0/16 -j DROP"));
    assert!(sites.executor.ran("sudo iptables -F"));
}

#[tokio::test(start_paused = true)]
async fn test_undetected_failover_has_no_rto() {
    let env = TestEnv::new();
    let sites = Sites::failover_pair();
    sites.executor.reply("sudo iptables -L -n", "DROP       all  --  10.20.0.0/16  0.0.0.0/0", 0);

    let started = tokio::time::Instant::now();
    let result = run(&env, &sites, partition_scenario("no-failover", 20)).await;

    assert_eq!(result.rto_seconds, None);
    assert_eq!(result.metrics["failover_completed"], false);
    assert!(started.elapsed() >= Duration::from_secs(20), "monitoring waits twice the expected RTO");
    assert_phases(&result, &ALL_PHASES).assert();
}

// ============================================================================
// Failure Paths
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_phase_error_jumps_to_teardown() {
    let env = TestEnv::new();
    let sites = Sites::failover_pair();
    sites.exchange.fail_inject();

    let result = run(&env, &sites, api_stop_scenario("inject-fails", 10)).await;

    assert!(!result.success);
    assert_phases(&result, &[TestPhase::Setup, TestPhase::Teardown]).assert();
    assert_issue(&result, "Error in phase PRE_FAILOVER").assert();
    assert_issue(&result, "input port rejected the batch").assert();
    assert!(result.validation.is_none());
    assert_eq!(result.rpo_events, None);

    // No fault was injected.
    assert_eq!(sites.primary.count("DELETE"), 0);
    assert!(sites.executor.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_rpo_gate_fails_run() {
    let env = TestEnv::new();
    let sites = Sites::failover_pair();
    sites.exchange.drop_first(30);

    let result = run(&env, &sites, api_stop_scenario("rpo", 1000)).await;

    assert!(!result.success);
    assert_phases(&result, &ALL_PHASES).assert();
    assert_eq!(result.rpo_events, Some(30));
    assert_issue(&result, "RPO not satisfied: Loss of 3.00% exceeds expected 2.00%").assert();
    assert_issue(&result, "30 events missing (3.00%)").assert();

    let validation = result.validation.expect("validation should run");
    assert!(!validation.rpo_satisfied);
    assert_eq!(validation.data_validation.missing_event_ids, None, "more than ten ids are not listed");
}

#[tokio::test(start_paused = true)]
async fn test_total_loss_counts_every_event() {
    let env = TestEnv::new();
    let sites = Sites::failover_pair();
    sites.exchange.drop_first(100);

    let result = run(&env, &sites, api_stop_scenario("total-loss", 100)).await;

    assert!(!result.success);
    assert_eq!(result.rpo_events, Some(100));
    assert_issue(&result, "No retrieved data to validate").assert();
    assert_issue(&result, "RPO not satisfied: Loss of 100.00% exceeds expected 2.00%").assert();

    let validation = result.validation.expect("validation should run");
    assert!(!validation.rpo_satisfied);
    assert_eq!(validation.data_loss_percentage, 100.0);
}

#[tokio::test(start_paused = true)]
async fn test_out_of_order_output_fails_validation() {
    let env = TestEnv::new();
    let sites = Sites::failover_pair();
    sites.exchange.reverse_output();

    let result = run(&env, &sites, api_stop_scenario("reordered", 5)).await;

    assert!(!result.success);
    assert_eq!(result.rpo_events, Some(0));
    assert_issue(&result, "events out of order").assert();
}

#[tokio::test(start_paused = true)]
async fn test_verification_failure_is_reported() {
    let env = TestEnv::new();
    let sites = Sites::failover_pair();
    // Partition rules never show up in the firewall listing.
    sites.executor.reply("sudo iptables -L -n", "Chain INPUT (policy ACCEPT)", 0);

    let result = run(&env, &sites, partition_scenario("unverified", 10)).await;

    assert!(!result.success);
    assert_phases(&result, &[TestPhase::Setup, TestPhase::PreFailover, TestPhase::Teardown]).assert();
    assert_issue(&result, "Error in phase FAULT_INJECTION: ").assert();
    assert_issue(&result, "network_partition fault is not in effect").assert();
    // The partition was applied, so teardown still removes it.
    assert!(sites.executor.ran("sudo iptables -F"));
}

#[tokio::test(start_paused = true)]
async fn test_combined_partial_injection_cleans_up_applied_faults() {
    let env = TestEnv::new();
    let sites = Sites::failover_pair();
    sites.executor.reply("sudo tc qdisc add", "", 1);

    let result = run(&env, &sites, combined_scenario("combined-partial", 10)).await;

    assert!(!result.success);
    assert_issue(&result, "Error in phase FAULT_INJECTION: ").assert();
    assert_issue(&result, "Failed to add tc rules").assert();
    assert_phases(&result, &[TestPhase::Setup, TestPhase::PreFailover, TestPhase::Teardown]).assert();

    // The API half went through before the run aborted.
    assert_eq!(sites.primary.count("DELETE instances/instance-a/jobs/job-1"), 1);
}

// ============================================================================
// Options
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_skip_cleanup_leaves_faults_in_place() {
    let env = TestEnv::new();
    let sites = Sites::failover_pair();
    sites.executor.reply("sudo tc qdisc show", "qdisc netem 8001: root refcnt 2 limit 1000 delay 250ms", 0);

    let result = run_with(
        env.config(),
        &sites,
        combined_scenario("skip-cleanup", 10),
        RunOptions { skip_cleanup: true },
    )
    .await;

    assert!(result.success, "issues: {:?}", result.issues);
    assert!(!result.phases_completed.contains(&TestPhase::Teardown));
    assert_eq!(result.phases_completed.last(), Some(&TestPhase::Validation));

    // Only the pre-injection reset deleted the qdisc.
    let deletes = sites
        .executor
        .log()
        .iter()
        .filter(|line| line.contains("sudo tc qdisc del dev eth1 root"))
        .count();
    assert_eq!(deletes, 1);
    assert!(!sites.executor.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_combined_cleanup_reverts_network_fault() {
    let env = TestEnv::new();
    let sites = Sites::failover_pair();
    sites.executor.reply("sudo tc qdisc show", "qdisc netem 8001: root refcnt 2 limit 1000 delay 250ms", 0);

    let result = run(&env, &sites, combined_scenario("combined", 10)).await;

    assert!(result.success, "issues: {:?}", result.issues);
    assert_phases(&result, &ALL_PHASES).assert();
    assert!(sites.executor.ran("primary-node-1: sudo tc qdisc add dev eth1 root netem delay 250ms"));
    let deletes = sites
        .executor
        .log()
        .iter()
        .filter(|line| line.contains("sudo tc qdisc del dev eth1 root"))
        .count();
    assert_eq!(deletes, 2);
}

// ============================================================================
// Metrics and Toolkit
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_expected_metrics_evaluated_after_failover() {
    let env = TestEnv::new();
    let sites = Sites::failover_pair();
    let mut scenario = api_stop_scenario("metrics", 10);
    scenario.expected_metrics.insert(
        "health_percentage".to_string(),
        ExpectedMetric {
            min: Some(90.0),
            ..ExpectedMetric::default()
        },
    );

    let result = run(&env, &sites, scenario).await;

    assert!(result.success, "issues: {:?}", result.issues);
    let validation = result.validation.expect("validation should run");
    assert_eq!(validation.metrics_validation.metrics_evaluated, 1);
    assert_eq!(validation.metrics_validation.metrics_passed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_missing_metric_fails_validation() {
    let env = TestEnv::new();
    let sites = Sites::failover_pair();
    let mut scenario = api_stop_scenario("missing-metric", 10);
    scenario.expected_metrics.insert(
        "throughput.tuples_per_second".to_string(),
        ExpectedMetric {
            min: Some(1.0),
            ..ExpectedMetric::default()
        },
    );

    let result = run(&env, &sites, scenario).await;

    assert!(!result.success);
    assert_issue(&result, "Metric 'throughput.tuples_per_second' not found in collected data").assert();
}

fn toolkit_config(env: &TestEnv) -> TesterConfig {
    let mut config = env.config();
    config.crossdc_toolkit = Some(ToolkitConfig {
        status_check_interval_seconds: 1.0,
        local_dc_name: "dc-east".to_string(),
        remote_dc_name: "dc-west".to_string(),
        operation_mode: 1,
        ..ToolkitConfig::default()
    });
    config
}

#[tokio::test(start_paused = true)]
async fn test_toolkit_confirms_failover() {
    let env = TestEnv::new();
    let sites = Sites::failover_pair();

    let result = run_with(
        toolkit_config(&env),
        &sites,
        api_stop_scenario("toolkit", 10),
        RunOptions::default(),
    )
    .await;

    assert!(result.success, "issues: {:?}", result.issues);
    assert_eq!(result.metrics["toolkit_status"]["failover_detected"], true);
    assert_eq!(result.metrics["toolkit_status"]["local_dc_name"], "dc-east");

    let toolkit = result.validation.expect("validation should run").toolkit_validation;
    assert!(toolkit.success);
    assert_eq!(toolkit.secondary_up, Some(true));
    assert_eq!(toolkit.failover_detected, Some(true));
}

#[tokio::test(start_paused = true)]
async fn test_toolkit_reports_missing_failover() {
    let env = TestEnv::new();
    let sites = Sites::failover_pair();
    sites.executor.reply("sudo iptables -L -n", "DROP       all  --  10.20.0.0/16  0.0.0.0/0", 0);

    let result = run_with(
        toolkit_config(&env),
        &sites,
        partition_scenario("toolkit-miss", 10),
        RunOptions::default(),
    )
    .await;

    assert!(!result.success);
    assert_issue(&result, "Secondary DC is not up after failover").assert();
    assert_issue(&result, "Failover not detected by toolkit").assert();
}

// ============================================================================
// Construction
// ============================================================================

#[test]
fn test_invalid_scenario_rejected_before_run() {
    let env = TestEnv::new();
    let sites = Sites::failover_pair();
    let mut scenario = api_stop_scenario("invalid", 10);
    scenario.expected_recovery_time_seconds = 0.0;

    let err = TestOrchestrator::new(env.config(), scenario, sites.collaborators(), RunOptions::default())
        .err()
        .expect("zero recovery time must be rejected");
    assert!(err.to_string().contains("expected_recovery_time_seconds"));
    assert!(sites.primary.requests().is_empty());
}
