//! # Orchestrator Integration Tests / 编排器集成测试
//!
//! Whole case lifecycles against scripted hosts: status classification,
//! teardown guarantees, background workloads, timeouts and cancellation,
//! and plan cases run end to end.
//!
//! 针对脚本化主机的完整用例生命周期：状态分类、清理保证、后台负载、
//! 超时与取消，以及端到端运行的计划用例。

mod common;

use async_trait::async_trait;
use common::{RecordingInjector, Reply, ScriptedTransport, case_environment, hosts};
use ftest_runner::cli::commands::run::{build_environment, run_cases};
use ftest_runner::config::{TestCase, TestPlan};
use ftest_runner::core::errors::HarnessError;
use ftest_runner::core::orchestrator::{Scenario, TestContext, TestOrchestrator};
use ftest_runner::core::planner::{Selection, plan_execution};
use ftest_runner::execution::run_test_case;
use ftest_runner::infra::remote::{RemoteExecutor, RunOptions};
use ftest_runner::models::{Stage, Status};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// What the act stage of a [`Lifecycle`] does.
#[derive(Debug, Clone)]
enum Act {
    Nothing,
    Background(String),
    Sleep(Duration),
    Warn(&'static str),
    Panic(&'static str),
}

/// A scenario that records what ran, and fails where it is told to.
#[derive(Debug)]
struct Lifecycle {
    name: &'static str,
    skip: Option<&'static str>,
    fail_setup: bool,
    act: Act,
    fail_verify: bool,
    fail_teardown: bool,
    log: Arc<Mutex<Vec<String>>>,
}

impl Lifecycle {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            skip: None,
            fail_setup: false,
            act: Act::Nothing,
            fail_verify: false,
            fail_teardown: false,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn push(&self, entry: &str) {
        self.log.lock().unwrap().push(entry.to_string());
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl Scenario for Lifecycle {
    fn name(&self) -> &str {
        self.name
    }

    fn skip_reason(&self) -> Option<String> {
        self.skip.map(str::to_string)
    }

    async fn setup(&self, ctx: &mut TestContext) -> Result<(), HarnessError> {
        self.push("setup");
        for resource in ["pool", "container"] {
            let log = Arc::clone(&self.log);
            ctx.push_cleanup(resource, async move {
                log.lock().unwrap().push(format!("release {resource}"));
                Ok(())
            });
        }
        if self.fail_setup {
            return Err(HarnessError::Tool {
                tool: "dmg".into(),
                message: "pool create: DER_NOSPACE(-1007)".into(),
            });
        }
        Ok(())
    }

    async fn act(&self, ctx: &mut TestContext) -> Result<(), HarnessError> {
        self.push("act");
        match &self.act {
            Act::Nothing => {}
            Act::Background(command) => {
                ctx.spawn(&hosts("client-[1-2]"), command, RunOptions::default());
            }
            Act::Sleep(duration) => tokio::time::sleep(*duration).await,
            Act::Warn(message) => ctx.warn(*message),
            Act::Panic(message) => panic!("{message}"),
        }
        Ok(())
    }

    async fn verify(&self, _ctx: &mut TestContext) -> Result<(), HarnessError> {
        self.push("verify");
        if self.fail_verify {
            return Err(HarnessError::assertion("rebuild state", "done", "busy"));
        }
        Ok(())
    }

    async fn teardown(&self, _ctx: &mut TestContext) -> Result<(), HarnessError> {
        self.push("teardown");
        if self.fail_teardown {
            return Err(HarnessError::Tool {
                tool: "dmg".into(),
                message: "pool destroy: DER_BUSY(-1012)".into(),
            });
        }
        Ok(())
    }
}

fn context(name: &str, transport: Arc<ScriptedTransport>, dir: &TempDir) -> TestContext {
    TestContext::new(
        name,
        Some(dir.path()),
        Arc::new(RemoteExecutor::new(transport)),
        Arc::new(RecordingInjector::default()),
    )
    .unwrap()
}

/// A context whose hosts are all the local shell.
fn local_context(name: &str, dir: &TempDir) -> TestContext {
    TestContext::new(
        name,
        Some(dir.path()),
        Arc::new(RemoteExecutor::local()),
        Arc::new(RecordingInjector::default()),
    )
    .unwrap()
}

/// A workload that leaves `marker` behind only if it runs to completion.
fn delayed_touch(marker: &std::path::Path) -> String {
    format!("sleep 1; touch '{}'", marker.display())
}

#[tokio::test]
async fn test_passing_case_releases_in_reverse_order() {
    let dir = TempDir::new().unwrap();
    let scenario = Lifecycle::new("pass");
    let mut ctx = context("pass", ScriptedTransport::new(), &dir);

    let outcome = TestOrchestrator::default().run(&scenario, &mut ctx).await;

    assert_eq!(outcome.status, Status::Pass);
    assert_eq!(outcome.stage, None);
    assert_eq!(
        scenario.log(),
        vec!["setup", "act", "verify", "teardown", "release container", "release pool"]
    );
}

#[tokio::test]
async fn test_teardown_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let scenario = Lifecycle::new("twice");
    let orchestrator = TestOrchestrator::default();
    let mut ctx = context("twice", ScriptedTransport::new(), &dir);

    orchestrator.run(&scenario, &mut ctx).await;
    let second = orchestrator.teardown(&scenario, &mut ctx).await;
    let third = orchestrator.teardown(&scenario, &mut ctx).await;

    assert!(second.is_empty());
    assert!(third.is_empty());
    assert!(ctx.is_torn_down());
    let log = scenario.log();
    assert_eq!(log.iter().filter(|e| *e == "teardown").count(), 1);
    assert_eq!(log.iter().filter(|e| *e == "release pool").count(), 1);
}

#[tokio::test]
async fn test_setup_failure_is_error_and_still_tears_down() {
    let dir = TempDir::new().unwrap();
    let scenario = Lifecycle {
        fail_setup: true,
        ..Lifecycle::new("setup_fails")
    };
    let mut ctx = context("setup_fails", ScriptedTransport::new(), &dir);

    let outcome = TestOrchestrator::default().run(&scenario, &mut ctx).await;

    assert_eq!(outcome.status, Status::Error);
    assert_eq!(outcome.stage, Some(Stage::Setup));
    assert!(outcome.message.unwrap().contains("DER_NOSPACE"));
    assert_eq!(
        scenario.log(),
        vec!["setup", "teardown", "release container", "release pool"]
    );
}

#[tokio::test]
async fn test_assertion_in_verify_is_fail() {
    let dir = TempDir::new().unwrap();
    let scenario = Lifecycle {
        fail_verify: true,
        ..Lifecycle::new("verify_fails")
    };
    let mut ctx = context("verify_fails", ScriptedTransport::new(), &dir);

    let outcome = TestOrchestrator::default().run(&scenario, &mut ctx).await;

    assert_eq!(outcome.status, Status::Fail);
    assert_eq!(outcome.stage, Some(Stage::Verify));
    assert!(scenario.log().contains(&"teardown".to_string()));
}

#[tokio::test]
async fn test_teardown_error_turns_pass_into_error() {
    let dir = TempDir::new().unwrap();
    let scenario = Lifecycle {
        fail_teardown: true,
        ..Lifecycle::new("teardown_fails")
    };
    let mut ctx = context("teardown_fails", ScriptedTransport::new(), &dir);

    let outcome = TestOrchestrator::default().run(&scenario, &mut ctx).await;

    assert_eq!(outcome.status, Status::Error);
    assert_eq!(outcome.stage, Some(Stage::Teardown));
    assert_eq!(outcome.teardown_errors.len(), 1);
    assert!(outcome.teardown_errors[0].contains("DER_BUSY"));
    // The resources are still released after the scenario's teardown failed.
    assert!(scenario.log().ends_with(&["release container".to_string(), "release pool".to_string()]));
}

#[tokio::test]
async fn test_teardown_error_keeps_the_verify_failure() {
    let dir = TempDir::new().unwrap();
    let scenario = Lifecycle {
        fail_verify: true,
        fail_teardown: true,
        ..Lifecycle::new("both_fail")
    };
    let mut ctx = context("both_fail", ScriptedTransport::new(), &dir);

    let outcome = TestOrchestrator::default().run(&scenario, &mut ctx).await;

    assert_eq!(outcome.status, Status::Fail);
    assert_eq!(outcome.stage, Some(Stage::Verify));
    assert_eq!(outcome.teardown_errors.len(), 1);
}

#[tokio::test]
async fn test_warnings_make_a_pass_warn() {
    let dir = TempDir::new().unwrap();
    let scenario = Lifecycle {
        act: Act::Warn("pool is 95% full"),
        ..Lifecycle::new("warns")
    };
    let mut ctx = context("warns", ScriptedTransport::new(), &dir);

    let outcome = TestOrchestrator::default().run(&scenario, &mut ctx).await;

    assert_eq!(outcome.status, Status::Warn);
    assert_eq!(outcome.warnings, vec!["pool is 95% full".to_string()]);
}

#[tokio::test]
async fn test_failed_background_workload_fails_the_act_stage() {
    let dir = TempDir::new().unwrap();
    let transport = ScriptedTransport::new();
    transport.on(Some("client-2"), "ior", vec![Reply::slow(1, Duration::from_millis(20))]);
    let scenario = Lifecycle {
        act: Act::Background("ior -w -k".into()),
        ..Lifecycle::new("workload_fails")
    };
    let mut ctx = context("workload_fails", transport.clone(), &dir);

    let outcome = TestOrchestrator::default().run(&scenario, &mut ctx).await;

    assert_eq!(outcome.status, Status::Error);
    assert_eq!(outcome.stage, Some(Stage::Act));
    assert!(outcome.message.unwrap().contains("client-2"));
    // Verify never ran, teardown did.
    assert!(!scenario.log().contains(&"verify".to_string()));
    assert!(scenario.log().contains(&"teardown".to_string()));
    assert_eq!(transport.calls_matching("ior -w -k"), 2);
}

#[tokio::test]
async fn test_background_workload_is_joined_before_verify() {
    let dir = TempDir::new().unwrap();
    let transport = ScriptedTransport::new();
    transport.on(None, "ior", vec![Reply::slow(0, Duration::from_millis(30))]);
    let scenario = Lifecycle {
        act: Act::Background("ior -w".into()),
        ..Lifecycle::new("workload")
    };
    let mut ctx = context("workload", transport, &dir);

    let outcome = TestOrchestrator::default().run(&scenario, &mut ctx).await;

    assert_eq!(outcome.status, Status::Pass);
    assert_eq!(ctx.background_jobs(), 0);
    assert!(ctx.transcript().contains("ior -w"));
}

#[tokio::test]
async fn test_skipped_case_runs_nothing() {
    let dir = TempDir::new().unwrap();
    let scenario = Lifecycle {
        skip: Some("needs 8 engines"),
        ..Lifecycle::new("skipped")
    };
    let mut ctx = context("skipped", ScriptedTransport::new(), &dir);

    let outcome = TestOrchestrator::default().run(&scenario, &mut ctx).await;

    assert_eq!(outcome.status, Status::Skip);
    assert_eq!(outcome.message.as_deref(), Some("needs 8 engines"));
    assert!(scenario.log().is_empty());
}

#[tokio::test]
async fn test_case_timeout_interrupts_and_tears_down() {
    let dir = TempDir::new().unwrap();
    let scenario = Lifecycle {
        act: Act::Sleep(Duration::from_secs(30)),
        ..Lifecycle::new("hangs")
    };
    let mut ctx = context("hangs", ScriptedTransport::new(), &dir);
    let orchestrator = TestOrchestrator::default().with_case_timeout(Some(Duration::from_millis(50)));

    let outcome = orchestrator.run(&scenario, &mut ctx).await;

    assert_eq!(outcome.status, Status::Interrupt);
    assert_eq!(outcome.stage, Some(Stage::Act));
    assert!(outcome.message.unwrap().contains("timeout"));
    assert!(scenario.log().contains(&"release pool".to_string()));
}

#[tokio::test]
async fn test_cancellation_interrupts_the_running_stage() {
    let dir = TempDir::new().unwrap();
    let token = CancellationToken::new();
    let scenario = Lifecycle {
        act: Act::Sleep(Duration::from_secs(30)),
        ..Lifecycle::new("cancelled")
    };
    let mut ctx = context("cancelled", ScriptedTransport::new(), &dir).with_cancellation(token.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });
    let outcome = TestOrchestrator::default().run(&scenario, &mut ctx).await;
    canceller.await.unwrap();

    assert_eq!(outcome.status, Status::Interrupt);
    assert_eq!(outcome.stage, Some(Stage::Act));
    assert!(scenario.log().contains(&"teardown".to_string()));
}

#[tokio::test]
async fn test_case_timeout_while_joining_kills_the_workload() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("workload_finished");
    let scenario = Lifecycle {
        act: Act::Background(delayed_touch(&marker)),
        ..Lifecycle::new("join_times_out")
    };
    let mut ctx = local_context("join_times_out", &dir);
    let orchestrator = TestOrchestrator::default().with_case_timeout(Some(Duration::from_millis(200)));

    let outcome = orchestrator.run(&scenario, &mut ctx).await;

    assert_eq!(outcome.status, Status::Interrupt);
    // The join belongs to the act stage, whether it fails or is interrupted.
    assert_eq!(outcome.stage, Some(Stage::Act));
    assert_eq!(ctx.background_jobs(), 0);
    assert!(scenario.log().ends_with(&["release container".to_string(), "release pool".to_string()]));
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!marker.exists(), "the workload outlived its case");
}

#[tokio::test]
async fn test_cancellation_while_joining_kills_the_workload() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("workload_finished");
    let token = CancellationToken::new();
    let scenario = Lifecycle {
        act: Act::Background(delayed_touch(&marker)),
        ..Lifecycle::new("join_cancelled")
    };
    let mut ctx = local_context("join_cancelled", &dir).with_cancellation(token.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();
    });
    let outcome = TestOrchestrator::default().run(&scenario, &mut ctx).await;
    canceller.await.unwrap();

    assert_eq!(outcome.status, Status::Interrupt);
    assert_eq!(outcome.stage, Some(Stage::Act));
    assert!(scenario.log().contains(&"teardown".to_string()));
    assert!(scenario.log().contains(&"release pool".to_string()));
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!marker.exists(), "the workload outlived its case");
}

#[tokio::test]
async fn test_interrupted_join_kills_the_workload_on_every_host() {
    let dir = TempDir::new().unwrap();
    let transport = ScriptedTransport::new();
    transport.on(None, "ior", vec![Reply::slow(0, Duration::from_secs(30))]);
    let scenario = Lifecycle {
        act: Act::Background("ior -w -k".into()),
        ..Lifecycle::new("remote_join_times_out")
    };
    let mut ctx = context("remote_join_times_out", transport.clone(), &dir);
    let orchestrator = TestOrchestrator::default().with_case_timeout(Some(Duration::from_millis(100)));

    let outcome = orchestrator.run(&scenario, &mut ctx).await;

    assert_eq!(outcome.status, Status::Interrupt);
    let mut killed: Vec<String> = transport.kills().into_iter().map(|(host, _)| host).collect();
    killed.sort();
    assert_eq!(killed, vec!["client-1".to_string(), "client-2".to_string()]);
    assert!(transport.kills().iter().all(|(_, command)| command.contains("ior -w -k")));
}

#[tokio::test]
async fn test_panicking_stage_is_error_and_still_releases() {
    let dir = TempDir::new().unwrap();
    let scenario = Lifecycle {
        act: Act::Panic("index out of bounds"),
        ..Lifecycle::new("panics")
    };
    let mut ctx = context("panics", ScriptedTransport::new(), &dir);

    let outcome = TestOrchestrator::default().run(&scenario, &mut ctx).await;

    assert_eq!(outcome.status, Status::Error);
    assert_eq!(outcome.stage, Some(Stage::Act));
    assert!(outcome.message.unwrap().contains("index out of bounds"));
    assert_eq!(
        scenario.log(),
        vec!["setup", "act", "teardown", "release container", "release pool"]
    );
    assert!(ctx.is_torn_down());
}

#[tokio::test]
async fn test_cancelled_before_start_is_cancel() {
    let dir = TempDir::new().unwrap();
    let token = CancellationToken::new();
    token.cancel();
    let scenario = Lifecycle::new("never_started");
    let mut ctx = context("never_started", ScriptedTransport::new(), &dir).with_cancellation(token);

    let outcome = TestOrchestrator::default().run(&scenario, &mut ctx).await;

    assert_eq!(outcome.status, Status::Cancel);
    assert!(scenario.log().is_empty());
}

const REBUILD_CASE: &str = r#"
name = "rebuild_after_fault"
tags = ["rebuild"]

[[setup]]
kind = "run"
hosts = "servers"
command = "dmg pool create TestPool"
cleanup = "dmg pool destroy TestPool"

[[act]]
kind = "fault"
hosts = "server-2"
command = "dmg system stop --ranks=1"

[[wait]]
kind = "poll"
hosts = "clients"
command = { tool = "dmg", flags = ["json"], command = "pool", action = "query TestPool" }
max_attempts = 5
interval_secs = 0.0
expect = { json_pointer = "/response/rebuild/state", equals = "done" }

[[verify]]
kind = "assert"
hosts = "servers"
command = "dmg system query"
expect = { stdout_contains = "Joined" }
"#;

fn rebuild_reply(state: &str) -> Reply {
    Reply::ok(&format!(
        r#"{{"response": {{"rebuild": {{"state": "{state}"}}}}, "error": null, "status": 0}}"#
    ))
}

#[tokio::test]
async fn test_plan_case_runs_every_stage() {
    let dir = TempDir::new().unwrap();
    let transport = ScriptedTransport::new();
    transport.on(
        None,
        "pool query",
        vec![rebuild_reply("busy"), rebuild_reply("done")],
    );
    transport.on(None, "system query", vec![Reply::ok("Rank 0-1 Joined")]);
    let injector = Arc::new(RecordingInjector::default());
    let env = case_environment(transport.clone(), injector.clone(), &dir);
    let case: TestCase = toml::from_str(REBUILD_CASE).unwrap();

    let result = run_test_case(case, &env).await;

    assert_eq!(result.status, Status::Pass, "{:?}", result.message);
    let faults = injector.faults.lock().unwrap().clone();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].hosts, hosts("server-2"));
    assert_eq!(faults[0].command, "dmg system stop --ranks=1");
    assert_eq!(transport.calls_matching("dmg -j pool query TestPool"), 2);
    // The scoped cleanup ran on every server.
    assert_eq!(transport.calls_matching("dmg pool destroy TestPool"), 3);
    assert!(result.output.contains("Joined"));
    assert!(env.output_dir.join("rebuild_after_fault").is_dir());
}

#[tokio::test]
async fn test_plan_case_assertion_names_the_host() {
    let dir = TempDir::new().unwrap();
    let transport = ScriptedTransport::new();
    transport.on(None, "pool query", vec![rebuild_reply("done")]);
    transport.on(Some("server-3"), "system query", vec![Reply::exit(1)]);
    transport.on(None, "system query", vec![Reply::ok("Joined")]);
    let env = case_environment(transport.clone(), Arc::new(RecordingInjector::default()), &dir);
    let case: TestCase = toml::from_str(REBUILD_CASE).unwrap();

    let result = run_test_case(case, &env).await;

    assert_eq!(result.status, Status::Fail);
    assert_eq!(result.stage, Some(Stage::Verify));
    assert!(result.message.as_deref().unwrap().contains("server-3"));
    assert_eq!(transport.calls_matching("dmg pool destroy TestPool"), 3);
}

#[tokio::test]
async fn test_plan_case_poll_exhaustion_is_error_in_wait() {
    let dir = TempDir::new().unwrap();
    let transport = ScriptedTransport::new();
    transport.on(None, "pool query", vec![rebuild_reply("busy")]);
    let env = case_environment(transport.clone(), Arc::new(RecordingInjector::default()), &dir);
    let case: TestCase = toml::from_str(REBUILD_CASE).unwrap();

    let result = run_test_case(case, &env).await;

    assert_eq!(result.status, Status::Error);
    assert_eq!(result.stage, Some(Stage::Wait));
    assert!(result.message.as_deref().unwrap().contains("5 attempt"));
    assert_eq!(transport.calls_matching("pool query"), 5);
}

#[tokio::test]
async fn test_plan_case_unreachable_host_is_error() {
    let dir = TempDir::new().unwrap();
    let transport = ScriptedTransport::new();
    transport.on(Some("server-1"), "pool create", vec![Reply::Unreachable]);
    let env = case_environment(transport.clone(), Arc::new(RecordingInjector::default()), &dir);
    let case: TestCase = toml::from_str(REBUILD_CASE).unwrap();

    let result = run_test_case(case, &env).await;

    assert_eq!(result.status, Status::Error);
    assert_eq!(result.stage, Some(Stage::Setup));
    assert!(result.message.as_deref().unwrap().contains("server-1"));
    assert_eq!(transport.calls_matching("pool query"), 0);
}

const PARTIAL_SETUP_CASE: &str = r#"
name = "container_create_fails"

[[setup]]
kind = "run"
hosts = "servers"
command = "dmg pool create TestPool"
cleanup = "dmg pool destroy TestPool"

[[setup]]
kind = "run"
hosts = "clients"
command = "daos container create TestPool"
cleanup = "daos container destroy TestPool"

[[verify]]
kind = "assert"
hosts = "servers"
command = "dmg system query"
"#;

#[tokio::test]
async fn test_plan_case_failing_partway_releases_what_was_acquired() {
    let dir = TempDir::new().unwrap();
    let transport = ScriptedTransport::new();
    transport.on(None, "container create", vec![Reply::exit(1)]);
    let env = case_environment(transport.clone(), Arc::new(RecordingInjector::default()), &dir);
    let case: TestCase = toml::from_str(PARTIAL_SETUP_CASE).unwrap();

    let result = run_test_case(case, &env).await;

    assert_eq!(result.status, Status::Error);
    assert_eq!(result.stage, Some(Stage::Setup));
    assert_eq!(transport.calls_matching("dmg pool destroy TestPool"), 3);
    assert_eq!(transport.calls_matching("container destroy"), 0);
    assert_eq!(transport.calls_matching("system query"), 0);
}

const NEGATIVE_INTERVAL_CASE: &str = r#"
name = "negative_interval"

[[setup]]
kind = "run"
hosts = "servers"
command = "dmg pool create TestPool"
cleanup = "dmg pool destroy TestPool"

[[wait]]
kind = "poll"
hosts = "clients"
command = "dmg pool query TestPool"
max_attempts = 3
interval_secs = -1.0
expect = { stdout_contains = "done" }
"#;

#[tokio::test]
async fn test_plan_case_bad_poll_interval_is_error_and_still_releases() {
    let dir = TempDir::new().unwrap();
    let transport = ScriptedTransport::new();
    let env = case_environment(transport.clone(), Arc::new(RecordingInjector::default()), &dir);
    let case: TestCase = toml::from_str(NEGATIVE_INTERVAL_CASE).unwrap();

    let result = run_test_case(case, &env).await;

    assert_eq!(result.status, Status::Error);
    assert_eq!(result.stage, Some(Stage::Wait));
    assert!(result.message.as_deref().unwrap().contains("interval_secs"));
    assert_eq!(transport.calls_matching("pool query"), 0);
    assert_eq!(transport.calls_matching("dmg pool destroy TestPool"), 3);
}

#[tokio::test]
async fn test_plan_case_is_cancelled_when_the_run_was() {
    let dir = TempDir::new().unwrap();
    let transport = ScriptedTransport::new();
    let env = case_environment(transport.clone(), Arc::new(RecordingInjector::default()), &dir);
    env.cancel.cancel();
    let case: TestCase = toml::from_str(REBUILD_CASE).unwrap();

    let result = run_test_case(case, &env).await;

    assert_eq!(result.status, Status::Cancel);
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn test_local_plan_runs_through_the_shell() {
    let dir = TempDir::new().unwrap();
    let path = common::write_plan(&dir, "TestPlan.toml", common::PASSING_LOCAL_PLAN);
    let plan = TestPlan::load(&path).unwrap();
    let output_dir = plan.output_dir.clone();
    let env = build_environment(&plan, CancellationToken::new());
    let execution = plan_execution(plan.cases, &Selection::default()).unwrap();

    let results = run_cases(execution.cases_to_run, 2, env, false).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, Status::Pass, "{:?}", results[0].message);
    // The case directory was archived with the file the setup step created.
    assert!(output_dir.join("marker_file").join("marker").is_file());
}

#[tokio::test]
async fn test_mixed_local_plan_classifies_each_case() {
    let dir = TempDir::new().unwrap();
    let path = common::write_plan(&dir, "TestPlan.toml", common::MIXED_LOCAL_PLAN);
    let plan = TestPlan::load(&path).unwrap();
    let env = build_environment(&plan, CancellationToken::new());
    let execution = plan_execution(plan.cases, &Selection::default()).unwrap();
    assert_eq!(execution.skipped_count, 1);
    assert_eq!(
        execution.cases_to_run.last().map(|c| c.name.as_str()),
        Some("needs_hardware")
    );

    let results = run_cases(execution.cases_to_run, 1, env, false).await;

    let status = |name: &str| {
        results
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.status)
            .unwrap()
    };
    assert_eq!(status("echo_on_every_node"), Status::Pass);
    assert_eq!(status("node_2_disagrees"), Status::Fail);
    assert_eq!(status("needs_hardware"), Status::Skip);
    let failed = results.iter().find(|r| r.name == "node_2_disagrees").unwrap();
    assert!(failed.message.as_deref().unwrap().contains("node-2"));
}

#[tokio::test]
async fn test_fail_fast_cancels_cases_not_started() {
    let dir = TempDir::new().unwrap();
    let transport = ScriptedTransport::new();
    transport.on(None, "false", vec![Reply::exit(1)]);
    let env = case_environment(transport, Arc::new(RecordingInjector::default()), &dir);

    let mut cases = Vec::new();
    for (name, command) in [("a_fails", "false"), ("b_later", "true"), ("c_later", "true")] {
        let case: TestCase = toml::from_str(&format!(
            "name = \"{name}\"\n[[verify]]\nkind = \"assert\"\nhosts = \"servers\"\ncommand = \"{command}\"\n"
        ))
        .unwrap();
        cases.push(case);
    }

    let results = run_cases(cases, 1, env, true).await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].status, Status::Fail);
    assert_eq!(results[1].status, Status::Cancel);
    assert_eq!(results[2].status, Status::Cancel);
}
