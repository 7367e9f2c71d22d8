//! # Test Execution Engine Module / 测试执行引擎模块
//!
//! Turns a configured [`TestCase`] into a [`Scenario`] whose stages run the
//! case's steps, and runs it through the orchestrator into a [`TestResult`].
//! The per-case working directory is archived into the output directory
//! before it is released.
//!
//! 将配置的 [`TestCase`] 转换为一个 [`Scenario`]，其各阶段运行用例的步骤，
//! 并通过编排器运行得到 [`TestResult`]。每个用例的工作目录在释放之前
//! 会被归档到输出目录中。

use async_trait::async_trait;
use chrono::Utc;
use colored::*;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    core::{
        config::{Expectation, Step, TestCase},
        errors::HarnessError,
        models::{Status, TestResult},
        orchestrator::{Fault, FaultInjector, Scenario, TestContext, TestOrchestrator},
        poller::ConditionPoller,
    },
    infra::{
        fs,
        hosts::HostSet,
        remote::{RemoteExecutor, RemoteResult, RunOptions},
        t,
    },
};

/// Variable pointing commands at the case's scoped directory.
pub const CASE_DIR_ENV_VAR: &str = "FTEST_CASE_DIR";

/// Checks a command result against an expectation. Mismatches are assertion
/// failures of `step`.
///
/// 根据预期检查命令结果。不匹配属于 `step` 的断言失败。
pub fn evaluate(step: &str, expect: &Expectation, result: &RemoteResult) -> Result<(), HarnessError> {
    let codes = result.exit_codes();
    if codes.len() != 1 || !codes.contains_key(&expect.exit_code) {
        let observed: Vec<String> = codes
            .iter()
            .map(|(rc, hosts)| format!("rc={rc} on {hosts}"))
            .collect();
        return Err(HarnessError::assertion(
            step,
            format!("rc={}", expect.exit_code),
            observed.join(", "),
        ));
    }

    let pattern = expect
        .stdout_matches
        .as_deref()
        .map(Regex::new)
        .transpose()
        .map_err(|e| HarnessError::Config(format!("{step}: invalid stdout_matches: {e}")))?;

    for group in &result.groups {
        let stdout = group.stdout.join("\n");
        if let Some(needle) = &expect.stdout_contains {
            if !stdout.contains(needle.as_str()) {
                return Err(HarnessError::assertion(
                    step,
                    format!("stdout containing '{needle}'"),
                    format!("'{}' on {}", truncate(&stdout), group.hosts),
                ));
            }
        }
        if let Some(pattern) = &pattern {
            if !pattern.is_match(&stdout) {
                return Err(HarnessError::assertion(
                    step,
                    format!("stdout matching /{pattern}/"),
                    format!("'{}' on {}", truncate(&stdout), group.hosts),
                ));
            }
        }
        if let Some(pointer) = &expect.json_pointer {
            let document: Value = serde_json::from_str(stdout.trim()).map_err(|e| {
                HarnessError::assertion(step, "JSON on stdout", format!("{e} on {}", group.hosts))
            })?;
            let found = document.pointer(pointer);
            match (found, &expect.equals) {
                (None, _) => {
                    return Err(HarnessError::assertion(
                        step,
                        format!("a value at {pointer}"),
                        format!("nothing on {}", group.hosts),
                    ));
                }
                (Some(actual), Some(wanted)) if !json_equals(actual, wanted) => {
                    return Err(HarnessError::assertion(
                        step,
                        format!("{pointer} == {wanted}"),
                        format!("{actual} on {}", group.hosts),
                    ));
                }
                _ => {}
            }
        }
    }
    Ok(())
}

/// Strings in the plan may stand for numbers or booleans printed by a tool.
fn json_equals(actual: &Value, wanted: &Value) -> bool {
    if actual == wanted {
        return true;
    }
    match (actual, wanted) {
        (Value::String(a), w) => *a == w.to_string(),
        (a, Value::String(w)) => a.to_string() == *w,
        (Value::Number(a), Value::Number(w)) => a.as_f64() == w.as_f64(),
        _ => false,
    }
}

fn truncate(text: &str) -> String {
    const LIMIT: usize = 200;
    if text.chars().count() <= LIMIT {
        text.to_string()
    } else {
        let head: String = text.chars().take(LIMIT).collect();
        format!("{head}...")
    }
}

/// A scenario whose stages are the step lists of a configured case.
/// 其各阶段为配置用例步骤列表的场景。
#[derive(Debug, Clone)]
pub struct StepScenario {
    case: TestCase,
    default_timeout: Option<Duration>,
}

impl StepScenario {
    pub fn new(case: TestCase, default_timeout: Option<Duration>) -> Self {
        Self {
            case,
            default_timeout,
        }
    }

    async fn run_steps(&self, ctx: &mut TestContext, steps: &[Step]) -> Result<(), HarnessError> {
        for step in steps {
            debug!(case = %self.case.name, step = %step.label(), "running step");
            self.run_step(ctx, step).await?;
        }
        Ok(())
    }

    fn timeout(&self, secs: Option<u64>) -> Option<Duration> {
        secs.map(Duration::from_secs).or(self.default_timeout)
    }

    async fn run_step(&self, ctx: &mut TestContext, step: &Step) -> Result<(), HarnessError> {
        let label = step.label();
        match step {
            Step::Run(run) => {
                let hosts = ctx.hosts(&run.hosts)?;
                let command = run.command.render()?;
                let options = RunOptions {
                    timeout: self.timeout(run.timeout_secs),
                    sudo: run.sudo,
                    expect_rc: run.expect_rc,
                    ..RunOptions::default()
                };
                if run.background {
                    ctx.spawn(&hosts, &command, options);
                } else {
                    match ctx.run_checked(&hosts, &command, options).await {
                        Ok(_) => {}
                        Err(e) if run.warn_only && !e.is_connection() => {
                            ctx.warn(format!("{label}: {e}"));
                        }
                        Err(e) => return Err(e),
                    }
                }
                if let Some(cleanup) = &run.cleanup {
                    ctx.push_cleanup_command(label, hosts, cleanup.render()?);
                }
                Ok(())
            }
            Step::Fault(fault) => {
                let fault = Fault {
                    name: label,
                    hosts: ctx.hosts(&fault.hosts)?,
                    command: fault.command.render()?,
                };
                ctx.inject_fault(&fault).await
            }
            Step::Poll(poll) => {
                let hosts = ctx.hosts(&poll.hosts)?;
                let command = poll.command.render()?;
                let mut poller = ConditionPoller::new(poll.max_attempts, poll.interval()?)?;
                if let Some(limit) = poll.max_duration()? {
                    poller = poller.max_duration(limit);
                }
                let options = ctx.run_options(RunOptions {
                    timeout: self.timeout(None),
                    expect_rc: poll.expect.exit_code,
                    ..RunOptions::default()
                });
                let executor = ctx.executor().clone();
                let (executor, hosts_ref, command_ref, options_ref) =
                    (&executor, &hosts, command.as_str(), &options);
                let result = poller
                    .wait(
                        &label,
                        move || executor.run(hosts_ref, command_ref, options_ref),
                        |result| evaluate(&label, &poll.expect, result).is_ok(),
                    )
                    .await?;
                ctx.record(&result);
                Ok(())
            }
            Step::Assert(check) => {
                let hosts = ctx.hosts(&check.hosts)?;
                let command = check.command.render()?;
                let options = RunOptions {
                    timeout: self.timeout(None),
                    expect_rc: check.expect.exit_code,
                    ..RunOptions::default()
                };
                let result = ctx.run(&hosts, &command, options).await?;
                evaluate(&label, &check.expect, &result)
            }
        }
    }
}

#[async_trait]
impl Scenario for StepScenario {
    fn name(&self) -> &str {
        &self.case.name
    }

    fn skip_reason(&self) -> Option<String> {
        self.case.skip.then(|| {
            self.case
                .skip_reason
                .clone()
                .unwrap_or_else(|| "skipped in the test plan".to_string())
        })
    }

    async fn setup(&self, ctx: &mut TestContext) -> Result<(), HarnessError> {
        self.run_steps(ctx, &self.case.setup).await
    }

    async fn act(&self, ctx: &mut TestContext) -> Result<(), HarnessError> {
        self.run_steps(ctx, &self.case.act).await
    }

    async fn wait(&self, ctx: &mut TestContext) -> Result<(), HarnessError> {
        self.run_steps(ctx, &self.case.wait).await
    }

    async fn verify(&self, ctx: &mut TestContext) -> Result<(), HarnessError> {
        self.run_steps(ctx, &self.case.verify).await
    }

    /// Every teardown step runs even if an earlier one failed.
    async fn teardown(&self, ctx: &mut TestContext) -> Result<(), HarnessError> {
        let mut failures = Vec::new();
        for step in &self.case.teardown {
            if let Err(e) = self.run_step(ctx, step).await {
                failures.push((step.label(), e.to_string()));
            }
        }
        match failures.len() {
            0 => Ok(()),
            _ => Err(HarnessError::ProcessWorkers { failures }),
        }
    }
}

/// Everything shared by the cases of one run.
/// 一次运行中所有用例共享的内容。
#[derive(Debug, Clone)]
pub struct CaseEnvironment {
    pub executor: Arc<RemoteExecutor>,
    pub faults: Arc<dyn FaultInjector>,
    pub hosts: BTreeMap<String, HostSet>,
    pub env: BTreeMap<String, String>,
    /// Case directories are archived under `<output_dir>/<archive_name(case)>/`.
    pub output_dir: PathBuf,
    /// Parent of the scoped case directories; the system temp dir when `None`.
    pub workdir_base: Option<PathBuf>,
    pub default_timeout: Option<Duration>,
    pub cancel: CancellationToken,
}

/// Runs one case end to end and reports it.
///
/// # Arguments
/// * `case` - The test case configuration to execute
/// * `env` - Executor, host groups and directories shared by the run
///
/// # Returns
/// The `TestResult` of the case; harness problems are folded into it as
/// `ERROR`, never returned as an `Err`.
pub async fn run_test_case(case: TestCase, env: &CaseEnvironment) -> TestResult {
    let name = case.name.clone();
    if env.cancel.is_cancelled() {
        return TestResult::not_run(name, Status::Cancel, t!("run.cancelled_before_start"));
    }
    println!("{}", t!("run.running_test", name = name).blue());

    let started_at = Utc::now();
    let mut case_env = env.env.clone();
    case_env.extend(case.env.clone());

    let ctx = TestContext::new(
        &name,
        env.workdir_base.as_deref(),
        Arc::clone(&env.executor),
        Arc::clone(&env.faults),
    );
    let ctx = match ctx {
        Ok(ctx) => ctx,
        Err(e) => {
            let mut result = TestResult::new(&name, Status::Error, started_at, Utc::now());
            result.message = Some(e.to_string());
            print_outcome(&result);
            return result;
        }
    };
    case_env.insert(
        CASE_DIR_ENV_VAR.to_string(),
        ctx.workdir().to_string_lossy().to_string(),
    );
    let mut ctx = ctx
        .with_hosts(env.hosts.clone())
        .with_env(case_env)
        .with_cancellation(env.cancel.child_token());

    let orchestrator = TestOrchestrator::default()
        .with_case_timeout(case.timeout_secs.map(Duration::from_secs));
    let scenario = StepScenario::new(case, env.default_timeout);
    let outcome = orchestrator.run(&scenario, &mut ctx).await;

    let mut result = TestResult::new(&name, outcome.status, started_at, Utc::now());
    result.stage = outcome.stage;
    result.message = outcome.message;
    result.warnings = outcome.warnings;
    result.teardown_errors = outcome.teardown_errors;
    result.output = ctx.transcript().to_string();

    if outcome.status != Status::Skip {
        let workdir = ctx.into_workdir();
        if let Err(e) = fs::archive_dir(workdir.path(), &env.output_dir, &name) {
            warn!(case = %name, "failed to archive case directory: {e:#}");
            result.warnings.push(format!("archive failed: {e:#}"));
        }
    }

    print_outcome(&result);
    result
}

fn print_outcome(result: &TestResult) {
    let duration = format!("{:.2}", result.duration_secs);
    let line = match result.status {
        Status::Pass => t!("run.test_passed", name = result.name, duration = duration).green(),
        Status::Warn => t!("run.test_warned", name = result.name, duration = duration).yellow(),
        Status::Skip => t!("run.test_skipped", name = result.name).yellow(),
        Status::Cancel | Status::Interrupt => {
            t!("run.test_interrupted", name = result.name, status = result.status).yellow()
        }
        Status::Fail | Status::Error => {
            t!("run.test_failed", name = result.name, status = result.status, duration = duration).red()
        }
    };
    println!("{line}");
    if let Some(message) = &result.message {
        if result.status != Status::Pass {
            println!("  {message}");
        }
    }
}
