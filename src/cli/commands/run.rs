//! # Run Command Module / 运行命令模块
//!
//! This module implements the `run` command of the ftest-runner CLI,
//! which executes the cases of a test plan and writes the reports.
//!
//! 此模块实现了 ftest-runner CLI 的 `run` 命令，
//! 执行测试计划中的用例并写入报告。

use anyhow::{Context, Result};
use colored::*;
use futures::{StreamExt, stream};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    core::{
        config::{TestCase, TestPlan, TransportKind},
        execution::{CaseEnvironment, run_test_case},
        models::{Status, TestResult},
        orchestrator::CommandFaultInjector,
        planner::{self, Selection},
    },
    infra::{
        remote::{RemoteExecutor, SshTransport},
        t,
    },
    reporting::{ResultsCollector, print_failure_details, print_summary},
};

/// Arguments of `ftest-runner run`.
#[derive(Debug, Clone)]
pub struct RunArgs {
    pub plan: PathBuf,
    pub jobs: Option<usize>,
    pub selection: Selection,
    /// YAML/JSON results file; `<output_dir>/results.yaml` when not given.
    pub report: Option<PathBuf>,
    pub html: Option<PathBuf>,
    pub junit: Option<PathBuf>,
    /// Cancel the cases not yet started after the first failure.
    pub fail_fast: bool,
    /// Language given on the command line; overrides the plan's.
    pub language: Option<String>,
}

/// Executes the run command with the provided arguments.
///
/// # Returns
/// `Ok` when every case passed, warned or was skipped; an error naming the
/// number of failed cases otherwise.
pub async fn execute(args: RunArgs) -> Result<()> {
    let (plan, plan_path) = load_plan(&args.plan)?;
    let locale = args.language.clone().unwrap_or_else(|| plan.language.clone());
    rust_i18n::set_locale(&locale);

    println!(
        "{}",
        t!("loading_test_plan", locale = locale, path = plan_path.display())
    );

    let stop_token = setup_signal_handler(&locale);
    let output_dir = plan.output_dir.clone();
    let environment = build_environment(&plan, stop_token.clone());

    let execution_plan = planner::plan_execution(plan.cases, &args.selection)?;

    if execution_plan.filtered_arch_count > 0 {
        println!(
            "{}",
            t!(
                "filtered_arch_cases",
                locale = locale,
                filtered = execution_plan.filtered_arch_count,
                arch = std::env::consts::ARCH
            )
            .cyan()
        );
    }
    if execution_plan.filtered_tag_count > 0 {
        println!(
            "{}",
            t!(
                "filtered_selection_cases",
                locale = locale,
                filtered = execution_plan.filtered_tag_count
            )
            .cyan()
        );
    }
    if execution_plan.skipped_count > 0 {
        println!(
            "{}",
            t!("skipped_cases_found", locale = locale, count = execution_plan.skipped_count).yellow()
        );
    }

    if let (Some(total), Some(index)) = (args.selection.total_runners, args.selection.runner_index) {
        println!(
            "{}",
            t!(
                "running_as_split_runner",
                locale = locale,
                index = index + 1,
                total = total,
                count = execution_plan.cases_to_run.len()
            )
            .bold()
        );
    } else {
        println!("{}", t!("running_as_single_runner", locale = locale).bold());
    }

    if execution_plan.cases_to_run.is_empty() {
        println!("{}", t!("no_cases_to_run", locale = locale).green());
        return Ok(());
    }

    let jobs = args.jobs.unwrap_or(num_cpus::get() / 2 + 1).max(1);
    let results = run_cases(
        execution_plan.cases_to_run,
        jobs,
        environment,
        args.fail_fast,
    )
    .await;

    let mut collector = ResultsCollector::new();
    for result in results {
        collector.record(result);
    }

    print_summary(collector.results(), &locale);

    let report = args
        .report
        .clone()
        .unwrap_or_else(|| output_dir.join("results.yaml"));
    write_reports(&collector, &report, args.html.as_deref(), args.junit.as_deref(), &locale)?;

    let totals = collector.aggregate();
    if totals.all_passed() {
        println!("\n{}", t!("all_tests_passed", locale = locale).green().bold());
        Ok(())
    } else {
        print_failure_details(collector.results(), &locale);
        anyhow::bail!("{}", t!("tests_failed", locale = locale, count = totals.failures()));
    }
}

/// Reads and validates the test plan.
fn load_plan(path: &Path) -> Result<(TestPlan, PathBuf)> {
    let plan_path = fs::canonicalize(path)
        .with_context(|| t!("plan_read_failed_path", path = path.display()))?;
    let plan = TestPlan::load(&plan_path).with_context(|| t!("plan_parse_failed"))?;
    Ok((plan, plan_path))
}

/// Builds the executor and the per-run settings every case shares.
pub fn build_environment(plan: &TestPlan, cancel: CancellationToken) -> CaseEnvironment {
    let executor = match plan.remote.transport {
        TransportKind::Local => RemoteExecutor::local(),
        TransportKind::Ssh => RemoteExecutor::ssh(SshTransport {
            user: plan.remote.user.clone(),
            connect_timeout: Duration::from_secs(plan.remote.connect_timeout_secs),
            options: plan.remote.ssh_options.clone(),
        }),
    };
    let default_timeout = plan.remote.command_timeout_secs.map(Duration::from_secs);
    info!(transport = ?plan.remote.transport, "using {} host group(s)", plan.hosts.len());

    CaseEnvironment {
        executor: Arc::new(executor),
        faults: Arc::new(CommandFaultInjector {
            timeout: default_timeout,
        }),
        hosts: plan.hosts.clone(),
        env: plan.env.clone(),
        output_dir: plan.output_dir.clone(),
        workdir_base: None,
        default_timeout,
        cancel,
    }
}

/// Runs the cases with at most `jobs` in flight.
///
/// Cancelling the environment's token interrupts the running cases and
/// reports the others as `CANCEL`; with `fail_fast` the first failure does
/// the same for the cases not yet started.
pub async fn run_cases(
    cases: Vec<TestCase>,
    jobs: usize,
    environment: CaseEnvironment,
    fail_fast: bool,
) -> Vec<TestResult> {
    let fail_fast_token = environment.cancel.child_token();
    let run_token = environment.cancel.clone();

    stream::iter(cases.into_iter().map(|case| {
        let fail_fast_token = fail_fast_token.clone();
        let run_token = run_token.clone();
        let mut environment = environment.clone();
        async move {
            let name = case.name.clone();
            if fail_fast_token.is_cancelled() && !run_token.is_cancelled() {
                return TestResult::not_run(name, Status::Cancel, t!("run.cancelled_by_fail_fast"));
            }
            // Cases share Ctrl-C but never see the fail-fast cancellation.
            environment.cancel = run_token.child_token();
            let handle = tokio::spawn(async move { run_test_case(case, &environment).await });
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    warn!(case = %name, "case task failed: {e}");
                    TestResult::not_run(
                        name,
                        Status::Error,
                        format!("Critical error during test execution: {e}"),
                    )
                }
            };
            if fail_fast && result.is_failure() {
                fail_fast_token.cancel();
            }
            result
        }
    }))
    .buffer_unordered(jobs)
    .collect()
    .await
}

/// Writes the results file and the optional HTML and JUnit reports.
fn write_reports(
    collector: &ResultsCollector,
    report: &Path,
    html: Option<&Path>,
    junit: Option<&Path>,
    locale: &str,
) -> Result<()> {
    let results = collector.snapshot();
    println!(
        "\n{}",
        t!("writing_report", locale = locale, path = report.display())
    );
    results.render(report, locale)?;

    for extra in [html, junit].into_iter().flatten() {
        println!("{}", t!("writing_report", locale = locale, path = extra.display()));
        if let Err(e) = results.render(extra, locale) {
            eprintln!("{} {:#}", t!("report_failed", locale = locale).red(), e);
        }
    }
    Ok(())
}

/// Sets up a signal handler for graceful shutdown.
fn setup_signal_handler(locale: &str) -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();
    let locale = locale.to_string();

    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                println!("\n{}", t!("shutdown_signal", locale = &locale).yellow());
                token_clone.cancel();
            }
            Err(e) => warn!("failed to listen for Ctrl-C: {e}"),
        }
    });

    token
}
