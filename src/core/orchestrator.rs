//! # Test Orchestrator Module / 测试编排模块
//!
//! Drives one test case through its lifecycle: setup, act, wait, join the
//! background workloads, verify, and always teardown. Every case gets its own
//! explicit [`TestContext`]; nothing is shared through globals.
//!
//! 驱动一个测试用例走完其生命周期：准备、执行、等待、汇合后台负载、验证，
//! 并且总是执行清理。每个用例都有自己显式的 [`TestContext`]，不通过全局变量共享任何内容。

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::errors::HarnessError;
use crate::core::models::{Stage, Status};
use crate::core::process_manager::panic_message;
use crate::infra::fs;
use crate::infra::hosts::HostSet;
use crate::infra::remote::{BackgroundJob, RemoteExecutor, RemoteResult, RunOptions};

/// The stages of one test case. Every method receives the per-case context.
/// 测试用例的各个阶段。每个方法都接收每用例上下文。
#[async_trait]
pub trait Scenario: Send + Sync {
    fn name(&self) -> &str;

    /// `Some(reason)` skips the case without running any stage.
    fn skip_reason(&self) -> Option<String> {
        None
    }

    async fn setup(&self, _ctx: &mut TestContext) -> Result<(), HarnessError> {
        Ok(())
    }

    async fn act(&self, ctx: &mut TestContext) -> Result<(), HarnessError>;

    async fn wait(&self, _ctx: &mut TestContext) -> Result<(), HarnessError> {
        Ok(())
    }

    async fn verify(&self, ctx: &mut TestContext) -> Result<(), HarnessError>;

    async fn teardown(&self, _ctx: &mut TestContext) -> Result<(), HarnessError> {
        Ok(())
    }
}

/// A fault to inject into the system under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub name: String,
    pub hosts: HostSet,
    pub command: String,
}

/// Injects faults. Handed to the context so tests can substitute their own.
/// 注入故障。交给上下文，以便测试可以替换为自己的实现。
#[async_trait]
pub trait FaultInjector: Send + Sync + fmt::Debug {
    async fn inject(&self, fault: &Fault, executor: &RemoteExecutor) -> Result<(), HarnessError>;
}

/// Injects a fault by running its command on its hosts.
#[derive(Debug, Clone, Default)]
pub struct CommandFaultInjector {
    pub timeout: Option<Duration>,
}

#[async_trait]
impl FaultInjector for CommandFaultInjector {
    async fn inject(&self, fault: &Fault, executor: &RemoteExecutor) -> Result<(), HarnessError> {
        info!(fault = %fault.name, hosts = %fault.hosts, "injecting fault");
        let options = RunOptions {
            timeout: self.timeout,
            ..RunOptions::default()
        };
        executor.run_checked(&fault.hosts, &fault.command, &options).await?;
        Ok(())
    }
}

type Cleanup = BoxFuture<'static, Result<(), HarnessError>>;

/// Everything one case needs, owned by that case.
/// 一个用例所需的一切，由该用例拥有。
pub struct TestContext {
    name: String,
    workdir: TempDir,
    executor: Arc<RemoteExecutor>,
    hosts: BTreeMap<String, HostSet>,
    env: BTreeMap<String, String>,
    faults: Arc<dyn FaultInjector>,
    background: Vec<BackgroundJob>,
    cleanups: Vec<(String, Cleanup)>,
    warnings: Vec<String>,
    transcript: String,
    last_result: Option<RemoteResult>,
    cancel: CancellationToken,
    stage: Stage,
    torn_down: bool,
}

impl TestContext {
    /// Creates the context with a fresh scoped working directory under
    /// `base` (the system temp dir when `None`).
    pub fn new(
        name: impl Into<String>,
        base: Option<&Path>,
        executor: Arc<RemoteExecutor>,
        faults: Arc<dyn FaultInjector>,
    ) -> Result<Self, HarnessError> {
        let name = name.into();
        let workdir = fs::create_case_dir(base, &name)?;
        Ok(Self {
            name,
            workdir,
            executor,
            hosts: BTreeMap::new(),
            env: BTreeMap::new(),
            faults,
            background: Vec::new(),
            cleanups: Vec::new(),
            warnings: Vec::new(),
            transcript: String::new(),
            last_result: None,
            cancel: CancellationToken::new(),
            stage: Stage::Setup,
            torn_down: false,
        })
    }

    pub fn with_hosts(mut self, hosts: BTreeMap<String, HostSet>) -> Self {
        self.hosts = hosts;
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Ties the case to an outer cancellation token (e.g. Ctrl-C).
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }

    pub fn executor(&self) -> &RemoteExecutor {
        &self.executor
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Resolves a host expression: a named group from the plan, or a literal
    /// host range.
    pub fn hosts(&self, expr: &str) -> Result<HostSet, HarnessError> {
        match self.hosts.get(expr) {
            Some(hosts) => Ok(hosts.clone()),
            None => HostSet::parse(expr),
        }
    }

    /// Layers the case environment under the options' own environment.
    pub fn run_options(&self, mut options: RunOptions) -> RunOptions {
        let mut env = self.env.clone();
        env.append(&mut options.env);
        options.env = env;
        options
    }

    /// Appends a result to the transcript and remembers it as the last one.
    pub fn record(&mut self, result: &RemoteResult) {
        self.transcript.push_str(&result.collate());
        self.last_result = Some(result.clone());
    }

    /// Runs a command with the case environment and records its output.
    pub async fn run(
        &mut self,
        hosts: &HostSet,
        command: &str,
        options: RunOptions,
    ) -> Result<RemoteResult, HarnessError> {
        let options = self.run_options(options);
        let result = self.executor.run(hosts, command, &options).await?;
        self.record(&result);
        Ok(result)
    }

    /// Like [`TestContext::run`], failing unless every host returned the
    /// expected status.
    pub async fn run_checked(
        &mut self,
        hosts: &HostSet,
        command: &str,
        options: RunOptions,
    ) -> Result<RemoteResult, HarnessError> {
        let result = self.run(hosts, command, options).await?;
        match result.failure() {
            Some(failure) => Err(HarnessError::RemoteCommand(failure)),
            None => Ok(result),
        }
    }

    /// Starts a background workload owned by this case.
    pub fn spawn(&mut self, hosts: &HostSet, command: &str, options: RunOptions) {
        let options = self.run_options(options);
        info!(case = %self.name, hosts = %hosts, "starting background workload: {command}");
        let job = self.executor.spawn(hosts, command, options);
        self.background.push(job);
    }

    pub fn background_jobs(&self) -> usize {
        self.background.len()
    }

    pub async fn inject_fault(&mut self, fault: &Fault) -> Result<(), HarnessError> {
        self.transcript
            .push_str(&format!("Fault {}: {} on {}\n", fault.name, fault.command, fault.hosts));
        self.faults.inject(fault, &self.executor).await
    }

    /// Registers a resource release. Releases run in reverse registration
    /// order during teardown.
    pub fn push_cleanup<F>(&mut self, name: impl Into<String>, release: F)
    where
        F: Future<Output = Result<(), HarnessError>> + Send + 'static,
    {
        self.cleanups.push((name.into(), Box::pin(release)));
    }

    /// Registers a remote command as a resource release.
    pub fn push_cleanup_command(&mut self, name: impl Into<String>, hosts: HostSet, command: String) {
        let executor = Arc::clone(&self.executor);
        let options = self.run_options(RunOptions::default());
        self.push_cleanup(name, async move {
            executor.run_checked(&hosts, &command, &options).await?;
            Ok(())
        });
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(case = %self.name, "{message}");
        self.warnings.push(message);
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// The last command result recorded by this context.
    pub fn last_result(&self) -> Option<&RemoteResult> {
        self.last_result.as_ref()
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    /// Waits for every background workload. Failures of individual jobs are
    /// gathered; a single failure is returned as is.
    ///
    /// A job leaves the context only once its join has finished; if this
    /// future is dropped, the jobs still pending are terminated by
    /// [`release_all`](Self::release_all).
    pub async fn join_background(&mut self, timeout: Option<Duration>) -> Result<(), HarnessError> {
        let mut failures = Vec::new();
        while let Some(job) = self.background.first_mut() {
            let joined = job.join(timeout).await;
            let job = self.background.remove(0);
            match joined {
                Ok(result) => self.record(&result),
                Err(e) => failures.push((job.command().to_string(), e)),
            }
        }
        match failures.len() {
            0 => Ok(()),
            1 => Err(failures.remove(0).1),
            _ => Err(HarnessError::ProcessWorkers {
                failures: failures
                    .into_iter()
                    .map(|(command, e)| (command, e.to_string()))
                    .collect(),
            }),
        }
    }

    /// Terminates workloads still running and releases every scoped resource
    /// in reverse order. Returns the release errors; a second call does
    /// nothing.
    pub async fn release_all(&mut self) -> Vec<String> {
        if self.torn_down {
            return Vec::new();
        }
        self.torn_down = true;
        let mut errors = Vec::new();

        for mut job in self.background.drain(..) {
            warn!(case = %self.name, "terminating background workload: {}", job.command());
            job.terminate().await;
        }
        while let Some((name, release)) = self.cleanups.pop() {
            if let Err(e) = release.await {
                warn!(case = %self.name, resource = %name, "release failed: {e}");
                errors.push(format!("{name}: {e}"));
            }
        }
        errors
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Consumes the context, handing back the scoped directory so it can be
    /// archived before it is removed.
    pub fn into_workdir(self) -> TempDir {
        self.workdir
    }
}

impl fmt::Debug for TestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestContext")
            .field("name", &self.name)
            .field("workdir", &self.workdir.path())
            .field("stage", &self.stage)
            .field("background", &self.background.len())
            .field("cleanups", &self.cleanups.len())
            .field("torn_down", &self.torn_down)
            .finish()
    }
}

/// How one case ended.
/// 一个用例的结束方式。
#[derive(Debug, Clone, PartialEq)]
pub struct CaseOutcome {
    pub status: Status,
    pub stage: Option<Stage>,
    pub message: Option<String>,
    pub teardown_errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl CaseOutcome {
    fn skipped(reason: String) -> Self {
        Self {
            status: Status::Skip,
            stage: None,
            message: Some(reason),
            teardown_errors: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

/// Runs scenarios against their contexts.
/// 针对上下文运行场景。
#[derive(Debug, Clone)]
pub struct TestOrchestrator {
    /// Bound on the stages before teardown. Exceeding it interrupts the case.
    pub case_timeout: Option<Duration>,
    /// Bound on joining each background workload.
    pub join_timeout: Option<Duration>,
    pub teardown_timeout: Duration,
}

impl Default for TestOrchestrator {
    fn default() -> Self {
        Self {
            case_timeout: None,
            join_timeout: Some(Duration::from_secs(3600)),
            teardown_timeout: Duration::from_secs(600),
        }
    }
}

enum Interruption {
    Cancelled,
    TimedOut(Duration),
}

impl TestOrchestrator {
    pub fn with_case_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.case_timeout = timeout;
        self
    }

    /// Runs `scenario` to completion. Teardown always runs, even after a
    /// failed setup, a failed verify, a timeout or a cancellation.
    pub async fn run(&self, scenario: &dyn Scenario, ctx: &mut TestContext) -> CaseOutcome {
        if let Some(reason) = scenario.skip_reason() {
            info!(case = %ctx.name, "skipped: {reason}");
            return CaseOutcome::skipped(reason);
        }
        if ctx.cancel.is_cancelled() {
            return CaseOutcome {
                status: Status::Cancel,
                stage: None,
                message: Some("cancelled before start".to_string()),
                teardown_errors: Vec::new(),
                warnings: Vec::new(),
            };
        }

        let cancel = ctx.cancel.clone();
        let case_timeout = self.case_timeout;
        let body = async {
            // A panicking hook still leaves the context to teardown.
            let stages = AssertUnwindSafe(self.run_stages(scenario, ctx))
                .catch_unwind()
                .map(|caught| caught.map_err(|payload| panic_message(payload.as_ref())));
            let timer = async {
                match case_timeout {
                    Some(limit) => tokio::time::sleep(limit).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                result = stages => Ok(result),
                _ = cancel.cancelled() => Err(Interruption::Cancelled),
                _ = timer => Err(Interruption::TimedOut(case_timeout.unwrap_or_default())),
            }
        };
        let finished = body.await;

        let stage = ctx.stage;
        let mut outcome = match finished {
            Ok(Ok(Ok(()))) => CaseOutcome {
                status: Status::Pass,
                stage: None,
                message: None,
                teardown_errors: Vec::new(),
                warnings: Vec::new(),
            },
            Ok(Ok(Err((stage, e)))) => CaseOutcome {
                status: e.status(),
                stage: Some(stage),
                message: Some(e.to_string()),
                teardown_errors: Vec::new(),
                warnings: Vec::new(),
            },
            Ok(Err(panic)) => {
                warn!(case = %ctx.name, stage = %stage, "stage panicked: {panic}");
                CaseOutcome {
                    status: Status::Error,
                    stage: Some(stage),
                    message: Some(format!("panicked: {panic}")),
                    teardown_errors: Vec::new(),
                    warnings: Vec::new(),
                }
            }
            Err(interruption) => {
                let message = match interruption {
                    Interruption::Cancelled => "interrupted by cancellation".to_string(),
                    Interruption::TimedOut(limit) => format!("case exceeded its timeout of {limit:?}"),
                };
                warn!(case = %ctx.name, stage = %stage, "{message}");
                CaseOutcome {
                    status: Status::Interrupt,
                    stage: Some(stage),
                    message: Some(message),
                    teardown_errors: Vec::new(),
                    warnings: Vec::new(),
                }
            }
        };

        outcome.teardown_errors = self.teardown(scenario, ctx).await;
        outcome.warnings = ctx.warnings.clone();

        if outcome.status == Status::Pass {
            if !outcome.teardown_errors.is_empty() {
                outcome.status = Status::Error;
                outcome.stage = Some(Stage::Teardown);
                outcome.message = Some(outcome.teardown_errors.join("; "));
            } else if !outcome.warnings.is_empty() {
                outcome.status = Status::Warn;
            }
        }
        info!(case = %ctx.name, status = %outcome.status, "case finished");
        outcome
    }

    async fn run_stages(
        &self,
        scenario: &dyn Scenario,
        ctx: &mut TestContext,
    ) -> Result<(), (Stage, HarnessError)> {
        ctx.stage = Stage::Setup;
        info!(case = %ctx.name, stage = %ctx.stage, "stage started");
        scenario.setup(ctx).await.map_err(|e| (Stage::Setup, e))?;

        ctx.stage = Stage::Act;
        info!(case = %ctx.name, stage = %ctx.stage, "stage started");
        scenario.act(ctx).await.map_err(|e| (Stage::Act, e))?;

        ctx.stage = Stage::Wait;
        info!(case = %ctx.name, stage = %ctx.stage, "stage started");
        scenario.wait(ctx).await.map_err(|e| (Stage::Wait, e))?;
        // A workload that failed behind a successful wait still fails the act.
        ctx.stage = Stage::Act;
        ctx.join_background(self.join_timeout)
            .await
            .map_err(|e| (Stage::Act, e))?;

        ctx.stage = Stage::Verify;
        info!(case = %ctx.name, stage = %ctx.stage, "stage started");
        scenario.verify(ctx).await.map_err(|e| (Stage::Verify, e))?;
        Ok(())
    }

    /// Runs the scenario's teardown and releases the context's resources.
    /// Idempotent: once a context is torn down, later calls return no errors
    /// and do nothing.
    pub async fn teardown(&self, scenario: &dyn Scenario, ctx: &mut TestContext) -> Vec<String> {
        if ctx.torn_down {
            return Vec::new();
        }
        ctx.stage = Stage::Teardown;
        let limit = self.teardown_timeout;
        let mut errors = Vec::new();

        match tokio::time::timeout(limit, scenario.teardown(ctx)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(case = %ctx.name, "teardown failed: {e}");
                errors.push(e.to_string());
            }
            Err(_) => errors.push(format!("teardown exceeded {limit:?}")),
        }
        match tokio::time::timeout(limit, ctx.release_all()).await {
            Ok(release_errors) => errors.extend(release_errors),
            Err(_) => {
                ctx.torn_down = true;
                errors.push(format!("resource release exceeded {limit:?}"));
            }
        }
        errors
    }
}
