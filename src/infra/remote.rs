//! # Remote Execution Module / 远程执行模块
//!
//! Runs a rendered command on a set of hosts concurrently and normalizes the
//! per-host outcome into groups of hosts that returned the same exit status
//! and output. The transport that actually reaches a host is pluggable: SSH
//! for real clusters, a local shell for single-node plans and tests.
//!
//! 在一组主机上并发运行已渲染的命令，并将每台主机的结果归一化为
//! 返回相同退出状态和输出的主机分组。实际到达主机的传输方式可插拔：
//! 真实集群使用 SSH，单节点计划和测试使用本地 shell。

use async_trait::async_trait;
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::errors::{HarnessError, RemoteCommandFailure};
use crate::infra::command::{self, CommandOutput, TIMEOUT_EXIT_STATUS};
use crate::infra::hosts::HostSet;

/// Name of the variable the local transport sets to the host a command is
/// running "on".
pub const HOST_ENV_VAR: &str = "FTEST_HOST";

/// stderr patterns `ssh` prints when it never reached the remote shell.
static SSH_UNREACHABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(ssh: connect to host|could not resolve hostname|connection refused|connection timed out|no route to host|host key verification failed|permission denied \(publickey)",
    )
    .expect("valid regex")
});

/// Options for one fan-out execution. / 一次扇出执行的选项。
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub timeout: Option<Duration>,
    /// Log the collated output even when every host succeeded.
    pub verbose: bool,
    pub sudo: bool,
    /// The exit status every host is expected to return.
    pub expect_rc: i32,
    /// Extra environment passed through to the command.
    pub env: BTreeMap<String, String>,
}

impl RunOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn expect(mut self, rc: i32) -> Self {
        self.expect_rc = rc;
        self
    }
}

/// Reaches one host and runs a command there.
/// 到达一台主机并在其上运行命令。
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Runs `command` on `host`. Returns `HarnessError::Connection` when the
    /// host could not be reached before the command ran.
    async fn execute(
        &self,
        host: &str,
        command: &str,
        env: &BTreeMap<String, String>,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, HarnessError>;

    /// Kills whatever is left of `command` on `host` after a timeout.
    async fn kill(&self, host: &str, command: &str) -> Result<(), HarnessError> {
        let pkill = format!("pkill -9 -f {}", quote(&ere_escape(command)));
        let out = self
            .execute(host, &pkill, &BTreeMap::new(), Some(Duration::from_secs(30)))
            .await?;
        // pkill returns 1 when nothing matched, which is fine here.
        if out.exit_status > 1 {
            warn!(host, exit_status = out.exit_status, "remote kill did not complete");
        }
        Ok(())
    }
}

/// Runs commands through the system `ssh` client.
#[derive(Debug, Clone)]
pub struct SshTransport {
    pub user: Option<String>,
    pub connect_timeout: Duration,
    pub options: Vec<String>,
}

impl Default for SshTransport {
    fn default() -> Self {
        Self {
            user: None,
            connect_timeout: Duration::from_secs(10),
            options: Vec::new(),
        }
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn execute(
        &self,
        host: &str,
        command: &str,
        env: &BTreeMap<String, String>,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, HarnessError> {
        let target = match &self.user {
            Some(user) => format!("{user}@{host}"),
            None => host.to_string(),
        };
        let mut cmd = tokio::process::Command::new("ssh");
        cmd.arg("-oBatchMode=yes")
            .arg(format!("-oConnectTimeout={}", self.connect_timeout.as_secs().max(1)))
            .args(&self.options)
            .arg(&target)
            .arg("--")
            .arg(with_env_prefix(command, env));

        let output = command::capture(cmd, timeout).await?;
        if output.exit_status == 255 && !output.interrupted && SSH_UNREACHABLE.is_match(&output.stderr) {
            return Err(HarnessError::Connection {
                hosts: HostSet::from_iter([host]),
                detail: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }
}

/// Runs every "host" as a local `sh -c` child with `FTEST_HOST` set to the
/// host name.
#[derive(Debug, Clone, Default)]
pub struct LocalTransport;

#[async_trait]
impl Transport for LocalTransport {
    async fn execute(
        &self,
        host: &str,
        command: &str,
        env: &BTreeMap<String, String>,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, HarnessError> {
        let mut cmd = command::shell(command);
        cmd.envs(env).env(HOST_ENV_VAR, host);
        Ok(command::capture(cmd, timeout).await?)
    }

    async fn kill(&self, _host: &str, _command: &str) -> Result<(), HarnessError> {
        // The child was already killed when its handle was dropped.
        Ok(())
    }
}

/// Hosts that returned the same exit status, interrupted state and output.
/// 返回相同退出状态、中断状态和输出的主机分组。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultGroup {
    pub hosts: HostSet,
    pub exit_status: i32,
    pub interrupted: bool,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

/// The normalized outcome of one fan-out execution.
/// 一次扇出执行的归一化结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteResult {
    pub command: String,
    pub expect_rc: i32,
    pub groups: Vec<ResultGroup>,
}

impl RemoteResult {
    /// Exit status → hosts that returned it.
    pub fn exit_codes(&self) -> BTreeMap<i32, HostSet> {
        let mut codes: BTreeMap<i32, HostSet> = BTreeMap::new();
        for group in &self.groups {
            codes.entry(group.exit_status).or_default().extend(&group.hosts);
        }
        codes
    }

    pub fn hosts(&self) -> HostSet {
        let mut hosts = HostSet::new();
        for group in &self.groups {
            hosts.extend(&group.hosts);
        }
        hosts
    }

    pub fn timed_out_hosts(&self) -> HostSet {
        let mut hosts = HostSet::new();
        for group in self.groups.iter().filter(|g| g.interrupted) {
            hosts.extend(&group.hosts);
        }
        hosts
    }

    /// `true` when every host returned the expected status and none timed out.
    pub fn passed(&self) -> bool {
        let codes = self.exit_codes();
        codes.len() == 1
            && codes.contains_key(&self.expect_rc)
            && self.timed_out_hosts().is_empty()
    }

    /// The exit status returned by the most hosts. Ties go to the expected
    /// status when it is among them, otherwise to the lowest status.
    pub fn majority_exit_status(&self) -> Option<i32> {
        let codes = self.exit_codes();
        let max = codes.values().map(HostSet::len).max()?;
        let tied: Vec<i32> = codes
            .iter()
            .filter(|(_, hosts)| hosts.len() == max)
            .map(|(rc, _)| *rc)
            .collect();
        if tied.contains(&self.expect_rc) {
            Some(self.expect_rc)
        } else {
            tied.first().copied()
        }
    }

    /// Hosts whose exit status differs from the majority.
    pub fn dissenting_hosts(&self) -> HostSet {
        let Some(majority) = self.majority_exit_status() else {
            return HostSet::new();
        };
        let mut hosts = HostSet::new();
        for (rc, group) in self.exit_codes() {
            if rc != majority {
                hosts.extend(&group);
            }
        }
        hosts
    }

    /// The classified failure, or `None` when the result passed.
    pub fn failure(&self) -> Option<RemoteCommandFailure> {
        if self.passed() {
            return None;
        }
        Some(RemoteCommandFailure {
            command: self.command.clone(),
            expected: self.expect_rc,
            exit_codes: self.exit_codes().into_iter().collect(),
            dissenting: self.dissenting_hosts(),
            timed_out: self.timed_out_hosts(),
        })
    }

    /// The stdout lines returned by `host`.
    pub fn stdout_for(&self, host: &str) -> Option<&[String]> {
        self.groups
            .iter()
            .find(|g| g.hosts.contains(host))
            .map(|g| g.stdout.as_slice())
    }

    /// All stdout joined, one group after another.
    pub fn stdout_text(&self) -> String {
        self.groups
            .iter()
            .flat_map(|g| g.stdout.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Human-readable listing of every group.
    pub fn collate(&self) -> String {
        let mut text = format!("Command: {}\nResults:\n", self.command);
        for group in &self.groups {
            text.push_str(&format!(
                "  {}: exit_status={}, interrupted={}:\n",
                group.hosts, group.exit_status, group.interrupted
            ));
            for line in group.stdout.iter().chain(group.stderr.iter()) {
                text.push_str(&format!("    {line}\n"));
            }
        }
        text
    }
}

/// Executes commands on host sets through a [`Transport`].
/// 通过 [`Transport`] 在主机集合上执行命令。
#[derive(Debug, Clone)]
pub struct RemoteExecutor {
    transport: Arc<dyn Transport>,
    env: BTreeMap<String, String>,
}

impl RemoteExecutor {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            env: BTreeMap::new(),
        }
    }

    pub fn local() -> Self {
        Self::new(Arc::new(LocalTransport))
    }

    pub fn ssh(transport: SshTransport) -> Self {
        Self::new(Arc::new(transport))
    }

    /// Environment passed through to every command this executor runs.
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Runs `command` on every host and normalizes the result. Only fails
    /// when a host could not be reached; exit statuses are left for the
    /// caller to judge (see [`RemoteExecutor::run_checked`]).
    pub async fn run(
        &self,
        hosts: &HostSet,
        command: &str,
        options: &RunOptions,
    ) -> Result<RemoteResult, HarnessError> {
        if hosts.is_empty() {
            return Err(HarnessError::Config(format!("no hosts to run '{command}' on")));
        }
        let full_command = if options.sudo {
            format!("sudo -n {command}")
        } else {
            command.to_string()
        };
        let mut env = self.env.clone();
        env.extend(options.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        debug!(hosts = %hosts, command = %full_command, "running command");
        let outcomes = join_all(hosts.iter().map(|host| {
            let transport = Arc::clone(&self.transport);
            let env = &env;
            let full_command = &full_command;
            async move {
                let outcome = transport
                    .execute(host, full_command, env, options.timeout)
                    .await;
                (host.to_string(), outcome)
            }
        }))
        .await;

        let mut unreachable = HostSet::new();
        let mut details = Vec::new();
        let mut outputs = Vec::new();
        for (host, outcome) in outcomes {
            match outcome {
                Ok(output) => outputs.push((host, output)),
                Err(HarnessError::Connection { detail, .. }) => {
                    unreachable.insert(host);
                    details.push(detail);
                }
                Err(other) => return Err(other),
            }
        }
        if !unreachable.is_empty() {
            return Err(HarnessError::Connection {
                hosts: unreachable,
                detail: details.join("; "),
            });
        }

        let interrupted: Vec<&str> = outputs
            .iter()
            .filter(|(_, o)| o.interrupted && o.exit_status == TIMEOUT_EXIT_STATUS)
            .map(|(h, _)| h.as_str())
            .collect();
        if !interrupted.is_empty() {
            warn!(
                hosts = ?interrupted,
                command = %full_command,
                "command timed out, killing remote processes"
            );
            self.kill_on(interrupted.iter().copied(), &full_command).await;
        }

        let result = RemoteResult {
            command: full_command,
            expect_rc: options.expect_rc,
            groups: group_outputs(outputs),
        };
        if options.verbose || !result.passed() {
            info!("{}", result.collate());
        }
        Ok(result)
    }

    /// Like [`RemoteExecutor::run`], but any host that did not return the
    /// expected status turns the call into `HarnessError::RemoteCommand`.
    pub async fn run_checked(
        &self,
        hosts: &HostSet,
        command: &str,
        options: &RunOptions,
    ) -> Result<RemoteResult, HarnessError> {
        let result = self.run(hosts, command, options).await?;
        match result.failure() {
            Some(failure) => Err(HarnessError::RemoteCommand(failure)),
            None => Ok(result),
        }
    }

    /// Starts `command` in the background. The returned job must be joined or
    /// terminated by its owner.
    pub fn spawn(&self, hosts: &HostSet, command: &str, options: RunOptions) -> BackgroundJob {
        let cancel = CancellationToken::new();
        let executor = self.clone();
        let task_hosts = hosts.clone();
        let task_command = command.to_string();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                result = executor.run_checked(&task_hosts, &task_command, &options) => result,
                _ = token.cancelled() => {
                    // Dropping the run future killed the local children.
                    let command = if options.sudo {
                        format!("sudo -n {task_command}")
                    } else {
                        task_command.clone()
                    };
                    executor.kill_on(task_hosts.iter(), &command).await;
                    Err(HarnessError::Cancelled)
                }
            }
        });

        BackgroundJob {
            command: command.to_string(),
            hosts: hosts.clone(),
            handle: Some(handle),
            cancel,
        }
    }

    async fn kill_on<'a>(&self, hosts: impl Iterator<Item = &'a str>, command: &str) {
        let kills = hosts.map(|host| {
            let transport = Arc::clone(&self.transport);
            async move {
                if let Err(e) = transport.kill(host, command).await {
                    warn!(host, "failed to kill '{command}': {e}");
                }
            }
        });
        join_all(kills).await;
    }
}

/// A command running in the background on a host set.
/// 在主机集合上后台运行的命令。
#[derive(Debug)]
pub struct BackgroundJob {
    command: String,
    hosts: HostSet,
    handle: Option<JoinHandle<Result<RemoteResult, HarnessError>>>,
    cancel: CancellationToken,
}

impl BackgroundJob {
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn hosts(&self) -> &HostSet {
        &self.hosts
    }

    /// `true` once the job has finished or was already joined.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Waits for the job. If `timeout` elapses first, the job is terminated
    /// and reported as timed out on all of its hosts.
    ///
    /// The handle stays in the job until the wait completes, so a join that
    /// is itself dropped (case timeout, cancellation) leaves the job to
    /// [`terminate`](Self::terminate) or `Drop`.
    pub async fn join(&mut self, timeout: Option<Duration>) -> Result<RemoteResult, HarnessError> {
        let Some(handle) = self.handle.as_mut() else {
            return Err(HarnessError::NotStarted("background job"));
        };
        let joined = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut *handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(command = %self.command, "background job did not finish in {limit:?}");
                    self.terminate().await;
                    return Err(HarnessError::RemoteCommand(RemoteCommandFailure {
                        command: self.command.clone(),
                        expected: 0,
                        exit_codes: vec![(TIMEOUT_EXIT_STATUS, self.hosts.clone())],
                        dissenting: HostSet::new(),
                        timed_out: self.hosts.clone(),
                    }));
                }
            },
            None => handle.await,
        };
        self.handle = None;
        joined.unwrap_or_else(|e| {
            Err(HarnessError::ProcessWorkers {
                failures: vec![(self.command.clone(), e.to_string())],
            })
        })
    }

    /// Stops the job, killing local children and remote processes. A job that
    /// was already joined is left alone.
    pub async fn terminate(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.cancel.cancel();
            let _ = handle.await;
        }
    }
}

impl Drop for BackgroundJob {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            warn!(command = %self.command, "background job dropped without join; aborting");
            self.cancel.cancel();
            handle.abort();
        }
    }
}

fn group_outputs(outputs: Vec<(String, CommandOutput)>) -> Vec<ResultGroup> {
    let mut groups: Vec<ResultGroup> = Vec::new();
    for (host, output) in outputs {
        let stdout = output.stdout_lines();
        let stderr: Vec<String> = output.stderr.lines().map(str::to_string).collect();
        match groups.iter_mut().find(|g| {
            g.exit_status == output.exit_status
                && g.interrupted == output.interrupted
                && g.stdout == stdout
                && g.stderr == stderr
        }) {
            Some(group) => {
                group.hosts.insert(host);
            }
            None => groups.push(ResultGroup {
                hosts: HostSet::from_iter([host]),
                exit_status: output.exit_status,
                interrupted: output.interrupted,
                stdout,
                stderr,
            }),
        }
    }
    groups.sort_by_key(|g| g.exit_status);
    groups
}

/// Prefixes `export K='v';` assignments for the remote shell.
fn with_env_prefix(command: &str, env: &BTreeMap<String, String>) -> String {
    if env.is_empty() {
        return command.to_string();
    }
    let assignments: Vec<String> = env
        .iter()
        .map(|(k, v)| format!("{k}={}", quote(v)))
        .collect();
    format!("export {}; {command}", assignments.join(" "))
}

fn quote(value: &str) -> String {
    shlex::try_quote(value)
        .map(|q| q.into_owned())
        .unwrap_or_else(|_| format!("'{}'", value.replace('\0', "").replace('\'', r"'\''")))
}

/// Escapes extended-regex metacharacters for `pkill -f`.
fn ere_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if "\\.^$*+?()[]{}|".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
