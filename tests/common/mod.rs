// Shared test helpers for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use ftest_runner::core::errors::HarnessError;
use ftest_runner::core::execution::CaseEnvironment;
use ftest_runner::core::orchestrator::{Fault, FaultInjector};
use ftest_runner::infra::command::{CommandOutput, TIMEOUT_EXIT_STATUS};
use ftest_runner::infra::hosts::HostSet;
use ftest_runner::infra::remote::{RemoteExecutor, Transport};
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// One scripted answer of a host.
#[derive(Debug, Clone)]
pub enum Reply {
    Exit { status: i32, stdout: String, delay: Duration },
    Unreachable,
}

impl Reply {
    pub fn ok(stdout: &str) -> Self {
        Reply::Exit {
            status: 0,
            stdout: stdout.to_string(),
            delay: Duration::ZERO,
        }
    }

    pub fn exit(status: i32) -> Self {
        Reply::Exit {
            status,
            stdout: String::new(),
            delay: Duration::ZERO,
        }
    }

    pub fn slow(status: i32, delay: Duration) -> Self {
        Reply::Exit {
            status,
            stdout: String::new(),
            delay,
        }
    }
}

#[derive(Debug)]
struct Rule {
    host: Option<String>,
    needle: String,
    replies: VecDeque<Reply>,
}

/// A transport that answers from a script instead of reaching hosts.
///
/// Rules are matched in registration order by host (or any host) and a
/// substring of the command. Each rule plays its replies in order and keeps
/// repeating the last one. Unmatched commands exit 0 with no output.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<(String, String)>>,
    kills: Mutex<Vec<(String, String)>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, host: Option<&str>, needle: &str, replies: Vec<Reply>) {
        self.rules.lock().unwrap().push(Rule {
            host: host.map(str::to_string),
            needle: needle.to_string(),
            replies: replies.into(),
        });
    }

    /// Every `(host, command)` executed so far.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_matching(&self, needle: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, command)| command.contains(needle))
            .count()
    }

    pub fn kills(&self) -> Vec<(String, String)> {
        self.kills.lock().unwrap().clone()
    }

    fn next_reply(&self, host: &str, command: &str) -> Reply {
        let mut rules = self.rules.lock().unwrap();
        let rule = rules.iter_mut().find(|rule| {
            rule.host.as_deref().is_none_or(|h| h == host) && command.contains(&rule.needle)
        });
        match rule {
            Some(rule) if rule.replies.len() > 1 => rule.replies.pop_front().unwrap(),
            Some(rule) => rule.replies.front().cloned().unwrap_or_else(|| Reply::exit(0)),
            None => Reply::exit(0),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(
        &self,
        host: &str,
        command: &str,
        _env: &BTreeMap<String, String>,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, HarnessError> {
        self.calls
            .lock()
            .unwrap()
            .push((host.to_string(), command.to_string()));
        match self.next_reply(host, command) {
            Reply::Unreachable => Err(HarnessError::Connection {
                hosts: HostSet::from_iter([host]),
                detail: "ssh: connect to host: Connection refused".to_string(),
            }),
            Reply::Exit { status, stdout, delay } => {
                if let Some(limit) = timeout.filter(|limit| *limit < delay) {
                    tokio::time::sleep(limit).await;
                    return Ok(CommandOutput {
                        exit_status: TIMEOUT_EXIT_STATUS,
                        stdout: String::new(),
                        stderr: String::new(),
                        interrupted: true,
                    });
                }
                tokio::time::sleep(delay).await;
                Ok(CommandOutput {
                    exit_status: status,
                    stdout,
                    stderr: String::new(),
                    interrupted: false,
                })
            }
        }
    }

    async fn kill(&self, host: &str, command: &str) -> Result<(), HarnessError> {
        self.kills
            .lock()
            .unwrap()
            .push((host.to_string(), command.to_string()));
        Ok(())
    }
}

/// Records injected faults instead of running them.
#[derive(Debug, Default)]
pub struct RecordingInjector {
    pub faults: Mutex<Vec<Fault>>,
}

#[async_trait]
impl FaultInjector for RecordingInjector {
    async fn inject(&self, fault: &Fault, _executor: &RemoteExecutor) -> Result<(), HarnessError> {
        self.faults.lock().unwrap().push(fault.clone());
        Ok(())
    }
}

pub fn hosts(expr: &str) -> HostSet {
    HostSet::parse(expr).unwrap()
}

/// A case environment over `transport` whose archives land in `dir`.
pub fn case_environment(
    transport: Arc<ScriptedTransport>,
    injector: Arc<RecordingInjector>,
    dir: &TempDir,
) -> CaseEnvironment {
    CaseEnvironment {
        executor: Arc::new(RemoteExecutor::new(transport)),
        faults: injector,
        hosts: BTreeMap::from([
            ("servers".to_string(), hosts("server-[1-3]")),
            ("clients".to_string(), hosts("client-1")),
        ]),
        env: BTreeMap::new(),
        output_dir: dir.path().join("results"),
        workdir_base: Some(dir.path().to_path_buf()),
        default_timeout: Some(Duration::from_secs(5)),
        cancel: CancellationToken::new(),
    }
}

/// Writes a plan file into `dir` and returns its path.
pub fn write_plan(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).expect("Failed to write test plan");
    path
}

/// A plan for the local transport with one passing, one failing and one
/// skipped case.
pub const MIXED_LOCAL_PLAN: &str = r#"
language = "en"
output_dir = "out"

[hosts]
nodes = "node-[1-2]"

[remote]
transport = "local"

[[cases]]
name = "echo_on_every_node"
tags = ["smoke"]

[[cases.act]]
kind = "run"
hosts = "nodes"
command = "echo ready-$FTEST_HOST"

[[cases.verify]]
kind = "assert"
hosts = "nodes"
command = "echo '{\"status\": 0, \"response\": {\"state\": \"done\"}}'"
expect = { json_pointer = "/response/state", equals = "done" }

[[cases]]
name = "node_2_disagrees"
tags = ["regression"]

[[cases.verify]]
kind = "assert"
hosts = "nodes"
command = "test \"$FTEST_HOST\" = node-1"

[[cases]]
name = "needs_hardware"
skip = true
skip_reason = "no NVMe devices"
"#;

/// A plan for the local transport where every case passes.
pub const PASSING_LOCAL_PLAN: &str = r#"
language = "en"
output_dir = "out"

[hosts]
nodes = "node-[1-2]"

[remote]
transport = "local"

[[cases]]
name = "marker_file"

[[cases.setup]]
kind = "run"
hosts = "localhost"
command = "touch $FTEST_CASE_DIR/marker"

[[cases.wait]]
kind = "poll"
hosts = "nodes"
command = "echo done"
max_attempts = 3
interval_secs = 0.0
expect = { stdout_contains = "done" }

[[cases.verify]]
kind = "assert"
hosts = "localhost"
command = "test -f $FTEST_CASE_DIR/marker"
"#;
