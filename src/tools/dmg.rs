//! `dmg` administrative tool: command builders and JSON response parsing.
//!
//! `dmg -j` prints a document of the shape
//! `{"response": {...}, "error": null, "status": 0}`; host level failures are
//! reported under `response.host_errors`.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::core::command::CommandBuilder;
use crate::core::errors::HarnessError;
use crate::infra::hosts::HostSet;
use crate::infra::remote::{RemoteExecutor, RemoteResult, RunOptions};

/// Member states that mean an engine rank is down.
const FAILED_MEMBER_STATES: [&str; 4] = ["unknown", "excluded", "errored", "unresponsive"];

/// The global `dmg` options.
pub fn builder(exe: &str) -> CommandBuilder {
    CommandBuilder::new(exe)
        .flag("json", "-j")
        .flag("insecure", "-i")
        .flag("debug", "-d")
        .param("hostlist", "-l {}")
        .param("hostfile", "-f {}")
        .param("config", "-o {}")
}

/// Parsed `dmg -j` output.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DmgResponse {
    #[serde(default)]
    pub status: i32,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub response: Value,
}

impl DmgResponse {
    pub fn parse(stdout: &str) -> Result<Self, HarnessError> {
        serde_json::from_str(stdout.trim()).map_err(|e| HarnessError::Parse {
            what: "dmg json output".to_string(),
            detail: e.to_string(),
        })
    }

    /// Turns a non-zero `status` or a set `error` into `HarnessError::Tool`.
    pub fn into_checked(self) -> Result<Self, HarnessError> {
        if self.status != 0 || self.error.is_some() {
            let mut message = self
                .error
                .clone()
                .unwrap_or_else(|| format!("status {}", self.status));
            let host_errors = self.host_errors();
            if !host_errors.is_empty() {
                let details: Vec<String> = host_errors
                    .iter()
                    .map(|(err, hosts)| format!("{hosts}: {err}"))
                    .collect();
                message.push_str(&format!(" ({})", details.join("; ")));
            }
            return Err(HarnessError::Tool {
                tool: "dmg".to_string(),
                message,
            });
        }
        Ok(self)
    }

    /// `response.host_errors`: error message → hosts that reported it.
    pub fn host_errors(&self) -> BTreeMap<String, HostSet> {
        let mut errors = BTreeMap::new();
        let Some(map) = self.response.get("host_errors").and_then(Value::as_object) else {
            return errors;
        };
        for (message, entry) in map {
            let hosts = entry
                .get("host_set")
                .and_then(Value::as_str)
                .and_then(|h| HostSet::parse(h).ok())
                .unwrap_or_default();
            errors.insert(message.clone(), hosts);
        }
        errors
    }

    /// Looks up a value inside `response` by JSON pointer.
    pub fn pointer(&self, pointer: &str) -> Option<&Value> {
        self.response.pointer(pointer)
    }

    /// `response.rebuild.state` of a `pool query`.
    pub fn rebuild_state(&self) -> Result<RebuildState, HarnessError> {
        let state = self
            .pointer("/rebuild/state")
            .and_then(Value::as_str)
            .ok_or_else(|| HarnessError::Parse {
                what: "pool query".to_string(),
                detail: "no rebuild state in response".to_string(),
            })?;
        state.parse()
    }

    /// `response.status` of a `check query`.
    pub fn checker_status(&self) -> Result<CheckerStatus, HarnessError> {
        let status = self
            .pointer("/status")
            .and_then(Value::as_str)
            .ok_or_else(|| HarnessError::Parse {
                what: "check query".to_string(),
                detail: "no checker status in response".to_string(),
            })?;
        status.parse()
    }

    /// Labels from a `pool list`, sorted.
    pub fn pool_labels(&self) -> Vec<String> {
        self.pool_field("label")
    }

    /// UUIDs from a `pool list`, sorted.
    pub fn pool_uuids(&self) -> Vec<String> {
        self.pool_field("uuid")
    }

    fn pool_field(&self, key: &str) -> Vec<String> {
        let mut values: Vec<String> = self
            .response
            .get("pools")
            .and_then(Value::as_array)
            .map(|pools| {
                pools
                    .iter()
                    .filter_map(|p| p.get(key).and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        values.sort();
        values
    }

    /// Ranks of a `system query` whose state means the engine is down,
    /// with that state.
    pub fn failed_ranks(&self) -> BTreeMap<u64, String> {
        let mut failed = BTreeMap::new();
        let members = self
            .response
            .get("members")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for member in members {
            let (Some(rank), Some(state)) = (
                member.get("rank").and_then(Value::as_u64),
                member.get("state").and_then(Value::as_str),
            ) else {
                continue;
            };
            if FAILED_MEMBER_STATES.contains(&state.to_lowercase().as_str()) {
                failed.insert(rank, state.to_string());
            }
        }
        failed
    }
}

/// Pool rebuild progress as reported by `dmg pool query`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildState {
    Idle,
    Busy,
    Done,
}

impl FromStr for RebuildState {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "idle" => Ok(RebuildState::Idle),
            "busy" => Ok(RebuildState::Busy),
            "done" => Ok(RebuildState::Done),
            other => Err(HarnessError::Parse {
                what: "rebuild state".to_string(),
                detail: format!("unexpected '{other}'"),
            }),
        }
    }
}

impl fmt::Display for RebuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RebuildState::Idle => "idle",
            RebuildState::Busy => "busy",
            RebuildState::Done => "done",
        })
    }
}

/// Overall state of the consistency checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckerStatus {
    Init,
    Running,
    Completed,
    Stopped,
    Failed,
    Paused,
    Implicated,
}

impl CheckerStatus {
    /// `true` once the checker will make no further progress on its own.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            CheckerStatus::Completed
                | CheckerStatus::Stopped
                | CheckerStatus::Failed
                | CheckerStatus::Implicated
        )
    }
}

impl FromStr for CheckerStatus {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INIT" => Ok(CheckerStatus::Init),
            "RUNNING" => Ok(CheckerStatus::Running),
            "COMPLETED" => Ok(CheckerStatus::Completed),
            "STOPPED" => Ok(CheckerStatus::Stopped),
            "FAILED" => Ok(CheckerStatus::Failed),
            "PAUSED" => Ok(CheckerStatus::Paused),
            "IMPLICATED" => Ok(CheckerStatus::Implicated),
            other => Err(HarnessError::Parse {
                what: "checker status".to_string(),
                detail: format!("unexpected '{other}'"),
            }),
        }
    }
}

/// Runs `dmg` in JSON mode from a set of hosts (usually one client).
#[derive(Debug, Clone)]
pub struct Dmg {
    base: CommandBuilder,
    hosts: HostSet,
    executor: Arc<RemoteExecutor>,
    timeout: Option<Duration>,
}

impl Dmg {
    pub fn new(exe: &str, hosts: HostSet, executor: Arc<RemoteExecutor>) -> Result<Self, HarnessError> {
        let base = builder(exe).with("json", true)?;
        Ok(Self {
            base,
            hosts,
            executor,
            timeout: Some(Duration::from_secs(120)),
        })
    }

    pub fn with_config(mut self, path: &str) -> Result<Self, HarnessError> {
        self.base.set("config", path)?;
        Ok(self)
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Renders `dmg -j <command> <action> <sub-command options>`.
    pub fn render(
        &self,
        command: &str,
        action: &str,
        options: Option<CommandBuilder>,
    ) -> Result<String, HarnessError> {
        let mut builder = self.base.clone().command(command).action(action);
        if let Some(options) = options {
            builder = builder.arg(options.render()?);
        }
        builder.render()
    }

    pub fn pool_list_command(&self, verbose: bool) -> Result<String, HarnessError> {
        let options = CommandBuilder::new("")
            .flag("no_query", "--no-query")
            .flag("verbose", "--verbose")
            .with("verbose", verbose)?;
        self.render("pool", "list", Some(options))
    }

    pub fn pool_query_command(&self, pool: &str) -> Result<String, HarnessError> {
        let options = CommandBuilder::new("")
            .param("pool", "{}")
            .flag("show_enabled", "--show-enabled")
            .flag("show_disabled", "--show-disabled")
            .with("pool", pool)?;
        self.render("pool", "query", Some(options))
    }

    pub fn system_query_command(&self, verbose: bool) -> Result<String, HarnessError> {
        let options = CommandBuilder::new("")
            .param("ranks", "--ranks={}")
            .flag("verbose", "--verbose")
            .with("verbose", verbose)?;
        self.render("system", "query", Some(options))
    }

    pub fn telemetry_query_command(&self, host: &str, metrics: &[&str]) -> Result<String, HarnessError> {
        let mut options = CommandBuilder::new("")
            .param("host", "--host={}")
            .param("metrics", "--metrics={}")
            .with("host", host)?;
        if !metrics.is_empty() {
            options.set("metrics", metrics.join(","))?;
        }
        self.render("telemetry", "metrics query", Some(options))
    }

    pub fn check_query_command(&self) -> Result<String, HarnessError> {
        self.render("check", "query", None)
    }

    /// Runs a rendered `dmg` command and parses its JSON output. Each output
    /// group is parsed on its own and every host must succeed; the first
    /// group's document is returned.
    pub async fn json(&self, command: &str) -> Result<DmgResponse, HarnessError> {
        let options = RunOptions {
            timeout: self.timeout,
            ..RunOptions::default()
        };
        let result = self.executor.run(&self.hosts, command, &options).await?;
        Self::checked_document(&result)
    }

    /// The first group's document, once every group parsed cleanly and every
    /// host returned the expected status.
    pub fn checked_document(result: &RemoteResult) -> Result<DmgResponse, HarnessError> {
        let mut first = None;
        for group in &result.groups {
            // dmg reports its own errors in the document, with a non-zero rc.
            let response = match DmgResponse::parse(&group.stdout.join("\n")) {
                Ok(response) => response.into_checked()?,
                Err(parse_error) => {
                    return Err(result
                        .failure()
                        .map(HarnessError::RemoteCommand)
                        .unwrap_or(parse_error));
                }
            };
            first.get_or_insert(response);
        }
        if let Some(failure) = result.failure() {
            return Err(HarnessError::RemoteCommand(failure));
        }
        first.ok_or_else(|| HarnessError::Parse {
            what: "dmg output".to_string(),
            detail: format!("no output from '{}'", result.command),
        })
    }

    pub async fn pool_list(&self) -> Result<DmgResponse, HarnessError> {
        self.json(&self.pool_list_command(false)?).await
    }

    pub async fn pool_query(&self, pool: &str) -> Result<DmgResponse, HarnessError> {
        self.json(&self.pool_query_command(pool)?).await
    }

    pub async fn system_query(&self) -> Result<DmgResponse, HarnessError> {
        self.json(&self.system_query_command(true)?).await
    }

    pub async fn telemetry_metrics_query(
        &self,
        host: &str,
        metrics: &[&str],
    ) -> Result<DmgResponse, HarnessError> {
        self.json(&self.telemetry_query_command(host, metrics)?).await
    }

    pub async fn check_query(&self) -> Result<DmgResponse, HarnessError> {
        self.json(&self.check_query_command()?).await
    }

    pub async fn rebuild_state(&self, pool: &str) -> Result<RebuildState, HarnessError> {
        let state = self.pool_query(pool).await?.rebuild_state()?;
        debug!(pool, %state, "rebuild state");
        Ok(state)
    }
}
