//! `ior` workload: command builder and the "Summary of all tests:" scraper.

use std::fmt;
use std::time::Duration;

use crate::core::command::{CommandBuilder, ParamValue};
use crate::core::errors::HarnessError;
use crate::infra::hosts::HostSet;
use crate::infra::remote::{RemoteExecutor, RunOptions};

const SUMMARY_MARKER: &str = "Summary of all tests:";

/// `ior` with its common and DFS module options.
pub fn builder(exe: &str) -> CommandBuilder {
    CommandBuilder::new(exe)
        .param("flags", "{}")
        .param_with_default("api", "-a {}", "DFS")
        .param("block_size", "-b {}")
        .param("test_delay", "-d {}")
        .param("script", "-f {}")
        .param("signature", "-G {}")
        .param("repetitions", "-i {}")
        .param("outlier_threshold", "-j {}")
        .param("alignment", "-J {}")
        .param("data_packet_type", "-l {}")
        .param("memory_per_node", "-M {}")
        .param("num_tasks", "-N {}")
        .param("test_file", "-o {}")
        .param("directives", "-O {}")
        .param("sw_deadline", "-D {}")
        .param("sw_wearout", "-O stoneWallingWearOut={}")
        .param("sw_wearout_iteration", "-O stoneWallingWearOutIterations={}")
        .param("sw_status_file", "-O stoneWallingStatusFile={}")
        .param("task_offset", "-Q {}")
        .param("segment_count", "-s {}")
        .param("transfer_size", "-t {}")
        .param("max_duration", "-T {}")
        .param("dfs_pool", "--dfs.pool {}")
        .param("dfs_cont", "--dfs.cont {}")
        .flag("dfs_destroy", "--dfs.destroy")
        .param("dfs_group", "--dfs.group {}")
        .param_with_default("dfs_chunk", "--dfs.chunk_size {}", 1_048_576i64)
        .param_with_default("dfs_oclass", "--dfs.oclass {}", "SX")
        .param_with_default("dfs_dir_oclass", "--dfs.dir_oclass {}", "SX")
        .param("dfs_prefix", "--dfs.prefix {}")
}

/// Columns of the summary table, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IorColumn {
    Operation = 0,
    MaxMib,
    MinMib,
    MeanMib,
    StdDevMib,
    MaxOps,
    MinOps,
    MeanOps,
    StdDevOps,
    MeanSeconds,
    StonewallSeconds,
    StonewallMib,
    TestNo,
    NumTasks,
    Tpn,
    Reps,
    Fpp,
    Reord,
    ReordOff,
    ReordRand,
    Seed,
    SegCnt,
    BlkSiz,
    XSize,
    AggsMib,
    Api,
    RefNum,
}

impl IorColumn {
    pub fn index(self) -> usize {
        self as usize
    }
}

/// One row of the summary table (one operation).
#[derive(Debug, Clone, PartialEq)]
pub struct IorMetrics {
    values: Vec<String>,
}

impl IorMetrics {
    pub fn operation(&self) -> &str {
        self.text(IorColumn::Operation).unwrap_or_default()
    }

    pub fn text(&self, column: IorColumn) -> Option<&str> {
        self.values.get(column.index()).map(String::as_str)
    }

    /// The column as a number; `None` for missing or `NA` cells.
    pub fn value(&self, column: IorColumn) -> Option<f64> {
        self.text(column).and_then(|v| v.parse().ok())
    }

    pub fn max_mib(&self) -> Option<f64> {
        self.value(IorColumn::MaxMib)
    }

    pub fn mean_mib(&self) -> Option<f64> {
        self.value(IorColumn::MeanMib)
    }

    pub fn mean_ops(&self) -> Option<f64> {
        self.value(IorColumn::MeanOps)
    }
}

/// All rows of an `ior` summary.
#[derive(Debug, Clone, PartialEq)]
pub struct IorSummary {
    pub rows: Vec<IorMetrics>,
}

impl IorSummary {
    /// Finds the summary in `ior` stdout. The line after the marker is the
    /// header; rows follow until a blank line.
    pub fn parse(stdout: &str) -> Result<Self, HarnessError> {
        let lines: Vec<&str> = stdout.lines().collect();
        let start = lines
            .iter()
            .position(|l| l.trim() == SUMMARY_MARKER)
            .ok_or_else(|| HarnessError::Parse {
                what: "ior output".to_string(),
                detail: format!("no '{SUMMARY_MARKER}' section"),
            })?;
        let rows: Vec<IorMetrics> = lines
            .iter()
            .skip(start + 2)
            .take_while(|l| !l.trim().is_empty())
            .map(|l| IorMetrics {
                values: l.split_whitespace().map(str::to_string).collect(),
            })
            .collect();
        if rows.is_empty() {
            return Err(HarnessError::Parse {
                what: "ior output".to_string(),
                detail: "summary has no rows".to_string(),
            });
        }
        Ok(Self { rows })
    }

    pub fn operation(&self, name: &str) -> Option<&IorMetrics> {
        self.rows.iter().find(|r| r.operation() == name)
    }

    pub fn write(&self) -> Option<&IorMetrics> {
        self.operation("write")
    }

    pub fn read(&self) -> Option<&IorMetrics> {
        self.operation("read")
    }
}

/// An `ior` run: the command plus an optional launcher prefix such as
/// `mpirun -np 8`.
#[derive(Debug, Clone)]
pub struct IorCommand {
    builder: CommandBuilder,
    launcher: Option<String>,
    pub timeout: Option<Duration>,
}

impl IorCommand {
    pub fn new(exe: &str) -> Self {
        Self {
            builder: builder(exe),
            launcher: None,
            timeout: None,
        }
    }

    pub fn set(&mut self, name: &str, value: impl Into<ParamValue>) -> Result<&mut Self, HarnessError> {
        self.builder.set(name, value)?;
        Ok(self)
    }

    pub fn with_launcher(mut self, launcher: impl Into<String>) -> Self {
        self.launcher = Some(launcher.into());
        self
    }

    pub fn render(&self) -> Result<String, HarnessError> {
        let command = self.builder.render()?;
        Ok(match &self.launcher {
            Some(launcher) => format!("{launcher} {command}"),
            None => command,
        })
    }

    /// Runs `ior` and scrapes the summary from every host that printed one.
    pub async fn run(
        &self,
        executor: &RemoteExecutor,
        hosts: &HostSet,
    ) -> Result<IorSummary, HarnessError> {
        let options = RunOptions {
            timeout: self.timeout,
            ..RunOptions::default()
        };
        let result = executor.run_checked(hosts, &self.render()?, &options).await?;
        IorSummary::parse(&result.stdout_text())
    }
}

impl fmt::Display for IorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.render() {
            Ok(command) => f.write_str(&command),
            Err(e) => write!(f, "<invalid ior command: {e}>"),
        }
    }
}
