//! `mdtest` workload: command builder and the "SUMMARY rate:" scraper.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::core::command::{CommandBuilder, ParamValue};
use crate::core::errors::HarnessError;
use crate::infra::hosts::HostSet;
use crate::infra::remote::{RemoteExecutor, RunOptions};

const RATE_MARKER: &str = "SUMMARY rate:";

/// `mdtest` with its common and DFS module options.
pub fn builder(exe: &str) -> CommandBuilder {
    CommandBuilder::new(exe)
        .flag("create_only", "-C")
        .flag("files_only", "-F")
        .flag("dirs_only", "-D")
        .flag("remove_only", "-r")
        .flag("stat_only", "-T")
        .flag("read_only", "-E")
        .flag("unique_dir", "-u")
        .flag("verbose", "-v")
        .param_with_default("api", "-a {}", "DFS")
        .param("branching_factor", "-b {}")
        .param("test_dir", "-d {}")
        .param("read_bytes", "-e {}")
        .param("iterations", "-i {}")
        .param("items", "-I {}")
        .param("num_of_files_dirs", "-n {}")
        .param("write_bytes", "-w {}")
        .param("depth", "-z {}")
        .param("stonewall_timer", "-W {}")
        .param("dfs_pool", "--dfs.pool {}")
        .param("dfs_cont", "--dfs.cont {}")
        .param("dfs_group", "--dfs.group {}")
        .flag("dfs_destroy", "--dfs.destroy")
        .param_with_default("dfs_chunk", "--dfs.chunk_size {}", 1_048_576i64)
        .param_with_default("dfs_oclass", "--dfs.oclass {}", "SX")
        .param_with_default("dfs_dir_oclass", "--dfs.dir_oclass {}", "SX")
        .param("dfs_prefix", "--dfs.prefix {}")
}

/// One row of the rate table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MdtestRate {
    pub max: f64,
    pub min: f64,
    pub mean: f64,
    pub std_dev: f64,
}

/// Operation name (e.g. `File creation`) → rates.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MdtestSummary {
    pub rates: BTreeMap<String, MdtestRate>,
}

impl MdtestSummary {
    pub fn parse(stdout: &str) -> Result<Self, HarnessError> {
        let parse_error = |detail: String| HarnessError::Parse {
            what: "mdtest output".to_string(),
            detail,
        };
        let mut lines = stdout.lines().skip_while(|l| !l.trim_start().starts_with(RATE_MARKER));
        if lines.next().is_none() {
            return Err(parse_error(format!("no '{RATE_MARKER}' section")));
        }

        let mut rates = BTreeMap::new();
        for line in lines
            .skip_while(|l| !l.contains(':'))
            .take_while(|l| !l.trim().is_empty())
        {
            let Some((operation, numbers)) = line.split_once(':') else {
                continue;
            };
            let values: Vec<f64> = numbers
                .split_whitespace()
                .map(str::parse)
                .collect::<Result<_, _>>()
                .map_err(|e| parse_error(format!("bad rate in '{}': {e}", line.trim())))?;
            let [max, min, mean, std_dev] = values[..] else {
                return Err(parse_error(format!("expected 4 columns in '{}'", line.trim())));
            };
            rates.insert(
                operation.trim().to_string(),
                MdtestRate { max, min, mean, std_dev },
            );
        }
        if rates.is_empty() {
            return Err(parse_error("rate table has no rows".to_string()));
        }
        Ok(Self { rates })
    }

    pub fn rate(&self, operation: &str) -> Option<&MdtestRate> {
        self.rates.get(operation)
    }
}

/// An `mdtest` run, optionally behind a launcher such as `mpirun -np 8`.
#[derive(Debug, Clone)]
pub struct MdtestCommand {
    builder: CommandBuilder,
    launcher: Option<String>,
    pub timeout: Option<Duration>,
}

impl MdtestCommand {
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

    pub async fn run(
        &self,
        executor: &RemoteExecutor,
        hosts: &HostSet,
    ) -> Result<MdtestSummary, HarnessError> {
        let options = RunOptions {
            timeout: self.timeout,
            ..RunOptions::default()
        };
        let result = executor.run_checked(hosts, &self.render()?, &options).await?;
        MdtestSummary::parse(&result.stdout_text())
    }
}
