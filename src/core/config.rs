//! # Test Plan Configuration Module / 测试计划配置模块
//!
//! The TOML test plan: named host groups, environment passthrough, remote
//! transport settings and the list of cases with their stage steps.
//!
//! TOML 测试计划：命名主机组、环境变量透传、远程传输设置，
//! 以及带有各阶段步骤的用例列表。

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::command::ParamValue;
use crate::core::errors::HarnessError;
use crate::infra::fs::expand_path;
use crate::infra::hosts::HostSet;
use crate::tools;

/// Which transport reaches the hosts.
/// 使用哪种传输方式到达主机。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Ssh,
    Local,
}

/// Remote execution settings.
/// 远程执行设置。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RemoteConfig {
    /// `ssh` for real clusters, `local` to run every host as a local shell.
    /// `ssh` 用于真实集群，`local` 将每台主机作为本地 shell 运行。
    #[serde(default)]
    pub transport: TransportKind,
    /// Remote user; the current user when not set.
    /// 远程用户；未设置时为当前用户。
    #[serde(default)]
    pub user: Option<String>,
    /// Extra options handed to `ssh` verbatim, e.g. `-oStrictHostKeyChecking=no`.
    /// 原样传递给 `ssh` 的额外选项。
    #[serde(default)]
    pub ssh_options: Vec<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Default timeout for every command step that does not set its own.
    /// 未设置自身超时的命令步骤的默认超时。
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            user: None,
            ssh_options: vec![],
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_secs: None,
        }
    }
}

fn default_connect_timeout() -> u64 {
    10
}

/// Structured form of a command, rendered through the tool's builder.
/// 命令的结构化形式，通过工具的构建器渲染。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StructuredCommand {
    pub tool: String,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
}

/// A command: either a raw shell string or a structured tool invocation.
/// 命令：原始 shell 字符串或结构化的工具调用。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CommandSpec {
    Raw(String),
    Structured(StructuredCommand),
}

impl CommandSpec {
    /// Renders the command line.
    pub fn render(&self) -> Result<String, HarnessError> {
        match self {
            CommandSpec::Raw(raw) => Ok(raw.clone()),
            CommandSpec::Structured(spec) => {
                let mut builder = tools::builder_for(&spec.tool);
                for flag in &spec.flags {
                    if !builder.has(flag) {
                        builder = builder.flag(flag, &tools::generic_flag(flag));
                    }
                    builder.set(flag, true)?;
                }
                for (name, value) in &spec.params {
                    if !builder.has(name) {
                        builder = builder.param(name, &tools::generic_param(name));
                    }
                    builder.set(name, value.clone())?;
                }
                if let Some(command) = &spec.command {
                    builder.set("command", command.as_str())?;
                }
                if let Some(action) = &spec.action {
                    builder.set("action", action.as_str())?;
                }
                builder.render()
            }
        }
    }
}

impl From<&str> for CommandSpec {
    fn from(raw: &str) -> Self {
        CommandSpec::Raw(raw.to_string())
    }
}

/// What a command's outcome must look like. Every field that is set must
/// hold on every host.
/// 命令结果必须满足的条件。设置的每个字段都必须在每台主机上成立。
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Expectation {
    /// Expected exit status on every host.
    /// 每台主机上预期的退出状态。
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default)]
    pub stdout_contains: Option<String>,
    /// A regular expression stdout must match.
    /// stdout 必须匹配的正则表达式。
    #[serde(default)]
    pub stdout_matches: Option<String>,
    /// RFC 6901 pointer into the JSON document printed on stdout.
    /// 指向 stdout 上打印的 JSON 文档的 RFC 6901 指针。
    #[serde(default)]
    pub json_pointer: Option<String>,
    /// Value the pointer must resolve to; presence alone when not set.
    /// 指针必须解析到的值；未设置时仅要求存在。
    #[serde(default)]
    pub equals: Option<serde_json::Value>,
}

fn default_hosts() -> String {
    "localhost".to_string()
}

/// Runs a command, optionally in the background.
/// 运行命令，可选择在后台运行。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RunStep {
    #[serde(default)]
    pub name: Option<String>,
    /// Host group name or host range.
    /// 主机组名称或主机范围。
    #[serde(default = "default_hosts")]
    pub hosts: String,
    pub command: CommandSpec,
    /// Start the command and continue; it is joined before verify.
    /// 启动命令后继续；在验证之前汇合。
    #[serde(default)]
    pub background: bool,
    #[serde(default)]
    pub expect_rc: i32,
    /// A failure only records a warning.
    /// 失败仅记录警告。
    #[serde(default)]
    pub warn_only: bool,
    #[serde(default)]
    pub sudo: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Register this command as a scoped resource release.
    /// 将此命令注册为作用域资源释放。
    #[serde(default)]
    pub cleanup: Option<CommandSpec>,
}

/// Injects a fault through the case's fault injector.
/// 通过用例的故障注入器注入故障。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FaultStep {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_hosts")]
    pub hosts: String,
    pub command: CommandSpec,
}

/// Re-queries until the expectation holds, within a bound.
/// 在限定范围内重复查询，直到预期成立。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PollStep {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_hosts")]
    pub hosts: String,
    pub command: CommandSpec,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_interval")]
    pub interval_secs: f64,
    #[serde(default)]
    pub max_duration_secs: Option<f64>,
    #[serde(default)]
    pub expect: Expectation,
}

impl PollStep {
    /// The pause between attempts.
    pub fn interval(&self) -> Result<Duration, HarnessError> {
        seconds("interval_secs", self.interval_secs)
    }

    /// The overall bound on the wait, when one is set.
    pub fn max_duration(&self) -> Result<Option<Duration>, HarnessError> {
        self.max_duration_secs
            .map(|secs| seconds("max_duration_secs", secs))
            .transpose()
    }
}

/// Converts plan seconds, rejecting negative, NaN and infinite values.
fn seconds(field: &str, secs: f64) -> Result<Duration, HarnessError> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| HarnessError::Config(format!("{field} must be a finite, non-negative number, got {secs}")))
}

fn default_max_attempts() -> u32 {
    10
}

fn default_interval() -> f64 {
    1.0
}

/// Runs a command once and checks its outcome.
/// 运行一次命令并检查其结果。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AssertStep {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_hosts")]
    pub hosts: String,
    pub command: CommandSpec,
    #[serde(default)]
    pub expect: Expectation,
}

/// One action inside a stage.
/// 阶段中的一个动作。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Step {
    Run(RunStep),
    Fault(FaultStep),
    Poll(PollStep),
    Assert(AssertStep),
}

impl Step {
    /// A label for logs and failure messages.
    pub fn label(&self) -> String {
        let (kind, name, command) = match self {
            Step::Run(s) => ("run", &s.name, &s.command),
            Step::Fault(s) => ("fault", &s.name, &s.command),
            Step::Poll(s) => ("poll", &s.name, &s.command),
            Step::Assert(s) => ("assert", &s.name, &s.command),
        };
        match (name, command) {
            (Some(name), _) => format!("{kind} '{name}'"),
            (None, CommandSpec::Raw(raw)) => format!("{kind} '{raw}'"),
            (None, CommandSpec::Structured(s)) => format!("{kind} '{}'", s.tool),
        }
    }

    fn hosts(&self) -> &str {
        match self {
            Step::Run(s) => &s.hosts,
            Step::Fault(s) => &s.hosts,
            Step::Poll(s) => &s.hosts,
            Step::Assert(s) => &s.hosts,
        }
    }
}

/// A single test case of the plan.
/// 计划中的单个测试用例。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TestCase {
    /// The unique name for the test case, used in logs and reports.
    /// 测试用例的唯一名称，用于日志和报告。
    pub name: String,
    /// Tags used to select cases from the command line.
    /// 用于从命令行选择用例的标签。
    #[serde(default)]
    pub tags: Vec<String>,
    /// Bound on the case's stages before teardown.
    /// 清理之前用例各阶段的时间上限。
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Report the case as SKIP without running it.
    /// 将用例报告为 SKIP 而不运行。
    #[serde(default)]
    pub skip: bool,
    #[serde(default)]
    pub skip_reason: Option<String>,
    /// CPU architectures the case runs on; all when empty.
    /// 此用例运行的 CPU 架构；为空时在所有架构上运行。
    #[serde(default)]
    pub arch: Vec<String>,
    /// Case-level environment, layered over the plan's.
    /// 用例级环境变量，叠加在计划的环境变量之上。
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub setup: Vec<Step>,
    #[serde(default)]
    pub act: Vec<Step>,
    #[serde(default)]
    pub wait: Vec<Step>,
    #[serde(default)]
    pub verify: Vec<Step>,
    #[serde(default)]
    pub teardown: Vec<Step>,
}

impl Default for TestCase {
    fn default() -> Self {
        Self {
            name: "unknown".to_string(),
            tags: vec![],
            timeout_secs: None,
            skip: false,
            skip_reason: None,
            arch: vec![],
            env: BTreeMap::new(),
            setup: vec![],
            act: vec![],
            wait: vec![],
            verify: vec![],
            teardown: vec![],
        }
    }
}

impl TestCase {
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.setup
            .iter()
            .chain(&self.act)
            .chain(&self.wait)
            .chain(&self.verify)
            .chain(&self.teardown)
    }
}

/// The whole test plan, loaded from a TOML file.
/// 从 TOML 文件加载的整个测试计划。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TestPlan {
    /// The language for the runner's output messages (e.g., "en", "zh-CN").
    /// 运行器输出消息的语言（例如 "en", "zh-CN"）。
    #[serde(default = "default_language")]
    pub language: String,
    /// Where reports and archived case directories are written.
    /// 报告和归档的用例目录写入的位置。
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Named host groups, e.g. `servers = "server-[1-3]"`.
    /// 命名主机组，例如 `servers = "server-[1-3]"`。
    #[serde(default)]
    pub hosts: BTreeMap<String, HostSet>,
    /// Environment passed through to every command.
    /// 透传给每个命令的环境变量。
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub cases: Vec<TestCase>,
}

fn default_language() -> String {
    "en".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("ftest-results")
}

impl TestPlan {
    /// Reads, parses and validates a plan file. Relative output directories
    /// are resolved against the plan's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read test plan: {}", path.display()))?;
        let mut plan: TestPlan = toml::from_str(&content)
            .with_context(|| format!("Failed to parse test plan: {}", path.display()))?;

        let output_dir = expand_path(&plan.output_dir)?;
        plan.output_dir = if output_dir.is_relative() {
            path.parent().unwrap_or(Path::new(".")).join(output_dir)
        } else {
            output_dir
        };
        plan.validate()?;
        Ok(plan)
    }

    /// Checks names are unique, host references resolve and every structured
    /// command renders.
    pub fn validate(&self) -> Result<()> {
        let mut names = BTreeSet::new();
        for case in &self.cases {
            if !names.insert(case.name.as_str()) {
                bail!("Duplicate test case name: '{}'", case.name);
            }
            for step in case.steps() {
                let hosts = step.hosts();
                if !self.hosts.contains_key(hosts) {
                    HostSet::parse(hosts).with_context(|| {
                        format!("Case '{}', {}: unknown host group", case.name, step.label())
                    })?;
                }
                let (Step::Run(RunStep { command, .. })
                | Step::Fault(FaultStep { command, .. })
                | Step::Poll(PollStep { command, .. })
                | Step::Assert(AssertStep { command, .. })) = step;
                command
                    .render()
                    .with_context(|| format!("Case '{}', {}", case.name, step.label()))?;
                if let Step::Poll(poll) = step {
                    if poll.max_attempts == 0 {
                        bail!("Case '{}', {}: max_attempts must be at least 1", case.name, step.label());
                    }
                    poll.interval()
                        .and(poll.max_duration())
                        .with_context(|| format!("Case '{}', {}", case.name, step.label()))?;
                }
            }
        }
        Ok(())
    }
}
