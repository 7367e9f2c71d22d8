//! # Data Models Module / 数据模型模块
//!
//! This module defines the core data structures used throughout the harness:
//! the closed set of result statuses, the stages of a test case, and the
//! per-case result record that reports are rendered from.
//!
//! 此模块定义了整个框架中使用的核心数据结构：
//! 封闭的结果状态集合、测试用例的阶段，以及用于渲染报告的单个用例结果记录。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::core::errors::HarnessError;
use crate::infra::t;

/// The outcome of a single test case.
/// 单个测试用例的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    /// Every stage completed and every expectation held.
    /// 所有阶段完成且所有预期均成立。
    Pass,
    /// Passed, but a non-fatal step reported a problem.
    /// 通过，但某个非致命步骤报告了问题。
    Warn,
    /// Deliberately not run. / 被有意跳过。
    Skip,
    /// The system under test violated an expectation.
    /// 被测系统违反了预期。
    Fail,
    /// The harness could not run the test.
    /// 框架无法运行该测试。
    Error,
    /// Never started because the run was cancelled.
    /// 由于运行被取消而从未开始。
    Cancel,
    /// Started, then stopped by a signal or the case timeout.
    /// 已开始，随后被信号或用例超时中断。
    Interrupt,
}

impl Status {
    pub const ALL: [Status; 7] = [
        Status::Pass,
        Status::Warn,
        Status::Skip,
        Status::Fail,
        Status::Error,
        Status::Cancel,
        Status::Interrupt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pass => "PASS",
            Status::Warn => "WARN",
            Status::Skip => "SKIP",
            Status::Fail => "FAIL",
            Status::Error => "ERROR",
            Status::Cancel => "CANCEL",
            Status::Interrupt => "INTERRUPT",
        }
    }

    /// Statuses that make the overall run unsuccessful.
    pub fn is_failure(&self) -> bool {
        matches!(self, Status::Fail | Status::Error | Status::Interrupt)
    }

    /// Gets the appropriate CSS class for the status.
    pub fn css_class(&self) -> &'static str {
        match self {
            Status::Pass => "status-Passed",
            Status::Warn => "status-Warn",
            Status::Skip | Status::Cancel => "status-Skipped",
            Status::Fail => "status-Failed",
            Status::Error => "status-Error",
            Status::Interrupt => "status-Timeout",
        }
    }

    /// Localized label for display. / 用于显示的本地化标签。
    pub fn label(&self, locale: &str) -> String {
        match self {
            Status::Pass => t!("report.status_pass", locale = locale),
            Status::Warn => t!("report.status_warn", locale = locale),
            Status::Skip => t!("report.status_skip", locale = locale),
            Status::Fail => t!("report.status_fail", locale = locale),
            Status::Error => t!("report.status_error", locale = locale),
            Status::Cancel => t!("report.status_cancel", locale = locale),
            Status::Interrupt => t!("report.status_interrupt", locale = locale),
        }
        .to_string()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| HarnessError::InvalidStatus(s.to_string()))
    }
}

/// The stages every test case moves through.
/// 每个测试用例经历的阶段。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Setup,
    Act,
    Wait,
    Verify,
    Teardown,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Setup => "setup",
            Stage::Act => "act",
            Stage::Wait => "wait",
            Stage::Verify => "verify",
            Stage::Teardown => "teardown",
        };
        f.write_str(name)
    }
}

/// Represents the final result of a single test case execution.
///
/// 表示单个测试用例执行的最终结果。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// The test case name / 测试用例名称
    pub name: String,
    pub status: Status,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Wall-clock seconds between start and end / 开始与结束之间的挂钟秒数
    pub duration_secs: f64,
    /// The stage that decided a non-passing status / 决定非通过状态的阶段
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub teardown_errors: Vec<String>,
    /// Collected step output / 收集的步骤输出
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
}

impl TestResult {
    pub fn new(
        name: impl Into<String>,
        status: Status,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Self {
        let elapsed = (ended_at - started_at).to_std().unwrap_or_default();
        Self {
            name: name.into(),
            status,
            started_at,
            ended_at,
            duration_secs: elapsed.as_secs_f64(),
            stage: None,
            message: None,
            warnings: Vec::new(),
            teardown_errors: Vec::new(),
            output: String::new(),
        }
    }

    /// A result for a case that never ran. / 从未运行的用例结果。
    pub fn not_run(name: impl Into<String>, status: Status, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        let mut result = Self::new(name, status, now, now);
        result.message = Some(reason.into());
        result
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs.max(0.0))
    }

    pub fn is_failure(&self) -> bool {
        self.status.is_failure()
    }
}

/// Counts of results by status. / 按状态统计的结果数量。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub total: usize,
    pub by_status: BTreeMap<Status, usize>,
}

impl Totals {
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a TestResult>) -> Self {
        let mut totals = Totals::default();
        for result in results {
            totals.total += 1;
            *totals.by_status.entry(result.status).or_insert(0) += 1;
        }
        totals
    }

    pub fn count(&self, status: Status) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }

    pub fn failures(&self) -> usize {
        Status::ALL
            .iter()
            .filter(|s| s.is_failure())
            .map(|s| self.count(*s))
            .sum()
    }

    pub fn all_passed(&self) -> bool {
        self.failures() == 0
    }
}
