//! # Error Taxonomy Module / 错误分类模块
//!
//! Every failure the harness can observe is one of these variants. The split
//! between infrastructure errors and assertion failures is what lets a report
//! tell "the system under test misbehaved" apart from "the harness could not
//! run the test".
//!
//! 框架能观察到的每一种失败都是以下变体之一。基础设施错误与断言失败的区分，
//! 使报告能够区分"被测系统行为异常"和"框架无法运行测试"。

use std::time::Duration;
use thiserror::Error;

use crate::core::models::Status;
use crate::infra::hosts::HostSet;

/// Broad classification used when mapping an error onto a report status.
/// 将错误映射为报告状态时使用的大类。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The harness itself could not proceed. / 框架自身无法继续。
    Infrastructure,
    /// A verification expectation was not met. / 验证预期未满足。
    Assertion,
    /// The run was cancelled from outside. / 运行被外部取消。
    Cancelled,
}

/// Details of a command that ran but did not return the expected exit status
/// on every host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommandFailure {
    pub command: String,
    pub expected: i32,
    /// Every observed exit status with the hosts that returned it.
    pub exit_codes: Vec<(i32, HostSet)>,
    /// Hosts outside the majority exit-status group.
    pub dissenting: HostSet,
    /// Hosts that hit the timeout sentinel.
    pub timed_out: HostSet,
}

impl std::fmt::Display for RemoteCommandFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let groups: Vec<String> = self
            .exit_codes
            .iter()
            .map(|(rc, hosts)| format!("rc={rc}: {hosts}"))
            .collect();
        write!(
            f,
            "'{}' expected rc={} [{}]",
            self.command,
            self.expected,
            groups.join("; ")
        )?;
        if !self.dissenting.is_empty() {
            write!(f, " dissenting: {}", self.dissenting)?;
        }
        if !self.timed_out.is_empty() {
            write!(f, " timed out: {}", self.timed_out)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("unable to reach {hosts}: {detail}")]
    Connection { hosts: HostSet, detail: String },

    #[error("remote command failed: {0}")]
    RemoteCommand(RemoteCommandFailure),

    #[error(
        "condition not met: {description} after {attempts} attempt(s) in {elapsed:.2?}; last observed: {last_observed}"
    )]
    ConditionTimeout {
        description: String,
        attempts: u32,
        elapsed: Duration,
        last_observed: String,
    },

    #[error("{} worker(s) failed: {}", .failures.len(), format_failures(.failures))]
    ProcessWorkers { failures: Vec<(String, String)> },

    #[error("assertion failed in '{step}': expected {expected}, observed {observed}")]
    Assertion {
        step: String,
        expected: String,
        observed: String,
    },

    #[error("invalid template '{template}' for parameter '{name}': {reason}")]
    Template {
        name: String,
        template: String,
        reason: String,
    },

    #[error("{tool} reported an error: {message}")]
    Tool { tool: String, message: String },

    #[error("unable to parse {what}: {detail}")]
    Parse { what: String, detail: String },

    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("unrecognized status '{0}'")]
    InvalidStatus(String),

    #[error("{0} was already started")]
    AlreadyStarted(&'static str),

    #[error("{0} was not started")]
    NotStarted(&'static str),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn format_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(name, err)| format!("{name}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl HarnessError {
    pub fn class(&self) -> ErrorClass {
        match self {
            HarnessError::Assertion { .. } => ErrorClass::Assertion,
            HarnessError::Cancelled => ErrorClass::Cancelled,
            _ => ErrorClass::Infrastructure,
        }
    }

    /// The report status this error maps to when it ends a test case.
    /// 当此错误终止测试用例时映射到的报告状态。
    pub fn status(&self) -> Status {
        match self.class() {
            ErrorClass::Assertion => Status::Fail,
            ErrorClass::Cancelled => Status::Interrupt,
            ErrorClass::Infrastructure => Status::Error,
        }
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, HarnessError::Connection { .. })
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            HarnessError::ConditionTimeout { .. } => true,
            HarnessError::RemoteCommand(failure) => !failure.timed_out.is_empty(),
            _ => false,
        }
    }

    pub fn assertion(
        step: impl Into<String>,
        expected: impl Into<String>,
        observed: impl Into<String>,
    ) -> Self {
        HarnessError::Assertion {
            step: step.into(),
            expected: expected.into(),
            observed: observed.into(),
        }
    }
}
