//! # Results Collector Module / 结果收集模块
//!
//! Collects per-case results while a run progresses, aggregates them into
//! totals and renders them to the report format chosen by the file
//! extension of the output path.
//!
//! 在运行过程中收集每个用例的结果，将其汇总为统计数据，
//! 并根据输出路径的文件扩展名渲染为对应的报告格式。

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::core::errors::HarnessError;
use crate::core::models::{Status, TestResult, Totals};
use crate::reporting::{html, junit};

/// A finished run as written to and read back from disk.
/// 写入磁盘并可重新读取的完整运行结果。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Results {
    pub generated_at: DateTime<Utc>,
    pub totals: Totals,
    pub results: Vec<TestResult>,
}

impl Results {
    pub fn new(results: Vec<TestResult>) -> Self {
        Self {
            generated_at: Utc::now(),
            totals: Totals::from_results(&results),
            results,
        }
    }

    /// Re-parses a YAML or JSON results file.
    /// 重新解析 YAML 或 JSON 结果文件。
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read results file at {}", path.display()))?;
        let results = match ReportFormat::from_path(path)? {
            ReportFormat::Yaml => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML results from {}", path.display()))?,
            ReportFormat::Json => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON results from {}", path.display()))?,
            other => bail!("Cannot load results from a {other:?} report: {}", path.display()),
        };
        Ok(results)
    }

    /// Writes the results in the format matching the extension of `path`.
    pub fn render(&self, path: &Path, locale: &str) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create report directory {}", parent.display()))?;
        }
        let content = match ReportFormat::from_path(path)? {
            ReportFormat::Yaml => serde_yaml::to_string(self)?,
            ReportFormat::Json => serde_json::to_string_pretty(self)?,
            ReportFormat::JUnit => junit::render(self),
            ReportFormat::Html => html::render(self, locale),
        };
        fs::write(path, content)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        Ok(())
    }
}

/// Output formats recognised by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Yaml,
    Json,
    JUnit,
    Html,
}

impl ReportFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "yaml" | "yml" => Ok(ReportFormat::Yaml),
            "json" => Ok(ReportFormat::Json),
            "xml" => Ok(ReportFormat::JUnit),
            "html" | "htm" => Ok(ReportFormat::Html),
            _ => bail!(
                "Unsupported report extension for {} (expected .yaml, .json, .xml or .html)",
                path.display()
            ),
        }
    }
}

/// Gathers results in the order cases finish.
/// 按用例完成的顺序收集结果。
#[derive(Debug, Default)]
pub struct ResultsCollector {
    started: BTreeMap<String, DateTime<Utc>>,
    results: Vec<TestResult>,
}

impl ResultsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a case as started now.
    pub fn start(&mut self, name: impl Into<String>) {
        self.started.insert(name.into(), Utc::now());
    }

    /// Ends a started case with a status given as text.
    ///
    /// Only the closed set of status names is accepted.
    pub fn end(&mut self, name: &str, status: &str) -> Result<&TestResult, HarnessError> {
        let status: Status = status.parse()?;
        self.end_with(name, status)
    }

    pub fn end_with(&mut self, name: &str, status: Status) -> Result<&TestResult, HarnessError> {
        let started_at = self
            .started
            .remove(name)
            .ok_or(HarnessError::NotStarted("test case"))?;
        let result = TestResult::new(name, status, started_at, Utc::now());
        Ok(self.record(result))
    }

    /// Adds a fully built result, e.g. one returned by `run_test_case`.
    pub fn record(&mut self, result: TestResult) -> &TestResult {
        self.started.remove(&result.name);
        self.results.push(result);
        // Just pushed.
        &self.results[self.results.len() - 1]
    }

    pub fn results(&self) -> &[TestResult] {
        &self.results
    }

    /// Names of cases started but never ended.
    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.started.keys().map(String::as_str)
    }

    pub fn aggregate(&self) -> Totals {
        Totals::from_results(&self.results)
    }

    pub fn snapshot(&self) -> Results {
        Results::new(self.results.clone())
    }

    pub fn into_results(self) -> Results {
        Results::new(self.results)
    }

    pub fn render(&self, path: &Path, locale: &str) -> Result<()> {
        self.snapshot().render(path, locale)
    }
}
