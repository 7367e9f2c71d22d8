//! # JUnit Reporting Module / JUnit 报告模块
//!
//! Renders results as JUnit XML for CI systems. `FAIL` maps to `<failure>`,
//! `ERROR` and `INTERRUPT` to `<error>`, `SKIP` and `CANCEL` to `<skipped>`.
//!
//! 将结果渲染为供 CI 系统使用的 JUnit XML。

use maud::{Markup, PreEscaped, html};

use crate::core::models::{Status, TestResult};
use crate::reporting::collector::Results;

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;
const SUITE_NAME: &str = "ftest";

pub fn render(results: &Results) -> String {
    let totals = &results.totals;
    let errors = totals.count(Status::Error) + totals.count(Status::Interrupt);
    let skipped = totals.count(Status::Skip) + totals.count(Status::Cancel);
    let time: f64 = results.results.iter().map(|r| r.duration_secs).sum();
    let markup = html! {
        (PreEscaped(XML_DECLARATION))
        testsuites name=(SUITE_NAME) tests=(totals.total) failures=(totals.count(Status::Fail))
            errors=(errors) skipped=(skipped) time=(format!("{time:.3}")) {
            testsuite name=(SUITE_NAME) tests=(totals.total) failures=(totals.count(Status::Fail))
                errors=(errors) skipped=(skipped) time=(format!("{time:.3}"))
                timestamp=(results.generated_at.to_rfc3339()) {
                @for result in &results.results {
                    (testcase(result))
                }
            }
        }
    };
    markup.into_string()
}

fn testcase(result: &TestResult) -> Markup {
    let message = result.message.clone().unwrap_or_default();
    let kind = match result.stage {
        Some(stage) => format!("{}:{stage}", result.status),
        None => result.status.to_string(),
    };
    html! {
        testcase name=(result.name) classname=(SUITE_NAME) time=(format!("{:.3}", result.duration_secs)) {
            @match result.status {
                Status::Fail => {
                    failure message=(message) type=(kind) { (details(result)) }
                }
                Status::Error | Status::Interrupt => {
                    error message=(message) type=(kind) { (details(result)) }
                }
                Status::Skip | Status::Cancel => {
                    skipped message=(message) {}
                }
                Status::Pass | Status::Warn => {}
            }
            @if !result.warnings.is_empty() || !result.output.is_empty() {
                system-out {
                    @for warning in &result.warnings {
                        "WARNING: " (warning) "\n"
                    }
                    (result.output)
                }
            }
        }
    }
}

fn details(result: &TestResult) -> String {
    let mut text = result.message.clone().unwrap_or_default();
    for err in &result.teardown_errors {
        text.push_str("\nteardown: ");
        text.push_str(err);
    }
    text
}
