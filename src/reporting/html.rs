//! # HTML Reporting Module / HTML 报告模块
//!
//! This module handles the generation of HTML test reports.
//! It creates styled HTML files with run totals, a detailed results table,
//! and a toggle for viewing the message and output of each non-passing case.
//!
//! 此模块处理 HTML 测试报告的生成。
//! 它创建带有运行统计、详细结果表格以及查看每个未通过用例消息和输出功能的样式化 HTML 文件。

use maud::{DOCTYPE, Markup, PreEscaped, html};

use crate::core::models::{Status, TestResult};
use crate::infra::t;
use crate::reporting::collector::Results;

/// Embedded CSS styles for HTML reports / HTML 报告的嵌入式 CSS 样式
const HTML_STYLE: &str = r#"
body { font-family: -apple-system, "Segoe UI", Helvetica, Arial, sans-serif; margin: 2em; color: #24292e; }
h1 { font-weight: 600; }
.summary-container { display: flex; gap: 1.5em; margin-bottom: 1.5em; }
.summary-item { display: flex; flex-direction: column; align-items: center; padding: 0.8em 1.4em; border: 1px solid #e1e4e8; border-radius: 6px; }
.summary-item .count { font-size: 1.8em; font-weight: 600; }
.summary-item .label { color: #586069; }
.passed-text { color: #22863a; }
.failed-text { color: #cb2431; }
.skipped-text { color: #6a737d; }
table { border-collapse: collapse; width: 100%; }
th, td { border-bottom: 1px solid #e1e4e8; padding: 0.5em; text-align: left; vertical-align: top; }
.duration-cell, .stage-cell { white-space: nowrap; }
.status-cell { display: inline-block; padding: 0.15em 0.6em; border-radius: 4px; color: #fff; font-weight: 600; }
.status-Passed { background: #28a745; }
.status-Warn { background: #dbab09; }
.status-Skipped { background: #6a737d; }
.status-Failed { background: #cb2431; }
.status-Error { background: #b31d28; }
.status-Timeout { background: #e36209; }
.output-toggle { cursor: pointer; color: #0366d6; font-size: 0.85em; margin-top: 0.3em; }
.output-content { background: #f6f8fa; padding: 1em; overflow-x: auto; white-space: pre-wrap; }
"#;

/// Embedded JavaScript for HTML report interactivity / HTML 报告交互性的嵌入式 JavaScript
const HTML_SCRIPT: &str = r#"
function toggleOutput(id) {
  var row = document.getElementById(id);
  row.style.display = row.style.display === 'none' ? 'table-row' : 'none';
}
"#;

/// Renders a complete HTML report for a run.
///
/// 为一次运行渲染完整的 HTML 报告。
///
/// # Arguments / 参数
/// * `results` - The run to render / 要渲染的运行结果
/// * `locale` - The locale to use for internationalization
///              用于国际化使用的语言环境
pub fn render(results: &Results, locale: &str) -> String {
    let totals = &results.totals;
    let skipped = totals.count(Status::Skip) + totals.count(Status::Cancel);
    let markup = html! {
        (DOCTYPE)
        html {
            head {
                meta charset="utf-8";
                title { (t!("html_report.title", locale = locale).to_string()) }
                style { (PreEscaped(HTML_STYLE)) }
            }
            body {
                h1 { (t!("html_report.main_header", locale = locale).to_string()) }
                p { (t!("html_report.generated_at", locale = locale, time = results.generated_at.to_rfc3339()).to_string()) }
                div.summary-container {
                    (summary_item(totals.total, "", &t!("html_report.summary.total", locale = locale)))
                    (summary_item(totals.count(Status::Pass) + totals.count(Status::Warn), "passed-text",
                        &t!("html_report.summary.passed", locale = locale)))
                    (summary_item(totals.failures(), "failed-text", &t!("html_report.summary.failed", locale = locale)))
                    (summary_item(skipped, "skipped-text", &t!("html_report.summary.skipped", locale = locale)))
                }
                table {
                    thead {
                        tr {
                            th { (t!("html_report.table.header.name", locale = locale).to_string()) }
                            th.status-col { (t!("html_report.table.header.status", locale = locale).to_string()) }
                            th.stage-cell { (t!("html_report.table.header.stage", locale = locale).to_string()) }
                            th.duration-cell { (t!("html_report.table.header.duration", locale = locale).to_string()) }
                            th { (t!("html_report.table.header.message", locale = locale).to_string()) }
                        }
                    }
                    tbody {
                        @for (i, result) in results.results.iter().enumerate() {
                            (result_rows(i, result, locale))
                        }
                    }
                }
                script { (PreEscaped(HTML_SCRIPT)) }
            }
        }
    };
    markup.into_string()
}

fn summary_item(count: usize, class: &str, label: &str) -> Markup {
    html! {
        div.summary-item {
            span class=(format!("count {class}")) { (count) }
            span.label { (label) }
        }
    }
}

fn result_rows(index: usize, result: &TestResult, locale: &str) -> Markup {
    let output_id = format!("output-{index}");
    let details = details_text(result);
    html! {
        tr {
            td { (result.name) }
            td.status-col {
                div class=(format!("status-cell {}", result.status.css_class())) { (result.status.label(locale)) }
                @if !details.is_empty() {
                    div.output-toggle onclick=(format!("toggleOutput('{output_id}')")) {
                        (t!("html_report.toggle_output", locale = locale).to_string())
                    }
                }
            }
            td.stage-cell { (result.stage.map(|s| s.to_string()).unwrap_or_default()) }
            td.duration-cell { (format!("{:.2}s", result.duration_secs)) }
            td { (result.message.as_deref().unwrap_or_default()) }
        }
        @if !details.is_empty() {
            tr id=(output_id) style="display:none;" {
                td colspan="5" { pre.output-content { (details) } }
            }
        }
    }
}

/// Warnings, teardown errors and captured output of a case, one block each.
fn details_text(result: &TestResult) -> String {
    let mut blocks = Vec::new();
    if !result.warnings.is_empty() {
        blocks.push(
            result
                .warnings
                .iter()
                .map(|w| format!("WARNING: {w}"))
                .collect::<Vec<_>>()
                .join("\n"),
        );
    }
    if !result.teardown_errors.is_empty() {
        blocks.push(
            result
                .teardown_errors
                .iter()
                .map(|e| format!("TEARDOWN: {e}"))
                .collect::<Vec<_>>()
                .join("\n"),
        );
    }
    if !result.output.is_empty() {
        blocks.push(result.output.clone());
    }
    blocks.join("\n\n")
}
