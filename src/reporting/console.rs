//! # Console Reporting Module / 控制台报告模块
//!
//! This module prints the end-of-run summary to the console: one row per
//! case, the totals by status, and the details of every failed case, with
//! internationalization support.
//!
//! 此模块在控制台打印运行结束时的摘要：每个用例一行、按状态统计的总数，
//! 以及每个失败用例的详细信息，支持国际化。

use colored::*;

use crate::core::models::{Status, TestResult, Totals};
use crate::infra::t;

/// Applies the console color of a status to its label.
pub fn colorize(status: Status, label: &str) -> ColoredString {
    match status {
        Status::Pass => label.green(),
        Status::Warn => label.yellow(),
        Status::Skip | Status::Cancel => label.dimmed(),
        Status::Fail | Status::Error => label.red(),
        Status::Interrupt => label.magenta(),
    }
}

/// Prints a formatted summary of test results to the console.
///
/// 在控制台打印格式化的测试结果摘要。
///
/// # Output Format / 输出格式
/// ```text
/// --- Test Summary ---
///   - PASS       | pool_create                             |      1.23s
///   - FAIL       | rebuild_with_rank_down                  |     41.02s  verify
/// ```
pub fn print_summary(results: &[TestResult], locale: &str) {
    println!("\n{}", t!("test_summary_banner", locale = locale).bold());

    for result in results {
        let status = colorize(result.status, &result.status.label(locale));
        let duration = format!("{:.2}s", result.duration_secs);
        let stage = result.stage.map(|s| s.to_string()).unwrap_or_default();
        println!(
            "  - {:<10} | {:<40} | {:>10}  {}",
            status, result.name, duration, stage
        );
    }

    print_totals(&Totals::from_results(results), locale);
}

/// Prints one `label: count` pair per status present in the run.
pub fn print_totals(totals: &Totals, locale: &str) {
    let parts: Vec<String> = Status::ALL
        .iter()
        .filter(|s| totals.count(**s) > 0)
        .map(|s| {
            colorize(*s, &format!("{}: {}", s.label(locale), totals.count(*s))).to_string()
        })
        .collect();
    println!(
        "\n{} {}",
        t!("summary.total", locale = locale, count = totals.total).bold(),
        parts.join(", ")
    );
}

/// Prints the message, teardown errors and captured output of every failed case.
///
/// 打印每个失败用例的消息、清理错误和捕获的输出。
pub fn print_failure_details(results: &[TestResult], locale: &str) {
    let failures: Vec<&TestResult> = results.iter().filter(|r| r.is_failure()).collect();
    if failures.is_empty() {
        return;
    }

    println!("\n{}", t!("failure_banner", locale = locale).red().bold());
    println!("{}", "-".repeat(80));

    for (i, result) in failures.iter().enumerate() {
        let stage = result
            .stage
            .map(|s| format!(" ({s})"))
            .unwrap_or_default();
        println!(
            "[{}/{}] {} '{}'{}",
            i + 1,
            failures.len(),
            t!("report_header_failure", locale = locale).red(),
            result.name.cyan(),
            stage
        );
        if let Some(message) = result.message.as_deref().filter(|m| !m.is_empty()) {
            println!("  {message}");
        }
        for err in &result.teardown_errors {
            println!("  {} {}", t!("teardown_error", locale = locale).yellow(), err);
        }
        if !result.output.is_empty() {
            println!("\n--- {} ---\n", t!("test_log", locale = locale).yellow());
            println!("{}", result.output);
        }
        println!("\n{}", "-".repeat(80));
    }
}
