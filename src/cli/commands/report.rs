//! # Report Command Module / 报告命令模块
//!
//! Re-renders a YAML or JSON results file written by `run` as HTML or JUnit
//! XML and prints its console summary.
//!
//! 将 `run` 写入的 YAML 或 JSON 结果文件重新渲染为 HTML 或 JUnit XML，
//! 并打印其控制台摘要。

use anyhow::{Context, Result};
use colored::*;
use std::path::Path;

use crate::infra::t;
use crate::reporting::{Results, print_summary};

pub fn execute(input: &Path, html: Option<&Path>, junit: Option<&Path>, locale: &str) -> Result<()> {
    let results = Results::load(input)
        .with_context(|| t!("report_load_failed", locale = locale, path = input.display()).to_string())?;

    print_summary(&results.results, locale);

    if html.is_none() && junit.is_none() {
        println!("\n{}", t!("report_nothing_to_write", locale = locale).yellow());
    }
    for output in [html, junit].into_iter().flatten() {
        println!("{}", t!("writing_report", locale = locale, path = output.display()));
        results.render(output, locale)?;
    }
    Ok(())
}
