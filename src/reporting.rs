//! # Reporting Module / 报告模块
//!
//! This module collects test results and renders them in multiple formats:
//! YAML and JSON result files that can be re-loaded, JUnit XML for CI,
//! styled HTML reports, and colorful console summaries with
//! internationalization support.
//!
//! 此模块收集测试结果并以多种格式渲染：可重新加载的 YAML 和 JSON 结果文件、
//! 供 CI 使用的 JUnit XML、样式化 HTML 报告，以及支持国际化的彩色控制台摘要。

pub mod collector;
pub mod console;
pub mod html;
pub mod junit;

// Re-export common reporting functions
pub use collector::{Results, ResultsCollector};
pub use console::{print_failure_details, print_summary};
