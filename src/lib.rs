//! # ftest-runner Library / ftest-runner 库
//!
//! This library provides the core functionality for the ftest-runner tool,
//! a configuration-driven orchestration harness for distributed functional
//! tests: provision resources, launch workloads, inject faults, poll for
//! asynchronous state transitions, verify, tear down and report.
//!
//! 此库为 ftest-runner 工具提供核心功能，
//! 这是一个配置驱动的分布式功能测试编排框架：准备资源、启动负载、注入故障、
//! 轮询异步状态转换、验证、清理并生成报告。
//!
//! ## Modules / 模块
//!
//! - `core` - Error taxonomy, data models, command building, process manager, poller and orchestrator
//! - `infra` - Infrastructure services like host sets, remote execution and file system operations
//! - `tools` - Adapters for the CLI tools of the system under test (`dmg`, `ior`, `mdtest`, telemetry)
//! - `reporting` - Result collection and report rendering
//! - `cli` - Command-line interface and commands
//!
//! - `core` - 错误分类、数据模型、命令构建、进程管理器、轮询器和编排器
//! - `infra` - 基础设施服务，如主机集合、远程执行和文件系统操作
//! - `tools` - 被测系统命令行工具的适配器（`dmg`、`ior`、`mdtest`、遥测）
//! - `reporting` - 结果收集和报告渲染
//! - `cli` - 命令行接口和命令

pub mod cli;
pub mod core;
pub mod infra;
pub mod reporting;
pub mod tools;

// Re-export commonly used items
pub use core::config;
pub use core::execution;
pub use core::models;

/// Picks the best available locale for the system language.
///
/// Tries the full locale first (e.g., "zh-CN"), then just the language code
/// (e.g., "en"), and finally falls back to "en".
pub fn detect_locale() -> String {
    let locale = sys_locale::get_locale().unwrap_or_else(|| "en".to_string());
    let available_locales = rust_i18n::available_locales!();

    if available_locales.contains(&locale.as_str()) {
        return locale;
    }
    locale
        .split('-')
        .next()
        .and_then(|lang_code| available_locales.iter().find(|l| l.split('-').next() == Some(lang_code)))
        .map(|l| l.to_string())
        .unwrap_or_else(|| "en".to_string())
}

// Initialize i18n
rust_i18n::i18n!("locales", fallback = "en");
