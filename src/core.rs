//! # Core Module / 核心模块
//!
//! This module contains the core functionality of the harness: the error
//! taxonomy and data models, command building, the process manager, bounded
//! polling, the case orchestrator, the test plan and its execution.
//!
//! 此模块包含框架的核心功能：错误分类和数据模型、命令构建、进程管理器、
//! 有界轮询、用例编排器、测试计划及其执行。

pub mod command;
pub mod config;
pub mod errors;
pub mod execution;
pub mod models;
pub mod orchestrator;
pub mod planner;
pub mod poller;
pub mod process_manager;

// Re-exports
pub use config::TestPlan;
pub use errors::HarnessError;
pub use execution::run_test_case;
pub use models::{Status, TestResult};
