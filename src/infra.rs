//! # Infrastructure Module / 基础设施模块
//!
//! This module provides infrastructure services for the harness, including
//! host sets, process spawning, remote fan-out execution, file system
//! operations, logging and i18n support.
//!
//! 此模块为框架提供基础设施服务，
//! 包括主机集合、进程派生、远程扇出执行、文件系统操作、日志和国际化支持。

pub mod command;
pub mod fs;
pub mod hosts;
pub mod logging;
pub mod remote;

// Re-export i18n functions for easier access
pub use rust_i18n::t;
