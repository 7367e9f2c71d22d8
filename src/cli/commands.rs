//! Subcommands of the `ftest-runner` binary.
//! `ftest-runner` 二进制的子命令。

pub mod init;
pub mod pcmd;
pub mod report;
pub mod run;
