//! # Parallel Command Module / 并行命令模块
//!
//! `pcmd` runs one command on every host of a host set and prints the hosts
//! grouped by exit status, with their collated output.
//!
//! `pcmd` 在主机集合的每台主机上运行一条命令，并按退出状态分组打印主机及其整理后的输出。

use anyhow::{Context, Result};
use colored::*;
use std::time::Duration;

use crate::infra::hosts::HostSet;
use crate::infra::remote::{RemoteExecutor, RunOptions, SshTransport};
use crate::infra::t;

/// Arguments of `ftest-runner pcmd`.
#[derive(Debug, Clone)]
pub struct PcmdArgs {
    pub hosts: String,
    pub command: String,
    /// Run every host as a local shell instead of over ssh.
    pub local: bool,
    pub user: Option<String>,
    pub timeout_secs: Option<u64>,
    pub expect_rc: i32,
}

pub async fn execute(args: PcmdArgs, locale: &str) -> Result<()> {
    let hosts = HostSet::parse(&args.hosts)
        .with_context(|| t!("pcmd.invalid_hosts", locale = locale, hosts = &args.hosts).to_string())?;
    let executor = if args.local {
        RemoteExecutor::local()
    } else {
        RemoteExecutor::ssh(SshTransport {
            user: args.user.clone(),
            ..SshTransport::default()
        })
    };
    let mut options = RunOptions::default().expect(args.expect_rc);
    if let Some(secs) = args.timeout_secs {
        options = options.with_timeout(Duration::from_secs(secs));
    }

    let result = executor.run(&hosts, &args.command, &options).await?;
    print!("{}", result.collate());

    for (rc, group) in result.exit_codes() {
        let line = t!("pcmd.exit_group", locale = locale, rc = rc, hosts = group);
        if rc == args.expect_rc {
            println!("{}", line.green());
        } else {
            println!("{}", line.red());
        }
    }
    let timed_out = result.timed_out_hosts();
    if !timed_out.is_empty() {
        println!("{}", t!("pcmd.timed_out", locale = locale, hosts = timed_out).yellow());
    }

    match result.failure() {
        Some(failure) => anyhow::bail!("{failure}"),
        None => Ok(()),
    }
}
