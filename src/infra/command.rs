//! # Process Spawning Module / 进程派生模块
//!
//! Spawns a child process and captures its output streams concurrently,
//! optionally bounded by a timeout. Every child is created with
//! `kill_on_drop(true)` so no process outlives the handle that owns it.
//!
//! 派生子进程并并发捕获其输出流，可选地受超时限制。
//! 每个子进程都以 `kill_on_drop(true)` 创建，确保没有进程比拥有它的句柄存活更久。

use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Exit status reported for a process that was stopped because it ran past its
/// timeout. Matches the value parallel shells use for interrupted hosts.
///
/// 因超时而被终止的进程所报告的退出状态。与并行 shell 对被中断主机使用的值一致。
pub const TIMEOUT_EXIT_STATUS: i32 = 255;

/// How long to keep draining pipes after a timed-out child was killed.
/// Grandchildren may hold the pipes open.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// The captured outcome of one child process.
/// 一个子进程的捕获结果。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
    /// `true` when the process was killed for exceeding its timeout.
    /// 当进程因超时被终止时为 `true`。
    pub interrupted: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0 && !self.interrupted
    }

    /// stdout followed by stderr, the way a terminal would have shown them.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }

    pub fn stdout_lines(&self) -> Vec<String> {
        self.stdout.lines().map(str::to_string).collect()
    }
}

/// Spawns a command and captures stdout and stderr.
/// The output streams are read concurrently while the process runs.
///
/// # Arguments
/// * `cmd` - The `tokio::process::Command` to execute.
/// * `timeout` - Optional limit; on expiry the child is killed and the result
///   carries [`TIMEOUT_EXIT_STATUS`] with `interrupted` set.
///
/// 派生一个命令，捕获其 stdout 和 stderr。进程运行时并发读取输出流。
pub async fn capture(
    mut cmd: tokio::process::Command,
    timeout: Option<Duration>,
) -> std::io::Result<CommandOutput> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("failed to capture stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("failed to capture stderr"))?;

    let stdout_handle = tokio::spawn(read_stream(stdout));
    let stderr_handle = tokio::spawn(read_stream(stderr));

    let (exit_status, interrupted) = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => (exit_code(status?), false),
            Err(_) => {
                warn!(timeout = ?limit, "process exceeded its timeout, killing it");
                child.kill().await?;
                (TIMEOUT_EXIT_STATUS, true)
            }
        },
        None => (exit_code(child.wait().await?), false),
    };

    let grace = if interrupted { Some(DRAIN_GRACE) } else { None };
    let stdout = join_reader(stdout_handle, grace).await;
    let stderr = join_reader(stderr_handle, grace).await;

    debug!(exit_status, interrupted, "process finished");
    Ok(CommandOutput {
        exit_status,
        stdout,
        stderr,
        interrupted,
    })
}

/// Builds a `sh -c` command for a shell snippet.
pub fn shell(script: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c").arg(script);
    cmd
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    match status.code() {
        Some(code) => code,
        // Terminated by a signal; report it the way shells do.
        None => {
            #[cfg(unix)]
            {
                use std::os::unix::process::ExitStatusExt;
                128 + status.signal().unwrap_or(0)
            }
            #[cfg(not(unix))]
            {
                -1
            }
        }
    }
}

async fn read_stream<R: AsyncRead + Unpin>(stream: R) -> String {
    let mut lines = BufReader::new(stream).lines();
    let mut output = String::new();
    while let Ok(Some(line)) = lines.next_line().await {
        output.push_str(&line);
        output.push('\n');
    }
    output
}

async fn join_reader(handle: JoinHandle<String>, grace: Option<Duration>) -> String {
    match grace {
        Some(limit) => {
            let abort = handle.abort_handle();
            match tokio::time::timeout(limit, handle).await {
                Ok(joined) => joined.unwrap_or_default(),
                Err(_) => {
                    abort.abort();
                    String::new()
                }
            }
        }
        None => handle.await.unwrap_or_else(|e| {
            warn!("failed to join output reader: {e}");
            String::new()
        }),
    }
}
