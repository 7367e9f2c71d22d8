//! # Process Manager Module / 进程管理模块
//!
//! Runs a batch of named jobs concurrently and gathers exactly one result per
//! job from a single shared channel. A job can be an async task, a blocking
//! closure on a dedicated OS thread, or a separate child process. Errors and
//! panics inside a job become failure results instead of tearing the batch
//! down, and a worker that disappears without reporting is detected when the
//! channel closes.
//!
//! 并发运行一批命名作业，并从单个共享通道中为每个作业收集恰好一个结果。
//! 作业可以是异步任务、专用操作系统线程上的阻塞闭包或独立子进程。
//! 作业中的错误和 panic 会变成失败结果，而不会拆毁整个批次；
//! 未报告就消失的工作者会在通道关闭时被检测到。

use futures::FutureExt;
use futures::future::BoxFuture;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::errors::{HarnessError, RemoteCommandFailure};
use crate::infra::command::{self, CommandOutput};
use crate::infra::hosts::HostSet;

type JobResult<T> = Result<T, HarnessError>;

/// A unit of work with its concurrency mechanism.
/// 带有并发机制的工作单元。
pub enum Job<T> {
    Task(BoxFuture<'static, JobResult<T>>),
    Thread(Box<dyn FnOnce() -> JobResult<T> + Send + 'static>),
}

impl<T> Job<T> {
    /// Runs `future` as a tokio task.
    pub fn task<F>(future: F) -> Self
    where
        F: Future<Output = JobResult<T>> + Send + 'static,
    {
        Job::Task(Box::pin(future))
    }

    /// Runs `f` on its own OS thread.
    pub fn thread<F>(f: F) -> Self
    where
        F: FnOnce() -> JobResult<T> + Send + 'static,
    {
        Job::Thread(Box::new(f))
    }
}

impl Job<CommandOutput> {
    /// Runs `cmd` as a separate child process. A non-zero exit status is a
    /// failure of the job.
    pub fn process(cmd: tokio::process::Command, timeout: Option<Duration>) -> Self {
        let program = format!("{:?}", cmd.as_std());
        Job::task(async move {
            let output = command::capture(cmd, timeout).await?;
            if output.success() {
                Ok(output)
            } else {
                Err(HarnessError::RemoteCommand(RemoteCommandFailure {
                    command: program,
                    expected: 0,
                    exit_codes: vec![(output.exit_status, HostSet::from_iter(["localhost"]))],
                    dissenting: HostSet::new(),
                    timed_out: if output.interrupted {
                        HostSet::from_iter(["localhost"])
                    } else {
                        HostSet::new()
                    },
                }))
            }
        })
    }
}

impl<T> fmt::Debug for Job<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::Task(_) => f.write_str("Job::Task"),
            Job::Thread(_) => f.write_str("Job::Thread"),
        }
    }
}

/// Identifies a registered job: its registration index and name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerId {
    pub index: usize,
    pub name: String,
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.index)
    }
}

/// The outcome one worker posted.
/// 一个工作者提交的结果。
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessResult<T> {
    pub name: String,
    pub error: Option<String>,
    pub result: Option<T>,
}

impl<T> ProcessResult<T> {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    fn from_outcome(name: String, outcome: Result<T, String>) -> Self {
        match outcome {
            Ok(value) => Self {
                name,
                error: None,
                result: Some(value),
            },
            Err(error) => Self {
                name,
                error: Some(error),
                result: None,
            },
        }
    }
}

/// One result per registered job, in registration order.
#[derive(Debug)]
pub struct ProcessResults<T> {
    results: BTreeMap<WorkerId, ProcessResult<T>>,
}

impl<T> ProcessResults<T> {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&WorkerId, &ProcessResult<T>)> {
        self.results.iter()
    }

    pub fn get(&self, name: &str) -> Option<&ProcessResult<T>> {
        self.results
            .iter()
            .find(|(id, _)| id.name == name)
            .map(|(_, r)| r)
    }

    pub fn failures(&self) -> Vec<(&WorkerId, &str)> {
        self.results
            .iter()
            .filter_map(|(id, r)| r.error.as_deref().map(|e| (id, e)))
            .collect()
    }

    /// The successful outputs in registration order, or every failure at once.
    /// 按注册顺序返回成功的输出，或一次性返回所有失败。
    pub fn into_outputs(self) -> Result<Vec<T>, HarnessError> {
        let mut outputs = Vec::with_capacity(self.results.len());
        let mut failures = Vec::new();
        for (id, result) in self.results {
            match (result.error, result.result) {
                (None, Some(value)) => outputs.push(value),
                (Some(error), _) => failures.push((id.to_string(), error)),
                (None, None) => failures.push((id.to_string(), "no result".to_string())),
            }
        }
        if failures.is_empty() {
            Ok(outputs)
        } else {
            Err(HarnessError::ProcessWorkers { failures })
        }
    }
}

type Message<T> = (WorkerId, Result<T, String>);

/// Launches registered jobs and collects their results.
/// 启动已注册的作业并收集其结果。
pub struct ProcessManager<T> {
    pending: Vec<(WorkerId, Job<T>)>,
    registered: Vec<WorkerId>,
    receiver: Option<mpsc::UnboundedReceiver<Message<T>>>,
    tasks: Vec<JoinHandle<()>>,
    started: bool,
}

impl<T> Default for ProcessManager<T> {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
            registered: Vec::new(),
            receiver: None,
            tasks: Vec::new(),
            started: false,
        }
    }
}

impl<T: Send + 'static> ProcessManager<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a job. Nothing runs until [`ProcessManager::start`].
    pub fn add(&mut self, name: impl Into<String>, job: Job<T>) -> Result<WorkerId, HarnessError> {
        if self.started {
            return Err(HarnessError::AlreadyStarted("process manager"));
        }
        let id = WorkerId {
            index: self.registered.len(),
            name: name.into(),
        };
        self.registered.push(id.clone());
        self.pending.push((id.clone(), job));
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.registered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }

    /// Launches every job in registration order. Task jobs need a running
    /// tokio runtime.
    pub fn start(&mut self) -> Result<(), HarnessError> {
        if self.started {
            return Err(HarnessError::AlreadyStarted("process manager"));
        }
        self.started = true;

        let (tx, rx) = mpsc::unbounded_channel::<Message<T>>();
        for (id, job) in self.pending.drain(..) {
            debug!(worker = %id, "starting job");
            let tx = tx.clone();
            match job {
                Job::Task(future) => {
                    self.tasks.push(tokio::spawn(async move {
                        let outcome = AssertUnwindSafe(future).catch_unwind().await;
                        let _ = tx.send((id, settle(outcome)));
                    }));
                }
                Job::Thread(f) => {
                    let thread_id = id.clone();
                    let thread_tx = tx.clone();
                    let spawned = std::thread::Builder::new()
                        .name(format!("job-{}", id.name))
                        .spawn(move || {
                            let outcome = panic::catch_unwind(AssertUnwindSafe(f));
                            let _ = thread_tx.send((thread_id, settle(outcome)));
                        });
                    if let Err(e) = spawned {
                        let _ = tx.send((id, Err(format!("failed to spawn thread: {e}"))));
                    }
                }
            }
        }
        self.receiver = Some(rx);
        Ok(())
    }

    /// Waits for one result per registered job.
    pub async fn collect(&mut self) -> Result<ProcessResults<T>, HarnessError> {
        self.collect_inner(None).await
    }

    /// Like [`ProcessManager::collect`], but jobs that have not reported
    /// within `limit` are aborted and reported as failures.
    pub async fn collect_within(&mut self, limit: Duration) -> Result<ProcessResults<T>, HarnessError> {
        self.collect_inner(Some(limit)).await
    }

    async fn collect_inner(&mut self, limit: Option<Duration>) -> Result<ProcessResults<T>, HarnessError> {
        let mut receiver = self
            .receiver
            .take()
            .ok_or(HarnessError::NotStarted("process manager"))?;
        let expected = self.registered.len();
        let mut results: BTreeMap<WorkerId, ProcessResult<T>> = BTreeMap::new();

        let receive_all = async {
            while results.len() < expected {
                match receiver.recv().await {
                    Some((id, outcome)) => {
                        results.insert(id.clone(), ProcessResult::from_outcome(id.name, outcome));
                    }
                    None => break,
                }
            }
        };
        let missing_reason = match limit {
            Some(limit) => match tokio::time::timeout(limit, receive_all).await {
                Ok(()) => "worker exited without reporting a result".to_string(),
                Err(_) => format!("worker did not report within {limit:?}"),
            },
            None => {
                receive_all.await;
                "worker exited without reporting a result".to_string()
            }
        };

        for id in &self.registered {
            if !results.contains_key(id) {
                warn!(worker = %id, "{missing_reason}");
                results.insert(
                    id.clone(),
                    ProcessResult::from_outcome(id.name.clone(), Err(missing_reason.clone())),
                );
            }
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        Ok(ProcessResults { results })
    }
}

impl<T> fmt::Debug for ProcessManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessManager")
            .field("registered", &self.registered)
            .field("started", &self.started)
            .finish()
    }
}

fn settle<T>(outcome: Result<JobResult<T>, Box<dyn Any + Send>>) -> Result<T, String> {
    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collects_every_kind_of_job() {
        let mut pm: ProcessManager<u32> = ProcessManager::new();
        pm.add("task", Job::task(async { Ok(1) })).unwrap();
        pm.add("thread", Job::thread(|| Ok(2))).unwrap();
        pm.start().unwrap();
        let results = pm.collect().await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results.into_outputs().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn panics_become_failures() {
        let mut pm: ProcessManager<u32> = ProcessManager::new();
        pm.add("ok", Job::task(async { Ok(7) })).unwrap();
        pm.add(
            "boom",
            Job::thread(|| {
                if true {
                    panic!("disk on fire");
                }
                Ok(0)
            }),
        )
        .unwrap();
        pm.add(
            "task-boom",
            Job::task(async {
                if true {
                    panic!("oops");
                }
                Ok(0)
            }),
        )
        .unwrap();
        pm.start().unwrap();
        let results = pm.collect().await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.get("ok").unwrap().is_ok());
        let boom = results.get("boom").unwrap();
        assert!(boom.error.as_deref().unwrap().contains("disk on fire"));
        match results.into_outputs() {
            Err(HarnessError::ProcessWorkers { failures }) => assert_eq!(failures.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let mut pm: ProcessManager<()> = ProcessManager::new();
        pm.start().unwrap();
        assert!(matches!(pm.start(), Err(HarnessError::AlreadyStarted(_))));
        assert!(pm.collect().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn collect_before_start_is_rejected() {
        let mut pm: ProcessManager<()> = ProcessManager::new();
        assert!(matches!(pm.collect().await, Err(HarnessError::NotStarted(_))));
    }

    #[tokio::test]
    async fn slow_workers_are_reported_after_the_limit() {
        let mut pm: ProcessManager<()> = ProcessManager::new();
        pm.add(
            "sleepy",
            Job::task(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            }),
        )
        .unwrap();
        pm.start().unwrap();
        let results = pm.collect_within(Duration::from_millis(50)).await.unwrap();
        let sleepy = results.get("sleepy").unwrap();
        assert!(sleepy.error.as_deref().unwrap().contains("did not report"));
    }
}
