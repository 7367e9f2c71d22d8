//! # Process Manager Unit Tests / 进程管理器单元测试
//!
//! Every registered job reports exactly once, whatever it does: succeed,
//! fail, panic, block a thread or run as a child process.
//!
//! 每个注册的作业恰好报告一次，无论它成功、失败、panic、阻塞线程还是作为子进程运行。

use ftest_runner::core::errors::HarnessError;
use ftest_runner::core::process_manager::{Job, ProcessManager};
use proptest::prelude::*;
use std::time::Duration;

#[tokio::test]
async fn test_failing_job_does_not_hide_the_others() {
    let mut manager: ProcessManager<usize> = ProcessManager::new();
    for i in 1..=5 {
        manager
            .add(
                format!("job-{i}"),
                Job::task(async move {
                    tokio::time::sleep(Duration::from_millis(5 * (6 - i) as u64)).await;
                    if i == 3 {
                        Err(HarnessError::Config("disk full".into()))
                    } else {
                        Ok(i * 10)
                    }
                }),
            )
            .unwrap();
    }
    manager.start().unwrap();
    let results = manager.collect().await.unwrap();

    assert_eq!(results.len(), 5);
    let failures = results.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0.name, "job-3");
    assert!(failures[0].1.contains("disk full"));
    for i in [1, 2, 4, 5] {
        let result = results.get(&format!("job-{i}")).unwrap();
        assert!(result.is_ok());
        assert_eq!(result.result, Some(i * 10));
    }
}

#[tokio::test]
async fn test_panicking_task_and_thread_are_reported() {
    let mut manager: ProcessManager<&'static str> = ProcessManager::new();
    manager.add("fine", Job::task(async { Ok("ok") })).unwrap();
    manager
        .add(
            "task-panic",
            Job::task(async {
                if true {
                    panic!("pool create exploded");
                }
                Ok("unreachable")
            }),
        )
        .unwrap();
    manager
        .add(
            "thread-panic",
            Job::thread(|| {
                if true {
                    panic!("blocking worker died");
                }
                Ok("unreachable")
            }),
        )
        .unwrap();
    manager
        .add(
            "thread-ok",
            Job::thread(|| {
                std::thread::sleep(Duration::from_millis(10));
                Ok("done")
            }),
        )
        .unwrap();
    manager.start().unwrap();
    let results = manager.collect().await.unwrap();

    assert_eq!(results.len(), 4);
    let task_panic = results.get("task-panic").unwrap();
    assert!(task_panic.error.as_deref().unwrap().contains("pool create exploded"));
    let thread_panic = results.get("thread-panic").unwrap();
    assert!(thread_panic.error.as_deref().unwrap().contains("blocking worker died"));
    assert_eq!(results.get("thread-ok").unwrap().result, Some("done"));
    assert!(results.into_outputs().is_err());
}

#[tokio::test]
async fn test_outputs_keep_registration_order() {
    let mut manager: ProcessManager<u32> = ProcessManager::new();
    for (name, delay) in [("slow", 30u64), ("fast", 1), ("medium", 10)] {
        manager
            .add(
                name,
                Job::task(async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    Ok(delay as u32)
                }),
            )
            .unwrap();
    }
    manager.start().unwrap();
    let outputs = manager.collect().await.unwrap().into_outputs().unwrap();
    assert_eq!(outputs, vec![30, 1, 10]);
}

#[tokio::test]
async fn test_collect_within_reports_stragglers() {
    let mut manager: ProcessManager<()> = ProcessManager::new();
    manager.add("quick", Job::task(async { Ok(()) })).unwrap();
    manager
        .add(
            "stuck",
            Job::task(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }),
        )
        .unwrap();
    manager.start().unwrap();
    let results = manager.collect_within(Duration::from_millis(100)).await.unwrap();

    assert!(results.get("quick").unwrap().is_ok());
    let stuck = results.get("stuck").unwrap();
    assert!(stuck.error.as_deref().unwrap().contains("did not report"));
}

#[tokio::test]
async fn test_process_jobs_fail_on_non_zero_exit() {
    let mut ok = tokio::process::Command::new("sh");
    ok.arg("-c").arg("echo alive");
    let mut bad = tokio::process::Command::new("sh");
    bad.arg("-c").arg("exit 3");

    let mut manager = ProcessManager::new();
    manager.add("ok", Job::process(ok, Some(Duration::from_secs(10)))).unwrap();
    manager.add("bad", Job::process(bad, Some(Duration::from_secs(10)))).unwrap();
    manager.start().unwrap();
    let results = manager.collect().await.unwrap();

    let ok = results.get("ok").unwrap();
    assert_eq!(ok.result.as_ref().unwrap().stdout.trim(), "alive");
    assert!(results.get("bad").unwrap().error.as_deref().unwrap().contains("rc=3"));
}

#[tokio::test]
async fn test_lifecycle_misuse() {
    let mut manager: ProcessManager<()> = ProcessManager::new();
    assert!(matches!(
        manager.collect().await,
        Err(HarnessError::NotStarted(_))
    ));
    manager.add("a", Job::task(async { Ok(()) })).unwrap();
    manager.start().unwrap();
    assert!(matches!(manager.start(), Err(HarnessError::AlreadyStarted(_))));
    assert!(matches!(
        manager.add("late", Job::task(async { Ok(()) })),
        Err(HarnessError::AlreadyStarted(_))
    ));
    assert_eq!(manager.collect().await.unwrap().len(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// K jobs finishing in any order yield K results, one per job.
    /// K 个以任意顺序完成的作业产生 K 个结果，每个作业一个。
    #[test]
    fn every_job_reports_exactly_once(delays in prop::collection::vec(0u64..15, 1..16)) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_time()
            .build()
            .unwrap();
        let results = runtime.block_on(async {
            let mut manager: ProcessManager<usize> = ProcessManager::new();
            for (i, delay) in delays.iter().copied().enumerate() {
                let job = if i % 3 == 0 {
                    Job::thread(move || {
                        std::thread::sleep(Duration::from_millis(delay));
                        Ok(i)
                    })
                } else {
                    Job::task(async move {
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        Ok(i)
                    })
                };
                manager.add(format!("w{i}"), job).unwrap();
            }
            manager.start().unwrap();
            manager.collect().await.unwrap()
        });

        prop_assert_eq!(results.len(), delays.len());
        let mut seen: Vec<usize> = results
            .iter()
            .map(|(_, r)| r.result.unwrap())
            .collect();
        seen.sort_unstable();
        prop_assert_eq!(seen, (0..delays.len()).collect::<Vec<_>>());
    }
}
