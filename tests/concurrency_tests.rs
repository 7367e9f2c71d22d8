//! # Concurrency Tests using Loom
//!
//! Models the two races the harness relies on: workers posting into the one
//! result queue the process manager drains, and the fail-fast flag that
//! cases check before they start.
//!
//! 使用 loom 对框架依赖的两种竞争进行建模：工作者向进程管理器读取的单一结果队列提交结果，
//! 以及用例开始前检查的快速失败标志。

#[cfg(test)]
mod tests {
    use loom::sync::Arc;
    use loom::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use loom::sync::Mutex;
    use loom::thread;
    use std::collections::VecDeque;

    // loom explores deep interleavings; give the model a larger stack.
    const STACK_SIZE: usize = 8 * 1024 * 1024;

    fn run_model<F>(name: &str, model: F)
    where
        F: Fn() + Sync + Send + 'static,
    {
        let handle = std::thread::Builder::new()
            .name(name.into())
            .stack_size(STACK_SIZE)
            .spawn(move || loom::model(model))
            .unwrap();
        handle.join().unwrap();
    }

    /// Every worker posts once into a shared queue; the collector drains
    /// exactly one result per worker, whatever the interleaving.
    ///
    /// 每个工作者向共享队列提交一次；无论如何交错，收集者都为每个工作者恰好取得一个结果。
    #[test]
    fn test_single_queue_yields_one_result_per_worker() {
        run_model("loom-result-queue", || {
            const WORKERS: usize = 2;
            let queue: Arc<Mutex<VecDeque<(usize, Result<usize, String>)>>> =
                Arc::new(Mutex::new(VecDeque::new()));

            let handles: Vec<_> = (0..WORKERS)
                .map(|id| {
                    let queue = queue.clone();
                    thread::spawn(move || {
                        // Worker 1 fails; its failure is still a result.
                        let outcome = if id == 1 {
                            Err(format!("worker {id} failed"))
                        } else {
                            Ok(id * 10)
                        };
                        queue.lock().unwrap().push_back((id, outcome));
                    })
                })
                .collect();

            // Drain while the workers are still running.
            let mut seen = [0usize; WORKERS];
            let mut received = 0;
            while received < WORKERS {
                let next = queue.lock().unwrap().pop_front();
                match next {
                    Some((id, outcome)) => {
                        seen[id] += 1;
                        received += 1;
                        assert_eq!(outcome.is_err(), id == 1);
                    }
                    None => thread::yield_now(),
                }
            }
            for handle in handles {
                handle.join().unwrap();
            }

            assert_eq!(seen, [1; WORKERS]);
            assert!(queue.lock().unwrap().is_empty());
        });
    }

    /// A case that fails raises the fail-fast flag; cases that observe it
    /// before starting report CANCEL instead of running. Every case is
    /// accounted for exactly once, and the failing case always ran.
    ///
    /// 失败的用例设置快速失败标志；开始前观察到该标志的用例报告 CANCEL 而不运行。
    /// 每个用例恰好被统计一次，且失败的用例总是已经运行。
    #[test]
    fn test_fail_fast_accounts_for_every_case() {
        run_model("loom-fail-fast", || {
            const CASES: usize = 2;
            let fail_fast = Arc::new(AtomicBool::new(false));
            let ran = Arc::new(AtomicUsize::new(0));
            let cancelled = Arc::new(AtomicUsize::new(0));

            let handles: Vec<_> = (0..CASES)
                .map(|i| {
                    let fail_fast = fail_fast.clone();
                    let ran = ran.clone();
                    let cancelled = cancelled.clone();
                    thread::spawn(move || {
                        if fail_fast.load(Ordering::Acquire) {
                            cancelled.fetch_add(1, Ordering::Relaxed);
                            return false;
                        }
                        ran.fetch_add(1, Ordering::Relaxed);
                        // Case 0 fails.
                        if i == 0 {
                            fail_fast.store(true, Ordering::Release);
                        }
                        true
                    })
                })
                .collect();

            let started: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();

            let ran = ran.load(Ordering::Relaxed);
            let cancelled = cancelled.load(Ordering::Relaxed);
            assert_eq!(ran + cancelled, CASES);
            // Nothing fails before case 0 does, so case 0 always runs.
            assert!(started[0]);
            assert!(fail_fast.load(Ordering::Relaxed));
        });
    }
}
