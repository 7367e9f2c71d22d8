//! # Condition Poller Module / 条件轮询模块
//!
//! Waits for an asynchronous state transition in the system under test by
//! re-querying it on a fixed interval. Every wait is bounded by an attempt
//! count and optionally by a wall-clock duration.
//!
//! 通过以固定间隔重新查询被测系统来等待其异步状态转换。
//! 每次等待都受尝试次数限制，并可选地受挂钟时长限制。

use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::core::errors::HarnessError;

/// Where a wait currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Pending,
    Satisfied,
    TimedOut,
}

impl fmt::Display for PollState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PollState::Pending => "pending",
            PollState::Satisfied => "satisfied",
            PollState::TimedOut => "timed out",
        })
    }
}

/// A bounded repeat-query wait.
/// 有界的重复查询等待。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionPoller {
    max_attempts: u32,
    interval: Duration,
    max_duration: Option<Duration>,
}

impl ConditionPoller {
    /// Creates a poller. Zero attempts would never observe anything and is
    /// rejected.
    pub fn new(max_attempts: u32, interval: Duration) -> Result<Self, HarnessError> {
        if max_attempts == 0 {
            return Err(HarnessError::Config(
                "a condition poller needs at least one attempt".to_string(),
            ));
        }
        Ok(Self {
            max_attempts,
            interval,
            max_duration: None,
        })
    }

    /// Derives the attempt count from a total timeout; the duration bound is
    /// kept as well.
    pub fn with_timeout(timeout: Duration, interval: Duration) -> Result<Self, HarnessError> {
        let attempts = if interval.is_zero() {
            1
        } else {
            (timeout.as_secs_f64() / interval.as_secs_f64()).ceil().max(1.0) as u32
        };
        Ok(Self::new(attempts, interval)?.max_duration(timeout))
    }

    pub fn max_duration(mut self, limit: Duration) -> Self {
        self.max_duration = Some(limit);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Repeats `query` until `predicate` accepts its value.
    ///
    /// Each attempt issues exactly one fresh query. A connection error aborts
    /// the wait immediately; any other query error is kept as the last
    /// observation and the wait continues.
    ///
    /// 重复 `query` 直到 `predicate` 接受其值。连接错误会立即中止等待；
    /// 其他查询错误会记录为最后的观察结果，等待继续。
    pub async fn wait<S, Q, Fut, P>(
        &self,
        description: &str,
        mut query: Q,
        mut predicate: P,
    ) -> Result<S, HarnessError>
    where
        S: fmt::Debug,
        Q: FnMut() -> Fut,
        Fut: Future<Output = Result<S, HarnessError>>,
        P: FnMut(&S) -> bool,
    {
        let started = Instant::now();
        let mut last_observed = String::from("<nothing observed>");
        let mut attempts = 0;

        while attempts < self.max_attempts {
            attempts += 1;
            match query().await {
                Ok(state) => {
                    if predicate(&state) {
                        debug!(description, attempts, state = %PollState::Satisfied, "{state:?}");
                        return Ok(state);
                    }
                    last_observed = format!("{state:?}");
                }
                Err(e) if e.is_connection() => return Err(e),
                Err(e) => last_observed = format!("query error: {e}"),
            }
            debug!(description, attempts, state = %PollState::Pending, "{last_observed}");

            if attempts == self.max_attempts {
                break;
            }
            if let Some(limit) = self.max_duration {
                if started.elapsed() + self.interval > limit {
                    break;
                }
            }
            tokio::time::sleep(self.interval).await;
        }

        debug!(description, attempts, state = %PollState::TimedOut, "{last_observed}");
        Err(HarnessError::ConditionTimeout {
            description: description.to_string(),
            attempts,
            elapsed: started.elapsed(),
            last_observed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::hosts::HostSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn zero_attempts_is_rejected() {
        assert!(ConditionPoller::new(0, Duration::from_millis(1)).is_err());
    }

    #[test]
    fn timeout_derives_attempts() {
        let poller =
            ConditionPoller::with_timeout(Duration::from_secs(10), Duration::from_secs(3)).unwrap();
        assert_eq!(poller.max_attempts(), 4);
    }

    #[tokio::test]
    async fn query_errors_count_as_unsatisfied_ticks() {
        let calls = Arc::new(AtomicU32::new(0));
        let poller = ConditionPoller::new(5, Duration::from_millis(1)).unwrap();
        let counter = calls.clone();
        let state = poller
            .wait(
                "rebuild done",
                || {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            Err(HarnessError::Config("garbled json".into()))
                        } else {
                            Ok(n)
                        }
                    }
                },
                |n| *n >= 2,
            )
            .await
            .unwrap();
        assert_eq!(state, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn connection_errors_abort() {
        let calls = Arc::new(AtomicU32::new(0));
        let poller = ConditionPoller::new(5, Duration::from_millis(1)).unwrap();
        let counter = calls.clone();
        let err = poller
            .wait(
                "pool up",
                || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async {
                        Err::<(), _>(HarnessError::Connection {
                            hosts: HostSet::parse("h1").unwrap(),
                            detail: "refused".into(),
                        })
                    }
                },
                |_| true,
            )
            .await
            .unwrap_err();
        assert!(err.is_connection());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duration_bound_stops_early() {
        let poller = ConditionPoller::new(1000, Duration::from_millis(20))
            .unwrap()
            .max_duration(Duration::from_millis(50));
        let err = poller
            .wait("never", || async { Ok("busy") }, |_| false)
            .await
            .unwrap_err();
        match err {
            HarnessError::ConditionTimeout { attempts, last_observed, .. } => {
                assert!(attempts < 10);
                assert_eq!(last_observed, "\"busy\"");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
