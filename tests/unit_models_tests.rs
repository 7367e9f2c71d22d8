//! # Models Module Unit Tests / Models 模块单元测试
//!
//! Status parsing and localization, result records and totals.
//!
//! 状态的解析与本地化、结果记录以及汇总统计。

use chrono::{Duration as ChronoDuration, Utc};
use ftest_runner::core::errors::HarnessError;
use ftest_runner::models::{Stage, Status, TestResult, Totals};

#[cfg(test)]
mod status_tests {
    use super::*;

    #[test]
    fn test_every_status_parses_from_its_name() {
        for status in Status::ALL {
            assert_eq!(status.as_str().parse::<Status>().unwrap(), status);
            assert_eq!(
                status.as_str().to_lowercase().parse::<Status>().unwrap(),
                status
            );
            assert_eq!(status.to_string(), status.as_str());
        }
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        for raw in ["", "PASSED", "timeout", "FLAKY"] {
            assert!(
                matches!(raw.parse::<Status>(), Err(HarnessError::InvalidStatus(ref s)) if s == raw),
                "{raw:?}"
            );
        }
    }

    #[test]
    fn test_failure_statuses() {
        let failing: Vec<_> = Status::ALL.into_iter().filter(|s| s.is_failure()).collect();
        assert_eq!(failing, vec![Status::Fail, Status::Error, Status::Interrupt]);
    }

    #[test]
    fn test_serialized_forms() {
        assert_eq!(serde_json::to_string(&Status::Interrupt).unwrap(), "\"INTERRUPT\"");
        assert_eq!(serde_json::to_string(&Stage::Teardown).unwrap(), "\"teardown\"");
        assert_eq!(Stage::Wait.to_string(), "wait");
    }

    /// 标签按请求的语言返回，未知语言回退到英文。
    #[test]
    fn test_labels_follow_the_locale() {
        assert_eq!(Status::Fail.label("en"), "FAIL");
        assert_eq!(Status::Fail.label("zh-CN"), "失败");
        assert_eq!(Status::Interrupt.label("zh-CN"), "中断");
        assert_eq!(Status::Skip.label("fr"), "SKIP");
    }
}

#[cfg(test)]
mod result_tests {
    use super::*;

    fn result(name: &str, status: Status) -> TestResult {
        TestResult::not_run(name, status, "fixture")
    }

    #[test]
    fn test_duration_is_measured_between_start_and_end() {
        let start = Utc::now();
        let r = TestResult::new("pool_create", Status::Pass, start, start + ChronoDuration::seconds(3));
        assert!((r.duration_secs - 3.0).abs() < 1e-9);
        assert_eq!(r.duration().as_secs(), 3);
    }

    #[test]
    fn test_end_before_start_clamps_to_zero() {
        let start = Utc::now();
        let r = TestResult::new("clock_skew", Status::Pass, start, start - ChronoDuration::seconds(1));
        assert_eq!(r.duration_secs, 0.0);
    }

    #[test]
    fn test_not_run_carries_the_reason() {
        let r = TestResult::not_run("needs_pmem", Status::Skip, "no PMEM devices");
        assert_eq!(r.message.as_deref(), Some("no PMEM devices"));
        assert_eq!(r.duration_secs, 0.0);
        assert!(!r.is_failure());
    }

    #[test]
    fn test_totals_count_each_status() {
        let results = vec![
            result("a", Status::Pass),
            result("b", Status::Pass),
            result("c", Status::Warn),
            result("d", Status::Fail),
            result("e", Status::Interrupt),
            result("f", Status::Cancel),
        ];
        let totals = Totals::from_results(&results);
        assert_eq!(totals.total, 6);
        assert_eq!(totals.count(Status::Pass), 2);
        assert_eq!(totals.count(Status::Error), 0);
        assert_eq!(totals.failures(), 2);
        assert!(!totals.all_passed());
    }

    #[test]
    fn test_warnings_skips_and_cancels_do_not_fail_the_run() {
        let results = vec![
            result("a", Status::Warn),
            result("b", Status::Skip),
            result("c", Status::Cancel),
        ];
        assert!(Totals::from_results(&results).all_passed());
        assert!(Totals::default().all_passed());
    }
}
