//! # Remote Execution Unit Tests / 远程执行单元测试
//!
//! Fan-out over scripted hosts: exit-status grouping, dissenting hosts,
//! unreachable hosts and the timeout sentinel.
//!
//! 在脚本化主机上的扇出执行：退出状态分组、异议主机、不可达主机和超时哨兵值。

mod common;

use common::{Reply, ScriptedTransport, hosts};
use ftest_runner::core::errors::HarnessError;
use ftest_runner::infra::command::TIMEOUT_EXIT_STATUS;
use ftest_runner::infra::hosts::HostSet;
use ftest_runner::infra::remote::{RemoteExecutor, RunOptions};
use proptest::prelude::*;
use std::time::Duration;

#[tokio::test]
async fn test_failure_names_the_host_that_disagreed() {
    let transport = ScriptedTransport::new();
    transport.on(Some("h2"), "", vec![Reply::exit(1)]);
    let executor = RemoteExecutor::new(transport.clone());

    let result = executor
        .run(&hosts("h[1-2]"), "true", &RunOptions::default())
        .await
        .unwrap();

    assert!(!result.passed());
    let codes = result.exit_codes();
    assert_eq!(codes[&0], hosts("h1"));
    assert_eq!(codes[&1], hosts("h2"));

    let failure = result.failure().expect("h2 returned 1");
    assert_eq!(failure.dissenting, hosts("h2"));
    assert!(failure.timed_out.is_empty());
    assert!(failure.to_string().contains("h2"), "{failure}");
}

#[tokio::test]
async fn test_identical_output_is_grouped() {
    let transport = ScriptedTransport::new();
    transport.on(None, "uptime", vec![Reply::ok("up 3 days")]);
    let executor = RemoteExecutor::new(transport.clone());

    let result = executor
        .run(&hosts("node-[1-4]"), "uptime", &RunOptions::default())
        .await
        .unwrap();

    assert!(result.passed());
    assert_eq!(result.groups.len(), 1);
    assert_eq!(result.groups[0].hosts.compact(), "node-[1-4]");
    assert_eq!(result.stdout_for("node-3"), Some(&["up 3 days".to_string()][..]));
    assert!(result.collate().contains("node-[1-4]: exit_status=0"));
    assert_eq!(transport.calls().len(), 4);
}

#[tokio::test]
async fn test_unreachable_hosts_are_a_connection_error() {
    let transport = ScriptedTransport::new();
    transport.on(Some("h3"), "", vec![Reply::Unreachable]);
    let executor = RemoteExecutor::new(transport.clone());

    let err = executor
        .run(&hosts("h[1-3]"), "hostname", &RunOptions::default())
        .await
        .unwrap_err();

    match err {
        HarnessError::Connection { hosts: unreachable, .. } => {
            assert_eq!(unreachable, hosts("h3"));
        }
        other => panic!("expected a connection error, got {other}"),
    }
}

#[tokio::test]
async fn test_timeout_reports_sentinel_and_kills() {
    let transport = ScriptedTransport::new();
    transport.on(Some("h1"), "ior", vec![Reply::slow(0, Duration::from_secs(30))]);
    let executor = RemoteExecutor::new(transport.clone());
    let options = RunOptions::default().with_timeout(Duration::from_millis(50));

    let result = executor.run(&hosts("h[1-2]"), "ior -w", &options).await.unwrap();

    assert_eq!(result.timed_out_hosts(), hosts("h1"));
    assert_eq!(result.exit_codes()[&TIMEOUT_EXIT_STATUS], hosts("h1"));
    let failure = result.failure().unwrap();
    assert_eq!(failure.timed_out, hosts("h1"));
    assert_eq!(transport.kills(), vec![("h1".to_string(), "ior -w".to_string())]);
}

#[tokio::test]
async fn test_expected_non_zero_status_passes() {
    let transport = ScriptedTransport::new();
    transport.on(None, "grep", vec![Reply::exit(1)]);
    let executor = RemoteExecutor::new(transport);

    let result = executor
        .run_checked(&hosts("h[1-2]"), "grep missing /etc/hosts", &RunOptions::default().expect(1))
        .await
        .unwrap();
    assert!(result.passed());
}

#[tokio::test]
async fn test_run_checked_turns_mismatch_into_error() {
    let transport = ScriptedTransport::new();
    transport.on(Some("h1"), "", vec![Reply::exit(2)]);
    let executor = RemoteExecutor::new(transport);

    let err = executor
        .run_checked(&hosts("h[1-3]"), "false", &RunOptions::default())
        .await
        .unwrap_err();
    let HarnessError::RemoteCommand(failure) = err else {
        panic!("expected a remote command failure");
    };
    assert_eq!(failure.dissenting, hosts("h1"));
}

#[tokio::test]
async fn test_sudo_prefixes_the_command() {
    let transport = ScriptedTransport::new();
    let executor = RemoteExecutor::new(transport.clone());
    let options = RunOptions {
        sudo: true,
        ..RunOptions::default()
    };
    let result = executor.run(&hosts("h1"), "dmesg", &options).await.unwrap();
    assert_eq!(result.command, "sudo -n dmesg");
    assert_eq!(transport.calls()[0].1, "sudo -n dmesg");
}

#[tokio::test]
async fn test_empty_host_set_is_rejected() {
    let executor = RemoteExecutor::new(ScriptedTransport::new());
    let err = executor
        .run(&HostSet::new(), "true", &RunOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::Config(_)));
}

#[tokio::test]
async fn test_background_job_joins_its_result() {
    let transport = ScriptedTransport::new();
    transport.on(None, "ior", vec![Reply::slow(0, Duration::from_millis(20))]);
    let executor = RemoteExecutor::new(transport);

    let mut job = executor.spawn(&hosts("client-[1-2]"), "ior -w", RunOptions::default());
    let result = job.join(Some(Duration::from_secs(5))).await.unwrap();
    assert!(result.passed());
    assert!(matches!(
        job.join(None).await,
        Err(HarnessError::NotStarted(_))
    ));
}

#[tokio::test]
async fn test_background_job_join_timeout_terminates() {
    let transport = ScriptedTransport::new();
    transport.on(None, "ior", vec![Reply::slow(0, Duration::from_secs(30))]);
    let executor = RemoteExecutor::new(transport.clone());

    let mut job = executor.spawn(&hosts("client-1"), "ior -w", RunOptions::default());
    let err = job.join(Some(Duration::from_millis(50))).await.unwrap_err();
    assert!(err.is_timeout(), "{err}");
    assert_eq!(transport.kills().len(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Hosts outside the majority exit status are exactly the ones that
    /// returned something else.
    /// 多数退出状态之外的主机恰好是返回了其他状态的主机。
    #[test]
    fn dissenting_hosts_are_the_minority(codes in prop::collection::vec(prop_oneof![Just(0), Just(1)], 1..12)) {
        let transport = ScriptedTransport::new();
        for (i, rc) in codes.iter().enumerate() {
            transport.on(Some(&format!("n{}", i + 1)), "", vec![Reply::exit(*rc)]);
        }
        let executor = RemoteExecutor::new(transport);
        let all = HostSet::parse(&format!("n[1-{}]", codes.len())).unwrap();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let result = runtime
            .block_on(executor.run(&all, "check", &RunOptions::default()))
            .unwrap();

        let zeros = codes.iter().filter(|rc| **rc == 0).count();
        let ones = codes.len() - zeros;
        // Ties go to the expected status.
        let majority = if zeros >= ones { 0 } else { 1 };
        let expected: HostSet = codes
            .iter()
            .enumerate()
            .filter(|(_, rc)| **rc != majority)
            .map(|(i, _)| format!("n{}", i + 1))
            .collect();

        prop_assert_eq!(result.majority_exit_status(), Some(majority));
        prop_assert_eq!(result.dissenting_hosts(), expected);
        prop_assert_eq!(result.passed(), ones == 0);
        prop_assert_eq!(result.hosts(), all);
    }
}
