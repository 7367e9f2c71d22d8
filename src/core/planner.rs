//! # Test Execution Planner Module / 测试执行计划模块
//!
//! This module decides which cases of a plan run here: filtering by
//! architecture and tags, separating the cases marked as skipped, ordering
//! deterministically and splitting the remainder across CI runners.
//!
//! 此模块决定计划中的哪些用例在此运行：按架构和标签过滤、
//! 分离标记为跳过的用例、确定性排序，并将剩余用例分配到多个 CI 运行器。

use crate::core::config::TestCase;
use anyhow::{Result, bail};
use std::env;

/// Represents a complete execution plan for a test plan.
/// 表示测试计划的完整执行计划。
#[derive(Debug)]
pub struct ExecutionPlan {
    /// The cases to run on this runner, in execution order.
    /// 在此运行器上运行的用例，按执行顺序排列。
    pub cases_to_run: Vec<TestCase>,
    /// The number of cases filtered out due to architecture constraints.
    /// 由于架构约束而被过滤掉的用例数量。
    pub filtered_arch_count: usize,
    /// The number of cases filtered out because no requested tag matched.
    /// 由于没有匹配的请求标签而被过滤掉的用例数量。
    pub filtered_tag_count: usize,
    /// The number of cases that will be reported as skipped.
    /// 将被报告为跳过的用例数量。
    pub skipped_count: usize,
    /// Whether the cases are distributed across multiple runners (CI environment).
    /// 用例是否分布在多个运行器上（CI 环境）。
    pub is_distributed: bool,
}

/// Selection criteria from the command line.
/// 来自命令行的选择条件。
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Run only cases carrying at least one of these tags; all when empty.
    pub tags: Vec<String>,
    /// Run only cases whose name contains one of these; all when empty.
    pub names: Vec<String>,
    pub total_runners: Option<usize>,
    pub runner_index: Option<usize>,
}

/// Creates an execution plan for the given cases.
///
/// Skipped cases stay in the plan so they are reported as `SKIP`; they are
/// ordered after the runnable ones.
///
/// 为给定的用例创建执行计划。
/// 跳过的用例保留在计划中以便报告为 `SKIP`；它们排在可运行用例之后。
///
/// # Arguments
/// * `cases` - All cases of the test plan
/// * `selection` - Tag/name filters and the optional runner split
///
/// # Returns
/// An `ExecutionPlan` with the filtered and potentially distributed test cases
pub fn plan_execution(cases: Vec<TestCase>, selection: &Selection) -> Result<ExecutionPlan> {
    // Filter by architecture
    let current_arch = env::consts::ARCH;
    let (arch_cases, filtered_arch_cases): (Vec<_>, Vec<_>) = cases
        .into_iter()
        .partition(|case| case.arch.is_empty() || case.arch.iter().any(|a| a == current_arch));

    // Filter by tags and names
    let (selected, filtered_tag_cases): (Vec<_>, Vec<_>) = arch_cases.into_iter().partition(|case| {
        let tag_ok = selection.tags.is_empty() || case.tags.iter().any(|t| selection.tags.contains(t));
        let name_ok = selection.names.is_empty() || selection.names.iter().any(|n| case.name.contains(n.as_str()));
        tag_ok && name_ok
    });

    // Separate skipped cases
    let (mut runnable, mut skipped): (Vec<_>, Vec<_>) =
        selected.into_iter().partition(|case| !case.skip);

    // Sort cases by name for deterministic execution order
    runnable.sort_by(|a, b| a.name.cmp(&b.name));
    skipped.sort_by(|a, b| a.name.cmp(&b.name));
    let skipped_count = skipped.len();

    let mut combined_cases = runnable;
    combined_cases.extend(skipped);

    // Distribute cases if running in CI
    let (cases_to_run, is_distributed) =
        if let (Some(total), Some(index)) = (selection.total_runners, selection.runner_index) {
            if total == 0 || index >= total {
                bail!("Runner index must be less than total runners.");
            }
            let distributed_cases: Vec<_> = combined_cases
                .into_iter()
                .enumerate()
                .filter(|(i, _)| i % total == index)
                .map(|(_, case)| case)
                .collect();
            (distributed_cases, true)
        } else {
            if selection.total_runners.is_some() || selection.runner_index.is_some() {
                bail!("Both --total-runners and --runner-index must be provided.");
            }
            (combined_cases, false)
        };

    Ok(ExecutionPlan {
        cases_to_run,
        filtered_arch_count: filtered_arch_cases.len(),
        filtered_tag_count: filtered_tag_cases.len(),
        skipped_count,
        is_distributed,
    })
}
