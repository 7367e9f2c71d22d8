//! # Init Command Module / 初始化命令模块
//!
//! This module implements the `init` command of the ftest-runner CLI, which
//! writes a starter `TestPlan.toml`, either through an interactive wizard or
//! with defaults.
//!
//! 此模块实现了 ftest-runner CLI 的 `init` 命令，
//! 通过交互式向导或默认值写入一个初始的 `TestPlan.toml`。

use anyhow::{Context, Result};
use colored::*;
use dialoguer::{Confirm, Input, MultiSelect, Select, theme::ColorfulTheme};
use std::fs;
use std::path::Path;

use crate::core::config::TestPlan;
use crate::infra::t;

/// The default name for the test plan file.
/// 测试计划文件的默认名称。
pub const PLAN_FILE_NAME: &str = "TestPlan.toml";

/// Answers that shape the starter plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanOptions {
    pub language: String,
    pub transport: String,
    pub servers: String,
    pub clients: String,
    pub smoke: bool,
    pub workload: bool,
    pub rebuild: bool,
}

impl PlanOptions {
    pub fn defaults(language: &str) -> Self {
        Self {
            language: language.to_string(),
            transport: "local".to_string(),
            servers: "server-[1-2]".to_string(),
            clients: "client-1".to_string(),
            smoke: true,
            workload: true,
            rebuild: false,
        }
    }
}

const HEADER: &str = r#"# Test Plan / 测试计划
# Run with: ftest-runner run --plan TestPlan.toml

# Language for messages / 消息语言
language = "{language}"
# Reports and archived case directories / 报告和归档的用例目录
output_dir = "ftest-results"

# Named host groups, NodeSet ranges allowed / 命名主机组，支持 NodeSet 范围
[hosts]
servers = "{servers}"
clients = "{clients}"

# Environment passed to every command / 透传给每个命令的环境变量
[env]
D_LOG_MASK = "ERR"

[remote]
# "ssh" for real clusters, "local" runs every host as a local shell
# "ssh" 用于真实集群，"local" 将每台主机作为本地 shell 运行
transport = "{transport}"
connect_timeout_secs = 10
"#;

const SMOKE_CASE: &str = r#"
[[cases]]
name = "smoke_pool_list"
tags = ["smoke"]
timeout_secs = 300

[[cases.act]]
kind = "run"
hosts = "servers"
command = { tool = "dmg", flags = ["json"], command = "pool", action = "list" }
warn_only = true

[[cases.verify]]
kind = "assert"
hosts = "servers"
command = "hostname"
expect = { exit_code = 0 }
"#;

const WORKLOAD_CASE: &str = r#"
[[cases]]
name = "ior_easy_write"
tags = ["workload"]
timeout_secs = 1800

[[cases.setup]]
kind = "run"
hosts = "clients"
command = "mkdir -p $FTEST_CASE_DIR/data"

[[cases.act]]
kind = "run"
hosts = "clients"
background = true
command = { tool = "ior", params = { flags = "-w -k", api = "POSIX", test_file = "/tmp/ior.dat", block_size = "64M", transfer_size = "1M" } }

[[cases.teardown]]
kind = "run"
hosts = "clients"
command = "rm -f /tmp/ior.dat"
"#;

const REBUILD_CASE: &str = r#"
[[cases]]
name = "rebuild_after_rank_stop"
tags = ["rebuild"]
timeout_secs = 3600

[[cases.act]]
kind = "fault"
name = "stop rank 1"
hosts = "servers"
command = "dmg system stop --ranks=1"

[[cases.wait]]
kind = "poll"
hosts = "servers"
command = "dmg -j pool query TestPool"
max_attempts = 60
interval_secs = 5.0
expect = { json_pointer = "/response/rebuild/state", equals = "done" }
"#;

/// Renders the starter plan for the given answers.
pub fn render_plan(options: &PlanOptions) -> String {
    let mut plan = HEADER
        .replace("{language}", &options.language)
        .replace("{servers}", &options.servers)
        .replace("{clients}", &options.clients)
        .replace("{transport}", &options.transport);
    for (enabled, case) in [
        (options.smoke, SMOKE_CASE),
        (options.workload, WORKLOAD_CASE),
        (options.rebuild, REBUILD_CASE),
    ] {
        if enabled {
            plan.push_str(case);
        }
    }
    plan
}

/// Executes the init command.
///
/// # Arguments
/// * `output` - Path for the new plan file
/// * `language` - Language for messages and the plan's `language` key
/// * `non_interactive` - Write the defaults without prompting
/// * `force` - Overwrite an existing file without asking
pub fn execute(output: &Path, language: &str, non_interactive: bool, force: bool) -> Result<()> {
    let options = if non_interactive {
        if output.exists() && !force {
            anyhow::bail!("{}", t!("init.file_exists", locale = language, path = output.display()));
        }
        PlanOptions::defaults(language)
    } else {
        let theme = ColorfulTheme::default();
        println!("\n{}", t!("init.welcome", locale = language).bold().cyan());
        println!("{}\n", t!("init.description", locale = language));

        if output.exists()
            && !force
            && !Confirm::with_theme(&theme)
                .with_prompt(t!("init.overwrite_prompt", locale = language, path = output.display()))
                .default(false)
                .interact()
                .context(t!("init.confirmation_failed", locale = language).to_string())?
        {
            println!("{}", t!("init.aborted", locale = language).yellow());
            return Ok(());
        }
        prompt_for_options(&theme, language)?
    };

    let content = render_plan(&options);
    // The plan must load before it is written.
    let _: TestPlan = toml::from_str(&content).context(t!("init.invalid_plan", locale = language).to_string())?;

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| {
            t!("init.create_parent_dir_failed", locale = language, path = parent.display()).to_string()
        })?;
    }
    fs::write(output, content)
        .with_context(|| t!("init.write_failed", locale = language, path = output.display()).to_string())?;

    println!(
        "\n{} {}",
        "✔".green(),
        t!("init.success", locale = language, path = output.display()).bold()
    );
    println!("{}", t!("init.next_steps", locale = language));
    Ok(())
}

fn prompt_for_options(theme: &ColorfulTheme, language: &str) -> Result<PlanOptions> {
    let defaults = PlanOptions::defaults(language);

    let transports = ["local", "ssh"];
    let transport = Select::with_theme(theme)
        .with_prompt(t!("init.transport_prompt", locale = language).to_string())
        .items(&transports)
        .default(0)
        .interact()?;

    let servers: String = Input::with_theme(theme)
        .with_prompt(t!("init.servers_prompt", locale = language).to_string())
        .default(defaults.servers.clone())
        .interact_text()?;
    let clients: String = Input::with_theme(theme)
        .with_prompt(t!("init.clients_prompt", locale = language).to_string())
        .default(defaults.clients.clone())
        .interact_text()?;

    let templates = [
        t!("init.template_smoke", locale = language).to_string(),
        t!("init.template_workload", locale = language).to_string(),
        t!("init.template_rebuild", locale = language).to_string(),
    ];
    let selections = MultiSelect::with_theme(theme)
        .with_prompt(t!("init.case_selection_prompt", locale = language).to_string())
        .items(&templates)
        .defaults(&[true, true, false])
        .interact()?;
    if selections.is_empty() {
        println!("{}", t!("init.no_cases_selected", locale = language).yellow());
    }

    Ok(PlanOptions {
        language: language.to_string(),
        transport: transports[transport].to_string(),
        servers,
        clients,
        smoke: selections.contains(&0),
        workload: selections.contains(&1),
        rebuild: selections.contains(&2),
    })
}
