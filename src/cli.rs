//! # Command Line Interface / 命令行接口
//!
//! Builds the localized `clap` command tree and dispatches to the
//! subcommands in [`commands`].
//!
//! 构建本地化的 `clap` 命令树并分派到 [`commands`] 中的子命令。

pub mod commands;

use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::{env, path::PathBuf};

use crate::core::planner::Selection;
use crate::infra::{logging, t};

/// Pre-parses the command line arguments to find the language setting.
/// This allows i18n to be initialized before the full CLI is built.
/// It looks for a `--lang <VALUE>` or `--lang=<VALUE>` argument.
fn pre_parse_language() -> Option<String> {
    let args: Vec<String> = env::args().collect();
    if let Some(pos) = args.iter().position(|arg| arg == "--lang") {
        if let Some(lang) = args.get(pos + 1) {
            return Some(lang.clone());
        }
    }
    args.iter()
        .find_map(|arg| arg.strip_prefix("--lang="))
        .map(str::to_string)
}

pub fn build_cli(locale: &str) -> Command {
    Command::new("ftest-runner")
        .version(env!("CARGO_PKG_VERSION"))
        .about(t!("cli_about", locale = locale).to_string())
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("lang")
                .long("lang")
                .help(t!("cli_lang", locale = locale).to_string())
                .value_name("LANGUAGE")
                .global(true)
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help(t!("arg_verbose", locale = locale).to_string())
                .global(true)
                .action(ArgAction::Count),
        )
        .subcommand(
            Command::new("run")
                .about(t!("cmd_run_about", locale = locale).to_string())
                .arg(
                    Arg::new("plan")
                        .short('p')
                        .long("plan")
                        .help(t!("arg_plan", locale = locale).to_string())
                        .value_name("PLAN")
                        .default_value("TestPlan.toml")
                        .value_parser(clap::value_parser!(PathBuf))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("jobs")
                        .short('j')
                        .long("jobs")
                        .help(t!("arg_jobs", locale = locale).to_string())
                        .value_name("JOBS")
                        .value_parser(clap::value_parser!(usize))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("tag")
                        .short('t')
                        .long("tag")
                        .help(t!("arg_tag", locale = locale).to_string())
                        .value_name("TAG")
                        .action(ArgAction::Append),
                )
                .arg(
                    Arg::new("name")
                        .short('n')
                        .long("name")
                        .help(t!("arg_name", locale = locale).to_string())
                        .value_name("NAME")
                        .action(ArgAction::Append),
                )
                .arg(
                    Arg::new("total-runners")
                        .long("total-runners")
                        .help(t!("arg_total_runners", locale = locale).to_string())
                        .value_name("TOTAL_RUNNERS")
                        .value_parser(clap::value_parser!(usize))
                        .action(ArgAction::Set)
                        .requires("runner-index"),
                )
                .arg(
                    Arg::new("runner-index")
                        .long("runner-index")
                        .help(t!("arg_runner_index", locale = locale).to_string())
                        .value_name("RUNNER_INDEX")
                        .value_parser(clap::value_parser!(usize))
                        .action(ArgAction::Set)
                        .requires("total-runners"),
                )
                .arg(
                    Arg::new("report")
                        .long("report")
                        .help(t!("arg_report", locale = locale).to_string())
                        .value_name("REPORT")
                        .value_parser(clap::value_parser!(PathBuf))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("html")
                        .long("html")
                        .help(t!("arg_html", locale = locale).to_string())
                        .value_name("HTML")
                        .value_parser(clap::value_parser!(PathBuf))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("junit")
                        .long("junit")
                        .help(t!("arg_junit", locale = locale).to_string())
                        .value_name("JUNIT")
                        .value_parser(clap::value_parser!(PathBuf))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("fail-fast")
                        .long("fail-fast")
                        .help(t!("arg_fail_fast", locale = locale).to_string())
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("init")
                .about(t!("cmd_init_about", locale = locale).to_string())
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .help(t!("arg_init_output", locale = locale).to_string())
                        .value_name("OUTPUT")
                        .default_value("TestPlan.toml")
                        .value_parser(clap::value_parser!(PathBuf))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("non-interactive")
                        .long("non-interactive")
                        .help(t!("arg_non_interactive", locale = locale).to_string())
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("force")
                        .short('f')
                        .long("force")
                        .help(t!("arg_force", locale = locale).to_string())
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("report")
                .about(t!("cmd_report_about", locale = locale).to_string())
                .arg(
                    Arg::new("input")
                        .help(t!("arg_report_input", locale = locale).to_string())
                        .value_name("RESULTS")
                        .required(true)
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("html")
                        .long("html")
                        .help(t!("arg_html", locale = locale).to_string())
                        .value_name("HTML")
                        .value_parser(clap::value_parser!(PathBuf))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("junit")
                        .long("junit")
                        .help(t!("arg_junit", locale = locale).to_string())
                        .value_name("JUNIT")
                        .value_parser(clap::value_parser!(PathBuf))
                        .action(ArgAction::Set),
                ),
        )
        .subcommand(
            Command::new("pcmd")
                .about(t!("cmd_pcmd_about", locale = locale).to_string())
                .arg(
                    Arg::new("hosts")
                        .help(t!("arg_pcmd_hosts", locale = locale).to_string())
                        .value_name("HOSTS")
                        .required(true),
                )
                .arg(
                    Arg::new("command")
                        .help(t!("arg_pcmd_command", locale = locale).to_string())
                        .value_name("COMMAND")
                        .required(true),
                )
                .arg(
                    Arg::new("local")
                        .long("local")
                        .help(t!("arg_pcmd_local", locale = locale).to_string())
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("user")
                        .long("user")
                        .help(t!("arg_pcmd_user", locale = locale).to_string())
                        .value_name("USER")
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("timeout")
                        .long("timeout")
                        .help(t!("arg_pcmd_timeout", locale = locale).to_string())
                        .value_name("SECONDS")
                        .value_parser(clap::value_parser!(u64))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("expect-rc")
                        .long("expect-rc")
                        .help(t!("arg_pcmd_expect_rc", locale = locale).to_string())
                        .value_name("RC")
                        .default_value("0")
                        .allow_negative_numbers(true)
                        .value_parser(clap::value_parser!(i32))
                        .action(ArgAction::Set),
                ),
        )
}

/// Parses the command line and runs the selected subcommand.
///
/// 解析命令行并运行所选子命令。
pub async fn run() -> Result<()> {
    // Pre-parse language and initialize i18n first.
    let explicit_language = pre_parse_language();
    let language = explicit_language.clone().unwrap_or_else(crate::detect_locale);
    rust_i18n::set_locale(&language);

    let matches = build_cli(&language).get_matches();
    logging::init(matches.get_count("verbose"));

    match matches.subcommand() {
        Some(("run", run_matches)) => {
            let args = run_args(run_matches, explicit_language);
            commands::run::execute(args).await?;
        }
        Some(("init", init_matches)) => {
            let output = init_matches
                .get_one::<PathBuf>("output")
                .cloned()
                .unwrap_or_else(|| PathBuf::from(commands::init::PLAN_FILE_NAME));
            let non_interactive = init_matches.get_flag("non-interactive");
            let force = init_matches.get_flag("force");

            // Show language detection message if it was auto-detected
            if explicit_language.is_none() {
                println!(
                    "{}",
                    t!("system_language_detected", locale = &language, lang = &language)
                );
            }
            commands::init::execute(&output, &language, non_interactive, force)?;
        }
        Some(("report", report_matches)) => {
            let input = report_matches
                .get_one::<PathBuf>("input")
                .cloned()
                .unwrap_or_default();
            let html = report_matches.get_one::<PathBuf>("html").cloned();
            let junit = report_matches.get_one::<PathBuf>("junit").cloned();
            commands::report::execute(&input, html.as_deref(), junit.as_deref(), &language)?;
        }
        Some(("pcmd", pcmd_matches)) => {
            let args = commands::pcmd::PcmdArgs {
                hosts: pcmd_matches.get_one::<String>("hosts").cloned().unwrap_or_default(),
                command: pcmd_matches.get_one::<String>("command").cloned().unwrap_or_default(),
                local: pcmd_matches.get_flag("local"),
                user: pcmd_matches.get_one::<String>("user").cloned(),
                timeout_secs: pcmd_matches.get_one::<u64>("timeout").copied(),
                expect_rc: pcmd_matches.get_one::<i32>("expect-rc").copied().unwrap_or(0),
            };
            commands::pcmd::execute(args, &language).await?;
        }
        _ => {
            // Clap has already printed the help for a missing subcommand.
        }
    }
    Ok(())
}

fn run_args(matches: &ArgMatches, language: Option<String>) -> commands::run::RunArgs {
    let strings = |id: &str| -> Vec<String> {
        matches
            .get_many::<String>(id)
            .map(|values| values.cloned().collect())
            .unwrap_or_default()
    };
    commands::run::RunArgs {
        plan: matches
            .get_one::<PathBuf>("plan")
            .cloned()
            .unwrap_or_else(|| PathBuf::from(commands::init::PLAN_FILE_NAME)),
        jobs: matches.get_one::<usize>("jobs").copied(),
        selection: Selection {
            tags: strings("tag"),
            names: strings("name"),
            total_runners: matches.get_one::<usize>("total-runners").copied(),
            runner_index: matches.get_one::<usize>("runner-index").copied(),
        },
        report: matches.get_one::<PathBuf>("report").cloned(),
        html: matches.get_one::<PathBuf>("html").cloned(),
        junit: matches.get_one::<PathBuf>("junit").cloned(),
        fail_fast: matches.get_flag("fail-fast"),
        language,
    }
}
