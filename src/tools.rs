//! # Tool Adapters Module / 工具适配模块
//!
//! Typed builders and output parsers for the command-line tools the harness
//! drives. The system under test is only ever seen through these outputs.
//!
//! 框架所驱动的命令行工具的类型化构建器和输出解析器。
//! 被测系统只通过这些输出被观察。

pub mod dmg;
pub mod ior;
pub mod mdtest;
pub mod telemetry;

use std::path::Path;

use crate::core::command::CommandBuilder;

/// The builder for `tool`, with its known parameters registered. Unknown
/// tools get an empty builder. `tool` may be a path; the file name selects
/// the adapter and the path is kept as the executable.
pub fn builder_for(tool: &str) -> CommandBuilder {
    let name = Path::new(tool)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(tool);
    match name {
        "dmg" => dmg::builder(tool),
        "ior" => ior::builder(tool),
        "mdtest" => mdtest::builder(tool),
        _ => CommandBuilder::new(tool),
    }
}

/// Flag template for a parameter no adapter knows: `-x` or `--name`.
pub fn generic_flag(name: &str) -> String {
    if name.chars().count() == 1 {
        format!("-{name}")
    } else {
        format!("--{}", name.replace('_', "-"))
    }
}

/// Valued template for a parameter no adapter knows: `-x {}` or `--name={}`.
pub fn generic_param(name: &str) -> String {
    if name.chars().count() == 1 {
        format!("-{name} {{}}")
    } else {
        format!("--{}={{}}", name.replace('_', "-"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_templates() {
        assert_eq!(generic_flag("v"), "-v");
        assert_eq!(generic_flag("no_query"), "--no-query");
        assert_eq!(generic_param("n"), "-n {}");
        assert_eq!(generic_param("chunk_size"), "--chunk-size={}");
    }

    #[test]
    fn adapters_are_chosen_by_file_name() {
        assert!(builder_for("/usr/bin/dmg").has("json"));
        assert_eq!(builder_for("/usr/bin/dmg").tool(), "/usr/bin/dmg");
        assert!(!builder_for("daos").has("json"));
    }
}
