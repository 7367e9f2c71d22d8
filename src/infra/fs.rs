//! # File System Operations Module / 文件系统操作模块
//!
//! This module provides utilities for file system operations, such as
//! creating the per-case scoped working directory and archiving it into the
//! results directory before it is released.
//!
//! 此模块提供文件系统操作的实用功能，例如创建每个用例的作用域工作目录，
//! 并在释放之前将其归档到结果目录中。

use anyhow::{Context, Result};
use fs_extra::dir::{copy, CopyOptions};
use std::fs;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Creates a unique, temporary working directory for a test case.
/// The name carries the sanitized case name and the process id for
/// readability; `tempfile` appends a random suffix so concurrent cases never
/// share a directory.
///
/// 为测试用例创建唯一的临时工作目录。
/// 名称包含清理后的用例名称和进程 ID 以便识别；`tempfile` 会追加随机后缀，
/// 因此并发用例永远不会共享目录。
///
/// # Arguments
/// * `base` - Optional parent directory; the system temp dir when `None`
/// * `case_name` - Name of the test case
pub fn create_case_dir(base: Option<&Path>, case_name: &str) -> std::io::Result<TempDir> {
    let prefix = format!("ftest_{}_{}_", sanitize(case_name), std::process::id());
    let mut builder = tempfile::Builder::new();
    builder.prefix(&prefix);
    match base {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            builder.tempdir_in(dir)
        }
        None => builder.tempdir(),
    }
}

/// Replaces every non-alphanumeric character with `_`.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

/// Directory name under which a case is archived.
///
/// Names that sanitizing alters carry a hash of the original, so `a b` and
/// `a_b` never share an archive.
///
/// 用例归档目录名。清理后发生变化的名称会附加原始名称的哈希，避免冲突。
pub fn archive_name(case_name: &str) -> String {
    let sanitized = sanitize(case_name);
    if sanitized == case_name {
        return sanitized;
    }
    let mut hasher = DefaultHasher::new();
    case_name.hash(&mut hasher);
    format!("{sanitized}_{:08x}", hasher.finish() as u32)
}

/// Copies the entire content of a source directory into
/// `<to>/<archive_name(case)>`.
///
/// # Arguments
/// * `from` - Source directory path
/// * `to` - Results directory
/// * `case_name` - Used as the archive sub-directory name
///
/// # Returns
/// The archive directory
pub fn archive_dir(from: &Path, to: &Path, case_name: &str) -> Result<PathBuf> {
    let destination = to.join(archive_name(case_name));
    if destination.exists() {
        fs::remove_dir_all(&destination).with_context(|| {
            format!(
                "Failed to clean up old archive directory: {}",
                destination.display()
            )
        })?;
    }
    fs::create_dir_all(&destination)
        .with_context(|| format!("Failed to create {}", destination.display()))?;

    let mut options = CopyOptions::new();
    options.overwrite = true;
    options.content_only = true;
    copy(from, &destination, &options)
        .with_context(|| format!("Failed to archive {}", from.display()))?;
    Ok(destination)
}

/// Expands `~` and environment variables in a user supplied path.
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let raw = path.to_string_lossy();
    let expanded = shellexpand::full(&raw)
        .with_context(|| format!("Failed to expand path: {raw}"))?;
    Ok(PathBuf::from(expanded.as_ref()))
}
