//! # Host Set Module / 主机集合模块
//!
//! An ordered, de-duplicated collection of host names that understands the
//! bracketed range syntax used by cluster schedulers, e.g. `server-[1-3,5]`.
//!
//! 有序、去重的主机名集合，支持集群调度器使用的括号范围语法，
//! 例如 `server-[1-3,5]`。

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::core::errors::HarnessError;

/// A set of hosts. Iteration order is the natural (numeric-aware) host order.
/// 主机集合。迭代顺序为自然（感知数字的）主机顺序。
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct HostSet {
    hosts: BTreeSet<HostName>,
}

/// A host name ordered so that `node-2` sorts before `node-10`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct HostName(String);

impl HostName {
    fn split(&self) -> (&str, Option<u64>, usize) {
        let digits = self.0.chars().rev().take_while(|c| c.is_ascii_digit()).count();
        let (prefix, number) = self.0.split_at(self.0.len() - digits);
        // Only zero-padded numbers carry a fixed width.
        let width = if number.len() > 1 && number.starts_with('0') { digits } else { 0 };
        (prefix, number.parse().ok(), width)
    }
}

impl Ord for HostName {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        let (a_prefix, a_num, a_width) = self.split();
        let (b_prefix, b_num, b_width) = other.split();
        a_prefix
            .cmp(b_prefix)
            .then(a_num.cmp(&b_num))
            .then(a_width.cmp(&b_width))
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for HostName {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl HostSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a comma-separated host expression with optional bracketed ranges.
    ///
    /// 解析逗号分隔的主机表达式，可包含括号范围。
    ///
    /// ```
    /// use ftest_runner::infra::hosts::HostSet;
    /// let hosts = HostSet::parse("wolf-[1-3],client-7").unwrap();
    /// assert_eq!(hosts.len(), 4);
    /// ```
    pub fn parse(expr: &str) -> Result<Self, HarnessError> {
        let mut set = HostSet::new();
        for item in split_top_level(expr) {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            for host in expand_item(item)? {
                set.insert(host);
            }
        }
        Ok(set)
    }

    pub fn insert(&mut self, host: impl Into<String>) -> bool {
        self.hosts.insert(HostName(host.into()))
    }

    pub fn extend(&mut self, other: &HostSet) {
        self.hosts.extend(other.hosts.iter().cloned());
    }

    pub fn contains(&self, host: &str) -> bool {
        self.hosts.contains(&HostName(host.to_string()))
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.hosts.iter().map(|h| h.0.as_str())
    }

    /// Hosts present in `self` but not in `other`.
    pub fn difference(&self, other: &HostSet) -> HostSet {
        HostSet {
            hosts: self.hosts.difference(&other.hosts).cloned().collect(),
        }
    }

    /// Renders the set in compact range form, e.g. `server-[1-3,5],client-1`.
    /// 以紧凑的范围形式渲染集合。
    pub fn compact(&self) -> String {
        let mut groups: Vec<(String, usize, Vec<u64>)> = Vec::new();
        let mut singles: Vec<String> = Vec::new();

        for host in &self.hosts {
            match host.split() {
                (prefix, Some(num), width) => {
                    match groups
                        .iter_mut()
                        .find(|(p, w, _)| p == prefix && *w == width)
                    {
                        Some((_, _, nums)) => nums.push(num),
                        None => groups.push((prefix.to_string(), width, vec![num])),
                    }
                }
                _ => singles.push(host.0.clone()),
            }
        }

        let mut parts = Vec::new();
        for (prefix, width, nums) in groups {
            if nums.len() == 1 {
                parts.push(format!("{prefix}{:0width$}", nums[0]));
                continue;
            }
            let mut ranges = Vec::new();
            let mut start = nums[0];
            let mut prev = nums[0];
            for &n in &nums[1..] {
                if n == prev + 1 {
                    prev = n;
                    continue;
                }
                ranges.push(format_range(start, prev, width));
                start = n;
                prev = n;
            }
            ranges.push(format_range(start, prev, width));
            parts.push(format!("{prefix}[{}]", ranges.join(",")));
        }
        parts.extend(singles);
        parts.join(",")
    }
}

fn format_range(start: u64, end: u64, width: usize) -> String {
    if start == end {
        format!("{start:0width$}")
    } else {
        format!("{start:0width$}-{end:0width$}")
    }
}

/// Splits on commas that are not inside brackets.
fn split_top_level(expr: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in expr.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&expr[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&expr[start..]);
    parts
}

/// Upper bound on the hosts a single bracketed expression may expand to.
pub const MAX_EXPANDED_HOSTS: u64 = 65_536;

fn expand_item(item: &str) -> Result<Vec<String>, HarnessError> {
    let Some(open) = item.find('[') else {
        if item.contains(']') {
            return Err(invalid(item, "unbalanced ']'"));
        }
        return Ok(vec![item.to_string()]);
    };
    let close = item[open..]
        .find(']')
        .map(|i| i + open)
        .ok_or_else(|| invalid(item, "missing ']'"))?;

    let prefix = &item[..open];
    let body = &item[open + 1..close];
    let suffix = &item[close + 1..];

    // The suffix may itself contain another range.
    let tails = if suffix.is_empty() {
        vec![String::new()]
    } else {
        expand_item(suffix)?
    };

    let mut hosts = Vec::new();
    for range in body.split(',') {
        let range = range.trim();
        let (lo, hi) = match range.split_once('-') {
            Some((lo, hi)) => (lo, hi),
            None => (range, range),
        };
        let width = if lo.starts_with('0') && lo.len() > 1 { lo.len() } else { 0 };
        let lo_n: u64 = lo.parse().map_err(|_| invalid(item, "non-numeric range bound"))?;
        let hi_n: u64 = hi.parse().map_err(|_| invalid(item, "non-numeric range bound"))?;
        if hi_n < lo_n {
            return Err(invalid(item, "descending range"));
        }
        let count = (hi_n - lo_n).saturating_add(1).saturating_mul(tails.len() as u64);
        if (hosts.len() as u64).saturating_add(count) > MAX_EXPANDED_HOSTS {
            return Err(invalid(item, "range expands to too many hosts"));
        }
        for n in lo_n..=hi_n {
            for tail in &tails {
                hosts.push(format!("{prefix}{n:0width$}{tail}"));
            }
        }
    }
    Ok(hosts)
}

fn invalid(item: &str, reason: &str) -> HarnessError {
    HarnessError::Config(format!("invalid host expression '{item}': {reason}"))
}

impl fmt::Display for HostSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.compact())
    }
}

impl FromStr for HostSet {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HostSet::parse(s)
    }
}

impl<S: Into<String>> FromIterator<S> for HostSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = HostSet::new();
        for host in iter {
            set.insert(host);
        }
        set
    }
}

impl Serialize for HostSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.compact())
    }
}

impl<'de> Deserialize<'de> for HostSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        HostSet::parse(&raw).map_err(serde::de::Error::custom)
    }
}
