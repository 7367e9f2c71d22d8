//! # Command Builder Module / 命令构建模块
//!
//! Renders a tool invocation from a base executable name and an ordered set
//! of named parameters. Only parameters whose value differs from their default
//! appear in the output, and the reserved `command`/`action` words are always
//! appended after the flags.
//!
//! 根据基础可执行文件名和一组有序的命名参数渲染工具调用。
//! 只有值与默认值不同的参数才会出现在输出中，保留的 `command`/`action`
//! 词总是追加在标志之后。

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::errors::HarnessError;

const PLACEHOLDER: &str = "{}";
const COMMAND: &str = "command";
const ACTION: &str = "action";

/// A parameter value. / 参数值。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<String>),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{b}"),
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Str(s) => f.write_str(s),
            ParamValue::List(items) => f.write_str(&items.join(",")),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        ParamValue::Int(value.into())
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Str(value)
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(value: Vec<String>) -> Self {
        ParamValue::List(value)
    }
}

/// One named command-line parameter.
/// 一个命名的命令行参数。
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Format template, e.g. `--json` or `--pool={}`.
    pub template: String,
    /// `None` is the unset sentinel.
    pub default: Option<ParamValue>,
    pub value: Option<ParamValue>,
}

impl Parameter {
    fn is_default(&self) -> bool {
        self.value == self.default
    }

    /// Renders this parameter, or `None` when it must be omitted.
    fn render(&self, name: &str) -> Result<Option<String>, HarnessError> {
        if self.is_default() {
            return Ok(None);
        }
        let placeholders = self.template.matches(PLACEHOLDER).count();
        let template_error = |reason: &str| HarnessError::Template {
            name: name.to_string(),
            template: self.template.clone(),
            reason: reason.to_string(),
        };

        match &self.value {
            None | Some(ParamValue::Bool(false)) => Ok(None),
            Some(ParamValue::Bool(true)) => {
                if placeholders != 0 {
                    return Err(template_error("a flag template takes no placeholder"));
                }
                Ok(Some(self.template.clone()))
            }
            Some(ParamValue::List(items)) => {
                if placeholders != 1 {
                    return Err(template_error("expected exactly one '{}' placeholder"));
                }
                if items.is_empty() {
                    return Ok(None);
                }
                let rendered: Vec<String> = items
                    .iter()
                    .map(|item| self.template.replacen(PLACEHOLDER, item, 1))
                    .collect();
                Ok(Some(rendered.join(" ")))
            }
            Some(value) => {
                if placeholders != 1 {
                    return Err(template_error("expected exactly one '{}' placeholder"));
                }
                Ok(Some(self.template.replacen(PLACEHOLDER, &value.to_string(), 1)))
            }
        }
    }
}

/// Builds a command string from typed parameters.
/// 从类型化参数构建命令字符串。
///
/// ```
/// use ftest_runner::core::command::CommandBuilder;
/// let mut dmg = CommandBuilder::new("dmg").flag("json", "--json");
/// dmg.set("json", true).unwrap();
/// dmg.set("command", "pool").unwrap();
/// dmg.set("action", "list").unwrap();
/// assert_eq!(dmg.render().unwrap(), "dmg --json pool list");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct CommandBuilder {
    tool: String,
    params: Vec<(String, Parameter)>,
    command: Option<String>,
    action: Option<String>,
    /// Trailing positional words, rendered after the action.
    args: Vec<String>,
}

impl CommandBuilder {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            params: Vec::new(),
            command: None,
            action: None,
            args: Vec::new(),
        }
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// Registers a boolean flag that defaults to off.
    pub fn flag(self, name: &str, template: &str) -> Self {
        self.register(name, template, Some(ParamValue::Bool(false)))
    }

    /// Registers a valued parameter that defaults to unset.
    pub fn param(self, name: &str, template: &str) -> Self {
        self.register(name, template, None)
    }

    /// Registers a valued parameter with an explicit default; the parameter is
    /// only rendered once its value differs from that default.
    pub fn param_with_default(
        self,
        name: &str,
        template: &str,
        default: impl Into<ParamValue>,
    ) -> Self {
        self.register(name, template, Some(default.into()))
    }

    fn register(mut self, name: &str, template: &str, default: Option<ParamValue>) -> Self {
        let param = Parameter {
            template: template.to_string(),
            value: default.clone(),
            default,
        };
        match self.params.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = param,
            None => self.params.push((name.to_string(), param)),
        }
        self
    }

    /// Assigns a value. `command` and `action` set the positional words.
    pub fn set(
        &mut self,
        name: &str,
        value: impl Into<ParamValue>,
    ) -> Result<&mut Self, HarnessError> {
        let value = value.into();
        match name {
            COMMAND => self.command = Some(value.to_string()),
            ACTION => self.action = Some(value.to_string()),
            _ => {
                let param = self
                    .params
                    .iter_mut()
                    .find(|(n, _)| n == name)
                    .map(|(_, p)| p)
                    .ok_or_else(|| HarnessError::UnknownParameter(name.to_string()))?;
                param.value = Some(value);
            }
        }
        Ok(self)
    }

    /// Chaining form of [`CommandBuilder::set`].
    pub fn with(mut self, name: &str, value: impl Into<ParamValue>) -> Result<Self, HarnessError> {
        self.set(name, value)?;
        Ok(self)
    }

    /// Resets a parameter back to its default.
    pub fn reset(&mut self, name: &str) -> Result<&mut Self, HarnessError> {
        match name {
            COMMAND => self.command = None,
            ACTION => self.action = None,
            _ => {
                let param = self
                    .params
                    .iter_mut()
                    .find(|(n, _)| n == name)
                    .map(|(_, p)| p)
                    .ok_or_else(|| HarnessError::UnknownParameter(name.to_string()))?;
                param.value = param.default.clone();
            }
        }
        Ok(self)
    }

    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Appends a trailing word, e.g. the rendered options of a sub-command.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn has(&self, name: &str) -> bool {
        self.params.iter().any(|(n, _)| n == name)
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, p)| p.value.as_ref())
    }

    /// Renders `"<tool> <params> <command> <action> <args>"`.
    /// 渲染 `"<tool> <params> <command> <action> <args>"`。
    pub fn render(&self) -> Result<String, HarnessError> {
        let mut parts = vec![self.tool.clone()];
        for (name, param) in &self.params {
            if let Some(rendered) = param.render(name)? {
                parts.push(rendered);
            }
        }
        parts.extend(self.command.iter().cloned());
        parts.extend(self.action.iter().cloned());
        parts.extend(self.args.iter().cloned());
        Ok(parts
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" "))
    }
}
