//! 命令注册表
//!
//! 所有命令实现 Command trait（name / description / params / run），由 CommandRegistry 按注册顺序保存，
//! 参数在调用前按声明做别名归一、身份注入、必填校验与类型转换，转换后的结果放在 CommandArgs 中。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::AgentError;
use crate::task::TaskId;
use crate::tools::schema;
use crate::tools::value::{
    coerce_number, coerce_task_id, coerce_task_id_list, coerce_text, ArgMap, ArgValue, ParamKind,
};

/// 参数声明
#[derive(Clone, Debug)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub description: &'static str,
    /// 可接受的别名键，调用前归一到 name
    pub aliases: &'static [&'static str],
    /// 非空时只接受这些取值
    pub allowed: &'static [&'static str],
    /// 缺省或为空时注入当前会话的用户身份
    pub caller_identity: bool,
}

impl ParamSpec {
    pub const fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            description,
            aliases: &[],
            allowed: &[],
            caller_identity: false,
        }
    }

    pub const fn optional(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }

    pub const fn with_aliases(mut self, aliases: &'static [&'static str]) -> Self {
        self.aliases = aliases;
        self
    }

    pub const fn with_allowed(mut self, allowed: &'static [&'static str]) -> Self {
        self.allowed = allowed;
        self
    }

    pub const fn caller_identity(mut self) -> Self {
        self.caller_identity = true;
        self
    }
}

/// 目录条目：提供给模型的 {name, description, parameters}
#[derive(Clone, Debug)]
pub struct CommandSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
}

impl CommandSpec {
    /// 参数 JSON Schema
    pub fn parameters_schema(&self) -> serde_json::Value {
        schema::parameters_schema(&self.params)
    }
}

/// 调用上下文：当前会话与用户身份
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    pub user_id: String,
    pub conversation_id: String,
}

impl CallContext {
    pub fn new(user_id: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            conversation_id: conversation_id.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Coerced {
    Text(String),
    Number(f64),
    TaskId(TaskId),
    TaskIds(Vec<TaskId>),
}

/// 已校验、已转换的参数
#[derive(Debug, Default)]
pub struct CommandArgs {
    values: BTreeMap<&'static str, Coerced>,
    warnings: Vec<String>,
    pub ctx: CallContext,
}

impl CommandArgs {
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(Coerced::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn require_text(&self, name: &str) -> Result<&str, AgentError> {
        self.text(name)
            .ok_or_else(|| AgentError::Validation(format!("missing required parameter '{name}'")))
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        match self.values.get(name) {
            Some(Coerced::Number(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn task_id(&self, name: &str) -> Option<TaskId> {
        match self.values.get(name) {
            Some(Coerced::TaskId(id)) => Some(*id),
            _ => None,
        }
    }

    pub fn require_task_id(&self, name: &str) -> Result<TaskId, AgentError> {
        self.task_id(name)
            .ok_or_else(|| AgentError::Validation(format!("missing required parameter '{name}'")))
    }

    pub fn task_ids(&self, name: &str) -> Option<&[TaskId]> {
        match self.values.get(name) {
            Some(Coerced::TaskIds(ids)) => Some(ids.as_slice()),
            _ => None,
        }
    }

    /// 处理器可追加警告（随结果一起返回）
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }
}

/// 命令 trait
#[async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &str;

    /// 供模型理解用途
    fn description(&self) -> &str;

    fn params(&self) -> &[ParamSpec];

    async fn run(&self, args: &mut CommandArgs) -> Result<String, AgentError>;
}

/// 命令注册表：保持注册顺序（即目录顺序）
#[derive(Default)]
pub struct CommandRegistry {
    commands: Vec<Arc<dyn Command>>,
    index: HashMap<String, usize>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同名命令覆盖原位置
    pub fn register(&mut self, command: impl Command + 'static) {
        let name = command.name().to_string();
        let command: Arc<dyn Command> = Arc::new(command);
        match self.index.get(&name) {
            Some(&pos) => self.commands[pos] = command,
            None => {
                self.index.insert(name, self.commands.len());
                self.commands.push(command);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Command>> {
        self.index.get(name).map(|&pos| Arc::clone(&self.commands[pos]))
    }

    pub fn names(&self) -> Vec<String> {
        self.commands.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn catalog(&self) -> Vec<CommandSpec> {
        self.commands
            .iter()
            .map(|c| CommandSpec {
                name: c.name().to_string(),
                description: c.description().to_string(),
                params: c.params().to_vec(),
            })
            .collect()
    }
}

/// 按参数声明归一、注入并转换原始参数
pub fn prepare_args(
    params: &[ParamSpec],
    mut raw: ArgMap,
    ctx: &CallContext,
) -> Result<CommandArgs, AgentError> {
    let mut args = CommandArgs {
        ctx: ctx.clone(),
        ..CommandArgs::default()
    };

    for spec in params {
        let canonical_missing = raw.get(spec.name).map_or(true, ArgValue::is_blank);
        if canonical_missing {
            if let Some(value) = spec
                .aliases
                .iter()
                .find_map(|alias| raw.remove(*alias).filter(|v| !v.is_blank()))
            {
                raw.insert(spec.name.to_string(), value);
            }
        }

        if spec.caller_identity
            && raw.get(spec.name).map_or(true, ArgValue::is_blank)
            && !ctx.user_id.trim().is_empty()
        {
            raw.insert(spec.name.to_string(), ArgValue::Text(ctx.user_id.clone()));
        }

        let value = match raw.remove(spec.name) {
            Some(v) if !v.is_blank() => v,
            _ if spec.required => {
                return Err(AgentError::Validation(format!(
                    "missing required parameter '{}'",
                    spec.name
                )));
            }
            _ => continue,
        };

        let coerced = match spec.kind {
            ParamKind::Text => coerce_text(&value).map(Coerced::Text),
            ParamKind::Number => coerce_number(&value).map(Coerced::Number),
            ParamKind::TaskId => coerce_task_id(&value).map(Coerced::TaskId),
            ParamKind::TaskIdList => {
                let (ids, warnings) = coerce_task_id_list(&value);
                for w in warnings {
                    tracing::warn!(param = spec.name, "{}", w);
                    args.warn(format!("{}: {w}", spec.name));
                }
                Some(Coerced::TaskIds(ids))
            }
        };

        let coerced = match coerced {
            Some(c) => c,
            None if spec.required => {
                return Err(AgentError::Validation(format!(
                    "parameter '{}' must be a {}, got {}",
                    spec.name,
                    spec.kind.name(),
                    value.kind_name()
                )));
            }
            None => {
                let msg = format!(
                    "ignored parameter '{}': expected {}, got {}",
                    spec.name,
                    spec.kind.name(),
                    value.kind_name()
                );
                tracing::warn!("{}", msg);
                args.warn(msg);
                continue;
            }
        };

        if let Coerced::Text(s) = &coerced {
            if !spec.allowed.is_empty() && !spec.allowed.contains(&s.as_str()) {
                return Err(AgentError::Validation(format!(
                    "invalid value '{}' for '{}' (expected one of: {})",
                    s,
                    spec.name,
                    spec.allowed.join(", ")
                )));
            }
        }

        args.values.insert(spec.name, coerced);
    }

    if !raw.is_empty() {
        tracing::debug!(ignored = ?raw.keys().collect::<Vec<_>>(), "Undeclared arguments ignored");
    }
    Ok(args)
}
