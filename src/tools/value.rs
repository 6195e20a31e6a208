//! 工具调用参数：小型带标签值类型与按参数声明的类型转换
//!
//! 模型给出的参数是弱类型 JSON，这里先转成 ArgValue，再由命令声明的 ParamKind 逐个转换。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::task::TaskId;

/// 参数值（字符串 / 数字 / 布尔 / 列表 / 空）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<ArgValue>),
}

pub type ArgMap = BTreeMap<String, ArgValue>;

impl From<serde_json::Value> for ArgValue {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value;
        match v {
            Value::Null => ArgValue::Null,
            Value::Bool(b) => ArgValue::Bool(b),
            Value::Number(n) => n.as_f64().map(ArgValue::Number).unwrap_or(ArgValue::Null),
            Value::String(s) => ArgValue::Text(s),
            Value::Array(items) => ArgValue::List(items.into_iter().map(ArgValue::from).collect()),
            // 嵌套对象不在任何命令的参数声明中，保留原文以便报错时展示
            obj @ Value::Object(_) => ArgValue::Text(obj.to_string()),
        }
    }
}

impl From<&str> for ArgValue {
    fn from(s: &str) -> Self {
        ArgValue::Text(s.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(s: String) -> Self {
        ArgValue::Text(s)
    }
}

impl From<f64> for ArgValue {
    fn from(n: f64) -> Self {
        ArgValue::Number(n)
    }
}

impl From<u64> for ArgValue {
    fn from(n: u64) -> Self {
        ArgValue::Number(n as f64)
    }
}

impl ArgValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ArgValue::Null => "null",
            ArgValue::Bool(_) => "boolean",
            ArgValue::Number(_) => "number",
            ArgValue::Text(_) => "string",
            ArgValue::List(_) => "array",
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            ArgValue::Null => Value::Null,
            ArgValue::Bool(b) => Value::Bool(*b),
            ArgValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ArgValue::Text(s) => Value::String(s.clone()),
            ArgValue::List(items) => Value::Array(items.iter().map(ArgValue::to_json).collect()),
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            ArgValue::Null => true,
            ArgValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

/// JSON 对象 -> ArgMap；null 视为空参数
pub fn args_from_json(value: serde_json::Value) -> Result<ArgMap, AgentError> {
    match value {
        serde_json::Value::Object(map) => Ok(map.into_iter().map(|(k, v)| (k, v.into())).collect()),
        serde_json::Value::Null => Ok(ArgMap::new()),
        other => Err(AgentError::Parse(format!(
            "tool arguments must be a JSON object, got {}",
            ArgValue::from(other).kind_name()
        ))),
    }
}

/// 参数 JSON 文本 -> ArgMap；空串视为空参数
pub fn args_from_str(raw: &str) -> Result<ArgMap, AgentError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(ArgMap::new());
    }
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| AgentError::Parse(format!("invalid tool arguments JSON: {e}")))?;
    args_from_json(value)
}

pub fn args_to_json(args: &ArgMap) -> serde_json::Value {
    serde_json::Value::Object(args.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
}

/// 调用来源：结构化 tool_calls 或文本内嵌标记
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOrigin {
    Structured,
    TextEmbedded,
}

/// 一次工具调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// 模型提供的关联 ID（文本内嵌调用没有）
    pub id: Option<String>,
    pub name: String,
    pub arguments: ArgMap,
    pub origin: CallOrigin,
}

impl ToolCall {
    pub fn structured(id: impl Into<String>, name: impl Into<String>, arguments: ArgMap) -> Self {
        Self {
            id: Some(id.into()),
            name: name.into(),
            arguments,
            origin: CallOrigin::Structured,
        }
    }

    pub fn text_embedded(name: impl Into<String>, arguments: ArgMap) -> Self {
        Self {
            id: None,
            name: name.into(),
            arguments,
            origin: CallOrigin::TextEmbedded,
        }
    }
}

/// 参数声明的值类型
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    Text,
    Number,
    TaskId,
    TaskIdList,
}

impl ParamKind {
    pub fn name(&self) -> &'static str {
        match self {
            ParamKind::Text => "string",
            ParamKind::Number => "number",
            ParamKind::TaskId => "task id",
            ParamKind::TaskIdList => "list of task ids",
        }
    }
}

pub fn coerce_text(v: &ArgValue) -> Option<String> {
    match v {
        ArgValue::Text(s) => Some(s.trim().to_string()),
        ArgValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => Some(format!("{}", *n as i64)),
        ArgValue::Number(n) => Some(n.to_string()),
        ArgValue::Bool(b) => Some(b.to_string()),
        ArgValue::Null | ArgValue::List(_) => None,
    }
}

pub fn coerce_number(v: &ArgValue) -> Option<f64> {
    match v {
        ArgValue::Number(n) if n.is_finite() => Some(*n),
        ArgValue::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

/// f64 能精确表示的最大整数（2^53）
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// 非负整数或数字字符串
pub fn coerce_task_id(v: &ArgValue) -> Option<TaskId> {
    match v {
        ArgValue::Number(n) if *n >= 0.0 && n.fract() == 0.0 && *n < MAX_EXACT_INTEGER => {
            Some(TaskId(*n as u64))
        }
        ArgValue::Text(s) => s.trim().parse::<u64>().ok().map(TaskId),
        _ => None,
    }
}

/// 逐元素转换；无法转换的元素丢弃并返回警告。单个标量视为单元素列表，null 视为空列表
pub fn coerce_task_id_list(v: &ArgValue) -> (Vec<TaskId>, Vec<String>) {
    let items: Vec<&ArgValue> = match v {
        ArgValue::List(items) => items.iter().collect(),
        ArgValue::Null => Vec::new(),
        scalar => vec![scalar],
    };
    let mut ids = Vec::with_capacity(items.len());
    let mut warnings = Vec::new();
    for item in items {
        match coerce_task_id(item) {
            Some(id) => ids.push(id),
            None => warnings.push(format!(
                "ignored invalid task id {} ({})",
                item.to_json(),
                item.kind_name()
            )),
        }
    }
    (ids, warnings)
}
