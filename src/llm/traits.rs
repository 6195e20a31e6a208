//! LLM 客户端抽象
//!
//! 所有后端（DeepSeek / Mock / 脚本化测试客户端）实现 LlmClient：
//! 输入对话历史与可选的命令目录，返回文本和 / 或结构化工具调用。

use async_trait::async_trait;

use crate::core::AgentError;
use crate::memory::Message;
use crate::tools::CommandSpec;

/// 模型返回的结构化调用（参数为原始 JSON 文本，由编排层解析）
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl RawToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// 单轮回复
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelReply {
    pub text: String,
    pub tool_calls: Vec<RawToolCall>,
}

impl ModelReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_calls(text: impl Into<String>, tool_calls: Vec<RawToolCall>) -> Self {
        Self {
            text: text.into(),
            tool_calls,
        }
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// catalog 为 None 时不提供工具（促使模型给出最终回答）
    async fn chat(
        &self,
        history: &[Message],
        catalog: Option<&[CommandSpec]>,
    ) -> Result<ModelReply, AgentError>;

    fn model_name(&self) -> &str;
}
