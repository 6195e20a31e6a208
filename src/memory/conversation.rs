//! 短期记忆：对话历史
//!
//! 首条 system 消息固定保留（携带操作说明与当前用户身份），其余消息超出上限时从最旧的开始淘汰。

use serde::{Deserialize, Serialize};

use crate::tools::ToolCall;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// tool 消息对应的调用 ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// assistant 消息发出的调用
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    /// 携带工具调用记录的 assistant 消息
    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    pub fn tool(content: impl Into<String>, tool_call_id: Option<String>) -> Self {
        Self {
            tool_call_id,
            ..Self::plain(Role::Tool, content)
        }
    }
}

/// 有上限的对话历史；max_messages 含固定的 system 消息
#[derive(Clone, Debug)]
pub struct ConversationMemory {
    pinned: Option<Message>,
    messages: Vec<Message>,
    max_messages: usize,
}

impl ConversationMemory {
    pub fn new(max_messages: usize) -> Self {
        Self {
            pinned: None,
            messages: Vec::new(),
            max_messages: max_messages.max(2),
        }
    }

    pub fn with_pinned(max_messages: usize, system: Message) -> Self {
        let mut memory = Self::new(max_messages);
        memory.pinned = Some(system);
        memory
    }

    pub fn pinned(&self) -> Option<&Message> {
        self.pinned.as_ref()
    }

    pub fn set_pinned(&mut self, system: Message) {
        self.pinned = Some(system);
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
        self.prune();
    }

    /// 非固定部分的消息
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// 发给模型的完整上下文（固定消息在前）
    pub fn to_context(&self) -> Vec<Message> {
        self.pinned
            .iter()
            .cloned()
            .chain(self.messages.iter().cloned())
            .collect()
    }

    /// 截断回固定消息
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// 超出上限时丢弃最旧的非固定消息；开头残留的 tool 消息一并丢弃（其 assistant 调用已被淘汰）
    fn prune(&mut self) {
        let budget = self.max_messages - usize::from(self.pinned.is_some());
        if self.messages.len() > budget {
            let excess = self.messages.len() - budget;
            self.messages.drain(..excess);
        }
        let orphans = self
            .messages
            .iter()
            .take_while(|m| m.role == Role::Tool)
            .count();
        if orphans > 0 {
            self.messages.drain(..orphans);
        }
    }

    /// 总条数（含固定消息）
    pub fn len(&self) -> usize {
        self.messages.len() + usize::from(self.pinned.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
