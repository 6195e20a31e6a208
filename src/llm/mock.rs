//! Mock LLM 客户端（用于测试，无需 API）
//!
//! - MockLlmClient：回显最后一条 User 消息，便于本地跑通会话流程
//! - ScriptedLlmClient：按脚本依次返回回复，并记录每次请求（历史快照 + 是否提供了目录）

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::AgentError;
use crate::llm::{LlmClient, ModelReply};
use crate::memory::{Message, Role};
use crate::tools::CommandSpec;

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn chat(
        &self,
        history: &[Message],
        _catalog: Option<&[CommandSpec]>,
    ) -> Result<ModelReply, AgentError> {
        let last_user = history
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(ModelReply::text(format!("Echo from Mock: {last_user}")))
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

/// 一次被记录的请求
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub history: Vec<Message>,
    pub catalog_offered: bool,
}

/// 脚本化客户端：脚本耗尽后重复 fallback，没有 fallback 时返回 Transport 错误
#[derive(Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<ModelReply, AgentError>>>,
    fallback: Option<ModelReply>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedLlmClient {
    pub fn new(script: Vec<Result<ModelReply, AgentError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 总是返回同一回复
    pub fn repeating(reply: ModelReply) -> Self {
        Self {
            fallback: Some(reply),
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn chat(
        &self,
        history: &[Message],
        catalog: Option<&[CommandSpec]>,
    ) -> Result<ModelReply, AgentError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(RecordedRequest {
                history: history.to_vec(),
                catalog_offered: catalog.is_some_and(|c| !c.is_empty()),
            });
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(reply) => reply,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| AgentError::Transport("script exhausted".into())),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_echoes_last_user_message() {
        let reply = MockLlmClient
            .chat(&[Message::user("first"), Message::user("second")], None)
            .await
            .unwrap();
        assert_eq!(reply.text, "Echo from Mock: second");
        assert!(reply.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn test_scripted_replays_then_errors() {
        let llm = ScriptedLlmClient::new(vec![Ok(ModelReply::text("one"))]);
        assert_eq!(llm.chat(&[], None).await.unwrap().text, "one");
        assert!(matches!(llm.chat(&[], None).await, Err(AgentError::Transport(_))));
        assert_eq!(llm.call_count(), 2);
    }
}
