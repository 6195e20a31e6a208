//! 会话存储
//!
//! conversation_id -> 会话。同一会话的回合严格串行（会话级互斥锁跨整个回合持有），
//! 不同会话可并发处理。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::Instrument;

use super::session::{ControlCommand, Session, HELP_TEXT, RESET_REPLY};
use crate::core::AgentError;
use crate::memory::Message;
use crate::react::ToolCallOrchestrator;
use crate::tools::CallContext;

/// 模型调用失败时的回复
pub const APOLOGY_REPLY: &str = "抱歉，处理您的请求时出现了问题，请稍后再试。";

/// 模型返回空内容时的回复
pub const EMPTY_REPLY: &str = "抱歉，我暂时无法处理这个请求，请稍后再试。";

/// 默认历史上限：15 轮问答 + 固定系统消息
pub const DEFAULT_MAX_CONTEXT_MESSAGES: usize = 31;

pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    orchestrator: Arc<ToolCallOrchestrator>,
    max_context_messages: usize,
}

impl SessionStore {
    pub fn new(orchestrator: Arc<ToolCallOrchestrator>, max_context_messages: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            orchestrator,
            max_context_messages: max_context_messages.max(3),
        }
    }

    /// 处理一条用户消息并返回回复文本；失败不会外泄为错误
    pub async fn turn(&self, conversation_id: &str, user_identity: &str, text: &str) -> String {
        let span = tracing::info_span!(
            "turn",
            request_id = %uuid::Uuid::new_v4(),
            conversation = %conversation_id,
        );
        self.turn_inner(conversation_id, user_identity, text)
            .instrument(span)
            .await
    }

    async fn turn_inner(&self, conversation_id: &str, user_identity: &str, text: &str) -> String {
        let session = self.get_or_create(conversation_id, user_identity).await;
        let mut session = session.lock().await;
        session.refresh_prompt(user_identity);

        match ControlCommand::parse(text) {
            Some(ControlCommand::Reset) => {
                session.reset();
                tracing::info!("conversation reset");
                return RESET_REPLY.to_string();
            }
            Some(ControlCommand::Transcript) => return session.transcript(),
            Some(ControlCommand::Help) => return HELP_TEXT.to_string(),
            None => {}
        }

        session.memory.push(Message::user(text));
        let ctx = CallContext::new(session.user_identity.clone(), conversation_id);
        let reply = match self
            .orchestrator
            .run_turn(session.memory.to_context(), &ctx)
            .await
        {
            Ok(outcome) => {
                tracing::info!(
                    rounds = outcome.rounds,
                    tools = outcome.tool_results.len(),
                    finish = ?outcome.finish,
                    "turn finished"
                );
                if outcome.reply.trim().is_empty() {
                    tracing::warn!("model returned empty reply");
                    EMPTY_REPLY.to_string()
                } else {
                    outcome.reply
                }
            }
            Err(e) => {
                log_turn_error(&e);
                APOLOGY_REPLY.to_string()
            }
        };
        session.memory.push(Message::assistant(reply.clone()));
        reply
    }

    async fn get_or_create(&self, conversation_id: &str, user_identity: &str) -> Arc<Mutex<Session>> {
        if let Some(session) = self.sessions.read().await.get(conversation_id) {
            return session.clone();
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(conversation_id.to_string())
            .or_insert_with(|| {
                tracing::info!(conversation = %conversation_id, "new conversation");
                Arc::new(Mutex::new(Session::new(
                    conversation_id,
                    user_identity,
                    self.max_context_messages,
                )))
            })
            .clone()
    }

    /// 发给模型的完整上下文（含固定系统消息）
    pub async fn history(&self, conversation_id: &str) -> Option<Vec<Message>> {
        let session = self.sessions.read().await.get(conversation_id)?.clone();
        let session = session.lock().await;
        Some(session.memory.to_context())
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn remove(&self, conversation_id: &str) -> bool {
        self.sessions.write().await.remove(conversation_id).is_some()
    }
}

fn log_turn_error(e: &AgentError) {
    match e {
        AgentError::Transport(_) => tracing::warn!(error = %e, "model provider unavailable"),
        _ => tracing::error!(error = %e, "turn failed"),
    }
}
