//! Headless Agent 运行时
//!
//! 供聊天传输层（控制台、IM 机器人等）调用的无界面装配逻辑：
//! create_llm_from_config 选择模型后端，open_task_store 打开任务存储，
//! build_agent 把存储、命令分发器、编排器与会话存储串起来。

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::core::AgentError;
use crate::gateway::SessionStore;
use crate::llm::{DeepSeekClient, LlmClient, MockLlmClient};
use crate::react::ToolCallOrchestrator;
use crate::task::{ReminderSettings, SqlitePersistence, TaskStore};
use crate::tools::{register_task_commands, CommandDispatcher, CommandRegistry};

/// 装配好的组件，可在多个会话间共享
pub struct TaskAgent {
    pub store: Arc<TaskStore>,
    pub dispatcher: Arc<CommandDispatcher>,
    pub orchestrator: Arc<ToolCallOrchestrator>,
    pub sessions: Arc<SessionStore>,
}

impl TaskAgent {
    /// 处理一条用户消息
    pub async fn handle(&self, conversation_id: &str, user_identity: &str, text: &str) -> String {
        self.sessions.turn(conversation_id, user_identity, text).await
    }
}

/// 根据 [llm].provider 创建客户端：deepseek（默认）/ mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Result<Arc<dyn LlmClient>, AgentError> {
    match cfg.llm.provider.to_ascii_lowercase().as_str() {
        "mock" => {
            tracing::info!("Using mock LLM client");
            Ok(Arc::new(MockLlmClient))
        }
        "deepseek" => {
            let client = DeepSeekClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                cfg.llm.api_key.as_deref(),
                cfg.llm.request_timeout_secs,
            )?;
            tracing::info!("Using DeepSeek model {}", cfg.llm.model);
            Ok(Arc::new(client))
        }
        other => Err(AgentError::Config(format!("unknown llm provider: {other}"))),
    }
}

/// 打开任务存储：配置了 db_path 时使用 SQLite 写穿，否则仅内存
pub fn open_task_store(cfg: &AppConfig) -> Result<TaskStore, AgentError> {
    match &cfg.store.db_path {
        Some(path) => {
            let store = TaskStore::with_persistence(SqlitePersistence::open(path)?)?;
            tracing::info!("Task store opened at {}", path.display());
            Ok(store)
        }
        None => {
            tracing::info!("Task store is memory-only");
            Ok(TaskStore::in_memory())
        }
    }
}

pub fn reminder_settings(cfg: &AppConfig) -> ReminderSettings {
    ReminderSettings {
        interval: Duration::from_secs(cfg.reminder.interval_secs.max(1)),
        upcoming_window: chrono::Duration::hours(cfg.reminder.upcoming_window_hours as i64),
    }
}

/// 组装：命令注册 -> 分发器（带超时）-> 编排器（带轮数上限）-> 会话存储
pub fn build_agent(cfg: &AppConfig, llm: Arc<dyn LlmClient>, store: Arc<TaskStore>) -> TaskAgent {
    let mut registry = CommandRegistry::new();
    register_task_commands(&mut registry, store.clone());
    tracing::debug!("Registered {} commands", registry.len());

    let dispatcher = Arc::new(CommandDispatcher::new(registry, cfg.app.tool_timeout_secs));
    let orchestrator = Arc::new(
        ToolCallOrchestrator::new(llm, dispatcher.clone()).with_max_rounds(cfg.app.max_tool_rounds),
    );
    let sessions = Arc::new(SessionStore::new(
        orchestrator.clone(),
        cfg.app.max_context_messages,
    ));

    TaskAgent {
        store,
        dispatcher,
        orchestrator,
        sessions,
    }
}

/// 从配置创建完整 Agent
pub fn create_agent(cfg: &AppConfig) -> Result<TaskAgent, AgentError> {
    let llm = create_llm_from_config(cfg)?;
    let store = Arc::new(open_task_store(cfg)?);
    Ok(build_agent(cfg, llm, store))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".into();
        cfg
    }

    #[tokio::test]
    async fn test_create_agent_with_mock() {
        let agent = create_agent(&mock_config()).unwrap();
        assert_eq!(agent.dispatcher.command_names().len(), 11);
        assert_eq!(agent.orchestrator.max_rounds(), 5);
        let reply = agent.handle("c", "u", "hi").await;
        assert_eq!(reply, "Echo from Mock: hi");
    }

    #[test]
    fn test_unknown_provider_is_config_error() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "nope".into();
        assert!(matches!(create_llm_from_config(&cfg), Err(AgentError::Config(_))));
    }

    #[test]
    fn test_sqlite_store_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = mock_config();
        cfg.store.db_path = Some(dir.path().join("nested").join("tasks.db"));
        assert!(open_task_store(&cfg).is_ok());
    }
}
