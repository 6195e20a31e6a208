//! Agent 错误类型
//!
//! 统一的错误分类：参数校验、未找到、循环依赖、引用完整性（命令层），
//! 传输 / 解析（编排层），以及单次工具调用的隔离故障。

use thiserror::Error;

use crate::task::TaskId;

/// 任务助手运行过程中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    /// 参数缺失、类型错误或取值非法
    #[error("Validation error: {0}")]
    Validation(String),

    /// 任务、依赖或命令不存在
    #[error("Not found: {0}")]
    NotFound(String),

    /// 更新后依赖关系将形成环
    #[error("Dependency cycle: task {task_id} would be reachable from itself via {via}")]
    Cycle { task_id: TaskId, via: TaskId },

    /// 仍被其他任务依赖，不能删除
    #[error("Cannot delete task {task_id}: {} task(s) depend on it ({})", dependents.len(), join_ids(dependents))]
    ReferentialIntegrity {
        task_id: TaskId,
        dependents: Vec<TaskId>,
    },

    /// 模型提供方调用失败
    #[error("Transport error: {0}")]
    Transport(String),

    /// 工具调用载荷格式错误（可恢复）
    #[error("Parse error: {0}")]
    Parse(String),

    /// 单个工具处理器内部 panic，已被隔离
    #[error("Tool {tool} panicked: {reason}")]
    ToolPanicked { tool: String, reason: String },

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    /// 持久化层失败
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl AgentError {
    /// 是否为命令层错误（作为单条命令的结果返回给用户，而非中止整轮）
    pub fn is_command_error(&self) -> bool {
        matches!(
            self,
            AgentError::Validation(_)
                | AgentError::NotFound(_)
                | AgentError::Cycle { .. }
                | AgentError::ReferentialIntegrity { .. }
        )
    }
}

impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        AgentError::Storage(e.to_string())
    }
}

fn join_ids(ids: &[TaskId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
