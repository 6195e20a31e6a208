//! 任务模型：ID、状态、任务记录

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::AgentError;

/// 任务 ID（由 TaskStore 分配，单调递增）
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 任务状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// 终态：已完成或已取消（不再参与过期 / 即将到期检查）
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }

    /// 展示用中文标签
    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "待处理",
            TaskStatus::InProgress => "进行中",
            TaskStatus::Completed => "已完成",
            TaskStatus::Cancelled => "已取消",
        }
    }

    pub fn marker(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "⏳",
            TaskStatus::InProgress => "🔄",
            TaskStatus::Completed => "✅",
            TaskStatus::Cancelled => "❌",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| {
                AgentError::Validation(format!(
                    "invalid status: '{s}' (expected pending, in_progress, completed or cancelled)"
                ))
            })
    }
}

/// 任务记录
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub content: String,
    pub creator_id: String,
    pub create_time: DateTime<Utc>,
    pub due_time: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    /// 仅在转入 completed 时写入，其他状态切换不清除
    pub completed_time: Option<DateTime<Utc>>,
    /// 前置依赖（边：本任务 -> 依赖）
    pub dependencies: BTreeSet<TaskId>,
}

impl Task {
    pub fn depends_on(&self, other: TaskId) -> bool {
        self.dependencies.contains(&other)
    }

    /// 未结束且截止时间早于 now
    pub fn is_overdue_at(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.due_time.is_some_and(|due| due < now)
    }

    /// 未结束且 now < 截止时间 < deadline
    pub fn is_due_between(&self, now: DateTime<Utc>, deadline: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.due_time.is_some_and(|due| now < due && due < deadline)
    }
}

/// 创建任务请求
#[derive(Clone, Debug, Default)]
pub struct NewTask {
    pub title: Option<String>,
    pub content: String,
    pub creator_id: String,
    pub due_time: Option<DateTime<Utc>>,
    pub dependencies: Vec<TaskId>,
}

impl NewTask {
    pub fn new(content: impl Into<String>, creator_id: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            creator_id: creator_id.into(),
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_due_time(mut self, due: DateTime<Utc>) -> Self {
        self.due_time = Some(due);
        self
    }

    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = TaskId>) -> Self {
        self.dependencies = deps.into_iter().collect();
        self
    }
}

/// 字段更新：只更新显式提供的字段
#[derive(Clone, Debug, Default)]
pub struct FieldUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub due_time: Option<DateTime<Utc>>,
}

impl FieldUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none() && self.due_time.is_none()
    }
}

/// 标题缺省时取内容前 50 个字符
pub const TITLE_PREVIEW_CHARS: usize = 50;

pub fn derive_title(content: &str) -> String {
    let content = content.trim();
    if content.chars().count() > TITLE_PREVIEW_CHARS {
        format!(
            "{}...",
            content.chars().take(TITLE_PREVIEW_CHARS).collect::<String>()
        )
    } else {
        content.to_string()
    }
}
