//! TaskStore：任务图的唯一所有者
//!
//! 所有写操作在同一把写锁内完成「校验 + 持久化 + 内存提交」，
//! 因此环检测与边替换对并发更新是原子的；读操作持读锁，只会看到完整提交后的快照。

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::core::AgentError;
use crate::task::format;
use crate::task::graph::{self, DependencyView};
use crate::task::model::derive_title;
use crate::task::persistence::{MemoryPersistence, TaskPersistence};
use crate::task::{FieldUpdate, NewTask, Task, TaskId, TaskStatus};

struct TaskGraph {
    tasks: BTreeMap<TaskId, Task>,
    next_id: u64,
}

impl TaskGraph {
    fn get(&self, id: TaskId) -> Result<&Task, AgentError> {
        self.tasks
            .get(&id)
            .ok_or_else(|| AgentError::NotFound(format!("task {id}")))
    }

    fn ensure_exist(&self, ids: &BTreeSet<TaskId>) -> Result<(), AgentError> {
        match ids.iter().find(|id| !self.tasks.contains_key(id)) {
            Some(missing) => Err(AgentError::NotFound(format!("dependency task {missing}"))),
            None => Ok(()),
        }
    }
}

/// 依赖感知的任务存储
pub struct TaskStore {
    graph: RwLock<TaskGraph>,
    persistence: Box<dyn TaskPersistence>,
}

impl TaskStore {
    /// 纯内存存储
    pub fn in_memory() -> Self {
        Self {
            graph: RwLock::new(TaskGraph {
                tasks: BTreeMap::new(),
                next_id: 1,
            }),
            persistence: Box::new(MemoryPersistence),
        }
    }

    /// 从持久化层加载，ID 计数器接续已有最大 ID
    pub fn with_persistence(persistence: impl TaskPersistence + 'static) -> Result<Self, AgentError> {
        let loaded = persistence.load_all()?;
        let tasks: BTreeMap<TaskId, Task> = loaded.into_iter().map(|t| (t.id, t)).collect();
        graph::validate_all(&tasks)?;
        let next_id = tasks.keys().next_back().map(|id| id.0 + 1).unwrap_or(1);
        info!(tasks = tasks.len(), next_id, "Task store loaded");
        Ok(Self {
            graph: RwLock::new(TaskGraph { tasks, next_id }),
            persistence: Box::new(persistence),
        })
    }

    pub async fn create(&self, new: NewTask) -> Result<Task, AgentError> {
        let content = new.content.trim();
        if content.is_empty() {
            return Err(AgentError::Validation("content must not be empty".into()));
        }
        let creator_id = new.creator_id.trim();
        if creator_id.is_empty() {
            return Err(AgentError::Validation("creator_id must not be empty".into()));
        }
        let title = match new.title.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => derive_title(content),
        };
        let dependencies: BTreeSet<TaskId> = new.dependencies.into_iter().collect();

        let mut graph = self.graph.write().await;
        graph.ensure_exist(&dependencies)?;
        DependencyView::new(&graph.tasks).check_from(&dependencies, None)?;

        let task = Task {
            id: TaskId(graph.next_id),
            title,
            content: content.to_string(),
            creator_id: creator_id.to_string(),
            create_time: Utc::now(),
            due_time: new.due_time,
            status: TaskStatus::Pending,
            completed_time: None,
            dependencies,
        };
        self.persistence.insert_task(&task)?;
        graph.next_id += 1;
        graph.tasks.insert(task.id, task.clone());
        info!(task_id = %task.id, creator = %task.creator_id, deps = task.dependencies.len(), "Task created");
        Ok(task)
    }

    /// 以新边集整体替换依赖；空集表示清除全部依赖
    pub async fn update_dependencies(
        &self,
        id: TaskId,
        dependencies: Vec<TaskId>,
    ) -> Result<Task, AgentError> {
        let dependencies: BTreeSet<TaskId> = dependencies.into_iter().collect();

        let mut graph = self.graph.write().await;
        graph.get(id)?;
        graph.ensure_exist(&dependencies)?;
        DependencyView::new(&graph.tasks)
            .with_overlay(id, &dependencies)
            .check_from(&dependencies, Some(id))?;

        self.persistence.replace_dependencies(id, &dependencies)?;
        let task = graph
            .tasks
            .get_mut(&id)
            .ok_or_else(|| AgentError::NotFound(format!("task {id}")))?;
        task.dependencies = dependencies;
        info!(task_id = %id, deps = task.dependencies.len(), "Task dependencies replaced");
        Ok(task.clone())
    }

    pub async fn delete(&self, id: TaskId) -> Result<Task, AgentError> {
        let mut graph = self.graph.write().await;
        graph.get(id)?;
        let dependents = graph::dependents_of(&graph.tasks, id);
        if !dependents.is_empty() {
            return Err(AgentError::ReferentialIntegrity {
                task_id: id,
                dependents,
            });
        }
        self.persistence.delete_task(id)?;
        let removed = graph
            .tasks
            .remove(&id)
            .ok_or_else(|| AgentError::NotFound(format!("task {id}")))?;
        info!(task_id = %id, "Task deleted");
        Ok(removed)
    }

    /// 转入 completed 时记录完成时间；已是 completed 的任务保留原完成时间
    pub async fn update_status(&self, id: TaskId, status: TaskStatus) -> Result<Task, AgentError> {
        self.mutate(id, |task| {
            if status == TaskStatus::Completed && task.status != TaskStatus::Completed {
                task.completed_time = Some(Utc::now());
            }
            task.status = status;
            Ok(())
        })
        .await
    }

    pub async fn update_fields(&self, id: TaskId, update: FieldUpdate) -> Result<Task, AgentError> {
        if update.is_empty() {
            return Err(AgentError::Validation(
                "at least one of title, content or due_time must be supplied".into(),
            ));
        }
        self.mutate(id, move |task| {
            if let Some(title) = update.title {
                let title = title.trim();
                if title.is_empty() {
                    return Err(AgentError::Validation("title must not be empty".into()));
                }
                task.title = title.to_string();
            }
            if let Some(content) = update.content {
                let content = content.trim();
                if content.is_empty() {
                    return Err(AgentError::Validation("content must not be empty".into()));
                }
                task.content = content.to_string();
            }
            if let Some(due) = update.due_time {
                task.due_time = Some(due);
            }
            Ok(())
        })
        .await
    }

    /// 在副本上修改，持久化成功后再替换内存中的任务
    async fn mutate(
        &self,
        id: TaskId,
        f: impl FnOnce(&mut Task) -> Result<(), AgentError>,
    ) -> Result<Task, AgentError> {
        let mut graph = self.graph.write().await;
        let mut updated = graph.get(id)?.clone();
        f(&mut updated)?;
        self.persistence.update_task(&updated)?;
        graph.tasks.insert(id, updated.clone());
        debug!(task_id = %id, status = %updated.status, "Task updated");
        Ok(updated)
    }

    pub async fn get(&self, id: TaskId) -> Result<Task, AgentError> {
        self.graph.read().await.get(id).cloned()
    }

    /// 按创建时间倒序（同一时刻按 ID 倒序）
    pub async fn list(&self, status: Option<TaskStatus>, creator_id: Option<&str>) -> Vec<Task> {
        let graph = self.graph.read().await;
        let mut tasks: Vec<Task> = graph
            .tasks
            .values()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .filter(|t| creator_id.map_or(true, |c| t.creator_id == c))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.create_time.cmp(&a.create_time).then(b.id.cmp(&a.id)));
        tasks
    }

    pub async fn count(&self, status: Option<TaskStatus>) -> usize {
        let graph = self.graph.read().await;
        graph
            .tasks
            .values()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .count()
    }

    pub async fn overdue(&self) -> Vec<Task> {
        self.overdue_at(Utc::now()).await
    }

    /// 截止时间早于 now 的未结束任务，按截止时间升序
    pub async fn overdue_at(&self, now: DateTime<Utc>) -> Vec<Task> {
        let graph = self.graph.read().await;
        let mut tasks: Vec<Task> = graph
            .tasks
            .values()
            .filter(|t| t.is_overdue_at(now))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| (t.due_time, t.id));
        tasks
    }

    pub async fn upcoming(&self, window: Duration) -> Vec<Task> {
        self.upcoming_at(Utc::now(), window).await
    }

    /// now < 截止时间 < now + window 的未结束任务，按截止时间升序
    pub async fn upcoming_at(&self, now: DateTime<Utc>, window: Duration) -> Vec<Task> {
        let deadline = now + window;
        let graph = self.graph.read().await;
        let mut tasks: Vec<Task> = graph
            .tasks
            .values()
            .filter(|t| t.is_due_between(now, deadline))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| (t.due_time, t.id));
        tasks
    }

    /// 标题或内容包含关键词（不区分大小写）；空关键词匹配全部
    pub async fn search(&self, keyword: &str) -> Vec<Task> {
        let needle = keyword.trim().to_lowercase();
        let graph = self.graph.read().await;
        let mut tasks: Vec<Task> = graph
            .tasks
            .values()
            .filter(|t| {
                t.title.to_lowercase().contains(&needle) || t.content.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.create_time.cmp(&a.create_time).then(b.id.cmp(&a.id)));
        tasks
    }

    /// 任务详情文本（依赖标题在同一读快照内解析）
    pub async fn describe(&self, id: TaskId) -> Result<String, AgentError> {
        let graph = self.graph.read().await;
        let task = graph.get(id)?;
        Ok(format::task_detail(task, |dep| {
            graph.tasks.get(&dep).map(|t| t.title.as_str())
        }))
    }

    /// 描述一个已知的任务值，依赖标题取自当前快照
    pub async fn describe_task(&self, task: &Task) -> String {
        let graph = self.graph.read().await;
        format::task_detail(task, |dep| graph.tasks.get(&dep).map(|t| t.title.as_str()))
    }

    pub async fn len(&self) -> usize {
        self.graph.read().await.tasks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.graph.read().await.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_derives_title_and_assigns_monotonic_ids() {
        let store = TaskStore::in_memory();
        let a = store.create(NewTask::new("写周报", "alice")).await.unwrap();
        let b = store
            .create(NewTask::new("准备评审材料", "bob").with_title("评审"))
            .await
            .unwrap();
        assert_eq!(a.id, TaskId(1));
        assert_eq!(b.id, TaskId(2));
        assert_eq!(a.title, "写周报");
        assert_eq!(b.title, "评审");
    }

    #[tokio::test]
    async fn test_failed_create_does_not_consume_id() {
        let store = TaskStore::in_memory();
        let err = store
            .create(NewTask::new("x", "u").with_dependencies([TaskId(42)]))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::NotFound(_)));
        let ok = store.create(NewTask::new("y", "u")).await.unwrap();
        assert_eq!(ok.id, TaskId(1));
    }

    #[tokio::test]
    async fn test_update_fields_requires_something() {
        let store = TaskStore::in_memory();
        let t = store.create(NewTask::new("c", "u")).await.unwrap();
        let err = store.update_fields(t.id, FieldUpdate::default()).await.unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));

        let updated = store
            .update_fields(
                t.id,
                FieldUpdate {
                    title: Some("新标题".into()),
                    ..FieldUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.title, "新标题");
        assert_eq!(updated.content, "c");
    }

    #[tokio::test]
    async fn test_rejected_field_update_leaves_task_unchanged() {
        let store = TaskStore::in_memory();
        let t = store.create(NewTask::new("c", "u")).await.unwrap();
        let result = store
            .update_fields(
                t.id,
                FieldUpdate {
                    title: Some("ok".into()),
                    content: Some("   ".into()),
                    due_time: None,
                },
            )
            .await;
        assert!(result.is_err());
        assert_eq!(store.get(t.id).await.unwrap().title, "c");
    }

    #[tokio::test]
    async fn test_search_is_case_insensitive() {
        let store = TaskStore::in_memory();
        store.create(NewTask::new("Deploy Service", "u")).await.unwrap();
        store.create(NewTask::new("buy milk", "u")).await.unwrap();
        assert_eq!(store.search("deploy").await.len(), 1);
        assert_eq!(store.search("").await.len(), 2);
    }

    #[tokio::test]
    async fn test_describe_resolves_dependency_titles() {
        let store = TaskStore::in_memory();
        let a = store.create(NewTask::new("设计接口", "u")).await.unwrap();
        let b = store
            .create(NewTask::new("实现接口", "u").with_dependencies([a.id]))
            .await
            .unwrap();
        let text = store.describe(b.id).await.unwrap();
        assert!(text.contains("任务1(设计接口)"));
    }
}
