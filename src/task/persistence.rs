//! 任务持久化
//!
//! TaskStore 在内存中维护任务图，每次变更先写入持久化层（单个 SQLite 事务），
//! 成功后才在内存中可见；写入失败则内存状态保持不变，不会出现「任务已存在但依赖边不完整」。

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::core::AgentError;
use crate::task::{Task, TaskId, TaskStatus};

/// 持久化接口：所有写操作须原子完成
pub trait TaskPersistence: Send + Sync {
    /// 启动时加载全部任务（含依赖边）
    fn load_all(&self) -> Result<Vec<Task>, AgentError>;

    /// 插入任务及其依赖边
    fn insert_task(&self, task: &Task) -> Result<(), AgentError>;

    /// 更新任务标量字段（标题、内容、截止时间、状态、完成时间）
    fn update_task(&self, task: &Task) -> Result<(), AgentError>;

    /// 替换任务的全部依赖边
    fn replace_dependencies(&self, id: TaskId, deps: &BTreeSet<TaskId>) -> Result<(), AgentError>;

    /// 删除任务及其出边
    fn delete_task(&self, id: TaskId) -> Result<(), AgentError>;
}

/// 纯内存模式：不落盘
#[derive(Debug, Default)]
pub struct MemoryPersistence;

impl TaskPersistence for MemoryPersistence {
    fn load_all(&self) -> Result<Vec<Task>, AgentError> {
        Ok(Vec::new())
    }

    fn insert_task(&self, _task: &Task) -> Result<(), AgentError> {
        Ok(())
    }

    fn update_task(&self, _task: &Task) -> Result<(), AgentError> {
        Ok(())
    }

    fn replace_dependencies(&self, _id: TaskId, _deps: &BTreeSet<TaskId>) -> Result<(), AgentError> {
        Ok(())
    }

    fn delete_task(&self, _id: TaskId) -> Result<(), AgentError> {
        Ok(())
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    id             INTEGER PRIMARY KEY,
    title          TEXT NOT NULL,
    content        TEXT NOT NULL,
    creator_id     TEXT NOT NULL,
    create_time    TEXT NOT NULL,
    due_time       TEXT,
    status         TEXT NOT NULL,
    completed_time TEXT
);
CREATE TABLE IF NOT EXISTS task_dependencies (
    task_id       INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    dependency_id INTEGER NOT NULL,
    PRIMARY KEY (task_id, dependency_id)
);
CREATE INDEX IF NOT EXISTS idx_task_dependencies_dependency ON task_dependencies(dependency_id);
";

/// SQLite 持久化（同步 rusqlite，连接由 Mutex 保护）
pub struct SqlitePersistence {
    conn: Mutex<Connection>,
}

impl SqlitePersistence {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| AgentError::Storage(format!("create {}: {e}", parent.display())))?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self, AgentError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, AgentError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<R>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<R, rusqlite::Error>,
    ) -> Result<R, AgentError> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| AgentError::Storage("sqlite connection lock poisoned".to_string()))?;
        f(&mut conn).map_err(AgentError::from)
    }
}

fn insert_edges(
    tx: &rusqlite::Transaction<'_>,
    id: TaskId,
    deps: &BTreeSet<TaskId>,
) -> Result<(), rusqlite::Error> {
    let mut stmt =
        tx.prepare("INSERT INTO task_dependencies (task_id, dependency_id) VALUES (?1, ?2)")?;
    for dep in deps {
        stmt.execute(params![id.0 as i64, dep.0 as i64])?;
    }
    Ok(())
}

impl TaskPersistence for SqlitePersistence {
    fn load_all(&self) -> Result<Vec<Task>, AgentError> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, content, creator_id, create_time, due_time, status, completed_time
                 FROM tasks ORDER BY id",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, DateTime<Utc>>(4)?,
                        row.get::<_, Option<DateTime<Utc>>>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, Option<DateTime<Utc>>>(7)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        let mut tasks = Vec::with_capacity(rows.len());
        for (id, title, content, creator_id, create_time, due_time, status, completed_time) in rows {
            let id = TaskId(id as u64);
            let status: TaskStatus = status.parse().map_err(|e: AgentError| {
                AgentError::Storage(format!("task {id} has corrupt status: {e}"))
            })?;
            let dependencies = self.with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT dependency_id FROM task_dependencies WHERE task_id = ?1",
                )?;
                let deps = stmt
                    .query_map(params![id.0 as i64], |row| row.get::<_, i64>(0))?
                    .map(|r| r.map(|d| TaskId(d as u64)))
                    .collect::<Result<BTreeSet<_>, _>>()?;
                Ok(deps)
            })?;
            tasks.push(Task {
                id,
                title,
                content,
                creator_id,
                create_time,
                due_time,
                status,
                completed_time,
                dependencies,
            });
        }
        Ok(tasks)
    }

    fn insert_task(&self, task: &Task) -> Result<(), AgentError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO tasks (id, title, content, creator_id, create_time, due_time, status, completed_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    task.id.0 as i64,
                    task.title,
                    task.content,
                    task.creator_id,
                    task.create_time,
                    task.due_time,
                    task.status.as_str(),
                    task.completed_time,
                ],
            )?;
            insert_edges(&tx, task.id, &task.dependencies)?;
            tx.commit()
        })
    }

    fn update_task(&self, task: &Task) -> Result<(), AgentError> {
        let updated = self.with_conn(|conn| {
            conn.execute(
                "UPDATE tasks SET title = ?2, content = ?3, due_time = ?4, status = ?5, completed_time = ?6
                 WHERE id = ?1",
                params![
                    task.id.0 as i64,
                    task.title,
                    task.content,
                    task.due_time,
                    task.status.as_str(),
                    task.completed_time,
                ],
            )
        })?;
        if updated == 0 {
            return Err(AgentError::Storage(format!("task {} missing from database", task.id)));
        }
        Ok(())
    }

    fn replace_dependencies(&self, id: TaskId, deps: &BTreeSet<TaskId>) -> Result<(), AgentError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM task_dependencies WHERE task_id = ?1",
                params![id.0 as i64],
            )?;
            insert_edges(&tx, id, deps)?;
            tx.commit()
        })
    }

    fn delete_task(&self, id: TaskId) -> Result<(), AgentError> {
        let blocker = self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let referenced_by: Option<i64> = tx
                .query_row(
                    "SELECT task_id FROM task_dependencies WHERE dependency_id = ?1 LIMIT 1",
                    params![id.0 as i64],
                    |row| row.get(0),
                )
                .optional()?;
            if referenced_by.is_some() {
                // 事务随 tx drop 回滚
                return Ok(referenced_by);
            }
            tx.execute(
                "DELETE FROM task_dependencies WHERE task_id = ?1",
                params![id.0 as i64],
            )?;
            tx.execute("DELETE FROM tasks WHERE id = ?1", params![id.0 as i64])?;
            tx.commit()?;
            Ok(None)
        })?;
        match blocker {
            Some(dependent) => Err(AgentError::Storage(format!(
                "task {id} still referenced by task {dependent} in database"
            ))),
            None => Ok(()),
        }
    }
}
