//! 任务存储集成测试：依赖图不变量与 SQLite 写穿

use std::collections::BTreeSet;
use std::sync::Arc;

use taskbee::core::AgentError;
use taskbee::task::{NewTask, SqlitePersistence, TaskId, TaskStatus, TaskStore};

fn reachable_from_itself(tasks: &[taskbee::task::Task], start: TaskId) -> bool {
    let mut stack: Vec<TaskId> = tasks
        .iter()
        .find(|t| t.id == start)
        .map(|t| t.dependencies.iter().copied().collect())
        .unwrap_or_default();
    let mut seen = BTreeSet::new();
    while let Some(id) = stack.pop() {
        if id == start {
            return true;
        }
        if !seen.insert(id) {
            continue;
        }
        if let Some(t) = tasks.iter().find(|t| t.id == id) {
            stack.extend(t.dependencies.iter().copied());
        }
    }
    false
}

#[tokio::test]
async fn test_create_with_unknown_dependency_persists_nothing() {
    let store = TaskStore::in_memory();
    store.create(NewTask::new("a", "u")).await.unwrap();
    let err = store
        .create(NewTask::new("b", "u").with_dependencies([TaskId(1), TaskId(99)]))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::NotFound(_)));
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_dependency_updates_never_create_cycle() {
    let store = TaskStore::in_memory();
    for i in 0..5 {
        store.create(NewTask::new(format!("t{i}"), "u")).await.unwrap();
    }
    // 每个组合都尝试一次，成功与否都不能让图出现环
    let ops: Vec<(u64, Vec<u64>)> = vec![
        (1, vec![2]),
        (2, vec![3]),
        (3, vec![1]),
        (3, vec![4, 5]),
        (5, vec![1]),
        (4, vec![2]),
        (4, vec![5]),
        (1, vec![1]),
        (2, vec![]),
        (3, vec![1]),
        (5, vec![3]),
    ];
    for (id, deps) in ops {
        let result = store
            .update_dependencies(TaskId(id), deps.into_iter().map(TaskId).collect())
            .await;
        if let Err(e) = &result {
            assert!(matches!(e, AgentError::Cycle { .. }), "unexpected error: {e}");
        }
        let tasks = store.list(None, None).await;
        for t in &tasks {
            assert!(!reachable_from_itself(&tasks, t.id), "task {} is on a cycle", t.id);
        }
    }
}

#[tokio::test]
async fn test_concurrent_dependency_updates_stay_acyclic() {
    let store = Arc::new(TaskStore::in_memory());
    store.create(NewTask::new("a", "u")).await.unwrap();
    store.create(NewTask::new("b", "u")).await.unwrap();

    let s1 = store.clone();
    let s2 = store.clone();
    let (r1, r2) = tokio::join!(
        tokio::spawn(async move { s1.update_dependencies(TaskId(1), vec![TaskId(2)]).await }),
        tokio::spawn(async move { s2.update_dependencies(TaskId(2), vec![TaskId(1)]).await }),
    );
    let ok = [r1.unwrap().is_ok(), r2.unwrap().is_ok()];
    assert_eq!(ok.iter().filter(|x| **x).count(), 1);
    let tasks = store.list(None, None).await;
    assert!(!reachable_from_itself(&tasks, TaskId(1)));
}

#[tokio::test]
async fn test_delete_respects_dependents() {
    let store = TaskStore::in_memory();
    store.create(NewTask::new("base", "u")).await.unwrap();
    store
        .create(NewTask::new("top", "u").with_dependencies([TaskId(1)]))
        .await
        .unwrap();

    let err = store.delete(TaskId(1)).await.unwrap_err();
    assert_eq!(
        err,
        AgentError::ReferentialIntegrity {
            task_id: TaskId(1),
            dependents: vec![TaskId(2)],
        }
    );

    store.delete(TaskId(2)).await.unwrap();
    assert!(matches!(store.get(TaskId(2)).await, Err(AgentError::NotFound(_))));
    assert!(store.list(None, None).await.iter().all(|t| t.id != TaskId(2)));
    store.delete(TaskId(1)).await.unwrap();
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_completed_time_semantics() {
    let store = TaskStore::in_memory();
    store.create(NewTask::new("a", "u")).await.unwrap();

    let done = store.update_status(TaskId(1), TaskStatus::Completed).await.unwrap();
    let stamped = done.completed_time.expect("completed_time set");

    let reopened = store.update_status(TaskId(1), TaskStatus::InProgress).await.unwrap();
    assert_eq!(reopened.completed_time, Some(stamped));

    let again = store.update_status(TaskId(1), TaskStatus::Completed).await.unwrap();
    assert!(again.completed_time.is_some());
}

#[tokio::test]
async fn test_dependency_set_is_order_independent() {
    let store = TaskStore::in_memory();
    store.create(NewTask::new("a", "u")).await.unwrap();
    store.create(NewTask::new("b", "u")).await.unwrap();
    let x = store
        .create(NewTask::new("x", "u").with_dependencies([TaskId(2), TaskId(1)]))
        .await
        .unwrap();
    let y = store
        .create(NewTask::new("y", "u").with_dependencies([TaskId(1), TaskId(2), TaskId(1)]))
        .await
        .unwrap();
    assert_eq!(
        store.get(x.id).await.unwrap().dependencies,
        store.get(y.id).await.unwrap().dependencies
    );
    assert_eq!(x.dependencies.len(), 2);
}

#[tokio::test]
async fn test_sqlite_reload_resumes_ids_and_edges() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.db");
    {
        let store = TaskStore::with_persistence(SqlitePersistence::open(&path).unwrap()).unwrap();
        store.create(NewTask::new("a", "u1")).await.unwrap();
        store
            .create(NewTask::new("b", "u2").with_dependencies([TaskId(1)]))
            .await
            .unwrap();
        store.update_status(TaskId(1), TaskStatus::Completed).await.unwrap();
        // 失败的写入不落盘
        assert!(store.update_dependencies(TaskId(1), vec![TaskId(2)]).await.is_err());
    }

    let store = TaskStore::with_persistence(SqlitePersistence::open(&path).unwrap()).unwrap();
    assert_eq!(store.len().await, 2);
    let b = store.get(TaskId(2)).await.unwrap();
    assert!(b.dependencies.contains(&TaskId(1)));
    let a = store.get(TaskId(1)).await.unwrap();
    assert_eq!(a.status, TaskStatus::Completed);
    assert!(a.completed_time.is_some());
    assert!(a.dependencies.is_empty());

    let c = store.create(NewTask::new("c", "u1")).await.unwrap();
    assert_eq!(c.id, TaskId(3));
}
