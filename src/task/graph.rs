//! 任务依赖图
//!
//! 在任务表之上做无环校验：迭代式 DFS + 按任务 ID 索引的访问标记（无递归、无指针）。
//! 更新依赖时以「新边集」覆盖该任务原有出边，再从每个候选依赖出发遍历，
//! 一旦回到被更新的任务即判定成环。

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::core::AgentError;
use crate::task::{Task, TaskId};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    /// 在当前遍历路径上
    OnPath,
    /// 已完全展开，不会再成环
    Done,
}

/// 依赖图视图：可选地用候选边集替换某个任务的出边
pub struct DependencyView<'a> {
    tasks: &'a BTreeMap<TaskId, Task>,
    overlay: Option<(TaskId, &'a BTreeSet<TaskId>)>,
}

impl<'a> DependencyView<'a> {
    pub fn new(tasks: &'a BTreeMap<TaskId, Task>) -> Self {
        Self {
            tasks,
            overlay: None,
        }
    }

    /// 将 task_id 的出边视为 edges（更新前的预演）
    pub fn with_overlay(mut self, task_id: TaskId, edges: &'a BTreeSet<TaskId>) -> Self {
        self.overlay = Some((task_id, edges));
        self
    }

    fn edges(&self, id: TaskId) -> Vec<TaskId> {
        match self.overlay {
            Some((over, edges)) if over == id => edges.iter().copied().collect(),
            _ => self
                .tasks
                .get(&id)
                .map(|t| t.dependencies.iter().copied().collect())
                .unwrap_or_default(),
        }
    }

    /// 从 roots 出发遍历；若到达 target 或遇到路径上的节点则返回 CycleError
    pub fn check_from(
        &self,
        roots: &BTreeSet<TaskId>,
        target: Option<TaskId>,
    ) -> Result<(), AgentError> {
        let mut marks: HashMap<TaskId, Mark> = HashMap::new();

        for &root in roots {
            if Some(root) == target {
                return Err(AgentError::Cycle {
                    task_id: root,
                    via: root,
                });
            }
            if marks.contains_key(&root) {
                continue;
            }

            // 栈帧：(节点, 其出边, 下一个待访问的出边下标)
            let mut stack: Vec<(TaskId, Vec<TaskId>, usize)> = vec![(root, self.edges(root), 0)];
            marks.insert(root, Mark::OnPath);

            while let Some(frame) = stack.last_mut() {
                let (node, children, next) = (frame.0, &frame.1, frame.2);
                if next >= children.len() {
                    marks.insert(node, Mark::Done);
                    stack.pop();
                    continue;
                }
                let child = children[next];
                frame.2 += 1;

                if let Some(target) = target {
                    if child == target {
                        return Err(AgentError::Cycle {
                            task_id: target,
                            via: root,
                        });
                    }
                }
                match marks.get(&child) {
                    Some(Mark::OnPath) => {
                        return Err(AgentError::Cycle {
                            task_id: child,
                            via: node,
                        });
                    }
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(child, Mark::OnPath);
                        let grandchildren = self.edges(child);
                        stack.push((child, grandchildren, 0));
                    }
                }
            }
        }

        Ok(())
    }
}

/// 全图无环校验（启动时加载持久化数据后调用）
pub fn validate_all(tasks: &BTreeMap<TaskId, Task>) -> Result<(), AgentError> {
    let roots: BTreeSet<TaskId> = tasks.keys().copied().collect();
    DependencyView::new(tasks).check_from(&roots, None)
}

/// 依赖 id 的任务（反向边），用于删除前的引用完整性检查
pub fn dependents_of(tasks: &BTreeMap<TaskId, Task>, id: TaskId) -> Vec<TaskId> {
    tasks
        .values()
        .filter(|t| t.id != id && t.depends_on(id))
        .map(|t| t.id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskStatus;
    use chrono::Utc;

    fn graph(edges: &[(u64, &[u64])]) -> BTreeMap<TaskId, Task> {
        edges
            .iter()
            .map(|(id, deps)| {
                let task = Task {
                    id: TaskId(*id),
                    title: format!("t{id}"),
                    content: format!("c{id}"),
                    creator_id: "u".into(),
                    create_time: Utc::now(),
                    due_time: None,
                    status: TaskStatus::Pending,
                    completed_time: None,
                    dependencies: deps.iter().map(|d| TaskId(*d)).collect(),
                };
                (TaskId(*id), task)
            })
            .collect()
    }

    fn ids(v: &[u64]) -> BTreeSet<TaskId> {
        v.iter().map(|i| TaskId(*i)).collect()
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        // 1 -> {2, 3}, 2 -> 4, 3 -> 4
        let tasks = graph(&[(1, &[2, 3]), (2, &[4]), (3, &[4]), (4, &[])]);
        assert!(validate_all(&tasks).is_ok());
        assert!(DependencyView::new(&tasks).check_from(&ids(&[1]), Some(TaskId(5))).is_ok());
    }

    #[test]
    fn test_overlay_detects_transitive_cycle() {
        // 2 -> 3 -> 1；若让 1 依赖 2 则成环
        let tasks = graph(&[(1, &[]), (2, &[3]), (3, &[1])]);
        let new_edges = ids(&[2]);
        let err = DependencyView::new(&tasks)
            .with_overlay(TaskId(1), &new_edges)
            .check_from(&new_edges, Some(TaskId(1)))
            .unwrap_err();
        assert_eq!(err, AgentError::Cycle { task_id: TaskId(1), via: TaskId(2) });
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let tasks = graph(&[(1, &[])]);
        let new_edges = ids(&[1]);
        let result = DependencyView::new(&tasks)
            .with_overlay(TaskId(1), &new_edges)
            .check_from(&new_edges, Some(TaskId(1)));
        assert!(matches!(result, Err(AgentError::Cycle { .. })));
    }

    #[test]
    fn test_validate_all_finds_existing_cycle() {
        let tasks = graph(&[(1, &[2]), (2, &[1])]);
        assert!(validate_all(&tasks).is_err());
    }

    #[test]
    fn test_dependents_of() {
        let tasks = graph(&[(1, &[]), (2, &[1]), (3, &[1, 2])]);
        assert_eq!(dependents_of(&tasks, TaskId(1)), vec![TaskId(2), TaskId(3)]);
        assert!(dependents_of(&tasks, TaskId(3)).is_empty());
    }
}
