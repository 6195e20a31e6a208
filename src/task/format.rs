//! 任务展示文本（聊天窗口中直接呈现）

use std::fmt::Write;

use chrono::{DateTime, Local, Utc};

use crate::task::{Task, TaskId};

const DETAIL_TIME: &str = "%Y-%m-%d %H:%M:%S";
const LIST_TIME: &str = "%Y-%m-%d %H:%M";

fn local(t: &DateTime<Utc>, fmt: &str) -> String {
    t.with_timezone(&Local).format(fmt).to_string()
}

/// 单个任务详情；title_of 用于查询依赖任务标题（不存在时只显示 ID）
pub fn task_detail<'a>(task: &Task, title_of: impl Fn(TaskId) -> Option<&'a str>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "📋 任务: {}", task.title);
    let _ = writeln!(out, "状态: {}", task.status.label());
    let _ = writeln!(out, "创建人ID: {}", task.creator_id);
    let _ = writeln!(out, "创建时间: {}", local(&task.create_time, DETAIL_TIME));
    match &task.due_time {
        Some(due) => {
            let _ = writeln!(out, "截止时间: {}", local(due, DETAIL_TIME));
        }
        None => out.push_str("截止时间: 未设置\n"),
    }
    if !task.content.is_empty() {
        let _ = writeln!(out, "内容: {}", task.content);
    }
    if !task.dependencies.is_empty() {
        let deps: Vec<String> = task
            .dependencies
            .iter()
            .map(|dep| match title_of(*dep) {
                Some(title) => format!("任务{dep}({title})"),
                None => format!("任务{dep}"),
            })
            .collect();
        let _ = writeln!(out, "依赖任务: {}", deps.join(", "));
    }
    if let Some(done) = &task.completed_time {
        let _ = writeln!(out, "完成时间: {}", local(done, DETAIL_TIME));
    }
    let _ = write!(out, "ID: {}", task.id);
    out
}

/// 编号列表，带状态标记
pub fn task_list(tasks: &[Task]) -> String {
    if tasks.is_empty() {
        return "📋 暂无任务".to_string();
    }

    let mut out = format!("📋 任务列表 (共 {} 个):\n\n", tasks.len());
    for (i, task) in tasks.iter().enumerate() {
        let _ = writeln!(
            out,
            "{}. {} {} (ID: {})",
            i + 1,
            task.status.marker(),
            task.title,
            task.id
        );
        let _ = write!(out, "   创建人ID: {}", task.creator_id);
        match &task.due_time {
            Some(due) => {
                let _ = writeln!(out, " | 截止: {}", local(due, LIST_TIME));
            }
            None => out.push_str(" | 截止: 未设置\n"),
        }
        if !task.dependencies.is_empty() {
            let _ = writeln!(out, "   依赖: {}个任务", task.dependencies.len());
        }
        out.push('\n');
    }
    out
}
