//! 任务管理命令：把 TaskStore 操作暴露给模型
//!
//! 每个命令声明参数，处理器只负责把已转换的参数交给 TaskStore 并格式化结果。

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::AgentError;
use crate::task::{format, parse_due_time, FieldUpdate, NewTask, TaskStatus, TaskStore};
use crate::tools::registry::{Command, CommandArgs, CommandRegistry, ParamSpec};
use crate::tools::value::ParamKind;

const STATUS_VALUES: &[&str] = &["pending", "in_progress", "completed", "cancelled"];
const DEFAULT_UPCOMING_HOURS: f64 = 24.0;

/// 按目录顺序注册全部任务命令
pub fn register_task_commands(registry: &mut CommandRegistry, store: Arc<TaskStore>) {
    registry.register(CreateTask(store.clone()));
    registry.register(ListTasks(store.clone()));
    registry.register(GetTaskCount(store.clone()));
    registry.register(GetTask(store.clone()));
    registry.register(UpdateTaskStatus(store.clone()));
    registry.register(UpdateTask(store.clone()));
    registry.register(DeleteTask(store.clone()));
    registry.register(SearchTasks(store.clone()));
    registry.register(GetOverdueTasks(store.clone()));
    registry.register(GetUpcomingTasks(store.clone()));
    registry.register(UpdateTaskDependencies(store));
}

fn optional_status(args: &CommandArgs) -> Result<Option<TaskStatus>, AgentError> {
    args.text("status").map(str::parse).transpose()
}

/// 解析失败只记警告，不让整个调用失败
fn optional_due_time(args: &mut CommandArgs) -> Option<chrono::DateTime<chrono::Utc>> {
    let raw = args.text("due_time")?.to_string();
    match parse_due_time(&raw) {
        Ok(due) => Some(due),
        Err(e) => {
            tracing::warn!("Failed to parse due_time '{}': {}", raw, e);
            args.warn(format!("due_time '{raw}' not recognised, ignored"));
            None
        }
    }
}

pub struct CreateTask(pub Arc<TaskStore>);

#[async_trait]
impl Command for CreateTask {
    fn name(&self) -> &str {
        "create_task"
    }

    fn description(&self) -> &str {
        "创建新任务。只有在用户明确要求创建、记录或添加任务时才使用；用户只是分享计划或想法时正常回复即可。用户说出的内容就是任务内容，从中提取标题和截止时间。"
    }

    fn params(&self) -> &[ParamSpec] {
        const PARAMS: &[ParamSpec] = &[
            ParamSpec::required("content", ParamKind::Text, "任务具体内容（必需），用户说出的完整任务描述"),
            ParamSpec::optional("title", ParamKind::Text, "任务标题（可选），从内容中推测简洁标题，无法推测则留空"),
            ParamSpec::required("creator_id", ParamKind::Text, "创建任务的用户ID，从上下文中的用户信息获取")
                .caller_identity(),
            ParamSpec::optional(
                "due_time",
                ParamKind::Text,
                "截止时间（可选），格式 YYYY-MM-DD HH:MM:SS 或 YYYY-MM-DD，也接受 今天/明天/后天 加时刻",
            ),
            ParamSpec::optional("dependencies", ParamKind::TaskIdList, "前置依赖任务ID列表（可选），任务ID是数字")
                .with_aliases(&["dependency_task_ids"]),
        ];
        PARAMS
    }

    async fn run(&self, args: &mut CommandArgs) -> Result<String, AgentError> {
        let mut new = NewTask::new(args.require_text("content")?, args.require_text("creator_id")?);
        if let Some(title) = args.text("title") {
            new = new.with_title(title);
        }
        if let Some(due) = optional_due_time(args) {
            new = new.with_due_time(due);
        }
        if let Some(deps) = args.task_ids("dependencies") {
            new = new.with_dependencies(deps.iter().copied());
        }
        let task = self.0.create(new).await?;
        Ok(format!("✅ 任务创建成功！\n{}", self.0.describe_task(&task).await))
    }
}

pub struct ListTasks(pub Arc<TaskStore>);

#[async_trait]
impl Command for ListTasks {
    fn name(&self) -> &str {
        "list_tasks"
    }

    fn description(&self) -> &str {
        "列出任务。只在用户明确询问任务列表时使用。用户说「我的任务」时传入当前用户ID作为 creator_id；说「所有任务」「团队任务」时不传 creator_id。"
    }

    fn params(&self) -> &[ParamSpec] {
        const PARAMS: &[ParamSpec] = &[
            ParamSpec::optional("status", ParamKind::Text, "状态筛选，为空则列出所有状态的任务")
                .with_allowed(STATUS_VALUES),
            ParamSpec::optional("creator_id", ParamKind::Text, "创建人ID筛选（可选），不传则查看所有人的任务"),
        ];
        PARAMS
    }

    async fn run(&self, args: &mut CommandArgs) -> Result<String, AgentError> {
        let status = optional_status(args)?;
        let creator = args.text("creator_id");
        let tasks = self.0.list(status, creator).await;
        if tasks.is_empty() {
            return Ok(if creator.is_some() {
                "📋 该用户暂无任务".to_string()
            } else {
                "📋 暂无任务".to_string()
            });
        }
        Ok(format::task_list(&tasks))
    }
}

pub struct GetTaskCount(pub Arc<TaskStore>);

#[async_trait]
impl Command for GetTaskCount {
    fn name(&self) -> &str {
        "get_task_count"
    }

    fn description(&self) -> &str {
        "获取任务数量统计"
    }

    fn params(&self) -> &[ParamSpec] {
        const PARAMS: &[ParamSpec] = &[ParamSpec::optional(
            "status",
            ParamKind::Text,
            "状态筛选，为空则统计全部任务",
        )
        .with_allowed(STATUS_VALUES)];
        PARAMS
    }

    async fn run(&self, args: &mut CommandArgs) -> Result<String, AgentError> {
        let status = optional_status(args)?;
        let count = self.0.count(status).await;
        let label = status.map(|s| s.label()).unwrap_or("全部");
        Ok(format!("📊 {label}任务数量: {count} 个"))
    }
}

pub struct GetTask(pub Arc<TaskStore>);

#[async_trait]
impl Command for GetTask {
    fn name(&self) -> &str {
        "get_task"
    }

    fn description(&self) -> &str {
        "查看任务详情。只在用户明确要求查看某个任务时使用。"
    }

    fn params(&self) -> &[ParamSpec] {
        const PARAMS: &[ParamSpec] = &[ParamSpec::required("task_id", ParamKind::TaskId, "任务ID（必需）")];
        PARAMS
    }

    async fn run(&self, args: &mut CommandArgs) -> Result<String, AgentError> {
        self.0.describe(args.require_task_id("task_id")?).await
    }
}

pub struct UpdateTaskStatus(pub Arc<TaskStore>);

#[async_trait]
impl Command for UpdateTaskStatus {
    fn name(&self) -> &str {
        "update_task_status"
    }

    fn description(&self) -> &str {
        "更新任务状态。只在用户明确要求更新任务状态时使用（如「完成任务X」「标记为进行中」）。"
    }

    fn params(&self) -> &[ParamSpec] {
        const PARAMS: &[ParamSpec] = &[
            ParamSpec::required("task_id", ParamKind::TaskId, "任务ID（必需）"),
            ParamSpec::required(
                "status",
                ParamKind::Text,
                "新状态：pending（待处理）、in_progress（进行中）、completed（已完成）、cancelled（已取消）",
            )
            .with_allowed(STATUS_VALUES),
        ];
        PARAMS
    }

    async fn run(&self, args: &mut CommandArgs) -> Result<String, AgentError> {
        let id = args.require_task_id("task_id")?;
        let status: TaskStatus = args.require_text("status")?.parse()?;
        let task = self.0.update_status(id, status).await?;
        Ok(format!(
            "✅ 任务 {} 状态已更新为: {}（{}）",
            task.id,
            task.status.label(),
            task.status
        ))
    }
}

pub struct UpdateTask(pub Arc<TaskStore>);

#[async_trait]
impl Command for UpdateTask {
    fn name(&self) -> &str {
        "update_task"
    }

    fn description(&self) -> &str {
        "更新任务信息（标题、内容、截止时间）。只在用户明确要求更新任务时使用。"
    }

    fn params(&self) -> &[ParamSpec] {
        const PARAMS: &[ParamSpec] = &[
            ParamSpec::required("task_id", ParamKind::TaskId, "任务ID（必需）"),
            ParamSpec::optional("title", ParamKind::Text, "新标题（可选）"),
            ParamSpec::optional("content", ParamKind::Text, "新内容（可选）"),
            ParamSpec::optional(
                "due_time",
                ParamKind::Text,
                "新截止时间（可选），格式 YYYY-MM-DD HH:MM:SS 或 YYYY-MM-DD，也接受 今天/明天/后天 加时刻",
            ),
        ];
        PARAMS
    }

    async fn run(&self, args: &mut CommandArgs) -> Result<String, AgentError> {
        let id = args.require_task_id("task_id")?;
        let update = FieldUpdate {
            title: args.text("title").map(str::to_string),
            content: args.text("content").map(str::to_string),
            due_time: optional_due_time(args),
        };
        // 唯一给出的字段被忽略时不算失败，警告随结果返回
        if update.is_empty() && !args.warnings().is_empty() {
            let task = self.0.get(id).await?;
            return Ok(format!("⚠️ 任务 {} 未修改\n{}", id, self.0.describe_task(&task).await));
        }
        let task = self.0.update_fields(id, update).await?;
        Ok(format!("✅ 任务已更新！\n{}", self.0.describe_task(&task).await))
    }
}

pub struct DeleteTask(pub Arc<TaskStore>);

#[async_trait]
impl Command for DeleteTask {
    fn name(&self) -> &str {
        "delete_task"
    }

    fn description(&self) -> &str {
        "删除任务。只在用户明确要求删除任务时使用。被其他任务依赖的任务无法删除。"
    }

    fn params(&self) -> &[ParamSpec] {
        const PARAMS: &[ParamSpec] = &[ParamSpec::required("task_id", ParamKind::TaskId, "要删除的任务ID（必需）")];
        PARAMS
    }

    async fn run(&self, args: &mut CommandArgs) -> Result<String, AgentError> {
        let task = self.0.delete(args.require_task_id("task_id")?).await?;
        Ok(format!("任务 {}（{}）已成功删除", task.id, task.title))
    }
}

pub struct SearchTasks(pub Arc<TaskStore>);

#[async_trait]
impl Command for SearchTasks {
    fn name(&self) -> &str {
        "search_tasks"
    }

    fn description(&self) -> &str {
        "按关键词搜索任务（标题或内容，不区分大小写）。只在用户明确要求搜索任务时使用。"
    }

    fn params(&self) -> &[ParamSpec] {
        const PARAMS: &[ParamSpec] = &[ParamSpec::optional("keyword", ParamKind::Text, "搜索关键词")
            .with_aliases(&["query"])];
        PARAMS
    }

    async fn run(&self, args: &mut CommandArgs) -> Result<String, AgentError> {
        let keyword = args.text("keyword").unwrap_or_default();
        let tasks = self.0.search(keyword).await;
        if tasks.is_empty() && !keyword.is_empty() {
            return Ok(format!("未找到包含 '{keyword}' 的任务"));
        }
        Ok(format::task_list(&tasks))
    }
}

pub struct GetOverdueTasks(pub Arc<TaskStore>);

#[async_trait]
impl Command for GetOverdueTasks {
    fn name(&self) -> &str {
        "get_overdue_tasks"
    }

    fn description(&self) -> &str {
        "获取已过期（未完成且截止时间已过）的任务。只在用户明确询问过期任务时使用。"
    }

    fn params(&self) -> &[ParamSpec] {
        &[]
    }

    async fn run(&self, _args: &mut CommandArgs) -> Result<String, AgentError> {
        let tasks = self.0.overdue().await;
        if tasks.is_empty() {
            return Ok("✅ 没有过期任务".to_string());
        }
        Ok(format!(
            "⚠️ 发现 {} 个过期任务：\n\n{}",
            tasks.len(),
            format::task_list(&tasks)
        ))
    }
}

pub struct GetUpcomingTasks(pub Arc<TaskStore>);

#[async_trait]
impl Command for GetUpcomingTasks {
    fn name(&self) -> &str {
        "get_upcoming_tasks"
    }

    fn description(&self) -> &str {
        "获取即将到期的任务（默认24小时内）。只在用户明确询问即将到期的任务时使用。"
    }

    fn params(&self) -> &[ParamSpec] {
        const PARAMS: &[ParamSpec] = &[ParamSpec::optional("hours", ParamKind::Number, "时间范围（小时），默认为24")];
        PARAMS
    }

    async fn run(&self, args: &mut CommandArgs) -> Result<String, AgentError> {
        let hours = match args.number("hours") {
            Some(h) if h > 0.0 => h,
            Some(h) => {
                args.warn(format!("hours must be positive, got {h}; using {DEFAULT_UPCOMING_HOURS}"));
                DEFAULT_UPCOMING_HOURS
            }
            None => DEFAULT_UPCOMING_HOURS,
        };
        let window = chrono::Duration::seconds((hours * 3600.0).min(i32::MAX as f64) as i64);
        let tasks = self.0.upcoming(window).await;
        if tasks.is_empty() {
            return Ok(format!("✅ 未来 {hours:.0} 小时内没有即将到期的任务"));
        }
        Ok(format!(
            "⏰ 未来 {hours:.0} 小时内有 {} 个即将到期的任务：\n\n{}",
            tasks.len(),
            format::task_list(&tasks)
        ))
    }
}

pub struct UpdateTaskDependencies(pub Arc<TaskStore>);

#[async_trait]
impl Command for UpdateTaskDependencies {
    fn name(&self) -> &str {
        "update_task_dependencies"
    }

    fn description(&self) -> &str {
        "整体替换任务的依赖关系（不传 dependencies 则清空依赖）。会拒绝形成循环依赖的更新。只在用户明确要求更新任务依赖时使用。"
    }

    fn params(&self) -> &[ParamSpec] {
        const PARAMS: &[ParamSpec] = &[
            ParamSpec::required("task_id", ParamKind::TaskId, "任务ID（必需）"),
            ParamSpec::optional("dependencies", ParamKind::TaskIdList, "新的依赖任务ID列表")
                .with_aliases(&["dependency_task_ids"]),
        ];
        PARAMS
    }

    async fn run(&self, args: &mut CommandArgs) -> Result<String, AgentError> {
        let id = args.require_task_id("task_id")?;
        let deps = args.task_ids("dependencies").map(<[_]>::to_vec).unwrap_or_default();
        let task = self.0.update_dependencies(id, deps).await?;
        Ok(format!(
            "✅ 任务依赖关系已更新！\n{}",
            self.0.describe_task(&task).await
        ))
    }
}
