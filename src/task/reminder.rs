//! 到期提醒：后台定时扫描过期 / 即将到期的任务
//!
//! 只通过 TaskStore 的公开查询读取，结果以 ReminderNotice 发到 channel，
//! 由上层（控制台 / 聊天通道）决定如何投递。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::task::{format, Task, TaskStore};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReminderKind {
    Overdue,
    Upcoming,
}

#[derive(Clone, Debug)]
pub struct ReminderNotice {
    pub kind: ReminderKind,
    pub tasks: Vec<Task>,
}

impl ReminderNotice {
    /// 推送给用户的文本
    pub fn render(&self) -> String {
        let head = match self.kind {
            ReminderKind::Overdue => format!("⚠️ 有 {} 个任务已过期：", self.tasks.len()),
            ReminderKind::Upcoming => format!("⏰ 有 {} 个任务即将到期：", self.tasks.len()),
        };
        format!("{head}\n\n{}", format::task_list(&self.tasks))
    }
}

#[derive(Clone, Debug)]
pub struct ReminderSettings {
    pub interval: Duration,
    pub upcoming_window: chrono::Duration,
}

impl Default for ReminderSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            upcoming_window: chrono::Duration::hours(24),
        }
    }
}

/// 扫描一次；无任务的类别不发送
pub async fn scan_once(store: &TaskStore, window: chrono::Duration) -> Vec<ReminderNotice> {
    let mut notices = Vec::new();
    let overdue = store.overdue().await;
    if !overdue.is_empty() {
        tracing::info!("Found {} overdue tasks", overdue.len());
        notices.push(ReminderNotice {
            kind: ReminderKind::Overdue,
            tasks: overdue,
        });
    }
    let upcoming = store.upcoming(window).await;
    if !upcoming.is_empty() {
        tracing::info!("Found {} upcoming tasks", upcoming.len());
        notices.push(ReminderNotice {
            kind: ReminderKind::Upcoming,
            tasks: upcoming,
        });
    }
    notices
}

/// 启动提醒服务；token 取消或接收端关闭时退出
pub fn spawn_reminder(
    store: Arc<TaskStore>,
    settings: ReminderSettings,
    tx: mpsc::UnboundedSender<ReminderNotice>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(settings.interval);
        // 首个 tick 立即完成，跳过，保持「每隔 interval 检查一次」
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("Reminder service stopped");
                    break;
                }
                _ = ticker.tick() => {
                    for notice in scan_once(&store, settings.upcoming_window).await {
                        if tx.send(notice).is_err() {
                            tracing::warn!("Reminder receiver dropped, stopping reminder service");
                            return;
                        }
                    }
                }
            }
        }
    })
}
