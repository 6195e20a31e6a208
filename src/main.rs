//! taskbee - 聊天任务助手
//!
//! 入口：初始化日志、加载配置、装配 Agent，启动提醒服务，
//! 然后在控制台上逐行对话，直到输入结束、quit 或收到关闭信号。

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use taskbee::agent::{create_agent, reminder_settings};
use taskbee::config::load_config;
use taskbee::core::{
    run_with_graceful_shutdown, BackgroundTaskCleanup, ShutdownCoordinator, ShutdownManager,
    ShutdownReason,
};
use taskbee::task::spawn_reminder;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    taskbee::observability::init();

    // 可选：第一个参数为额外的配置文件路径
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    let agent = create_agent(&cfg).context("Failed to create agent")?;

    let shutdown = Arc::new(ShutdownManager::new());
    let mut coordinator = ShutdownCoordinator::new(shutdown.clone());

    if cfg.reminder.enabled {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let token = shutdown.token().child_token();
        let handle = spawn_reminder(agent.store.clone(), reminder_settings(&cfg), tx, token.clone());
        coordinator.register(BackgroundTaskCleanup::new("reminder", token, handle));
        tokio::spawn(async move {
            while let Some(notice) = rx.recv().await {
                tracing::info!(kind = ?notice.kind, tasks = notice.tasks.len(), "reminder");
                println!("\n{}\n", notice.render());
            }
        });
    }

    let user = std::env::var("USER").unwrap_or_else(|_| "console".to_string());
    let conversation = format!("console-{user}");
    let console_shutdown = shutdown.clone();

    let app = async move {
        println!(
            "{} 已启动（模型: {}），输入 help 查看帮助，quit 退出。",
            cfg.app.name.as_deref().unwrap_or("taskbee"),
            agent.orchestrator.model_name()
        );
        let mut lines = spawn_stdin_reader();
        loop {
            print!("> ");
            let _ = std::io::stdout().flush();
            let Some(line) = lines.recv().await else {
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit") {
                console_shutdown.shutdown(ShutdownReason::UserInitiated);
                break;
            }
            let reply = agent.handle(&conversation, &user, line).await;
            println!("{reply}\n");
        }
    };

    run_with_graceful_shutdown(shutdown, app, || async move {
        coordinator.run_cleanup().await;
    })
    .await;

    Ok(())
}

/// 在独立线程上逐行读取 stdin
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("stdin read failed: {}", e);
                    break;
                }
            }
        }
    });
    rx
}
