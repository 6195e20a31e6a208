//! 命令分发器
//!
//! 持有 CommandRegistry 与全局超时，execute(name, args, ctx) 先按命令声明准备参数，再在超时内执行，
//! 超时返回 ToolTimeout；每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::core::AgentError;
use crate::tools::registry::{prepare_args, CallContext, CommandRegistry, CommandSpec};
use crate::tools::value::{args_to_json, ArgMap};

/// 命令结果：文本 + 参数转换 / 处理过程中的警告
#[derive(Clone, Debug, PartialEq)]
pub struct CommandOutput {
    pub text: String,
    pub warnings: Vec<String>,
}

impl CommandOutput {
    /// 附带警告的最终文本
    pub fn render(&self) -> String {
        if self.warnings.is_empty() {
            return self.text.clone();
        }
        let mut out = self.text.clone();
        out.push_str("\n\n");
        for w in &self.warnings {
            out.push_str("Warning: ");
            out.push_str(w);
            out.push('\n');
        }
        out.trim_end().to_string()
    }
}

/// 命令分发器：对每次调用施加超时并记录审计日志
pub struct CommandDispatcher {
    registry: CommandRegistry,
    timeout: Duration,
}

impl CommandDispatcher {
    pub fn new(registry: CommandRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    /// 执行指定命令；未知命令返回 NotFound，参数问题返回 Validation，超时返回 ToolTimeout
    pub async fn execute(
        &self,
        name: &str,
        args: ArgMap,
        ctx: &CallContext,
    ) -> Result<CommandOutput, AgentError> {
        let start = Instant::now();
        let preview = args_preview(&args);

        let result = match self.registry.get(name) {
            None => Err(AgentError::NotFound(format!("unknown command: {name}"))),
            Some(command) => match prepare_args(command.params(), args, ctx) {
                Err(e) => Err(e),
                Ok(mut prepared) => match timeout(self.timeout, command.run(&mut prepared)).await {
                    Ok(Ok(text)) => Ok(CommandOutput {
                        text,
                        warnings: prepared.take_warnings(),
                    }),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(AgentError::ToolTimeout(name.to_string())),
                },
            },
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(AgentError::ToolTimeout(_)) => "timeout",
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": name,
            "conversation": ctx.conversation_id,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        result
    }

    /// 目录（注册顺序）
    pub fn catalog(&self) -> Vec<CommandSpec> {
        self.registry.catalog()
    }

    pub fn command_names(&self) -> Vec<String> {
        self.registry.names()
    }
}

fn args_preview(args: &ArgMap) -> String {
    let s = args_to_json(args).to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
