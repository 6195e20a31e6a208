//! 多轮工具调用编排
//!
//! 每个用户回合是一个有上限的显式循环：
//! 1. 发送 {对话, 目录} 给模型（仅第 1 轮提供目录，之后只为收尾）
//! 2. 解释回复：纯文本即最终答案；结构化 tool_calls；或正文中的内嵌调用批次
//! 3. 逐个执行调用，单个调用的错误 / panic 只转为该调用的错误结果
//! 4. 追加 assistant 消息（去标记正文 + 调用记录）与每个调用的 tool 结果消息
//! 5. 执行过调用则进入下一轮；去标记后的正文仍含调用批次时，下一轮直接重新解释该正文，
//!    零散的残留标记则被去掉，下一轮照常询问模型
//!
//! 达到轮数上限不是错误：返回最近一批的最后一个结果。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;

use crate::core::AgentError;
use crate::llm::{LlmClient, ModelReply, RawToolCall};
use crate::memory::Message;
use crate::react::sentinel::{extract_tool_calls, strip_markers};
use crate::tools::value::{args_from_str, ArgMap};
use crate::tools::{CallContext, CommandDispatcher, ToolCall};

pub const DEFAULT_MAX_ROUNDS: usize = 5;

/// 没有任何工具输出可用时的通用完成提示
pub const COMPLETION_NOTICE: &str = "任务已处理完成";

/// 回合结束原因
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinishReason {
    /// 模型给出了最终文本
    Answer,
    /// 达到轮数上限
    RoundCap,
    /// 收尾轮调用失败或返回空内容，回退到工具结果
    FollowUpFallback,
    /// 内嵌批次中没有可解析的调用
    NoParseableCall,
}

/// 单个调用的执行结果
#[derive(Clone, Debug, PartialEq)]
pub struct ToolResult {
    pub tool: String,
    pub call_id: Option<String>,
    pub content: String,
    pub ok: bool,
}

#[derive(Clone, Debug)]
pub struct TurnOutcome {
    pub reply: String,
    pub rounds: usize,
    pub tool_results: Vec<ToolResult>,
    pub finish: FinishReason,
}

enum PlannedCall {
    Ready(ToolCall),
    /// 参数 JSON 无法解析的结构化调用
    Malformed { call: ToolCall, error: AgentError },
}

impl PlannedCall {
    fn from_structured(raw: RawToolCall) -> Self {
        match args_from_str(&raw.arguments) {
            Ok(args) => PlannedCall::Ready(ToolCall::structured(raw.id, raw.name, args)),
            Err(error) => PlannedCall::Malformed {
                call: ToolCall::structured(raw.id, raw.name, ArgMap::new()),
                error,
            },
        }
    }
}

/// 工具调用编排器
pub struct ToolCallOrchestrator {
    llm: Arc<dyn LlmClient>,
    dispatcher: Arc<CommandDispatcher>,
    max_rounds: usize,
}

impl ToolCallOrchestrator {
    pub fn new(llm: Arc<dyn LlmClient>, dispatcher: Arc<CommandDispatcher>) -> Self {
        Self {
            llm,
            dispatcher,
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    pub fn max_rounds(&self) -> usize {
        self.max_rounds
    }

    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    /// 运行一个回合；history 须以用户消息结尾。
    /// 仅当第 1 轮模型调用失败（尚无任何工具结果）时返回 Err。
    pub async fn run_turn(
        &self,
        history: Vec<Message>,
        ctx: &CallContext,
    ) -> Result<TurnOutcome, AgentError> {
        let catalog = self.dispatcher.catalog();
        let mut conversation = history;
        let mut tool_results: Vec<ToolResult> = Vec::new();
        let mut latest_batch: Vec<String> = Vec::new();
        let mut pending: Option<String> = None;

        for round in 1..=self.max_rounds {
            let reply = match pending.take() {
                Some(text) => {
                    tracing::debug!(round, "re-interpreting leftover tool-call markers");
                    ModelReply::text(text)
                }
                None => {
                    let offered = (round == 1).then_some(catalog.as_slice());
                    match self.llm.chat(&conversation, offered).await {
                        Ok(reply) => reply,
                        Err(e) if tool_results.is_empty() => return Err(e),
                        Err(e) => {
                            tracing::warn!(round, error = %e, "follow-up model call failed, using tool result");
                            return Ok(outcome(
                                first_or_notice(&latest_batch),
                                round,
                                tool_results,
                                FinishReason::FollowUpFallback,
                            ));
                        }
                    }
                }
            };

            let (text, plans) = if !reply.tool_calls.is_empty() {
                let text = match extract_tool_calls(&reply.text) {
                    Some(batch) => batch.stripped,
                    None => strip_markers(&reply.text),
                };
                let plans: Vec<PlannedCall> = reply
                    .tool_calls
                    .into_iter()
                    .map(PlannedCall::from_structured)
                    .collect();
                (text, plans)
            } else if let Some(batch) = extract_tool_calls(&reply.text) {
                if batch.calls.is_empty() {
                    tracing::warn!(round, skipped = batch.skipped, "no parseable tool call in embedded batch");
                    let stripped = strip_markers(&batch.stripped);
                    let reply = if !stripped.is_empty() {
                        stripped
                    } else if tool_results.is_empty() {
                        String::new()
                    } else {
                        first_or_notice(&latest_batch)
                    };
                    return Ok(outcome(reply, round, tool_results, FinishReason::NoParseableCall));
                }
                let plans: Vec<PlannedCall> = batch.calls.into_iter().map(PlannedCall::Ready).collect();
                (batch.stripped, plans)
            } else {
                let text = strip_markers(&reply.text);
                if text.is_empty() && !tool_results.is_empty() {
                    tracing::warn!(round, "follow-up reply empty, using tool result");
                    return Ok(outcome(
                        first_or_notice(&latest_batch),
                        round,
                        tool_results,
                        FinishReason::FollowUpFallback,
                    ));
                }
                return Ok(outcome(text, round, tool_results, FinishReason::Answer));
            };

            // 仅剩完整批次时下一轮重新解释正文，零散标记直接去掉并照常收尾
            let has_batch = extract_tool_calls(&text).is_some();
            let text = if has_batch { text } else { strip_markers(&text) };

            tracing::info!(round, calls = plans.len(), "executing tool calls");
            let mut issued = Vec::with_capacity(plans.len());
            let mut batch = Vec::with_capacity(plans.len());
            for plan in plans {
                let (call, content, ok) = match plan {
                    PlannedCall::Ready(call) => {
                        let (content, ok) = self.invoke(&call, ctx).await;
                        (call, content, ok)
                    }
                    PlannedCall::Malformed { call, error } => {
                        tracing::warn!(tool = %call.name, error = %error, "malformed tool call arguments");
                        (call, format!("Error: {error}"), false)
                    }
                };
                batch.push(ToolResult {
                    tool: call.name.clone(),
                    call_id: call.id.clone(),
                    content,
                    ok,
                });
                issued.push(call);
            }

            conversation.push(Message::assistant_with_calls(text.clone(), issued));
            for result in &batch {
                conversation.push(Message::tool(result.content.clone(), result.call_id.clone()));
            }
            latest_batch = batch.iter().map(|r| r.content.clone()).collect();
            tool_results.extend(batch);

            if has_batch {
                pending = Some(text);
            }
        }

        tracing::warn!(max_rounds = self.max_rounds, "tool-call round cap reached");
        let reply = latest_batch
            .last()
            .cloned()
            .unwrap_or_else(|| COMPLETION_NOTICE.to_string());
        Ok(outcome(reply, self.max_rounds, tool_results, FinishReason::RoundCap))
    }

    /// 执行单个调用；错误与 panic 都只转为该调用的错误结果
    async fn invoke(&self, call: &ToolCall, ctx: &CallContext) -> (String, bool) {
        let fut = self
            .dispatcher
            .execute(&call.name, call.arguments.clone(), ctx);
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(output)) => (output.render(), true),
            Ok(Err(e)) => {
                if e.is_command_error() {
                    tracing::info!(tool = %call.name, error = %e, "tool call rejected");
                } else {
                    tracing::warn!(tool = %call.name, error = %e, "tool call failed");
                }
                (format!("Error: {e}"), false)
            }
            Err(panic) => {
                let e = AgentError::ToolPanicked {
                    tool: call.name.clone(),
                    reason: panic_reason(panic.as_ref()),
                };
                tracing::error!(error = %e, "tool handler panicked");
                (format!("Error: {e}"), false)
            }
        }
    }
}

fn outcome(reply: String, rounds: usize, tool_results: Vec<ToolResult>, finish: FinishReason) -> TurnOutcome {
    TurnOutcome {
        reply,
        rounds,
        tool_results,
        finish,
    }
}

fn first_or_notice(batch: &[String]) -> String {
    batch
        .iter()
        .find(|c| !c.trim().is_empty())
        .cloned()
        .unwrap_or_else(|| COMPLETION_NOTICE.to_string())
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use crate::tools::{Command, CommandArgs, CommandRegistry, ParamSpec};
    use async_trait::async_trait;

    struct Boom;

    #[async_trait]
    impl Command for Boom {
        fn name(&self) -> &str {
            "boom"
        }

        fn description(&self) -> &str {
            "总是 panic"
        }

        fn params(&self) -> &[ParamSpec] {
            &[]
        }

        async fn run(&self, _args: &mut CommandArgs) -> Result<String, AgentError> {
            panic!("handler exploded");
        }
    }

    struct Ping;

    #[async_trait]
    impl Command for Ping {
        fn name(&self) -> &str {
            "ping"
        }

        fn description(&self) -> &str {
            "返回 pong"
        }

        fn params(&self) -> &[ParamSpec] {
            &[]
        }

        async fn run(&self, _args: &mut CommandArgs) -> Result<String, AgentError> {
            Ok("pong".into())
        }
    }

    struct Quiet;

    #[async_trait]
    impl Command for Quiet {
        fn name(&self) -> &str {
            "quiet"
        }

        fn description(&self) -> &str {
            "不返回任何内容"
        }

        fn params(&self) -> &[ParamSpec] {
            &[]
        }

        async fn run(&self, _args: &mut CommandArgs) -> Result<String, AgentError> {
            Ok(String::new())
        }
    }

    fn orchestrator(llm: ScriptedLlmClient) -> (ToolCallOrchestrator, Arc<ScriptedLlmClient>) {
        let mut registry = CommandRegistry::new();
        registry.register(Boom);
        registry.register(Ping);
        registry.register(Quiet);
        let llm = Arc::new(llm);
        let orch = ToolCallOrchestrator::new(llm.clone(), Arc::new(CommandDispatcher::new(registry, 5)));
        (orch, llm)
    }

    #[tokio::test]
    async fn test_panic_is_isolated_to_its_call() {
        let (orch, _) = orchestrator(ScriptedLlmClient::new(vec![
            Ok(ModelReply::with_calls(
                "",
                vec![RawToolCall::new("c1", "boom", "{}"), RawToolCall::new("c2", "ping", "{}")],
            )),
            Ok(ModelReply::text("完成")),
        ]));
        let out = orch
            .run_turn(vec![Message::user("go")], &CallContext::default())
            .await
            .unwrap();
        assert_eq!(out.reply, "完成");
        assert_eq!(out.tool_results.len(), 2);
        assert!(!out.tool_results[0].ok);
        assert!(out.tool_results[0].content.contains("panicked"));
        assert_eq!(out.tool_results[1].content, "pong");
    }

    #[tokio::test]
    async fn test_malformed_structured_arguments_become_error_result() {
        let (orch, llm) = orchestrator(ScriptedLlmClient::new(vec![
            Ok(ModelReply::with_calls("", vec![RawToolCall::new("c1", "ping", "{not json")])),
            Ok(ModelReply::text("")),
        ]));
        let out = orch
            .run_turn(vec![Message::user("go")], &CallContext::default())
            .await
            .unwrap();
        assert_eq!(out.finish, FinishReason::FollowUpFallback);
        assert!(out.reply.starts_with("Error: Parse error"));
        let second = &llm.requests()[1].history;
        assert_eq!(second.last().and_then(|m| m.tool_call_id.as_deref()), Some("c1"));
    }

    #[tokio::test]
    async fn test_first_round_transport_error_propagates() {
        let (orch, _) = orchestrator(ScriptedLlmClient::new(vec![Err(AgentError::Transport(
            "down".into(),
        ))]));
        let err = orch
            .run_turn(vec![Message::user("go")], &CallContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Transport(_)));
    }

    #[tokio::test]
    async fn test_leftover_markers_are_reinterpreted_without_model_call() {
        let text = "<|tool_calls_begin|><|tool_call_begin|>ping<|tool_sep|>{}<|tool_call_end|><|tool_calls_end|> 然后 <|tool_calls_begin|><|tool_call_begin|>ping<|tool_sep|>{}<|tool_call_end|><|tool_calls_end|>";
        let (orch, llm) = orchestrator(ScriptedLlmClient::new(vec![
            Ok(ModelReply::text(text)),
            Ok(ModelReply::text("两次都成功")),
        ]));
        let out = orch
            .run_turn(vec![Message::user("go")], &CallContext::default())
            .await
            .unwrap();
        assert_eq!(out.reply, "两次都成功");
        assert_eq!(out.tool_results.len(), 2);
        assert_eq!(out.rounds, 3);
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn test_stray_marker_after_batch_still_asks_model_to_close() {
        let text = "好的<|tool_calls_begin|><|tool_call_begin|>ping<|tool_sep|>{}<|tool_call_end|><|tool_calls_end|> 另外<|tool_sep|>";
        let (orch, llm) = orchestrator(ScriptedLlmClient::new(vec![
            Ok(ModelReply::text(text)),
            Ok(ModelReply::text("已完成")),
        ]));
        let out = orch
            .run_turn(vec![Message::user("go")], &CallContext::default())
            .await
            .unwrap();
        assert_eq!(out.reply, "已完成");
        assert_eq!(out.finish, FinishReason::Answer);
        assert_eq!(llm.call_count(), 2);

        let second = &llm.requests()[1];
        assert!(!second.catalog_offered);
        let assistant = &second.history[second.history.len() - 2];
        assert_eq!(assistant.content, "好的 另外");
    }

    #[tokio::test]
    async fn test_stray_marker_in_plain_answer_is_removed() {
        let (orch, _) = orchestrator(ScriptedLlmClient::new(vec![Ok(ModelReply::text(
            "完成了<｜tool▁call▁end｜>",
        ))]));
        let out = orch
            .run_turn(vec![Message::user("go")], &CallContext::default())
            .await
            .unwrap();
        assert_eq!(out.reply, "完成了");
        assert_eq!(out.finish, FinishReason::Answer);
    }

    #[tokio::test]
    async fn test_blank_results_and_empty_follow_up_use_completion_notice() {
        let (orch, _) = orchestrator(ScriptedLlmClient::new(vec![
            Ok(ModelReply::with_calls("", vec![RawToolCall::new("c1", "quiet", "{}")])),
            Ok(ModelReply::text("  ")),
        ]));
        let out = orch
            .run_turn(vec![Message::user("go")], &CallContext::default())
            .await
            .unwrap();
        assert_eq!(out.finish, FinishReason::FollowUpFallback);
        assert_eq!(out.reply, COMPLETION_NOTICE);
        assert!(out.tool_results[0].ok);
    }
}
