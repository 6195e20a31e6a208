//! 编排集成测试：脚本化模型 + 真实任务命令集

use std::sync::Arc;

use taskbee::core::AgentError;
use taskbee::gateway::{SessionStore, APOLOGY_REPLY, RESET_REPLY};
use taskbee::llm::{ModelReply, RawToolCall, ScriptedLlmClient};
use taskbee::memory::{Message, Role};
use taskbee::react::{
    contains_markers, extract_tool_calls, FinishReason, ToolCallOrchestrator, COMPLETION_NOTICE,
};
use taskbee::task::{NewTask, TaskId, TaskStore};
use taskbee::tools::value::ArgValue;
use taskbee::tools::{register_task_commands, CallContext, CommandDispatcher, CommandRegistry};

struct Harness {
    store: Arc<TaskStore>,
    llm: Arc<ScriptedLlmClient>,
    orchestrator: Arc<ToolCallOrchestrator>,
}

fn harness(llm: ScriptedLlmClient, max_rounds: usize) -> Harness {
    let store = Arc::new(TaskStore::in_memory());
    let mut registry = CommandRegistry::new();
    register_task_commands(&mut registry, store.clone());
    let dispatcher = Arc::new(CommandDispatcher::new(registry, 5));
    let llm = Arc::new(llm);
    let orchestrator =
        Arc::new(ToolCallOrchestrator::new(llm.clone(), dispatcher).with_max_rounds(max_rounds));
    Harness {
        store,
        llm,
        orchestrator,
    }
}

fn ctx() -> CallContext {
    CallContext::new("u", "conv-1")
}

fn embedded(name: &str, args: &str) -> String {
    format!("<|tool_calls_begin|><|tool_call_begin|>{name}<|tool_sep|>{args}<|tool_call_end|><|tool_calls_end|>")
}

#[test]
fn test_whitespace_perturbed_batch_yields_single_call() {
    let text = "好的 <｜ tool▁calls▁begin ｜><｜tool▁call▁begin ｜ >create_task< ｜tool▁sep｜>{\"content\":\"x\",\"creator_id\":\"u\"}<｜ tool▁call▁end｜><｜tool▁calls▁end ｜> 已为你创建";
    let batch = extract_tool_calls(text).unwrap();
    assert_eq!(batch.calls.len(), 1);
    assert_eq!(batch.calls[0].name, "create_task");
    assert_eq!(batch.calls[0].arguments.get("content"), Some(&ArgValue::Text("x".into())));
    assert_eq!(batch.calls[0].arguments.get("creator_id"), Some(&ArgValue::Text("u".into())));
    assert!(!contains_markers(&batch.stripped));
    assert!(!batch.stripped.contains("tool▁"));
}

#[tokio::test]
async fn test_embedded_call_creates_task_and_catalog_only_first_round() {
    let h = harness(
        ScriptedLlmClient::new(vec![
            Ok(ModelReply::text(format!(
                "马上创建。{}",
                embedded("create_task", r#"{"content":"写周报","due_time":"2030-01-02 18:00:00"}"#)
            ))),
            Ok(ModelReply::text("已创建任务「写周报」")),
        ]),
        5,
    );
    let out = h
        .orchestrator
        .run_turn(vec![Message::user("创建任务：写周报")], &ctx())
        .await
        .unwrap();
    assert_eq!(out.reply, "已创建任务「写周报」");
    assert_eq!(out.finish, FinishReason::Answer);

    // 创建人由会话身份注入
    let task = h.store.get(TaskId(1)).await.unwrap();
    assert_eq!(task.creator_id, "u");
    assert!(task.due_time.is_some());

    let requests = h.llm.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].catalog_offered);
    assert!(!requests[1].catalog_offered);

    // 第二轮看到 assistant(去标记正文 + 调用记录) 与无关联 ID 的 tool 结果
    let history = &requests[1].history;
    let assistant = &history[history.len() - 2];
    assert_eq!(assistant.role, Role::Assistant);
    assert_eq!(assistant.content, "马上创建。");
    assert_eq!(assistant.tool_calls.len(), 1);
    let tool = &history[history.len() - 1];
    assert_eq!(tool.role, Role::Tool);
    assert!(tool.tool_call_id.is_none());
    assert!(tool.content.contains("任务创建成功"));
}

#[tokio::test]
async fn test_malformed_second_call_is_skipped() {
    let text = "<|tool_calls_begin|><|tool_call_begin|>create_task<|tool_sep|>{\"content\":\"a\",\"creator_id\":\"u\"}<|tool_call_end|><|tool_call_begin|>create_task<|tool_sep|>{\"content\": \"b\",<|tool_call_end|><|tool_calls_end|>";
    let h = harness(
        ScriptedLlmClient::new(vec![Ok(ModelReply::text(text)), Ok(ModelReply::text("done"))]),
        5,
    );
    let out = h
        .orchestrator
        .run_turn(vec![Message::user("go")], &ctx())
        .await
        .unwrap();
    assert_eq!(out.tool_results.len(), 1);
    assert!(out.tool_results[0].ok);
    assert_eq!(h.store.len().await, 1);
    assert_eq!(out.reply, "done");
}

#[tokio::test]
async fn test_round_cap_returns_last_tool_result() {
    let h = harness(
        ScriptedLlmClient::repeating(ModelReply::text(embedded("get_task_count", "{}"))),
        3,
    );
    let out = h
        .orchestrator
        .run_turn(vec![Message::user("loop")], &ctx())
        .await
        .unwrap();
    assert_eq!(out.finish, FinishReason::RoundCap);
    assert_eq!(out.rounds, 3);
    assert_eq!(h.llm.call_count(), 3);
    assert_eq!(out.tool_results.len(), 3);
    assert_eq!(out.reply, out.tool_results[2].content);
    assert!(out.reply.contains("任务数量"));
}

#[tokio::test]
async fn test_follow_up_failure_returns_first_tool_result() {
    let h = harness(
        ScriptedLlmClient::new(vec![
            Ok(ModelReply::with_calls(
                "",
                vec![
                    RawToolCall::new("call_1", "list_tasks", "{}"),
                    RawToolCall::new("call_2", "get_task_count", "{}"),
                ],
            )),
            Err(AgentError::Transport("connection reset".into())),
        ]),
        5,
    );
    let out = h
        .orchestrator
        .run_turn(vec![Message::user("我的任务")], &ctx())
        .await
        .unwrap();
    assert_eq!(out.finish, FinishReason::FollowUpFallback);
    assert_eq!(out.reply, "📋 暂无任务");
    assert_eq!(out.tool_results[0].call_id.as_deref(), Some("call_1"));
}

#[tokio::test]
async fn test_follow_up_empty_uses_first_tool_result() {
    let h = harness(
        ScriptedLlmClient::new(vec![
            Ok(ModelReply::text(embedded("create_task", "{\"content\":\"a\",\"creator_id\":\"u\"}"))),
            Ok(ModelReply::text("")),
        ]),
        5,
    );
    let out = h
        .orchestrator
        .run_turn(vec![Message::user("go")], &ctx())
        .await
        .unwrap();
    assert_eq!(out.finish, FinishReason::FollowUpFallback);
    assert!(out.reply.contains("任务创建成功"));
    assert_ne!(out.reply, COMPLETION_NOTICE);
}

#[tokio::test]
async fn test_command_errors_are_results_not_failures() {
    let h = harness(
        ScriptedLlmClient::new(vec![
            Ok(ModelReply::with_calls(
                "",
                vec![RawToolCall::new("c1", "delete_task", r#"{"task_id":"1"}"#)],
            )),
            Ok(ModelReply::text("无法删除")),
        ]),
        5,
    );
    h.store.create(NewTask::new("base", "u")).await.unwrap();
    h.store
        .create(NewTask::new("top", "u").with_dependencies([TaskId(1)]))
        .await
        .unwrap();
    let out = h
        .orchestrator
        .run_turn(vec![Message::user("删除任务1")], &ctx())
        .await
        .unwrap();
    assert_eq!(out.reply, "无法删除");
    assert!(!out.tool_results[0].ok);
    assert!(out.tool_results[0].content.starts_with("Error: Cannot delete task 1"));
    assert_eq!(h.store.len().await, 2);
}

#[tokio::test]
async fn test_unparseable_batch_returns_stripped_text() {
    let text = format!("抱歉，请再说一遍。{}", embedded("create_task", "{oops"));
    let h = harness(ScriptedLlmClient::new(vec![Ok(ModelReply::text(text))]), 5);
    let out = h
        .orchestrator
        .run_turn(vec![Message::user("go")], &ctx())
        .await
        .unwrap();
    assert_eq!(out.finish, FinishReason::NoParseableCall);
    assert_eq!(out.reply, "抱歉，请再说一遍。");
    assert!(out.tool_results.is_empty());
}

#[tokio::test]
async fn test_session_reset_and_apology_flow() {
    let h = harness(
        ScriptedLlmClient::new(vec![
            Ok(ModelReply::text("你好")),
            Err(AgentError::Transport("timeout".into())),
        ]),
        5,
    );
    let sessions = SessionStore::new(h.orchestrator.clone(), 31);

    assert_eq!(sessions.turn("c", "alice", "hi").await, "你好");
    assert_eq!(sessions.turn("c", "alice", "again").await, APOLOGY_REPLY);
    let transcript = sessions.turn("c", "alice", "get:session").await;
    assert!(transcript.contains("你: hi"));
    assert!(transcript.contains(&format!("机器人: {APOLOGY_REPLY}")));

    assert_eq!(sessions.turn("c", "alice", "换个话题").await, RESET_REPLY);
    let history = sessions.history("c").await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].content.contains("当前用户ID: alice"));
    assert_eq!(h.llm.call_count(), 2);
}

#[tokio::test]
async fn test_stray_sentinel_after_batch_gets_follow_up_round() {
    let h = harness(
        ScriptedLlmClient::new(vec![
            Ok(ModelReply::text(format!(
                "好的{} 另外<|tool_sep|>",
                embedded("get_task_count", "{}")
            ))),
            Ok(ModelReply::text("共0个任务")),
        ]),
        5,
    );
    let out = h
        .orchestrator
        .run_turn(vec![Message::user("几个任务")], &ctx())
        .await
        .unwrap();
    assert_eq!(out.reply, "共0个任务");
    assert_eq!(out.finish, FinishReason::Answer);
    assert!(!contains_markers(&out.reply));
    assert_eq!(h.llm.call_count(), 2);
    assert!(!h.llm.requests()[1].catalog_offered);
}

#[tokio::test]
async fn test_mixed_spelling_batch_runs_every_call() {
    let text = "<|tool_calls_begin|><| tool_call_begin|>create_task<|tool_sep|>{\"content\":\"a\"}<|tool_call_end |><|tool_call_begin|>create_task<|tool_sep|>{\"content\":\"b\"}<|tool_call_end|><|tool_calls_end|>";
    let h = harness(
        ScriptedLlmClient::new(vec![Ok(ModelReply::text(text)), Ok(ModelReply::text("都建好了"))]),
        5,
    );
    let out = h
        .orchestrator
        .run_turn(vec![Message::user("建两个任务")], &ctx())
        .await
        .unwrap();
    assert_eq!(out.reply, "都建好了");
    assert_eq!(out.tool_results.len(), 2);
    assert!(out.tool_results.iter().all(|r| r.ok));
    assert_eq!(h.store.len().await, 2);
}
