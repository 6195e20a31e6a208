//! 编排层：多轮工具调用循环与文本内嵌调用解析

pub mod orchestrator;
pub mod sentinel;

pub use orchestrator::{
    FinishReason, ToolCallOrchestrator, ToolResult, TurnOutcome, COMPLETION_NOTICE, DEFAULT_MAX_ROUNDS,
};
pub use sentinel::{
    contains_markers, extract_tool_calls, find_marker, strip_markers, ParsedBatch, SentinelFamily,
};
