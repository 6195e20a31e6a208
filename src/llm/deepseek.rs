//! DeepSeek API 客户端（OpenAI 兼容格式）
//!
//! 通过 async_openai 调用 DeepSeek 的 chat/completions：
//! - Base URL: https://api.deepseek.com
//! - 模型: deepseek-chat (常规对话), deepseek-reasoner (思考模式)
//!
//! 目录以 `tools` 字段发送；返回的 `tool_calls` 映射为 RawToolCall。
//! 没有关联 ID 的工具结果（来自文本内嵌调用）以 user 角色的观察消息发送，API 不接受孤立的 tool 消息。

use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionResponseMessage,
    CreateChatCompletionRequestArgs, CreateChatCompletionResponse, FunctionObjectArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::AgentError;
use crate::llm::{LlmClient, ModelReply, RawToolCall};
use crate::memory::{Message, Role};
use crate::tools::value::args_to_json;
use crate::tools::{CallOrigin, CommandSpec};

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";
pub const DEEPSEEK_REASONER: &str = "deepseek-reasoner";

/// DeepSeek 客户端：持有 async_openai Client 与模型名
pub struct DeepSeekClient {
    client: Client<OpenAIConfig>,
    model: String,
    request_timeout: Duration,
}

impl DeepSeekClient {
    /// api_key 为空时回退到环境变量 `DEEPSEEK_API_KEY`
    pub fn new(
        base_url: Option<&str>,
        model: &str,
        api_key: Option<&str>,
        request_timeout_secs: u64,
    ) -> Result<Self, AgentError> {
        let api_key = api_key
            .filter(|k| !k.trim().is_empty())
            .map(String::from)
            .or_else(|| std::env::var("DEEPSEEK_API_KEY").ok())
            .ok_or_else(|| {
                AgentError::Config("DeepSeek API key missing (set llm.api_key or DEEPSEEK_API_KEY)".into())
            })?;

        let config = OpenAIConfig::new()
            .with_api_base(base_url.unwrap_or(DEEPSEEK_BASE_URL).trim_end_matches('/'))
            .with_api_key(api_key);

        Ok(Self {
            client: Client::with_config(config),
            model: if model.is_empty() { DEEPSEEK_CHAT } else { model }.to_string(),
            request_timeout: Duration::from_secs(request_timeout_secs.max(1)),
        })
    }
}

fn build_error(e: impl std::fmt::Display) -> AgentError {
    AgentError::Transport(format!("failed to build DeepSeek request: {e}"))
}

/// 对话历史 -> API 消息
pub fn to_api_messages(history: &[Message]) -> Result<Vec<ChatCompletionRequestMessage>, AgentError> {
    history.iter().map(to_api_message).collect()
}

fn to_api_message(m: &Message) -> Result<ChatCompletionRequestMessage, AgentError> {
    let message = match m.role {
        Role::System => ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(m.content.clone())
                .build()
                .map_err(build_error)?,
        ),
        Role::User => ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(m.content.clone())
                .build()
                .map_err(build_error)?,
        ),
        Role::Tool => match &m.tool_call_id {
            Some(id) => ChatCompletionRequestMessage::Tool(
                ChatCompletionRequestToolMessageArgs::default()
                    .content(m.content.clone())
                    .tool_call_id(id.clone())
                    .build()
                    .map_err(build_error)?,
            ),
            None => ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(format!("Observation: {}", m.content))
                    .build()
                    .map_err(build_error)?,
            ),
        },
        Role::Assistant => {
            let structured: Vec<Value> = m
                .tool_calls
                .iter()
                .filter(|c| c.origin == CallOrigin::Structured)
                .filter_map(|c| {
                    c.id.as_ref().map(|id| {
                        json!({
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": c.name,
                                "arguments": args_to_json(&c.arguments).to_string(),
                            },
                        })
                    })
                })
                .collect();
            if structured.is_empty() {
                ChatCompletionRequestMessage::Assistant(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map_err(build_error)?,
                )
            } else {
                // tool_calls 的线上格式在各版本间稳定，经 serde 转入 async_openai 类型
                serde_json::from_value(json!({
                    "role": "assistant",
                    "content": m.content,
                    "tool_calls": structured,
                }))
                .map_err(build_error)?
            }
        }
    };
    Ok(message)
}

/// 目录 -> API tools（JSON 形式，写入请求前再转为 async_openai 类型）
pub fn to_api_tools(catalog: &[CommandSpec]) -> Result<Vec<Value>, AgentError> {
    catalog
        .iter()
        .map(|spec| {
            let function = FunctionObjectArgs::default()
                .name(spec.name.clone())
                .description(spec.description.clone())
                .parameters(spec.parameters_schema())
                .build()
                .map_err(build_error)?;
            Ok(json!({ "type": "function", "function": function }))
        })
        .collect()
}

/// 响应中的首条消息 -> ModelReply
pub fn reply_from_response(response: CreateChatCompletionResponse) -> Result<ModelReply, AgentError> {
    let message = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| AgentError::Transport("no choices in DeepSeek response".into()))?
        .message;
    reply_from_message(message)
}

fn reply_from_message(message: ChatCompletionResponseMessage) -> Result<ModelReply, AgentError> {
    let calls = serde_json::to_value(&message.tool_calls)
        .map_err(|e| AgentError::Transport(format!("failed to read DeepSeek tool calls: {e}")))?;
    let tool_calls = calls
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .filter_map(|c| {
                    let function = c.get("function")?;
                    Some(RawToolCall::new(
                        c.get("id").and_then(Value::as_str).unwrap_or_default(),
                        function.get("name")?.as_str()?,
                        function
                            .get("arguments")
                            .and_then(Value::as_str)
                            .unwrap_or_default(),
                    ))
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(ModelReply {
        text: message.content.unwrap_or_default(),
        tool_calls,
    })
}

#[async_trait]
impl LlmClient for DeepSeekClient {
    async fn chat(
        &self,
        history: &[Message],
        catalog: Option<&[CommandSpec]>,
    ) -> Result<ModelReply, AgentError> {
        let mut request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(to_api_messages(history)?)
            .build()
            .map_err(build_error)?;
        if let Some(catalog) = catalog.filter(|c| !c.is_empty()) {
            request.tools = Some(
                serde_json::from_value(Value::Array(to_api_tools(catalog)?)).map_err(build_error)?,
            );
        }
        tracing::debug!(
            model = %self.model,
            messages = history.len(),
            tools = catalog.map_or(0, |c| c.len()),
            "DeepSeek request"
        );

        let response = tokio::time::timeout(self.request_timeout, self.client.chat().create(request))
            .await
            .map_err(|_| {
                AgentError::Transport(format!(
                    "DeepSeek request timed out after {}s",
                    self.request_timeout.as_secs()
                ))
            })?
            .map_err(|e| {
                tracing::warn!("DeepSeek API error: {}", e);
                AgentError::Transport(format!("DeepSeek request failed: {e}"))
            })?;

        let reply = reply_from_response(response)?;
        tracing::debug!(
            text_len = reply.text.len(),
            tool_calls = reply.tool_calls.len(),
            "DeepSeek reply"
        );
        Ok(reply)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
