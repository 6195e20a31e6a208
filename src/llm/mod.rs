//! LLM 层：客户端抽象与实现（DeepSeek / Mock / 脚本化）

pub mod deepseek;
pub mod mock;
pub mod traits;

pub use deepseek::{DeepSeekClient, DEEPSEEK_BASE_URL, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use mock::{MockLlmClient, RecordedRequest, ScriptedLlmClient};
pub use traits::{LlmClient, ModelReply, RawToolCall};
