//! 会话网关：聊天传输层调用 `SessionStore::turn(conversation_id, user_identity, text)`，
//! 得到回复文本。
//!
//! - 每个会话固定一条系统提示（用户身份 + 当前时间 + 工具规则）
//! - 控制文本（换个话题 / 清空 / get:session / help）不经过模型
//! - 历史超出上限时淘汰最旧的非固定消息

mod session;
mod session_store;

pub use session::{system_prompt, ControlCommand, Session, HELP_TEXT, RESET_REPLY};
pub use session_store::{SessionStore, APOLOGY_REPLY, DEFAULT_MAX_CONTEXT_MESSAGES, EMPTY_REPLY};
