//! 记忆层：会话短期记忆（固定系统提示 + 有上限的滑动窗口）

pub mod conversation;

pub use conversation::{ConversationMemory, Message, Role};
