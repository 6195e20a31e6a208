//! 单个会话
//!
//! 每个会话对应一个聊天身份，持有带固定系统提示的对话历史。
//! 系统提示在每个回合刷新，保证其中的当前时间可用于换算相对截止时间。

use chrono::{DateTime, Local, Utc};

use crate::memory::{ConversationMemory, Message, Role};

/// 开启新话题的控制文本
const RESET_TEXTS: &[&str] = &["reset topic", "clear", "换个话题", "换个话题吧", "清空", "清空对话"];

pub const RESET_REPLY: &str = "好的，已清空之前的对话，我们开始一个新话题吧。";

pub const HELP_TEXT: &str = "欢迎使用任务助手，你可以这样使用：
1. 输入\"help\"查看帮助
2. 输入\"get:session\" 获取当前话题的聊天记录
3. 输入\"换个话题\"或\"清空\" 重新开始一个话题（保留系统设定）
4. 直接用自然语言管理任务，例如：\"创建任务：明天下午3点前提交周报\"、\"查看我的任务\"、\"把任务2标记为已完成\"";

/// 会话控制指令（不经过模型）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlCommand {
    Reset,
    Transcript,
    Help,
}

impl ControlCommand {
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if RESET_TEXTS.iter().any(|t| t.eq_ignore_ascii_case(text)) {
            Some(ControlCommand::Reset)
        } else if text == "get:session" {
            Some(ControlCommand::Transcript)
        } else if text.eq_ignore_ascii_case("help") {
            Some(ControlCommand::Help)
        } else {
            None
        }
    }
}

/// 固定系统提示：用户身份、当前时间与工具使用规则
pub fn system_prompt(user_identity: &str, now: DateTime<Local>) -> String {
    format!(
        "你是一个任务管理助手，同时也可以进行日常对话。回答直接、自然，不要使用 markdown 格式。

当前用户ID: {user_identity}
当前时间: {now}

任务管理工具使用规则：
- 只有在用户明确要求创建、查看、更新或删除任务时才使用工具；用户只是提到计划时正常回复即可
- 创建任务：使用 create_task，creator_id 使用: {user_identity}
- 用户提到时间（如\"今天13点\"、\"明天12点\"、\"后天下午4点\"）时，换算为 \"YYYY-MM-DD HH:MM:SS\" 格式再传给 due_time
- 列出任务：使用 list_tasks。用户说\"我的任务\"时传入 creator_id 为当前用户ID；说\"所有任务\"、\"团队任务\"时不传 creator_id
- 依赖关系使用任务ID列表；不能形成循环依赖，被依赖的任务不能删除
- 工具返回结果后，用简洁的自然语言向用户总结",
        now = now.format("%Y-%m-%d %H:%M:%S (%A)"),
    )
}

/// 单个会话
#[derive(Debug)]
pub struct Session {
    /// 内部会话 ID（日志关联）
    pub id: String,
    pub conversation_id: String,
    pub user_identity: String,
    pub memory: ConversationMemory,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl Session {
    pub fn new(conversation_id: &str, user_identity: &str, max_messages: usize) -> Self {
        let now = Utc::now();
        Self {
            id: format!("session_{}", uuid::Uuid::new_v4()),
            conversation_id: conversation_id.to_string(),
            user_identity: user_identity.to_string(),
            memory: ConversationMemory::with_pinned(
                max_messages,
                Message::system(system_prompt(user_identity, Local::now())),
            ),
            created_at: now,
            last_active: now,
        }
    }

    /// 刷新系统提示（身份可能随传输层变化，时间每回合更新）
    pub fn refresh_prompt(&mut self, user_identity: &str) {
        if !user_identity.is_empty() {
            self.user_identity = user_identity.to_string();
        }
        self.memory
            .set_pinned(Message::system(system_prompt(&self.user_identity, Local::now())));
        self.last_active = Utc::now();
    }

    /// 截断回固定系统消息
    pub fn reset(&mut self) {
        self.memory.clear();
    }

    /// 非系统消息的聊天记录
    pub fn transcript(&self) -> String {
        let mut out = String::new();
        for m in self.memory.messages() {
            let speaker = match m.role {
                Role::System | Role::Tool => continue,
                Role::User => "你",
                Role::Assistant => "机器人",
            };
            out.push_str(speaker);
            out.push_str(": ");
            out.push_str(&m.content);
            out.push('\n');
        }
        if out.is_empty() {
            "暂无聊天记录".to_string()
        } else {
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_command_parse() {
        assert_eq!(ControlCommand::parse(" 换个话题 "), Some(ControlCommand::Reset));
        assert_eq!(ControlCommand::parse("Reset Topic"), Some(ControlCommand::Reset));
        assert_eq!(ControlCommand::parse("get:session"), Some(ControlCommand::Transcript));
        assert_eq!(ControlCommand::parse("help"), Some(ControlCommand::Help));
        assert_eq!(ControlCommand::parse("清空我的任务"), None);
    }

    #[test]
    fn test_prompt_embeds_identity() {
        let session = Session::new("conv-1", "wxid_42", 31);
        let pinned = session.memory.pinned().unwrap();
        assert_eq!(pinned.role, Role::System);
        assert!(pinned.content.contains("当前用户ID: wxid_42"));
        assert!(pinned.content.contains("creator_id 使用: wxid_42"));
    }

    #[test]
    fn test_transcript_skips_system_and_tool() {
        let mut session = Session::new("c", "u", 31);
        session.memory.push(Message::user("你好"));
        session.memory.push(Message::assistant("你好！"));
        assert_eq!(session.transcript(), "你: 你好\n机器人: 你好！\n");
        session.reset();
        assert_eq!(session.transcript(), "暂无聊天记录");
        assert!(session.memory.pinned().is_some());
    }
}
