//! taskbee - 聊天任务助手
//!
//! 模块划分：
//! - **agent**: 无头运行时装配（存储 + 分发器 + 编排器 + 会话）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类与优雅关闭
//! - **gateway**: 会话存储，聊天传输层的入口
//! - **llm**: LLM 客户端抽象与实现（DeepSeek / Mock）
//! - **memory**: 带固定系统提示的对话历史
//! - **react**: 多轮工具调用编排与文本内嵌调用解析
//! - **task**: 依赖感知的任务图、持久化、格式化、到期提醒
//! - **tools**: 命令注册、参数转换、分发执行与任务命令集

pub mod agent;
pub mod config;
pub mod core;
pub mod gateway;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod task;
pub mod tools;
