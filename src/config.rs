//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TASKBEE__*` 覆盖（双下划线表示嵌套，如 `TASKBEE__LLM__PROVIDER=mock`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub store: StoreSection,
    pub reminder: ReminderSection,
}

/// [app] 段：应用名、历史上限、工具轮数与超时
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 对话历史上限（含固定的系统消息）
    #[serde(default = "default_max_context_messages")]
    pub max_context_messages: usize,
    /// 单回合内与模型往返的最大轮数
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            max_context_messages: default_max_context_messages(),
            max_tool_rounds: default_max_tool_rounds(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

fn default_max_context_messages() -> usize {
    31
}

fn default_max_tool_rounds() -> usize {
    5
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：deepseek / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 未设置时读取环境变量 DEEPSEEK_API_KEY
    pub api_key: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

/// [store] 段：任务持久化；未设置 db_path 时仅保存在内存
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StoreSection {
    pub db_path: Option<PathBuf>,
}

/// [reminder] 段：逾期 / 即将到期提醒
#[derive(Debug, Clone, Deserialize)]
pub struct ReminderSection {
    #[serde(default = "default_reminder_enabled")]
    pub enabled: bool,
    #[serde(default = "default_reminder_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_upcoming_window")]
    pub upcoming_window_hours: u64,
}

impl Default for ReminderSection {
    fn default() -> Self {
        Self {
            enabled: default_reminder_enabled(),
            interval_secs: default_reminder_interval(),
            upcoming_window_hours: default_upcoming_window(),
        }
    }
}

fn default_reminder_enabled() -> bool {
    true
}

fn default_reminder_interval() -> u64 {
    3600
}

fn default_upcoming_window() -> u64 {
    24
}

/// 从 config 目录加载配置，环境变量 TASKBEE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TASKBEE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TASKBEE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
