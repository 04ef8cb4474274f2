//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BEEHIVE__*` 覆盖（双下划线表示嵌套，如 `BEEHIVE__CHAT__MAX_RETRIES=5`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::chat::{ChatSettings, SelectionPolicy};
use crate::core::ChatError;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub chat: ChatSection,
    pub store: StoreSection,
}

/// [app] 段：应用名、数据目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    /// SQLite 等持久化文件的根目录
    pub data_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "beehive".to_string(),
            data_dir: PathBuf::from("data"),
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / deepseek / mock
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// 单次模型调用超时（秒）
    pub timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            model: None,
            base_url: None,
            timeout_secs: 60,
        }
    }
}

impl LlmSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// [chat] 段：重试、轮数、发言人选择与派发超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatSection {
    pub max_retries: u32,
    pub max_rounds: usize,
    /// auto / round_robin / random / manual
    pub speaker_selection: String,
    pub allow_repeat_speaker: bool,
    /// 被打断时接手的人工代理名
    pub admin_name: String,
    pub dispatch_timeout_secs: u64,
}

impl Default for ChatSection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_rounds: 50,
            speaker_selection: "auto".to_string(),
            allow_repeat_speaker: true,
            admin_name: "Admin".to_string(),
            dispatch_timeout_secs: 300,
        }
    }
}

impl ChatSection {
    pub fn selection_policy(&self) -> Result<SelectionPolicy, ChatError> {
        self.speaker_selection.parse()
    }

    pub fn settings(&self) -> ChatSettings {
        ChatSettings {
            admin_name: self.admin_name.clone(),
            dispatch_timeout: Duration::from_secs(self.dispatch_timeout_secs),
        }
    }
}

/// [store] 段：计划表与消息日志的后端
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// memory / sqlite
    pub backend: String,
    /// 未设置时为 {data_dir}/beehive.db
    pub sqlite_path: Option<PathBuf>,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            sqlite_path: None,
        }
    }
}

impl AppConfig {
    pub fn sqlite_path(&self) -> PathBuf {
        self.store
            .sqlite_path
            .clone()
            .unwrap_or_else(|| self.app.data_dir.join("beehive.db"))
    }
}

/// 从 config 目录加载配置，环境变量 BEEHIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BEEHIVE__*（双下划线表示嵌套键）
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
        config::Environment::with_prefix("BEEHIVE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
