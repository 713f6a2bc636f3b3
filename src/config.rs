//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CAPAGENT__*` 覆盖（双下划线表示嵌套，如 `CAPAGENT__ENGINE__STEP_BUDGET=80`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::SchedulingMode;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineSection,
    pub retrieval: RetrievalSection,
    pub sandbox: SandboxSection,
    pub llm: LlmSection,
    pub checkpoint: CheckpointSection,
}

/// [engine] 段：重试与步数预算、人工确认、检索 K 值、历史窗口
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// 每个子查询的尝试次数上限
    pub max_attempts: u32,
    /// 整个会话的状态转移上限
    pub step_budget: usize,
    pub human_confirmation: bool,
    /// 能力描述使用完整文档（不裁剪）
    pub full_doc_strings: bool,
    pub manager_k: usize,
    pub code_k: usize,
    pub capability_k: usize,
    pub history_window: usize,
    pub scheduling: SchedulingMode,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            step_budget: 50,
            human_confirmation: false,
            full_doc_strings: false,
            manager_k: 7,
            code_k: 7,
            capability_k: 5,
            history_window: 10,
            scheduling: SchedulingMode::default(),
        }
    }
}

/// [retrieval] 段：索引位置与嵌入后端
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalSection {
    /// 未设置时使用内存索引
    pub index_path: Option<PathBuf>,
    pub candidate_k: usize,
    /// 未设置时使用本地特征哈希嵌入
    pub embedding_model: Option<String>,
    pub embedding_base_url: Option<String>,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            index_path: None,
            candidate_k: 20,
            embedding_model: None,
            embedding_base_url: None,
        }
    }
}

/// [sandbox] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SandboxSection {
    pub timeout_secs: u64,
    pub max_operations: u64,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_operations: 1_000_000,
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai（任何 OpenAI 兼容服务）/ mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

/// [checkpoint] 段：未设置 path 时使用内存检查点
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CheckpointSection {
    pub path: Option<PathBuf>,
}

/// 从 config 目录加载配置，环境变量 CAPAGENT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CAPAGENT__*（双下划线表示嵌套键）
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
        config::Environment::with_prefix("CAPAGENT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
