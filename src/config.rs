//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `MEND__*` 覆盖（双下划线表示嵌套，如 `MEND__ENGINE__MAX_FILES=5`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub engine: EngineSection,
    pub memory: MemorySection,
    pub snapshot: SnapshotSection,
    pub tools: ToolsSection,
}

/// [app] 段
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 被修复项目的根目录；CLI 参数优先
    pub project_root: Option<PathBuf>,
}

/// 失败后重试：沿用同一计划，或先重新 DECIDE
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    #[default]
    SamePlan,
    Replan,
}

/// [engine] 段：OODA 循环上限与受保护路径
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub max_iterations: usize,
    /// 单次计划执行最多落地的 create/modify/delete 数
    pub max_files: usize,
    /// 前缀匹配；永远不会被修改或删除
    pub protected_paths: Vec<String>,
    pub history_limit: usize,
    pub related_files_limit: usize,
    pub trace_depth: usize,
    pub retry_strategy: RetryStrategy,
    pub dry_run: bool,
    pub approval: ApprovalSection,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            max_files: 10,
            protected_paths: default_protected_paths(),
            history_limit: 50,
            related_files_limit: 10,
            trace_depth: 3,
            retry_strategy: RetryStrategy::SamePlan,
            dry_run: false,
            approval: ApprovalSection::default(),
        }
    }
}

fn default_protected_paths() -> Vec<String> {
    vec![
        ".env".into(),
        ".git/".into(),
        "node_modules/".into(),
        "package-lock.json".into(),
        "lib/self-improvement/".into(),
    ]
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    /// 自动批准（记录 warn）
    #[default]
    None,
    Console,
    Webhook,
    Deny,
}

/// [engine.approval] 段：需要审批时默认使用的审批方式
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApprovalSection {
    pub mode: ApprovalMode,
    pub timeout_secs: u64,
    pub webhook_url: Option<String>,
}

impl Default for ApprovalSection {
    fn default() -> Self {
        Self {
            mode: ApprovalMode::None,
            timeout_secs: 120,
            webhook_url: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    #[default]
    Memory,
    Json,
    Sqlite,
}

/// [memory] 段：修复模式库
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    pub max_patterns: usize,
    /// find_similar 的最低相似度
    pub relevance_floor: f64,
    pub recency_window_days: i64,
    pub store: StoreKind,
    /// json：目录；sqlite：数据库文件
    pub path: Option<PathBuf>,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            max_patterns: 100,
            relevance_floor: 0.1,
            recency_window_days: 30,
            store: StoreKind::Memory,
            path: None,
        }
    }
}

/// [snapshot] 段：目录快照的忽略规则与单文件大小上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SnapshotSection {
    pub ignore: Vec<String>,
    pub max_file_kb: u64,
}

impl Default for SnapshotSection {
    fn default() -> Self {
        Self {
            ignore: crate::workspace::DEFAULT_IGNORE
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_file_kb: 512,
        }
    }
}

/// [tools] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
        }
    }
}

/// 从 config 目录加载配置，环境变量 MEND__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 MEND__*（双下划线表示嵌套键）
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
        config::Environment::with_prefix("MEND")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("engine.protected_paths")
            .with_list_parse_key("snapshot.ignore")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
