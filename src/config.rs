//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `FORAGER__*` 覆盖（双下划线表示嵌套，
//! 如 `FORAGER__CONTROLLER__MAX_CYCLES=50`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub controller: ControllerSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub planner: PlannerSection,
    #[serde(default)]
    pub executor: ExecutorSection,
    #[serde(default)]
    pub evaluator: EvaluatorSection,
    #[serde(default)]
    pub storage: StorageSection,
}

/// [controller] 段：循环保护与任务总时限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControllerSection {
    /// 经过 decide 节点的最大次数，超过强制 abort
    pub max_cycles: u32,
    /// 任务总时限（秒），超过由 Decision Engine 判 abort
    pub deadline_seconds: u64,
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            max_cycles: 30,
            deadline_seconds: 1800,
        }
    }
}

/// [retry] 段：退避参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub initial_delay_seconds: f64,
    pub backoff_multiplier: f64,
    /// 单次退避延迟上限（秒）
    pub max_delay_seconds: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            initial_delay_seconds: 1.0,
            backoff_multiplier: 2.0,
            max_delay_seconds: 60.0,
        }
    }
}

/// [planner] 段：修复用默认工具、记忆片段数、生成温度
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerSection {
    /// 未知工具修复时的替换目标
    pub default_tool: String,
    /// 注入 prompt 的记忆片段上限
    pub memory_snippets: usize,
    pub temperature: f32,
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            default_tool: "echo".to_string(),
            memory_snippets: 3,
            temperature: 0.2,
        }
    }
}

/// [executor] 段：并发扇出上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorSection {
    /// 无依赖步骤并发派发的最大扇出
    pub max_fan_out: usize,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self { max_fan_out: 3 }
    }
}

/// [evaluator] 段：置信度相关可调参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvaluatorSection {
    /// 快速完成阈值（毫秒），低于此值加 0.1 置信度
    pub fast_completion_ms: u64,
    /// 工具近期成功率高于此值加 0.1 置信度
    pub success_rate_bonus_threshold: f64,
    /// 连续 internal_error 达到该次数判 Critical 并建议重规划
    pub internal_error_threshold: u32,
}

impl Default for EvaluatorSection {
    fn default() -> Self {
        Self {
            fast_completion_ms: 2000,
            success_rate_bonus_threshold: 0.9,
            internal_error_threshold: 3,
        }
    }
}

/// [storage] 段：持久化根目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// 未设置时用 ./data
    pub root: Option<PathBuf>,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self { root: None }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            controller: ControllerSection::default(),
            retry: RetrySection::default(),
            planner: PlannerSection::default(),
            executor: ExecutorSection::default(),
            evaluator: EvaluatorSection::default(),
            storage: StorageSection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 FORAGER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 FORAGER__*（双下划线表示嵌套键）
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
        config::Environment::with_prefix("FORAGER")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 重新从磁盘与环境变量加载配置（配置热更新：调用方决定是否用新配置重建控制器）
pub fn reload_config() -> Result<AppConfig, config::ConfigError> {
    load_config(None)
}
