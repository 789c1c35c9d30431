//! 控制器错误类型
//!
//! 图节点内部的故障不以异常形式外泄（节点契约），工具故障统一收敛为
//! ToolResult；AgentError 只在组件 API 边界（Planner / Storage / 配置）上出现。

use thiserror::Error;

/// 控制器运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 修复后仍不合法且无法降级为回退计划
    #[error("Plan invalid: {0}")]
    PlanInvalid(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    /// Checkpoint 不存在，无法恢复
    #[error("No checkpoint for task: {0}")]
    CheckpointNotFound(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;

impl From<anyhow::Error> for AgentError {
    fn from(e: anyhow::Error) -> Self {
        AgentError::StorageError(e.to_string())
    }
}

impl From<config::ConfigError> for AgentError {
    fn from(e: config::ConfigError) -> Self {
        AgentError::ConfigError(e.to_string())
    }
}
