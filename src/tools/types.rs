//! 工具调用值类型
//!
//! ToolInput / ToolResult 是 Executor 与工具之间的线上契约；ToolCapability
//! 供 Planner 生成 prompt 中的可用工具清单。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::ErrorType;

/// 工具能力描述
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCapability {
    pub name: String,
    pub description: String,
    pub supported_actions: Vec<String>,
    #[serde(default)]
    pub required_params: Vec<String>,
    #[serde(default)]
    pub optional_params: Vec<String>,
    /// 需要外部认证的工具（升级 / 风险评估关注点）
    #[serde(default)]
    pub requires_auth: bool,
    /// 每分钟调用上限；None 表示无限制
    #[serde(default)]
    pub rate_limit_per_minute: Option<u32>,
}

impl ToolCapability {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            supported_actions: Vec::new(),
            required_params: Vec::new(),
            optional_params: Vec::new(),
            requires_auth: false,
            rate_limit_per_minute: None,
        }
    }

    /// 依赖外部服务的工具：需认证或受限流
    pub fn is_external_service(&self) -> bool {
        self.requires_auth || self.rate_limit_per_minute.is_some()
    }
}

/// 随工具入参传递的执行上下文快照
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolContext {
    pub plan_id: String,
    pub user_goal: String,
    pub completed_steps: Vec<String>,
    /// 已有输出可供 `${id.field}` 引用的步骤 ID
    pub available_outputs: Vec<String>,
}

/// 工具入参：动作 + 已解析参数 + 上下文 + 超时
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInput {
    pub action: String,
    pub params: HashMap<String, Value>,
    pub context: ToolContext,
    pub timeout_seconds: u64,
    /// 本次调用是否为重试
    #[serde(default)]
    pub is_retry: bool,
}

/// 工具出参：成功时带输出，失败时带 error_type 与消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error_type: Option<ErrorType>,
    #[serde(default)]
    pub error_message: Option<String>,
    /// 实测耗时，由 Executor 回填
    #[serde(default)]
    pub duration_ms: u64,
    /// 附件：封口的 ExecutionLog（序列化形态），供重规划 / 学习使用
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl ToolResult {
    pub fn ok(output: Value) -> Self {
        Self {
            success: true,
            output: Some(output),
            error_type: None,
            error_message: None,
            duration_ms: 0,
            metadata: HashMap::new(),
        }
    }

    pub fn err(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error_type: Some(error_type),
            error_message: Some(message.into()),
            duration_ms: 0,
            metadata: HashMap::new(),
        }
    }
}
