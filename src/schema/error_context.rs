//! 失败分类
//!
//! ErrorContext 是所有失败在图节点间流转的统一形态：Executor 边界捕获的工具错误
//! 由 Evaluator 归一化为 ErrorContext，Decision Engine 据此路由。

use serde::{Deserialize, Serialize};

/// 错误类型枚举（与工具侧 error_type 字符串一一对应）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Network,
    Authentication,
    Authorization,
    Validation,
    Timeout,
    RateLimit,
    ResourceNotFound,
    Conflict,
    InternalError,
    ExternalApi,
    Unknown,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Network => "network",
            ErrorType::Authentication => "authentication",
            ErrorType::Authorization => "authorization",
            ErrorType::Validation => "validation",
            ErrorType::Timeout => "timeout",
            ErrorType::RateLimit => "rate_limit",
            ErrorType::ResourceNotFound => "resource_not_found",
            ErrorType::Conflict => "conflict",
            ErrorType::InternalError => "internal_error",
            ErrorType::ExternalApi => "external_api",
            ErrorType::Unknown => "unknown",
        }
    }

    /// 从工具返回的 error_type 字符串解析；未知字符串归入 Unknown
    pub fn parse(s: &str) -> Self {
        match s {
            "network" => ErrorType::Network,
            "authentication" => ErrorType::Authentication,
            "authorization" => ErrorType::Authorization,
            "validation" => ErrorType::Validation,
            "timeout" => ErrorType::Timeout,
            "rate_limit" => ErrorType::RateLimit,
            "resource_not_found" => ErrorType::ResourceNotFound,
            "conflict" => ErrorType::Conflict,
            "internal_error" => ErrorType::InternalError,
            "external_api" => ErrorType::ExternalApi,
            _ => ErrorType::Unknown,
        }
    }

    /// 认证 / 授权类错误：永不重试，直接升级给用户
    pub fn is_auth(&self) -> bool {
        matches!(self, ErrorType::Authentication | ErrorType::Authorization)
    }

    /// 天然瞬态的错误类型（网络抖动 / 超时 / 限流）
    pub fn is_naturally_transient(&self) -> bool {
        matches!(
            self,
            ErrorType::Network | ErrorType::Timeout | ErrorType::RateLimit
        )
    }
}

/// 错误严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// 结构化失败分类：Decision Engine 的唯一错误输入
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub error_type: ErrorType,
    pub severity: Severity,
    /// 是否存在恢复路径（重试或重规划）
    pub is_recoverable: bool,
    /// 是否为瞬态错误（等待后重试有望成功）
    pub is_transient: bool,
    /// 是否需要用户介入（如重新授权）
    pub requires_user_action: bool,
    pub retry_recommended: bool,
    pub replan_recommended: bool,
    /// 升级提示中展示给用户的建议动作
    #[serde(default)]
    pub suggested_actions: Vec<String>,
    /// 诊断细节（原始错误消息等）
    #[serde(default)]
    pub detail: Option<String>,
}

impl ErrorContext {
    /// 构造一个中性默认分类（Unknown / Medium / 可恢复），由分类器逐项覆写
    pub fn unclassified(detail: impl Into<String>) -> Self {
        Self {
            error_type: ErrorType::Unknown,
            severity: Severity::Medium,
            is_recoverable: true,
            is_transient: false,
            requires_user_action: false,
            retry_recommended: false,
            replan_recommended: false,
            suggested_actions: Vec::new(),
            detail: Some(detail.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_type_round_trip() {
        for ty in [
            ErrorType::Network,
            ErrorType::Authentication,
            ErrorType::Authorization,
            ErrorType::Validation,
            ErrorType::Timeout,
            ErrorType::RateLimit,
            ErrorType::ResourceNotFound,
            ErrorType::Conflict,
            ErrorType::InternalError,
            ErrorType::ExternalApi,
            ErrorType::Unknown,
        ] {
            assert_eq!(ErrorType::parse(ty.as_str()), ty);
        }
    }

    #[test]
    fn test_unrecognized_string_is_unknown() {
        assert_eq!(ErrorType::parse("quantum_flux"), ErrorType::Unknown);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }
}
