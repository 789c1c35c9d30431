//! 结构化生成客户端抽象
//!
//! generate_structured 接收 prompt / system / 目标 JSON Schema / 温度，
//! 返回应当符合 schema 的 JSON 值；是否真正符合由 Planner 校验与修复。

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// 生成协作者可能返回的错误
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Generation backend error: {0}")]
    Backend(String),

    #[error("Rate limited, retry after {retry_after_ms} ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Invalid output: {0}")]
    InvalidOutput(String),
}

/// 结构化生成客户端 trait
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// 按目标 schema 生成一个 JSON 值
    async fn generate_structured(
        &self,
        prompt: &str,
        system: &str,
        target_schema: &Value,
        temperature: f32,
    ) -> Result<Value, GenerationError>;
}
