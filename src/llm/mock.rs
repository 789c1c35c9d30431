//! Mock 生成客户端（用于测试，无需 API）
//!
//! 预置一个返回序列：每次调用弹出下一个值；序列耗尽后返回 Backend 错误，
//! 便于测试 Planner 的回退路径。

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{GenerationClient, GenerationError};

/// Mock 客户端：按序返回预置 JSON
#[derive(Debug, Default)]
pub struct MockGeneration {
    responses: Mutex<Vec<Result<Value, String>>>,
}

impl MockGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置一个成功返回值（先入先出）
    pub fn push_ok(self, value: Value) -> Self {
        self.responses
            .lock()
            .expect("mock lock poisoned")
            .push(Ok(value));
        self
    }

    /// 预置一个失败
    pub fn push_err(self, message: impl Into<String>) -> Self {
        self.responses
            .lock()
            .expect("mock lock poisoned")
            .push(Err(message.into()));
        self
    }
}

#[async_trait]
impl GenerationClient for MockGeneration {
    async fn generate_structured(
        &self,
        _prompt: &str,
        _system: &str,
        _target_schema: &Value,
        _temperature: f32,
    ) -> Result<Value, GenerationError> {
        let mut responses = self.responses.lock().expect("mock lock poisoned");
        if responses.is_empty() {
            return Err(GenerationError::Backend("mock exhausted".to_string()));
        }
        match responses.remove(0) {
            Ok(v) => Ok(v),
            Err(e) => Err(GenerationError::Backend(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_sequence() {
        let gen = MockGeneration::new()
            .push_ok(serde_json::json!({"objective": "a"}))
            .push_err("boom");

        let schema = serde_json::json!({});
        let first = gen.generate_structured("p", "s", &schema, 0.0).await;
        assert_eq!(first.unwrap()["objective"], "a");
        let second = gen.generate_structured("p", "s", &schema, 0.0).await;
        assert!(second.is_err());
        let third = gen.generate_structured("p", "s", &schema, 0.0).await;
        assert!(matches!(third, Err(GenerationError::Backend(_))));
    }
}
