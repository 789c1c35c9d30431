//! Echo 工具（测试与修复回退用）

use async_trait::async_trait;

use crate::tools::{Tool, ToolCapability, ToolInput, ToolResult};

/// Echo 工具：回显 text 参数；也是未知工具修复时的默认替换目标
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn capability(&self) -> ToolCapability {
        let mut cap = ToolCapability::new("echo", "Echo text back. Params: {\"text\": \"message\"}");
        cap.supported_actions = vec!["echo".to_string()];
        cap.optional_params = vec!["text".to_string()];
        cap
    }

    async fn execute(&self, input: ToolInput) -> Result<ToolResult, String> {
        let text = input
            .params
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or("(empty)");
        Ok(ToolResult::ok(serde_json::json!({ "text": text })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolContext;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_echo_round_trip() {
        let mut params = HashMap::new();
        params.insert("text".to_string(), serde_json::json!("hello"));
        let input = ToolInput {
            action: "echo".to_string(),
            params,
            context: ToolContext::default(),
            timeout_seconds: 10,
            is_retry: false,
        };
        let result = EchoTool.execute(input).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output.unwrap()["text"], "hello");
    }
}
