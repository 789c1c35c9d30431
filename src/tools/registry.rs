//! 工具注册表
//!
//! 所有工具实现 Tool trait（capability / execute），由 ToolRegistry 按名注册与查找；
//! 超时与错误兜底在 Executor 边界统一处理，工具本身只需返回 ToolResult。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::tools::{ToolCapability, ToolInput, ToolResult};

/// 工具 trait：能力描述（供 Planner 生成可用工具清单）+ 异步执行
///
/// execute 返回 Err(String) 表示工具自身抛出的故障，由 Executor 兜底转为
/// internal_error 的 ToolResult，绝不向图节点传播。
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具能力描述
    fn capability(&self) -> ToolCapability;

    /// 执行工具
    async fn execute(&self, input: ToolInput) -> Result<ToolResult, String>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>，支持 register / get / capabilities
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.capability().name;
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.capability().name;
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// 全部能力描述，用于生成 prompt 中的 Available tools 段落与风险评估
    pub fn capabilities(&self) -> Vec<ToolCapability> {
        let mut caps: Vec<ToolCapability> =
            self.tools.values().map(|t| t.capability()).collect();
        caps.sort_by(|a, b| a.name.cmp(&b.name));
        caps
    }

    /// 能力清单的 JSON 形态（嵌入 Generation prompt）
    pub fn capabilities_json(&self) -> String {
        serde_json::to_string_pretty(&self.capabilities()).unwrap_or_else(|_| "[]".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::EchoTool;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        assert!(registry.contains("echo"));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.tool_names(), vec!["echo"]);
    }

    #[test]
    fn test_capabilities_json_is_valid() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let json = registry.capabilities_json();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["name"], "echo");
    }
}
