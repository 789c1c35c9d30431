//! 计划与步骤定义
//!
//! Plan 由 Planner 生成并整体持有；replan 时整体替换。Step 一经创建不可变，
//! 仅 Planner 侧的学习调优（超时 / 重试上限）可在边界内修改。

use std::collections::HashMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 计划优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

/// 步骤失败时的处置策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum FailureAction {
    /// 按退避策略重试
    Retry,
    /// 跳过该步骤继续
    Skip,
    /// 终止整个计划
    Abort,
    /// 丢弃当前计划重新规划
    Replan,
}

impl Default for FailureAction {
    fn default() -> Self {
        FailureAction::Retry
    }
}

/// 步骤重试次数边界
pub const MIN_RETRIES: u32 = 1;
pub const MAX_RETRIES: u32 = 5;
/// 步骤超时边界（秒）
pub const MIN_TIMEOUT_SECS: u64 = 10;
pub const MAX_TIMEOUT_SECS: u64 = 300;
/// 计划步骤数边界
pub const MIN_STEPS: usize = 1;
pub const MAX_STEPS: usize = 10;

/// 原子工作单元：绑定一个工具动作
///
/// params 的值可以是字面量，也可以是 `${step_id.field}` 形式的引用，
/// 由 Executor 在执行前解析为前序步骤的输出。
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Step {
    /// 唯一且稳定的步骤 ID
    pub id: String,
    /// 该步骤要完成的动作描述
    pub action: String,
    /// 绑定的工具名
    pub tool: String,
    /// 工具参数（字面量或 `${step_id.field}` 引用）
    #[serde(default)]
    pub params: HashMap<String, Value>,
    /// 依赖的前序步骤 ID
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// 成功判据（自由文本，仅供参考）
    #[serde(default)]
    pub success_criteria: Option<String>,
    /// 失败处置策略
    #[serde(default)]
    pub failure_action: FailureAction,
    /// 最大重试次数（1-5）
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 单次执行超时（10-300 秒）
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout_seconds() -> u64 {
    60
}

impl Step {
    pub fn new(id: impl Into<String>, action: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            tool: tool.into(),
            params: HashMap::new(),
            depends_on: Vec::new(),
            success_criteria: None,
            failure_action: FailureAction::default(),
            max_retries: default_max_retries(),
            timeout_seconds: default_timeout_seconds(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn with_depends_on(mut self, deps: Vec<String>) -> Self {
        self.depends_on = deps;
        self
    }

    pub fn with_failure_action(mut self, action: FailureAction) -> Self {
        self.failure_action = action;
        self
    }

    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_seconds = secs;
        self
    }
}

/// 面向目标的有序步骤集合
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Plan {
    /// 计划 ID
    pub id: String,
    /// 计划目标
    pub objective: String,
    /// 有序步骤（1-10 个）
    pub steps: Vec<Step>,
    /// 优先级
    #[serde(default)]
    pub priority: Priority,
    /// 标签
    #[serde(default)]
    pub tags: Vec<String>,
    /// 自由元数据；风险评估结果写入 context["risks"]
    #[serde(default)]
    pub context: HashMap<String, Value>,
}

impl Plan {
    pub fn new(objective: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            objective: objective.into(),
            steps,
            priority: Priority::default(),
            tags: Vec::new(),
            context: HashMap::new(),
        }
    }

    /// 按 ID 查找步骤
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_ids(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.id.clone()).collect()
    }
}

/// Generation 返回的宽松计划草稿：字段可缺失，交由 Planner 校验与修复
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct PlanDraft {
    #[serde(default)]
    pub objective: Option<String>,
    #[serde(default)]
    pub steps: Vec<StepDraft>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// 步骤草稿：ID / 工具等字段允许缺失或非法
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct StepDraft {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub params: HashMap<String, Value>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub success_criteria: Option<String>,
    #[serde(default)]
    pub failure_action: Option<FailureAction>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_builder_defaults() {
        let step = Step::new("step_1", "echo hello", "echo");
        assert_eq!(step.max_retries, 3);
        assert_eq!(step.timeout_seconds, 60);
        assert_eq!(step.failure_action, FailureAction::Retry);
    }

    #[test]
    fn test_plan_lookup() {
        let plan = Plan::new(
            "demo",
            vec![Step::new("a", "act", "echo"), Step::new("b", "act", "echo")],
        );
        assert!(plan.step("a").is_some());
        assert!(plan.step("missing").is_none());
        assert_eq!(plan.step_ids(), vec!["a", "b"]);
    }

    #[test]
    fn test_step_draft_deserializes_partial_json() {
        let draft: StepDraft =
            serde_json::from_str(r#"{"action": "send mail", "tool": "email"}"#).unwrap();
        assert!(draft.id.is_none());
        assert_eq!(draft.tool.as_deref(), Some("email"));
    }
}
