//! Planner：目标 -> 已校验 Plan
//!
//! 流程：可选记忆检索 -> 结构化生成 -> 校验 -> 修复（补 ID / 删悬空依赖 / 替换未知
//! 工具 / 边界裁剪）-> 二次校验 -> 失败则降级为单步回退计划；随后 optimize（占位）
//! 与风险评估（最长依赖链 DFS、超时与外部服务统计）写入 plan.context["risks"]。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use schemars::schema_for;
use serde_json::Value;

use crate::config::PlannerSection;
use crate::core::{AgentError, Result};
use crate::llm::GenerationClient;
use crate::memory::MemoryClient;
use crate::schema::{
    AgentState, FailureAction, Plan, PlanDraft, Priority, Step, MAX_RETRIES, MAX_STEPS,
    MAX_TIMEOUT_SECS, MIN_RETRIES, MIN_STEPS, MIN_TIMEOUT_SECS,
};
use crate::storage::ToolUsage;
use crate::tools::ToolRegistry;

/// 依赖链长度超过该值时附加风险警告
const CHAIN_WARN_THRESHOLD: usize = 5;
/// 步骤超时超过该值（秒）时附加风险警告
const TIMEOUT_WARN_SECS: u64 = 120;

/// 校验发现的问题
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    EmptyPlan,
    TooManySteps(usize),
    MissingId(usize),
    DuplicateId(String),
    DanglingDependency { step_id: String, dep: String },
    UnknownTool { step_id: String, tool: String },
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationIssue::EmptyPlan => write!(f, "plan has no steps"),
            ValidationIssue::TooManySteps(n) => write!(f, "plan has {} steps (max {})", n, MAX_STEPS),
            ValidationIssue::MissingId(idx) => write!(f, "step at index {} has no id", idx),
            ValidationIssue::DuplicateId(id) => write!(f, "duplicate step id: {}", id),
            ValidationIssue::DanglingDependency { step_id, dep } => {
                write!(f, "step {} depends on unknown step {}", step_id, dep)
            }
            ValidationIssue::UnknownTool { step_id, tool } => {
                write!(f, "step {} uses unknown tool {}", step_id, tool)
            }
        }
    }
}

/// Planner：持有生成 / 记忆协作者与工具注册表
pub struct Planner {
    generation: Arc<dyn GenerationClient>,
    memory: Option<Arc<dyn MemoryClient>>,
    registry: Arc<ToolRegistry>,
    config: PlannerSection,
}

impl Planner {
    pub fn new(
        generation: Arc<dyn GenerationClient>,
        memory: Option<Arc<dyn MemoryClient>>,
        registry: Arc<ToolRegistry>,
        config: PlannerSection,
    ) -> Self {
        Self {
            generation,
            memory,
            registry,
            config,
        }
    }

    /// 目标 -> 已校验 Plan；仅当修复失败且回退计划也不可构造时返回 PlanInvalid
    pub async fn create_plan(
        &self,
        goal: &str,
        context: &HashMap<String, Value>,
        use_memory: bool,
    ) -> Result<Plan> {
        // 1. 尽力而为的记忆检索：失败或缺席不阻塞
        let snippets = if use_memory {
            match &self.memory {
                Some(memory) => memory.search(goal, self.config.memory_snippets).await,
                None => Vec::new(),
            }
        } else {
            Vec::new()
        };

        // 2. 结构化生成
        let schema = serde_json::to_value(schema_for!(PlanDraft))
            .unwrap_or_else(|_| serde_json::json!({}));
        let prompt = self.build_prompt(goal, context, &snippets);
        let draft = match self
            .generation
            .generate_structured(&prompt, PLANNER_SYSTEM_PROMPT, &schema, self.config.temperature)
            .await
        {
            Ok(value) => match serde_json::from_value::<PlanDraft>(value) {
                Ok(draft) => draft,
                Err(e) => {
                    tracing::warn!(error = %e, "plan draft undeserializable, falling back");
                    return self.fallback_plan(goal);
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "generation failed, falling back");
                return self.fallback_plan(goal);
            }
        };

        // 3-4. 物化草稿，校验失败则修复一次
        let mut plan = self.materialize(goal, draft);
        let issues = self.validate(&plan);
        if !issues.is_empty() {
            tracing::info!(count = issues.len(), "plan validation failed, repairing");
            self.repair(&mut plan);
            let remaining = self.validate(&plan);
            if !remaining.is_empty() {
                for issue in &remaining {
                    tracing::warn!(issue = %issue, "plan unrepairable");
                }
                return self.fallback_plan(goal);
            }
        }

        // 5. 优化占位：去重 / 并行分组标注的挂点，当前不改写计划
        self.optimize(&mut plan);
        // 6. 风险评估：只附注，不失败
        self.assess_risks(&mut plan);
        Ok(plan)
    }

    /// 失败后的重规划：上下文带上已完成 / 已失败步骤与最近错误
    pub async fn replan(&self, state: &AgentState, reason: &str) -> Result<Plan> {
        let mut context = HashMap::new();
        context.insert("replan_reason".to_string(), Value::String(reason.to_string()));
        let completed: Vec<String> = state
            .execution_context
            .completed_steps
            .iter()
            .cloned()
            .collect();
        let failed: Vec<String> = state.execution_context.failed_steps.iter().cloned().collect();
        context.insert(
            "completed_steps".to_string(),
            serde_json::to_value(&completed).unwrap_or(Value::Null),
        );
        context.insert(
            "failed_steps".to_string(),
            serde_json::to_value(&failed).unwrap_or(Value::Null),
        );
        let recent: Vec<String> = state
            .execution_context
            .recent_errors(3)
            .iter()
            .map(|r| {
                format!(
                    "{}: {}",
                    r.context.error_type.as_str(),
                    r.context.detail.clone().unwrap_or_default()
                )
            })
            .collect();
        context.insert(
            "recent_errors".to_string(),
            serde_json::to_value(&recent).unwrap_or(Value::Null),
        );

        self.create_plan(&state.user_goal, &context, true).await
    }

    fn build_prompt(
        &self,
        goal: &str,
        context: &HashMap<String, Value>,
        snippets: &[crate::memory::MemorySnippet],
    ) -> String {
        let mut prompt = format!("Goal: {}\n\nAvailable tools:\n{}\n", goal, self.registry.capabilities_json());
        if !context.is_empty() {
            let ctx_json = serde_json::to_string_pretty(context).unwrap_or_default();
            prompt.push_str(&format!("\nContext:\n{}\n", ctx_json));
        }
        if !snippets.is_empty() {
            prompt.push_str("\nRelevant prior tasks:\n");
            for snippet in snippets.iter().take(self.config.memory_snippets) {
                prompt.push_str(&format!("- {}\n", snippet.content));
            }
        }
        prompt.push_str("\nProduce a step-by-step plan conforming to the given schema.");
        prompt
    }

    /// 宽松草稿 -> Plan：缺失字段按位置补默认值，数值裁剪到边界
    fn materialize(&self, goal: &str, draft: PlanDraft) -> Plan {
        let steps: Vec<Step> = draft
            .steps
            .into_iter()
            .enumerate()
            .map(|(idx, s)| Step {
                id: s.id.unwrap_or_default(),
                action: s.action.unwrap_or_else(|| format!("step {}", idx + 1)),
                tool: s.tool.unwrap_or_default(),
                params: s.params,
                depends_on: s.depends_on,
                success_criteria: s.success_criteria,
                failure_action: s.failure_action.unwrap_or_default(),
                max_retries: s
                    .max_retries
                    .unwrap_or(3)
                    .clamp(MIN_RETRIES, MAX_RETRIES),
                timeout_seconds: s
                    .timeout_seconds
                    .unwrap_or(60)
                    .clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS),
            })
            .collect();

        let mut plan = Plan::new(draft.objective.unwrap_or_else(|| goal.to_string()), steps);
        plan.priority = draft.priority.unwrap_or_default();
        plan.tags = draft.tags;
        plan
    }

    /// 校验：ID 唯一且存在、依赖可达、工具已知、步骤数在界内
    pub fn validate(&self, plan: &Plan) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if plan.steps.len() < MIN_STEPS {
            issues.push(ValidationIssue::EmptyPlan);
            return issues;
        }
        if plan.steps.len() > MAX_STEPS {
            issues.push(ValidationIssue::TooManySteps(plan.steps.len()));
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for (idx, step) in plan.steps.iter().enumerate() {
            if step.id.trim().is_empty() {
                issues.push(ValidationIssue::MissingId(idx));
            } else if !seen.insert(step.id.as_str()) {
                issues.push(ValidationIssue::DuplicateId(step.id.clone()));
            }
            if !self.registry.contains(&step.tool) {
                issues.push(ValidationIssue::UnknownTool {
                    step_id: step.id.clone(),
                    tool: step.tool.clone(),
                });
            }
        }

        let ids: HashSet<&str> = plan.steps.iter().map(|s| s.id.as_str()).collect();
        for step in &plan.steps {
            for dep in &step.depends_on {
                if !ids.contains(dep.as_str()) {
                    issues.push(ValidationIssue::DanglingDependency {
                        step_id: step.id.clone(),
                        dep: dep.clone(),
                    });
                }
            }
        }
        issues
    }

    /// 修复：补序号 ID、删悬空依赖、替换未知工具为默认工具、截断超量步骤
    pub fn repair(&self, plan: &mut Plan) {
        if plan.steps.len() > MAX_STEPS {
            plan.steps.truncate(MAX_STEPS);
        }

        // 缺失 / 重复 ID 按位置补为 step_N
        let mut seen: HashSet<String> = HashSet::new();
        for (idx, step) in plan.steps.iter_mut().enumerate() {
            if step.id.trim().is_empty() || seen.contains(&step.id) {
                step.id = format!("step_{}", idx + 1);
            }
            seen.insert(step.id.clone());
        }

        // 悬空依赖仅删除非法引用，保留合法引用
        let ids: HashSet<String> = plan.steps.iter().map(|s| s.id.clone()).collect();
        for step in plan.steps.iter_mut() {
            step.depends_on.retain(|dep| ids.contains(dep));
        }

        // 未知工具替换为配置的默认工具（默认工具本身未注册时保持原样，
        // 二次校验会失败并触发回退）
        let default_known = self.registry.contains(&self.config.default_tool);
        for step in plan.steps.iter_mut() {
            if !self.registry.contains(&step.tool) && default_known {
                tracing::warn!(step = %step.id, tool = %step.tool, "substituting unknown tool");
                step.tool = self.config.default_tool.clone();
            }
        }
    }

    /// 回退：单步计划，失败即终止
    fn fallback_plan(&self, goal: &str) -> Result<Plan> {
        if !self.registry.contains(&self.config.default_tool) {
            return Err(AgentError::PlanInvalid(format!(
                "no usable plan and default tool '{}' is not registered",
                self.config.default_tool
            )));
        }
        let step = Step::new(
            "step_1",
            format!("attempt goal directly: {}", goal),
            self.config.default_tool.as_str(),
        )
            .with_param("text", Value::String(goal.to_string()))
            .with_failure_action(FailureAction::Abort);
        let mut plan = Plan::new(goal, vec![step]);
        plan.priority = Priority::Medium;
        plan.tags.push("fallback".to_string());
        Ok(plan)
    }

    /// 优化占位：未来在此做步骤去重与并行分组标注
    fn optimize(&self, _plan: &mut Plan) {}

    /// 风险评估：最长依赖链、超长超时步骤、外部服务步骤数；只写注记
    fn assess_risks(&self, plan: &mut Plan) {
        let chain = longest_chain(plan);
        let mut warnings: Vec<String> = Vec::new();
        if chain > CHAIN_WARN_THRESHOLD {
            warnings.push(format!("dependency chain length {} exceeds {}", chain, CHAIN_WARN_THRESHOLD));
        }
        for step in &plan.steps {
            if step.timeout_seconds > TIMEOUT_WARN_SECS {
                warnings.push(format!(
                    "step {} timeout {}s exceeds {}s",
                    step.id, step.timeout_seconds, TIMEOUT_WARN_SECS
                ));
            }
        }
        let external: HashSet<String> = self
            .registry
            .capabilities()
            .into_iter()
            .filter(|c| c.is_external_service())
            .map(|c| c.name)
            .collect();
        let external_steps = plan.steps.iter().filter(|s| external.contains(&s.tool)).count();

        plan.context.insert(
            "risks".to_string(),
            serde_json::json!({
                "longest_chain": chain,
                "external_steps": external_steps,
                "warnings": warnings,
            }),
        );
    }

    /// 学习调优：工具近期成功率差时放宽该步骤的超时与重试上限（仅 Planner 侧）
    pub fn tune_step(&self, step: &mut Step, usage: &ToolUsage) {
        if usage.total() >= 5 && usage.success_rate() < 0.5 {
            step.timeout_seconds = (step.timeout_seconds * 3 / 2).min(MAX_TIMEOUT_SECS);
            step.max_retries = (step.max_retries + 1).min(MAX_RETRIES);
        }
    }
}

const PLANNER_SYSTEM_PROMPT: &str = "You are a planning engine. Decompose the user's goal into \
an ordered list of tool steps. Use only the listed tools. Reference earlier outputs with \
${step_id.field} tokens. Output JSON conforming to the provided schema, nothing else.";

/// 最长依赖链（按步骤数计）；DFS，每个递归分支携带自己的 visited 副本，
/// 依赖环不会造成死循环。
pub fn longest_chain(plan: &Plan) -> usize {
    let by_id: HashMap<&str, &Step> = plan.steps.iter().map(|s| (s.id.as_str(), s)).collect();
    plan.steps
        .iter()
        .map(|s| chain_depth(s.id.as_str(), &by_id, HashSet::new()))
        .max()
        .unwrap_or(0)
}

fn chain_depth(id: &str, by_id: &HashMap<&str, &Step>, mut visited: HashSet<String>) -> usize {
    if visited.contains(id) {
        return 0;
    }
    visited.insert(id.to_string());
    let step = match by_id.get(id) {
        Some(s) => s,
        None => return 0,
    };
    let deepest = step
        .depends_on
        .iter()
        .map(|dep| chain_depth(dep, by_id, visited.clone()))
        .max()
        .unwrap_or(0);
    1 + deepest
}
