//! 任务状态与执行上下文
//!
//! 每个任务恰有一个 AgentState，由图节点就地修改；ExecutionContext 记录步骤结果、
//! 输出与重试计数。所有类型均可序列化，支撑节点边界的 Checkpoint。

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::{ErrorContext, Plan};

/// 错误历史保留上限，超出时丢弃最旧记录
pub const MAX_ERROR_HISTORY: usize = 20;

/// 任务级状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Initializing,
    Planning,
    Executing,
    Evaluating,
    Replanning,
    WaitingForUser,
    Completed,
    Failed,
    Aborted,
}

impl AgentStatus {
    /// 终态：不再进入任何图节点
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentStatus::Completed | AgentStatus::Failed | AgentStatus::Aborted
        )
    }
}

/// 带时间戳的错误记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub step_id: Option<String>,
    pub context: ErrorContext,
    pub recorded_at_ms: i64,
}

/// 单任务执行簿记
///
/// 不变量：同一步骤 ID 在 completed_steps 与 failed_steps 中至多出现一处，
/// 由 mark_step_completed / mark_step_failed 负责迁移维护。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub completed_steps: HashSet<String>,
    pub failed_steps: HashSet<String>,
    pub retry_count: HashMap<String, u32>,
    pub step_outputs: HashMap<String, Value>,
    /// 侧信道：last_error、next_action、user_response 等
    pub metadata: HashMap<String, Value>,
    /// 有界错误历史
    pub errors: Vec<ErrorRecord>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 标记步骤成功；若此前记为失败则迁出失败集
    pub fn mark_step_completed(&mut self, step_id: &str, output: Value) {
        self.failed_steps.remove(step_id);
        self.completed_steps.insert(step_id.to_string());
        self.step_outputs.insert(step_id.to_string(), output);
    }

    /// 标记步骤失败；若此前记为成功则迁出成功集
    pub fn mark_step_failed(&mut self, step_id: &str) {
        self.completed_steps.remove(step_id);
        self.failed_steps.insert(step_id.to_string());
    }

    pub fn bump_retry(&mut self, step_id: &str) -> u32 {
        let count = self.retry_count.entry(step_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn retries_for(&self, step_id: &str) -> u32 {
        self.retry_count.get(step_id).copied().unwrap_or(0)
    }

    /// 记录一条错误；历史有界，超出丢最旧
    pub fn record_error(&mut self, step_id: Option<String>, context: ErrorContext) {
        if self.errors.len() >= MAX_ERROR_HISTORY {
            self.errors.remove(0);
        }
        self.errors.push(ErrorRecord {
            step_id,
            context,
            recorded_at_ms: chrono::Utc::now().timestamp_millis(),
        });
    }

    /// 最近 n 条错误（新在前）
    pub fn recent_errors(&self, n: usize) -> Vec<&ErrorRecord> {
        self.errors.iter().rev().take(n).collect()
    }

    pub fn set_last_error(&mut self, context: &ErrorContext) {
        if let Ok(v) = serde_json::to_value(context) {
            self.metadata.insert("last_error".to_string(), v);
        }
    }

    pub fn last_error(&self) -> Option<ErrorContext> {
        self.metadata
            .get("last_error")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn clear_last_error(&mut self) {
        self.metadata.remove("last_error");
    }
}

/// 每任务唯一的可变状态，图节点在其上推进
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    /// 任务 / 线程 ID（Checkpoint 键）
    pub task_id: String,
    pub user_goal: String,
    pub plan: Option<Plan>,
    /// 当前执行中的步骤 ID
    pub current_step_id: Option<String>,
    pub status: AgentStatus,
    pub execution_context: ExecutionContext,
    /// 外部可置 false 请求取消；在 decide 节点观察
    pub should_continue: bool,
    pub needs_user_input: bool,
    pub user_prompt: Option<String>,
    /// 追加式动作摘要
    pub action_summary: Vec<String>,
    pub started_at_ms: i64,
    /// 经过 decide 节点的次数（循环保护计数）
    pub cycle_count: u32,
}

impl AgentState {
    pub fn new(task_id: impl Into<String>, user_goal: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            user_goal: user_goal.into(),
            plan: None,
            current_step_id: None,
            status: AgentStatus::Initializing,
            execution_context: ExecutionContext::new(),
            should_continue: true,
            needs_user_input: false,
            user_prompt: None,
            action_summary: Vec::new(),
            started_at_ms: chrono::Utc::now().timestamp_millis(),
            cycle_count: 0,
        }
    }

    pub fn elapsed_seconds(&self) -> f64 {
        let now = chrono::Utc::now().timestamp_millis();
        (now - self.started_at_ms).max(0) as f64 / 1000.0
    }

    pub fn log_action(&mut self, line: impl Into<String>) {
        self.action_summary.push(line.into());
    }

    /// 尚未成败定论的下一个步骤
    pub fn next_pending_step(&self) -> Option<&crate::schema::Step> {
        let plan = self.plan.as_ref()?;
        let ctx = &self.execution_context;
        plan.steps
            .iter()
            .find(|s| !ctx.completed_steps.contains(&s.id) && !ctx.failed_steps.contains(&s.id))
    }

    /// 计划存在且所有步骤都已失败
    pub fn all_steps_failed(&self) -> bool {
        match &self.plan {
            Some(plan) if !plan.steps.is_empty() => plan
                .steps
                .iter()
                .all(|s| self.execution_context.failed_steps.contains(&s.id)),
            _ => false,
        }
    }

    /// 当前计划内已失败的步骤数；重规划换掉的旧步骤不计入
    pub fn failed_in_plan(&self) -> usize {
        match &self.plan {
            Some(plan) => plan
                .steps
                .iter()
                .filter(|s| self.execution_context.failed_steps.contains(&s.id))
                .count(),
            None => 0,
        }
    }

    /// 失败步骤占比，按当前计划口径（无计划时为 0）
    pub fn failed_ratio(&self) -> f64 {
        match &self.plan {
            Some(plan) if !plan.steps.is_empty() => {
                self.failed_in_plan() as f64 / plan.steps.len() as f64
            }
            _ => 0.0,
        }
    }
}

/// Run 返回给调用方的最终结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: AgentStatus,
    pub completed_count: usize,
    pub failed_count: usize,
    pub action_summary: Vec<String>,
    pub error_summary: Option<String>,
    /// 升级时展示给用户的提示
    pub user_prompt: Option<String>,
}

impl ExecutionResult {
    pub fn from_state(state: &AgentState) -> Self {
        let error_summary = state
            .execution_context
            .last_error()
            .map(|e| format!("{}: {}", e.error_type.as_str(), e.detail.unwrap_or_default()));
        Self {
            status: state.status,
            completed_count: state.execution_context.completed_steps.len(),
            failed_count: state.execution_context.failed_steps.len(),
            action_summary: state.action_summary.clone(),
            error_summary,
            user_prompt: state.user_prompt.clone(),
        }
    }
}

/// 节点边界序列化的恢复点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub task_id: String,
    pub user_goal: String,
    pub status: AgentStatus,
    pub plan: Option<Plan>,
    pub execution_context: ExecutionContext,
    pub current_step_id: Option<String>,
    pub cycle_count: u32,
}

impl Checkpoint {
    pub fn from_state(state: &AgentState) -> Self {
        Self {
            task_id: state.task_id.clone(),
            user_goal: state.user_goal.clone(),
            status: state.status,
            plan: state.plan.clone(),
            execution_context: state.execution_context.clone(),
            current_step_id: state.current_step_id.clone(),
            cycle_count: state.cycle_count,
        }
    }

    /// 还原为可继续运行的 AgentState
    pub fn into_state(self) -> AgentState {
        AgentState {
            task_id: self.task_id,
            user_goal: self.user_goal,
            plan: self.plan,
            current_step_id: self.current_step_id,
            status: self.status,
            execution_context: self.execution_context,
            should_continue: true,
            needs_user_input: false,
            user_prompt: None,
            action_summary: Vec::new(),
            started_at_ms: chrono::Utc::now().timestamp_millis(),
            cycle_count: self.cycle_count,
        }
    }
}
