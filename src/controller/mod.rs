//! Graph Controller：显式状态机
//!
//! plan -> execute -> evaluate -> decide 的循环，decide 依据 Decision Engine 的
//! 纯函数路由转向 execute（continue / retry）、replan、escalate 或终态。
//! 循环保护计数在 decide 节点递增，超过 max_cycles 无条件 abort。
//! 节点从不外抛错误：节点内故障就地转为 status = failed。
//! 每个节点边界通过 Storage 写 Checkpoint，支持挂起 / 恢复。

mod graph;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::{AgentError, Result};
use crate::decision::{DecisionEngine, NextAction};
use crate::evaluator::Evaluator;
use crate::executor::Executor;
use crate::llm::GenerationClient;
use crate::memory::MemoryClient;
use crate::planner::Planner;
use crate::schema::{
    AgentState, AgentStatus, Checkpoint, ErrorContext, ExecutionResult, RetryContext, Step,
};
use crate::storage::Storage;
use crate::tools::{ToolRegistry, ToolResult};

pub use graph::{transition, GraphState};

/// 控制器：进程启动时构造一次，持有全部协作者（显式依赖注入，无全局单例）
pub struct Controller {
    planner: Planner,
    executor: Executor,
    evaluator: Evaluator,
    engine: DecisionEngine,
    storage: Arc<dyn Storage>,
    config: AppConfig,
}

impl Controller {
    pub fn new(
        generation: Arc<dyn GenerationClient>,
        memory: Option<Arc<dyn MemoryClient>>,
        registry: Arc<ToolRegistry>,
        storage: Arc<dyn Storage>,
        config: AppConfig,
    ) -> Self {
        let planner = Planner::new(
            generation,
            memory,
            Arc::clone(&registry),
            config.planner.clone(),
        );
        let executor = Executor::new(Arc::clone(&registry), Arc::clone(&storage));
        let evaluator = Evaluator::new(config.evaluator.clone());
        // 跨运行的工具统计预热成功率加成；读不到就从零开始
        if let Ok(usage) = storage.load_tool_usage() {
            evaluator.seed_usage(&usage);
        }
        let engine = DecisionEngine::new(config.controller.clone(), config.retry.clone());
        Self {
            planner,
            executor,
            evaluator,
            engine,
            storage,
            config,
        }
    }

    /// 执行一个目标直至终态或挂起（等待用户）
    pub async fn run(
        &self,
        goal: &str,
        thread_id: &str,
        cancel_token: CancellationToken,
    ) -> ExecutionResult {
        let state = AgentState::new(thread_id, goal);
        self.drive(state, GraphState::Plan, cancel_token).await
    }

    /// 从 Checkpoint 恢复一个挂起 / 中断的任务
    pub async fn resume(
        &self,
        thread_id: &str,
        cancel_token: CancellationToken,
    ) -> Result<ExecutionResult> {
        let checkpoint = self
            .storage
            .load_checkpoint(thread_id)?
            .ok_or_else(|| AgentError::CheckpointNotFound(thread_id.to_string()))?;
        let state = checkpoint.into_state();
        let entry = if state.plan.is_none() {
            GraphState::Plan
        } else if state.status == AgentStatus::WaitingForUser {
            GraphState::Escalate
        } else {
            GraphState::Decide
        };
        Ok(self.drive(state, entry, cancel_token).await)
    }

    /// 给挂起任务附加用户响应，随后可 resume
    pub fn attach_user_response(&self, thread_id: &str, response: &str) -> Result<()> {
        let mut checkpoint = self
            .storage
            .load_checkpoint(thread_id)?
            .ok_or_else(|| AgentError::CheckpointNotFound(thread_id.to_string()))?;
        checkpoint.execution_context.metadata.insert(
            "user_response".to_string(),
            Value::String(response.to_string()),
        );
        self.storage.save_checkpoint(&checkpoint)?;
        Ok(())
    }

    /// 主循环：驱动状态机直到终态或挂起
    async fn drive(
        &self,
        mut state: AgentState,
        entry: GraphState,
        cancel_token: CancellationToken,
    ) -> ExecutionResult {
        let mut current = entry;
        // 每步骤的重试簿记；恢复时按 retry_count 重建
        let mut retry_map: HashMap<String, RetryContext> = self.rebuild_retry_map(&state);
        // 最近一次执行结果，在 execute -> evaluate 间传递
        let mut last_result: Option<ToolResult> = None;

        loop {
            self.checkpoint(&state);
            if state.status.is_terminal() {
                break;
            }

            current = match current {
                GraphState::Plan => self.node_plan(&mut state).await,
                GraphState::Execute => {
                    self.node_execute(&mut state, &retry_map, &mut last_result)
                        .await
                }
                GraphState::Evaluate => self.node_evaluate(&mut state, &mut last_result),
                GraphState::Decide => {
                    self.node_decide(&mut state, &mut retry_map, &cancel_token)
                        .await
                }
                GraphState::Replan => self.node_replan(&mut state).await,
                GraphState::Escalate => {
                    if self.consume_user_response(&mut state) {
                        graph::transition(GraphState::Escalate, "ok")
                            .unwrap_or(GraphState::Decide)
                    } else {
                        // 无用户响应可消费：挂起运行，等待 attach_user_response + resume
                        state.status = AgentStatus::WaitingForUser;
                        break;
                    }
                }
                GraphState::Complete | GraphState::Abort => break,
            };
        }

        self.checkpoint(&state);
        ExecutionResult::from_state(&state)
    }

    /// plan 节点：目标 -> 计划；失败转为 status=failed，不外抛
    async fn node_plan(&self, state: &mut AgentState) -> GraphState {
        state.status = AgentStatus::Planning;
        match self
            .planner
            .create_plan(&state.user_goal, &HashMap::new(), true)
            .await
        {
            Ok(plan) => {
                state.log_action(format!(
                    "Planned {} step(s) for objective: {}",
                    plan.steps.len(),
                    plan.objective
                ));
                state.plan = Some(plan);
                state.status = AgentStatus::Executing;
                graph::transition(GraphState::Plan, "ok").unwrap_or(GraphState::Execute)
            }
            Err(e) => {
                tracing::error!(error = %e, "planning failed");
                state.log_action(format!("Planning failed: {}", e));
                state
                    .execution_context
                    .set_last_error(&ErrorContext::unclassified(e.to_string()));
                state.status = AgentStatus::Failed;
                GraphState::Abort
            }
        }
    }

    /// execute 节点：取下一个待执行步骤（或重试中的当前步骤）执行
    async fn node_execute(
        &self,
        state: &mut AgentState,
        retry_map: &HashMap<String, RetryContext>,
        last_result: &mut Option<ToolResult>,
    ) -> GraphState {
        state.status = AgentStatus::Executing;

        // 重试路径沿用当前步骤，否则取下一个待执行步骤
        let retrying = state
            .execution_context
            .metadata
            .get("next_action")
            .and_then(|v| v.as_str())
            == Some("retry");
        let step: Option<Step> = if retrying {
            state
                .current_step_id
                .as_deref()
                .and_then(|id| state.plan.as_ref().and_then(|p| p.step(id)))
                .cloned()
        } else {
            state.next_pending_step().cloned()
        };

        match step {
            Some(step) => {
                state.current_step_id = Some(step.id.clone());
                let retry_ctx = retry_map.get(&step.id).filter(|r| r.total_attempts > 0);
                let (result, _log) = self.executor.execute_step(&step, state, retry_ctx).await;
                state.log_action(format!(
                    "Executed step {} via {} -> {}",
                    step.id,
                    step.tool,
                    if result.success { "ok" } else { "failed" }
                ));
                *last_result = Some(result);
            }
            None => {
                // 计划没有剩余可执行步骤：交给 decide 收尾
                *last_result = None;
            }
        }
        graph::transition(GraphState::Execute, "ok").unwrap_or(GraphState::Evaluate)
    }

    /// evaluate 节点：结果评估与错误归一化；失败在 decide 选择非重试路径后才定论
    fn node_evaluate(
        &self,
        state: &mut AgentState,
        last_result: &mut Option<ToolResult>,
    ) -> GraphState {
        state.status = AgentStatus::Evaluating;

        if let (Some(result), Some(step_id)) = (last_result.take(), state.current_step_id.clone())
        {
            let step = state
                .plan
                .as_ref()
                .and_then(|p| p.step(&step_id))
                .cloned();
            if let Some(step) = step {
                let evaluation = self.evaluator.evaluate_step(&step, &result, state);
                self.evaluator.record_outcome(&step.tool, result.success);
                if evaluation.success {
                    let output = result.output.unwrap_or(Value::Null);
                    state
                        .execution_context
                        .mark_step_completed(&step.id, output);
                    state.execution_context.clear_last_error();
                    state.log_action(format!(
                        "Step {} succeeded (confidence {:.2})",
                        step.id, evaluation.confidence
                    ));
                } else if let Some(error) = evaluation.error {
                    state
                        .execution_context
                        .record_error(Some(step.id.clone()), error.clone());
                    state.execution_context.set_last_error(&error);
                    state.log_action(format!(
                        "Step {} failed: {}",
                        step.id,
                        error.error_type.as_str()
                    ));
                }
            }
        }
        graph::transition(GraphState::Evaluate, "ok").unwrap_or(GraphState::Decide)
    }

    /// decide 节点：循环保护、取消观察、纯函数路由与路由后的状态推进
    async fn node_decide(
        &self,
        state: &mut AgentState,
        retry_map: &mut HashMap<String, RetryContext>,
        cancel_token: &CancellationToken,
    ) -> GraphState {
        state.cycle_count += 1;

        // 协作式取消：只在本节点观察
        if cancel_token.is_cancelled() {
            state.should_continue = false;
        }

        // 循环保护：超过 max_cycles 无条件 abort，压过引擎的任何答案
        if state.cycle_count > self.config.controller.max_cycles {
            state.log_action(format!(
                "Cycle guard tripped after {} cycles",
                state.cycle_count
            ));
            state.status = AgentStatus::Aborted;
            return GraphState::Abort;
        }

        let error = state.execution_context.last_error();

        // 失败的尝试计入重试簿记（先记账再路由，引擎保持纯函数）
        if let (Some(err), Some(step_id)) = (&error, state.current_step_id.clone()) {
            let step = state.plan.as_ref().and_then(|p| p.step(&step_id)).cloned();
            if let Some(step) = step {
                let ctx = retry_map.entry(step.id.clone()).or_insert_with(|| {
                    RetryContext::new(&step.id, step.max_retries).with_backoff(
                        self.config.retry.initial_delay_seconds,
                        self.config.retry.backoff_multiplier,
                    )
                });
                ctx.record_attempt(err.error_type.as_str());
            }
        }

        let retry_ctx = state
            .current_step_id
            .as_deref()
            .and_then(|id| retry_map.get(id));
        let decision = self
            .engine
            .route_next_state(state, error.as_ref(), retry_ctx);
        tracing::info!(
            action = decision.action.as_str(),
            reason = %decision.reason,
            cycle = state.cycle_count,
            "decide"
        );
        state.execution_context.metadata.insert(
            "next_action".to_string(),
            Value::String(decision.action.as_str().to_string()),
        );

        match decision.action {
            NextAction::Continue => {
                state.execution_context.clear_last_error();
                graph_next(GraphState::Decide, "continue")
            }
            NextAction::Retry => {
                if let Some(step_id) = state.current_step_id.clone() {
                    let retries = state.execution_context.bump_retry(&step_id);
                    let delay = retry_map
                        .get(&step_id)
                        .map(|ctx| {
                            self.engine
                                .calculate_retry_delay(ctx, error.as_ref().map(|e| e.error_type))
                        })
                        .unwrap_or(0.0);
                    state.log_action(format!(
                        "Retrying step {} (retry #{}) after {:.1}s",
                        step_id, retries, delay
                    ));
                    // 退避只挂起本任务的重入，不影响调度器
                    if delay > 0.0 {
                        tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                    }
                }
                state.execution_context.clear_last_error();
                graph_next(GraphState::Decide, "retry")
            }
            NextAction::Replan => {
                if let Some(step_id) = state.current_step_id.clone() {
                    state.execution_context.mark_step_failed(&step_id);
                }
                state.log_action(format!("Replanning: {}", decision.reason));
                graph_next(GraphState::Decide, "replan")
            }
            NextAction::Escalate => {
                let prompt = format_escalation_prompt(&state.user_goal, error.as_ref());
                state.user_prompt = Some(prompt);
                state.needs_user_input = true;
                state.status = AgentStatus::WaitingForUser;
                state.log_action(format!("Escalating to user: {}", decision.reason));
                graph_next(GraphState::Decide, "escalate")
            }
            NextAction::Complete => {
                state.status = AgentStatus::Completed;
                state.log_action("Task completed".to_string());
                graph_next(GraphState::Decide, "complete")
            }
            NextAction::Abort => {
                if error.is_some() {
                    if let Some(step_id) = state.current_step_id.clone() {
                        state.execution_context.mark_step_failed(&step_id);
                    }
                }
                state.status = AgentStatus::Aborted;
                state.log_action(format!("Aborted: {}", decision.reason));
                graph_next(GraphState::Decide, "abort")
            }
        }
    }

    /// replan 节点：丢弃当前计划整体替换；失败转 status=failed
    async fn node_replan(&self, state: &mut AgentState) -> GraphState {
        state.status = AgentStatus::Replanning;
        let reason = state
            .execution_context
            .last_error()
            .map(|e| format!("{}: {}", e.error_type.as_str(), e.detail.unwrap_or_default()))
            .unwrap_or_else(|| "previous plan exhausted".to_string());
        match self.planner.replan(state, &reason).await {
            Ok(plan) => {
                state.log_action(format!("Replanned with {} step(s)", plan.steps.len()));
                state.plan = Some(plan);
                state.current_step_id = None;
                state.execution_context.clear_last_error();
                state.status = AgentStatus::Executing;
                graph::transition(GraphState::Replan, "ok").unwrap_or(GraphState::Execute)
            }
            Err(e) => {
                tracing::error!(error = %e, "replanning failed");
                state.log_action(format!("Replanning failed: {}", e));
                state.status = AgentStatus::Failed;
                GraphState::Abort
            }
        }
    }

    /// 消费挂在 metadata 上的用户响应；有则清除错误并返回 true
    fn consume_user_response(&self, state: &mut AgentState) -> bool {
        let response = state
            .execution_context
            .metadata
            .remove("user_response")
            .and_then(|v| v.as_str().map(|s| s.to_string()));
        match response {
            Some(response) => {
                state.log_action(format!("User responded: {}", response));
                state.execution_context.clear_last_error();
                state.needs_user_input = false;
                state.user_prompt = None;
                state.status = AgentStatus::Executing;
                true
            }
            None => false,
        }
    }

    /// 节点边界落 Checkpoint；失败只告警
    fn checkpoint(&self, state: &AgentState) {
        if let Err(e) = self.storage.save_checkpoint(&Checkpoint::from_state(state)) {
            tracing::warn!(error = %e, "checkpoint failed");
        }
    }

    /// 恢复时按 retry_count 重建每步骤的退避状态
    fn rebuild_retry_map(&self, state: &AgentState) -> HashMap<String, RetryContext> {
        let mut map = HashMap::new();
        let Some(plan) = &state.plan else {
            return map;
        };
        for (step_id, count) in &state.execution_context.retry_count {
            if let Some(step) = plan.step(step_id) {
                let mut ctx = RetryContext::new(step_id, step.max_retries).with_backoff(
                    self.config.retry.initial_delay_seconds,
                    self.config.retry.backoff_multiplier,
                );
                for _ in 0..*count {
                    ctx.record_attempt("restored from checkpoint");
                }
                map.insert(step_id.clone(), ctx);
            }
        }
        map
    }
}

/// 经转移表取下一状态；表缺失时回落到 Abort（不应发生）
fn graph_next(from: GraphState, label: &str) -> GraphState {
    graph::transition(from, label).unwrap_or(GraphState::Abort)
}

/// 升级提示：目标 + 错误摘要 + 建议动作清单
fn format_escalation_prompt(goal: &str, error: Option<&ErrorContext>) -> String {
    let mut prompt = format!("Task needs your input.\nGoal: {}\n", goal);
    if let Some(err) = error {
        prompt.push_str(&format!(
            "Blocked by: {} ({})\n",
            err.error_type.as_str(),
            err.detail.clone().unwrap_or_default()
        ));
        if !err.suggested_actions.is_empty() {
            prompt.push_str("Suggested actions:\n");
            for action in &err.suggested_actions {
                prompt.push_str(&format!("- {}\n", action));
            }
        }
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ErrorType, Severity};

    #[test]
    fn test_escalation_prompt_lists_suggestions() {
        let mut err = ErrorContext::unclassified("token expired");
        err.error_type = ErrorType::Authentication;
        err.severity = Severity::High;
        err.suggested_actions.push("Re-authenticate".to_string());
        let prompt = format_escalation_prompt("send weekly report", Some(&err));
        assert!(prompt.contains("send weekly report"));
        assert!(prompt.contains("authentication"));
        assert!(prompt.contains("- Re-authenticate"));
    }

    #[test]
    fn test_escalation_prompt_without_error() {
        let prompt = format_escalation_prompt("goal", None);
        assert!(prompt.contains("Goal: goal"));
    }
}
