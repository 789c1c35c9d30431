//! Executor：单步执行与参数解析
//!
//! `${step_id.field}` 引用在执行前解析为前序步骤输出；工具调用在 tokio 超时下进行，
//! 超时与工具故障一律在本边界收敛为失败的 ToolResult，绝不外抛。每次调用生成并
//! 封口一条 ExecutionLog，作为结果附件与审计证据。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::schema::{
    AgentState, ErrorType, ExecutionLog, ExecutionStatus, RetryContext, Step,
};
use crate::storage::Storage;
use crate::tools::{ToolContext, ToolInput, ToolRegistry, ToolResult};

/// 解析 `${id.field}` 引用；不是引用格式则返回 None
fn parse_reference(raw: &str) -> Option<(&str, &str)> {
    let inner = raw.strip_prefix("${")?.strip_suffix('}')?;
    let (id, field) = inner.split_once('.')?;
    if id.is_empty() || field.is_empty() {
        return None;
    }
    Some((id, field))
}

/// 工具执行器：持有注册表与持久化协作者
pub struct Executor {
    registry: Arc<ToolRegistry>,
    storage: Arc<dyn Storage>,
}

impl Executor {
    pub fn new(registry: Arc<ToolRegistry>, storage: Arc<dyn Storage>) -> Self {
        Self { registry, storage }
    }

    /// 解析步骤参数：`${id.field}` 引用替换为对应步骤输出；
    /// field == "output" 取整个输出；输出为对象且含 field 键取该成员；
    /// 其余情况解析为 null 并记录警告，从不报错。
    pub fn resolve_params(
        step: &Step,
        state: &AgentState,
        log: &mut ExecutionLog,
    ) -> HashMap<String, Value> {
        let outputs = &state.execution_context.step_outputs;
        step.params
            .iter()
            .map(|(key, value)| {
                let resolved = match value.as_str().and_then(parse_reference) {
                    Some((id, field)) => match outputs.get(id) {
                        Some(output) if field == "output" => output.clone(),
                        Some(Value::Object(map)) if map.contains_key(field) => {
                            map[field].clone()
                        }
                        _ => {
                            let warn = format!(
                                "param '{}': unresolved reference ${{{}.{}}}, using null",
                                key, id, field
                            );
                            tracing::warn!(step = %step.id, "{}", warn);
                            log.trace_line(warn);
                            Value::Null
                        }
                    },
                    None => value.clone(),
                };
                (key.clone(), resolved)
            })
            .collect()
    }

    /// 执行单步：返回 ToolResult 与封口的 ExecutionLog
    ///
    /// attempt_number == retry_context.total_attempts + 1（无重试上下文时为 1）。
    pub async fn execute_step(
        &self,
        step: &Step,
        state: &AgentState,
        retry_context: Option<&RetryContext>,
    ) -> (ToolResult, ExecutionLog) {
        let attempt_number = retry_context.map(|r| r.total_attempts).unwrap_or(0) + 1;
        let is_retry = attempt_number > 1;

        let mut log = ExecutionLog::start(&step.id, attempt_number, &step.tool, Value::Null);
        let params = Self::resolve_params(step, state, &mut log);

        let context = ToolContext {
            plan_id: state.plan.as_ref().map(|p| p.id.clone()).unwrap_or_default(),
            user_goal: state.user_goal.clone(),
            completed_steps: state
                .execution_context
                .completed_steps
                .iter()
                .cloned()
                .collect(),
            available_outputs: state
                .execution_context
                .step_outputs
                .keys()
                .cloned()
                .collect(),
        };
        let input = ToolInput {
            action: step.action.clone(),
            params,
            context,
            timeout_seconds: step.timeout_seconds,
            is_retry,
        };
        log.tool_input = serde_json::to_value(&input).unwrap_or(Value::Null);
        log.mark_running();

        let start = Instant::now();
        let mut result = match self.registry.get(&step.tool) {
            Some(tool) => {
                match timeout(Duration::from_secs(step.timeout_seconds), tool.execute(input)).await
                {
                    Ok(Ok(result)) => result,
                    // 工具自身抛出的故障在本边界收敛
                    Ok(Err(e)) => ToolResult::err(ErrorType::InternalError, e),
                    Err(_) => ToolResult::err(
                        ErrorType::Timeout,
                        format!("tool '{}' exceeded {}s deadline", step.tool, step.timeout_seconds),
                    ),
                }
            }
            None => ToolResult::err(
                ErrorType::InternalError,
                format!("tool '{}' is not registered", step.tool),
            ),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        result.duration_ms = duration_ms;

        let status = if result.success {
            ExecutionStatus::Success
        } else if result.error_type == Some(ErrorType::Timeout) {
            ExecutionStatus::Timeout
        } else {
            ExecutionStatus::Failed
        };
        log.seal(
            status,
            result.output.clone(),
            result.error_type.map(|t| t.as_str().to_string()),
            result.error_message.clone(),
            duration_ms,
        );

        // 审计日志：每次调用一行结构化记录
        let audit = serde_json::json!({
            "event": "tool_audit",
            "step": step.id,
            "tool": step.tool,
            "attempt": attempt_number,
            "ok": result.success,
            "outcome": result
                .error_type
                .map(|t| t.as_str().to_string())
                .unwrap_or_else(|| "ok".to_string()),
            "duration_ms": duration_ms,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        // 持久化尽力而为：失败只告警，不影响执行结果
        if let Err(e) = self.storage.append_log(&state.task_id, &log) {
            tracing::warn!(error = %e, "failed to persist execution log");
        }
        if let Err(e) = self
            .storage
            .record_tool_usage(&step.tool, result.success, duration_ms)
        {
            tracing::warn!(error = %e, "failed to record tool usage");
        }

        // 封口日志作为结果附件，供重规划 / 学习使用
        if let Ok(v) = serde_json::to_value(&log) {
            result.metadata.insert("execution_log".to_string(), v);
        }
        (result, log)
    }

    /// 顺序驱动一组步骤：每步恰好一次 mark_step_completed / mark_step_failed
    pub async fn execute_steps(
        &self,
        steps: &[Step],
        state: &mut AgentState,
    ) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(steps.len());
        for step in steps {
            state.current_step_id = Some(step.id.clone());
            let (result, _log) = self.execute_step(step, state, None).await;
            if result.success {
                let output = result.output.clone().unwrap_or(Value::Null);
                state.execution_context.mark_step_completed(&step.id, output);
            } else {
                state.execution_context.mark_step_failed(&step.id);
            }
            results.push(result);
        }
        results
    }

    /// 并发派发无依赖边的步骤，扇出受 max_fan_out 约束；
    /// 结果按入参顺序写回 ExecutionContext。
    pub async fn execute_parallel(
        &self,
        steps: &[Step],
        state: &mut AgentState,
        max_fan_out: usize,
    ) -> Vec<ToolResult> {
        let semaphore = Arc::new(Semaphore::new(max_fan_out.max(1)));
        let shared_state = &*state;
        let futures: Vec<_> = steps
            .iter()
            .map(|step| {
                let semaphore = Arc::clone(&semaphore);
                async move {
                    let _permit = semaphore.acquire().await.expect("semaphore closed");
                    self.execute_step(step, shared_state, None).await
                }
            })
            .collect();
        let outcomes = futures_util::future::join_all(futures).await;

        let mut results = Vec::with_capacity(outcomes.len());
        for (step, (result, _log)) in steps.iter().zip(outcomes) {
            if result.success {
                let output = result.output.clone().unwrap_or(Value::Null);
                state.execution_context.mark_step_completed(&step.id, output);
            } else {
                state.execution_context.mark_step_failed(&step.id);
            }
            results.push(result);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Plan;
    use crate::storage::NullStorage;
    use crate::tools::{EchoTool, Tool, ToolCapability};
    use async_trait::async_trait;

    /// 总是按预设返回的工具
    struct ScriptedTool {
        name: String,
        result: Result<ToolResult, String>,
        delay_ms: u64,
    }

    #[async_trait]
    impl Tool for ScriptedTool {
        fn capability(&self) -> ToolCapability {
            ToolCapability::new(self.name.clone(), "scripted")
        }

        async fn execute(&self, _input: ToolInput) -> Result<ToolResult, String> {
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            self.result.clone()
        }
    }

    fn executor_with(tools: Vec<ScriptedTool>) -> Executor {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        for tool in tools {
            registry.register(tool);
        }
        Executor::new(Arc::new(registry), Arc::new(NullStorage))
    }

    fn state_with_output(id: &str, output: Value) -> AgentState {
        let mut state = AgentState::new("t1", "goal");
        state.plan = Some(Plan::new("p", vec![Step::new("x", "x", "echo")]));
        state.execution_context.step_outputs.insert(id.to_string(), output);
        state
    }

    #[test]
    fn test_parse_reference() {
        assert_eq!(parse_reference("${a.output}"), Some(("a", "output")));
        assert_eq!(parse_reference("${a.b.c}"), Some(("a", "b.c")));
        assert_eq!(parse_reference("plain"), None);
        assert_eq!(parse_reference("${nodot}"), None);
        assert_eq!(parse_reference("${.field}"), None);
    }

    #[test]
    fn test_resolve_whole_output() {
        let state = state_with_output("a", serde_json::json!({"k": 1}));
        let step = Step::new("b", "x", "echo")
            .with_param("all", Value::String("${a.output}".into()));
        let mut log = ExecutionLog::start("b", 1, "echo", Value::Null);
        let params = Executor::resolve_params(&step, &state, &mut log);
        assert_eq!(params["all"], serde_json::json!({"k": 1}));
        assert!(log.trace.is_empty());
    }

    #[test]
    fn test_resolve_field_of_mapping() {
        let state = state_with_output("a", serde_json::json!({"count": 7}));
        let step = Step::new("b", "x", "echo")
            .with_param("n", Value::String("${a.count}".into()));
        let mut log = ExecutionLog::start("b", 1, "echo", Value::Null);
        let params = Executor::resolve_params(&step, &state, &mut log);
        assert_eq!(params["n"], serde_json::json!(7));
    }

    #[test]
    fn test_unresolvable_reference_becomes_null_with_warning() {
        let state = state_with_output("a", serde_json::json!("scalar"));
        let step = Step::new("b", "x", "echo")
            .with_param("missing_step", Value::String("${ghost.output}".into()))
            .with_param("missing_field", Value::String("${a.nope}".into()))
            .with_param("literal", Value::String("kept".into()));
        let mut log = ExecutionLog::start("b", 1, "echo", Value::Null);
        let params = Executor::resolve_params(&step, &state, &mut log);
        assert_eq!(params["missing_step"], Value::Null);
        assert_eq!(params["missing_field"], Value::Null);
        assert_eq!(params["literal"], serde_json::json!("kept"));
        assert_eq!(log.trace.len(), 2);
    }

    #[tokio::test]
    async fn test_execute_step_success_attaches_log() {
        let executor = executor_with(vec![]);
        let state = AgentState::new("t1", "goal");
        let step = Step::new("s1", "say hi", "echo")
            .with_param("text", Value::String("hi".into()));
        let (result, log) = executor.execute_step(&step, &state, None).await;
        assert!(result.success);
        assert!(log.is_sealed());
        assert_eq!(log.attempt_number, 1);
        assert_eq!(log.status, ExecutionStatus::Success);
        assert!(result.metadata.contains_key("execution_log"));
    }

    #[tokio::test]
    async fn test_attempt_number_follows_retry_context() {
        let executor = executor_with(vec![]);
        let state = AgentState::new("t1", "goal");
        let step = Step::new("s1", "x", "echo");
        let mut retry = RetryContext::new("s1", 3);
        retry.record_attempt("first failure");
        retry.record_attempt("second failure");
        let (_result, log) = executor.execute_step(&step, &state, Some(&retry)).await;
        assert_eq!(log.attempt_number, 3);
    }

    #[tokio::test]
    async fn test_tool_fault_contained_as_internal_error() {
        let executor = executor_with(vec![ScriptedTool {
            name: "boom".into(),
            result: Err("kaboom".into()),
            delay_ms: 0,
        }]);
        let state = AgentState::new("t1", "goal");
        let step = Step::new("s1", "x", "boom");
        let (result, log) = executor.execute_step(&step, &state, None).await;
        assert!(!result.success);
        assert_eq!(result.error_type, Some(ErrorType::InternalError));
        assert_eq!(log.status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn test_unknown_tool_contained() {
        let executor = executor_with(vec![]);
        let state = AgentState::new("t1", "goal");
        let step = Step::new("s1", "x", "nonexistent");
        let (result, _log) = executor.execute_step(&step, &state, None).await;
        assert!(!result.success);
        assert_eq!(result.error_type, Some(ErrorType::InternalError));
    }

    #[tokio::test]
    async fn test_timeout_produces_timeout_result() {
        let executor = executor_with(vec![ScriptedTool {
            name: "slow".into(),
            result: Ok(ToolResult::ok(Value::Null)),
            delay_ms: 30_000,
        }]);
        let state = AgentState::new("t1", "goal");
        // 步骤超时下限为 10 秒，测试里用 tokio 虚拟时间推进
        let step = Step::new("s1", "x", "slow").with_timeout(10);
        tokio::time::pause();
        let handle = tokio::spawn(async move {
            let (result, log) = executor.execute_step(&step, &state, None).await;
            (result, log)
        });
        tokio::time::advance(Duration::from_secs(11)).await;
        let (result, log) = handle.await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error_type, Some(ErrorType::Timeout));
        assert_eq!(log.status, ExecutionStatus::Timeout);
    }

    #[tokio::test]
    async fn test_execute_steps_marks_each_exactly_once() {
        let executor = executor_with(vec![ScriptedTool {
            name: "fail".into(),
            result: Ok(ToolResult::err(ErrorType::Network, "down")),
            delay_ms: 0,
        }]);
        let mut state = AgentState::new("t1", "goal");
        let steps = vec![
            Step::new("ok1", "x", "echo"),
            Step::new("bad", "x", "fail"),
            Step::new("ok2", "x", "echo"),
        ];
        let results = executor.execute_steps(&steps, &mut state).await;
        assert_eq!(results.len(), 3);
        let ctx = &state.execution_context;
        assert!(ctx.completed_steps.contains("ok1"));
        assert!(ctx.completed_steps.contains("ok2"));
        assert!(ctx.failed_steps.contains("bad"));
        assert!(!ctx.completed_steps.contains("bad"));
    }

    #[tokio::test]
    async fn test_execute_parallel_bounded() {
        let executor = executor_with(vec![]);
        let mut state = AgentState::new("t1", "goal");
        let steps: Vec<Step> = (0..5)
            .map(|i| {
                Step::new(format!("s{}", i), "x", "echo")
                    .with_param("text", Value::String(format!("v{}", i)))
            })
            .collect();
        let results = executor.execute_parallel(&steps, &mut state, 2).await;
        assert_eq!(results.len(), 5);
        assert_eq!(state.execution_context.completed_steps.len(), 5);
        // 输出按步骤 ID 各就各位
        assert_eq!(
            state.execution_context.step_outputs["s3"]["text"],
            serde_json::json!("v3")
        );
    }
}
