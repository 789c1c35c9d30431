//! Evaluator：工具结果 -> (成功, 置信度, ErrorContext?)
//!
//! 置信度规则与错误分类表。数值阈值是可调默认值（config [evaluator] 段），
//! 行为以场景测试为准而非具体系数。

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde_json::Value;

use crate::config::EvaluatorSection;
use crate::schema::{AgentState, ErrorContext, ErrorType, Severity, Step};
use crate::storage::ToolUsage;
use crate::tools::ToolResult;

/// 滚动窗口长度：近期成功率按最近 N 次结果计
const ROLLING_WINDOW: usize = 20;

/// 软一致性检查关注的参数键（声称的对象清单）
const CLAIMED_LIST_KEYS: [&str; 3] = ["recipients", "items", "targets"];
/// 软一致性检查关注的输出键（观察到的处理计数）
const OBSERVED_COUNT_KEYS: [&str; 3] = ["count", "sent_count", "processed"];

/// 一次评估的产物
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub success: bool,
    /// [0, 1]
    pub confidence: f64,
    pub error: Option<ErrorContext>,
}

/// 单工具滚动统计
#[derive(Debug, Default)]
struct RollingStats {
    outcomes: VecDeque<bool>,
}

impl RollingStats {
    fn push(&mut self, success: bool) {
        if self.outcomes.len() >= ROLLING_WINDOW {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(success);
    }

    fn success_rate(&self) -> Option<f64> {
        if self.outcomes.is_empty() {
            return None;
        }
        let ok = self.outcomes.iter().filter(|b| **b).count();
        Some(ok as f64 / self.outcomes.len() as f64)
    }
}

/// Evaluator：持有可调阈值与每工具近期统计
pub struct Evaluator {
    config: EvaluatorSection,
    stats: Mutex<HashMap<String, RollingStats>>,
}

impl Evaluator {
    pub fn new(config: EvaluatorSection) -> Self {
        Self {
            config,
            stats: Mutex::new(HashMap::new()),
        }
    }

    /// 用持久化的历史统计预热滚动窗口（跨运行的成功率加成）
    pub fn seed_usage(&self, usage: &HashMap<String, ToolUsage>) {
        let mut stats = self.stats.lock().expect("stats lock poisoned");
        for (tool, u) in usage {
            let entry = stats.entry(tool.clone()).or_default();
            // 按历史比例填充窗口近似历史成功率
            let total = u.total().min(ROLLING_WINDOW as u64);
            if total == 0 {
                continue;
            }
            let ok = ((u.success_rate() * total as f64).round() as u64).min(total);
            for i in 0..total {
                entry.push(i < ok);
            }
        }
    }

    /// 记录一次工具结果，供后续评估的成功率加成
    pub fn record_outcome(&self, tool: &str, success: bool) {
        self.stats
            .lock()
            .expect("stats lock poisoned")
            .entry(tool.to_string())
            .or_default()
            .push(success);
    }

    fn recent_success_rate(&self, tool: &str) -> Option<f64> {
        self.stats
            .lock()
            .expect("stats lock poisoned")
            .get(tool)
            .and_then(|s| s.success_rate())
    }

    /// 评估单步结果
    pub fn evaluate_step(
        &self,
        step: &Step,
        result: &ToolResult,
        state: &AgentState,
    ) -> Evaluation {
        if !result.success {
            let error = self.classify(result, state);
            return Evaluation {
                success: false,
                // 真实尝试过，给部分分
                confidence: 0.3,
                error: Some(error),
            };
        }

        let mut confidence: f64 = 0.8;
        if let Some(rate) = self.recent_success_rate(&step.tool) {
            if rate > self.config.success_rate_bonus_threshold {
                confidence += 0.1;
            }
        }
        if result.duration_ms < self.config.fast_completion_ms {
            confidence += 0.1;
        }
        confidence = confidence.min(1.0);

        // 软一致性：声称清单长度 vs 观察到的处理计数；不翻转成功，只降置信度
        if let Some(downgrade) = consistency_mismatch(step, result) {
            tracing::warn!(step = %step.id, "{}", downgrade);
            confidence = (confidence - 0.2).max(0.1);
        }

        Evaluation {
            success: true,
            confidence,
            error: None,
        }
    }

    /// 按 error_type 的固定映射表归一化为 ErrorContext
    pub fn classify(&self, result: &ToolResult, state: &AgentState) -> ErrorContext {
        let error_type = result.error_type.unwrap_or(ErrorType::Unknown);
        let detail = result.error_message.clone().unwrap_or_default();
        let mut ctx = ErrorContext::unclassified(detail);
        ctx.error_type = error_type;

        match error_type {
            ErrorType::Network | ErrorType::Timeout => {
                ctx.is_transient = true;
                ctx.retry_recommended = true;
                ctx.severity = Severity::Medium;
                ctx.suggested_actions.push("Retry after a short delay".to_string());
            }
            ErrorType::RateLimit => {
                ctx.is_transient = true;
                ctx.retry_recommended = true;
                ctx.severity = Severity::Low;
                ctx.suggested_actions
                    .push("Back off and retry with a longer delay".to_string());
            }
            ErrorType::Authentication | ErrorType::Authorization => {
                ctx.requires_user_action = true;
                ctx.retry_recommended = false;
                ctx.severity = Severity::High;
                ctx.suggested_actions
                    .push("Re-authenticate or grant the required permission".to_string());
                ctx.suggested_actions
                    .push("Verify credentials for the tool's account".to_string());
            }
            ErrorType::Validation => {
                ctx.replan_recommended = true;
                ctx.severity = Severity::Medium;
                ctx.suggested_actions
                    .push("Revise step parameters and replan".to_string());
            }
            ErrorType::ResourceNotFound | ErrorType::Conflict => {
                ctx.replan_recommended = true;
                ctx.severity = Severity::Medium;
                ctx.suggested_actions
                    .push("Replan around the missing or conflicting resource".to_string());
            }
            ErrorType::ExternalApi => {
                ctx.is_transient = true;
                ctx.retry_recommended = true;
                ctx.severity = Severity::Medium;
                ctx.suggested_actions
                    .push("Retry; external service may be degraded".to_string());
            }
            ErrorType::InternalError => {
                ctx.severity = Severity::Medium;
                ctx.suggested_actions.push("Inspect tool diagnostics".to_string());
                // 连续 internal_error 达阈值：升为 Critical 并建议重规划
                let streak = trailing_internal_errors(state) + 1;
                if streak >= self.config.internal_error_threshold {
                    ctx.severity = Severity::Critical;
                    ctx.replan_recommended = true;
                }
            }
            ErrorType::Unknown => {
                ctx.severity = Severity::Medium;
                ctx.suggested_actions.push("Inspect logs for the root cause".to_string());
            }
        }
        ctx
    }
}

/// 状态中最近错误里连续 internal_error 的长度
fn trailing_internal_errors(state: &AgentState) -> u32 {
    let mut streak = 0;
    for record in state.execution_context.errors.iter().rev() {
        if record.context.error_type == ErrorType::InternalError {
            streak += 1;
        } else {
            break;
        }
    }
    streak
}

/// 声称数量与观察数量不一致时返回描述；无可比数据返回 None
fn consistency_mismatch(step: &Step, result: &ToolResult) -> Option<String> {
    let claimed = CLAIMED_LIST_KEYS
        .iter()
        .find_map(|k| step.params.get(*k).and_then(|v| v.as_array().map(|a| a.len())))?;
    let output = result.output.as_ref()?;
    let observed = OBSERVED_COUNT_KEYS
        .iter()
        .find_map(|k| output.get(k).and_then(Value::as_u64))?;
    if observed as usize != claimed {
        Some(format!(
            "claimed {} items but tool reported {}",
            claimed, observed
        ))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AgentState;

    fn evaluator() -> Evaluator {
        Evaluator::new(EvaluatorSection::default())
    }

    fn success_result(duration_ms: u64) -> ToolResult {
        let mut r = ToolResult::ok(Value::Null);
        r.duration_ms = duration_ms;
        r
    }

    #[test]
    fn test_base_confidence_on_success() {
        let eval = evaluator();
        let state = AgentState::new("t", "g");
        let step = Step::new("s", "x", "echo");
        // 慢完成、无统计：只有基础分
        let e = eval.evaluate_step(&step, &success_result(5000), &state);
        assert!(e.success);
        assert!((e.confidence - 0.8).abs() < 1e-9);
        assert!(e.error.is_none());
    }

    #[test]
    fn test_fast_completion_and_streak_bonus_capped() {
        let eval = evaluator();
        let state = AgentState::new("t", "g");
        let step = Step::new("s", "x", "echo");
        for _ in 0..20 {
            eval.record_outcome("echo", true);
        }
        let e = eval.evaluate_step(&step, &success_result(100), &state);
        // 0.8 + 0.1 + 0.1，封顶 1.0
        assert!((e.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_failure_yields_partial_credit() {
        let eval = evaluator();
        let state = AgentState::new("t", "g");
        let step = Step::new("s", "x", "echo");
        let result = ToolResult::err(ErrorType::Network, "reset");
        let e = eval.evaluate_step(&step, &result, &state);
        assert!(!e.success);
        assert!((e.confidence - 0.3).abs() < 1e-9);
        let err = e.error.unwrap();
        assert!(err.is_transient);
        assert!(err.retry_recommended);
    }

    #[test]
    fn test_auth_classification_requires_user() {
        let eval = evaluator();
        let state = AgentState::new("t", "g");
        let result = ToolResult::err(ErrorType::Authentication, "token expired");
        let ctx = eval.classify(&result, &state);
        assert!(ctx.requires_user_action);
        assert!(!ctx.retry_recommended);
        assert_eq!(ctx.severity, Severity::High);
        assert!(!ctx.suggested_actions.is_empty());
    }

    #[test]
    fn test_repeated_internal_error_goes_critical() {
        let eval = evaluator();
        let mut state = AgentState::new("t", "g");
        let result = ToolResult::err(ErrorType::InternalError, "panic in tool");

        // 前两次：Medium
        let first = eval.classify(&result, &state);
        assert_eq!(first.severity, Severity::Medium);
        state.execution_context.record_error(None, first);
        let second = eval.classify(&result, &state);
        assert_eq!(second.severity, Severity::Medium);
        state.execution_context.record_error(None, second);

        // 第三次连续 internal_error：Critical + 建议重规划
        let third = eval.classify(&result, &state);
        assert_eq!(third.severity, Severity::Critical);
        assert!(third.replan_recommended);
    }

    #[test]
    fn test_internal_error_streak_broken_by_other_type() {
        let eval = evaluator();
        let mut state = AgentState::new("t", "g");
        let internal = ToolResult::err(ErrorType::InternalError, "x");
        state
            .execution_context
            .record_error(None, eval.classify(&internal, &state));
        state
            .execution_context
            .record_error(None, eval.classify(&ToolResult::err(ErrorType::Network, "y"), &state));
        // 连续性被 network 打断，重新计数
        let ctx = eval.classify(&internal, &state);
        assert_eq!(ctx.severity, Severity::Medium);
    }

    #[test]
    fn test_consistency_mismatch_downgrades_confidence() {
        let eval = evaluator();
        let state = AgentState::new("t", "g");
        let step = Step::new("s", "send", "email").with_param(
            "recipients",
            serde_json::json!(["a@x.com", "b@x.com", "c@x.com"]),
        );
        let mut result = ToolResult::ok(serde_json::json!({"sent_count": 2}));
        result.duration_ms = 100;
        let e = eval.evaluate_step(&step, &result, &state);
        // 成功不翻转，置信度 0.9 - 0.2
        assert!(e.success);
        assert!((e.confidence - 0.7).abs() < 1e-9);

        let mut consistent = ToolResult::ok(serde_json::json!({"sent_count": 3}));
        consistent.duration_ms = 100;
        let e2 = eval.evaluate_step(&step, &consistent, &state);
        assert!((e2.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_missing_error_type_is_unknown() {
        let eval = evaluator();
        let state = AgentState::new("t", "g");
        let result = ToolResult {
            success: false,
            output: None,
            error_type: None,
            error_message: Some("???".into()),
            duration_ms: 0,
            metadata: Default::default(),
        };
        let ctx = eval.classify(&result, &state);
        assert_eq!(ctx.error_type, ErrorType::Unknown);
        assert!(ctx.is_recoverable);
    }

    #[test]
    fn test_seed_usage_enables_bonus() {
        let eval = evaluator();
        let mut usage = HashMap::new();
        usage.insert(
            "echo".to_string(),
            ToolUsage {
                successes: 19,
                failures: 1,
                total_duration_ms: 0,
            },
        );
        eval.seed_usage(&usage);
        let rate = eval.recent_success_rate("echo").unwrap();
        assert!(rate > 0.9);
    }
}
