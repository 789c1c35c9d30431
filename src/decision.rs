//! Decision Engine：状态 -> 下一动作
//!
//! 纯函数路由：相同 (state, error, retry_context) 输入永远得到相同输出，
//! 整个控制回路因此可离线测试。判定顺序必须严格保持：
//! abort -> complete -> (escalate -> retry -> replan -> abort) -> continue。

use crate::config::{ControllerSection, RetrySection};
use crate::schema::{
    AgentState, ErrorContext, ErrorType, FailureAction, RetryContext, Severity,
};

/// 路由结果动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NextAction {
    Continue,
    Retry,
    Replan,
    Escalate,
    Complete,
    Abort,
}

impl NextAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            NextAction::Continue => "continue",
            NextAction::Retry => "retry",
            NextAction::Replan => "replan",
            NextAction::Escalate => "escalate",
            NextAction::Complete => "complete",
            NextAction::Abort => "abort",
        }
    }
}

/// 动作与判定理由
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub action: NextAction,
    pub reason: String,
}

impl Decision {
    fn new(action: NextAction, reason: impl Into<String>) -> Self {
        Self {
            action,
            reason: reason.into(),
        }
    }
}

/// Decision Engine：只持有阈值配置，自身无可变状态
pub struct DecisionEngine {
    controller: ControllerSection,
    retry: RetrySection,
}

impl DecisionEngine {
    pub fn new(controller: ControllerSection, retry: RetrySection) -> Self {
        Self { controller, retry }
    }

    /// 主路由；判定顺序见模块文档
    pub fn route_next_state(
        &self,
        state: &AgentState,
        error: Option<&ErrorContext>,
        retry_context: Option<&RetryContext>,
    ) -> Decision {
        // 1. Abort 优先级最高
        if let Some(err) = error {
            if !err.is_recoverable && err.severity >= Severity::High {
                return Decision::new(NextAction::Abort, "Unrecoverable high-severity error");
            }
        }
        if state.elapsed_seconds() > self.controller.deadline_seconds as f64 {
            return Decision::new(NextAction::Abort, "Task deadline exceeded");
        }
        if state.all_steps_failed() {
            return Decision::new(NextAction::Abort, "All steps have failed");
        }
        if !state.should_continue {
            return Decision::new(NextAction::Abort, "Cancelled by caller");
        }

        // 2. Complete：计划存在、计划内无失败、无剩余可执行步骤。
        // 失败判定按当前计划口径，重规划换掉的旧步骤失败记录不阻塞完成。
        if state.plan.is_some()
            && state.failed_in_plan() == 0
            && state.next_pending_step().is_none()
        {
            return Decision::new(NextAction::Complete, "All steps completed");
        }

        // 3. 有错误时的恢复路径
        if let Some(err) = error {
            if err.requires_user_action
                || err.error_type.is_auth()
                || err.severity == Severity::Critical
            {
                return Decision::new(NextAction::Escalate, "User action required");
            }

            if self.should_retry(state, err, retry_context) {
                return Decision::new(NextAction::Retry, "Transient error with attempts remaining");
            }

            if state.plan.is_none() {
                return Decision::new(NextAction::Replan, "No plan exists");
            }
            if state.failed_ratio() > 0.5 {
                return Decision::new(NextAction::Replan, "More than half of steps failed");
            }
            if self.retry_budget_spent(state, retry_context) {
                return Decision::new(NextAction::Replan, "Step retry budget spent");
            }

            return Decision::new(NextAction::Abort, "No recovery path found");
        }

        // 4. 无错误：继续执行
        Decision::new(NextAction::Continue, "Proceed to next step")
    }

    /// 重试判定；attempts_remaining == 0 时无条件 false
    pub fn should_retry(
        &self,
        state: &AgentState,
        error: &ErrorContext,
        retry_context: Option<&RetryContext>,
    ) -> bool {
        let attempts_remaining = match retry_context {
            Some(r) => r.attempts_remaining(),
            None => 0,
        };
        if attempts_remaining == 0 {
            return false;
        }

        // 步骤自身声明不重试（abort / skip）时尊重声明
        let failure_action = state
            .current_step_id
            .as_deref()
            .and_then(|id| state.plan.as_ref().and_then(|p| p.step(id)))
            .map(|s| s.failure_action)
            .unwrap_or(FailureAction::Retry);
        if matches!(failure_action, FailureAction::Abort | FailureAction::Skip) {
            return false;
        }

        error.is_recoverable
            && (error.is_transient
                || error.error_type.is_naturally_transient()
                || error.retry_recommended)
    }

    /// 当前步骤的重试预算是否已耗尽（按重试上下文或累计重试计数）
    fn retry_budget_spent(&self, state: &AgentState, retry_context: Option<&RetryContext>) -> bool {
        if retry_context.map(|r| r.exhausted()).unwrap_or(false) {
            return true;
        }
        let Some(step_id) = state.current_step_id.as_deref() else {
            return false;
        };
        let Some(step) = state.plan.as_ref().and_then(|p| p.step(step_id)) else {
            return false;
        };
        state.execution_context.retries_for(step_id) >= step.max_retries
    }

    /// 退避延迟：基础值按错误类型调整后裁剪到上限
    ///
    /// rate_limit ×2.0，network ×0.5，上限 retry.max_delay_seconds（默认 60）。
    pub fn calculate_retry_delay(
        &self,
        retry_context: &RetryContext,
        error_type: Option<ErrorType>,
    ) -> f64 {
        let mut delay = retry_context.current_delay_seconds;
        match error_type {
            Some(ErrorType::RateLimit) => delay *= 2.0,
            Some(ErrorType::Network) => delay *= 0.5,
            _ => {}
        }
        delay.min(self.retry.max_delay_seconds)
    }
}
