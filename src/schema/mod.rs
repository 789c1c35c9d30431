//! 数据模型
//!
//! 控制器各组件之间流转的被动值类型：Plan / Step、AgentState / ExecutionContext、
//! RetryContext、ErrorContext、ExecutionLog 与 Checkpoint。

mod error_context;
mod log;
mod plan;
mod retry;
mod state;

pub use error_context::{ErrorContext, ErrorType, Severity};
pub use log::{ExecutionLog, ExecutionStatus};
pub use plan::{
    FailureAction, Plan, PlanDraft, Priority, Step, StepDraft, MAX_RETRIES, MAX_STEPS,
    MAX_TIMEOUT_SECS, MIN_RETRIES, MIN_STEPS, MIN_TIMEOUT_SECS,
};
pub use retry::{RetryContext, DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_INITIAL_DELAY_SECONDS};
pub use state::{
    AgentState, AgentStatus, Checkpoint, ErrorRecord, ExecutionContext, ExecutionResult,
    MAX_ERROR_HISTORY,
};
