//! 单步重试簿记
//!
//! 维护指数退避不变量：current_delay_seconds == initial * multiplier^(attempts-1)。
//! 60 秒上限由 Decision Engine 的 calculate_retry_delay 在下游裁剪。

use serde::{Deserialize, Serialize};

/// 退避倍率默认值
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
/// 初始延迟默认值（秒）
pub const DEFAULT_INITIAL_DELAY_SECONDS: f64 = 1.0;

/// 单步重试上下文
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryContext {
    pub step_id: String,
    /// 已发起的尝试次数（首次执行前为 0）
    pub total_attempts: u32,
    pub max_attempts: u32,
    /// 当前退避延迟（秒）
    pub current_delay_seconds: f64,
    pub backoff_multiplier: f64,
    pub initial_delay_seconds: f64,
    /// 每次重试的原因记录
    #[serde(default)]
    pub retry_reasons: Vec<String>,
}

impl RetryContext {
    pub fn new(step_id: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            step_id: step_id.into(),
            total_attempts: 0,
            max_attempts,
            current_delay_seconds: DEFAULT_INITIAL_DELAY_SECONDS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            initial_delay_seconds: DEFAULT_INITIAL_DELAY_SECONDS,
            retry_reasons: Vec::new(),
        }
    }

    pub fn with_backoff(mut self, initial_delay_seconds: f64, multiplier: f64) -> Self {
        self.initial_delay_seconds = initial_delay_seconds;
        self.backoff_multiplier = multiplier;
        self.current_delay_seconds = initial_delay_seconds;
        self
    }

    /// 记录一次尝试并推进退避延迟
    pub fn record_attempt(&mut self, reason: impl Into<String>) {
        self.total_attempts += 1;
        self.retry_reasons.push(reason.into());
        // 不变量：delay = initial * multiplier^(attempts-1)
        let exponent = self.total_attempts.saturating_sub(1);
        self.current_delay_seconds =
            self.initial_delay_seconds * self.backoff_multiplier.powi(exponent as i32);
    }

    pub fn attempts_remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.total_attempts)
    }

    pub fn exhausted(&self) -> bool {
        self.attempts_remaining() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_invariant() {
        let mut ctx = RetryContext::new("step_1", 5);
        ctx.record_attempt("first");
        assert_eq!(ctx.current_delay_seconds, 1.0);
        ctx.record_attempt("second");
        assert_eq!(ctx.current_delay_seconds, 2.0);
        ctx.record_attempt("third");
        assert_eq!(ctx.current_delay_seconds, 4.0);
        assert_eq!(ctx.retry_reasons.len(), 3);
    }

    #[test]
    fn test_attempts_remaining_saturates() {
        let mut ctx = RetryContext::new("step_1", 2);
        ctx.record_attempt("a");
        ctx.record_attempt("b");
        ctx.record_attempt("c");
        assert_eq!(ctx.attempts_remaining(), 0);
        assert!(ctx.exhausted());
    }

    #[test]
    fn test_custom_backoff() {
        let mut ctx = RetryContext::new("step_1", 5).with_backoff(0.5, 3.0);
        ctx.record_attempt("a");
        assert_eq!(ctx.current_delay_seconds, 0.5);
        ctx.record_attempt("b");
        assert_eq!(ctx.current_delay_seconds, 1.5);
    }
}
