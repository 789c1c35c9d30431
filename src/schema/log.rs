//! 执行日志
//!
//! 每次工具调用（含每次重试）生成一条 ExecutionLog；封口（seal）后不可再写，
//! 作为 ToolResult 的附件与持久化审计证据。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 单次尝试的执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Started,
    Running,
    Success,
    Failed,
    Timeout,
    Aborted,
}

/// 一次工具调用尝试的完整记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub step_id: String,
    /// 第几次尝试（== retry_context.total_attempts + 1）
    pub attempt_number: u32,
    pub status: ExecutionStatus,
    pub tool_name: String,
    /// 解析后的工具入参
    pub tool_input: Value,
    pub tool_output: Option<Value>,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub started_at_ms: i64,
    pub finished_at_ms: Option<i64>,
    pub duration_ms: Option<u64>,
    /// 自由文本追踪行（参数解析警告等）
    #[serde(default)]
    pub trace: Vec<String>,
    #[serde(skip)]
    sealed: bool,
}

impl ExecutionLog {
    pub fn start(
        step_id: impl Into<String>,
        attempt_number: u32,
        tool_name: impl Into<String>,
        tool_input: Value,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            attempt_number,
            status: ExecutionStatus::Started,
            tool_name: tool_name.into(),
            tool_input,
            tool_output: None,
            error_type: None,
            error_message: None,
            started_at_ms: chrono::Utc::now().timestamp_millis(),
            finished_at_ms: None,
            duration_ms: None,
            trace: Vec::new(),
            sealed: false,
        }
    }

    /// 追加一行追踪；封口后忽略
    pub fn trace_line(&mut self, line: impl Into<String>) {
        if !self.sealed {
            self.trace.push(line.into());
        }
    }

    pub fn mark_running(&mut self) {
        if !self.sealed {
            self.status = ExecutionStatus::Running;
        }
    }

    /// 封口：写入终态与耗时，此后所有写操作无效
    pub fn seal(
        &mut self,
        status: ExecutionStatus,
        output: Option<Value>,
        error_type: Option<String>,
        error_message: Option<String>,
        duration_ms: u64,
    ) {
        if self.sealed {
            return;
        }
        self.status = status;
        self.tool_output = output;
        self.error_type = error_type;
        self.error_message = error_message;
        self.duration_ms = Some(duration_ms);
        self.finished_at_ms = Some(chrono::Utc::now().timestamp_millis());
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_is_final() {
        let mut log = ExecutionLog::start("s1", 1, "echo", serde_json::json!({}));
        log.trace_line("resolving params");
        log.seal(ExecutionStatus::Success, Some(serde_json::json!("ok")), None, None, 12);
        assert!(log.is_sealed());

        // 封口后的写入全部被忽略
        log.trace_line("late line");
        log.seal(ExecutionStatus::Failed, None, None, None, 99);
        assert_eq!(log.status, ExecutionStatus::Success);
        assert_eq!(log.duration_ms, Some(12));
        assert_eq!(log.trace.len(), 1);
    }

    #[test]
    fn test_timestamps_present() {
        let mut log = ExecutionLog::start("s1", 2, "echo", serde_json::json!({}));
        assert!(log.started_at_ms > 0);
        assert!(log.finished_at_ms.is_none());
        log.seal(ExecutionStatus::Timeout, None, Some("timeout".into()), None, 500);
        assert!(log.finished_at_ms.is_some());
    }
}
