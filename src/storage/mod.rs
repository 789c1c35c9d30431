//! 持久化协作者
//!
//! Checkpoint、ExecutionLog 与工具使用统计的持久化接口；FileStorage 以 JSON 文件
//! 落盘（按任务 ID 分文件），NullStorage 用于不需要恢复能力的单次运行。

mod file;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::schema::{Checkpoint, ExecutionLog};

pub use file::FileStorage;

/// 单个工具的累计使用统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolUsage {
    pub successes: u64,
    pub failures: u64,
    pub total_duration_ms: u64,
}

impl ToolUsage {
    pub fn total(&self) -> u64 {
        self.successes + self.failures
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.successes as f64 / total as f64
    }
}

/// 持久化接口：同步调用（文件级 IO），由控制器在节点边界调用
pub trait Storage: Send + Sync {
    /// 保存 / 覆盖某任务的恢复点
    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> anyhow::Result<()>;

    /// 读取某任务的恢复点；不存在返回 Ok(None)
    fn load_checkpoint(&self, task_id: &str) -> anyhow::Result<Option<Checkpoint>>;

    /// 追加一条执行日志
    fn append_log(&self, task_id: &str, log: &ExecutionLog) -> anyhow::Result<()>;

    /// 累加一次工具使用记录
    fn record_tool_usage(&self, tool: &str, success: bool, duration_ms: u64)
        -> anyhow::Result<()>;

    /// 读取全部工具使用统计
    fn load_tool_usage(&self) -> anyhow::Result<HashMap<String, ToolUsage>>;
}

/// 空实现：不持久化任何数据
#[derive(Debug, Default)]
pub struct NullStorage;

impl Storage for NullStorage {
    fn save_checkpoint(&self, _checkpoint: &Checkpoint) -> anyhow::Result<()> {
        Ok(())
    }

    fn load_checkpoint(&self, _task_id: &str) -> anyhow::Result<Option<Checkpoint>> {
        Ok(None)
    }

    fn append_log(&self, _task_id: &str, _log: &ExecutionLog) -> anyhow::Result<()> {
        Ok(())
    }

    fn record_tool_usage(
        &self,
        _tool: &str,
        _success: bool,
        _duration_ms: u64,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn load_tool_usage(&self) -> anyhow::Result<HashMap<String, ToolUsage>> {
        Ok(HashMap::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_usage_rate() {
        let usage = ToolUsage {
            successes: 9,
            failures: 1,
            total_duration_ms: 100,
        };
        assert_eq!(usage.total(), 10);
        assert!((usage.success_rate() - 0.9).abs() < 1e-9);
        assert_eq!(ToolUsage::default().success_rate(), 0.0);
    }
}
