//! 文件持久化
//!
//! 根目录下三类文件：checkpoints/<task_id>.json（整体覆盖）、
//! logs/<task_id>.json（日志数组，读-改-写追加）、tool_usage.json（统计表）。
//! 父目录不存在时自动创建。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::schema::{Checkpoint, ExecutionLog};
use crate::storage::{Storage, ToolUsage};

/// 简单的文件持久化：每任务一个 JSON 文件
#[derive(Debug)]
pub struct FileStorage {
    root: PathBuf,
    /// 统计文件的读-改-写需要互斥
    usage_lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            usage_lock: Mutex::new(()),
        }
    }

    fn checkpoint_path(&self, task_id: &str) -> PathBuf {
        self.root.join("checkpoints").join(format!("{}.json", task_id))
    }

    fn log_path(&self, task_id: &str) -> PathBuf {
        self.root.join("logs").join(format!("{}.json", task_id))
    }

    fn usage_path(&self) -> PathBuf {
        self.root.join("tool_usage.json")
    }

    fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(value)?)?;
        Ok(())
    }

    fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&data)?))
    }
}

impl Storage for FileStorage {
    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> anyhow::Result<()> {
        Self::write_json(&self.checkpoint_path(&checkpoint.task_id), checkpoint)
    }

    fn load_checkpoint(&self, task_id: &str) -> anyhow::Result<Option<Checkpoint>> {
        Self::read_json(&self.checkpoint_path(task_id))
    }

    fn append_log(&self, task_id: &str, log: &ExecutionLog) -> anyhow::Result<()> {
        let path = self.log_path(task_id);
        let mut logs: Vec<ExecutionLog> = Self::read_json(&path)?.unwrap_or_default();
        logs.push(log.clone());
        Self::write_json(&path, &logs)
    }

    fn record_tool_usage(
        &self,
        tool: &str,
        success: bool,
        duration_ms: u64,
    ) -> anyhow::Result<()> {
        let _guard = self
            .usage_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("usage lock poisoned"))?;
        let path = self.usage_path();
        let mut table: HashMap<String, ToolUsage> = Self::read_json(&path)?.unwrap_or_default();
        let entry = table.entry(tool.to_string()).or_default();
        if success {
            entry.successes += 1;
        } else {
            entry.failures += 1;
        }
        entry.total_duration_ms += duration_ms;
        Self::write_json(&path, &table)
    }

    fn load_tool_usage(&self) -> anyhow::Result<HashMap<String, ToolUsage>> {
        Ok(Self::read_json(&self.usage_path())?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AgentState, Checkpoint, ExecutionLog, ExecutionStatus};

    #[test]
    fn test_checkpoint_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());

        let state = AgentState::new("task-1", "demo goal");
        let cp = Checkpoint::from_state(&state);
        storage.save_checkpoint(&cp).unwrap();

        let loaded = storage.load_checkpoint("task-1").unwrap().unwrap();
        assert_eq!(loaded.user_goal, "demo goal");
        assert!(storage.load_checkpoint("missing").unwrap().is_none());
    }

    #[test]
    fn test_log_append() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());

        for attempt in 1..=3u32 {
            let mut log = ExecutionLog::start("s1", attempt, "echo", serde_json::json!({}));
            log.seal(ExecutionStatus::Success, None, None, None, 5);
            storage.append_log("task-1", &log).unwrap();
        }

        let data = std::fs::read_to_string(dir.path().join("logs/task-1.json")).unwrap();
        let logs: Vec<ExecutionLog> = serde_json::from_str(&data).unwrap();
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[2].attempt_number, 3);
    }

    #[test]
    fn test_tool_usage_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());

        storage.record_tool_usage("echo", true, 10).unwrap();
        storage.record_tool_usage("echo", false, 20).unwrap();
        storage.record_tool_usage("email", true, 5).unwrap();

        let table = storage.load_tool_usage().unwrap();
        assert_eq!(table["echo"].successes, 1);
        assert_eq!(table["echo"].failures, 1);
        assert_eq!(table["echo"].total_duration_ms, 30);
        assert_eq!(table["email"].successes, 1);
    }
}
