//! 记忆 / 检索协作者接口
//!
//! Planner 规划前可选地检索相关历史片段；检索是尽力而为的，失败或缺席
//! 绝不阻塞规划。向量检索 / 重排等实现属外部协作者。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 检索得到的历史片段
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySnippet {
    pub content: String,
    /// 相关性得分（越大越相关）
    pub score: f64,
}

/// 记忆检索客户端 trait
#[async_trait]
pub trait MemoryClient: Send + Sync {
    /// 检索与 query 相关的片段，按相关性降序，至多 limit 条
    async fn search(&self, query: &str, limit: usize) -> Vec<MemorySnippet>;
}

/// 空实现：永远返回空结果
#[derive(Debug, Default)]
pub struct NullMemory;

#[async_trait]
impl MemoryClient for NullMemory {
    async fn search(&self, _query: &str, _limit: usize) -> Vec<MemorySnippet> {
        Vec::new()
    }
}
