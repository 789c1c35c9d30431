//! 状态机拓扑
//!
//! 节点与带标签的转移表。表是封闭的：未列出的 (状态, 标签) 组合返回 None，
//! 由调用方兜底处理。terminal 状态没有出边。

use serde::{Deserialize, Serialize};

/// 状态机节点；Complete / Abort 为终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphState {
    Plan,
    Execute,
    Evaluate,
    Decide,
    Replan,
    Escalate,
    Complete,
    Abort,
}

impl GraphState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GraphState::Complete | GraphState::Abort)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GraphState::Plan => "plan",
            GraphState::Execute => "execute",
            GraphState::Evaluate => "evaluate",
            GraphState::Decide => "decide",
            GraphState::Replan => "replan",
            GraphState::Escalate => "escalate",
            GraphState::Complete => "complete",
            GraphState::Abort => "abort",
        }
    }
}

/// 转移表：decide 是唯一的多路分支节点
pub fn transition(from: GraphState, label: &str) -> Option<GraphState> {
    match (from, label) {
        (GraphState::Plan, "ok") => Some(GraphState::Execute),
        (GraphState::Execute, "ok") => Some(GraphState::Evaluate),
        (GraphState::Evaluate, "ok") => Some(GraphState::Decide),
        (GraphState::Decide, "continue") => Some(GraphState::Execute),
        (GraphState::Decide, "retry") => Some(GraphState::Execute),
        (GraphState::Decide, "replan") => Some(GraphState::Replan),
        (GraphState::Decide, "escalate") => Some(GraphState::Escalate),
        (GraphState::Decide, "complete") => Some(GraphState::Complete),
        (GraphState::Decide, "abort") => Some(GraphState::Abort),
        (GraphState::Replan, "ok") => Some(GraphState::Execute),
        (GraphState::Escalate, "ok") => Some(GraphState::Decide),
        _ => None,
    }
}
