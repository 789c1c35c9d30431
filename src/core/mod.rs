//! 核心类型：错误定义
//!
//! 组件实现分布在 planner / executor / evaluator / decision / controller 模块。

mod error;

pub use error::{AgentError, Result};
