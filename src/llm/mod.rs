//! Generation 层：结构化生成协作者的抽象与 Mock 实现
//!
//! Planner 只依赖 GenerationClient trait；具体后端（OpenAI 兼容等）属外部协作者，
//! 本 crate 仅提供测试用 Mock。

mod mock;
mod traits;

pub use mock::MockGeneration;
pub use traits::{GenerationClient, GenerationError};
