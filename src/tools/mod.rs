//! 工具箱
//!
//! Tool trait 与注册表、工具调用值类型，以及内置 Echo 工具。
//! 具体业务工具（邮件 / 日历 / 搜索等）属外部协作者，由调用方注册。

mod echo;
mod registry;
mod types;

pub use echo::EchoTool;
pub use registry::{Tool, ToolRegistry};
pub use types::{ToolCapability, ToolContext, ToolInput, ToolResult};
