//! Forager - Rust 计划执行智能体
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **controller**: 图控制器（plan/execute/evaluate/decide 循环状态机）
//! - **core**: 错误类型与公共 Result
//! - **decision**: 决策引擎（状态 -> 下一动作的纯函数路由）
//! - **evaluator**: 结果评估与错误分类
//! - **executor**: 步骤执行与 `${step_id.field}` 参数解析
//! - **llm**: 结构化生成客户端抽象与 Mock 实现
//! - **memory**: 记忆检索协作者接口
//! - **observability**: tracing 订阅器初始化
//! - **planner**: 目标 -> 已校验 Plan（生成、校验、修复、风险评估）
//! - **schema**: 数据模型（Plan / Step / AgentState / Checkpoint 等）
//! - **storage**: 持久化协作者（Checkpoint、执行日志、工具统计）
//! - **tools**: 工具接口、注册表与内置工具

pub mod config;
pub mod controller;
pub mod core;
pub mod decision;
pub mod evaluator;
pub mod executor;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod planner;
pub mod schema;
pub mod storage;
pub mod tools;

pub use controller::Controller;
pub use schema::{AgentState, AgentStatus, ExecutionResult, Plan, Step};
