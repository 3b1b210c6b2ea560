//! agent 可调用的工具层
//!
//! - **registry**: Tool trait 与按名注册表
//! - **executor**: 超时 + 审计日志
//! - **improve**: 自我修复工具集

pub mod executor;
pub mod improve;
pub mod registry;

pub use executor::ToolExecutor;
pub use improve::{register_improvement_tools, ImproveToolkit};
pub use registry::{Tool, ToolRegistry};
