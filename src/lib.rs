//! Mend - 自我修复引擎
//!
//! 模块划分：
//! - **analysis**: 源码结构分析（导入、导出、依赖图、相关文件）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与引擎构建器
//! - **evolution**: OODA 修复循环（观察、定位、决策、执行、验证）
//! - **memory**: 修复模式库（学习记忆与持久化）
//! - **observability**: 日志初始化
//! - **tools**: 供 agent 调用的修复工具集
//! - **workspace**: 文件 I/O 与目录快照

pub mod analysis;
pub mod config;
pub mod core;
pub mod evolution;
pub mod memory;
pub mod observability;
pub mod tools;
pub mod workspace;

pub use crate::core::{EngineBuilder, EngineError, Result};
pub use evolution::{EvolutionConfig, ImprovementController, ImprovementRequest};
