//! 核心层：错误类型与组合根

pub mod builder;
pub mod error;

pub use builder::{create_engine_builder, EngineBuilder, EngineComponents};
pub use error::{EngineError, Result};
