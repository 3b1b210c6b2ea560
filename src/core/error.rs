//! 引擎错误类型
//!
//! 覆盖输入错误、策略违规（受保护路径 / 文件数上限）、I/O 错误、状态机非法迁移等；
//! 校验失败本身不是错误，由 VerificationResult 表达。

use thiserror::Error;

/// 自我修复引擎运行过程中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// 单活跃任务约束：已有任务在运行时拒绝新任务（不排队）
    #[error("Another task is already active: {0}")]
    TaskActive(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Protected path cannot be modified: {0}")]
    ProtectedPath(String),

    #[error("Too many files in one fix set: {count} (max: {max})")]
    FileLimitExceeded { count: usize, max: usize },

    #[error("File not found: {0}")]
    FileNotFound(String),

    /// edit 步骤的目标从未读入工作映射
    #[error("File must be read before it is edited: {0}")]
    ReadBeforeWrite(String),

    #[error("Edit target text not found in {0}")]
    EditMismatch(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Path escapes workspace root: {0}")]
    PathEscape(String),

    #[error("Invalid task transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Approval denied for task {0}")]
    ApprovalDenied(String),

    #[error("Task cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Tool execution failed: {0}")]
    ToolFailed(String),
}

impl EngineError {
    /// 策略违规在任何 I/O 之前被拒绝
    pub fn is_policy_violation(&self) -> bool {
        matches!(
            self,
            EngineError::ProtectedPath(_) | EngineError::FileLimitExceeded { .. }
        )
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => EngineError::FileNotFound(e.to_string()),
            _ => EngineError::Io(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::InvalidInput(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
