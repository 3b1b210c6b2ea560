//! 自我修复循环
//!
//! - **types**: Task 及各阶段记录
//! - **engine**: 运行参数与受保护路径
//! - **analyzer / planner**: ORIENT 与 DECIDE 的启发式
//! - **executor / verifier**: ACT 与 VERIFY
//! - **approval / events**: 审批门与阶段事件
//! - **loop_**: OODA 控制器

pub mod analyzer;
pub mod approval;
pub mod engine;
pub mod events;
pub mod executor;
pub mod loop_;
pub mod planner;
pub mod types;
pub mod verifier;

pub use approval::{
    gate_from_config, ApprovalGate, ApprovalRequest, AutoApprove, ConsoleApproval, DenyAll, FnApproval,
    WebhookApproval,
};
pub use engine::{EvolutionConfig, ProtectedPaths};
pub use events::{EventBus, Listener, PhaseEvent, PhaseStatus};
pub use executor::{apply_changes, ExecutionOptions, ExecutionReport, FixExecutor};
pub use loop_::{ImprovementController, ImprovementRequest};
pub use planner::{FixProposer, NoopProposer, StaticProposer};
pub use types::{
    ChangeType, FileChange, FixStep, IssueCategory, RecommendedAction, RiskLevel, StepAction, StepPayload,
    StepStatus, Task, TaskStatus, TaskTrigger, VerificationCheck, VerificationResult,
};
pub use verifier::VerificationEngine;
