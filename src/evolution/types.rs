use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::{ComponentAnalysis, DependencyTrace, RelatedFile};
use crate::core::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskTrigger {
    UserReport,
    SelfDetected,
    Scheduled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    UiBug,
    LogicError,
    Performance,
    Style,
    Accessibility,
    FeatureEnhancement,
}

impl std::fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IssueCategory::UiBug => "ui_bug",
            IssueCategory::LogicError => "logic_error",
            IssueCategory::Performance => "performance",
            IssueCategory::Style => "style",
            IssueCategory::Accessibility => "accessibility",
            IssueCategory::FeatureEnhancement => "feature_enhancement",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for IssueCategory {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "ui_bug" | "ui" => Ok(IssueCategory::UiBug),
            "logic_error" | "logic" => Ok(IssueCategory::LogicError),
            "performance" | "perf" => Ok(IssueCategory::Performance),
            "style" => Ok(IssueCategory::Style),
            "accessibility" | "a11y" => Ok(IssueCategory::Accessibility),
            "feature_enhancement" | "feature" => Ok(IssueCategory::FeatureEnhancement),
            other => Err(EngineError::InvalidInput(format!("unknown category: {other}"))),
        }
    }
}

/// 任务状态机：observing → orienting → deciding → (acting ⇄ verifying) → 终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Observing,
    Orienting,
    Deciding,
    Acting,
    Verifying,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Observing => "observing",
            TaskStatus::Orienting => "orienting",
            TaskStatus::Deciding => "deciding",
            TaskStatus::Acting => "acting",
            TaskStatus::Verifying => "verifying",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }

    /// 任何非终态都可以进入 failed / cancelled；verifying → deciding 用于重新规划
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Observing, Orienting)
                | (Orienting, Deciding)
                | (Deciding, Acting)
                | (Acting, Verifying)
                | (Verifying, Acting)
                | (Verifying, Deciding)
                | (Verifying, Completed)
                | (_, Failed)
                | (_, Cancelled)
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    Read,
    Analyze,
    Edit,
    Create,
    Delete,
    Verify,
}

impl StepAction {
    pub fn is_mutating(self) -> bool {
        matches!(self, StepAction::Edit | StepAction::Create | StepAction::Delete)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Completed,
    /// 受保护路径或达到文件数上限，未产生任何副作用
    Skipped,
    Failed,
}

/// edit / create 步骤的具体内容，由 FixProposer 填充
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepPayload {
    /// 替换第一次出现的 old
    Replace { old: String, new: String },
    /// 整体写入
    Content { content: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixStep {
    pub order: usize,
    pub action: StepAction,
    pub target: String,
    pub description: String,
    pub status: StepStatus,
    pub result: Option<String>,
    pub payload: Option<StepPayload>,
}

impl FixStep {
    pub fn new(order: usize, action: StepAction, target: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            order,
            action,
            target: target.into(),
            description: description.into(),
            status: StepStatus::Pending,
            result: None,
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: StepPayload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Create,
    Modify,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub change_type: ChangeType,
    pub old_content: Option<String>,
    pub new_content: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// dry-run 只记录意图，不触碰 I/O
    #[serde(default)]
    pub dry_run: bool,
}

/// 步骤级错误：记录后继续执行后续步骤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepError {
    pub order: usize,
    pub target: String,
    pub error: EngineErrorRecord,
}

/// 可序列化的错误快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineErrorRecord {
    pub kind: String,
    pub message: String,
}

impl From<&EngineError> for EngineErrorRecord {
    fn from(e: &EngineError) -> Self {
        let kind = format!("{e:?}");
        let kind = kind
            .split(|c: char| c == '(' || c == ' ' || c == '{')
            .next()
            .unwrap_or("")
            .to_string();
        Self {
            kind,
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationCheck {
    pub name: String,
    pub passed: bool,
    pub details: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    Complete,
    RetryFix,
    Escalate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub passed: bool,
    pub checks: Vec<VerificationCheck>,
    /// 通过比例
    pub score: f64,
    pub retry_needed: bool,
    pub failure_reason: Option<String>,
    pub recommended_action: RecommendedAction,
}

impl VerificationResult {
    pub fn check(&self, name: &str) -> Option<&VerificationCheck> {
        self.checks.iter().find(|c| c.name == name)
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &VerificationCheck> {
        self.checks.iter().filter(|c| !c.passed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub related_files: Vec<RelatedFile>,
    pub analyses: Vec<ComponentAnalysis>,
    /// 已分析的文件（调用方声明的文件在前）
    pub detected_files: Vec<String>,
    pub affected_area: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    pub traces: Vec<DependencyTrace>,
    /// 修改范围：检测到的文件 ∪ 下游，已去除受保护路径
    pub scope: Vec<String>,
    pub root_cause: String,
    pub required_skills: Vec<String>,
    pub similar_patterns: Vec<String>,
    pub risk: RiskLevel,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub plan: Vec<FixStep>,
    pub primary_targets: Vec<String>,
    pub risk: RiskLevel,
    pub requires_approval: bool,
    pub approved: Option<bool>,
}

impl Decision {
    pub fn mutating_steps(&self) -> usize {
        self.plan.iter().filter(|s| s.action.is_mutating()).count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    /// 所有迭代累计的变更
    pub changes: Vec<FileChange>,
    pub step_errors: Vec<StepError>,
    pub verifications: Vec<VerificationResult>,
}

impl Execution {
    pub fn last_verification(&self) -> Option<&VerificationResult> {
        self.verifications.last()
    }

    pub fn changed_paths(&self) -> BTreeSet<&str> {
        self.changes.iter().map(|c| c.path.as_str()).collect()
    }
}

/// 一次 OODA 循环
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub trigger: TaskTrigger,
    pub description: String,
    pub category: IssueCategory,
    /// 调用方声明的受影响文件
    pub affected_files: Vec<String>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub iterations: usize,
    pub error: Option<String>,
    pub observation: Observation,
    pub orientation: Orientation,
    pub decision: Decision,
    pub execution: Execution,
}

impl Task {
    pub fn new(
        trigger: TaskTrigger,
        description: impl Into<String>,
        category: IssueCategory,
        affected_files: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            trigger,
            description: description.into(),
            category,
            affected_files,
            status: TaskStatus::Observing,
            created_at: now,
            updated_at: now,
            completed_at: None,
            iterations: 0,
            error: None,
            observation: Observation::default(),
            orientation: Orientation::default(),
            decision: Decision::default(),
            execution: Execution::default(),
        }
    }

    pub fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        if next.is_terminal() {
            self.completed_at = Some(self.updated_at);
        }
        Ok(())
    }

    /// 已完成且最后一次校验通过
    pub fn succeeded(&self) -> bool {
        self.status == TaskStatus::Completed
            && self
                .execution
                .last_verification()
                .map(|v| v.passed)
                .unwrap_or(false)
    }
}
