//! DECIDE：构建修复计划、评估风险、判断是否需要审批
//!
//! 计划顺序：每个范围内文件一个 read → 一个 analyze → 至多 3 个 edit（主目标）→ 每个 edit 一个 verify。
//! edit 的具体内容交给 `FixProposer`（外部的补全服务在这里接入）。

use std::collections::HashMap;

use async_trait::async_trait;

use crate::analysis::FileMap;
use crate::core::Result;
use crate::evolution::engine::ProtectedPaths;
use crate::evolution::types::{FixStep, RiskLevel, StepAction, StepPayload, Task};

const MAX_EDIT_STEPS: usize = 3;
const CRITICAL_NAMES: &[&str] = &["core", "safety", "security", "auth", "self-improvement"];
const HIGH_RISK_NAMES: &[&str] = &["store", "state", "provider", "context", "reducer"];

/// 为 edit / create 步骤生成具体修改
#[async_trait]
pub trait FixProposer: Send + Sync {
    /// `content` 为目标文件当前内容；返回 None 表示不修改
    async fn propose(&self, task: &Task, step: &FixStep, content: Option<&str>) -> Result<Option<StepPayload>>;
}

/// 从不提出修改
#[derive(Debug, Default, Clone)]
pub struct NoopProposer;

#[async_trait]
impl FixProposer for NoopProposer {
    async fn propose(&self, _task: &Task, _step: &FixStep, _content: Option<&str>) -> Result<Option<StepPayload>> {
        Ok(None)
    }
}

/// 路径 → 固定修改
#[derive(Debug, Default, Clone)]
pub struct StaticProposer {
    fixes: HashMap<String, StepPayload>,
}

impl StaticProposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replace(mut self, path: impl Into<String>, old: impl Into<String>, new: impl Into<String>) -> Self {
        self.fixes.insert(
            path.into(),
            StepPayload::Replace {
                old: old.into(),
                new: new.into(),
            },
        );
        self
    }

    pub fn with_content(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.fixes.insert(
            path.into(),
            StepPayload::Content {
                content: content.into(),
            },
        );
        self
    }
}

#[async_trait]
impl FixProposer for StaticProposer {
    async fn propose(&self, _task: &Task, step: &FixStep, _content: Option<&str>) -> Result<Option<StepPayload>> {
        Ok(self.fixes.get(&step.target).cloned())
    }
}

/// 主目标：检测到的文件中位于范围内、且不受保护的前几个
pub fn primary_targets(task: &Task, protected: &ProtectedPaths) -> Vec<String> {
    task.observation
        .detected_files
        .iter()
        .filter(|p| task.orientation.scope.contains(p))
        .filter(|p| !protected.contains(p))
        .take(MAX_EDIT_STEPS)
        .cloned()
        .collect()
}

/// 构建有序计划（不含 payload）
pub fn build_plan(task: &Task, protected: &ProtectedPaths) -> (Vec<FixStep>, Vec<String>) {
    let mut steps = Vec::new();
    let mut order = 0;
    let mut next = || {
        order += 1;
        order
    };

    for path in task.orientation.scope.iter().filter(|p| !protected.contains(p)) {
        steps.push(FixStep::new(next(), StepAction::Read, path, format!("Read {path}")));
    }

    let targets = primary_targets(task, protected);
    steps.push(FixStep::new(
        next(),
        StepAction::Analyze,
        targets.first().cloned().unwrap_or_default(),
        format!("Analyze root cause: {}", task.orientation.root_cause),
    ));
    for path in &targets {
        steps.push(FixStep::new(
            next(),
            StepAction::Edit,
            path,
            format!("Apply fix to {path} for: {}", task.description),
        ));
    }
    for path in &targets {
        steps.push(FixStep::new(next(), StepAction::Verify, path, format!("Verify {path}")));
    }
    (steps, targets)
}

fn touches(paths: &[String], names: &[&str]) -> bool {
    paths.iter().any(|p| {
        let lower = p.to_lowercase();
        lower
            .split(|c: char| c == '/' || c == '.' || c == '-' || c == '_')
            .any(|seg| names.iter().any(|n| seg == *n || (n.len() >= 5 && seg.ends_with(n))))
            || names.iter().any(|n| n.contains('-') && lower.contains(n))
    })
}

/// 风险：> 5 个变更步骤或触及核心/安全文件为 critical；> 3 或触及状态类文件为 high；≥ 2 为 medium
pub fn assess_risk(plan: &[FixStep], scope: &[String]) -> RiskLevel {
    let mutating = plan.iter().filter(|s| s.action.is_mutating()).count();
    if mutating > 5 || touches(scope, CRITICAL_NAMES) {
        RiskLevel::Critical
    } else if mutating > 3 || touches(scope, HIGH_RISK_NAMES) {
        RiskLevel::High
    } else if mutating >= 2 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// ORIENT 阶段的初步风险，只看范围
pub fn scope_risk(scope: &[String]) -> RiskLevel {
    if touches(scope, CRITICAL_NAMES) {
        RiskLevel::Critical
    } else if touches(scope, HIGH_RISK_NAMES) || scope.len() > 8 {
        RiskLevel::High
    } else if scope.len() > 3 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

pub fn requires_approval(risk: RiskLevel, primary_targets: usize) -> bool {
    risk >= RiskLevel::High || primary_targets >= MAX_EDIT_STEPS
}

/// 为尚未完成的 edit / create 步骤填充 payload
pub async fn fill_payloads(
    proposer: &dyn FixProposer,
    task: &Task,
    plan: &mut [FixStep],
    files: &FileMap,
) -> Result<()> {
    for step in plan.iter_mut() {
        if !matches!(step.action, StepAction::Edit | StepAction::Create) || step.is_completed() {
            continue;
        }
        let content = files.get(&step.target).map(String::as_str);
        let payload = proposer.propose(task, step, content).await?;
        step.payload = payload;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::types::{IssueCategory, TaskTrigger};

    fn task(scope: &[&str], detected: &[&str]) -> Task {
        let mut task = Task::new(TaskTrigger::UserReport, "button misaligned", IssueCategory::Style, vec![]);
        task.orientation.scope = scope.iter().map(|s| s.to_string()).collect();
        task.observation.detected_files = detected.iter().map(|s| s.to_string()).collect();
        task
    }

    #[test]
    fn test_plan_shape() {
        let t = task(&["components/button.tsx", "app/page.tsx"], &["components/button.tsx"]);
        let (plan, targets) = build_plan(&t, &ProtectedPaths::default());
        let actions: Vec<_> = plan.iter().map(|s| s.action).collect();
        assert_eq!(
            actions,
            vec![StepAction::Read, StepAction::Read, StepAction::Analyze, StepAction::Edit, StepAction::Verify]
        );
        assert_eq!(targets, vec!["components/button.tsx"]);
        assert_eq!(plan.iter().map(|s| s.order).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
        assert_eq!(assess_risk(&plan, &t.orientation.scope), RiskLevel::Low);
        assert!(!requires_approval(RiskLevel::Low, targets.len()));
    }

    #[test]
    fn test_plan_skips_protected_and_caps_edits() {
        let t = task(
            &["a.ts", "b.ts", "c.ts", "d.ts", "lib/self-improvement/x.ts"],
            &["lib/self-improvement/x.ts", "a.ts", "b.ts", "c.ts", "d.ts"],
        );
        let protected = ProtectedPaths::new(["lib/self-improvement/"]);
        let (plan, targets) = build_plan(&t, &protected);
        assert_eq!(targets, vec!["a.ts", "b.ts", "c.ts"]);
        assert!(plan.iter().all(|s| !protected.contains(&s.target)));
        assert!(requires_approval(RiskLevel::Medium, targets.len()));
    }

    #[test]
    fn test_risk_levels() {
        let edits = |n: usize| -> Vec<FixStep> {
            (0..n).map(|i| FixStep::new(i, StepAction::Edit, format!("f{i}.ts"), "")).collect()
        };
        let plain = vec!["src/button.tsx".to_string()];
        assert_eq!(assess_risk(&edits(1), &plain), RiskLevel::Low);
        assert_eq!(assess_risk(&edits(2), &plain), RiskLevel::Medium);
        assert_eq!(assess_risk(&edits(4), &plain), RiskLevel::High);
        assert_eq!(assess_risk(&edits(6), &plain), RiskLevel::Critical);
        assert_eq!(assess_risk(&edits(1), &["src/store/editorStore.ts".to_string()]), RiskLevel::High);
        assert_eq!(assess_risk(&edits(1), &["src/core/engine.ts".to_string()]), RiskLevel::Critical);
    }

    #[tokio::test]
    async fn test_static_proposer_fills_edit_payloads() {
        let t = task(&["a.ts"], &["a.ts"]);
        let (mut plan, _) = build_plan(&t, &ProtectedPaths::default());
        let proposer = StaticProposer::new().with_replace("a.ts", "x", "y");
        fill_payloads(&proposer, &t, &mut plan, &FileMap::new()).await.unwrap();
        let edit = plan.iter().find(|s| s.action == StepAction::Edit).unwrap();
        assert_eq!(edit.payload, Some(StepPayload::Replace { old: "x".into(), new: "y".into() }));
        assert!(plan.iter().filter(|s| s.action == StepAction::Read).all(|s| s.payload.is_none()));
    }
}
