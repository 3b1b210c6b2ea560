//! 修复执行器：按顺序执行计划步骤，记录 FileChange 并维护回滚栈
//!
//! 步骤级错误记录到步骤结果与 `StepError` 后继续执行，不中断整个计划。

use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::analysis::FileMap;
use crate::core::{EngineError, Result};
use crate::evolution::engine::ProtectedPaths;
use crate::evolution::types::{
    ChangeType, FileChange, FixStep, StepAction, StepError, StepPayload, StepStatus,
};
use crate::workspace::FileIo;

#[derive(Debug, Clone, Copy)]
pub struct ExecutionOptions<'a> {
    pub protected: &'a ProtectedPaths,
    pub max_files: usize,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub changes: Vec<FileChange>,
    pub errors: Vec<StepError>,
    /// 执行结束时的本地工作映射
    pub files: FileMap,
}

pub struct FixExecutor {
    io: Arc<dyn FileIo>,
    rollback_stack: Mutex<Vec<FileChange>>,
}

impl FixExecutor {
    pub fn new(io: Arc<dyn FileIo>) -> Self {
        Self {
            io,
            rollback_stack: Mutex::new(Vec::new()),
        }
    }

    pub fn io(&self) -> &Arc<dyn FileIo> {
        &self.io
    }

    fn stack(&self) -> std::sync::MutexGuard<'_, Vec<FileChange>> {
        self.rollback_stack.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 当前可回滚的变更数
    pub fn pending_rollback(&self) -> usize {
        self.stack().len()
    }

    /// 新任务开始前清空回滚栈
    pub fn clear_rollback(&self) {
        self.stack().clear();
    }

    /// 按 order 严格顺序执行；已完成的步骤跳过（重试时沿用同一计划）
    pub async fn execute_plan(
        &self,
        plan: &mut [FixStep],
        working: &FileMap,
        opts: ExecutionOptions<'_>,
    ) -> ExecutionReport {
        plan.sort_by_key(|s| s.order);

        let mut report = ExecutionReport {
            files: working.clone(),
            ..ExecutionReport::default()
        };
        let mut applied = 0usize;

        for step in plan.iter_mut() {
            if step.is_completed() {
                continue;
            }
            if step.action.is_mutating() {
                if opts.protected.contains(&step.target) {
                    skip(step, "target is a protected path");
                    continue;
                }
                if applied >= opts.max_files {
                    skip(step, &format!("file limit reached ({})", opts.max_files));
                    continue;
                }
            }

            match self.execute_step(step, &mut report.files, opts.dry_run).await {
                Ok(change) => {
                    step.status = StepStatus::Completed;
                    if let Some(change) = change {
                        applied += 1;
                        step.result = Some(format!(
                            "{}{:?} {}",
                            if change.dry_run { "[dry-run] " } else { "" },
                            change.change_type,
                            change.path
                        ));
                        if !change.dry_run {
                            self.stack().push(change.clone());
                        }
                        tracing::info!(
                            path = %change.path,
                            change = ?change.change_type,
                            dry_run = change.dry_run,
                            "change applied"
                        );
                        report.changes.push(change);
                    }
                }
                Err(e) => {
                    tracing::warn!(order = step.order, path = %step.target, error = %e, "step failed");
                    step.status = StepStatus::Failed;
                    step.result = Some(e.to_string());
                    report.errors.push(StepError {
                        order: step.order,
                        target: step.target.clone(),
                        error: (&e).into(),
                    });
                }
            }
        }
        report
    }

    async fn execute_step(
        &self,
        step: &mut FixStep,
        files: &mut FileMap,
        dry_run: bool,
    ) -> Result<Option<FileChange>> {
        let path = step.target.clone();
        let message = step.description.clone();
        match step.action {
            StepAction::Read => {
                let content = self.io.read(&path).await?;
                step.result = Some(format!("read {} lines", content.lines().count()));
                files.insert(path, content);
                Ok(None)
            }
            StepAction::Analyze => {
                step.result = Some(format!("{} files in working set", files.len()));
                Ok(None)
            }
            StepAction::Verify => {
                step.result = Some("deferred to verification".to_string());
                Ok(None)
            }
            StepAction::Edit => {
                let old_content = files
                    .get(&path)
                    .cloned()
                    .ok_or_else(|| EngineError::ReadBeforeWrite(path.clone()))?;
                let Some(payload) = step.payload.clone() else {
                    step.result = Some("no edit proposed".to_string());
                    return Ok(None);
                };
                let new_content = match &payload {
                    StepPayload::Replace { old, new } => {
                        if old.is_empty() || !old_content.contains(old.as_str()) {
                            return Err(EngineError::EditMismatch(path));
                        }
                        old_content.replacen(old.as_str(), new, 1)
                    }
                    StepPayload::Content { content } => content.clone(),
                };
                if !dry_run {
                    match &payload {
                        StepPayload::Replace { old, new } => {
                            if !self.io.edit(&path, old, new, &message).await {
                                return Err(EngineError::EditMismatch(path));
                            }
                        }
                        StepPayload::Content { content } => {
                            self.io.write(&path, content, &message).await?;
                        }
                    }
                }
                files.insert(path.clone(), new_content.clone());
                Ok(Some(change(path, ChangeType::Modify, Some(old_content), Some(new_content), dry_run)))
            }
            StepAction::Create => {
                let content = match &step.payload {
                    Some(StepPayload::Content { content }) => content.clone(),
                    Some(StepPayload::Replace { .. }) | None => {
                        return Err(EngineError::InvalidInput(format!(
                            "create step for {path} has no content"
                        )))
                    }
                };
                let old_content = files.get(&path).cloned();
                if !dry_run {
                    self.io.write(&path, &content, &message).await?;
                }
                let kind = if old_content.is_some() {
                    ChangeType::Modify
                } else {
                    ChangeType::Create
                };
                files.insert(path.clone(), content.clone());
                Ok(Some(change(path, kind, old_content, Some(content), dry_run)))
            }
            StepAction::Delete => {
                let old_content = match files.get(&path) {
                    Some(c) => Some(c.clone()),
                    None => self.io.read(&path).await.ok(),
                };
                if !dry_run {
                    self.io.delete(&path, &message).await?;
                }
                files.remove(&path);
                Ok(Some(change(path, ChangeType::Delete, old_content, None, dry_run)))
            }
        }
    }

    /// 逆序回放回滚栈；单个文件失败只记录，最后无条件清空
    pub async fn rollback(&self) -> usize {
        let stack = std::mem::take(&mut *self.stack());
        let mut restored = 0;
        for change in stack.iter().rev() {
            let message = format!("rollback {}", change.path);
            let result = match (change.change_type, &change.old_content) {
                (ChangeType::Create, _) => self.io.delete(&change.path, &message).await,
                (ChangeType::Modify, Some(old)) | (ChangeType::Delete, Some(old)) => {
                    self.io.write(&change.path, old, &message).await
                }
                (_, None) => Err(EngineError::Io(format!(
                    "no pre-image recorded for {}",
                    change.path
                ))),
            };
            match result {
                Ok(()) => restored += 1,
                Err(e) => tracing::warn!(path = %change.path, error = %e, "rollback failed"),
            }
        }
        tracing::info!(restored, total = stack.len(), "rollback finished");
        restored
    }
}

fn skip(step: &mut FixStep, reason: &str) {
    tracing::warn!(order = step.order, path = %step.target, reason, "step skipped");
    step.status = StepStatus::Skipped;
    step.result = Some(format!("skipped: {reason}"));
}

fn change(
    path: String,
    change_type: ChangeType,
    old_content: Option<String>,
    new_content: Option<String>,
    dry_run: bool,
) -> FileChange {
    FileChange {
        path,
        change_type,
        old_content,
        new_content,
        timestamp: Utc::now(),
        dry_run,
    }
}

/// 把变更折叠进工作映射
pub fn apply_changes(files: &mut FileMap, changes: &[FileChange]) {
    for change in changes {
        match change.change_type {
            ChangeType::Delete => {
                files.remove(&change.path);
            }
            ChangeType::Create | ChangeType::Modify => {
                if let Some(content) = &change.new_content {
                    files.insert(change.path.clone(), content.clone());
                }
            }
        }
    }
}
