//! OODA 控制器：observe → orient → decide → (act ⇄ verify) → 终态
//!
//! 同一时刻只允许一个活跃任务，第二次启动直接拒绝（不排队）。
//! 不论结果如何，任务结束后都会进入历史。取消在控制器层立即生效，
//! 但执行器已经发出的 I/O 调用会跑完。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use crate::analysis::{find_related_files, AnalysisEngine, FileMap};
use crate::config::RetryStrategy;
use crate::core::{EngineError, Result};
use crate::evolution::analyzer::{affected_area, classify_category, infer_root_cause, required_skills};
use crate::evolution::approval::{ApprovalGate, ApprovalRequest};
use crate::evolution::engine::EvolutionConfig;
use crate::evolution::events::{EventBus, Listener, PhaseEvent, PhaseStatus};
use crate::evolution::executor::{ExecutionOptions, FixExecutor};
use crate::evolution::planner::{
    assess_risk, build_plan, fill_payloads, requires_approval, scope_risk, FixProposer,
};
use crate::evolution::types::{
    IssueCategory, StepAction, StepPayload, Task, TaskStatus, TaskTrigger,
};
use crate::evolution::verifier::VerificationEngine;
use crate::memory::LearningMemory;
use crate::workspace::FileMapSupplier;

const ANALYZED_FILES: usize = 5;
const SIMILAR_PATTERNS: usize = 3;

/// 启动一次改进循环的参数
pub struct ImprovementRequest {
    pub trigger: TaskTrigger,
    pub description: String,
    /// 不提供时在 ORIENT 前按描述分类
    pub category: Option<IssueCategory>,
    pub affected_files: Vec<String>,
    /// 本次调用的审批门，覆盖控制器默认值
    pub on_approval_required: Option<Arc<dyn ApprovalGate>>,
}

impl ImprovementRequest {
    pub fn new(trigger: TaskTrigger, description: impl Into<String>) -> Self {
        Self {
            trigger,
            description: description.into(),
            category: None,
            affected_files: Vec::new(),
            on_approval_required: None,
        }
    }

    pub fn with_category(mut self, category: IssueCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_affected_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.affected_files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_approval(mut self, gate: Arc<dyn ApprovalGate>) -> Self {
        self.on_approval_required = Some(gate);
        self
    }
}

struct ActiveTask {
    task: Task,
    cancel: CancellationToken,
}

#[derive(Default)]
struct ControllerState {
    active: Option<ActiveTask>,
    history: VecDeque<Task>,
}

pub struct ImprovementController {
    config: EvolutionConfig,
    analysis: Arc<AnalysisEngine>,
    executor: FixExecutor,
    verifier: VerificationEngine,
    memory: Arc<LearningMemory>,
    proposer: Arc<dyn FixProposer>,
    default_gate: Arc<dyn ApprovalGate>,
    events: EventBus,
    state: Mutex<ControllerState>,
}

impl ImprovementController {
    pub fn new(
        config: EvolutionConfig,
        analysis: Arc<AnalysisEngine>,
        executor: FixExecutor,
        memory: Arc<LearningMemory>,
        proposer: Arc<dyn FixProposer>,
        default_gate: Arc<dyn ApprovalGate>,
    ) -> Self {
        let verifier = VerificationEngine::new(analysis.clone(), config.protected.clone());
        Self {
            config,
            analysis,
            executor,
            verifier,
            memory,
            proposer,
            default_gate,
            events: EventBus::new(),
            state: Mutex::new(ControllerState::default()),
        }
    }

    pub fn config(&self) -> &EvolutionConfig {
        &self.config
    }

    pub fn memory(&self) -> &Arc<LearningMemory> {
        &self.memory
    }

    pub fn analysis(&self) -> &Arc<AnalysisEngine> {
        &self.analysis
    }

    pub fn executor(&self) -> &FixExecutor {
        &self.executor
    }

    pub fn verifier(&self) -> &VerificationEngine {
        &self.verifier
    }

    fn state(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_listener(&self, listener: Listener) -> u64 {
        self.events.subscribe(listener)
    }

    pub fn remove_listener(&self, id: u64) -> bool {
        self.events.unsubscribe(id)
    }

    pub fn active_task(&self) -> Option<Task> {
        self.state().active.as_ref().map(|a| a.task.clone())
    }

    pub fn task(&self, id: &str) -> Option<Task> {
        let state = self.state();
        if let Some(active) = state.active.as_ref().filter(|a| a.task.id == id) {
            return Some(active.task.clone());
        }
        state.history.iter().find(|t| t.id == id).cloned()
    }

    /// 已结束的任务，旧的在前
    pub fn history(&self) -> Vec<Task> {
        self.state().history.iter().cloned().collect()
    }

    /// 回滚最近一个任务写入的全部变更
    pub async fn rollback_last(&self) -> usize {
        self.executor.rollback().await
    }

    /// 从快照提供方拉取完整映射后启动
    pub async fn start_from_supplier(
        &self,
        request: ImprovementRequest,
        supplier: &dyn FileMapSupplier,
    ) -> Result<Task> {
        let files = supplier.snapshot().await?;
        self.start_improvement(request, files).await
    }

    /// 运行一次完整循环，返回结束后的任务
    ///
    /// 输入错误、受保护路径、已有活跃任务这三种情况在创建任务前直接返回错误；
    /// 之后的任何失败都记录在任务上，任务总会进入历史。
    pub async fn start_improvement(&self, request: ImprovementRequest, files: FileMap) -> Result<Task> {
        let description = request.description.trim().to_string();
        if description.is_empty() {
            return Err(EngineError::InvalidInput("description is required".into()));
        }
        if let Some(path) = self.config.protected.first_violation(&request.affected_files) {
            tracing::warn!(path, "improvement rejected: protected path in affected files");
            return Err(EngineError::ProtectedPath(path.to_string()));
        }

        let category = request
            .category
            .unwrap_or_else(|| classify_category(&description));
        let mut task = Task::new(request.trigger, description, category, request.affected_files);
        let cancel = CancellationToken::new();
        {
            let mut state = self.state();
            if let Some(active) = &state.active {
                return Err(EngineError::TaskActive(active.task.id.clone()));
            }
            state.active = Some(ActiveTask {
                task: task.clone(),
                cancel: cancel.clone(),
            });
        }
        self.executor.clear_rollback();
        tracing::info!(task_id = %task.id, category = %task.category, "improvement started");

        let gate = request
            .on_approval_required
            .unwrap_or_else(|| self.default_gate.clone());
        let outcome = self.run_cycle(&mut task, files, gate.as_ref(), &cancel).await;

        match outcome {
            Ok(()) => {}
            Err(EngineError::Cancelled) => {
                if !task.status.is_terminal() {
                    let _ = task.transition(TaskStatus::Cancelled);
                }
                task.error.get_or_insert_with(|| "cancelled".to_string());
            }
            Err(e) => {
                tracing::warn!(task_id = %task.id, phase = %task.status, error = %e, "improvement failed");
                let phase = task.status;
                task.error = Some(e.to_string());
                if !task.status.is_terminal() {
                    let _ = task.transition(TaskStatus::Failed);
                }
                self.events.emit(PhaseEvent::new(&task.id, phase, PhaseStatus::Failed, e.to_string()));
            }
        }
        self.finalize(&task);
        Ok(task)
    }

    /// 立即把活跃任务置为 cancelled 并归档
    pub fn cancel_task(&self, id: &str) -> Result<Task> {
        let snapshot = {
            let mut state = self.state();
            match state.active.take() {
                Some(mut active) if active.task.id == id => {
                    active.cancel.cancel();
                    let _ = active.task.transition(TaskStatus::Cancelled);
                    active.task.error = Some("cancelled".to_string());
                    push_history(&mut state.history, active.task.clone(), self.config.history_limit);
                    active.task
                }
                other => {
                    state.active = other;
                    return Err(EngineError::TaskNotFound(id.to_string()));
                }
            }
        };
        tracing::info!(task_id = %id, "improvement cancelled");
        self.events.emit(PhaseEvent::new(
            id,
            TaskStatus::Cancelled,
            PhaseStatus::Completed,
            "task cancelled",
        ));
        Ok(snapshot)
    }

    async fn run_cycle(
        &self,
        task: &mut Task,
        files: FileMap,
        gate: &dyn ApprovalGate,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.emit_started(task);
        self.observe(task, &files);
        self.emit_completed(task, format!("{} files detected", task.observation.detected_files.len()));

        self.advance(task, TaskStatus::Orienting, cancel)?;
        self.orient(task, &files);
        self.emit_completed(task, task.orientation.root_cause.clone());

        self.advance(task, TaskStatus::Deciding, cancel)?;
        if !self.decide(task, &files, gate, cancel).await? {
            return Ok(());
        }

        let mut working = files;
        loop {
            self.advance(task, TaskStatus::Acting, cancel)?;
            task.iterations += 1;
            let report = self
                .executor
                .execute_plan(
                    &mut task.decision.plan,
                    &working,
                    ExecutionOptions {
                        protected: &self.config.protected,
                        max_files: self.config.max_files,
                        dry_run: self.config.dry_run,
                    },
                )
                .await;
            working = report.files;
            let applied = report.changes.len();
            task.execution.changes.extend(report.changes);
            task.execution.step_errors.extend(report.errors);
            self.publish(task);
            self.emit_completed(task, format!("iteration {}: {applied} changes", task.iterations));

            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            if task.execution.changes.is_empty() {
                return self.fail(task, "no changes were applied".to_string());
            }

            self.advance(task, TaskStatus::Verifying, cancel)?;
            let result = self.verifier.verify(task, &working, &task.execution.changes);
            let passed = result.passed;
            let retry_needed = result.retry_needed;
            let reason = result.failure_reason.clone().unwrap_or_default();
            task.execution.verifications.push(result);

            if passed {
                self.emit_completed(task, "verification passed".to_string());
                task.transition(TaskStatus::Completed)?;
                self.publish(task);
                tracing::info!(task_id = %task.id, iterations = task.iterations, "improvement completed");
                return Ok(());
            }
            if !retry_needed || task.iterations >= self.config.max_iterations {
                return self.fail(task, format!("verification failed: {reason}"));
            }
            tracing::info!(task_id = %task.id, iteration = task.iterations, %reason, "verification failed, retrying");

            if self.config.retry_strategy == RetryStrategy::Replan {
                self.advance(task, TaskStatus::Deciding, cancel)?;
                if !self.decide(task, &working, gate, cancel).await? {
                    return Ok(());
                }
            }
        }
    }

    fn observe(&self, task: &mut Task, files: &FileMap) {
        let related = find_related_files(&task.description, files, self.config.related_files_limit);
        let mut detected: Vec<String> = task
            .affected_files
            .iter()
            .filter(|p| files.contains_key(*p))
            .cloned()
            .collect();
        for file in &related {
            if !detected.contains(&file.path) {
                detected.push(file.path.clone());
            }
        }
        let analyses = detected
            .iter()
            .take(ANALYZED_FILES)
            .filter_map(|p| files.get(p).map(|c| self.analysis.analyze_component(p, c)))
            .collect::<Vec<_>>();

        task.observation.affected_area = affected_area(&task.description, &analyses);
        task.observation.related_files = related;
        task.observation.analyses = analyses;
        task.observation.detected_files = detected;
        self.publish(task);
    }

    fn orient(&self, task: &mut Task, files: &FileMap) {
        let mut scope: Vec<String> = Vec::new();
        let mut traces = Vec::new();
        for path in task.observation.detected_files.iter().take(ANALYZED_FILES) {
            let trace = self.analysis.trace_dependencies(path, files, self.config.trace_depth);
            for p in std::iter::once(path).chain(trace.downstream.iter()) {
                if !scope.contains(p) {
                    scope.push(p.clone());
                }
            }
            traces.push(trace);
        }
        scope.retain(|p| !self.config.protected.contains(p));

        let similar = self.memory.find_similar(&task.description, SIMILAR_PATTERNS);
        let contents: Vec<&str> = task
            .observation
            .analyses
            .iter()
            .filter_map(|a| files.get(&a.path).map(String::as_str))
            .collect();

        task.orientation.required_skills = required_skills(&task.observation.analyses, &contents);
        task.orientation.root_cause = infer_root_cause(&task.description, similar.first().map(|s| &s.pattern));
        task.orientation.similar_patterns = similar.iter().map(|s| s.pattern.signature.clone()).collect();
        task.orientation.risk = scope_risk(&scope);
        task.orientation.traces = traces;
        task.orientation.scope = scope;
        self.publish(task);
    }

    /// 返回 false 表示审批被拒绝、任务已取消
    async fn decide(
        &self,
        task: &mut Task,
        files: &FileMap,
        gate: &dyn ApprovalGate,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let (mut plan, targets) = build_plan(task, &self.config.protected);
        fill_payloads(self.proposer.as_ref(), task, &mut plan, files).await?;
        let risk = assess_risk(&plan, &task.orientation.scope);
        let already_approved = task.decision.approved == Some(true);

        task.decision.requires_approval = requires_approval(risk, targets.len());
        task.decision.plan = plan;
        task.decision.primary_targets = targets;
        task.decision.risk = risk;
        self.publish(task);

        if task.decision.requires_approval && !already_approved {
            let request = ApprovalRequest::from_task(task);
            tracing::info!(task_id = %task.id, risk = %risk, "awaiting approval");
            let approved = tokio::select! {
                approved = gate.approve(&request) => approved,
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            };
            task.decision.approved = Some(approved);
            if !approved {
                tracing::warn!(task_id = %task.id, "plan rejected by approver");
                task.error = Some(EngineError::ApprovalDenied(task.id.clone()).to_string());
                task.transition(TaskStatus::Cancelled)?;
                self.events.emit(PhaseEvent::new(
                    &task.id,
                    TaskStatus::Deciding,
                    PhaseStatus::Failed,
                    "approval denied",
                ));
                return Ok(false);
            }
        }
        self.emit_completed(
            task,
            format!("{} steps, risk {}", task.decision.plan.len(), task.decision.risk),
        );
        Ok(true)
    }

    fn fail(&self, task: &mut Task, reason: String) -> Result<()> {
        tracing::warn!(task_id = %task.id, %reason, "improvement failed");
        self.events.emit(PhaseEvent::new(&task.id, task.status, PhaseStatus::Failed, reason.clone()));
        task.error = Some(reason);
        task.transition(TaskStatus::Failed)?;
        self.publish(task);
        Ok(())
    }

    /// 迁移前检查取消
    fn advance(&self, task: &mut Task, next: TaskStatus, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        task.transition(next)?;
        self.publish(task);
        self.emit_started(task);
        Ok(())
    }

    /// 同步活跃槽位中的快照；任务已被取消归档时不做任何事
    fn publish(&self, task: &Task) {
        let mut state = self.state();
        if let Some(active) = state.active.as_mut().filter(|a| a.task.id == task.id) {
            active.task = task.clone();
        }
    }

    fn emit_started(&self, task: &Task) {
        tracing::info!(task_id = %task.id, phase = %task.status, "phase started");
        self.events.emit(PhaseEvent::new(
            &task.id,
            task.status,
            PhaseStatus::Started,
            format!("{} started", task.status),
        ));
    }

    fn emit_completed(&self, task: &Task, message: String) {
        let data = match task.status {
            TaskStatus::Observing => serde_json::json!({
                "detected_files": task.observation.detected_files,
                "affected_area": task.observation.affected_area,
            }),
            TaskStatus::Orienting => serde_json::json!({
                "scope": task.orientation.scope,
                "risk": task.orientation.risk,
            }),
            TaskStatus::Deciding => serde_json::json!({
                "primary_targets": task.decision.primary_targets,
                "requires_approval": task.decision.requires_approval,
            }),
            TaskStatus::Verifying => serde_json::json!({
                "score": task.execution.last_verification().map(|v| v.score),
            }),
            _ => serde_json::json!({ "changes": task.execution.changes.len() }),
        };
        self.events.emit(
            PhaseEvent::new(&task.id, task.status, PhaseStatus::Completed, message).with_data(data),
        );
    }

    /// 释放活跃槽位、归档并更新学习记忆；dry-run 不影响记忆
    /// 已归档的终态记录（cancel_task 写入）不会被覆盖，也不再交给学习记忆
    fn finalize(&self, task: &Task) {
        {
            let mut state = self.state();
            if state.active.as_ref().map(|a| a.task.id == task.id).unwrap_or(false) {
                state.active = None;
            }
            match state.history.iter_mut().find(|t| t.id == task.id) {
                Some(archived) if archived.status.is_terminal() => {
                    tracing::debug!(task_id = %task.id, status = %archived.status, "task already archived");
                    return;
                }
                Some(archived) => *archived = task.clone(),
                None => push_history(&mut state.history, task.clone(), self.config.history_limit),
            }
        }

        if self.config.dry_run {
            return;
        }
        match task.status {
            TaskStatus::Completed => {
                let solution = describe_solution(task);
                self.memory.record_success(task, solution.as_deref());
            }
            TaskStatus::Failed => {
                self.memory.record_failure(task);
            }
            _ => {}
        }
    }
}

fn push_history(history: &mut VecDeque<Task>, task: Task, limit: usize) {
    history.push_back(task);
    while history.len() > limit {
        history.pop_front();
    }
}

/// 已完成的 edit 步骤摘要，作为模式的解决方案文本
fn describe_solution(task: &Task) -> Option<String> {
    let parts: Vec<String> = task
        .decision
        .plan
        .iter()
        .filter(|s| s.is_completed() && s.action == StepAction::Edit)
        .filter_map(|s| match &s.payload {
            Some(StepPayload::Replace { old, new }) => {
                Some(format!("in {} replace '{old}' with '{new}'", s.target))
            }
            Some(StepPayload::Content { .. }) => Some(format!("rewrite {}", s.target)),
            None => None,
        })
        .collect();
    (!parts.is_empty()).then(|| parts.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::approval::{AutoApprove, DenyAll};
    use crate::evolution::planner::StaticProposer;
    use crate::evolution::types::RecommendedAction;
    use crate::evolution::types::FixStep;
    use crate::memory::MemorySettings;
    use crate::workspace::{FileIo, MemoryFileIo};
    use async_trait::async_trait;
    use tokio::sync::{Notify, Semaphore};

    fn project() -> FileMap {
        let mut files = FileMap::new();
        files.insert(
            "components/button.tsx".into(),
            "export function Button() { return <button className=\"btn left\" />; }\n".into(),
        );
        files.insert(
            "app/page.tsx".into(),
            "import { Button } from '../components/button';\nexport default function Page() { return <Button />; }\n".into(),
        );
        files.insert(".env".into(), "SECRET=1\n".into());
        files
    }

    fn controller(
        files: &FileMap,
        proposer: StaticProposer,
        gate: Arc<dyn ApprovalGate>,
    ) -> (Arc<MemoryFileIo>, ImprovementController) {
        let io = Arc::new(MemoryFileIo::new(files.clone()));
        let controller = controller_with(
            EvolutionConfig::default().with_protected_paths([".env"]),
            io.clone(),
            Arc::new(proposer),
            gate,
        );
        (io, controller)
    }

    fn controller_with(
        config: EvolutionConfig,
        io: Arc<dyn FileIo>,
        proposer: Arc<dyn FixProposer>,
        gate: Arc<dyn ApprovalGate>,
    ) -> ImprovementController {
        ImprovementController::new(
            config,
            Arc::new(AnalysisEngine::new()),
            FixExecutor::new(io),
            Arc::new(LearningMemory::new(MemorySettings::default())),
            proposer,
            gate,
        )
    }

    /// 按顺序为同一路径给出整文件内容，用完后不再修改
    struct SequenceProposer {
        path: &'static str,
        contents: Mutex<VecDeque<&'static str>>,
    }

    impl SequenceProposer {
        fn new(path: &'static str, contents: &[&'static str]) -> Self {
            Self {
                path,
                contents: Mutex::new(contents.iter().copied().collect()),
            }
        }
    }

    #[async_trait]
    impl FixProposer for SequenceProposer {
        async fn propose(&self, _task: &Task, step: &FixStep, _content: Option<&str>) -> Result<Option<StepPayload>> {
            if step.target != self.path {
                return Ok(None);
            }
            Ok(self.contents.lock().unwrap().pop_front().map(|content| StepPayload::Content {
                content: content.to_string(),
            }))
        }
    }

    const BROKEN_BUTTON: &str =
        "import { helper } from './missing';\nexport function Button() { return helper(); }\n";
    const FIXED_BUTTON: &str = "export function Button() { return <button className=\"btn center\" />; }\n";

    fn button_fix() -> StaticProposer {
        StaticProposer::new().with_replace("components/button.tsx", "btn left", "btn center")
    }

    #[tokio::test]
    async fn test_full_cycle_completes_and_emits_events() {
        let files = project();
        let (io, controller) = controller(&files, button_fix(), Arc::new(AutoApprove));
        let phases = Arc::new(Mutex::new(Vec::new()));
        let sink = phases.clone();
        controller.add_listener(Arc::new(move |e: &PhaseEvent| {
            sink.lock().unwrap().push((e.phase, e.status));
        }));

        let request = ImprovementRequest::new(TaskTrigger::UserReport, "button misaligned")
            .with_category(IssueCategory::Style)
            .with_affected_files(["components/button.tsx"]);
        let task = controller.start_improvement(request, files).await.unwrap();

        assert_eq!(task.status, TaskStatus::Completed, "{:?}", task.error);
        assert_eq!(task.iterations, 1);
        assert_eq!(
            task.execution.last_verification().unwrap().recommended_action,
            RecommendedAction::Complete
        );
        assert!(io.get("components/button.tsx").await.unwrap().contains("btn center"));
        assert!(controller.active_task().is_none());
        assert_eq!(controller.history().len(), 1);
        assert_eq!(controller.memory().stats().total_patterns, 1);

        let phases = phases.lock().unwrap();
        assert_eq!(phases.first(), Some(&(TaskStatus::Observing, PhaseStatus::Started)));
        assert!(phases.contains(&(TaskStatus::Verifying, PhaseStatus::Completed)));
    }

    #[tokio::test]
    async fn test_protected_affected_file_rejected_before_task() {
        let files = project();
        let (io, controller) = controller(&files, button_fix(), Arc::new(AutoApprove));
        let request = ImprovementRequest::new(TaskTrigger::UserReport, "env broken")
            .with_affected_files([".env"]);
        let err = controller.start_improvement(request, files).await.unwrap_err();
        assert!(matches!(err, EngineError::ProtectedPath(_)));
        assert!(controller.history().is_empty());
        assert_eq!(io.get(".env").await.unwrap(), "SECRET=1\n");
        assert!(io.records().is_empty());
    }

    #[tokio::test]
    async fn test_approval_denied_cancels_before_act() {
        let mut files = project();
        for name in ["a", "b"] {
            files.insert(
                format!("components/{name}-button.tsx"),
                "export const B = () => <button className=\"btn left\" />;\n".into(),
            );
        }
        let proposer = button_fix()
            .with_replace("components/a-button.tsx", "btn left", "btn center")
            .with_replace("components/b-button.tsx", "btn left", "btn center");
        let (io, controller) = controller(&files, proposer, Arc::new(AutoApprove));
        let request = ImprovementRequest::new(TaskTrigger::UserReport, "button misaligned")
            .with_affected_files(["components/button.tsx", "components/a-button.tsx", "components/b-button.tsx"])
            .with_approval(Arc::new(DenyAll));
        let task = controller.start_improvement(request, files).await.unwrap();

        assert!(task.decision.requires_approval);
        assert_eq!(task.decision.approved, Some(false));
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.execution.changes.is_empty());
        assert!(io.records().is_empty());
    }

    #[tokio::test]
    async fn test_unfixable_issue_fails_and_is_archived() {
        let files = project();
        let (_, controller) = controller(&files, StaticProposer::new(), Arc::new(AutoApprove));
        let request = ImprovementRequest::new(TaskTrigger::SelfDetected, "button misaligned");
        let task = controller.start_improvement(request, files).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().contains("no changes"));
        assert_eq!(controller.task(&task.id).unwrap().status, TaskStatus::Failed);
        assert_eq!(controller.memory().stats().total_patterns, 0);
    }

    #[tokio::test]
    async fn test_unresolved_import_retries_until_ceiling() {
        let files = project();
        let io = Arc::new(MemoryFileIo::new(files.clone()));
        let controller = controller_with(
            EvolutionConfig::default().with_max_iterations(3),
            io.clone(),
            Arc::new(SequenceProposer::new("components/button.tsx", &[BROKEN_BUTTON])),
            Arc::new(AutoApprove),
        );
        let request = ImprovementRequest::new(TaskTrigger::UserReport, "button misaligned")
            .with_affected_files(["components/button.tsx"]);
        let task = controller.start_improvement(request, files).await.unwrap();

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.iterations, 3);
        assert_eq!(task.execution.verifications.len(), 3);
        assert!(task.execution.verifications.iter().all(|v| v.retry_needed && !v.passed));
        assert!(task.error.unwrap().contains("verification failed"));
        // 同一计划重试时已完成的 edit 不再执行
        assert_eq!(task.execution.changes.len(), 1);
    }

    #[tokio::test]
    async fn test_replan_applies_new_fix_on_retry() {
        let files = project();
        let io = Arc::new(MemoryFileIo::new(files.clone()));
        let controller = controller_with(
            EvolutionConfig::default().with_retry_strategy(RetryStrategy::Replan),
            io.clone(),
            Arc::new(SequenceProposer::new(
                "components/button.tsx",
                &[BROKEN_BUTTON, FIXED_BUTTON],
            )),
            Arc::new(AutoApprove),
        );
        let phases = Arc::new(Mutex::new(Vec::new()));
        let sink = phases.clone();
        controller.add_listener(Arc::new(move |e: &PhaseEvent| {
            if e.status == PhaseStatus::Started {
                sink.lock().unwrap().push(e.phase);
            }
        }));
        let request = ImprovementRequest::new(TaskTrigger::UserReport, "button misaligned")
            .with_affected_files(["components/button.tsx"]);
        let task = controller.start_improvement(request, files).await.unwrap();

        assert_eq!(task.status, TaskStatus::Completed, "{:?}", task.error);
        assert_eq!(task.iterations, 2);
        assert!(!task.execution.verifications[0].passed);
        assert!(task.execution.verifications[1].passed);
        assert_eq!(io.get("components/button.tsx").await.unwrap(), FIXED_BUTTON);
        let deciding = phases.lock().unwrap().iter().filter(|p| **p == TaskStatus::Deciding).count();
        assert_eq!(deciding, 2);
    }

    /// read 在放行前一直挂起
    struct GatedIo {
        inner: MemoryFileIo,
        entered: Notify,
        gate: Semaphore,
    }

    #[async_trait]
    impl FileIo for GatedIo {
        async fn read(&self, path: &str) -> Result<String> {
            self.entered.notify_one();
            let _permit = self.gate.acquire().await;
            self.inner.read(path).await
        }

        async fn edit(&self, path: &str, old: &str, new: &str, message: &str) -> bool {
            self.inner.edit(path, old, new, message).await
        }

        async fn write(&self, path: &str, content: &str, message: &str) -> Result<()> {
            self.inner.write(path, content, message).await
        }

        async fn delete(&self, path: &str, message: &str) -> Result<()> {
            self.inner.delete(path, message).await
        }
    }

    #[tokio::test]
    async fn test_cancel_during_act_stays_cancelled() {
        let files = project();
        let io = Arc::new(GatedIo {
            inner: MemoryFileIo::new(files.clone()),
            entered: Notify::new(),
            gate: Semaphore::new(0),
        });
        let controller = Arc::new(controller_with(
            EvolutionConfig::default(),
            io.clone(),
            Arc::new(StaticProposer::new()),
            Arc::new(AutoApprove),
        ));
        let request = ImprovementRequest::new(TaskTrigger::UserReport, "button misaligned")
            .with_affected_files(["components/button.tsx"]);
        let running = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.start_improvement(request, files).await })
        };

        io.entered.notified().await;
        let id = controller.active_task().unwrap().id;
        assert_eq!(controller.cancel_task(&id).unwrap().status, TaskStatus::Cancelled);
        io.gate.add_permits(16);

        let task = running.await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(controller.task(&id).unwrap().status, TaskStatus::Cancelled);
        assert_eq!(controller.history().len(), 1);
        assert!(controller.active_task().is_none());
    }

    #[test]
    fn test_cancel_unknown_task() {
        let files = project();
        let (_, controller) = controller(&files, StaticProposer::new(), Arc::new(AutoApprove));
        assert!(matches!(controller.cancel_task("nope"), Err(EngineError::TaskNotFound(_))));
    }
}
