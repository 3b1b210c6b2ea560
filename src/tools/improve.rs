//! 自我修复工具集：把分析、执行、校验与学习记忆暴露为 agent 可调用的工具
//!
//! 六个工具共享同一个 `ImproveToolkit`：apply_fixes 写入的变更会被记住，
//! 供 verify_fixes 校验、rollback_fixes 回滚，record_outcome 之后清空。

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::analysis::{find_related_files, AnalysisEngine, FileMap};
use crate::core::EngineError;
use crate::evolution::analyzer::{affected_area, classify_category, infer_root_cause};
use crate::evolution::executor::{apply_changes, ExecutionOptions, FixExecutor};
use crate::evolution::types::{
    FileChange, FixStep, IssueCategory, RecommendedAction, StepAction, StepPayload, Task, TaskStatus,
    TaskTrigger, VerificationResult,
};
use crate::evolution::{EvolutionConfig, VerificationEngine};
use crate::memory::LearningMemory;
use crate::tools::{Tool, ToolRegistry};
use crate::workspace::{FileIo, FileMapSupplier};

const ANALYZED_FILES: usize = 5;
const DEFAULT_PATTERN_RESULTS: usize = 5;

type ToolResult = Result<String, String>;

pub struct ImproveToolkit {
    config: EvolutionConfig,
    analysis: Arc<AnalysisEngine>,
    memory: Arc<LearningMemory>,
    executor: FixExecutor,
    verifier: VerificationEngine,
    supplier: Arc<dyn FileMapSupplier>,
    applied: Mutex<Vec<FileChange>>,
    last_verification: Mutex<Option<VerificationResult>>,
}

impl ImproveToolkit {
    pub fn new(
        config: EvolutionConfig,
        analysis: Arc<AnalysisEngine>,
        memory: Arc<LearningMemory>,
        io: Arc<dyn FileIo>,
        supplier: Arc<dyn FileMapSupplier>,
    ) -> Self {
        let verifier = VerificationEngine::new(analysis.clone(), config.protected.clone());
        Self {
            config,
            analysis,
            memory,
            executor: FixExecutor::new(io),
            verifier,
            supplier,
            applied: Mutex::new(Vec::new()),
            last_verification: Mutex::new(None),
        }
    }

    fn applied(&self) -> MutexGuard<'_, Vec<FileChange>> {
        self.applied.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn last_verification(&self) -> MutexGuard<'_, Option<VerificationResult>> {
        self.last_verification.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn files(&self) -> Result<FileMap, String> {
        self.supplier.snapshot().await.map_err(|e| e.to_string())
    }

    /// OBSERVE + ORIENT 的轻量版本：检测文件、影响区域、根因、范围
    fn assess(&self, task: &mut Task, files: &FileMap) {
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
        let analyses: Vec<_> = detected
            .iter()
            .take(ANALYZED_FILES)
            .filter_map(|p| files.get(p).map(|c| self.analysis.analyze_component(p, c)))
            .collect();

        let mut scope: Vec<String> = Vec::new();
        for path in &task.affected_files {
            let downstream = self.analysis.trace_dependencies(path, files, self.config.trace_depth).downstream;
            for p in std::iter::once(path).chain(downstream.iter()) {
                if !scope.contains(p) && !self.config.protected.contains(p) {
                    scope.push(p.clone());
                }
            }
        }

        let similar = self.memory.find_similar(&task.description, 1);
        task.observation.affected_area = affected_area(&task.description, &analyses);
        task.observation.related_files = related;
        task.observation.analyses = analyses;
        task.observation.detected_files = detected;
        task.orientation.root_cause = infer_root_cause(&task.description, similar.first().map(|s| &s.pattern));
        task.orientation.scope = scope;
    }
}

#[derive(Debug, Deserialize)]
struct IssueArgs {
    description: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    affected_files: Vec<String>,
}

impl IssueArgs {
    fn parse(args: Value) -> Result<Self, String> {
        let parsed: IssueArgs = serde_json::from_value(args).map_err(|e| format!("Invalid arguments: {e}"))?;
        if parsed.description.trim().is_empty() {
            return Err("Missing required parameter: description".into());
        }
        Ok(parsed)
    }

    fn into_task(self) -> Result<Task, String> {
        let category = match &self.category {
            Some(c) => c.parse::<IssueCategory>().map_err(|e: EngineError| e.to_string())?,
            None => classify_category(&self.description),
        };
        Ok(Task::new(TaskTrigger::UserReport, self.description, category, self.affected_files))
    }
}

fn issue_schema(extra: Value) -> Value {
    let mut schema = serde_json::json!({
        "type": "object",
        "properties": {
            "description": {"type": "string", "description": "问题描述"},
            "category": {"type": "string", "enum": ["ui_bug", "logic_error", "performance", "style", "accessibility", "feature_enhancement"]},
            "affected_files": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["description"]
    });
    if let (Some(props), Some(extra)) = (schema["properties"].as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            props.insert(k.clone(), v.clone());
        }
    }
    schema
}

fn to_json(value: &impl serde::Serialize) -> ToolResult {
    serde_json::to_string_pretty(value).map_err(|e| e.to_string())
}

/// 分析问题：相关文件、影响区域、根因、相似模式
pub struct AnalyzeIssueTool(Arc<ImproveToolkit>);

#[async_trait]
impl Tool for AnalyzeIssueTool {
    fn name(&self) -> &str {
        "analyze_issue"
    }

    fn description(&self) -> &str {
        "分析问题描述，返回相关文件（按相关度排序）、影响区域、推断的根因以及历史上相似的修复模式"
    }

    fn parameters_schema(&self) -> Value {
        issue_schema(serde_json::json!({}))
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let mut task = IssueArgs::parse(args)?.into_task()?;
        let files = self.0.files().await?;
        self.0.assess(&mut task, &files);
        let similar = self.0.memory.find_similar(&task.description, DEFAULT_PATTERN_RESULTS);
        to_json(&serde_json::json!({
            "category": task.category,
            "affected_area": task.observation.affected_area,
            "related_files": task.observation.related_files,
            "root_cause": task.orientation.root_cause,
            "scope": task.orientation.scope,
            "similar_patterns": similar,
        }))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum FixKind {
    Edit,
    Create,
    Delete,
}

#[derive(Debug, Deserialize)]
struct FixArgs {
    path: String,
    kind: FixKind,
    #[serde(default)]
    old: Option<String>,
    #[serde(default)]
    new: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApplyArgs {
    fixes: Vec<FixArgs>,
    #[serde(default)]
    dry_run: Option<bool>,
}

/// 把修复列表转成计划：先读入所有已存在的目标，再按顺序执行变更
fn plan_fixes(fixes: Vec<FixArgs>, files: &FileMap) -> Result<Vec<FixStep>, String> {
    let mut steps = Vec::new();
    let mut order = 0;
    let mut read = BTreeSet::new();
    for fix in &fixes {
        if files.contains_key(&fix.path) && read.insert(fix.path.clone()) {
            order += 1;
            steps.push(FixStep::new(order, StepAction::Read, &fix.path, format!("Read {}", fix.path)));
        }
    }
    for fix in fixes {
        order += 1;
        let step = match fix.kind {
            FixKind::Edit => {
                let payload = match (fix.old, fix.new, fix.content) {
                    (Some(old), Some(new), _) => StepPayload::Replace { old, new },
                    (_, _, Some(content)) => StepPayload::Content { content },
                    _ => return Err(format!("edit of {} needs old/new or content", fix.path)),
                };
                FixStep::new(order, StepAction::Edit, &fix.path, format!("Edit {}", fix.path)).with_payload(payload)
            }
            FixKind::Create => {
                let content = fix
                    .content
                    .ok_or_else(|| format!("create of {} needs content", fix.path))?;
                FixStep::new(order, StepAction::Create, &fix.path, format!("Create {}", fix.path))
                    .with_payload(StepPayload::Content { content })
            }
            FixKind::Delete => FixStep::new(order, StepAction::Delete, &fix.path, format!("Delete {}", fix.path)),
        };
        steps.push(step);
    }
    Ok(steps)
}

/// 执行一组修复；超过文件数上限或触及受保护路径时整体拒绝
pub struct ApplyFixesTool(Arc<ImproveToolkit>);

#[async_trait]
impl Tool for ApplyFixesTool {
    fn name(&self) -> &str {
        "apply_fixes"
    }

    fn description(&self) -> &str {
        r#"应用一组修复。每项为 {"path", "kind": "edit"|"create"|"delete", "old"?, "new"?, "content"?}。
edit 用 old/new 做一次精确替换，或用 content 整体覆盖；create 需要 content。
修复项数超过上限、或任何一项指向受保护路径时，整组拒绝且不修改任何文件。"#
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "fixes": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "path": {"type": "string"},
                            "kind": {"type": "string", "enum": ["edit", "create", "delete"]},
                            "old": {"type": "string"},
                            "new": {"type": "string"},
                            "content": {"type": "string"}
                        },
                        "required": ["path", "kind"]
                    }
                },
                "dry_run": {"type": "boolean"}
            },
            "required": ["fixes"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let args: ApplyArgs = serde_json::from_value(args).map_err(|e| format!("Invalid arguments: {e}"))?;
        let kit = &self.0;
        if args.fixes.is_empty() {
            return Err("Missing required parameter: fixes".into());
        }

        // 每一项都是一次 create/modify/delete，与执行器的计数口径一致
        if args.fixes.len() > kit.config.max_files {
            return Err(EngineError::FileLimitExceeded {
                count: args.fixes.len(),
                max: kit.config.max_files,
            }
            .to_string());
        }
        let distinct: BTreeSet<&str> = args.fixes.iter().map(|f| f.path.as_str()).collect();
        if let Some(path) = distinct.iter().find(|p| kit.config.protected.contains(p)) {
            return Err(EngineError::ProtectedPath(path.to_string()).to_string());
        }

        let files = kit.files().await?;
        let mut plan = plan_fixes(args.fixes, &files)?;
        // 回滚栈与待校验变更只覆盖最近一次 apply_fixes
        kit.executor.clear_rollback();
        kit.applied().clear();
        kit.last_verification().take();
        let report = kit
            .executor
            .execute_plan(
                &mut plan,
                &files,
                ExecutionOptions {
                    protected: &kit.config.protected,
                    max_files: kit.config.max_files,
                    dry_run: args.dry_run.unwrap_or(kit.config.dry_run),
                },
            )
            .await;

        let changes: Vec<Value> = report
            .changes
            .iter()
            .map(|c| serde_json::json!({"path": c.path, "change_type": c.change_type, "dry_run": c.dry_run}))
            .collect();
        *kit.applied() = report.changes;
        to_json(&serde_json::json!({
            "changes": changes,
            "errors": report.errors,
            "steps": plan,
        }))
    }
}

/// 对已应用的变更运行 7 项校验
pub struct VerifyFixesTool(Arc<ImproveToolkit>);

#[async_trait]
impl Tool for VerifyFixesTool {
    fn name(&self) -> &str {
        "verify_fixes"
    }

    fn description(&self) -> &str {
        "校验 apply_fixes 之后的项目状态：文件存在、import 可解析、导出一致、受保护路径、范围、括号平衡、下游影响"
    }

    fn parameters_schema(&self) -> Value {
        issue_schema(serde_json::json!({}))
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let kit = &self.0;
        let mut task = IssueArgs::parse(args)?.into_task()?;
        let changes = kit.applied().clone();
        if changes.is_empty() {
            return Err("No applied fixes to verify".into());
        }
        let mut files = kit.files().await?;
        let pending: Vec<FileChange> = changes.iter().filter(|c| c.dry_run).cloned().collect();
        apply_changes(&mut files, &pending);

        kit.assess(&mut task, &files);
        if task.orientation.scope.is_empty() {
            task.orientation.scope = changes.iter().map(|c| c.path.clone()).collect();
        }
        let result = kit.verifier.verify(&task, &files, &changes);
        *kit.last_verification() = Some(result.clone());
        to_json(&result)
    }
}

#[derive(Debug, Deserialize)]
struct OutcomeArgs {
    success: bool,
    #[serde(flatten)]
    issue: IssueArgs,
    #[serde(default)]
    solution: Option<String>,
}

/// 把一次修复的结果写入学习记忆
pub struct RecordOutcomeTool(Arc<ImproveToolkit>);

impl RecordOutcomeTool {
    /// 调用方断言成功时，把任务推进到 completed 并附上最近一次校验结果
    fn complete(task: &mut Task, changes: Vec<FileChange>, verification: Option<VerificationResult>) -> Result<(), String> {
        for next in [
            TaskStatus::Orienting,
            TaskStatus::Deciding,
            TaskStatus::Acting,
            TaskStatus::Verifying,
            TaskStatus::Completed,
        ] {
            task.transition(next).map_err(|e| e.to_string())?;
        }
        task.execution.changes = changes;
        task.execution.verifications.push(verification.filter(|v| v.passed).unwrap_or(VerificationResult {
            passed: true,
            checks: Vec::new(),
            score: 1.0,
            retry_needed: false,
            failure_reason: None,
            recommended_action: RecommendedAction::Complete,
        }));
        Ok(())
    }
}

#[async_trait]
impl Tool for RecordOutcomeTool {
    fn name(&self) -> &str {
        "record_outcome"
    }

    fn description(&self) -> &str {
        "记录修复结果：success=true 时沉淀或强化修复模式，false 时降低匹配模式的成功率；返回记忆统计"
    }

    fn parameters_schema(&self) -> Value {
        let mut schema = issue_schema(serde_json::json!({
            "success": {"type": "boolean"},
            "solution": {"type": "string"}
        }));
        if let Some(required) = schema["required"].as_array_mut() {
            required.push(Value::from("success"));
        }
        schema
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let kit = &self.0;
        let args: OutcomeArgs = serde_json::from_value(args).map_err(|e| format!("Invalid arguments: {e}"))?;
        if args.issue.description.trim().is_empty() {
            return Err("Missing required parameter: description".into());
        }
        let mut task = args.issue.into_task()?;
        let files = kit.files().await?;
        kit.assess(&mut task, &files);

        let pattern = if args.success {
            let changes = std::mem::take(&mut *kit.applied());
            let verification = kit.last_verification().take();
            Self::complete(&mut task, changes, verification)?;
            kit.memory.record_success(&task, args.solution.as_deref())
        } else {
            kit.applied().clear();
            kit.last_verification().take();
            kit.memory.record_failure(&task)
        };
        to_json(&serde_json::json!({
            "pattern": pattern,
            "stats": kit.memory.stats(),
        }))
    }
}

#[derive(Debug, Deserialize)]
struct FindArgs {
    query: String,
    #[serde(default)]
    max_results: Option<usize>,
}

pub struct FindPatternsTool(Arc<ImproveToolkit>);

#[async_trait]
impl Tool for FindPatternsTool {
    fn name(&self) -> &str {
        "find_patterns"
    }

    fn description(&self) -> &str {
        "按关键词相似度检索历史修复模式（0.7·相似度 + 0.3·成功率 排序）"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "max_results": {"type": "integer", "minimum": 1}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let args: FindArgs = serde_json::from_value(args).map_err(|e| format!("Invalid arguments: {e}"))?;
        let results = self
            .0
            .memory
            .find_similar(&args.query, args.max_results.unwrap_or(DEFAULT_PATTERN_RESULTS));
        to_json(&results)
    }
}

pub struct RollbackFixesTool(Arc<ImproveToolkit>);

#[async_trait]
impl Tool for RollbackFixesTool {
    fn name(&self) -> &str {
        "rollback_fixes"
    }

    fn description(&self) -> &str {
        "逆序撤销最近一次 apply_fixes 写入的变更，返回恢复的文件数"
    }

    async fn execute(&self, _args: Value) -> ToolResult {
        let kit = &self.0;
        let restored = kit.executor.rollback().await;
        kit.applied().clear();
        kit.last_verification().take();
        to_json(&serde_json::json!({ "restored": restored }))
    }
}

/// 注册全部六个工具
pub fn register_improvement_tools(registry: &mut ToolRegistry, toolkit: Arc<ImproveToolkit>) {
    registry.register(AnalyzeIssueTool(toolkit.clone()));
    registry.register(ApplyFixesTool(toolkit.clone()));
    registry.register(VerifyFixesTool(toolkit.clone()));
    registry.register(RecordOutcomeTool(toolkit.clone()));
    registry.register(FindPatternsTool(toolkit.clone()));
    registry.register(RollbackFixesTool(toolkit));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemorySettings;
    use crate::workspace::MemoryFileIo;
    use serde_json::json;

    fn setup() -> (Arc<MemoryFileIo>, ToolRegistry) {
        let mut files = FileMap::new();
        files.insert(
            "components/button.tsx".into(),
            "export function Button() { return <button className=\"btn left\" />; }\n".into(),
        );
        files.insert(".env".into(), "SECRET=1\n".into());
        let io = Arc::new(MemoryFileIo::new(files));
        let toolkit = ImproveToolkit::new(
            EvolutionConfig::default().with_protected_paths([".env"]).with_max_files(2),
            Arc::new(AnalysisEngine::new()),
            Arc::new(LearningMemory::new(MemorySettings::default())),
            io.clone(),
            io.clone(),
        );
        let mut registry = ToolRegistry::new();
        register_improvement_tools(&mut registry, Arc::new(toolkit));
        (io, registry)
    }

    #[tokio::test]
    async fn test_apply_verify_record() {
        let (io, registry) = setup();
        assert_eq!(registry.tool_names().len(), 6);

        let applied = registry
            .execute(
                "apply_fixes",
                json!({"fixes": [{"path": "components/button.tsx", "kind": "edit", "old": "btn left", "new": "btn center"}]}),
            )
            .await
            .unwrap();
        assert!(applied.contains("components/button.tsx"));
        assert!(io.get("components/button.tsx").await.unwrap().contains("btn center"));

        let issue = json!({"description": "button misaligned", "category": "style", "affected_files": ["components/button.tsx"]});
        let verified = registry.execute("verify_fixes", issue.clone()).await.unwrap();
        let result: VerificationResult = serde_json::from_str(&verified).unwrap();
        assert!(result.passed, "{:?}", result.failure_reason);

        let mut outcome = issue;
        outcome["success"] = json!(true);
        let recorded: Value = serde_json::from_str(&registry.execute("record_outcome", outcome).await.unwrap()).unwrap();
        assert_eq!(recorded["stats"]["total_patterns"], 1);
        assert_eq!(recorded["stats"]["successful_patterns"], 1);

        let found = registry.execute("find_patterns", json!({"query": "button style result is wrong"})).await.unwrap();
        assert!(found.contains("components/button.tsx"));
    }

    #[tokio::test]
    async fn test_apply_rejects_wholesale() {
        let (io, registry) = setup();
        let protected = registry
            .execute(
                "apply_fixes",
                json!({"fixes": [
                    {"path": "components/button.tsx", "kind": "edit", "old": "btn left", "new": "x"},
                    {"path": ".env", "kind": "edit", "content": "SECRET=2"}
                ]}),
            )
            .await;
        assert!(protected.unwrap_err().contains(".env"));

        let too_many = registry
            .execute(
                "apply_fixes",
                json!({"fixes": [
                    {"path": "a.ts", "kind": "create", "content": "a"},
                    {"path": "b.ts", "kind": "create", "content": "b"},
                    {"path": "c.ts", "kind": "create", "content": "c"}
                ]}),
            )
            .await;
        assert!(too_many.unwrap_err().contains("max: 2"));
        assert!(io.records().is_empty());
    }

    #[tokio::test]
    async fn test_apply_counts_fixes_not_files() {
        let (io, registry) = setup();
        let chained = registry
            .execute(
                "apply_fixes",
                json!({"fixes": [
                    {"path": "components/button.tsx", "kind": "edit", "old": "btn left", "new": "btn a"},
                    {"path": "components/button.tsx", "kind": "edit", "old": "btn a", "new": "btn b"},
                    {"path": "components/button.tsx", "kind": "edit", "old": "btn b", "new": "btn c"}
                ]}),
            )
            .await;
        assert!(chained.unwrap_err().contains("3 (max: 2)"));
        assert!(io.records().is_empty());
        assert!(io.get("components/button.tsx").await.unwrap().contains("btn left"));
    }

    #[tokio::test]
    async fn test_rollback_covers_latest_apply_only() {
        let (io, registry) = setup();
        registry
            .execute("apply_fixes", json!({"fixes": [{"path": "first.ts", "kind": "create", "content": "export {};"}]}))
            .await
            .unwrap();
        registry
            .execute("apply_fixes", json!({"fixes": [{"path": "second.ts", "kind": "create", "content": "export {};"}]}))
            .await
            .unwrap();

        let out = registry.execute("rollback_fixes", json!({})).await.unwrap();
        assert!(out.contains("\"restored\": 1"));
        assert!(io.get("first.ts").await.is_some());
        assert!(io.get("second.ts").await.is_none());
    }

    #[tokio::test]
    async fn test_rollback_tool() {
        let (io, registry) = setup();
        registry
            .execute("apply_fixes", json!({"fixes": [{"path": "new.ts", "kind": "create", "content": "export {};"}]}))
            .await
            .unwrap();
        assert!(io.get("new.ts").await.is_some());
        let out = registry.execute("rollback_fixes", json!({})).await.unwrap();
        assert!(out.contains("\"restored\": 1"));
        assert!(io.get("new.ts").await.is_none());
    }
}
