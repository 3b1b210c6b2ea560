//! 修复循环集成测试：通过 EngineBuilder 在真实临时目录上跑完整流程

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use mend::analysis::FileMap;
use mend::config::AppConfig;
use mend::evolution::{
    ApprovalGate, ApprovalRequest, DenyAll, ImprovementRequest, IssueCategory, StaticProposer, TaskStatus,
    TaskTrigger,
};
use mend::memory::{FixPattern, LearningMemory, MemoryBlobStore, MemorySettings};
use mend::workspace::MemoryFileIo;
use mend::{EngineBuilder, EngineError};
use tokio::sync::Notify;

const BUTTON: &str = "export function Button() { return <button className=\"btn left\" />; }\n";
const PAGE: &str =
    "import { Button } from '../components/button';\nexport default function Page() { return <Button />; }\n";

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn disk_project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "components/button.tsx", BUTTON);
    write(dir.path(), "app/page.tsx", PAGE);
    write(dir.path(), ".env", "SECRET=1\n");
    dir
}

fn button_fix() -> StaticProposer {
    StaticProposer::new().with_replace("components/button.tsx", "btn left", "btn center")
}

fn builder(root: &Path) -> EngineBuilder {
    let mut config = AppConfig::default();
    config.engine.protected_paths.push(".env".into());
    EngineBuilder::new(config, root).with_store(Arc::new(MemoryBlobStore::new()))
}

fn button_request() -> ImprovementRequest {
    ImprovementRequest::new(TaskTrigger::UserReport, "button misaligned")
        .with_category(IssueCategory::Style)
        .with_affected_files(["components/button.tsx"])
}

#[tokio::test]
async fn test_button_fix_completes_on_disk() {
    let dir = disk_project();
    let engine = builder(dir.path()).with_proposer(Arc::new(button_fix())).build();

    let task = engine
        .controller
        .start_from_supplier(button_request(), engine.supplier.as_ref())
        .await
        .unwrap();

    assert_eq!(task.status, TaskStatus::Completed, "{:?}", task.error);
    let on_disk = std::fs::read_to_string(dir.path().join("components/button.tsx")).unwrap();
    assert!(on_disk.contains("btn center"));
    let stats = engine.memory.stats();
    assert_eq!(stats.total_patterns, 1);
    assert_eq!(stats.successful_patterns, 1);
}

#[tokio::test]
async fn test_rollback_restores_disk() {
    let dir = disk_project();
    let engine = builder(dir.path()).with_proposer(Arc::new(button_fix())).build();
    let task = engine
        .controller
        .start_from_supplier(button_request(), engine.supplier.as_ref())
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Completed, "{:?}", task.error);

    assert_eq!(engine.controller.rollback_last().await, 1);
    let restored = std::fs::read_to_string(dir.path().join("components/button.tsx")).unwrap();
    assert_eq!(restored, BUTTON);
    assert_eq!(engine.controller.rollback_last().await, 0);
}

#[tokio::test]
async fn test_protected_file_is_never_touched() {
    let dir = disk_project();
    let engine = builder(dir.path())
        .with_proposer(Arc::new(StaticProposer::new().with_content(".env", "SECRET=2\n")))
        .build();
    let request = ImprovementRequest::new(TaskTrigger::UserReport, "env secret wrong").with_affected_files([".env"]);

    let err = engine
        .controller
        .start_from_supplier(request, engine.supplier.as_ref())
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::ProtectedPath(p) if p == ".env"));
    assert_eq!(std::fs::read_to_string(dir.path().join(".env")).unwrap(), "SECRET=1\n");
    assert!(engine.controller.history().is_empty());
}

#[tokio::test]
async fn test_apply_fixes_over_file_cap_changes_nothing() {
    let dir = disk_project();
    let engine = builder(dir.path()).build();
    let fixes: Vec<serde_json::Value> = (0..11)
        .map(|i| serde_json::json!({"path": format!("gen/file{i}.ts"), "kind": "create", "content": "export {};"}))
        .collect();

    let err = engine
        .tools
        .execute("apply_fixes", serde_json::json!({ "fixes": fixes }))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::ToolFailed(ref msg) if msg.contains("max: 10")), "{err}");
    assert!(!dir.path().join("gen").exists());
}

#[tokio::test]
async fn test_denied_approval_leaves_files_alone() {
    let mut files = FileMap::new();
    let mut proposer = StaticProposer::new();
    for name in ["primary", "secondary", "tertiary"] {
        let path = format!("components/{name}-button.tsx");
        files.insert(path.clone(), BUTTON.to_string());
        proposer = proposer.with_replace(path, "btn left", "btn center");
    }
    let io = Arc::new(MemoryFileIo::new(files));
    let engine = builder(Path::new("."))
        .with_file_io(io.clone())
        .with_supplier(io.clone())
        .with_proposer(Arc::new(proposer))
        .build();

    let request = ImprovementRequest::new(TaskTrigger::UserReport, "button misaligned")
        .with_affected_files([
            "components/primary-button.tsx",
            "components/secondary-button.tsx",
            "components/tertiary-button.tsx",
        ])
        .with_approval(Arc::new(DenyAll));
    let task = engine
        .controller
        .start_from_supplier(request, engine.supplier.as_ref())
        .await
        .unwrap();

    assert_eq!(task.status, TaskStatus::Cancelled);
    assert_eq!(task.decision.approved, Some(false));
    assert!(io.records().is_empty());
    assert_eq!(engine.memory.stats().total_patterns, 0);
}

/// 通知测试已进入审批，然后一直挂起
struct ParkedGate(Arc<Notify>);

#[async_trait]
impl ApprovalGate for ParkedGate {
    async fn approve(&self, _request: &ApprovalRequest) -> bool {
        self.0.notify_one();
        std::future::pending::<bool>().await
    }
}

#[tokio::test]
async fn test_single_active_task_and_cancel() {
    let mut files = FileMap::new();
    for name in ["primary", "secondary", "tertiary"] {
        files.insert(format!("components/{name}-button.tsx"), BUTTON.to_string());
    }
    let io = Arc::new(MemoryFileIo::new(files));
    let engine = builder(Path::new("."))
        .with_file_io(io.clone())
        .with_supplier(io.clone())
        .with_proposer(Arc::new(StaticProposer::new()))
        .build();

    let reached = Arc::new(Notify::new());
    let request = ImprovementRequest::new(TaskTrigger::UserReport, "button misaligned")
        .with_affected_files([
            "components/primary-button.tsx",
            "components/secondary-button.tsx",
            "components/tertiary-button.tsx",
        ])
        .with_approval(Arc::new(ParkedGate(reached.clone())));
    let controller = engine.controller.clone();
    let supplier = engine.supplier.clone();
    let running =
        tokio::spawn(async move { controller.start_from_supplier(request, supplier.as_ref()).await });
    reached.notified().await;

    let active = engine.controller.active_task().expect("task should be awaiting approval");
    assert_eq!(active.status, TaskStatus::Deciding);

    let second = engine
        .controller
        .start_from_supplier(
            ImprovementRequest::new(TaskTrigger::SelfDetected, "another issue"),
            engine.supplier.as_ref(),
        )
        .await;
    assert!(matches!(second, Err(EngineError::TaskActive(ref id)) if *id == active.id));

    let cancelled = engine.controller.cancel_task(&active.id).unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);

    let finished = running.await.unwrap().unwrap();
    assert_eq!(finished.status, TaskStatus::Cancelled);
    assert!(engine.controller.active_task().is_none());
    assert_eq!(engine.controller.history().len(), 1);
    assert_eq!(engine.controller.task(&active.id).unwrap().status, TaskStatus::Cancelled);
    assert!(io.records().is_empty());
}

#[test]
fn test_find_similar_ranks_matching_pattern_first() {
    let memory = LearningMemory::new(MemorySettings::default());
    memory.insert(FixPattern::new(
        "ui_bug|sidebar|sidebar collapse toggle broken|components/sidebar.tsx",
        IssueCategory::UiBug,
        "modified components/sidebar.tsx",
        vec!["components/sidebar.tsx".into()],
    ));
    memory.insert(FixPattern::new(
        "logic_error|api|api request timeout|lib/api.ts",
        IssueCategory::LogicError,
        "modified lib/api.ts",
        vec!["lib/api.ts".into()],
    ));

    let hits = memory.find_similar("sidebar collapse broken", 5);
    assert_eq!(hits.len(), 1);
    assert!(hits[0].pattern.signature.contains("sidebar"));

    let hits = memory.find_similar("api request timeout in sidebar", 5);
    assert_eq!(hits[0].pattern.files, vec!["lib/api.ts".to_string()]);
    assert!(hits.iter().all(|h| h.similarity >= 0.1));
}
