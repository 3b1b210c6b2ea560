//! 校验引擎：对变更后的工作映射做 7 项相互独立的检查
//!
//! 校验失败不是错误，结果由 `VerificationResult` 表达；
//! import / syntax / export 三类失败可以通过修订计划修复，标记为可重试。

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::analysis::classify::is_source_file;
use crate::analysis::lexer::{tokenize, TokenKind};
use crate::analysis::{is_local_source, parse_module_signature, resolve_import, AnalysisEngine, ExportKind, FileMap};
use crate::evolution::engine::ProtectedPaths;
use crate::evolution::types::{
    ChangeType, FileChange, RecommendedAction, Task, VerificationCheck, VerificationResult,
};

pub const CHECK_FILE_EXISTENCE: &str = "file_existence";
pub const CHECK_IMPORT_VALIDITY: &str = "import_validity";
pub const CHECK_EXPORT_CONSISTENCY: &str = "export_consistency";
pub const CHECK_PROTECTED_PATHS: &str = "protected_paths";
pub const CHECK_SCOPE_INTEGRITY: &str = "scope_integrity";
pub const CHECK_SYNTAX_SANITY: &str = "syntax_sanity";
pub const CHECK_DOWNSTREAM_IMPACT: &str = "downstream_impact";

const RETRYABLE: &[&str] = &[CHECK_IMPORT_VALIDITY, CHECK_SYNTAX_SANITY, CHECK_EXPORT_CONSISTENCY];
const MAX_RETRYABLE_FAILURES: usize = 2;

pub struct VerificationEngine {
    analysis: Arc<AnalysisEngine>,
    protected: ProtectedPaths,
}

impl VerificationEngine {
    pub fn new(analysis: Arc<AnalysisEngine>, protected: ProtectedPaths) -> Self {
        Self { analysis, protected }
    }

    /// `changes` 为本任务累计的全部变更，`files` 为应用变更后的工作映射
    pub fn verify(&self, task: &Task, files: &FileMap, changes: &[FileChange]) -> VerificationResult {
        let changes: Vec<&FileChange> = changes.iter().collect();
        self.analysis
            .invalidate_many(changes.iter().map(|c| c.path.as_str()));

        let live = live_paths(&changes, files);
        let checks = vec![
            self.check_file_existence(&changes, files),
            self.check_import_validity(&live, files),
            check_export_consistency(&live, files),
            self.check_protected_paths(&changes),
            check_scope_integrity(task, &changes),
            check_syntax_sanity(&live, files),
            self.check_downstream_impact(&changes, files),
        ];
        let result = aggregate(checks);
        tracing::info!(
            task_id = %task.id,
            passed = result.passed,
            score = result.score,
            action = ?result.recommended_action,
            "verification finished"
        );
        result
    }

    fn check_file_existence(&self, changes: &[&FileChange], files: &FileMap) -> VerificationCheck {
        let mut expected: BTreeMap<&str, ChangeType> = BTreeMap::new();
        for change in changes {
            expected.insert(change.path.as_str(), change.change_type);
        }
        let problems: Vec<String> = expected
            .iter()
            .filter_map(|(path, kind)| match (kind, files.contains_key(*path)) {
                (ChangeType::Delete, true) => Some(format!("{path} should have been deleted")),
                (ChangeType::Create | ChangeType::Modify, false) => Some(format!("{path} is missing")),
                _ => None,
            })
            .collect();
        check(CHECK_FILE_EXISTENCE, problems, || format!("{} changed files present", expected.len()))
    }

    fn check_import_validity(&self, live: &[&str], files: &FileMap) -> VerificationCheck {
        let mut problems = Vec::new();
        for path in live.iter().filter(|p| is_source_file(p)) {
            let Some(content) = files.get(*path) else { continue };
            let analysis = self.analysis.analyze_component(path, content);
            for import in analysis.imports.iter().filter(|i| is_local_source(&i.source)) {
                if resolve_import(path, &import.source, files).is_none() {
                    problems.push(format!("{path}: unresolved import '{}'", import.source));
                }
            }
        }
        check(CHECK_IMPORT_VALIDITY, problems, || "all local imports resolve".to_string())
    }

    fn check_protected_paths(&self, changes: &[&FileChange]) -> VerificationCheck {
        let problems: Vec<String> = changes
            .iter()
            .filter(|c| self.protected.contains(&c.path))
            .map(|c| format!("{:?} on protected path {}", c.change_type, c.path))
            .collect();
        check(CHECK_PROTECTED_PATHS, problems, || "no protected path touched".to_string())
    }

    fn check_downstream_impact(&self, changes: &[&FileChange], files: &FileMap) -> VerificationCheck {
        let mut problems = Vec::new();
        let mut seen = BTreeSet::new();
        for change in changes {
            if !seen.insert(change.path.as_str()) {
                continue;
            }
            // 同一路径取最早的前像
            let before = changes
                .iter()
                .find(|c| c.path == change.path)
                .and_then(|c| c.old_content.as_deref());

            if !files.contains_key(&change.path) {
                for importer in importers_of(&change.path, before, files) {
                    problems.push(format!("{importer} still imports deleted {}", change.path));
                }
                continue;
            }

            let (Some(before), Some(after)) = (before, files.get(&change.path)) else { continue };
            let old_exports: BTreeSet<String> =
                parse_module_signature(before).export_names().into_iter().collect();
            let after_sig = parse_module_signature(after);
            if after_sig.has_star_export() {
                continue;
            }
            let new_exports: BTreeSet<String> = after_sig.export_names().into_iter().collect();
            let removed: BTreeSet<&String> = old_exports.difference(&new_exports).collect();
            if removed.is_empty() {
                continue;
            }
            for (importer, content) in files.iter().filter(|(p, _)| p.as_str() != change.path) {
                if !is_source_file(importer) {
                    continue;
                }
                for import in parse_module_signature(content).imports {
                    if resolve_import(importer, &import.source, files).as_deref() != Some(change.path.as_str()) {
                        continue;
                    }
                    for symbol in import.symbols.iter().filter(|s| removed.contains(s)) {
                        problems.push(format!(
                            "{importer} imports '{symbol}' which {} no longer exports",
                            change.path
                        ));
                    }
                }
            }
        }
        check(CHECK_DOWNSTREAM_IMPACT, problems, || "no broken importers".to_string())
    }
}

/// 变更后仍存在的路径（去重）
fn live_paths<'a>(changes: &[&'a FileChange], files: &FileMap) -> Vec<&'a str> {
    let mut out: Vec<&str> = Vec::new();
    for change in changes {
        if files.contains_key(&change.path) && !out.contains(&change.path.as_str()) {
            out.push(change.path.as_str());
        }
    }
    out
}

/// 仍在导入已删除文件的源文件；删除后映射里已无目标，借前像把目标放回去再解析
fn importers_of(deleted: &str, before: Option<&str>, files: &FileMap) -> Vec<String> {
    let mut probe = files.clone();
    probe.insert(deleted.to_string(), before.unwrap_or_default().to_string());
    files
        .iter()
        .filter(|(p, _)| is_source_file(p))
        .filter(|(p, content)| {
            parse_module_signature(content)
                .imports
                .iter()
                .any(|i| resolve_import(p, &i.source, &probe).as_deref() == Some(deleted))
        })
        .map(|(p, _)| p.clone())
        .collect()
}

fn check_export_consistency(live: &[&str], files: &FileMap) -> VerificationCheck {
    let mut problems = Vec::new();
    for path in live.iter().filter(|p| is_source_file(p)) {
        let Some(content) = files.get(*path) else { continue };
        let sig = parse_module_signature(content);
        let bindings = sig.bindings();
        for export in &sig.exports {
            let local = match export.kind {
                ExportKind::Declaration => &export.name,
                ExportKind::List => export.local.as_ref().unwrap_or(&export.name),
                ExportKind::Default | ExportKind::ReExport | ExportKind::Star => continue,
            };
            if !bindings.contains(local) {
                problems.push(format!("{path}: export '{}' has no definition", export.name));
            }
        }
    }
    check(CHECK_EXPORT_CONSISTENCY, problems, || "all exports defined".to_string())
}

fn check_scope_integrity(task: &Task, changes: &[&FileChange]) -> VerificationCheck {
    let scope = &task.orientation.scope;
    let problems: Vec<String> = changes
        .iter()
        .filter(|c| matches!(c.change_type, ChangeType::Modify | ChangeType::Delete))
        .filter(|c| !scope.contains(&c.path))
        .map(|c| format!("{} is outside the task scope", c.path))
        .collect();
    check(CHECK_SCOPE_INTEGRITY, problems, || format!("{} files in scope", scope.len()))
}

fn check_syntax_sanity(live: &[&str], files: &FileMap) -> VerificationCheck {
    let problems: Vec<String> = live
        .iter()
        .filter(|p| is_source_file(p))
        .filter_map(|path| {
            let content = files.get(*path)?;
            bracket_error(content).map(|e| format!("{path}: {e}"))
        })
        .collect();
    check(CHECK_SYNTAX_SANITY, problems, || "brackets balanced".to_string())
}

/// 括号平衡；字符串、模板与注释由 lexer 处理掉
fn bracket_error(content: &str) -> Option<String> {
    let mut stack: Vec<(char, usize)> = Vec::new();
    for token in tokenize(content) {
        let TokenKind::Punct(c) = token.kind else { continue };
        match c {
            '(' | '[' | '{' => stack.push((c, token.line)),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some((open, _)) if open == expected => {}
                    Some((open, line)) => {
                        return Some(format!(
                            "'{c}' at line {} does not close '{open}' from line {line}",
                            token.line
                        ))
                    }
                    None => return Some(format!("unmatched '{c}' at line {}", token.line)),
                }
            }
            _ => {}
        }
    }
    stack
        .last()
        .map(|(open, line)| format!("unclosed '{open}' from line {line}"))
}

fn check(name: &str, problems: Vec<String>, ok: impl FnOnce() -> String) -> VerificationCheck {
    VerificationCheck {
        name: name.to_string(),
        passed: problems.is_empty(),
        details: if problems.is_empty() { ok() } else { problems.join("; ") },
    }
}

fn aggregate(checks: Vec<VerificationCheck>) -> VerificationResult {
    let total = checks.len();
    let failed: Vec<&VerificationCheck> = checks.iter().filter(|c| !c.passed).collect();
    let passed = failed.is_empty();
    let retry_needed = failed.iter().any(|c| RETRYABLE.contains(&c.name.as_str()));
    let protected_violation = failed.iter().any(|c| c.name == CHECK_PROTECTED_PATHS);

    let recommended_action = if passed {
        RecommendedAction::Complete
    } else if protected_violation || failed.len() > MAX_RETRYABLE_FAILURES {
        RecommendedAction::Escalate
    } else {
        RecommendedAction::RetryFix
    };
    let failure_reason = (!passed).then(|| {
        failed
            .iter()
            .map(|c| format!("{}: {}", c.name, c.details))
            .collect::<Vec<_>>()
            .join(" | ")
    });
    let score = if total == 0 {
        1.0
    } else {
        (total - failed.len()) as f64 / total as f64
    };

    VerificationResult {
        passed,
        checks,
        score,
        retry_needed,
        failure_reason,
        recommended_action,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::types::{IssueCategory, TaskTrigger};
    use chrono::Utc;

    fn files() -> FileMap {
        let mut files = FileMap::new();
        files.insert(
            "components/button.tsx".into(),
            "import { cn } from '../lib/cn';\nexport function Button() { return <button className={cn('btn center')} />; }\n".into(),
        );
        files.insert("lib/cn.ts".into(), "export const cn = (...c: string[]) => c.join(' ');\n".into());
        files.insert(
            "app/page.tsx".into(),
            "import { Button } from '../components/button';\nexport default function Page() { return <Button />; }\n".into(),
        );
        files.insert(".env".into(), "SECRET=1".into());
        files
    }

    fn task(scope: &[&str]) -> Task {
        let mut task = Task::new(TaskTrigger::UserReport, "button misaligned", IssueCategory::Style, vec![]);
        task.orientation.scope = scope.iter().map(|s| s.to_string()).collect();
        task
    }

    fn modify(path: &str, old: &str, new: &str) -> FileChange {
        FileChange {
            path: path.into(),
            change_type: ChangeType::Modify,
            old_content: Some(old.into()),
            new_content: Some(new.into()),
            timestamp: Utc::now(),
            dry_run: false,
        }
    }

    fn engine() -> VerificationEngine {
        VerificationEngine::new(Arc::new(AnalysisEngine::new()), ProtectedPaths::new([".env"]))
    }

    #[test]
    fn test_clean_edit_passes_every_check() {
        let files = files();
        let change = modify("components/button.tsx", "", &files["components/button.tsx"]);
        let result = engine().verify(&task(&["components/button.tsx"]), &files, &[change]);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.checks.len(), 7);
        assert_eq!(result.score, 1.0);
        assert_eq!(result.recommended_action, RecommendedAction::Complete);
    }

    #[test]
    fn test_broken_import_and_brackets_are_retryable() {
        let mut files = files();
        let broken = "import { cn } from '../lib/missing';\nexport function Button() { return (<button />; }\n";
        files.insert("components/button.tsx".into(), broken.into());
        let change = modify("components/button.tsx", "", broken);
        let result = engine().verify(&task(&["components/button.tsx"]), &files, &[change]);
        assert!(!result.passed);
        assert!(result.retry_needed);
        assert!(!result.check(CHECK_IMPORT_VALIDITY).unwrap().passed);
        assert!(!result.check(CHECK_SYNTAX_SANITY).unwrap().passed);
        assert_eq!(result.recommended_action, RecommendedAction::RetryFix);
    }

    #[test]
    fn test_protected_violation_escalates() {
        let files = files();
        let change = modify(".env", "SECRET=0", "SECRET=1");
        let result = engine().verify(&task(&[".env"]), &files, &[change]);
        assert!(!result.check(CHECK_PROTECTED_PATHS).unwrap().passed);
        assert!(!result.retry_needed);
        assert_eq!(result.recommended_action, RecommendedAction::Escalate);
    }

    #[test]
    fn test_removed_export_breaks_downstream() {
        let mut files = files();
        let old = files["components/button.tsx"].clone();
        let new = "export function Btn() { return null; }\n";
        files.insert("components/button.tsx".into(), new.into());
        let result = engine().verify(
            &task(&["components/button.tsx"]),
            &files,
            &[modify("components/button.tsx", &old, new)],
        );
        let downstream = result.check(CHECK_DOWNSTREAM_IMPACT).unwrap();
        assert!(!downstream.passed);
        assert!(downstream.details.contains("app/page.tsx"));
    }

    #[test]
    fn test_deleted_file_still_imported_and_out_of_scope() {
        let mut files = files();
        let old = files.remove("lib/cn.ts").unwrap();
        let change = FileChange {
            path: "lib/cn.ts".into(),
            change_type: ChangeType::Delete,
            old_content: Some(old),
            new_content: None,
            timestamp: Utc::now(),
            dry_run: false,
        };
        let result = engine().verify(&task(&["components/button.tsx"]), &files, &[change]);
        assert!(!result.check(CHECK_DOWNSTREAM_IMPACT).unwrap().passed);
        assert!(!result.check(CHECK_SCOPE_INTEGRITY).unwrap().passed);
        assert!(result.check(CHECK_FILE_EXISTENCE).unwrap().passed);
    }

    #[test]
    fn test_strings_and_comments_do_not_unbalance() {
        assert_eq!(bracket_error("const s = '(('; // {\n/* ] */ const t = `${a}(`;"), None);
        assert!(bracket_error("function f() {").is_some());
    }
}
