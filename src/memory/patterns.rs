//! 学习记忆：成功修复沉淀为模式，供后续根因推断参考
//!
//! 签名 = 类别 | 影响区域 | 截断的根因 | 至多 3 个检测文件。
//! 成功：`rate' = min(1, (rate·(n-1)+1)/n)`；失败：`rate' = max(0, rate·(n-1)/n)`，只作用于已有模式。
//! 超出容量时按 `0.4·rate + 0.3·min(1, uses/10) + 0.3·recency` 保留得分最高的部分。

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::MemorySection;
use crate::evolution::types::{ChangeType, IssueCategory, Task};
use crate::memory::store::BlobStore;
use crate::memory::tokenizer::{jaccard_similarity, tokenize_to_set};

/// 模式库在 BlobStore 中的固定 key
pub const PATTERNS_KEY: &str = "self_improvement_patterns";

const ROOT_CAUSE_CHARS: usize = 60;
const SIGNATURE_FILES: usize = 3;
const SIMILARITY_WEIGHT: f64 = 0.7;
const RATE_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixPattern {
    pub id: String,
    pub signature: String,
    pub category: IssueCategory,
    pub solution: String,
    pub files: Vec<String>,
    pub success_rate: f64,
    pub usage_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

impl FixPattern {
    pub fn new(
        signature: impl Into<String>,
        category: IssueCategory,
        solution: impl Into<String>,
        files: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            signature: signature.into(),
            category,
            solution: solution.into(),
            files,
            success_rate: 1.0,
            usage_count: 1,
            created_at: now,
            last_used: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarPattern {
    pub pattern: FixPattern,
    pub similarity: f64,
    /// 0.7·similarity + 0.3·success_rate
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryStats {
    pub total_patterns: usize,
    /// success_rate >= 0.5
    pub successful_patterns: usize,
    pub average_success_rate: f64,
    pub total_uses: u64,
}

#[derive(Debug, Clone)]
pub struct MemorySettings {
    pub max_patterns: usize,
    pub relevance_floor: f64,
    pub recency_window_days: i64,
}

impl Default for MemorySettings {
    fn default() -> Self {
        MemorySection::default().into()
    }
}

impl From<MemorySection> for MemorySettings {
    fn from(section: MemorySection) -> Self {
        Self {
            max_patterns: section.max_patterns.max(1),
            relevance_floor: section.relevance_floor,
            recency_window_days: section.recency_window_days.max(1),
        }
    }
}

pub struct LearningMemory {
    patterns: RwLock<Vec<FixPattern>>,
    store: Option<Arc<dyn BlobStore>>,
    settings: MemorySettings,
}

impl LearningMemory {
    pub fn new(settings: MemorySettings) -> Self {
        Self {
            patterns: RwLock::new(Vec::new()),
            store: None,
            settings,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// 从后端加载；不可用或数据损坏时静默得到空库
    pub fn load(&self) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };
        let loaded = match store.load(PATTERNS_KEY) {
            Ok(Some(data)) => match serde_json::from_str::<Vec<FixPattern>>(&data) {
                Ok(patterns) => patterns,
                Err(e) => {
                    tracing::warn!(error = %e, "pattern store is corrupt, starting empty");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "pattern store unavailable, starting empty");
                Vec::new()
            }
        };
        let mut patterns = self.write();
        *patterns = loaded;
        prune(&mut patterns, &self.settings);
        patterns.len()
    }

    /// 尽力保存；失败只记录 warn
    pub fn save(&self) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        let data = match serde_json::to_string(&*self.read()) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize patterns");
                return false;
            }
        };
        match store.save(PATTERNS_KEY, &data) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "failed to persist patterns");
                false
            }
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<FixPattern>> {
        self.patterns.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<FixPattern>> {
        self.patterns.write().unwrap_or_else(|e| e.into_inner())
    }

    /// 任务的问题签名
    pub fn signature(task: &Task) -> String {
        let root: String = task
            .orientation
            .root_cause
            .chars()
            .take(ROOT_CAUSE_CHARS)
            .collect();
        let files: Vec<&str> = task
            .observation
            .detected_files
            .iter()
            .take(SIGNATURE_FILES)
            .map(String::as_str)
            .collect();
        format!(
            "{}|{}|{}|{}",
            task.category,
            task.observation.affected_area,
            root.trim(),
            files.join(",")
        )
    }

    fn default_solution(task: &Task) -> String {
        let mut parts: Vec<String> = task
            .execution
            .changes
            .iter()
            .map(|c| {
                let verb = match c.change_type {
                    ChangeType::Create => "created",
                    ChangeType::Modify => "modified",
                    ChangeType::Delete => "deleted",
                };
                format!("{verb} {}", c.path)
            })
            .collect();
        parts.dedup();
        if parts.is_empty() {
            "no file changes".to_string()
        } else {
            parts.join(", ")
        }
    }

    /// 仅在任务完成且最后一次校验通过时记录；返回更新后的模式
    pub fn record_success(&self, task: &Task, solution: Option<&str>) -> Option<FixPattern> {
        if !task.succeeded() {
            return None;
        }
        let signature = Self::signature(task);
        let now = Utc::now();
        let recorded = {
            let mut patterns = self.write();
            let recorded = match patterns.iter_mut().find(|p| p.signature == signature) {
                Some(existing) => {
                    existing.usage_count += 1;
                    let n = existing.usage_count as f64;
                    existing.success_rate = ((existing.success_rate * (n - 1.0) + 1.0) / n).min(1.0);
                    existing.last_used = now;
                    if let Some(solution) = solution {
                        existing.solution = solution.to_string();
                    }
                    existing.clone()
                }
                None => {
                    let files = task
                        .observation
                        .detected_files
                        .iter()
                        .take(SIGNATURE_FILES)
                        .cloned()
                        .collect();
                    let solution = solution
                        .map(String::from)
                        .unwrap_or_else(|| Self::default_solution(task));
                    let pattern = FixPattern::new(signature, task.category, solution, files);
                    patterns.push(pattern.clone());
                    pattern
                }
            };
            prune(&mut patterns, &self.settings);
            recorded
        };
        tracing::info!(
            task_id = %task.id,
            pattern_id = %recorded.id,
            success_rate = recorded.success_rate,
            "fix pattern recorded"
        );
        self.save();
        Some(recorded)
    }

    /// 向下调整匹配模式的成功率；没有匹配时不创建
    pub fn record_failure(&self, task: &Task) -> Option<FixPattern> {
        let signature = Self::signature(task);
        let updated = {
            let mut patterns = self.write();
            let existing = patterns.iter_mut().find(|p| p.signature == signature)?;
            existing.usage_count += 1;
            let n = existing.usage_count as f64;
            existing.success_rate = (existing.success_rate * (n - 1.0) / n).max(0.0);
            existing.last_used = Utc::now();
            existing.clone()
        };
        tracing::info!(
            task_id = %task.id,
            pattern_id = %updated.id,
            success_rate = updated.success_rate,
            "fix pattern downgraded"
        );
        self.save();
        Some(updated)
    }

    /// Jaccard 相似度低于 relevance_floor 的被过滤；按综合分降序
    pub fn find_similar(&self, query: &str, max_results: usize) -> Vec<SimilarPattern> {
        let query_tokens = tokenize_to_set(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }
        let mut results: Vec<SimilarPattern> = self
            .read()
            .iter()
            .filter_map(|p| {
                let similarity = jaccard_similarity(&query_tokens, &tokenize_to_set(&p.signature));
                (similarity > 0.0 && similarity >= self.settings.relevance_floor).then(|| {
                    SimilarPattern {
                        pattern: p.clone(),
                        similarity,
                        score: SIMILARITY_WEIGHT * similarity + RATE_WEIGHT * p.success_rate,
                    }
                })
            })
            .collect();
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(max_results);
        tracing::debug!(query = %query, hits = results.len(), "find_similar");
        results
    }

    /// 直接插入模式（导入或测试），随后按容量修剪
    pub fn insert(&self, pattern: FixPattern) {
        let mut patterns = self.write();
        patterns.retain(|p| p.signature != pattern.signature);
        patterns.push(pattern);
        prune(&mut patterns, &self.settings);
    }

    pub fn patterns(&self) -> Vec<FixPattern> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn clear(&self) {
        self.write().clear();
        self.save();
    }

    pub fn stats(&self) -> MemoryStats {
        let patterns = self.read();
        let total = patterns.len();
        let average = if total == 0 {
            0.0
        } else {
            patterns.iter().map(|p| p.success_rate).sum::<f64>() / total as f64
        };
        MemoryStats {
            total_patterns: total,
            successful_patterns: patterns.iter().filter(|p| p.success_rate >= 0.5).count(),
            average_success_rate: average,
            total_uses: patterns.iter().map(|p| p.usage_count as u64).sum(),
        }
    }
}

fn eviction_score(pattern: &FixPattern, now: DateTime<Utc>, window_days: i64) -> f64 {
    let age_days = (now - pattern.last_used).num_seconds().max(0) as f64 / 86_400.0;
    let recency = (1.0 - age_days / window_days as f64).max(0.0);
    let frequency = (pattern.usage_count as f64 / 10.0).min(1.0);
    0.4 * pattern.success_rate + 0.3 * frequency + 0.3 * recency
}

fn prune(patterns: &mut Vec<FixPattern>, settings: &MemorySettings) {
    if patterns.len() <= settings.max_patterns {
        return;
    }
    let now = Utc::now();
    patterns.sort_by(|a, b| {
        eviction_score(b, now, settings.recency_window_days)
            .total_cmp(&eviction_score(a, now, settings.recency_window_days))
    });
    let evicted = patterns.len() - settings.max_patterns;
    patterns.truncate(settings.max_patterns);
    tracing::debug!(evicted, "pruned fix patterns");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::types::{FileChange, TaskStatus, TaskTrigger, VerificationResult, RecommendedAction};
    use crate::memory::store::MemoryBlobStore;

    fn completed_task() -> Task {
        let mut task = Task::new(TaskTrigger::UserReport, "button misaligned", IssueCategory::Style, vec![]);
        task.observation.affected_area = "button".into();
        task.observation.detected_files = vec!["components/button.tsx".into()];
        task.orientation.root_cause = "[style] Styling rules produce the wrong visual result".into();
        task.execution.changes.push(FileChange {
            path: "components/button.tsx".into(),
            change_type: ChangeType::Modify,
            old_content: Some("a".into()),
            new_content: Some("b".into()),
            timestamp: Utc::now(),
            dry_run: false,
        });
        task.execution.verifications.push(VerificationResult {
            passed: true,
            checks: vec![],
            score: 1.0,
            retry_needed: false,
            failure_reason: None,
            recommended_action: RecommendedAction::Complete,
        });
        task.status = TaskStatus::Completed;
        task
    }

    #[test]
    fn test_record_success_then_failure_nudges_rate() {
        let memory = LearningMemory::new(MemorySettings::default());
        let task = completed_task();
        let first = memory.record_success(&task, None).unwrap();
        assert_eq!(first.success_rate, 1.0);
        assert_eq!(first.solution, "modified components/button.tsx");

        let failed = memory.record_failure(&task).unwrap();
        assert_eq!(failed.usage_count, 2);
        assert!((failed.success_rate - 0.5).abs() < 1e-9);

        let again = memory.record_success(&task, None).unwrap();
        assert_eq!(again.usage_count, 3);
        assert!((again.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(memory.len(), 1);
    }

    #[test]
    fn test_record_success_ignores_unfinished_tasks() {
        let memory = LearningMemory::new(MemorySettings::default());
        let mut task = completed_task();
        task.status = TaskStatus::Failed;
        assert!(memory.record_success(&task, None).is_none());
        assert!(memory.record_failure(&task).is_none());
        assert!(memory.is_empty());
    }

    #[test]
    fn test_find_similar_ranks_by_overlap() {
        let memory = LearningMemory::new(MemorySettings::default());
        memory.insert(FixPattern::new("sidebar collapse toggle ui", IssueCategory::UiBug, "fix toggle", vec![]));
        memory.insert(FixPattern::new("api timeout network", IssueCategory::LogicError, "retry", vec![]));
        let hits = memory.find_similar("sidebar collapse", 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].pattern.signature, "sidebar collapse toggle ui");
        assert!((hits[0].similarity - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_prune_keeps_best_patterns() {
        let memory = LearningMemory::new(MemorySettings {
            max_patterns: 2,
            relevance_floor: 0.1,
            recency_window_days: 30,
        });
        let mut weak = FixPattern::new("weak", IssueCategory::Style, "s", vec![]);
        weak.success_rate = 0.1;
        weak.last_used = Utc::now() - chrono::Duration::days(60);
        memory.insert(weak);
        memory.insert(FixPattern::new("strong one", IssueCategory::Style, "s", vec![]));
        memory.insert(FixPattern::new("strong two", IssueCategory::Style, "s", vec![]));
        let signatures: Vec<String> = memory.patterns().into_iter().map(|p| p.signature).collect();
        assert_eq!(signatures.len(), 2);
        assert!(!signatures.contains(&"weak".to_string()));
    }

    #[test]
    fn test_load_and_save_are_best_effort() {
        let store = Arc::new(MemoryBlobStore::new());
        store.save(PATTERNS_KEY, "not json").unwrap();
        let memory = LearningMemory::new(MemorySettings::default()).with_store(store.clone());
        assert_eq!(memory.load(), 0);

        memory.record_success(&completed_task(), Some("align with flex")).unwrap();
        let restored = LearningMemory::new(MemorySettings::default()).with_store(store);
        assert_eq!(restored.load(), 1);
        let stats = restored.stats();
        assert_eq!(stats.total_patterns, 1);
        assert_eq!(stats.successful_patterns, 1);
        assert_eq!(restored.patterns()[0].solution, "align with flex");
    }
}
