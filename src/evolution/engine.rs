//! 引擎运行参数：由 [engine] 配置段构造，注入到控制器、执行器与校验器

use serde::{Deserialize, Serialize};

use crate::analysis::normalize_path;
use crate::config::{ApprovalSection, EngineSection, RetryStrategy};

/// 受保护路径前缀集合
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedPaths {
    prefixes: Vec<String>,
}

impl ProtectedPaths {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let prefixes = prefixes
            .into_iter()
            .map(|p| p.as_ref().trim_start_matches("./").to_string())
            .filter(|p| !p.is_empty())
            .collect();
        Self { prefixes }
    }

    /// 规范化后前缀匹配
    pub fn contains(&self, path: &str) -> bool {
        let path = normalize_path(path);
        self.prefixes.iter().any(|p| path.starts_with(p.as_str()))
    }

    /// 第一个受保护的路径
    pub fn first_violation<'a, I>(&self, paths: I) -> Option<&'a str>
    where
        I: IntoIterator<Item = &'a String>,
    {
        paths.into_iter().map(String::as_str).find(|p| self.contains(p))
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }
}

#[derive(Debug, Clone)]
pub struct EvolutionConfig {
    pub max_iterations: usize,
    pub max_files: usize,
    pub protected: ProtectedPaths,
    pub history_limit: usize,
    pub related_files_limit: usize,
    pub trace_depth: usize,
    pub retry_strategy: RetryStrategy,
    pub dry_run: bool,
    pub approval: ApprovalSection,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        EngineSection::default().into()
    }
}

impl From<EngineSection> for EvolutionConfig {
    fn from(section: EngineSection) -> Self {
        Self {
            max_iterations: section.max_iterations.max(1),
            max_files: section.max_files,
            protected: ProtectedPaths::new(&section.protected_paths),
            history_limit: section.history_limit.max(1),
            related_files_limit: section.related_files_limit,
            trace_depth: section.trace_depth,
            retry_strategy: section.retry_strategy,
            dry_run: section.dry_run,
            approval: section.approval,
        }
    }
}

impl EvolutionConfig {
    pub fn with_protected_paths<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.protected = ProtectedPaths::new(prefixes);
        self
    }

    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_retry_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.retry_strategy = strategy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protected_prefix_match() {
        let protected = ProtectedPaths::new(["lib/self-improvement/", ".env", "./config/"]);
        assert!(protected.contains("lib/self-improvement/engine.ts"));
        assert!(protected.contains("./.env.local"));
        assert!(protected.contains("config/app.json"));
        assert!(protected.contains("lib/x/../self-improvement/a.ts"));
        assert!(!protected.contains("lib/utils.ts"));
    }

    #[test]
    fn test_first_violation() {
        let protected = ProtectedPaths::new([".env"]);
        let paths = vec!["a.ts".to_string(), ".env".to_string()];
        assert_eq!(protected.first_violation(&paths), Some(".env"));
    }
}
