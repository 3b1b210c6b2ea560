//! 目录快照：遍历项目根，生成完整的 路径 → 内容 映射

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use walkdir::WalkDir;

use crate::analysis::FileMap;
use crate::config::SnapshotSection;
use crate::core::{EngineError, Result};
use crate::workspace::FileMapSupplier;

pub const DEFAULT_IGNORE: &[&str] = &[
    "**/node_modules",
    "**/.git",
    "**/dist",
    "**/build",
    "**/target",
    "**/.next",
    "**/coverage",
];

#[derive(Debug, Clone)]
pub struct DirectorySnapshot {
    root: PathBuf,
    ignore: Vec<glob::Pattern>,
    max_file_bytes: u64,
}

impl DirectorySnapshot {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self::with_settings(root, &SnapshotSection::default())
    }

    /// 非法的 ignore glob 记录 warn 后跳过
    pub fn with_settings(root: impl AsRef<Path>, settings: &SnapshotSection) -> Self {
        let ignore = settings
            .ignore
            .iter()
            .filter_map(|p| match glob::Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    tracing::warn!(pattern = %p, error = %e, "invalid ignore pattern");
                    None
                }
            })
            .collect();
        Self {
            root: root.as_ref().to_path_buf(),
            ignore,
            max_file_bytes: settings.max_file_kb.saturating_mul(1024),
        }
    }

    fn relative(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let rel = rel.to_string_lossy().replace('\\', "/");
        (!rel.is_empty()).then_some(rel)
    }

    fn is_ignored(&self, rel: &str) -> bool {
        self.ignore.iter().any(|p| p.matches(rel))
    }

    /// 同步遍历；超过大小上限或非 UTF-8 的文件被跳过
    pub fn collect(&self) -> Result<FileMap> {
        if !self.root.is_dir() {
            return Err(EngineError::FileNotFound(self.root.display().to_string()));
        }
        let mut files = FileMap::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| match self.relative(e.path()) {
                Some(rel) => !self.is_ignored(&rel),
                None => true,
            });

        for entry in walker {
            let entry = entry.map_err(|e| EngineError::Io(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(rel) = self.relative(entry.path()) else {
                continue;
            };
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            if size > self.max_file_bytes {
                tracing::debug!(path = %rel, size, "skipping oversized file");
                continue;
            }
            match std::fs::read_to_string(entry.path()) {
                Ok(content) => {
                    files.insert(rel, content);
                }
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    tracing::debug!(path = %rel, "skipping non-UTF-8 file");
                }
                Err(e) => return Err(EngineError::Io(format!("{rel}: {e}"))),
            }
        }
        tracing::info!(root = %self.root.display(), files = files.len(), "snapshot collected");
        Ok(files)
    }
}

#[async_trait]
impl FileMapSupplier for DirectorySnapshot {
    async fn snapshot(&self) -> Result<FileMap> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.collect())
            .await
            .map_err(|e| EngineError::Io(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_snapshot_skips_ignored_and_binary() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::create_dir_all(root.join("node_modules/react")).unwrap();
        std::fs::write(root.join("src/app.tsx"), "export const App = 1;").unwrap();
        std::fs::write(root.join("node_modules/react/index.js"), "x").unwrap();
        std::fs::write(root.join("logo.png"), [0xff_u8, 0xfe, 0x00, 0x81]).unwrap();

        let files = DirectorySnapshot::new(root).snapshot().await.unwrap();
        assert_eq!(files.keys().collect::<Vec<_>>(), vec!["src/app.tsx"]);
    }

    #[test]
    fn test_size_cap() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.ts"), "a".repeat(4096)).unwrap();
        std::fs::write(dir.path().join("small.ts"), "a").unwrap();
        let settings = SnapshotSection {
            ignore: Vec::new(),
            max_file_kb: 1,
        };
        let files = DirectorySnapshot::with_settings(dir.path(), &settings)
            .collect()
            .unwrap();
        assert!(files.contains_key("small.ts"));
        assert!(!files.contains_key("big.ts"));
    }

    #[test]
    fn test_missing_root() {
        let snapshot = DirectorySnapshot::new("/definitely/not/here");
        assert!(snapshot.collect().is_err());
    }
}
