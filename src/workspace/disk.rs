//! 磁盘文件 I/O
//!
//! 所有路径必须落在 root 下（禁止 ../ 逃逸与符号链接逃逸）；
//! 写入先落到同目录临时文件再 rename，存储层不会出现写了一半的文件。

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::core::{EngineError, Result};
use crate::workspace::FileIo;

#[derive(Debug, Clone)]
pub struct DiskFileIo {
    root: PathBuf,
}

impl DiskFileIo {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let root = root.canonicalize().unwrap_or(root);
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 校验并解析相对路径；`..` 越过根目录或已存在路径经符号链接逃逸时报错
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let normalized = path.replace('\\', "/");
        let mut segments: Vec<&str> = Vec::new();
        for seg in normalized.split('/') {
            match seg {
                "" | "." => {}
                ".." => {
                    segments
                        .pop()
                        .ok_or_else(|| EngineError::PathEscape(path.to_string()))?;
                }
                s => segments.push(s),
            }
        }
        if segments.is_empty() || Path::new(path).is_absolute() {
            return Err(EngineError::PathEscape(path.to_string()));
        }

        let full = self.root.join(segments.join("/"));
        if let Ok(canonical) = full.canonicalize() {
            if !canonical.starts_with(&self.root) {
                return Err(EngineError::PathEscape(path.to_string()));
            }
        }
        Ok(full)
    }

    async fn write_atomic(&self, target: &Path, content: &str) -> Result<()> {
        let parent = target
            .parent()
            .ok_or_else(|| EngineError::Io(format!("no parent dir: {}", target.display())))?;
        tokio::fs::create_dir_all(parent).await?;

        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let tmp = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));
        if let Err(e) = tokio::fs::write(&tmp, content).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&tmp, target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl FileIo for DiskFileIo {
    async fn read(&self, path: &str) -> Result<String> {
        let full = self.resolve(path)?;
        tokio::fs::read_to_string(&full).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => EngineError::FileNotFound(path.to_string()),
            _ => EngineError::Io(format!("{path}: {e}")),
        })
    }

    async fn edit(&self, path: &str, old: &str, new: &str, message: &str) -> bool {
        let full = match self.resolve(path) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "edit rejected");
                return false;
            }
        };
        let content = match tokio::fs::read_to_string(&full).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "edit read failed");
                return false;
            }
        };
        if old.is_empty() || !content.contains(old) {
            return false;
        }
        let updated = content.replacen(old, new, 1);
        match self.write_atomic(&full, &updated).await {
            Ok(()) => {
                tracing::info!(path = %path, message = %message, "file edited");
                true
            }
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "edit write failed");
                false
            }
        }
    }

    async fn write(&self, path: &str, content: &str, message: &str) -> Result<()> {
        let full = self.resolve(path)?;
        self.write_atomic(&full, content).await?;
        tracing::info!(path = %path, message = %message, "file written");
        Ok(())
    }

    async fn delete(&self, path: &str, message: &str) -> Result<()> {
        let full = self.resolve(path)?;
        tokio::fs::remove_file(&full).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => EngineError::FileNotFound(path.to_string()),
            _ => EngineError::Io(format!("{path}: {e}")),
        })?;
        tracing::info!(path = %path, message = %message, "file deleted");
        Ok(())
    }
}
