//! 文件 I/O 边界：核心逻辑与具体存储之间唯一的接缝

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::analysis::FileMap;
use crate::core::{EngineError, Result};

/// 文件 I/O 边界
///
/// - `read` 文件不存在时返回 `FileNotFound`
/// - `edit` 找不到 `old` 时返回 false，从不报错
/// - `write` / `delete` 失败时返回错误，由调用方按步骤记录
#[async_trait]
pub trait FileIo: Send + Sync {
    async fn read(&self, path: &str) -> Result<String>;

    async fn edit(&self, path: &str, old: &str, new: &str, message: &str) -> bool;

    async fn write(&self, path: &str, content: &str, message: &str) -> Result<()>;

    async fn delete(&self, path: &str, message: &str) -> Result<()>;
}

/// 文件映射提供者：返回完整快照（绝不返回部分结果）
#[async_trait]
pub trait FileMapSupplier: Send + Sync {
    async fn snapshot(&self) -> Result<FileMap>;
}

/// 一次写操作的记录（类似提交信息）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoRecord {
    pub op: &'static str,
    pub path: String,
    pub message: String,
}

/// 内存文件系统：测试与 dry-run 使用，同时可作为快照来源
#[derive(Debug, Default)]
pub struct MemoryFileIo {
    files: RwLock<FileMap>,
    log: Mutex<Vec<IoRecord>>,
}

impl MemoryFileIo {
    pub fn new(files: FileMap) -> Self {
        Self {
            files: RwLock::new(files),
            log: Mutex::new(Vec::new()),
        }
    }

    pub async fn get(&self, path: &str) -> Option<String> {
        self.files.read().await.get(path).cloned()
    }

    pub async fn files(&self) -> FileMap {
        self.files.read().await.clone()
    }

    /// 所有成功的写操作，按发生顺序
    pub fn records(&self) -> Vec<IoRecord> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, op: &'static str, path: &str, message: &str) {
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(IoRecord {
                op,
                path: path.to_string(),
                message: message.to_string(),
            });
    }
}

#[async_trait]
impl FileIo for MemoryFileIo {
    async fn read(&self, path: &str) -> Result<String> {
        self.get(path)
            .await
            .ok_or_else(|| EngineError::FileNotFound(path.to_string()))
    }

    async fn edit(&self, path: &str, old: &str, new: &str, message: &str) -> bool {
        let mut files = self.files.write().await;
        let Some(content) = files.get_mut(path) else {
            return false;
        };
        if old.is_empty() || !content.contains(old) {
            return false;
        }
        *content = content.replacen(old, new, 1);
        drop(files);
        self.record("edit", path, message);
        true
    }

    async fn write(&self, path: &str, content: &str, message: &str) -> Result<()> {
        self.files
            .write()
            .await
            .insert(path.to_string(), content.to_string());
        self.record("write", path, message);
        Ok(())
    }

    async fn delete(&self, path: &str, message: &str) -> Result<()> {
        if self.files.write().await.remove(path).is_none() {
            return Err(EngineError::FileNotFound(path.to_string()));
        }
        self.record("delete", path, message);
        Ok(())
    }
}

#[async_trait]
impl FileMapSupplier for MemoryFileIo {
    async fn snapshot(&self) -> Result<FileMap> {
        Ok(self.files().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn io() -> MemoryFileIo {
        let mut files = FileMap::new();
        files.insert("a.ts".into(), "const a = 1; const a2 = 1;".into());
        MemoryFileIo::new(files)
    }

    #[tokio::test]
    async fn test_edit_replaces_first_occurrence_only() {
        let io = io();
        assert!(io.edit("a.ts", "= 1", "= 2", "bump").await);
        assert_eq!(io.get("a.ts").await.unwrap(), "const a = 2; const a2 = 1;");
        assert!(!io.edit("a.ts", "missing", "x", "noop").await);
        assert!(!io.edit("b.ts", "a", "b", "noop").await);
        assert_eq!(io.records().len(), 1);
    }

    #[tokio::test]
    async fn test_read_missing_and_delete() {
        let io = io();
        assert!(matches!(io.read("b.ts").await, Err(EngineError::FileNotFound(_))));
        io.delete("a.ts", "remove").await.unwrap();
        assert!(io.delete("a.ts", "again").await.is_err());
        assert!(io.snapshot().await.unwrap().is_empty());
    }
}
