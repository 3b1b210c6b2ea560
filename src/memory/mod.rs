//! 学习记忆：修复模式库、分词与持久化后端

pub mod patterns;
pub mod store;
pub mod tokenizer;

pub use patterns::{FixPattern, LearningMemory, MemorySettings, MemoryStats, SimilarPattern, PATTERNS_KEY};
pub use store::{open_store, BlobStore, JsonFileStore, MemoryBlobStore, SqliteBlobStore};
