//! 静态分析引擎：路径 → 内容映射上的纯函数，不做任何 I/O
//!
//! - **lexer / signature**: 最小词法扫描与 import/export 提取
//! - **resolve**: import 路径解析
//! - **classify**: 文件分类与复杂度
//! - **engine**: 带缓存的组件分析、依赖追踪、项目地图
//! - **related**: 按问题描述为文件打分排序

pub mod classify;
pub mod engine;
pub mod lexer;
pub mod related;
pub mod resolve;
pub mod signature;

use std::collections::BTreeMap;

/// 项目快照：相对路径 → 文件内容
pub type FileMap = BTreeMap<String, String>;

pub use classify::{Complexity, ComponentKind};
pub use engine::{
    AnalysisEngine, ComponentAnalysis, DependencyNode, DependencyTrace, ProjectMap, ProjectNode,
};
pub use related::{detect_areas, find_related_files, RelatedFile};
pub use resolve::{is_local_source, normalize_path, resolve_import};
pub use signature::{parse_module_signature, ExportKind, ExportRef, ImportKind, ImportRef, ModuleSignature};
