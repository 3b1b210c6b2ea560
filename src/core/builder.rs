//! 引擎构建器：唯一的组合根
//!
//! 所有组件都在这里显式构造并注入，不存在全局单例；测试可以并行构建互不影响的实例。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::analysis::AnalysisEngine;
use crate::config::AppConfig;
use crate::evolution::{
    gate_from_config, ApprovalGate, EvolutionConfig, FixExecutor, FixProposer, ImprovementController,
    NoopProposer,
};
use crate::memory::{open_store, BlobStore, LearningMemory, MemoryBlobStore};
use crate::tools::{register_improvement_tools, ImproveToolkit, ToolExecutor, ToolRegistry};
use crate::workspace::{DirectorySnapshot, DiskFileIo, FileIo, FileMapSupplier};

/// 引擎构建器：默认使用磁盘 I/O、目录快照、配置指定的模式库与审批方式
pub struct EngineBuilder {
    config: AppConfig,
    project_root: PathBuf,
    io: Option<Arc<dyn FileIo>>,
    supplier: Option<Arc<dyn FileMapSupplier>>,
    proposer: Option<Arc<dyn FixProposer>>,
    gate: Option<Arc<dyn ApprovalGate>>,
    store: Option<Arc<dyn BlobStore>>,
}

impl EngineBuilder {
    pub fn new(config: AppConfig, project_root: impl AsRef<Path>) -> Self {
        Self {
            config,
            project_root: project_root.as_ref().to_path_buf(),
            io: None,
            supplier: None,
            proposer: None,
            gate: None,
            store: None,
        }
    }

    pub fn with_file_io(mut self, io: Arc<dyn FileIo>) -> Self {
        self.io = Some(io);
        self
    }

    pub fn with_supplier(mut self, supplier: Arc<dyn FileMapSupplier>) -> Self {
        self.supplier = Some(supplier);
        self
    }

    pub fn with_proposer(mut self, proposer: Arc<dyn FixProposer>) -> Self {
        self.proposer = Some(proposer);
        self
    }

    pub fn with_approval_gate(mut self, gate: Arc<dyn ApprovalGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.config.engine.dry_run = dry_run;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn build_file_io(&self) -> Arc<dyn FileIo> {
        self.io
            .clone()
            .unwrap_or_else(|| Arc::new(DiskFileIo::new(&self.project_root)))
    }

    pub fn build_supplier(&self) -> Arc<dyn FileMapSupplier> {
        self.supplier.clone().unwrap_or_else(|| {
            Arc::new(DirectorySnapshot::with_settings(
                &self.project_root,
                &self.config.snapshot,
            ))
        })
    }

    /// 模式库后端打不开时退回内存库
    pub fn build_memory(&self) -> Arc<LearningMemory> {
        let store = match &self.store {
            Some(store) => store.clone(),
            None => open_store(&self.config.memory).unwrap_or_else(|e| {
                tracing::warn!("Pattern store unavailable ({:#}), using in-memory store", e);
                Arc::new(MemoryBlobStore::new())
            }),
        };
        let memory = LearningMemory::new(self.config.memory.clone().into()).with_store(store);
        let loaded = memory.load();
        tracing::info!(loaded, "learning memory ready");
        Arc::new(memory)
    }

    pub fn build_tool_registry(&self, toolkit: Arc<ImproveToolkit>) -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        register_improvement_tools(&mut tools, toolkit);
        tools
    }

    /// 构建全部组件；控制器与工具集共享分析缓存和学习记忆
    pub fn build(&self) -> EngineComponents {
        let evolution = EvolutionConfig::from(self.config.engine.clone());
        let analysis = Arc::new(AnalysisEngine::new());
        let memory = self.build_memory();
        let io = self.build_file_io();
        let supplier = self.build_supplier();
        let proposer = self
            .proposer
            .clone()
            .unwrap_or_else(|| Arc::new(NoopProposer));
        let gate = self
            .gate
            .clone()
            .unwrap_or_else(|| gate_from_config(&self.config.engine.approval));

        let controller = ImprovementController::new(
            evolution.clone(),
            analysis.clone(),
            FixExecutor::new(io.clone()),
            memory.clone(),
            proposer,
            gate,
        );
        let toolkit = Arc::new(ImproveToolkit::new(
            evolution,
            analysis.clone(),
            memory.clone(),
            io,
            supplier.clone(),
        ));
        let tools = ToolExecutor::new(self.build_tool_registry(toolkit), self.config.tools.tool_timeout_secs);

        EngineComponents {
            controller: Arc::new(controller),
            tools,
            supplier,
            memory,
            analysis,
            config: self.config.clone(),
        }
    }
}

/// 预构建的引擎组件
pub struct EngineComponents {
    pub controller: Arc<ImprovementController>,
    pub tools: ToolExecutor,
    pub supplier: Arc<dyn FileMapSupplier>,
    pub memory: Arc<LearningMemory>,
    pub analysis: Arc<AnalysisEngine>,
    pub config: AppConfig,
}

/// 便捷函数：加载配置（失败时用默认值），项目根取参数、配置、当前目录中第一个可用的
pub fn create_engine_builder(config_path: Option<PathBuf>, project_root: Option<PathBuf>) -> EngineBuilder {
    let config = crate::config::load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    let root = project_root
        .or_else(|| config.app.project_root.clone())
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    EngineBuilder::new(config, root)
}
