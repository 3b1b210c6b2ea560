//! 分析引擎：组件分析（按路径缓存）、依赖追踪、项目地图
//!
//! 缓存只按路径索引，内容变化后必须显式 `invalidate`，否则导出一致性检查会看到旧数据。

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::analysis::classify::{
    self, component_name, complexity_level, complexity_score, Complexity, ComponentKind,
};
use crate::analysis::lexer::tokenize;
use crate::analysis::resolve::{base_path, is_local_source, resolve_import};
use crate::analysis::signature::{parse_module_signature, ExportRef, ImportRef};
use crate::analysis::FileMap;

/// 单文件分析结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentAnalysis {
    pub path: String,
    pub name: String,
    pub kind: ComponentKind,
    pub imports: Vec<ImportRef>,
    pub exports: Vec<ExportRef>,
    /// 本地依赖（项目根相对路径；`fill_dependents` 后替换为映射中的实际文件）
    pub dependencies: Vec<String>,
    /// 反向依赖，由 `fill_dependents` 延迟填充
    pub dependents: Vec<String>,
    pub complexity: Complexity,
    pub complexity_score: usize,
    pub line_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyNode {
    pub path: String,
    pub children: Vec<DependencyNode>,
}

/// 依赖追踪结果（临时对象，每次请求重新计算）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyTrace {
    pub path: String,
    pub upstream: Vec<String>,
    pub downstream: Vec<String>,
    /// (path, other)：既被 path 导入又导入 path
    pub circular: Vec<(String, String)>,
    pub tree: DependencyNode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectNode {
    pub kind: Option<ComponentKind>,
    pub imports: Vec<String>,
    pub imported_by: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMap {
    pub total_files: usize,
    /// 扩展名 → 文件数
    pub extensions: BTreeMap<String, usize>,
    pub nodes: BTreeMap<String, ProjectNode>,
    pub entry_points: Vec<String>,
    pub config_files: Vec<String>,
    pub component_files: Vec<String>,
}

const ENTRY_STEMS: &[&str] = &["main", "index", "app", "_app"];

/// 分析引擎：纯计算 + 按路径缓存
#[derive(Debug, Default)]
pub struct AnalysisEngine {
    cache: RwLock<HashMap<String, ComponentAnalysis>>,
}

impl AnalysisEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// 分析单个文件；同一路径命中缓存时直接返回缓存结果
    pub fn analyze_component(&self, path: &str, content: &str) -> ComponentAnalysis {
        if let Some(hit) = self.cached(path) {
            return hit;
        }

        let signature = parse_module_signature(content);
        let tokens = tokenize(content);
        let line_count = content.lines().count();
        let score = complexity_score(&tokens, line_count);

        let mut dependencies: Vec<String> = signature
            .imports
            .iter()
            .filter(|i| is_local_source(&i.source))
            .filter_map(|i| base_path(path, &i.source))
            .collect();
        dependencies.dedup();

        let analysis = ComponentAnalysis {
            path: path.to_string(),
            name: component_name(path),
            kind: classify::classify(path, content, &signature),
            imports: signature.imports,
            exports: signature.exports,
            dependencies,
            dependents: Vec::new(),
            complexity: complexity_level(score),
            complexity_score: score,
            line_count,
        };

        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_string(), analysis.clone());
        analysis
    }

    pub fn cached(&self, path: &str) -> Option<ComponentAnalysis> {
        self.cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
    }

    pub fn invalidate(&self, path: &str) -> bool {
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(path)
            .is_some()
    }

    pub fn invalidate_many<'a>(&self, paths: impl IntoIterator<Item = &'a str>) {
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        for path in paths {
            cache.remove(path);
        }
    }

    pub fn clear_cache(&self) {
        self.cache.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn cache_len(&self) -> usize {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// 文件在映射中的已解析本地 import
    pub fn resolved_imports(&self, path: &str, files: &FileMap) -> Vec<String> {
        let content = match files.get(path) {
            Some(c) => c,
            None => return Vec::new(),
        };
        let analysis = self.analyze_component(path, content);
        let mut out: Vec<String> = Vec::new();
        for import in &analysis.imports {
            if let Some(resolved) = resolve_import(path, &import.source, files) {
                if resolved != path && !out.contains(&resolved) {
                    out.push(resolved);
                }
            }
        }
        out
    }

    /// 填充缓存条目的 dependents，并把 dependencies 替换为映射中的实际文件
    pub fn fill_dependents(&self, path: &str, files: &FileMap) -> Option<ComponentAnalysis> {
        let content = files.get(path)?;
        let mut analysis = self.analyze_component(path, content);
        analysis.dependencies = self.resolved_imports(path, files);
        analysis.dependents = self.downstream_of(path, files);
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_string(), analysis.clone());
        Some(analysis)
    }

    fn downstream_of(&self, path: &str, files: &FileMap) -> Vec<String> {
        files
            .keys()
            .filter(|other| other.as_str() != path)
            .filter(|other| self.resolved_imports(other, files).iter().any(|p| p == path))
            .cloned()
            .collect()
    }

    /// 追踪依赖：upstream = path 的本地 import；downstream = 全量扫描导入 path 的文件；
    /// circular = 二者交集；tree 沿 upstream 展开到 max_depth
    pub fn trace_dependencies(&self, path: &str, files: &FileMap, max_depth: usize) -> DependencyTrace {
        let upstream = self.resolved_imports(path, files);
        let downstream = self.downstream_of(path, files);
        let circular = upstream
            .iter()
            .filter(|p| downstream.contains(p))
            .map(|p| (path.to_string(), p.clone()))
            .collect();

        let mut visited = HashSet::new();
        let tree = self.build_tree(path, files, max_depth, &mut visited);

        DependencyTrace {
            path: path.to_string(),
            upstream,
            downstream,
            circular,
            tree,
        }
    }

    fn build_tree(
        &self,
        path: &str,
        files: &FileMap,
        depth_left: usize,
        visited: &mut HashSet<String>,
    ) -> DependencyNode {
        visited.insert(path.to_string());
        let mut children = Vec::new();
        if depth_left > 0 {
            for dep in self.resolved_imports(path, files) {
                if visited.contains(&dep) {
                    continue;
                }
                children.push(self.build_tree(&dep, files, depth_left - 1, visited));
            }
        }
        DependencyNode {
            path: path.to_string(),
            children,
        }
    }

    /// 项目地图：第一遍统计扩展名并建立依赖节点，第二遍回填 imported_by
    pub fn build_project_map(&self, files: &FileMap) -> ProjectMap {
        let mut map = ProjectMap {
            total_files: files.len(),
            ..ProjectMap::default()
        };

        for (path, content) in files {
            let ext = classify::extension(path);
            let key = if ext.is_empty() { "(none)".to_string() } else { ext };
            *map.extensions.entry(key).or_insert(0) += 1;

            let analysis = self.analyze_component(path, content);
            let imports = self.resolved_imports(path, files);
            match analysis.kind {
                ComponentKind::Config => map.config_files.push(path.clone()),
                ComponentKind::UiComponent => map.component_files.push(path.clone()),
                _ => {}
            }
            if is_entry_point(path) {
                map.entry_points.push(path.clone());
            }
            map.nodes.insert(
                path.clone(),
                ProjectNode {
                    kind: Some(analysis.kind),
                    imports,
                    imported_by: Vec::new(),
                },
            );
        }

        let mut reverse: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (path, node) in &map.nodes {
            for dep in &node.imports {
                reverse.entry(dep.clone()).or_default().insert(path.clone());
            }
        }
        for (dep, importers) in reverse {
            if let Some(node) = map.nodes.get_mut(&dep) {
                node.imported_by = importers.into_iter().collect();
            }
        }

        map
    }
}

fn is_entry_point(path: &str) -> bool {
    let lower = path.to_lowercase();
    if (lower.starts_with("app/") || lower.starts_with("src/app/"))
        && (lower.ends_with("/page.tsx") || lower.ends_with("/layout.tsx"))
    {
        return true;
    }
    let file = lower.rsplit('/').next().unwrap_or("");
    let stem = file.split('.').next().unwrap_or("");
    classify::is_source_file(&lower) && lower.split('/').count() <= 2 && ENTRY_STEMS.contains(&stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> FileMap {
        let mut files = FileMap::new();
        files.insert(
            "src/main.tsx".into(),
            "import { App } from './App';\nimport './index.css';".into(),
        );
        files.insert(
            "src/App.tsx".into(),
            "import React from 'react';\nimport { Sidebar } from '@/src/components/Sidebar';\nexport const App = () => <Sidebar />;".into(),
        );
        files.insert(
            "src/components/Sidebar.tsx".into(),
            "import { useStore } from '../store/editor';\nexport const Sidebar = () => <div />;".into(),
        );
        files.insert(
            "src/store/editor.ts".into(),
            "import { Sidebar } from '../components/Sidebar';\nexport const useStore = () => null;".into(),
        );
        files.insert("src/index.css".into(), "body { margin: 0; }".into());
        files.insert("tsconfig.json".into(), "{}".into());
        files
    }

    #[test]
    fn test_analyze_component_is_cached_by_path() {
        let engine = AnalysisEngine::new();
        let first = engine.analyze_component("src/a.ts", "export const a = 1;");
        let again = engine.analyze_component("src/a.ts", "export const a = 1;");
        assert_eq!(first, again);

        // 未失效时内容变化不可见
        let stale = engine.analyze_component("src/a.ts", "export const b = 2;");
        assert_eq!(stale.exports[0].name, "a");
        assert!(engine.invalidate("src/a.ts"));
        let fresh = engine.analyze_component("src/a.ts", "export const b = 2;");
        assert_eq!(fresh.exports[0].name, "b");
    }

    #[test]
    fn test_trace_dependencies_finds_cycle() {
        let engine = AnalysisEngine::new();
        let files = project();
        let trace = engine.trace_dependencies("src/components/Sidebar.tsx", &files, 3);
        assert_eq!(trace.upstream, vec!["src/store/editor.ts"]);
        assert_eq!(trace.downstream, vec!["src/App.tsx", "src/store/editor.ts"]);
        assert_eq!(
            trace.circular,
            vec![("src/components/Sidebar.tsx".to_string(), "src/store/editor.ts".to_string())]
        );
        assert_eq!(trace.tree.children.len(), 1);
        assert!(trace.tree.children[0].children.is_empty());
    }

    #[test]
    fn test_build_project_map() {
        let engine = AnalysisEngine::new();
        let map = engine.build_project_map(&project());
        assert_eq!(map.total_files, 6);
        assert_eq!(map.extensions.get("tsx"), Some(&3));
        assert!(map.entry_points.contains(&"src/main.tsx".to_string()));
        assert_eq!(map.config_files, vec!["tsconfig.json"]);
        assert!(map.component_files.contains(&"src/components/Sidebar.tsx".to_string()));
        let sidebar = &map.nodes["src/components/Sidebar.tsx"];
        assert_eq!(sidebar.imported_by, vec!["src/App.tsx", "src/store/editor.ts"]);
    }

    #[test]
    fn test_fill_dependents() {
        let engine = AnalysisEngine::new();
        let files = project();
        let filled = engine.fill_dependents("src/App.tsx", &files).unwrap();
        assert_eq!(filled.dependencies, vec!["src/components/Sidebar.tsx"]);
        assert_eq!(filled.dependents, vec!["src/main.tsx"]);
        assert_eq!(engine.cached("src/App.tsx").unwrap().dependents, vec!["src/main.tsx"]);
    }
}
