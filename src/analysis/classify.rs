//! 文件分类与复杂度评估
//!
//! 分类优先级：测试路径 > 样式扩展名 > 类型定义 > 配置 > store > hook > service > UI 框架信号 > utility。

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::analysis::lexer::{Token, TokenKind};
use crate::analysis::signature::ModuleSignature;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    UiComponent,
    Hook,
    Utility,
    Store,
    Service,
    TypeDefinition,
    Config,
    Style,
    Test,
    Unknown,
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ComponentKind::UiComponent => "ui_component",
            ComponentKind::Hook => "hook",
            ComponentKind::Utility => "utility",
            ComponentKind::Store => "store",
            ComponentKind::Service => "service",
            ComponentKind::TypeDefinition => "type_definition",
            ComponentKind::Config => "config",
            ComponentKind::Style => "style",
            ComponentKind::Test => "test",
            ComponentKind::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

pub const SOURCE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs"];
pub const STYLE_EXTENSIONS: &[&str] = &["css", "scss", "sass", "less", "styl"];
const CONFIG_EXTENSIONS: &[&str] = &["json", "yaml", "yml", "toml"];
const UI_FRAMEWORKS: &[&str] = &["react", "react-dom", "preact", "vue", "svelte", "solid-js"];
const ITERATION_METHODS: &[&str] = &[
    "map", "forEach", "filter", "reduce", "some", "every", "flatMap", "find", "findIndex",
];

/// 扩展名（小写，不含点）
pub fn extension(path: &str) -> String {
    let file = path.rsplit('/').next().unwrap_or(path);
    match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_lowercase(),
        _ => String::new(),
    }
}

pub fn is_source_file(path: &str) -> bool {
    SOURCE_EXTENSIONS.contains(&extension(path).as_str())
}

/// 从路径推导组件名：取文件名去掉所有扩展；index 文件取父目录名
pub fn component_name(path: &str) -> String {
    let mut parts = path.rsplit('/');
    let file = parts.next().unwrap_or(path);
    let stem = file.split('.').next().unwrap_or(file);
    if stem == "index" {
        if let Some(parent) = parts.next() {
            return parent.to_string();
        }
    }
    stem.to_string()
}

fn hook_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^use[A-Z0-9]").expect("valid regex"))
}

fn jsx_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<(?:[A-Z][A-Za-z0-9.]*|div|span|button|section|main|header|footer|nav|ul|li|p|a|img|input|form|label)[\s/>]")
            .expect("valid regex")
    })
}

pub fn classify(path: &str, content: &str, signature: &ModuleSignature) -> ComponentKind {
    if path.trim().is_empty() {
        return ComponentKind::Unknown;
    }
    let lower = path.to_lowercase();
    let ext = extension(path);
    let name = component_name(path);

    if lower.contains(".test.")
        || lower.contains(".spec.")
        || lower.contains("__tests__/")
        || lower.starts_with("tests/")
        || lower.contains("/tests/")
    {
        return ComponentKind::Test;
    }
    if STYLE_EXTENSIONS.contains(&ext.as_str()) {
        return ComponentKind::Style;
    }
    if lower.ends_with(".d.ts")
        || lower.contains("/types/")
        || lower.starts_with("types/")
        || name == "types"
    {
        return ComponentKind::TypeDefinition;
    }
    if CONFIG_EXTENSIONS.contains(&ext.as_str())
        || lower.starts_with("config/")
        || lower.contains("/config/")
        || lower.rsplit('/').next().unwrap_or("").contains("config")
    {
        return ComponentKind::Config;
    }
    if !SOURCE_EXTENSIONS.contains(&ext.as_str()) {
        return ComponentKind::Utility;
    }
    if lower.contains("/store/")
        || lower.contains("/stores/")
        || lower.starts_with("store/")
        || name.to_lowercase().ends_with("store")
        || content.contains("createStore(")
        || content.contains("configureStore(")
        || signature.imports.iter().any(|i| i.source == "zustand" || i.source == "jotai")
    {
        return ComponentKind::Store;
    }
    if hook_name_re().is_match(&name) || lower.contains("/hooks/") {
        return ComponentKind::Hook;
    }
    if lower.contains("service") || lower.contains("/api/") || lower.starts_with("api/") {
        return ComponentKind::Service;
    }
    let framework_import = signature
        .imports
        .iter()
        .any(|i| UI_FRAMEWORKS.contains(&i.source.as_str()));
    if framework_import || jsx_re().is_match(content) {
        return ComponentKind::UiComponent;
    }
    ComponentKind::Utility
}

/// 复杂度分数 = 2·条件 + 3·循环/迭代 + 1·闭包 + (行数 > 200 时 +10)
pub fn complexity_score(tokens: &[Token], line_count: usize) -> usize {
    let mut conditionals = 0;
    let mut loops = 0;
    let mut closures = 0;

    for (i, tok) in tokens.iter().enumerate() {
        let prev = i.checked_sub(1).and_then(|p| tokens.get(p));
        let next = tokens.get(i + 1);
        match &tok.kind {
            TokenKind::Ident(word) => {
                let member = prev.map(|p| p.is_punct('.')).unwrap_or(false);
                match word.as_str() {
                    "if" | "case" if !member => conditionals += 1,
                    "for" | "while" if !member => loops += 1,
                    "function" if !member => closures += 1,
                    w if member
                        && ITERATION_METHODS.contains(&w)
                        && next.map(|n| n.is_punct('(')).unwrap_or(false) =>
                    {
                        loops += 1
                    }
                    _ => {}
                }
            }
            TokenKind::Arrow => closures += 1,
            TokenKind::Punct('?') => {
                // 排除 ?. / ?? / 可选属性 `a?: T` / 可选参数 `a?)`
                let optional = next
                    .map(|n| n.is_punct('.') || n.is_punct('?') || n.is_punct(':') || n.is_punct(')') || n.is_punct(','))
                    .unwrap_or(true);
                let nullish = prev.map(|p| p.is_punct('?')).unwrap_or(false);
                if !optional && !nullish {
                    conditionals += 1;
                }
            }
            _ => {}
        }
    }

    let size_penalty = if line_count > 200 { 10 } else { 0 };
    2 * conditionals + 3 * loops + closures + size_penalty
}

pub fn complexity_level(score: usize) -> Complexity {
    if score > 30 {
        Complexity::High
    } else if score > 12 {
        Complexity::Medium
    } else {
        Complexity::Low
    }
}
