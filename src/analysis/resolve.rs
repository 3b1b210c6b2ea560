//! import 路径解析
//!
//! 别名前缀（`@/`、`~/`）映射到项目根；相对路径按段 pop/push；
//! 候选依次尝试：原路径 → 扩展名列表 → index 文件，第一个存在于文件映射中的即为结果。
//! 解析不到不是错误，返回 None。

use crate::analysis::FileMap;

pub const ALIAS_PREFIXES: &[&str] = &["@/", "~/"];

pub const RESOLVE_EXTENSIONS: &[&str] = &[".ts", ".tsx", ".js", ".jsx", ".mjs", ".json"];

pub const INDEX_FILES: &[&str] = &["/index.ts", "/index.tsx", "/index.js", "/index.jsx"];

/// 去掉 `./` 前缀与重复分隔符，统一为项目相对路径
pub fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let mut out: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            s => out.push(s),
        }
    }
    out.join("/")
}

/// 是否是项目内（本地）的 import：相对路径、别名或根路径
pub fn is_local_source(source: &str) -> bool {
    source == "."
        || source == ".."
        || source.starts_with("./")
        || source.starts_with("../")
        || source.starts_with('/')
        || ALIAS_PREFIXES.iter().any(|p| source.starts_with(p))
}

/// 计算 import 指向的基础路径（不含扩展名推断）；越过项目根时返回 None
pub fn base_path(importer: &str, source: &str) -> Option<String> {
    if let Some(rest) = ALIAS_PREFIXES.iter().find_map(|p| source.strip_prefix(p)) {
        return Some(normalize_path(rest));
    }
    if let Some(rest) = source.strip_prefix('/') {
        return Some(normalize_path(rest));
    }
    if !is_local_source(source) {
        return None;
    }

    let mut segments: Vec<&str> = importer.split('/').filter(|s| !s.is_empty()).collect();
    segments.pop();
    for seg in source.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            s => segments.push(s),
        }
    }
    Some(segments.join("/"))
}

/// 解析 import 到文件映射中的实际路径
pub fn resolve_import(importer: &str, source: &str, files: &FileMap) -> Option<String> {
    let base = base_path(importer, source)?;
    candidates(&base).into_iter().find(|c| files.contains_key(c))
}

fn candidates(base: &str) -> Vec<String> {
    let mut out = Vec::with_capacity(1 + RESOLVE_EXTENSIONS.len() + INDEX_FILES.len());
    if !base.is_empty() {
        out.push(base.to_string());
        for ext in RESOLVE_EXTENSIONS {
            out.push(format!("{base}{ext}"));
        }
    }
    for index in INDEX_FILES {
        if base.is_empty() {
            out.push(index.trim_start_matches('/').to_string());
        } else {
            out.push(format!("{base}{index}"));
        }
    }
    out
}
