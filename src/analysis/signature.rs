//! 模块签名解析：`parse_module_signature(text) -> ModuleSignature`
//!
//! 基于 lexer 的 token 流做启发式扫描，提取 import / export / 顶层声明。
//! 接口稳定，将来可以替换为真正的语法解析器而不影响调用方。

use serde::{Deserialize, Serialize};

use crate::analysis::lexer::{tokenize, Token, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportKind {
    Static,
    SideEffect,
    Require,
    Dynamic,
    /// `export ... from 'x'`
    ReExport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRef {
    pub source: String,
    /// 被导入的远端名字：默认导入记为 `default`，命名空间导入记为 `*`
    pub symbols: Vec<String>,
    /// 本地绑定名
    #[serde(default)]
    pub locals: Vec<String>,
    pub kind: ImportKind,
    #[serde(default)]
    pub type_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportKind {
    /// `export const|function|class ... name`
    Declaration,
    Default,
    /// `export { a as b }`（无 from）
    List,
    /// `export { a } from 'x'`
    ReExport,
    /// `export * from 'x'`
    Star,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRef {
    /// 对外可见的名字
    pub name: String,
    /// List 导出时对应的本地名
    pub local: Option<String>,
    pub kind: ExportKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSignature {
    pub imports: Vec<ImportRef>,
    pub exports: Vec<ExportRef>,
    /// 顶层声明的名字
    pub declarations: Vec<String>,
}

impl ModuleSignature {
    pub fn export_names(&self) -> Vec<String> {
        self.exports.iter().map(|e| e.name.clone()).collect()
    }

    /// 模块内可引用的顶层名字：声明 + import 绑定
    pub fn bindings(&self) -> Vec<String> {
        let mut names = self.declarations.clone();
        for import in &self.imports {
            names.extend(import.locals.iter().cloned());
        }
        names
    }

    pub fn has_star_export(&self) -> bool {
        self.exports.iter().any(|e| e.kind == ExportKind::Star && e.name == "*")
    }
}

const DECLARATION_KEYWORDS: &[&str] = &[
    "function", "class", "const", "let", "var", "interface", "type", "enum", "namespace",
];

pub fn parse_module_signature(text: &str) -> ModuleSignature {
    let tokens = tokenize(text);
    let mut parser = SignatureParser { tokens: &tokens, pos: 0, sig: ModuleSignature::default() };
    parser.run();
    let mut sig = parser.sig;
    // export 声明会被扫描两次
    let mut seen = std::collections::HashSet::new();
    sig.declarations.retain(|name| seen.insert(name.clone()));
    sig
}

struct SignatureParser<'a> {
    tokens: &'a [Token],
    pos: usize,
    sig: ModuleSignature,
}

impl<'a> SignatureParser<'a> {
    fn peek(&self, offset: usize) -> Option<&'a Token> {
        self.tokens.get(self.pos + offset)
    }

    fn prev_is_dot(&self) -> bool {
        self.pos > 0 && self.tokens[self.pos - 1].is_punct('.')
    }

    fn run(&mut self) {
        let mut brace_depth: usize = 0;
        let mut paren_depth: usize = 0;

        let tokens = self.tokens;
        while self.pos < tokens.len() {
            let tok = &tokens[self.pos];
            match &tok.kind {
                TokenKind::Punct('{') => brace_depth += 1,
                TokenKind::Punct('}') => brace_depth = brace_depth.saturating_sub(1),
                TokenKind::Punct('(') => paren_depth += 1,
                TokenKind::Punct(')') => paren_depth = paren_depth.saturating_sub(1),
                TokenKind::Ident(word) if !self.prev_is_dot() => {
                    let top_level = brace_depth == 0 && paren_depth == 0;
                    match word.as_str() {
                        "import" => {
                            if self.parse_import(top_level) {
                                continue;
                            }
                        }
                        "require" => self.parse_require(),
                        "export" if top_level => {
                            self.parse_export();
                            continue;
                        }
                        kw if top_level && DECLARATION_KEYWORDS.contains(&kw) => {
                            let names = self.declared_names(self.pos);
                            self.sig.declarations.extend(names);
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
            self.pos += 1;
        }
    }

    /// 解析 import；返回 true 表示已消费 token 并推进 pos
    fn parse_import(&mut self, top_level: bool) -> bool {
        let next = match self.peek(1) {
            Some(t) => t,
            None => return false,
        };

        // import('x')
        if next.is_punct('(') {
            if let (Some(src), Some(close)) = (self.peek(2), self.peek(3)) {
                if let (Some(source), true) = (src.string(), close.is_punct(')')) {
                    self.sig.imports.push(ImportRef {
                        source: source.to_string(),
                        symbols: Vec::new(),
                        locals: Vec::new(),
                        kind: ImportKind::Dynamic,
                        type_only: false,
                    });
                }
            }
            return false;
        }
        if next.is_punct('.') || !top_level {
            return false;
        }

        // import 'x'
        if let Some(source) = next.string() {
            self.sig.imports.push(ImportRef {
                source: source.to_string(),
                symbols: Vec::new(),
                locals: Vec::new(),
                kind: ImportKind::SideEffect,
                type_only: false,
            });
            self.pos += 2;
            return true;
        }

        self.pos += 1;
        let mut type_only = false;
        if self.current_is_ident("type") && !self.peek_is_from(1) && !self.peek_punct(1, ',') {
            type_only = true;
            self.pos += 1;
        }

        let mut symbols = Vec::new();
        let mut locals = Vec::new();
        while let Some(tok) = self.peek(0) {
            if tok.is_ident("from") && self.peek(1).and_then(|t| t.string()).is_some() {
                break;
            }
            if tok.is_punct(';') {
                return true;
            }
            match &tok.kind {
                TokenKind::Punct('{') => {
                    let (names, next_pos) = self.parse_specifier_list(self.pos + 1);
                    for (remote, local) in names {
                        symbols.push(remote);
                        locals.push(local);
                    }
                    self.pos = next_pos;
                    continue;
                }
                TokenKind::Punct('*') => {
                    if self.peek(1).map(|t| t.is_ident("as")).unwrap_or(false) {
                        if let Some(ns) = self.peek(2).and_then(|t| t.ident()) {
                            symbols.push("*".to_string());
                            locals.push(ns.to_string());
                        }
                        self.pos += 3;
                        continue;
                    }
                }
                TokenKind::Ident(name) => {
                    symbols.push("default".to_string());
                    locals.push(name.clone());
                }
                _ => {}
            }
            self.pos += 1;
        }

        // 当前位于 from
        if let Some(source) = self.peek(1).and_then(|t| t.string()) {
            self.sig.imports.push(ImportRef {
                source: source.to_string(),
                symbols,
                locals,
                kind: ImportKind::Static,
                type_only,
            });
            self.pos += 2;
        }
        true
    }

    fn parse_require(&mut self) {
        if !self.peek_punct(1, '(') {
            return;
        }
        if let (Some(src), Some(close)) = (self.peek(2), self.peek(3)) {
            if let (Some(source), true) = (src.string(), close.is_punct(')')) {
                self.sig.imports.push(ImportRef {
                    source: source.to_string(),
                    symbols: Vec::new(),
                    locals: Vec::new(),
                    kind: ImportKind::Require,
                    type_only: false,
                });
            }
        }
    }

    fn parse_export(&mut self) {
        self.pos += 1;
        let tok = match self.peek(0) {
            Some(t) => t,
            None => return,
        };

        if tok.is_ident("default") {
            self.sig.exports.push(ExportRef {
                name: "default".to_string(),
                local: None,
                kind: ExportKind::Default,
            });
            // export default function Foo / class Foo
            let names = self.declared_names(self.pos + 1);
            self.sig.declarations.extend(names);
            self.pos += 1;
            return;
        }

        if tok.is_punct('*') {
            let mut name = "*".to_string();
            let mut cursor = self.pos + 1;
            if self.tokens.get(cursor).map(|t| t.is_ident("as")).unwrap_or(false) {
                if let Some(ns) = self.tokens.get(cursor + 1).and_then(|t| t.ident()) {
                    name = ns.to_string();
                }
                cursor += 2;
            }
            if let Some(source) = self.from_source_at(cursor) {
                self.sig.exports.push(ExportRef { name, local: None, kind: ExportKind::Star });
                self.sig.imports.push(ImportRef {
                    source,
                    symbols: vec!["*".to_string()],
                    locals: Vec::new(),
                    kind: ImportKind::ReExport,
                    type_only: false,
                });
                cursor += 2;
            }
            self.pos = cursor;
            return;
        }

        let mut list_start = None;
        if tok.is_punct('{') {
            list_start = Some(self.pos + 1);
        } else if tok.is_ident("type") && self.peek_punct(1, '{') {
            list_start = Some(self.pos + 2);
        }
        if let Some(start) = list_start {
            let (names, next_pos) = self.parse_specifier_list(start);
            if let Some(source) = self.from_source_at(next_pos) {
                for (_, exported) in &names {
                    self.sig.exports.push(ExportRef {
                        name: exported.clone(),
                        local: None,
                        kind: ExportKind::ReExport,
                    });
                }
                self.sig.imports.push(ImportRef {
                    source,
                    symbols: names.iter().map(|(remote, _)| remote.clone()).collect(),
                    locals: Vec::new(),
                    kind: ImportKind::ReExport,
                    type_only: false,
                });
                self.pos = next_pos + 2;
            } else {
                for (local, exported) in names {
                    self.sig.exports.push(ExportRef {
                        name: exported,
                        local: Some(local),
                        kind: ExportKind::List,
                    });
                }
                self.pos = next_pos;
            }
            return;
        }

        let names = self.declared_names(self.pos);
        for name in &names {
            self.sig.exports.push(ExportRef {
                name: name.clone(),
                local: None,
                kind: ExportKind::Declaration,
            });
        }
        self.sig.declarations.extend(names);
    }

    /// 解析 `{ a, b as c, type d }`，start 指向 `{` 之后；返回 (原名, 别名) 与 `}` 之后的位置
    fn parse_specifier_list(&self, start: usize) -> (Vec<(String, String)>, usize) {
        let mut names = Vec::new();
        let mut cursor = start;
        while let Some(tok) = self.tokens.get(cursor) {
            if tok.is_punct('}') {
                return (names, cursor + 1);
            }
            let is_name = tok.ident().is_some() || tok.string().is_some();
            if is_name {
                let mut name = tok.ident().or_else(|| tok.string()).unwrap_or_default().to_string();
                // `type X` 修饰
                if name == "type" {
                    if let Some(next) = self.tokens.get(cursor + 1).and_then(|t| t.ident()) {
                        if next != "as" {
                            cursor += 1;
                            name = next.to_string();
                        }
                    }
                }
                let mut alias = name.clone();
                if self.tokens.get(cursor + 1).map(|t| t.is_ident("as")).unwrap_or(false) {
                    if let Some(a) = self.tokens.get(cursor + 2).and_then(|t| t.ident().or_else(|| t.string())) {
                        alias = a.to_string();
                    }
                    cursor += 2;
                }
                names.push((name, alias));
            }
            cursor += 1;
        }
        (names, cursor)
    }

    /// 从关键字位置开始提取声明的名字（支持 async / declare / abstract 前缀与简单解构）
    fn declared_names(&self, start: usize) -> Vec<String> {
        let mut cursor = start;
        while let Some(word) = self.tokens.get(cursor).and_then(|t| t.ident()) {
            if matches!(word, "async" | "declare" | "abstract" | "default") {
                cursor += 1;
            } else {
                break;
            }
        }
        let keyword = match self.tokens.get(cursor).and_then(|t| t.ident()) {
            Some(k) if DECLARATION_KEYWORDS.contains(&k) => k,
            _ => return Vec::new(),
        };
        cursor += 1;
        if keyword == "function" && self.tokens.get(cursor).map(|t| t.is_punct('*')).unwrap_or(false) {
            cursor += 1;
        }
        // const enum
        if keyword == "const" && self.tokens.get(cursor).map(|t| t.is_ident("enum")).unwrap_or(false) {
            cursor += 1;
        }

        let tok = match self.tokens.get(cursor) {
            Some(t) => t,
            None => return Vec::new(),
        };
        if let Some(name) = tok.ident() {
            if keyword == "type" {
                // `type` 只在 `type X =` / `type X<` 时才是声明
                let next = self.tokens.get(cursor + 1);
                if !next.map(|t| t.is_punct('=') || t.is_punct('<')).unwrap_or(false) {
                    return Vec::new();
                }
            }
            return vec![name.to_string()];
        }
        if matches!(keyword, "const" | "let" | "var") && (tok.is_punct('{') || tok.is_punct('[')) {
            let close = if tok.is_punct('{') { '}' } else { ']' };
            let mut names = Vec::new();
            let mut depth = 0usize;
            let mut i = cursor;
            while let Some(t) = self.tokens.get(i) {
                if t.is_punct('{') || t.is_punct('[') {
                    depth += 1;
                } else if t.is_punct('}') || t.is_punct(']') {
                    depth = depth.saturating_sub(1);
                    if depth == 0 && t.is_punct(close) {
                        break;
                    }
                } else if let Some(name) = t.ident() {
                    let next = self.tokens.get(i + 1);
                    let terminal = next
                        .map(|n| n.is_punct(',') || n.is_punct('}') || n.is_punct(']') || n.is_punct('='))
                        .unwrap_or(false);
                    if terminal {
                        names.push(name.to_string());
                    }
                }
                i += 1;
            }
            return names;
        }
        Vec::new()
    }

    fn current_is_ident(&self, word: &str) -> bool {
        self.peek(0).map(|t| t.is_ident(word)).unwrap_or(false)
    }

    fn peek_is_from(&self, offset: usize) -> bool {
        self.peek(offset).map(|t| t.is_ident("from")).unwrap_or(false)
    }

    fn peek_punct(&self, offset: usize, c: char) -> bool {
        self.peek(offset).map(|t| t.is_punct(c)).unwrap_or(false)
    }

    fn from_source_at(&self, pos: usize) -> Option<String> {
        let from = self.tokens.get(pos)?;
        if !from.is_ident("from") {
            return None;
        }
        self.tokens.get(pos + 1)?.string().map(|s| s.to_string())
    }
}
