//! 最小 JS/TS 词法扫描器
//!
//! 只区分标识符、字符串、模板、正则字面量与单字符标点，足以支撑 import/export 扫描、
//! 复杂度计数与括号平衡检查。注释被跳过；任何畸形输入都不会报错，未闭合的字面量在行尾或文件尾截断。

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Ident(String),
    /// 单/双引号字符串（内容不含引号）
    Str(String),
    /// 模板字符串整体（含插值部分的原文）
    Template(String),
    Regex,
    Number,
    /// `=>`
    Arrow,
    Punct(char),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
}

impl Token {
    pub fn is_ident(&self, word: &str) -> bool {
        matches!(&self.kind, TokenKind::Ident(s) if s == word)
    }

    pub fn is_punct(&self, c: char) -> bool {
        self.kind == TokenKind::Punct(c)
    }

    pub fn ident(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Ident(s) => Some(s),
            _ => None,
        }
    }

    pub fn string(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Str(s) => Some(s),
            TokenKind::Template(s) if !s.contains("${") => Some(s),
            _ => None,
        }
    }
}

/// 这些关键字之后出现的 `/` 视为正则字面量开始
const REGEX_PRECEDING_KEYWORDS: &[&str] = &["return", "typeof", "case", "do", "else", "in", "of"];

pub fn tokenize(source: &str) -> Vec<Token> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens: Vec<Token> = Vec::new();
    let mut i = 0;
    let mut line = 1;

    while i < chars.len() {
        let c = chars[i];

        if c == '\n' {
            line += 1;
            i += 1;
            continue;
        }
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        // 注释
        if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if c == '/' && chars.get(i + 1) == Some(&'*') {
            i += 2;
            while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                if chars[i] == '\n' {
                    line += 1;
                }
                i += 1;
            }
            i = (i + 2).min(chars.len());
            continue;
        }

        if c == '"' || c == '\'' {
            let start_line = line;
            let mut value = String::new();
            i += 1;
            while i < chars.len() && chars[i] != c && chars[i] != '\n' {
                if chars[i] == '\\' && i + 1 < chars.len() {
                    value.push(chars[i + 1]);
                    i += 2;
                    continue;
                }
                value.push(chars[i]);
                i += 1;
            }
            if i < chars.len() && chars[i] == c {
                i += 1;
            }
            tokens.push(Token { kind: TokenKind::Str(value), line: start_line });
            continue;
        }

        if c == '`' {
            let start_line = line;
            let mut value = String::new();
            let mut depth = 0usize;
            i += 1;
            while i < chars.len() {
                let ch = chars[i];
                if ch == '\\' && i + 1 < chars.len() {
                    value.push(ch);
                    value.push(chars[i + 1]);
                    i += 2;
                    continue;
                }
                if ch == '\n' {
                    line += 1;
                }
                if depth == 0 && ch == '`' {
                    break;
                }
                if ch == '$' && chars.get(i + 1) == Some(&'{') {
                    depth += 1;
                    value.push_str("${");
                    i += 2;
                    continue;
                }
                if depth > 0 && ch == '{' {
                    depth += 1;
                } else if depth > 0 && ch == '}' {
                    depth -= 1;
                }
                value.push(ch);
                i += 1;
            }
            i = (i + 1).min(chars.len());
            tokens.push(Token { kind: TokenKind::Template(value), line: start_line });
            continue;
        }

        if c == '/' && regex_allowed(tokens.last()) {
            let mut in_class = false;
            let mut j = i + 1;
            let mut closed = false;
            while j < chars.len() && chars[j] != '\n' {
                match chars[j] {
                    '\\' => j += 1,
                    '[' => in_class = true,
                    ']' => in_class = false,
                    '/' if !in_class => {
                        closed = true;
                        break;
                    }
                    _ => {}
                }
                j += 1;
            }
            if closed {
                i = j + 1;
                while i < chars.len() && chars[i].is_ascii_alphabetic() {
                    i += 1;
                }
                tokens.push(Token { kind: TokenKind::Regex, line });
                continue;
            }
        }

        if is_ident_start(c) {
            let start = i;
            while i < chars.len() && is_ident_continue(chars[i]) {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            tokens.push(Token { kind: TokenKind::Ident(word), line });
            continue;
        }

        if c.is_ascii_digit() {
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.' || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token { kind: TokenKind::Number, line });
            continue;
        }

        if c == '=' && chars.get(i + 1) == Some(&'>') {
            tokens.push(Token { kind: TokenKind::Arrow, line });
            i += 2;
            continue;
        }

        tokens.push(Token { kind: TokenKind::Punct(c), line });
        i += 1;
    }

    tokens
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn regex_allowed(prev: Option<&Token>) -> bool {
    match prev {
        None => true,
        Some(tok) => match &tok.kind {
            TokenKind::Punct(p) => "(,=:[!&|?{};+-*%~^".contains(*p),
            TokenKind::Arrow => true,
            TokenKind::Ident(word) => REGEX_PRECEDING_KEYWORDS.contains(&word.as_str()),
            _ => false,
        },
    }
}
