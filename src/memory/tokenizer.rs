//! 分词模块
//!
//! 中英文混合分词，用于修复模式的相似度检索。
//! 含 CJK 字符时使用 jieba-rs，英文按非字母数字切分；去停用词，英文词至少 3 个字符。

use std::collections::HashSet;
use std::sync::OnceLock;

use jieba_rs::Jieba;

/// 全局 Jieba 实例（延迟初始化）
static JIEBA: OnceLock<Jieba> = OnceLock::new();

fn get_jieba() -> &'static Jieba {
    JIEBA.get_or_init(Jieba::new)
}

const MIN_TOKEN_CHARS: usize = 3;

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "was",
    "one", "our", "out", "has", "have", "this", "that", "with", "from", "they", "will", "when",
    "what", "which", "there", "their", "been", "were", "into", "does", "doesn", "isn", "should",
    "would", "could", "after", "before", "than", "then", "them", "some", "only", "also",
];

/// 判断字符是否为 CJK（中日韩）字符
fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}' |   // CJK Unified Ideographs
        '\u{3400}'..='\u{4DBF}' |   // CJK Unified Ideographs Extension A
        '\u{F900}'..='\u{FAFF}' |   // CJK Compatibility Ideographs
        '\u{3040}'..='\u{309F}' |   // Hiragana
        '\u{30A0}'..='\u{30FF}'     // Katakana
    )
}

/// 判断文本是否包含 CJK 字符
pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(is_cjk)
}

fn keep(token: &str) -> bool {
    if token.chars().next().map(is_cjk).unwrap_or(false) {
        // 单字 CJK 信息量太低
        return token.chars().count() >= 2;
    }
    token.chars().count() >= MIN_TOKEN_CHARS && !STOP_WORDS.contains(&token)
}

fn split_ascii(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
}

/// 智能分词：根据文本内容自动选择分词策略
pub fn tokenize(text: &str) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    if contains_cjk(text) {
        // jieba 搜索引擎模式，英文片段再按非字母数字切一次
        get_jieba()
            .cut_for_search(text, true)
            .into_iter()
            .flat_map(|s| {
                if contains_cjk(s) {
                    vec![s.to_string()]
                } else {
                    split_ascii(s).collect()
                }
            })
            .filter(|s| keep(s))
            .collect()
    } else {
        split_ascii(text).filter(|s| keep(s)).collect()
    }
}

/// 分词并返回词集合（用于相似度计算）
pub fn tokenize_to_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

/// Jaccard 相似度 |A∩B| / |A∪B|；任一为空时为 0
pub fn jaccard_similarity(set1: &HashSet<String>, set2: &HashSet<String>) -> f64 {
    if set1.is_empty() || set2.is_empty() {
        return 0.0;
    }
    let intersection = set1.intersection(set2).count() as f64;
    let union = set1.union(set2).count() as f64;
    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_english_strips_stop_words_and_short_tokens() {
        let tokens = tokenize("The sidebar doesn't collapse on a click|ui_bug");
        assert_eq!(tokens, vec!["sidebar", "collapse", "click", "bug"]);
    }

    #[test]
    fn test_tokenize_chinese() {
        let tokens = tokenize("侧边栏无法折叠");
        assert!(!tokens.is_empty());
        assert!(tokens.iter().all(|t| t.chars().count() >= 2));
    }

    #[test]
    fn test_tokenize_mixed() {
        let tokens = tokenize("修复 Sidebar 折叠问题");
        assert!(tokens.iter().any(|t| t == "sidebar"));
    }

    #[test]
    fn test_contains_cjk() {
        assert!(contains_cjk("你好"));
        assert!(contains_cjk("Hello 世界"));
        assert!(!contains_cjk("Hello World"));
    }

    #[test]
    fn test_jaccard_similarity() {
        let a = tokenize_to_set("sidebar collapse toggle");
        let b = tokenize_to_set("sidebar collapse");
        assert!((jaccard_similarity(&a, &b) - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(jaccard_similarity(&a, &HashSet::new()), 0.0);
    }
}
