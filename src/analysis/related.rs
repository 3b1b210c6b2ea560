//! 按问题描述为文件打分，返回最相关的文件

use serde::{Deserialize, Serialize};

use crate::analysis::FileMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedFile {
    pub path: String,
    pub score: u32,
}

const PATH_HIT: u32 = 5;
const AREA_HIT: u32 = 4;
const CONTENT_HIT: u32 = 1;
const STYLE_BONUS: u32 = 2;

/// 界面区域 → 路径中可能出现的同义词
const AREA_SYNONYMS: &[(&str, &[&str])] = &[
    ("sidebar", &["sidebar", "side-bar", "drawer", "nav", "explorer"]),
    ("tab", &["tab", "tabs", "tabbar"]),
    ("editor", &["editor", "monaco", "codemirror"]),
    ("status", &["status", "statusbar", "footer"]),
    ("terminal", &["terminal", "console", "xterm"]),
    ("git", &["git", "scm", "diff", "commit"]),
    ("button", &["button", "btn"]),
    ("theme", &["theme", "colors", "palette", "tokens"]),
    ("notification", &["notification", "toast", "alert", "snackbar"]),
    ("search", &["search", "find", "filter"]),
    ("settings", &["settings", "preferences", "config"]),
];

const STYLE_TERMS: &[&str] = &[
    "style", "styling", "css", "color", "colour", "align", "aligned", "misaligned", "layout",
    "spacing", "padding", "margin", "font", "theme",
];

const STYLE_EXTENSIONS: &[&str] = &[".css", ".scss", ".sass", ".less", ".styl"];

fn keywords(issue: &str) -> Vec<String> {
    let mut out: Vec<String> = issue
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '-' && c != '_')
        .filter(|w| w.chars().count() > 2)
        .map(String::from)
        .collect();
    out.sort();
    out.dedup();
    out
}

fn is_style_file(path: &str) -> bool {
    let lower = path.to_lowercase();
    STYLE_EXTENSIONS.iter().any(|e| lower.ends_with(e))
        || lower.contains(".module.")
        || lower.contains("styles")
        || lower.contains("styled")
}

/// 问题描述中提到的界面区域（按表顺序）
pub fn detect_areas(issue: &str) -> Vec<&'static str> {
    let words = keywords(issue);
    AREA_SYNONYMS
        .iter()
        .filter(|entry| mentions_area(&words, entry))
        .map(|(area, _)| *area)
        .collect()
}

fn mentions_area(words: &[String], (area, synonyms): &(&str, &[&str])) -> bool {
    words
        .iter()
        .any(|w| w.starts_with(area) || synonyms.contains(&w.as_str()))
}

/// 为每个文件打分：路径命中 +5、区域同义词命中 +4、内容命中 +1、样式类问题对样式文件 +2；
/// 返回分数 > 0 的前 `limit` 个（同分按路径排序）
pub fn find_related_files(issue: &str, files: &FileMap, limit: usize) -> Vec<RelatedFile> {
    let words = keywords(issue);
    if words.is_empty() {
        return Vec::new();
    }
    let styling = words.iter().any(|w| STYLE_TERMS.contains(&w.as_str()));
    let areas: Vec<&[&str]> = AREA_SYNONYMS
        .iter()
        .filter(|entry| mentions_area(&words, entry))
        .map(|(_, synonyms)| *synonyms)
        .collect();

    let mut scored: Vec<RelatedFile> = files
        .iter()
        .filter_map(|(path, content)| {
            let path_lower = path.to_lowercase();
            let content_lower = content.to_lowercase();
            let mut score = 0;
            for word in &words {
                if path_lower.contains(word.as_str()) {
                    score += PATH_HIT;
                }
                if content_lower.contains(word.as_str()) {
                    score += CONTENT_HIT;
                }
            }
            for synonyms in &areas {
                if synonyms.iter().any(|s| path_lower.contains(s)) {
                    score += AREA_HIT;
                }
            }
            if styling && is_style_file(path) {
                score += STYLE_BONUS;
            }
            (score > 0).then(|| RelatedFile {
                path: path.clone(),
                score,
            })
        })
        .collect();

    scored.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.path.cmp(&b.path)));
    scored.truncate(limit);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files() -> FileMap {
        let mut map = FileMap::new();
        map.insert("components/button.tsx".into(), "export const Button = () => <button />;".into());
        map.insert("components/sidebar/index.tsx".into(), "export const Sidebar = () => null;".into());
        map.insert("styles/globals.css".into(), ".button { display: flex; }".into());
        map.insert("lib/math.ts".into(), "export const add = 1;".into());
        map
    }

    #[test]
    fn test_button_issue_ranks_button_first() {
        let related = find_related_files("button misaligned", &files(), 10);
        assert_eq!(related[0].path, "components/button.tsx");
        // 路径 5 + 区域 4 + 内容 1
        assert_eq!(related[0].score, 10);
        // 内容 1 + 样式 2
        assert_eq!(related[1].path, "styles/globals.css");
        assert!(related.iter().all(|r| r.path != "lib/math.ts"));
    }

    #[test]
    fn test_area_synonyms_and_limit() {
        let related = find_related_files("the drawer in the sidebar flickers", &files(), 1);
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].path, "components/sidebar/index.tsx");
    }

    #[test]
    fn test_detect_areas() {
        assert_eq!(detect_areas("Toast notification overlaps the status bar"), vec!["status", "notification"]);
        assert!(detect_areas("wrong sum").is_empty());
    }

    #[test]
    fn test_no_keywords_returns_empty() {
        assert!(find_related_files("a b", &files(), 5).is_empty());
    }
}
