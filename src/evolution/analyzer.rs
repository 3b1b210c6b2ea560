//! ORIENT 阶段的启发式：影响区域、根因推断、所需技能、问题分类

use std::collections::BTreeSet;

use crate::analysis::{classify, detect_areas, ComponentAnalysis};
use crate::evolution::types::IssueCategory;
use crate::memory::FixPattern;

/// 根因表：关键词组 → 解释
const ROOT_CAUSES: &[(&str, &[&str], &str)] = &[
    (
        "style",
        &[
            "style", "css", "color", "colour", "align", "aligned", "misaligned", "spacing",
            "padding", "margin", "layout", "overflow", "font", "width", "height", "theme",
        ],
        "Styling rules produce the wrong visual result; class names or style values likely need adjustment",
    ),
    (
        "render",
        &[
            "render", "display", "show", "shown", "visible", "blank", "missing", "disappear",
            "flicker", "empty", "hidden",
        ],
        "Render logic does not produce the expected output; conditional rendering or props are likely wrong",
    ),
    (
        "interaction",
        &[
            "click", "press", "toggle", "collapse", "expand", "open", "close", "drag", "hover",
            "keyboard", "focus", "scroll", "select",
        ],
        "An event handler or state update does not react to user interaction as expected",
    ),
    (
        "performance",
        &[
            "slow", "lag", "laggy", "performance", "freeze", "frozen", "memory", "leak", "jank",
            "rerender", "re-render",
        ],
        "Expensive work runs too often; memoization or effect dependencies likely need fixing",
    ),
];

const GENERIC_ROOT_CAUSE: &str =
    "Logic in the affected component diverges from the described behaviour";

const ACCESSIBILITY_TERMS: &[&str] = &[
    "accessibility", "a11y", "aria", "screen reader", "screenreader", "contrast", "tabindex",
    "keyboard navigation", "alt text",
];
const PERFORMANCE_TERMS: &[&str] = &["slow", "lag", "performance", "freeze", "memory", "leak", "jank"];
const STYLE_TERMS: &[&str] = &[
    "style", "css", "color", "colour", "align", "spacing", "padding", "margin", "layout", "font",
];
const FEATURE_TERMS: &[&str] = &["add", "feature", "support", "implement", "new", "allow"];
const UI_TERMS: &[&str] = &[
    "button", "sidebar", "panel", "tab", "modal", "dialog", "display", "render", "click",
    "ui", "menu", "toast",
];

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .filter(|w| !w.is_empty())
        .map(String::from)
        .collect()
}

/// 包含短语（多词）或整词
fn mentions(text: &str, words: &[String], term: &str) -> bool {
    if term.contains(' ') {
        text.contains(term)
    } else {
        words.iter().any(|w| w == term)
    }
}

/// 分类优先级：accessibility > performance > style > feature > ui，默认 logic_error
pub fn classify_category(description: &str) -> IssueCategory {
    let text = description.to_lowercase();
    let words = words(&text);
    // 长词允许出现在词内部（misaligned 命中 align），短词必须整词匹配
    let any = |terms: &[&str]| {
        terms.iter().any(|t| {
            mentions(&text, &words, t) || (t.len() > 3 && words.iter().any(|w| w.contains(t)))
        })
    };
    if any(ACCESSIBILITY_TERMS) {
        IssueCategory::Accessibility
    } else if any(PERFORMANCE_TERMS) {
        IssueCategory::Performance
    } else if any(STYLE_TERMS) {
        IssueCategory::Style
    } else if any(FEATURE_TERMS) {
        IssueCategory::FeatureEnhancement
    } else if any(UI_TERMS) {
        IssueCategory::UiBug
    } else {
        IssueCategory::LogicError
    }
}

/// 影响区域：问题描述提到的界面区域优先，否则取首个检测文件的目录与组件名
pub fn affected_area(description: &str, analyses: &[ComponentAnalysis]) -> String {
    let areas = detect_areas(description);
    if !areas.is_empty() {
        return areas.join(", ");
    }
    match analyses.first() {
        Some(first) => {
            let dir = first
                .path
                .rsplit_once('/')
                .map(|(dir, _)| dir)
                .unwrap_or(".");
            format!("{dir} ({} {})", first.kind, first.name)
        }
        None => "general".to_string(),
    }
}

/// 按关键词表推断根因；命中历史模式时附加其解决方案
pub fn infer_root_cause(description: &str, similar: Option<&FixPattern>) -> String {
    let text = description.to_lowercase();
    let words = words(&text);
    let base = ROOT_CAUSES
        .iter()
        .map(|(label, terms, explanation)| {
            let hits = terms.iter().filter(|t| mentions(&text, &words, t)).count();
            (hits, *label, *explanation)
        })
        .filter(|(hits, _, _)| *hits > 0)
        // 命中数相同时保持表顺序
        .fold(None::<(usize, &str, &str)>, |best, cur| match best {
            Some(b) if b.0 >= cur.0 => Some(b),
            _ => Some(cur),
        })
        .map(|(_, label, explanation)| format!("[{label}] {explanation}"))
        .unwrap_or_else(|| format!("[generic] {GENERIC_ROOT_CAUSE}"));

    match similar {
        Some(pattern) => format!("{base}; previously fixed by: {}", pattern.solution),
        None => base,
    }
}

/// 由扩展名与内容特征推导所需技能
pub fn required_skills(analyses: &[ComponentAnalysis], contents: &[&str]) -> Vec<String> {
    let mut skills = BTreeSet::new();
    for analysis in analyses {
        match classify::extension(&analysis.path).as_str() {
            "tsx" => {
                skills.insert("react");
                skills.insert("typescript");
            }
            "jsx" => {
                skills.insert("react");
                skills.insert("javascript");
            }
            "ts" => {
                skills.insert("typescript");
            }
            "js" | "mjs" | "cjs" => {
                skills.insert("javascript");
            }
            "css" | "scss" | "sass" | "less" => {
                skills.insert("css");
            }
            _ => {}
        }
    }
    for content in contents {
        if content.contains("useState") || content.contains("useEffect") || content.contains("useMemo") {
            skills.insert("react-hooks");
        }
        if content.contains("zustand") || content.contains("createStore") || content.contains("useReducer") {
            skills.insert("state-management");
        }
        if content.contains("className=\"") && (content.contains(" flex") || content.contains(" px-")) {
            skills.insert("tailwind");
        }
        if content.contains("aria-") || content.contains("role=") {
            skills.insert("accessibility");
        }
        if content.contains("fetch(") || content.contains("axios") {
            skills.insert("networking");
        }
    }
    skills.into_iter().map(String::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalysisEngine;

    #[test]
    fn test_classify_category_precedence() {
        assert_eq!(classify_category("Sidebar is slow and misaligned"), IssueCategory::Performance);
        assert_eq!(classify_category("button misaligned"), IssueCategory::Style);
        assert_eq!(classify_category("Missing aria label on the button"), IssueCategory::Accessibility);
        assert_eq!(classify_category("Add support for split view"), IssueCategory::FeatureEnhancement);
        assert_eq!(classify_category("clicking the tab does nothing"), IssueCategory::UiBug);
        assert_eq!(classify_category("wrong sum of totals"), IssueCategory::LogicError);
    }

    #[test]
    fn test_root_cause_table() {
        assert!(infer_root_cause("button misaligned", None).starts_with("[style]"));
        assert!(infer_root_cause("panel does not collapse on click", None).starts_with("[interaction]"));
        assert!(infer_root_cause("editor is laggy", None).starts_with("[performance]"));
        assert!(infer_root_cause("totals wrong", None).starts_with("[generic]"));
    }

    #[test]
    fn test_affected_area_and_skills() {
        let engine = AnalysisEngine::new();
        let content = "import { useState } from 'react';\nexport const Panel = () => <div aria-label=\"p\" />;";
        let analysis = engine.analyze_component("src/ui/Panel.tsx", content);
        assert_eq!(affected_area("the sidebar flickers", &[]), "sidebar");
        assert_eq!(
            affected_area("wrong", std::slice::from_ref(&analysis)),
            "src/ui (ui_component Panel)"
        );
        let skills = required_skills(&[analysis], &[content]);
        assert_eq!(skills, vec!["accessibility", "react", "react-hooks", "typescript"]);
    }
}
