//! 分词：能力文档与子查询的中英文混合分词
//!
//! 含 CJK 字符时使用 jieba-rs；英文按非字母数字字符切分（`get_users` → `get`、`users`）。

use std::collections::HashSet;
use std::sync::OnceLock;

use jieba_rs::Jieba;

/// 全局 Jieba 实例（延迟初始化）
static JIEBA: OnceLock<Jieba> = OnceLock::new();

fn get_jieba() -> &'static Jieba {
    JIEBA.get_or_init(Jieba::new)
}

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

fn split_words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|s| s.len() > 1)
        .map(|s| s.to_lowercase())
}

/// 智能分词：根据文本内容自动选择分词策略
pub fn tokenize(text: &str) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    if contains_cjk(text) {
        // 搜索引擎模式，更细粒度；英文片段再按标点切分
        get_jieba()
            .cut_for_search(text, true)
            .into_iter()
            .flat_map(|s| {
                if contains_cjk(s) {
                    vec![s.to_string()]
                } else {
                    split_words(s).collect()
                }
            })
            .filter(|s| !s.trim().is_empty())
            .collect()
    } else {
        split_words(text).collect()
    }
}

/// 分词并返回词集合（用于相似度计算）
pub fn tokenize_to_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

/// 计算两个词集合的相似度（Jaccard 相似度）
pub fn jaccard_similarity(set1: &HashSet<String>, set2: &HashSet<String>) -> f32 {
    if set1.is_empty() || set2.is_empty() {
        return 0.0;
    }
    let intersection = set1.intersection(set2).count() as f32;
    let union = set1.union(set2).count() as f32;
    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_identifiers() {
        let tokens = tokenize("def get_users(self) -> list[User]");
        assert!(tokens.contains(&"get".to_string()));
        assert!(tokens.contains(&"users".to_string()));
        assert!(tokens.contains(&"user".to_string()));
        assert!(!tokens.iter().any(|t| t.contains('(')));
    }

    #[test]
    fn test_tokenize_chinese() {
        let tokens = tokenize("列出工作区的所有用户");
        assert!(!tokens.is_empty());
        assert!(tokens.iter().any(|t| t.contains("用户") || t.contains("工作")));
    }

    #[test]
    fn test_jaccard_similarity() {
        let set1 = tokenize_to_set("list workspace users");
        let set2 = tokenize_to_set("get users of the workspace");
        assert!(jaccard_similarity(&set1, &set2) > 0.0);
        assert_eq!(jaccard_similarity(&set1, &HashSet::new()), 0.0);
    }
}
