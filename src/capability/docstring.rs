//! 文档裁剪：去掉长篇小节（Description / Notes / Raises / Example），保留摘要、参数与返回值

/// 裁剪掉的小节标题
const PRUNED_SECTIONS: &[&str] = &["Description", "Notes", "Note", "Raises", "Example", "Examples"];

/// 未开启完整文档时的描述长度上限（字符）
pub const MAX_DESCRIPTION_CHARS: usize = 1024;

/// 形如 `Args:` 的小节标题行，返回 (缩进, 标题)
fn section_header(line: &str) -> Option<(usize, &str)> {
    let trimmed = line.trim_end();
    let title = trimmed.trim_start().strip_suffix(':')?;
    if title.is_empty()
        || !title.chars().next().map(char::is_uppercase).unwrap_or(false)
        || !title.chars().all(|c| c.is_alphanumeric() || c == ' ')
    {
        return None;
    }
    Some((trimmed.len() - trimmed.trim_start().len(), title))
}

/// 去掉长篇小节；小节到下一个同级或更浅的标题为止
pub fn prune(doc: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut skipping: Option<usize> = None;
    for line in doc.lines() {
        if let Some((indent, title)) = section_header(line) {
            if let Some(level) = skipping {
                if indent > level {
                    continue;
                }
            }
            skipping = PRUNED_SECTIONS.contains(&title).then_some(indent);
            if skipping.is_some() {
                continue;
            }
        } else if skipping.is_some() {
            continue;
        }
        out.push(line);
    }
    while out.last().map(|l| l.trim().is_empty()).unwrap_or(false) {
        out.pop();
    }
    out.join("\n")
}

/// 能力描述：默认裁剪并截断，`full` 为 true 时保留原文
pub fn describe(doc: &str, full: bool) -> String {
    if full {
        return doc.trim().to_string();
    }
    let pruned = prune(doc);
    let pruned = pruned.trim();
    if pruned.chars().count() > MAX_DESCRIPTION_CHARS {
        pruned.chars().take(MAX_DESCRIPTION_CHARS).collect()
    } else {
        pruned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "Search datasets.\n\nArgs:\n    query (str): text.\n\nNotes:\n    Results are paged.\n    Slow for large indexes.\n\nReturns:\n    list[Dataset]: hits.\n\nExample:\n    ws.search_datasets(\"x\")";

    #[test]
    fn test_prune_removes_long_sections() {
        let pruned = prune(DOC);
        assert!(pruned.contains("Search datasets."));
        assert!(pruned.contains("Args:"));
        assert!(pruned.contains("Returns:"));
        assert!(!pruned.contains("Notes:"));
        assert!(!pruned.contains("Results are paged"));
        assert!(!pruned.contains("Example"));
        assert!(!pruned.ends_with('\n'));
    }

    #[test]
    fn test_describe_full_keeps_everything() {
        assert!(describe(DOC, true).contains("Slow for large indexes"));
    }

    #[test]
    fn test_describe_truncates() {
        let long = "a".repeat(MAX_DESCRIPTION_CHARS + 10);
        assert_eq!(describe(&long, false).chars().count(), MAX_DESCRIPTION_CHARS);
    }

    #[test]
    fn test_header_detection() {
        assert_eq!(section_header("    Returns:"), Some((4, "Returns")));
        assert!(section_header("query (str): text.").is_none());
        assert!(section_header("note: lowercase").is_none());
    }
}
