//! 模型输出解析：提取 JSON 块（```json ... ``` 围栏或首尾花括号 / 方括号），识别文本形式的能力调用

use serde::Deserialize;

use crate::core::ToolCallRequest;
use crate::llm::ModelReply;

/// 提取输出中的 JSON 文本；找不到时返回 None
pub fn extract_json(output: &str) -> Option<&str> {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    if let Some(start) = trimmed.find("```") {
        let rest = &trimmed[start + 3..];
        if let Some(end) = rest.find("```") {
            let inner = rest[..end].trim();
            if inner.starts_with('{') || inner.starts_with('[') {
                return Some(inner);
            }
        }
    }
    let open = trimmed.find(['{', '['])?;
    let close_char = if trimmed[open..].starts_with('{') { '}' } else { ']' };
    let close = trimmed.rfind(close_char)?;
    (close > open).then(|| &trimmed[open..=close])
}

#[derive(Deserialize)]
struct TextToolCall {
    #[serde(default)]
    tool: String,
    #[serde(default)]
    args: serde_json::Value,
}

/// 文本回复中的 `{"tool": "...", "args": {...}}` 转为结构化调用；否则为纯文本回复
pub fn parse_tool_reply(content: String) -> ModelReply {
    let call = extract_json(&content)
        .and_then(|json| serde_json::from_str::<TextToolCall>(json).ok())
        .filter(|c| !c.tool.is_empty());
    match call {
        Some(call) => {
            let args = if call.args.is_null() {
                serde_json::json!({})
            } else {
                call.args
            };
            ModelReply {
                content,
                tool_calls: vec![ToolCallRequest::new(call.tool, args)],
            }
        }
        None => ModelReply {
            content,
            tool_calls: Vec::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_fenced_json() {
        let out = "Sure.\n```json\n{\"action\": \"TOOL\"}\n```\nDone";
        assert_eq!(extract_json(out), Some("{\"action\": \"TOOL\"}"));
    }

    #[test]
    fn test_extract_bare_json_and_lists() {
        assert_eq!(extract_json("x {\"a\": 1} y"), Some("{\"a\": 1}"));
        assert_eq!(extract_json("[\"q1\", \"q2\"]"), Some("[\"q1\", \"q2\"]"));
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn test_parse_tool_reply() {
        let reply = parse_tool_reply(r#"{"tool": "get_users", "args": {}}"#.to_string());
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].name, "get_users");

        let plain = parse_tool_reply("The answer is 4.".to_string());
        assert!(plain.tool_calls.is_empty());
        assert_eq!(plain.content, "The answer is 4.");
    }
}
