//! 解析模型输出：决策 JSON 与子查询列表

use std::sync::OnceLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::core::{ActionSignal, AgentError};
use crate::llm::output::extract_json;

/// 决策者输出格式
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ManagerDecision {
    /// TOOL 或 CODE
    pub action: String,
    /// 能力调用目标的缓存键；CODE 时可为 NONE
    #[serde(default, alias = "tool_object")]
    pub focal_object: Option<String>,
}

/// 决策格式的 JSON Schema（注入 prompt）
pub fn decision_schema_json() -> String {
    let schema = schemars::schema_for!(ManagerDecision);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| "{}".to_string())
}

static TRAILING_COMMA: OnceLock<Regex> = OnceLock::new();

/// 去掉 `}` / `]` 前多余的逗号（模型常照抄示例里的逗号）
fn strip_trailing_commas(json: &str) -> String {
    TRAILING_COMMA
        .get_or_init(|| Regex::new(r",(\s*[}\]])").unwrap_or_else(|_| unreachable!("static pattern")))
        .replace_all(json, "$1")
        .into_owned()
}

/// 解析决策：返回动作信号与（可能的）焦点对象键
pub fn parse_decision(output: &str) -> Result<(ActionSignal, Option<String>), AgentError> {
    let json = extract_json(output)
        .ok_or_else(|| AgentError::DecisionParse("no JSON object found in output".into()))?;
    let decision: ManagerDecision = serde_json::from_str(&strip_trailing_commas(json))
        .map_err(|e| AgentError::DecisionParse(e.to_string()))?;

    let action = decision.action.trim().to_uppercase();
    let signal = if action.contains("TOOL") {
        ActionSignal::Tool
    } else if action.contains("CODE") {
        ActionSignal::Code
    } else {
        return Err(AgentError::DecisionParse(format!(
            "unknown action '{}'",
            decision.action
        )));
    };
    let focal = decision
        .focal_object
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty() && !k.eq_ignore_ascii_case("none"));
    Ok((signal, focal))
}

/// 解析分解结果：字符串 JSON 数组
pub fn parse_subqueries(output: &str) -> Option<Vec<String>> {
    let json = extract_json(output)?;
    let queries: Vec<String> = serde_json::from_str(&strip_trailing_commas(json)).ok()?;
    let queries: Vec<String> = queries
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .collect();
    (!queries.is_empty()).then_some(queries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decision_variants() {
        let (signal, key) =
            parse_decision("{\"action\": \"TOOL\", \"tool_object\": \"_WORKSPACE_1a2b3c4d\",}").unwrap();
        assert_eq!(signal, ActionSignal::Tool);
        assert_eq!(key.as_deref(), Some("_WORKSPACE_1a2b3c4d"));

        let (signal, key) =
            parse_decision("```json\n{\"action\": \"code\", \"focal_object\": \"NONE\"}\n```").unwrap();
        assert_eq!(signal, ActionSignal::Code);
        assert!(key.is_none());
    }

    #[test]
    fn test_parse_decision_errors() {
        assert!(matches!(
            parse_decision("I think we should use a tool"),
            Err(AgentError::DecisionParse(_))
        ));
        assert!(matches!(
            parse_decision("{\"action\": \"WAIT\"}"),
            Err(AgentError::DecisionParse(m)) if m.contains("WAIT")
        ));
    }

    #[test]
    fn test_parse_subqueries() {
        assert_eq!(
            parse_subqueries("[\"List users\", \"Find alice\"]").unwrap(),
            vec!["List users".to_string(), "Find alice".to_string()]
        );
        assert!(parse_subqueries("not json").is_none());
        assert!(parse_subqueries("[]").is_none());
    }

    #[test]
    fn test_schema_mentions_fields() {
        let schema = decision_schema_json();
        assert!(schema.contains("action"));
        assert!(schema.contains("focal_object"));
    }
}
