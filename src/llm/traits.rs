//! 模型调用抽象
//!
//! `complete` 返回纯文本；`invoke` 可附带可用能力，回复可能携带一个结构化能力调用。
//! 默认的 `invoke` 把能力 Schema 写进 system 消息，再从文本中解析 `{"tool", "args"}`。

use async_trait::async_trait;
use serde::Serialize;

use crate::capability::tool_call_schema_json;
use crate::core::{AgentMessage, ToolCallRequest};
use crate::llm::output::parse_tool_reply;

/// 提供给模型的能力定义
#[derive(Clone, Debug, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// 模型回复：文本与（可能的）能力调用
#[derive(Clone, Debug, Default)]
pub struct ModelReply {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl ModelReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            content: String::new(),
            tool_calls: vec![ToolCallRequest::new(name, args)],
        }
    }
}

/// 能力清单与调用格式说明（拼入 system 消息）
pub fn tools_prompt(tools: &[ToolDefinition]) -> String {
    let listing = serde_json::to_string_pretty(tools).unwrap_or_else(|_| "[]".to_string());
    format!(
        "You can call exactly one of the following capabilities:\n{listing}\n\n\
         To call one, reply with a single JSON object matching this schema:\n{}\n\
         Reply with plain text only if no capability applies.",
        tool_call_schema_json()
    )
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[AgentMessage]) -> Result<String, String>;

    /// 附带可用能力的调用
    async fn invoke(
        &self,
        messages: &[AgentMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<ModelReply, String> {
        match tools {
            Some(tools) if !tools.is_empty() => {
                let mut with_tools = Vec::with_capacity(messages.len() + 1);
                with_tools.push(AgentMessage::system(tools_prompt(tools)));
                with_tools.extend_from_slice(messages);
                let content = self.complete(&with_tools).await?;
                Ok(parse_tool_reply(content))
            }
            _ => Ok(ModelReply::text(self.complete(messages).await?)),
        }
    }

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
