//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；执行结果以观察文本回给模型。
//! 带能力的调用走原生 function calling；端点不返回结构化调用时回退到文本解析。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionMessageToolCalls, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionResponseMessage, ChatCompletionTool,
    ChatCompletionTools, CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    FunctionObject,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::config::LlmSection;
use crate::core::{AgentMessage, Role, ToolCallRequest};
use crate::llm::output::parse_tool_reply;
use crate::llm::{LlmClient, ModelReply, ToolDefinition};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端：持有 Client、model 名与请求超时
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    request_timeout: Duration,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new()
                .with_api_base(url)
                .with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            request_timeout: Duration::from_secs(60),
            usage: TokenUsage::new(),
        }
    }

    /// 按 [llm] 段创建
    pub fn from_config(section: &LlmSection) -> Self {
        let mut client = Self::new(section.base_url.as_deref(), &section.model, None);
        client.request_timeout = Duration::from_secs(section.timeouts.request);
        client
    }

    fn to_openai_messages(
        &self,
        messages: &[AgentMessage],
    ) -> Result<Vec<ChatCompletionRequestMessage>, String> {
        messages
            .iter()
            .map(|m| {
                let message = match m.role {
                    Role::System => ChatCompletionRequestMessage::System(
                        ChatCompletionRequestSystemMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(|e| e.to_string())?,
                    ),
                    Role::User => ChatCompletionRequestMessage::User(
                        ChatCompletionRequestUserMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(|e| e.to_string())?,
                    ),
                    // 执行结果以观察文本的形式回给模型
                    Role::Tool => ChatCompletionRequestMessage::User(
                        ChatCompletionRequestUserMessageArgs::default()
                            .content(format!("Observation:\n{}", m.content))
                            .build()
                            .map_err(|e| e.to_string())?,
                    ),
                    Role::Assistant => {
                        let content = if m.tool_calls.is_empty() {
                            m.content.clone()
                        } else {
                            let calls = serde_json::to_string(&m.tool_calls).unwrap_or_default();
                            format!("{}\nTool-Calls: {}", m.content, calls)
                        };
                        ChatCompletionRequestMessage::Assistant(
                            ChatCompletionRequestAssistantMessageArgs::default()
                                .content(content)
                                .build()
                                .map_err(|e| e.to_string())?,
                        )
                    }
                };
                Ok(message)
            })
            .collect()
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, messages: &[AgentMessage]) -> Result<String, String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.to_openai_messages(messages)?)
            .build()
            .map_err(|e| e.to_string())?;
        let message = self.send(request).await?;
        Ok(message.and_then(|m| m.content).unwrap_or_default())
    }

    async fn invoke(
        &self,
        messages: &[AgentMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<ModelReply, String> {
        let tools = match tools {
            Some(tools) if !tools.is_empty() => tools,
            _ => return Ok(ModelReply::text(self.complete(messages).await?)),
        };
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.to_openai_messages(messages)?)
            .tools(tool_specs(tools))
            .build()
            .map_err(|e| e.to_string())?;
        let Some(message) = self.send(request).await? else {
            return Ok(ModelReply::default());
        };
        Ok(reply_from(
            message.content.unwrap_or_default(),
            message.tool_calls.unwrap_or_default(),
        ))
    }
}

impl OpenAiClient {
    /// 发送请求并累计 token；返回第一个 choice 的消息
    async fn send(
        &self,
        request: CreateChatCompletionRequest,
    ) -> Result<Option<ChatCompletionResponseMessage>, String> {
        let response = tokio::time::timeout(self.request_timeout, self.client.chat().create(request))
            .await
            .map_err(|_| format!("request timed out after {}s", self.request_timeout.as_secs()))?
            .map_err(|e| e.to_string())?;

        // 提取 token 使用统计
        if let Some(usage) = &response.usage {
            self.usage.add(
                usage.prompt_tokens as u64,
                usage.completion_tokens as u64,
            );
        }

        Ok(response.choices.into_iter().next().map(|c| c.message))
    }
}

fn tool_specs(tools: &[ToolDefinition]) -> Vec<ChatCompletionTools> {
    tools
        .iter()
        .map(|t| {
            ChatCompletionTools::Function(ChatCompletionTool {
                function: FunctionObject {
                    name: t.name.clone(),
                    description: Some(t.description.clone()),
                    parameters: Some(t.parameters.clone()),
                    strict: None,
                },
            })
        })
        .collect()
}

/// 结构化调用优先；没有时从文本中解析
fn reply_from(content: String, calls: Vec<ChatCompletionMessageToolCalls>) -> ModelReply {
    let tool_calls: Vec<ToolCallRequest> = calls
        .into_iter()
        .filter_map(|call| match call {
            ChatCompletionMessageToolCalls::Function(call) => {
                let args = serde_json::from_str(&call.function.arguments).unwrap_or_else(|e| {
                    tracing::warn!(error = %e, tool = %call.function.name, "tool arguments are not valid JSON");
                    serde_json::Value::Object(Default::default())
                });
                Some(ToolCallRequest::new(call.function.name, args))
            }
            ChatCompletionMessageToolCalls::Custom(_) => None,
        })
        .collect();
    if tool_calls.is_empty() {
        return parse_tool_reply(content);
    }
    ModelReply {
        content,
        tool_calls,
    }
}
