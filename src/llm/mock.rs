//! 脚本化 Mock 客户端（用于测试，无需 API）
//!
//! 按顺序返回预置回复，并记录每次收到的消息，便于断言 prompt 内容。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::AgentMessage;
use crate::llm::{LlmClient, ModelReply, ToolDefinition};

/// 预置回复队列；耗尽后返回兜底回复（未设置则报错）
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<ModelReply>>,
    fallback: Option<ModelReply>,
    requests: Mutex<Vec<Vec<AgentMessage>>>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, reply: ModelReply) -> Self {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(reply);
        }
        self
    }

    pub fn text(self, content: impl Into<String>) -> Self {
        self.reply(ModelReply::text(content))
    }

    pub fn tool_call(self, name: impl Into<String>, args: serde_json::Value) -> Self {
        self.reply(ModelReply::tool_call(name, args))
    }

    pub fn with_fallback(mut self, content: impl Into<String>) -> Self {
        self.fallback = Some(ModelReply::text(content));
        self
    }

    /// 已收到的请求（每次调用的完整消息列表）
    pub fn requests(&self) -> Vec<Vec<AgentMessage>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|q| q.len()).unwrap_or(0)
    }

    fn next(&self, messages: &[AgentMessage]) -> Result<ModelReply, String> {
        if let Ok(mut r) = self.requests.lock() {
            r.push(messages.to_vec());
        }
        let next = self
            .replies
            .lock()
            .map_err(|_| "script lock poisoned".to_string())?
            .pop_front();
        next.or_else(|| self.fallback.clone())
            .ok_or_else(|| "scripted replies exhausted".to_string())
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[AgentMessage]) -> Result<String, String> {
        self.next(messages).map(|r| r.content)
    }

    async fn invoke(
        &self,
        messages: &[AgentMessage],
        _tools: Option<&[ToolDefinition]>,
    ) -> Result<ModelReply, String> {
        self.next(messages)
    }
}
