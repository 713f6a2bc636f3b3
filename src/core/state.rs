//! 会话状态：消息日志、组件子列表、子查询游标、动作信号、焦点对象与对象缓存
//!
//! AgentState 每个会话创建一次并贯穿所有步骤；子查询严格顺序处理，不跨并发共享。

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::{CacheKey, ObjectCache, ObjectRef};

/// 消息来源组件
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    User,
    Decomposer,
    Manager,
    CapabilityAgent,
    CodeAgent,
    Synthesizer,
    CapabilityExecution,
    CodeExecution,
    FinalResponse,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// 模型返回的结构化能力调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl ToolCallRequest {
    pub fn new(name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            name: name.into(),
            args,
        }
    }
}

/// 单条消息：带来源组件与所属子查询下标
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub source: Component,
    pub query_index: Option<usize>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,
    pub created_at: DateTime<Utc>,
}

impl AgentMessage {
    pub fn new(role: Role, content: impl Into<String>, source: Component) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            source,
            query_index: None,
            tool_calls: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content, Component::User)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content, Component::User)
    }

    pub fn assistant(content: impl Into<String>, source: Component) -> Self {
        Self::new(Role::Assistant, content, source)
    }

    pub fn tool(content: impl Into<String>, source: Component) -> Self {
        Self::new(Role::Tool, content, source)
    }

    pub fn with_query_index(mut self, index: Option<usize>) -> Self {
        self.query_index = index;
        self
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCallRequest>) -> Self {
        self.tool_calls = calls;
        self
    }
}

/// 动作信号：任一时刻恰有一个信号决定下一次转移
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionSignal {
    Tool,
    Code,
    Continue,
    Error,
    Decline,
    Done,
}

impl ActionSignal {
    /// 重试信号：进入决策时不前进到下一个子查询
    pub fn is_retry(self) -> bool {
        matches!(self, ActionSignal::Continue | ActionSignal::Error | ActionSignal::Decline)
    }

    /// 综合步骤的输出：包含 CONTINUE 视为继续，否则为终态回答
    pub fn from_synthesis(text: &str) -> Self {
        if text.contains("CONTINUE") {
            ActionSignal::Continue
        } else {
            ActionSignal::Done
        }
    }
}

impl fmt::Display for ActionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionSignal::Tool => "TOOL",
            ActionSignal::Code => "CODE",
            ActionSignal::Continue => "CONTINUE",
            ActionSignal::Error => "ERROR",
            ActionSignal::Decline => "DECLINE",
            ActionSignal::Done => "DONE",
        };
        f.write_str(s)
    }
}

/// 当前焦点对象（能力调用的目标）
#[derive(Clone, Debug)]
pub struct Focal {
    pub key: Option<CacheKey>,
    pub object: ObjectRef,
}

/// 会话状态
#[derive(Clone, Debug)]
pub struct AgentState {
    /// 用户原始请求
    pub user_query: String,
    pub messages: Vec<AgentMessage>,
    pub components: BTreeMap<Component, Vec<AgentMessage>>,
    pub decomposed_queries: Vec<String>,
    pub current_query_index: Option<usize>,
    pub current_query: String,
    /// 当前子查询的尝试次数（1 起计）
    pub attempts: u32,
    pub next_action: ActionSignal,
    pub focal: Option<Focal>,
    /// 顶层 API 会话句柄（注入组合能力的旁路参数）
    pub api: Option<ObjectRef>,
    pub cache: ObjectCache,
    pub errored: bool,
}

impl AgentState {
    /// 初始信号为 DONE：首次进入决策即前进到第 0 个子查询
    pub fn new(user_query: impl Into<String>, queries: Vec<String>, cache: ObjectCache) -> Self {
        Self {
            user_query: user_query.into(),
            messages: Vec::new(),
            components: BTreeMap::new(),
            decomposed_queries: queries,
            current_query_index: None,
            current_query: String::new(),
            attempts: 0,
            next_action: ActionSignal::Done,
            focal: None,
            api: None,
            cache,
            errored: false,
        }
    }

    /// 追加消息：同时写入顶层日志与来源组件的子列表
    pub fn push(&mut self, message: AgentMessage) {
        self.components
            .entry(message.source)
            .or_default()
            .push(message.clone());
        self.messages.push(message);
    }

    /// 拒绝回滚：弹出最后一条顶层消息与该组件的最后一条消息，信号置为 DECLINE；不触碰缓存
    pub fn rollback(&mut self, component: Component) {
        self.messages.pop();
        if let Some(list) = self.components.get_mut(&component) {
            list.pop();
        }
        self.next_action = ActionSignal::Decline;
    }

    pub fn component_messages(&self, component: Component) -> &[AgentMessage] {
        self.components
            .get(&component)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn last_of(&self, component: Component) -> Option<&AgentMessage> {
        self.component_messages(component).last()
    }

    pub fn is_last_query(&self) -> bool {
        match self.current_query_index {
            Some(i) => i + 1 >= self.decomposed_queries.len(),
            None => self.decomposed_queries.is_empty(),
        }
    }

    /// 新消息默认带当前子查询下标
    pub fn message(&self, role: Role, content: impl Into<String>, source: Component) -> AgentMessage {
        AgentMessage::new(role, content, source).with_query_index(self.current_query_index)
    }
}

/// 会话退出原因
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Completed,
    RetryBudget,
    StepBudget,
    Cancelled,
    NoQueries,
}

/// `run_session` 的结果
#[derive(Clone, Debug)]
pub struct SessionOutcome {
    pub messages: Vec<AgentMessage>,
    pub final_answer: Option<String>,
    pub errored: bool,
    pub cache: ObjectCache,
    pub exit: ExitReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollback_pops_last_message_and_component_entry() {
        let mut state = AgentState::new("q", vec!["q".into()], ObjectCache::new());
        state.push(AgentMessage::assistant("decide", Component::Manager));
        state.push(AgentMessage::assistant("call", Component::CapabilityAgent));
        let before_manager = state.component_messages(Component::Manager).len();

        state.rollback(Component::CapabilityAgent);
        assert_eq!(state.messages.len(), 1);
        assert!(state.component_messages(Component::CapabilityAgent).is_empty());
        assert_eq!(state.component_messages(Component::Manager).len(), before_manager);
        assert_eq!(state.next_action, ActionSignal::Decline);
    }

    #[test]
    fn test_synthesis_signal_parsing() {
        assert_eq!(ActionSignal::from_synthesis("CONTINUE"), ActionSignal::Continue);
        assert_eq!(ActionSignal::from_synthesis("The answer is 4."), ActionSignal::Done);
        assert!(ActionSignal::Error.is_retry());
        assert!(!ActionSignal::Tool.is_retry());
    }

    #[test]
    fn test_message_serializes_with_component() {
        let msg = AgentMessage::tool("result", Component::CodeExecution).with_query_index(Some(2));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["source"], "code_execution");
        assert_eq!(json["role"], "tool");
        assert_eq!(json["query_index"], 2);
    }
}
