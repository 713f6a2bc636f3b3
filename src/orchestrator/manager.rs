//! 决策步骤：选择 TOOL / CODE 与焦点对象

use crate::cache::{CacheKey, ObjectCache, Value};
use crate::core::{
    ActionSignal, AgentError, AgentMessage, AgentState, CacheError, Component, ExitReason, Focal,
    Role,
};
use crate::orchestrator::engine::Step;
use crate::orchestrator::events::OrchestratorEvent;
use crate::orchestrator::parse::parse_decision;
use crate::orchestrator::{history, prompts, Orchestrator};
use crate::retrieval::DescribeOptions;

impl Orchestrator {
    pub(crate) async fn manager_step(&self, state: &mut AgentState) -> Step {
        let incoming = state.next_action;
        if incoming.is_retry() {
            if state.attempts >= self.settings.max_attempts {
                let index = state.current_query_index.unwrap_or(0);
                tracing::warn!(
                    query_index = index,
                    attempts = state.attempts,
                    "retry budget exhausted"
                );
                self.emit(OrchestratorEvent::RetryExhausted {
                    query_index: index,
                    attempts: state.attempts,
                });
                return Step::Terminal(ExitReason::RetryBudget);
            }
            state.attempts += 1;
        } else {
            let next = state.current_query_index.map_or(0, |i| i + 1);
            let Some(query) = state.decomposed_queries.get(next).cloned() else {
                return Step::Terminal(ExitReason::Completed);
            };
            state.current_query_index = Some(next);
            state.current_query = query;
            state.attempts = 1;
            tracing::info!(query_index = next, query = %state.current_query, "subquery started");
        }

        let messages = self.manager_messages(state, incoming).await;
        let raw = match self.llm.complete(&messages).await {
            Ok(raw) => raw,
            Err(e) => return self.decision_failed(state, String::new(), AgentError::Llm(e)),
        };
        let registry = self.registry();
        let decision = parse_decision(&raw).and_then(|(action, key)| {
            resolve_focal(state, action, key, |v| registry.is_capability_bearing(v))
                .map(|f| (action, f))
        });
        let (action, focal) = match decision {
            Ok(decision) => decision,
            Err(e) => return self.decision_failed(state, raw, e),
        };

        state.push(state.message(Role::Assistant, raw, Component::Manager));
        if focal.is_some() {
            state.focal = focal;
        } else if state.focal.is_none() {
            state.focal = self.api_focal(state);
        }
        state.next_action = action;
        let focal_key = state
            .focal
            .as_ref()
            .and_then(|f| f.key.as_ref())
            .map(|k| k.to_string());
        tracing::info!(action = %action, focal = ?focal_key, "manager decision");
        self.emit(OrchestratorEvent::Decision {
            action,
            focal: focal_key,
        });

        match action {
            ActionSignal::Tool => Step::Capability,
            _ => Step::Code,
        }
    }

    async fn manager_messages(&self, state: &AgentState, incoming: ActionSignal) -> Vec<AgentMessage> {
        let registry = self.registry();
        let (bearing, other) = state.cache.partition(|v| registry.is_capability_bearing(v));
        let capabilities = self
            .retriever
            .describe(
                &state.current_query,
                None,
                DescribeOptions::top(self.settings.manager_k),
            )
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "capability retrieval failed for manager");
                String::new()
            });
        let prompt = prompts::manager_prompt(
            &state.current_query,
            &ObjectCache::render_minimal(&bearing),
            &ObjectCache::render_minimal(&other),
            &capabilities,
            &manager_feedback(state, incoming),
        );

        let mut messages = vec![AgentMessage::system(prompts::MANAGER_SYSTEM)];
        messages.extend(history::window(
            state,
            &[Component::Decomposer],
            self.settings.history_window,
        ));
        messages.push(AgentMessage::user(prompt));
        messages
    }

    /// 决策失败不致命：原文连同错误写入日志，信号置 ERROR 再决策一次
    fn decision_failed(&self, state: &mut AgentState, raw: String, error: AgentError) -> Step {
        tracing::warn!(error = %error, "manager decision rejected");
        let content = format!("{raw}\n\nThis gave the following error: {error}");
        state.push(state.message(Role::Assistant, content, Component::Manager));
        state.next_action = ActionSignal::Error;
        self.emit(OrchestratorEvent::Decision {
            action: ActionSignal::Error,
            focal: None,
        });
        Step::Manager
    }

    fn api_focal(&self, state: &AgentState) -> Option<Focal> {
        let api = state.api.clone()?;
        let target = Value::Object(api.clone());
        let key = state
            .cache
            .iter()
            .find(|(_, v)| **v == target)
            .map(|(k, _)| k.clone());
        Some(Focal { key, object: api })
    }
}

/// TOOL 必须指向缓存中具备能力的对象；CODE 的焦点对象可选
fn resolve_focal(
    state: &AgentState,
    action: ActionSignal,
    key: Option<String>,
    is_bearing: impl Fn(&Value) -> bool,
) -> Result<Option<Focal>, AgentError> {
    let tool = action == ActionSignal::Tool;
    let Some(key) = key else {
        return if tool {
            Err(AgentError::DecisionParse(
                "TOOL requires a focal_object cache key".into(),
            ))
        } else {
            Ok(None)
        };
    };
    let Some(value) = state.cache.get(&key) else {
        return if tool {
            Err(CacheError::NotFound(key).into())
        } else {
            Ok(None)
        };
    };
    match value.as_object() {
        Some(obj) if !tool || is_bearing(value) => Ok(Some(Focal {
            key: CacheKey::parse(&key),
            object: obj.clone(),
        })),
        _ if tool => Err(CacheError::NotCapabilityBearing {
            key,
            found: value.kind().to_string(),
        }
        .into()),
        _ => Ok(None),
    }
}

/// 决策 prompt 的"上次输出"段落
fn manager_feedback(state: &AgentState, incoming: ActionSignal) -> String {
    let Some(last) = state.last_of(Component::Manager) else {
        return String::new();
    };
    match incoming {
        ActionSignal::Error => format!("Your last failed output:\n{}\nTry again.\n", last.content),
        ActionSignal::Continue => {
            let (agent, execution) = match parse_decision(&last.content) {
                Ok((ActionSignal::Tool, _)) => {
                    (Component::CapabilityAgent, Component::CapabilityExecution)
                }
                _ => (Component::CodeAgent, Component::CodeExecution),
            };
            let mut resulted = String::new();
            if let Some(m) = state.last_of(agent) {
                resulted.push_str(&call_text(m));
                resulted.push('\n');
            }
            if let Some(m) = state.last_of(execution) {
                resulted.push_str(&m.content);
            }
            format!(
                "Your last output:\n{}\n\nResulted in:\n{}\n\nMaybe try something different.\n",
                last.content, resulted
            )
        }
        _ => String::new(),
    }
}

/// 智能体消息的可读形式：文本加能力调用
pub(crate) fn call_text(message: &AgentMessage) -> String {
    let mut out = message.content.clone();
    for call in &message.tool_calls {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!("Capability call: {} {}", call.name, call.args));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::testing::Workspace;
    use crate::capability::Registry;
    use crate::core::ToolCallRequest;

    fn bearing(v: &Value) -> bool {
        let mut registry = Registry::new();
        registry.register::<Workspace>();
        registry.is_capability_bearing(v)
    }

    fn state_with_workspace() -> (AgentState, String) {
        let mut cache = ObjectCache::new();
        let key = cache.put(Value::object(Workspace::demo()));
        cache.put(Value::from("plain"));
        (AgentState::new("q", vec!["q".into()], cache), key.to_string())
    }

    #[test]
    fn test_tool_requires_cached_object() {
        let (state, key) = state_with_workspace();
        let focal = resolve_focal(&state, ActionSignal::Tool, Some(key.clone()), bearing).unwrap();
        assert_eq!(focal.unwrap().key.unwrap().as_str(), key);

        assert!(matches!(
            resolve_focal(&state, ActionSignal::Tool, Some("_USER_00000000".into()), bearing),
            Err(AgentError::Cache(CacheError::NotFound(_)))
        ));
        assert!(matches!(
            resolve_focal(&state, ActionSignal::Tool, None, bearing),
            Err(AgentError::DecisionParse(_))
        ));
    }

    #[test]
    fn test_tool_rejects_plain_data() {
        let (state, _) = state_with_workspace();
        let (str_key, _) = state
            .cache
            .iter()
            .find(|(_, v)| v.as_str().is_some())
            .unwrap();
        let err = resolve_focal(&state, ActionSignal::Tool, Some(str_key.to_string()), bearing).unwrap_err();
        assert!(matches!(err, AgentError::Cache(CacheError::NotCapabilityBearing { .. })));
        assert!(resolve_focal(&state, ActionSignal::Code, Some(str_key.to_string()), bearing)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_feedback_after_error_and_continue() {
        let (mut state, key) = state_with_workspace();
        state.push(AgentMessage::assistant(
            format!("{{\"action\": \"TOOL\", \"focal_object\": \"{key}\"}}"),
            Component::Manager,
        ));
        state.push(
            AgentMessage::assistant("", Component::CapabilityAgent)
                .with_tool_calls(vec![ToolCallRequest::new("get_users", serde_json::json!({}))]),
        );
        state.push(AgentMessage::tool("[]", Component::CapabilityExecution));

        let error = manager_feedback(&state, ActionSignal::Error);
        assert!(error.starts_with("Your last failed output:"));
        assert!(error.ends_with("Try again.\n"));

        let cont = manager_feedback(&state, ActionSignal::Continue);
        assert!(cont.contains("Capability call: get_users {}"));
        assert!(cont.contains("Resulted in:\n"));
        assert!(cont.ends_with("Maybe try something different.\n"));

        assert!(manager_feedback(&state, ActionSignal::Decline).is_empty());
    }
}
