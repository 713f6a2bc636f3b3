//! 综合步骤：判断子查询是否已回答

use crate::core::{ActionSignal, AgentMessage, AgentState, Component, ExitReason, Role};
use crate::orchestrator::engine::Step;
use crate::orchestrator::events::{preview, OrchestratorEvent};
use crate::orchestrator::manager::call_text;
use crate::orchestrator::{history, prompts, Orchestrator};

impl Orchestrator {
    pub(crate) async fn synthesize_step(&self, state: &mut AgentState) -> Step {
        let prompt = prompts::synthesize_prompt(&state.current_query, &synthesis_context(state));
        let mut messages = vec![AgentMessage::system(prompts::SYNTHESIZE_SYSTEM)];
        messages.extend(history::window(
            state,
            &[Component::Decomposer],
            self.settings.history_window,
        ));
        messages.push(AgentMessage::user(prompt));

        let text = match self.llm.complete(&messages).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "synthesis call failed; treating as CONTINUE");
                ActionSignal::Continue.to_string()
            }
        };
        let signal = ActionSignal::from_synthesis(&text);
        self.emit(OrchestratorEvent::Synthesis {
            signal,
            preview: preview(&text),
        });
        state.push(state.message(Role::Assistant, text, Component::Synthesizer));
        state.next_action = signal;

        let answered = signal != ActionSignal::Continue;
        tracing::info!(
            signal = %signal,
            attempts = state.attempts,
            last_query = state.is_last_query(),
            "synthesis"
        );
        // 第三次尝试后无论判定如何都离开循环
        if state.attempts >= self.settings.max_attempts {
            if answered && state.is_last_query() {
                return Step::Terminal(ExitReason::Completed);
            }
            let index = state.current_query_index.unwrap_or(0);
            tracing::warn!(query_index = index, attempts = state.attempts, "retry budget exhausted");
            self.emit(OrchestratorEvent::RetryExhausted {
                query_index: index,
                attempts: state.attempts,
            });
            Step::Terminal(ExitReason::RetryBudget)
        } else if answered && state.is_last_query() {
            Step::Terminal(ExitReason::Completed)
        } else {
            Step::Manager
        }
    }
}

/// 最近一次动作与其结果
fn synthesis_context(state: &AgentState) -> String {
    let n = state.messages.len();
    if n < 2 {
        return String::new();
    }
    let action = &state.messages[n - 2];
    let result = &state.messages[n - 1];
    format!(
        "The last action:\n{}\nResulted in:\n{}",
        call_text(action),
        result.content
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ObjectCache;
    use crate::core::ToolCallRequest;

    #[test]
    fn test_context_shows_call_and_result() {
        let mut state = AgentState::new("q", vec!["q".into()], ObjectCache::new());
        state.push(
            AgentMessage::assistant("", Component::CapabilityAgent).with_tool_calls(vec![
                ToolCallRequest::new("find_user", serde_json::json!({ "username": "alice" })),
            ]),
        );
        state.push(AgentMessage::tool("{\"username\": \"alice\"}", Component::CapabilityExecution));
        let context = synthesis_context(&state);
        assert!(context.starts_with("The last action:\nCapability call: find_user"));
        assert!(context.ends_with("Resulted in:\n{\"username\": \"alice\"}"));
    }
}
