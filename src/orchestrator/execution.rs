//! 执行步骤：能力调用与代码执行，各自带可选的人工确认闸门

use std::collections::BTreeMap;

use crate::cache::{render, ObjectCache, Value};
use crate::capability::{InvocationContext, ERROR_PREFIX};
use crate::core::{
    ActionSignal, AgentError, AgentMessage, AgentState, Component, Role, ToolCallRequest,
};
use crate::llm::ToolDefinition;
use crate::orchestrator::engine::Step;
use crate::orchestrator::events::{preview, OrchestratorEvent};
use crate::orchestrator::manager::call_text;
use crate::orchestrator::{history, prompts, Orchestrator};
use crate::retrieval::DescribeOptions;
use crate::sandbox::{extract_code, focal_variable, SandboxRequest};

const NO_CALL_REQUESTED: &str = "No capability call was requested.";

impl Orchestrator {
    pub(crate) async fn capability_step(&self, state: &mut AgentState) -> Step {
        let Some(focal) = state.focal.clone() else {
            tracing::warn!("capability step without a focal object");
            state.next_action = ActionSignal::Error;
            return Step::Manager;
        };

        let all = self.materializer.materialize(&focal.object);
        let selected = self
            .retriever
            .select_capabilities(&state.current_query, all.clone(), self.settings.capability_k)
            .await;
        let tools: Vec<ToolDefinition> = selected.iter().map(|c| c.tool_definition()).collect();

        let prompt = prompts::capability_prompt(
            &state.current_query,
            &self.class_info(&focal.object),
            &render_cache(&state.cache),
            &previous_attempt(state, Component::CapabilityAgent, Component::CapabilityExecution),
        );
        let mut messages = vec![AgentMessage::system(prompts::CAPABILITY_SYSTEM)];
        messages.extend(history::window(
            state,
            &[
                Component::Decomposer,
                Component::Manager,
                Component::CodeAgent,
                Component::CodeExecution,
            ],
            self.settings.history_window,
        ));
        messages.push(AgentMessage::user(prompt));

        let reply = match self.llm.invoke(&messages, Some(tools.as_slice())).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "capability agent call failed");
                let text = format!("{ERROR_PREFIX} {}", AgentError::Llm(e));
                return self.record_result(state, Component::CapabilityExecution, text, None);
            }
        };
        state.push(
            state
                .message(Role::Assistant, reply.content.clone(), Component::CapabilityAgent)
                .with_tool_calls(reply.tool_calls.clone()),
        );

        // 只采用第一个能力调用
        let Some(call) = reply.tool_calls.first().cloned() else {
            tracing::info!("capability agent answered without a call");
            return self.record_result(
                state,
                Component::CapabilityExecution,
                NO_CALL_REQUESTED.to_string(),
                None,
            );
        };
        self.emit(OrchestratorEvent::CapabilityCall {
            capability: call.name.clone(),
            args: call.args.clone(),
        });

        if self.settings.human_confirmation {
            let content = format!(
                "Capability step:\n{}\nCapability call: {} {}",
                reply.content, call.name, call.args
            );
            if !self.confirm(&content).await {
                return self.decline(state, Component::CapabilityAgent);
            }
        }

        let Some(capability) = all.iter().find(|c| c.name() == call.name) else {
            let text = format!("{ERROR_PREFIX} {}", AgentError::UnknownCapability(call.name));
            return self.record_result(state, Component::CapabilityExecution, text, None);
        };
        let outcome = capability
            .invoke(
                &focal.object,
                call_args(&call),
                InvocationContext {
                    cache: &mut state.cache,
                    request: &state.user_query,
                    api: state.api.clone(),
                },
            )
            .await;
        tracing::info!(
            capability = %call.name,
            ok = outcome.ok,
            "capability executed"
        );
        self.record_result(state, Component::CapabilityExecution, outcome.text, outcome.raw)
    }

    pub(crate) async fn code_step(&self, state: &mut AgentState) -> Step {
        let focal = state.focal.as_ref().map(|f| f.object.clone());
        let capabilities = self
            .retriever
            .describe(
                &state.current_query,
                None,
                DescribeOptions::top(self.settings.code_k).with_remaining(),
            )
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "capability retrieval failed for code agent");
                String::new()
            });

        let mut globals = Vec::new();
        if let Some(obj) = &focal {
            globals.push(format!(
                "- `{}`: the current {} object",
                focal_variable(obj.type_name()),
                obj.type_name()
            ));
        }
        globals.push("- `object_cache`: map of cache key to cached value".to_string());
        globals.push("- `initial_query`: the original user request".to_string());
        globals.push("- `api_session`: the top-level API session (unit if none)".to_string());
        globals.push("- `get_from_cache(key)`: the cached value under `key`".to_string());
        globals.push("- `output(value)`: report a result".to_string());

        let prompt = prompts::code_prompt(
            &state.current_query,
            &capabilities,
            &globals.join("\n"),
            &render_cache(&state.cache),
            &previous_attempt(state, Component::CodeAgent, Component::CodeExecution),
        );
        let mut messages = vec![AgentMessage::system(prompts::CODE_SYSTEM)];
        messages.extend(history::window(
            state,
            &[
                Component::Decomposer,
                Component::Manager,
                Component::CapabilityAgent,
            ],
            self.settings.history_window,
        ));
        messages.push(AgentMessage::user(prompt));

        let code = match self.llm.complete(&messages).await {
            Ok(reply) => extract_code(&reply),
            Err(e) => {
                tracing::warn!(error = %e, "code agent call failed");
                let text = format!("Error: {}", AgentError::Llm(e));
                return self.record_result(state, Component::CodeExecution, text, None);
            }
        };
        state.push(state.message(
            Role::Assistant,
            format!("```rhai\n{code}\n```"),
            Component::CodeAgent,
        ));
        self.emit(OrchestratorEvent::CodeGenerated { code: code.clone() });

        if self.settings.human_confirmation {
            let content = format!("Code execution step:\n```rhai\n{code}\n```");
            if !self.confirm(&content).await {
                return self.decline(state, Component::CodeAgent);
            }
        }

        let result = self
            .sandbox
            .run(SandboxRequest {
                code,
                focal,
                cache: std::mem::take(&mut state.cache),
                request: state.user_query.clone(),
                api: state.api.clone(),
            })
            .await;
        state.cache = result.cache;
        if let Some(e) = &result.error {
            tracing::info!(error = %e, "generated code raised an error");
        }
        if result.outputs == 0 {
            state.cache.set_last_output(Value::Str(result.text.clone()));
        }
        self.push_observation(state, Component::CodeExecution, result.text);
        Step::Synthesize
    }

    async fn confirm(&self, content: &str) -> bool {
        self.emit(OrchestratorEvent::Confirmation {
            content: content.to_string(),
        });
        self.confirmation.ask(content).await
    }

    /// 拒绝：撤回刚追加的智能体消息，回到决策
    fn decline(&self, state: &mut AgentState, component: Component) -> Step {
        state.rollback(component);
        tracing::info!(component = ?component, "action declined");
        self.emit(OrchestratorEvent::Declined { component });
        Step::Manager
    }

    /// 写入最后输出与自动注册，并追加执行结果消息
    fn record_result(
        &self,
        state: &mut AgentState,
        source: Component,
        text: String,
        raw: Option<Value>,
    ) -> Step {
        match raw {
            Some(raw) => {
                let registry = self.registry();
                let registered = state
                    .cache
                    .auto_register(&raw, |v| registry.is_capability_bearing(v));
                if !registered.is_empty() {
                    tracing::debug!(count = registered.len(), "results registered in cache");
                }
                state.cache.set_last_output(raw);
            }
            None => state.cache.set_last_output(Value::Str(text.clone())),
        }
        self.push_observation(state, source, text);
        Step::Synthesize
    }

    fn push_observation(&self, state: &mut AgentState, source: Component, text: String) {
        self.emit(OrchestratorEvent::Observation {
            source,
            preview: preview(&text),
        });
        state.push(state.message(Role::Tool, text, source));
    }

    /// 焦点对象的类型描述与最小编码
    fn class_info(&self, object: &crate::cache::ObjectRef) -> String {
        let description = self
            .registry()
            .resolve_object(object)
            .map(|spec| format!("class {}\n{}", spec.name, spec.description))
            .unwrap_or_else(|| format!("class {}", object.type_name()));
        let rendered = render::minimal(&Value::Object(object.clone()));
        let rendered = rendered.as_str().map(String::from).unwrap_or_else(|| rendered.to_string());
        format!("{description}\nInstance: {rendered}\n")
    }
}

fn render_cache(cache: &ObjectCache) -> String {
    let (entries, _) = cache.partition(|_| true);
    ObjectCache::render_minimal(&entries)
}

fn call_args(call: &ToolCallRequest) -> BTreeMap<String, Value> {
    match &call.args {
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(k, v)| (k.clone(), Value::from_json(v.clone())))
            .collect(),
        _ => BTreeMap::new(),
    }
}

/// 上一次综合判定为 CONTINUE 时，智能体看到自己上次的尝试与结果
fn previous_attempt(state: &AgentState, agent: Component, execution: Component) -> String {
    let continued = state.last_of(Component::Synthesizer).map_or(false, |m| {
        m.query_index == state.current_query_index
            && ActionSignal::from_synthesis(&m.content) == ActionSignal::Continue
    });
    if !continued {
        return String::new();
    }
    match (state.last_of(agent), state.last_of(execution)) {
        (Some(attempt), Some(result)) => format!(
            "Your last attempt:\n{}\n\nResulted in:\n{}\n\nMaybe try something different.\n",
            call_text(attempt),
            result.content
        ),
        _ => String::new(),
    }
}
