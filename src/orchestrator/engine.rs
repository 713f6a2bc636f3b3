//! 状态机主循环：取消检查、步数预算、每次转移写检查点

use crate::cache::{ObjectCache, ObjectRef, Value};
use crate::core::{
    ActionSignal, AgentError, AgentMessage, AgentState, Component, ExitReason, Focal,
    SchedulingMode, SessionOutcome, StateSnapshot,
};
use crate::orchestrator::events::OrchestratorEvent;
use crate::orchestrator::Orchestrator;

/// 状态机的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Manager,
    Capability,
    Code,
    Synthesize,
    Terminal(ExitReason),
}

impl Step {
    fn name(self) -> &'static str {
        match self {
            Step::Manager => "manager_decision",
            Step::Capability => "capability_execution",
            Step::Code => "code_execution",
            Step::Synthesize => "synthesize",
            Step::Terminal(_) => "terminal",
        }
    }
}

impl Orchestrator {
    /// 执行已分解的子查询序列
    pub async fn run_session(&self, queries: Vec<String>, cache: ObjectCache) -> SessionOutcome {
        let user_query = queries.join("\n");
        let mut state = self.new_state(&user_query, queries, cache);
        state.push(AgentMessage::user(user_query));
        self.drive(state).await
    }

    /// 以调用方选定的调度模式同步执行会话；不可在已有运行时内调用
    pub fn run_session_blocking(
        &self,
        mode: SchedulingMode,
        queries: Vec<String>,
        cache: ObjectCache,
    ) -> Result<SessionOutcome, AgentError> {
        let runtime = mode
            .build_runtime()
            .map_err(|e| AgentError::Config(format!("failed to build {mode:?} runtime: {e}")))?;
        Ok(runtime.block_on(self.run_session(queries, cache)))
    }

    /// 组合能力的子编排：以给定对象为焦点，对子查询执行一次能力调用（TOOL）或代码执行（CODE）。
    ///
    /// 不经过决策与综合；返回的状态中 `next_action` 为 DECLINE 表示被拒绝，
    /// 否则最后一条消息即执行结果。
    pub async fn run_subworkflow(
        &self,
        mut state: AgentState,
        action: ActionSignal,
        focal: ObjectRef,
        subquery: impl Into<String>,
    ) -> AgentState {
        let subquery = subquery.into();
        let index = match state.decomposed_queries.iter().position(|q| *q == subquery) {
            Some(i) => i,
            None => {
                state.decomposed_queries.push(subquery.clone());
                state.decomposed_queries.len() - 1
            }
        };
        let target = Value::Object(focal.clone());
        let key = state
            .cache
            .iter()
            .find(|(_, v)| **v == target)
            .map(|(k, _)| k.clone());
        state.focal = Some(Focal { key, object: focal });
        state.current_query_index = Some(index);
        state.current_query = subquery;
        state.next_action = action;

        let step = match action {
            ActionSignal::Tool => self.capability_step(&mut state).await,
            ActionSignal::Code => self.code_step(&mut state).await,
            other => {
                tracing::warn!(action = %other, "subworkflow needs TOOL or CODE");
                state.next_action = ActionSignal::Error;
                return state;
            }
        };
        tracing::debug!(state = step.name(), query_index = index, "subworkflow finished");
        state
    }

    /// 新会话状态；API 句柄取缓存中第一个 API 类型的对象
    pub(crate) fn new_state(&self, user_query: &str, queries: Vec<String>, cache: ObjectCache) -> AgentState {
        let api = self
            .registry()
            .api_type()
            .and_then(|t| cache.find_by_type(t))
            .and_then(|(_, v)| v.as_object().cloned());
        let mut state = AgentState::new(user_query, queries, cache);
        state.api = api;
        state
    }

    pub(crate) async fn drive(&self, mut state: AgentState) -> SessionOutcome {
        if state.decomposed_queries.is_empty() {
            tracing::warn!("session started without subqueries");
            return self.finish(state, ExitReason::NoQueries);
        }
        tracing::info!(
            subqueries = state.decomposed_queries.len(),
            cached = state.cache.len(),
            "session started"
        );

        let mut step = Step::Manager;
        let mut transitions = 0usize;
        let exit = loop {
            if let Step::Terminal(reason) = step {
                break reason;
            }
            if self.cancel.is_cancelled() {
                tracing::info!(transitions, "session cancelled");
                break ExitReason::Cancelled;
            }
            if transitions >= self.settings.step_budget {
                tracing::warn!(budget = self.settings.step_budget, "step budget exhausted");
                self.emit(OrchestratorEvent::StepBudgetExhausted {
                    budget: self.settings.step_budget,
                });
                self.read_back(&mut state).await;
                break ExitReason::StepBudget;
            }

            self.emit(OrchestratorEvent::StepStarted {
                step: transitions,
                state: step.name(),
                query_index: state.current_query_index,
            });
            tracing::debug!(
                step = transitions,
                state = step.name(),
                query_index = ?state.current_query_index,
                attempts = state.attempts,
                signal = %state.next_action,
                "transition"
            );
            step = self.transition(&mut state, step).await;
            transitions += 1;
            self.save_checkpoint(&state, transitions).await;
        };
        self.finish(state, exit)
    }

    async fn transition(&self, state: &mut AgentState, step: Step) -> Step {
        match step {
            Step::Manager => self.manager_step(state).await,
            Step::Capability => self.capability_step(state).await,
            Step::Code => self.code_step(state).await,
            Step::Synthesize => self.synthesize_step(state).await,
            Step::Terminal(reason) => Step::Terminal(reason),
        }
    }

    async fn save_checkpoint(&self, state: &AgentState, step: usize) {
        let snapshot = StateSnapshot::capture(state, step);
        if let Err(e) = self.checkpoints.save(&snapshot).await {
            tracing::warn!(error = %e, step, "checkpoint save failed");
        }
    }

    /// 步数预算耗尽：消息日志回到最后一个检查点，缓存保留当前的活对象
    async fn read_back(&self, state: &mut AgentState) {
        match self.checkpoints.load().await {
            Ok(Some(snapshot)) => {
                let restored = snapshot.restore();
                state.messages = restored.messages;
                state.components = restored.components;
                tracing::info!(step = snapshot.step, "state read back from checkpoint");
            }
            Ok(None) => tracing::warn!("no checkpoint to read back"),
            Err(e) => tracing::warn!(error = %e, "checkpoint read-back failed"),
        }
    }

    fn finish(&self, mut state: AgentState, exit: ExitReason) -> SessionOutcome {
        let errored = matches!(
            exit,
            ExitReason::RetryBudget | ExitReason::StepBudget | ExitReason::Cancelled
        );
        state.errored = errored;
        let final_answer = state
            .component_messages(Component::Synthesizer)
            .iter()
            .rev()
            .find(|m| ActionSignal::from_synthesis(&m.content) == ActionSignal::Done)
            .map(|m| m.content.clone());

        self.emit(OrchestratorEvent::Finished { exit, errored });
        tracing::info!(
            exit = ?exit,
            errored,
            messages = state.messages.len(),
            "session finished"
        );
        SessionOutcome {
            messages: state.messages,
            final_answer,
            errored,
            cache: state.cache,
            exit,
        }
    }
}
