//! 外层流程：分解请求 → 状态机 → 汇总回答；多轮对话保留对象缓存

use std::sync::Arc;

use crate::cache::ObjectCache;
use crate::core::{AgentMessage, Component, SessionOutcome};
use crate::orchestrator::parse::parse_subqueries;
use crate::orchestrator::{prompts, Orchestrator};
use crate::retrieval::DescribeOptions;

impl Orchestrator {
    /// 完整请求：分解、执行子查询、生成最终回答
    pub async fn run_request(&self, user_query: &str, cache: ObjectCache) -> SessionOutcome {
        self.run_turn(user_query, cache, &[]).await
    }

    async fn run_turn(
        &self,
        user_query: &str,
        cache: ObjectCache,
        seed: &[AgentMessage],
    ) -> SessionOutcome {
        let queries = self.decompose(user_query).await;
        let listing = serde_json::to_string(&queries).unwrap_or_default();
        let mut state = self.new_state(user_query, queries, cache);
        for message in seed {
            state.push(message.clone());
        }
        state.push(AgentMessage::user(user_query));
        state.push(AgentMessage::assistant(listing, Component::Decomposer));

        let mut outcome = self.drive(state).await;
        if let Some(answer) = self.final_response(user_query, &outcome).await {
            outcome
                .messages
                .push(AgentMessage::assistant(answer.clone(), Component::FinalResponse));
            outcome.final_answer = Some(answer);
        }
        outcome
    }

    /// 分解为子查询；回复不合法时退化为原请求本身
    async fn decompose(&self, user_query: &str) -> Vec<String> {
        let capabilities = self
            .retriever
            .describe(
                user_query,
                None,
                DescribeOptions::top(self.settings.manager_k)
                    .with_remaining()
                    .with_all_types(),
            )
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "capability retrieval failed for decomposition");
                String::new()
            });
        let messages = [
            AgentMessage::system(prompts::DECOMPOSE_SYSTEM),
            AgentMessage::user(prompts::decompose_prompt(user_query, &capabilities)),
        ];
        let queries = match self.llm.complete(&messages).await {
            Ok(reply) => parse_subqueries(&reply),
            Err(e) => {
                tracing::warn!(error = %e, "decomposition call failed");
                None
            }
        };
        match queries {
            Some(queries) => {
                tracing::info!(count = queries.len(), "request decomposed");
                queries
            }
            None => {
                tracing::warn!("decomposition unusable; running the request as one subquery");
                vec![user_query.to_string()]
            }
        }
    }

    async fn final_response(&self, user_query: &str, outcome: &SessionOutcome) -> Option<String> {
        let responses: Vec<&str> = outcome
            .messages
            .iter()
            .filter(|m| m.source == Component::Synthesizer)
            .map(|m| m.content.as_str())
            .collect();
        if responses.is_empty() {
            return None;
        }
        let messages = [
            AgentMessage::system(prompts::FINAL_RESPONSE_SYSTEM),
            AgentMessage::user(prompts::final_response_prompt(
                user_query,
                &responses.join("\n\n"),
            )),
        ];
        match self.llm.complete(&messages).await {
            Ok(answer) => Some(answer.trim().to_string()),
            Err(e) => {
                tracing::warn!(error = %e, "final response call failed; keeping synthesis answer");
                None
            }
        }
    }
}

/// 多轮对话：对象缓存跨请求保留，新请求只带上一轮的问题与回答
pub struct Conversation {
    orchestrator: Arc<Orchestrator>,
    cache: ObjectCache,
    last_turn: Option<(String, String)>,
}

impl Conversation {
    pub fn new(orchestrator: Arc<Orchestrator>, cache: ObjectCache) -> Self {
        Self {
            orchestrator,
            cache,
            last_turn: None,
        }
    }

    pub async fn ask(&mut self, query: &str) -> SessionOutcome {
        let seed: Vec<AgentMessage> = match &self.last_turn {
            Some((question, answer)) => vec![
                AgentMessage::user(question.clone()),
                AgentMessage::assistant(answer.clone(), Component::FinalResponse),
            ],
            None => Vec::new(),
        };
        let cache = std::mem::take(&mut self.cache);
        let outcome = self.orchestrator.run_turn(query, cache, &seed).await;
        self.cache = outcome.cache.clone();
        self.last_turn = outcome
            .final_answer
            .clone()
            .map(|answer| (query.to_string(), answer));
        outcome
    }

    pub fn cache(&self) -> &ObjectCache {
        &self.cache
    }
}
