//! 编排状态机
//!
//! Decompose → ManagerDecision → {CapabilityExecution, CodeExecution, 出错回到 ManagerDecision}
//! → Synthesize → {ManagerDecision, Terminal}。每次转移写检查点；步数预算耗尽时读回检查点强制结束。

pub mod builder;
mod engine;
pub mod events;
mod execution;
mod flow;
pub mod history;
mod manager;
pub mod parse;
pub mod prompts;
mod synthesize;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::capability::{Materializer, Registry};
use crate::config::EngineSection;
use crate::core::{CheckpointStore, ConfirmationChannel};
use crate::llm::LlmClient;
use crate::retrieval::CapabilityRetriever;
use crate::sandbox::CodeSandbox;

pub use builder::OrchestratorBuilder;
pub use events::OrchestratorEvent;
pub use flow::Conversation;
pub use parse::{parse_decision, parse_subqueries, ManagerDecision};

/// 编排器：持有模型、检索器、物化器、沙箱与确认 / 检查点通道
pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    retriever: Arc<CapabilityRetriever>,
    materializer: Materializer,
    sandbox: CodeSandbox,
    confirmation: Arc<dyn ConfirmationChannel>,
    checkpoints: Arc<dyn CheckpointStore>,
    settings: EngineSection,
    events: Option<mpsc::UnboundedSender<OrchestratorEvent>>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn builder(registry: Registry) -> OrchestratorBuilder {
        OrchestratorBuilder::new(registry)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.materializer.registry()
    }

    pub fn retriever(&self) -> &Arc<CapabilityRetriever> {
        &self.retriever
    }

    pub fn settings(&self) -> &EngineSection {
        &self.settings
    }

    /// 取消令牌：取消后会话在下一次转移时结束
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn emit(&self, event: OrchestratorEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}
