//! 编排器构建器：统一的初始化逻辑（注册表、检索索引、沙箱、确认与检查点）

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::capability::{Materializer, Registry};
use crate::config::{AppConfig, EngineSection, SandboxSection};
use crate::core::{
    AgentError, AutoApprove, CheckpointStore, ConfirmationChannel, MemoryCheckpointStore,
    SchedulingMode, SqliteCheckpointStore, StdinConfirmation,
};
use crate::llm::{create_embedder_from_config, EmbeddingProvider, HashEmbedder, LlmClient, OpenAiClient};
use crate::orchestrator::{Orchestrator, OrchestratorEvent};
use crate::retrieval::{CapabilityIndex, CapabilityRetriever, Reranker};
use crate::sandbox::CodeSandbox;

const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

pub struct OrchestratorBuilder {
    registry: Registry,
    llm: Option<Arc<dyn LlmClient>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    index: Option<CapabilityIndex>,
    reranker: Option<Arc<dyn Reranker>>,
    candidate_k: usize,
    confirmation: Option<Arc<dyn ConfirmationChannel>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    settings: EngineSection,
    sandbox: SandboxSection,
    events: Option<mpsc::UnboundedSender<OrchestratorEvent>>,
    cancel: Option<CancellationToken>,
}

impl OrchestratorBuilder {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            llm: None,
            embedder: None,
            index: None,
            reranker: None,
            candidate_k: 20,
            confirmation: None,
            checkpoints: None,
            settings: EngineSection::default(),
            sandbox: SandboxSection::default(),
            events: None,
            cancel: None,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_index(mut self, index: CapabilityIndex) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn with_candidate_k(mut self, candidate_k: usize) -> Self {
        self.candidate_k = candidate_k;
        self
    }

    pub fn with_confirmation(mut self, channel: Arc<dyn ConfirmationChannel>) -> Self {
        self.confirmation = Some(channel);
        self
    }

    pub fn with_checkpoints(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn with_settings(mut self, settings: EngineSection) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_sandbox(mut self, sandbox: SandboxSection) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// 是否在执行能力 / 代码前请求人工确认
    pub fn with_human_confirmation(mut self, enabled: bool) -> Self {
        self.settings.human_confirmation = enabled;
        self
    }

    pub fn with_step_budget(mut self, budget: usize) -> Self {
        self.settings.step_budget = budget;
        self
    }

    pub fn with_event_tx(mut self, tx: mpsc::UnboundedSender<OrchestratorEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// 构建并确保能力索引可用（空索引或嵌入模型变化时重建）
    pub async fn build(self) -> Result<Orchestrator, AgentError> {
        let llm = self
            .llm
            .ok_or_else(|| AgentError::Config("no model client configured".into()))?;
        let registry = Arc::new(self.registry);
        let materializer =
            Materializer::new(registry).with_full_doc_strings(self.settings.full_doc_strings);

        let index = match self.index {
            Some(index) => index,
            None => CapabilityIndex::in_memory()?,
        };
        let embedder: Arc<dyn EmbeddingProvider> = match self.embedder {
            Some(embedder) => embedder,
            None => Arc::new(HashEmbedder::default()),
        };
        let mut retriever = CapabilityRetriever::new(materializer.clone(), index, embedder)
            .with_candidate_k(self.candidate_k);
        if let Some(reranker) = self.reranker {
            retriever = retriever.with_reranker(reranker);
        }
        retriever.ensure_index().await?;

        let sandbox = CodeSandbox::new(materializer.clone())
            .with_timeout(Duration::from_secs(self.sandbox.timeout_secs))
            .with_max_operations(self.sandbox.max_operations);

        let confirmation: Arc<dyn ConfirmationChannel> = match self.confirmation {
            Some(channel) => channel,
            None if self.settings.human_confirmation => Arc::new(StdinConfirmation),
            None => Arc::new(AutoApprove),
        };
        let checkpoints: Arc<dyn CheckpointStore> = match self.checkpoints {
            Some(store) => store,
            None => Arc::new(MemoryCheckpointStore::new()),
        };

        tracing::info!(
            types = materializer.registry().type_names().count(),
            step_budget = self.settings.step_budget,
            human_confirmation = self.settings.human_confirmation,
            "orchestrator ready"
        );

        Ok(Orchestrator {
            llm,
            retriever: Arc::new(retriever),
            materializer,
            sandbox,
            confirmation,
            checkpoints,
            settings: self.settings,
            events: self.events,
            cancel: self.cancel.unwrap_or_default(),
        })
    }
}

impl Orchestrator {
    /// 从配置构建：OpenAI 兼容模型（未传入客户端时）、持久化索引与检查点（配置了路径时）
    pub async fn from_config(
        config: &AppConfig,
        registry: Registry,
        llm: Option<Arc<dyn LlmClient>>,
    ) -> anyhow::Result<Orchestrator> {
        let llm: Arc<dyn LlmClient> = match llm {
            Some(llm) => llm,
            None => Arc::new(OpenAiClient::from_config(&config.llm)),
        };
        let embedder = create_embedder_from_config(
            config.retrieval.embedding_base_url.as_deref(),
            config
                .retrieval
                .embedding_model
                .as_deref()
                .unwrap_or(DEFAULT_EMBEDDING_MODEL),
            None,
        );
        let index = match &config.retrieval.index_path {
            Some(path) => CapabilityIndex::open(path)
                .with_context(|| format!("opening capability index at {}", path.display()))?,
            None => CapabilityIndex::in_memory()?,
        };

        let mut builder = OrchestratorBuilder::new(registry)
            .with_llm(llm)
            .with_embedder(embedder)
            .with_index(index)
            .with_candidate_k(config.retrieval.candidate_k)
            .with_settings(config.engine.clone())
            .with_sandbox(config.sandbox.clone());

        if let Some(path) = &config.checkpoint.path {
            let session_id = uuid::Uuid::new_v4().to_string();
            let store = SqliteCheckpointStore::open(path, session_id)
                .with_context(|| format!("opening checkpoint store at {}", path.display()))?;
            builder = builder.with_checkpoints(Arc::new(store));
        }
        // 协作式前端通过 with_confirmation 接入通道确认；这里只装配阻塞式
        if config.engine.human_confirmation && config.engine.scheduling == SchedulingMode::Blocking {
            builder = builder.with_confirmation(Arc::new(StdinConfirmation));
        }

        Ok(builder.build().await?)
    }
}
