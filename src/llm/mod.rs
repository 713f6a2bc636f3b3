//! LLM 层：模型调用抽象、OpenAI 兼容实现、嵌入与脚本化 Mock

pub mod embedding;
pub mod mock;
pub mod openai;
pub mod output;
pub mod traits;

pub use embedding::{create_embedder_from_config, EmbeddingProvider, HashEmbedder, OpenAiEmbedder};
pub use mock::ScriptedLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{tools_prompt, LlmClient, ModelReply, ToolDefinition};
