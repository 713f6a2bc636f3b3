//! capability-agent - 面向领域对象的多步骤编排智能体
//!
//! 模块划分：
//! - **cache**: 对象缓存（缓存键、值树、引用解析、最小 / 扩展渲染）
//! - **capability**: 能力注册表、物化器、参数 Schema 与文档裁剪
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误、会话状态、检查点、人工确认、调度模式
//! - **llm**: 模型客户端抽象与实现（OpenAI 兼容 / 脚本化 Mock）与嵌入
//! - **observability**: tracing subscriber 初始化
//! - **orchestrator**: 决策 → 能力调用或代码执行 → 综合 的状态机
//! - **retrieval**: 能力检索（SQLite 向量索引 + 重排序）
//! - **sandbox**: Rhai 代码执行沙箱

pub mod cache;
pub mod capability;
pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod orchestrator;
pub mod retrieval;
pub mod sandbox;

pub use cache::{CacheKey, DomainObject, ObjectCache, ObjectRef, Value};
pub use capability::{CapabilityType, MethodSpec, Registry, TypeSpec};
pub use core::{ActionSignal, AgentError, ExitReason, SessionOutcome};
pub use orchestrator::{Conversation, Orchestrator, OrchestratorBuilder, OrchestratorEvent};
