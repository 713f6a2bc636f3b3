//! 核心层：错误、会话状态、检查点、人工确认与调度模式

pub mod checkpoint;
pub mod confirm;
pub mod error;
pub mod runtime;
pub mod state;

pub use checkpoint::{
    CheckpointStore, MemoryCheckpointStore, SnapshotEntry, SqliteCheckpointStore, StateSnapshot,
};
pub use confirm::{
    AutoApprove, ChannelConfirmation, ConfirmationChannel, ConfirmationRequest, StdinConfirmation,
};
pub use error::{AgentError, CacheError, RetrievalError, SandboxError};
pub use runtime::SchedulingMode;
pub use state::{
    ActionSignal, AgentMessage, AgentState, Component, ExitReason, Focal, Role, SessionOutcome,
    ToolCallRequest,
};
