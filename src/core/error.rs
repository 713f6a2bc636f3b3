//! 引擎错误类型
//!
//! 决策解析、能力执行、代码执行、拒绝与重试耗尽都在状态机内部以数据（文本 / 标志）消化，
//! 只有步数预算耗尽会强制终止会话。`is_fatal` 区分这两类。

use thiserror::Error;

/// 编排引擎错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Decision parse error: {0}")]
    DecisionParse(String),

    #[error("Capability execution failed: {0}")]
    CapabilityExecution(String),

    #[error("Code execution failed: {0}")]
    CodeExecution(String),

    #[error("Retry budget exceeded after {attempts} attempts on subquery {index}")]
    RetryBudgetExceeded { index: usize, attempts: u32 },

    #[error("Step budget of {0} transitions exceeded")]
    StepBudgetExceeded(usize),

    #[error("Declined by user")]
    DeclinedByUser,

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
}

impl AgentError {
    /// 是否允许强制终止会话
    pub fn is_fatal(&self) -> bool {
        matches!(self, AgentError::StepBudgetExceeded(_) | AgentError::Cancelled)
    }
}

/// 对象缓存错误
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("No object cached under key {0}")]
    NotFound(String),

    #[error("Cached value {key} is a {found}, not a capability-bearing object")]
    NotCapabilityBearing { key: String, found: String },
}

/// 代码沙箱错误（在沙箱内部转为结果文本）
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("{0}")]
    Script(String),

    #[error("Execution exceeded the {0}s time limit")]
    Timeout(u64),

    #[error("Execution exceeded the operation budget")]
    OperationBudget,

    #[error("Worker crashed: {0}")]
    WorkerCrashed(String),
}

/// 能力检索错误
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Index error: {0}")]
    Index(String),
}

impl From<rusqlite::Error> for RetrievalError {
    fn from(e: rusqlite::Error) -> Self {
        RetrievalError::Index(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_budget_and_cancel_are_fatal() {
        assert!(AgentError::StepBudgetExceeded(50).is_fatal());
        assert!(AgentError::Cancelled.is_fatal());
        assert!(!AgentError::DecisionParse("x".into()).is_fatal());
        assert!(!AgentError::RetryBudgetExceeded { index: 0, attempts: 3 }.is_fatal());
        assert!(!AgentError::DeclinedByUser.is_fatal());
    }

    #[test]
    fn test_cache_error_converts() {
        let err: AgentError = CacheError::NotFound("_USER_1".into()).into();
        assert_eq!(err.to_string(), "No object cached under key _USER_1");
    }
}
