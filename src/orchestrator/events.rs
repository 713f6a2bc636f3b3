//! 编排过程事件：供前端实时展示决策、能力调用、代码与观察

use serde::Serialize;

use crate::core::{ActionSignal, Component, ExitReason};

/// Observation 预览最大字符数
pub const PREVIEW_CHARS: usize = 200;

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    /// 进入一个状态（第几次转移）
    StepStarted {
        step: usize,
        state: &'static str,
        query_index: Option<usize>,
    },
    /// 决策结果
    Decision {
        action: ActionSignal,
        focal: Option<String>,
    },
    CapabilityCall {
        capability: String,
        args: serde_json::Value,
    },
    CodeGenerated { code: String },
    /// 执行结果（预览，避免过长）
    Observation { source: Component, preview: String },
    /// 等待人工确认
    Confirmation { content: String },
    Declined { component: Component },
    Synthesis { signal: ActionSignal, preview: String },
    RetryExhausted { query_index: usize, attempts: u32 },
    StepBudgetExhausted { budget: usize },
    Finished { exit: ExitReason, errored: bool },
}

pub(crate) fn preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_CHARS {
        format!("{}...", text.chars().take(PREVIEW_CHARS).collect::<String>())
    } else {
        text.to_string()
    }
}
