//! 步骤可见的历史窗口

use crate::core::{AgentMessage, AgentState, Component, Role};

/// 执行结果已内联进 prompt，始终排除
const ALWAYS_EXCLUDED: [Component; 3] = [
    Component::CapabilityAgent,
    Component::CapabilityExecution,
    Component::CodeExecution,
];

/// 取最近 `limit` 条消息，排除执行结果与 `exclude` 中组件的消息
pub fn window(state: &AgentState, exclude: &[Component], limit: usize) -> Vec<AgentMessage> {
    let visible: Vec<&AgentMessage> = state
        .messages
        .iter()
        .filter(|m| m.role != Role::Tool)
        .filter(|m| !ALWAYS_EXCLUDED.contains(&m.source) && !exclude.contains(&m.source))
        .collect();
    let start = visible.len().saturating_sub(limit);
    let mut out: Vec<AgentMessage> = visible[start..].iter().map(|m| (*m).clone()).collect();

    // 不能以没有结果的能力调用结尾
    if out.last().map_or(false, |m| !m.tool_calls.is_empty()) {
        out.pop();
    }
    out
}
