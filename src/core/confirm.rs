//! 人工确认闸门：阻塞式（标准输入）与事件驱动式（通道）两种实现，状态转移一致

use std::io::{BufRead, Write};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

/// 确认通道：展示待执行动作，返回是否批准
#[async_trait]
pub trait ConfirmationChannel: Send + Sync {
    async fn ask(&self, content: &str) -> bool;
}

/// 总是批准
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApprove;

#[async_trait]
impl ConfirmationChannel for AutoApprove {
    async fn ask(&self, _content: &str) -> bool {
        true
    }
}

/// 阻塞式确认：在阻塞线程池读取标准输入，直到输入 y / n
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinConfirmation;

#[async_trait]
impl ConfirmationChannel for StdinConfirmation {
    async fn ask(&self, content: &str) -> bool {
        let content = content.to_string();
        tokio::task::spawn_blocking(move || {
            let stdin = std::io::stdin();
            let mut stdout = std::io::stdout();
            loop {
                let _ = writeln!(stdout, "{content}\n\nApprove this action? [y/n]");
                let _ = stdout.flush();
                let mut line = String::new();
                match stdin.lock().read_line(&mut line) {
                    Ok(0) | Err(_) => return false,
                    Ok(_) => {}
                }
                match parse_answer(&line) {
                    Some(answer) => return answer,
                    None => {
                        let _ = writeln!(stdout, "Please answer 'y' or 'n'.");
                    }
                }
            }
        })
        .await
        .unwrap_or(false)
    }
}

fn parse_answer(line: &str) -> Option<bool> {
    match line.trim().to_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

/// 待前端回答的确认请求
#[derive(Debug)]
pub struct ConfirmationRequest {
    pub content: String,
    pub reply: oneshot::Sender<bool>,
}

/// 事件驱动确认：请求经通道发往前端，挂起等待回复；前端掉线视为拒绝
#[derive(Debug, Clone)]
pub struct ChannelConfirmation {
    tx: mpsc::UnboundedSender<ConfirmationRequest>,
}

impl ChannelConfirmation {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ConfirmationRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ConfirmationChannel for ChannelConfirmation {
    async fn ask(&self, content: &str) -> bool {
        let (reply, answer) = oneshot::channel();
        let request = ConfirmationRequest {
            content: content.to_string(),
            reply,
        };
        if self.tx.send(request).is_err() {
            tracing::warn!("confirmation receiver dropped; treating as decline");
            return false;
        }
        answer.await.unwrap_or(false)
    }
}
