//! 代码执行沙箱
//!
//! 生成的代码是 Rhai 脚本，在独立的阻塞线程上执行：操作数预算、墙钟截止时间与 panic 捕获
//! 共同保证死循环或崩溃不会波及编排器。只有工作线程正常返回时才采用它的对象缓存。

pub mod bridge;
pub mod rewrite;
pub mod worker;

use std::time::{Duration, Instant};

use tokio::runtime::Handle;

use crate::cache::{ObjectCache, ObjectRef};
use crate::capability::Materializer;
use crate::core::SandboxError;

pub use rewrite::{extract_code, inject_side_channel, SIDE_CHANNEL_ARGS};
pub use worker::{focal_variable, EMPTY_OUTPUT};

/// 一次代码执行请求
#[derive(Debug)]
pub struct SandboxRequest {
    pub code: String,
    pub focal: Option<ObjectRef>,
    pub cache: ObjectCache,
    /// 原始用户请求（`initial_query`）
    pub request: String,
    pub api: Option<ObjectRef>,
}

#[derive(Debug)]
pub struct SandboxResult {
    /// stdout + 日志 + 错误文本
    pub text: String,
    pub cache: ObjectCache,
    /// `output()` 调用次数
    pub outputs: usize,
    pub error: Option<SandboxError>,
}

impl SandboxResult {
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Clone, Debug)]
pub struct CodeSandbox {
    materializer: Materializer,
    timeout: Duration,
    max_operations: u64,
}

impl CodeSandbox {
    pub fn new(materializer: Materializer) -> Self {
        Self {
            materializer,
            timeout: Duration::from_secs(30),
            max_operations: 1_000_000,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_operations(mut self, max_operations: u64) -> Self {
        self.max_operations = max_operations;
        self
    }

    pub async fn run(&self, request: SandboxRequest) -> SandboxResult {
        let SandboxRequest {
            code,
            focal,
            cache,
            request,
            api,
        } = request;
        let started = Instant::now();
        let open_ended = self.materializer.registry().open_ended_method_names();
        let code = inject_side_channel(&code, &open_ended);
        let original = cache.clone();

        let input = worker::WorkerInput {
            code,
            focal,
            cache,
            request,
            api,
            materializer: self.materializer.clone(),
            handle: Handle::current(),
            max_operations: self.max_operations,
            deadline: started + self.timeout,
        };
        let task = tokio::task::spawn_blocking(move || worker::execute(input));

        // 截止时间之外再留一点余量，脚本卡在宿主调用里时由这里兜底
        let result = match tokio::time::timeout(self.timeout + Duration::from_secs(1), task).await {
            Ok(Ok(out)) => SandboxResult {
                text: out.text,
                cache: out.cache,
                outputs: out.outputs,
                error: out.error,
            },
            Ok(Err(join)) => {
                let reason = if join.is_panic() {
                    "worker panicked".to_string()
                } else {
                    join.to_string()
                };
                crashed(SandboxError::WorkerCrashed(reason), original)
            }
            Err(_) => crashed(SandboxError::Timeout(self.timeout.as_secs()), original),
        };

        tracing::info!(
            duration_ms = started.elapsed().as_millis() as u64,
            outputs = result.outputs,
            ok = !result.failed(),
            "sandbox run"
        );
        result
    }
}

fn crashed(error: SandboxError, cache: ObjectCache) -> SandboxResult {
    tracing::warn!(error = %error, "sandbox worker did not return");
    SandboxResult {
        text: format!("Error: {error}"),
        cache,
        outputs: 0,
        error: Some(error),
    }
}
