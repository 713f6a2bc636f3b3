//! 调度模式：每次调用由调用方选定，运行中不切换
//!
//! 所有转移只有一份 async 实现；协作式用单线程运行时，阻塞式用多线程运行时 + `block_on`。

use std::str::FromStr;

use serde::Deserialize;
use tokio::runtime::{Builder, Runtime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingMode {
    /// 交互前端：单线程协作调度
    Cooperative,
    /// 批处理 / 评测：多线程阻塞调度
    #[default]
    Blocking,
}

impl FromStr for SchedulingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cooperative" => Ok(SchedulingMode::Cooperative),
            "blocking" => Ok(SchedulingMode::Blocking),
            other => Err(format!("unknown scheduling mode: {other}")),
        }
    }
}

impl SchedulingMode {
    /// 为该模式构建运行时；不可在已有运行时内部调用其 `block_on`
    pub fn build_runtime(self) -> std::io::Result<Runtime> {
        match self {
            SchedulingMode::Cooperative => Builder::new_current_thread().enable_all().build(),
            SchedulingMode::Blocking => Builder::new_multi_thread().enable_all().build(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modes_build_runtimes_that_run_blocking_work() {
        for mode in [SchedulingMode::Cooperative, SchedulingMode::Blocking] {
            let rt = mode.build_runtime().unwrap();
            let value = rt.block_on(async {
                tokio::task::spawn_blocking(|| 21 * 2).await.unwrap()
            });
            assert_eq!(value, 42);
        }
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!("Cooperative".parse::<SchedulingMode>(), Ok(SchedulingMode::Cooperative));
        assert!("fast".parse::<SchedulingMode>().is_err());
    }
}
