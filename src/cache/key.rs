//! 缓存键：`_<TAG>_<短 id>`，可在文本与结构化参数中指代缓存对象

use std::borrow::Borrow;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// 最近一次执行结果的保留键
pub const LAST_OUTPUT_KEY: &str = "_LAST_OUTPUT";

static KEY_PATTERN: OnceLock<Regex> = OnceLock::new();

fn key_pattern() -> &'static Regex {
    KEY_PATTERN.get_or_init(|| {
        Regex::new(r"^_(\w+)_(\w+)$").unwrap_or_else(|_| unreachable!("static pattern"))
    })
}

/// 缓存键
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// 按类型标签生成新键（8 位十六进制随机后缀）
    pub fn generate(tag: &str) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        CacheKey(format!("_{}_{}", tag, &id[..8]))
    }

    /// 解析符合键格式的字符串
    pub fn parse(s: &str) -> Option<Self> {
        is_reference(s).then(|| CacheKey(s.to_string()))
    }

    pub fn last_output() -> Self {
        CacheKey(LAST_OUTPUT_KEY.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 类型标签（首尾下划线之间的部分）
    pub fn tag(&self) -> &str {
        let inner = self.0.strip_prefix('_').unwrap_or(&self.0);
        match inner.rfind('_') {
            Some(pos) => &inner[..pos],
            None => inner,
        }
    }
}

/// 字符串是否符合缓存键格式（不检查是否存在）
pub fn is_reference(s: &str) -> bool {
    key_pattern().is_match(s)
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
