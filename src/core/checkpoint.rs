//! 检查点：步数预算耗尽时读回最后保存的状态
//!
//! 领域对象不可序列化，保存时以占位符（空映射）替代含对象的缓存条目；
//! 恢复出的会话必须在继续前从外部重新获取这些对象。

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::cache::{CacheKey, ObjectCache, Value};
use crate::core::{ActionSignal, AgentError, AgentMessage, AgentState};

/// 缓存条目的快照形式
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SnapshotEntry {
    Data { value: serde_json::Value },
    Placeholder { tag: String },
}

/// 可序列化的会话状态
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub step: usize,
    pub user_query: String,
    pub messages: Vec<AgentMessage>,
    pub decomposed_queries: Vec<String>,
    pub current_query_index: Option<usize>,
    pub current_query: String,
    pub attempts: u32,
    pub next_action: ActionSignal,
    pub errored: bool,
    pub cache: BTreeMap<String, SnapshotEntry>,
    pub saved_at: DateTime<Utc>,
}

impl StateSnapshot {
    pub fn capture(state: &AgentState, step: usize) -> Self {
        let cache = state
            .cache
            .iter()
            .map(|(key, value)| {
                let entry = match value.to_json() {
                    Some(json) => SnapshotEntry::Data { value: json },
                    None => SnapshotEntry::Placeholder {
                        tag: value.type_tag(),
                    },
                };
                (key.to_string(), entry)
            })
            .collect();
        Self {
            step,
            user_query: state.user_query.clone(),
            messages: state.messages.clone(),
            decomposed_queries: state.decomposed_queries.clone(),
            current_query_index: state.current_query_index,
            current_query: state.current_query.clone(),
            attempts: state.attempts,
            next_action: state.next_action,
            errored: state.errored,
            cache,
            saved_at: Utc::now(),
        }
    }

    /// 恢复为 AgentState；占位条目恢复为空映射，组件子列表按消息来源重建
    pub fn restore(&self) -> AgentState {
        let mut cache = ObjectCache::new();
        for (key, entry) in &self.cache {
            let Some(key) = CacheKey::parse(key) else {
                continue;
            };
            let value = match entry {
                SnapshotEntry::Data { value } => Value::from_json(value.clone()),
                SnapshotEntry::Placeholder { .. } => Value::Map(BTreeMap::new()),
            };
            cache.insert(key, value);
        }
        let mut state = AgentState::new(
            self.user_query.clone(),
            self.decomposed_queries.clone(),
            cache,
        );
        for message in &self.messages {
            state.push(message.clone());
        }
        state.current_query_index = self.current_query_index;
        state.current_query = self.current_query.clone();
        state.attempts = self.attempts;
        state.next_action = self.next_action;
        state.errored = self.errored;
        state
    }
}

/// 检查点存储
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, snapshot: &StateSnapshot) -> Result<(), AgentError>;

    /// 最近一次保存的快照
    async fn load(&self) -> Result<Option<StateSnapshot>, AgentError>;
}

/// 进程内检查点（默认）
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    latest: Mutex<Option<StateSnapshot>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, snapshot: &StateSnapshot) -> Result<(), AgentError> {
        let mut guard = self
            .latest
            .lock()
            .map_err(|_| AgentError::Checkpoint("checkpoint lock poisoned".into()))?;
        *guard = Some(snapshot.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Option<StateSnapshot>, AgentError> {
        let guard = self
            .latest
            .lock()
            .map_err(|_| AgentError::Checkpoint("checkpoint lock poisoned".into()))?;
        Ok(guard.clone())
    }
}

/// SQLite 检查点：按会话 id 追加保存，读取最新一条
#[derive(Debug)]
pub struct SqliteCheckpointStore {
    conn: Arc<Mutex<Connection>>,
    session_id: String,
}

impl SqliteCheckpointStore {
    pub fn open(path: impl AsRef<Path>, session_id: impl Into<String>) -> Result<Self, AgentError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| AgentError::Checkpoint(e.to_string()))?;
            }
        }
        let conn = Connection::open(path).map_err(checkpoint_err)?;
        Self::with_connection(conn, session_id)
    }

    pub fn in_memory(session_id: impl Into<String>) -> Result<Self, AgentError> {
        let conn = Connection::open_in_memory().map_err(checkpoint_err)?;
        Self::with_connection(conn, session_id)
    }

    fn with_connection(conn: Connection, session_id: impl Into<String>) -> Result<Self, AgentError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                step INTEGER NOT NULL,
                state TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_checkpoints_session ON checkpoints(session_id);",
        )
        .map_err(checkpoint_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            session_id: session_id.into(),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

fn checkpoint_err(e: rusqlite::Error) -> AgentError {
    AgentError::Checkpoint(e.to_string())
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(&self, snapshot: &StateSnapshot) -> Result<(), AgentError> {
        let payload =
            serde_json::to_string(snapshot).map_err(|e| AgentError::Checkpoint(e.to_string()))?;
        let conn = self
            .conn
            .lock()
            .map_err(|_| AgentError::Checkpoint("connection lock poisoned".into()))?;
        conn.execute(
            "INSERT INTO checkpoints (session_id, step, state, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                self.session_id,
                snapshot.step as i64,
                payload,
                snapshot.saved_at.to_rfc3339()
            ],
        )
        .map_err(checkpoint_err)?;
        Ok(())
    }

    async fn load(&self) -> Result<Option<StateSnapshot>, AgentError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| AgentError::Checkpoint("connection lock poisoned".into()))?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT state FROM checkpoints WHERE session_id = ?1 ORDER BY id DESC LIMIT 1",
                params![self.session_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(checkpoint_err)?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(|e| AgentError::Checkpoint(e.to_string())))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DomainObject;
    use crate::core::Component;
    use std::any::Any;

    #[derive(Debug)]
    struct Handle;

    impl DomainObject for Handle {
        fn type_name(&self) -> &str {
            "Workspace"
        }
        fn content(&self) -> serde_json::Value {
            serde_json::json!({ "id": "w" })
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn sample_state() -> (AgentState, CacheKey, CacheKey) {
        let mut cache = ObjectCache::new();
        let obj_key = cache.put(Value::object(Handle));
        let data_key = cache.put(Value::from("hello"));
        let mut state = AgentState::new("req", vec!["a".into(), "b".into()], cache);
        state.current_query_index = Some(1);
        state.attempts = 2;
        state.push(AgentMessage::assistant("TOOL", Component::Manager));
        (state, obj_key, data_key)
    }

    #[test]
    fn test_capture_substitutes_placeholders() {
        let (state, obj_key, data_key) = sample_state();
        let snapshot = StateSnapshot::capture(&state, 7);
        assert_eq!(
            snapshot.cache[obj_key.as_str()],
            SnapshotEntry::Placeholder { tag: "WORKSPACE".into() }
        );
        assert_eq!(
            snapshot.cache[data_key.as_str()],
            SnapshotEntry::Data { value: serde_json::json!("hello") }
        );

        let restored = snapshot.restore();
        assert_eq!(restored.attempts, 2);
        assert_eq!(restored.current_query_index, Some(1));
        assert_eq!(restored.component_messages(Component::Manager).len(), 1);
        assert_eq!(restored.cache.get(obj_key.as_str()), Some(&Value::Map(BTreeMap::new())));
    }

    #[tokio::test]
    async fn test_memory_store_keeps_latest() {
        let store = MemoryCheckpointStore::new();
        assert!(store.load().await.unwrap().is_none());
        let (state, _, _) = sample_state();
        store.save(&StateSnapshot::capture(&state, 1)).await.unwrap();
        store.save(&StateSnapshot::capture(&state, 2)).await.unwrap();
        assert_eq!(store.load().await.unwrap().unwrap().step, 2);
    }

    #[tokio::test]
    async fn test_sqlite_store_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("checkpoints.db");
        let (state, _, _) = sample_state();
        {
            let store = SqliteCheckpointStore::open(&path, "s1").unwrap();
            store.save(&StateSnapshot::capture(&state, 3)).await.unwrap();
            store.save(&StateSnapshot::capture(&state, 4)).await.unwrap();
        }
        let reopened = SqliteCheckpointStore::open(&path, "s1").unwrap();
        let loaded = reopened.load().await.unwrap().unwrap();
        assert_eq!(loaded.step, 4);
        assert_eq!(loaded.messages.len(), 1);

        let other = SqliteCheckpointStore::open(&path, "s2").unwrap();
        assert!(other.load().await.unwrap().is_none());
    }
}
