//! 持久化能力索引（SQLite）
//!
//! 每个暴露的能力一行：名称、所属类型、文档与嵌入向量（小端 f32 BLOB）。
//! 检索时按所属类型过滤后计算余弦相似度取前 K。

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};

use crate::core::RetrievalError;

/// 待写入索引的能力文档
#[derive(Clone, Debug)]
pub struct IndexedCapability {
    pub name: String,
    pub owner: String,
    pub document: String,
    pub embedding: Vec<f32>,
}

/// 检索结果
#[derive(Clone, Debug, PartialEq)]
pub struct RetrievedCapability {
    pub name: String,
    pub owner: String,
    pub document: String,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct CapabilityIndex {
    conn: Arc<Mutex<Connection>>,
}

impl CapabilityIndex {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RetrievalError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| RetrievalError::Index(e.to_string()))?;
            }
        }
        Self::with_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, RetrievalError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, RetrievalError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS capability_docs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                owner TEXT NOT NULL,
                document TEXT NOT NULL,
                embedding BLOB NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_capability_docs_owner ON capability_docs(owner);
            CREATE TABLE IF NOT EXISTS index_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, RetrievalError> {
        self.conn
            .lock()
            .map_err(|_| RetrievalError::Index("connection lock poisoned".into()))
    }

    /// 清空全部文档（重建前调用）
    pub fn clear(&self) -> Result<(), RetrievalError> {
        self.lock()?.execute("DELETE FROM capability_docs", [])?;
        Ok(())
    }

    pub fn insert(&self, doc: &IndexedCapability) -> Result<(), RetrievalError> {
        self.lock()?.execute(
            "INSERT INTO capability_docs (name, owner, document, embedding) VALUES (?1, ?2, ?3, ?4)",
            params![doc.name, doc.owner, doc.document, encode_embedding(&doc.embedding)],
        )?;
        Ok(())
    }

    pub fn len(&self) -> Result<usize, RetrievalError> {
        let n: i64 = self
            .lock()?
            .query_row("SELECT COUNT(1) FROM capability_docs", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    pub fn is_empty(&self) -> Result<bool, RetrievalError> {
        Ok(self.len()? == 0)
    }

    pub fn meta(&self, key: &str) -> Result<Option<String>, RetrievalError> {
        Ok(self
            .lock()?
            .query_row(
                "SELECT value FROM index_meta WHERE key = ?1",
                params![key],
                |r| r.get(0),
            )
            .optional()?)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<(), RetrievalError> {
        self.lock()?.execute(
            "INSERT OR REPLACE INTO index_meta (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    /// 向量检索：`owner` 给定时只在该类型的能力中检索
    pub fn search(
        &self,
        query: &[f32],
        owner: Option<&str>,
        k: usize,
    ) -> Result<Vec<RetrievedCapability>, RetrievalError> {
        let conn = self.lock()?;
        let mut rows: Vec<(String, String, String, Vec<u8>)> = Vec::new();
        match owner {
            Some(owner) => {
                let mut stmt = conn.prepare(
                    "SELECT name, owner, document, embedding FROM capability_docs WHERE owner = ?1",
                )?;
                let mapped = stmt.query_map(params![owner], |r| {
                    Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
                })?;
                for row in mapped {
                    rows.push(row?);
                }
            }
            None => {
                let mut stmt =
                    conn.prepare("SELECT name, owner, document, embedding FROM capability_docs")?;
                let mapped =
                    stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))?;
                for row in mapped {
                    rows.push(row?);
                }
            }
        }
        drop(conn);

        let mut scored: Vec<RetrievedCapability> = rows
            .into_iter()
            .map(|(name, owner, document, blob)| RetrievedCapability {
                score: cosine_similarity(query, &decode_embedding(&blob)),
                name,
                owner,
                document,
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.name.cmp(&b.name))
        });
        scored.truncate(k);
        Ok(scored)
    }
}

fn encode_embedding(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// 余弦相似度
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
