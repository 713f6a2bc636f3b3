//! 能力检索器
//!
//! 子查询 → 嵌入 → 索引召回 candidate_k 个 → 重排序取前 K；相同 (查询, 类型过滤, K) 命中内存缓存。
//! 两种模式：按类型过滤（已选定焦点对象后）与全局（决策与分解阶段）。
//! `describe` 把检索结果按类型组装成 prompt 段落：类型描述、命中方法的裁剪文档、其余方法的一行签名。

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use futures_util::future::try_join_all;

use crate::capability::{MaterializedCapability, Materializer, Registry};
use crate::core::RetrievalError;
use crate::llm::EmbeddingProvider;
use crate::retrieval::index::{CapabilityIndex, IndexedCapability, RetrievedCapability};
use crate::retrieval::rerank::{LexicalReranker, Reranker};

const EMBEDDING_MODEL_KEY: &str = "embedding_model";

type LookupKey = (String, Option<String>, usize);

/// `describe` 选项
#[derive(Clone, Copy, Debug)]
pub struct DescribeOptions {
    pub k: usize,
    /// 附上未命中方法的一行签名
    pub include_remaining: bool,
    /// 全局模式下列出所有已注册类型，即使没有命中
    pub describe_all_types: bool,
}

impl DescribeOptions {
    pub fn top(k: usize) -> Self {
        Self {
            k,
            include_remaining: false,
            describe_all_types: false,
        }
    }

    pub fn with_remaining(mut self) -> Self {
        self.include_remaining = true;
        self
    }

    pub fn with_all_types(mut self) -> Self {
        self.describe_all_types = true;
        self
    }
}

pub struct CapabilityRetriever {
    materializer: Materializer,
    index: CapabilityIndex,
    embedder: Arc<dyn EmbeddingProvider>,
    reranker: Arc<dyn Reranker>,
    candidate_k: usize,
    lookups: Mutex<HashMap<LookupKey, Vec<RetrievedCapability>>>,
}

impl CapabilityRetriever {
    pub fn new(
        materializer: Materializer,
        index: CapabilityIndex,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            materializer,
            index,
            embedder,
            reranker: Arc::new(LexicalReranker),
            candidate_k: 20,
            lookups: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = reranker;
        self
    }

    pub fn with_candidate_k(mut self, candidate_k: usize) -> Self {
        self.candidate_k = candidate_k.max(1);
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.materializer.registry()
    }

    /// 索引文档：签名 + 裁剪后的描述
    fn document(&self, owner: &str, spec: &crate::capability::MethodSpec) -> String {
        let descriptor = self.materializer.describe_method(owner, spec);
        format!("{}\n{}", spec.signature(), descriptor.description)
    }

    /// 清空并重建索引，返回写入的文档数
    pub async fn rebuild(&self) -> Result<usize, RetrievalError> {
        let registry = self.registry().clone();
        let mut docs = Vec::new();
        for type_name in registry.type_names() {
            for spec in registry.methods_of_type(type_name) {
                docs.push((spec.name.clone(), type_name.to_string(), self.document(type_name, spec)));
            }
        }

        let embeddings = try_join_all(docs.iter().map(|(_, _, document)| self.embedder.embed(document)))
            .await
            .map_err(RetrievalError::Embedding)?;
        let embedded: Vec<IndexedCapability> = docs
            .into_iter()
            .zip(embeddings)
            .map(|((name, owner, document), embedding)| IndexedCapability {
                name,
                owner,
                document,
                embedding,
            })
            .collect();

        self.index.clear()?;
        for doc in &embedded {
            self.index.insert(doc)?;
        }
        self.index
            .set_meta(EMBEDDING_MODEL_KEY, self.embedder.model_id())?;
        if let Ok(mut lookups) = self.lookups.lock() {
            lookups.clear();
        }
        tracing::info!(documents = embedded.len(), "capability index rebuilt");
        Ok(embedded.len())
    }

    /// 索引为空或嵌入模型变化时重建
    pub async fn ensure_index(&self) -> Result<(), RetrievalError> {
        let model = self.index.meta(EMBEDDING_MODEL_KEY)?;
        if self.index.is_empty()? || model.as_deref() != Some(self.embedder.model_id()) {
            self.rebuild().await?;
        }
        Ok(())
    }

    /// 检索前 K 个能力；`owner` 给定时只返回该类型的能力
    pub async fn retrieve(
        &self,
        query: &str,
        owner: Option<&str>,
        k: usize,
    ) -> Result<Vec<RetrievedCapability>, RetrievalError> {
        let key: LookupKey = (query.to_string(), owner.map(String::from), k);
        if let Some(hit) = self.lookups.lock().ok().and_then(|l| l.get(&key).cloned()) {
            tracing::debug!(query, ?owner, k, "capability lookup cache hit");
            return Ok(hit);
        }

        let embedding = self
            .embedder
            .embed(query)
            .await
            .map_err(RetrievalError::Embedding)?;
        let candidates = self
            .index
            .search(&embedding, owner, self.candidate_k.max(k))?;
        let ranked = self.reranker.rerank(query, candidates, k);
        tracing::debug!(query, ?owner, k, hits = ranked.len(), "capability lookup");

        if let Ok(mut lookups) = self.lookups.lock() {
            lookups.insert(key, ranked.clone());
        }
        Ok(ranked)
    }

    /// 按类型组装 prompt 段落
    pub async fn describe(
        &self,
        query: &str,
        owner: Option<&str>,
        options: DescribeOptions,
    ) -> Result<String, RetrievalError> {
        let hits = self.retrieve(query, owner, options.k).await?;

        // 按首次出现的顺序分组
        let mut groups: Vec<(String, Vec<String>)> = Vec::new();
        for hit in hits {
            match groups.iter_mut().find(|(o, _)| *o == hit.owner) {
                Some((_, names)) => names.push(hit.name),
                None => groups.push((hit.owner, vec![hit.name])),
            }
        }
        if options.describe_all_types && owner.is_none() {
            for type_name in self.registry().type_names() {
                if !groups.iter().any(|(o, _)| o == type_name) {
                    groups.push((type_name.to_string(), Vec::new()));
                }
            }
        }
        if let Some(owner) = owner {
            if groups.is_empty() {
                groups.push((owner.to_string(), Vec::new()));
            }
        }

        let blocks: Vec<String> = groups
            .iter()
            .map(|(type_name, names)| self.describe_type(type_name, names, options.include_remaining))
            .collect();
        Ok(blocks.join("\n"))
    }

    /// 单个类型的段落
    pub fn describe_type(&self, type_name: &str, retrieved: &[String], include_remaining: bool) -> String {
        let registry = self.registry();
        let description = registry
            .type_spec(type_name)
            .map(|s| s.description.as_str())
            .unwrap_or("");
        let mut out = format!("class {type_name}\n{description}\n");
        let methods = registry.methods_of_type(type_name);
        for name in retrieved {
            if let Some(spec) = methods.iter().find(|m| &m.name == name) {
                let descriptor = self.materializer.describe_method(type_name, spec);
                out.push_str(&format!("    {}\n", spec.signature()));
                for line in descriptor.description.lines() {
                    out.push_str(&format!("        {line}\n"));
                }
            }
        }
        if include_remaining {
            let remaining: Vec<String> = methods
                .iter()
                .filter(|m| !retrieved.contains(&m.name))
                .map(|m| format!("    {}", m.signature()))
                .collect();
            if !remaining.is_empty() {
                out.push_str("  Other methods:\n");
                out.push_str(&remaining.join("\n"));
                out.push('\n');
            }
        }
        out
    }

    /// 从对象的全部能力中选出与子查询最相关的前 K 个；检索失败时退回全部能力
    pub async fn select_capabilities(
        &self,
        query: &str,
        capabilities: Vec<MaterializedCapability>,
        k: usize,
    ) -> Vec<MaterializedCapability> {
        if capabilities.len() <= k {
            return capabilities;
        }
        let owners: BTreeSet<String> = capabilities.iter().map(|c| c.owner().to_string()).collect();
        let mut hits: Vec<RetrievedCapability> = Vec::new();
        for owner in &owners {
            match self.retrieve(query, Some(owner), k).await {
                Ok(found) => hits.extend(found),
                Err(e) => {
                    tracing::warn!(error = %e, "capability selection fell back to full list");
                    return capabilities;
                }
            }
        }
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let mut selected = Vec::new();
        for hit in hits {
            if selected.len() >= k {
                break;
            }
            if let Some(cap) = capabilities
                .iter()
                .find(|c| c.name() == hit.name && c.owner() == hit.owner)
            {
                if !selected.iter().any(|s: &MaterializedCapability| s.name() == cap.name()) {
                    selected.push(cap.clone());
                }
            }
        }
        if selected.is_empty() {
            return capabilities.into_iter().take(k).collect();
        }
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::testing::{User, Workspace};
    use crate::llm::HashEmbedder;
    use crate::cache::ObjectRef;

    async fn retriever() -> CapabilityRetriever {
        let mut r = Registry::new();
        r.register::<Workspace>().register::<User>();
        let r = Arc::new(r);
        let retriever = CapabilityRetriever::new(
            Materializer::new(r),
            CapabilityIndex::in_memory().unwrap(),
            Arc::new(HashEmbedder::default()),
        );
        retriever.ensure_index().await.unwrap();
        retriever
    }

    #[tokio::test]
    async fn test_rebuild_indexes_exposed_methods_only() {
        let r = retriever().await;
        // Workspace: get_users / find_user / share_with；User: get_email
        assert_eq!(r.index.len().unwrap(), 4);
    }

    #[tokio::test]
    async fn test_type_filtered_retrieval_stays_within_type() {
        let r = retriever().await;
        let hits = r.retrieve("email address of a user", Some("Workspace"), 10).await.unwrap();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| h.owner == "Workspace"));

        let global = r.retrieve("email address of a user", None, 10).await.unwrap();
        assert!(global.iter().any(|h| h.owner == "User"));
    }

    #[tokio::test]
    async fn test_repeated_lookup_is_cached() {
        let r = retriever().await;
        let first = r.retrieve("list users", None, 2).await.unwrap();
        r.index.clear().unwrap();
        let second = r.retrieve("list users", None, 2).await.unwrap();
        assert_eq!(first, second);
        assert!(r.retrieve("list users", None, 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_describe_includes_remaining_signatures() {
        let r = retriever().await;
        let text = r
            .describe("list all users", Some("Workspace"), DescribeOptions::top(1).with_remaining())
            .await
            .unwrap();
        assert!(text.starts_with("class Workspace\n"));
        assert!(text.contains("Other methods:"));
        assert!(text.contains("def "));
        assert!(!text.contains("_internal_sync"));
        assert!(!text.contains("Large workspaces"));
    }

    #[tokio::test]
    async fn test_describe_all_types_lists_every_type() {
        let r = retriever().await;
        let text = r
            .describe("workspace", None, DescribeOptions::top(1).with_all_types())
            .await
            .unwrap();
        assert!(text.contains("class Workspace"));
        assert!(text.contains("class User"));
    }

    #[tokio::test]
    async fn test_select_capabilities_limits_to_k() {
        let r = retriever().await;
        let ws: ObjectRef = Arc::new(Workspace::demo());
        let caps = r.materializer.materialize(&ws);
        assert_eq!(caps.len(), 3);
        let selected = r.select_capabilities("share the workspace with a user", caps, 2).await;
        assert_eq!(selected.len(), 2);
        assert!(selected.iter().all(|c| c.owner() == "Workspace"));
    }
}
