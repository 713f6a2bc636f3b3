//! 能力检索层：分词、SQLite 向量索引、重排序与检索器

pub mod index;
pub mod rerank;
pub mod retriever;
pub mod tokenizer;

pub use index::{cosine_similarity, CapabilityIndex, IndexedCapability, RetrievedCapability};
pub use rerank::{LexicalReranker, Reranker};
pub use retriever::{CapabilityRetriever, DescribeOptions};
