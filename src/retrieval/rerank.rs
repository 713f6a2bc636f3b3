//! 重排序：向量召回之后的第二遍排序
//!
//! 默认实现把向量排名与关键词（Jaccard）排名做 RRF 融合。

use std::collections::HashMap;

use crate::retrieval::index::RetrievedCapability;
use crate::retrieval::tokenizer;

/// RRF 常数
const RRF_K: f32 = 60.0;

pub trait Reranker: Send + Sync {
    /// 输入按向量相似度降序；返回前 `top_n` 个
    fn rerank(
        &self,
        query: &str,
        candidates: Vec<RetrievedCapability>,
        top_n: usize,
    ) -> Vec<RetrievedCapability>;
}

/// 向量排名 + 关键词排名的 RRF 融合
#[derive(Debug, Default, Clone, Copy)]
pub struct LexicalReranker;

impl Reranker for LexicalReranker {
    fn rerank(
        &self,
        query: &str,
        candidates: Vec<RetrievedCapability>,
        top_n: usize,
    ) -> Vec<RetrievedCapability> {
        let query_tokens = tokenizer::tokenize_to_set(query);
        let mut keyword_scored: Vec<(f32, usize)> = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let doc_tokens = tokenizer::tokenize_to_set(&format!("{} {}", c.name, c.document));
                (tokenizer::jaccard_similarity(&query_tokens, &doc_tokens), i)
            })
            .filter(|(score, _)| *score > 0.0)
            .collect();
        keyword_scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        // 合并结果（RRF - Reciprocal Rank Fusion）
        let mut scores: HashMap<usize, f32> = HashMap::new();
        for i in 0..candidates.len() {
            *scores.entry(i).or_insert(0.0) += 1.0 / (RRF_K + i as f32);
        }
        for (rank, (_, i)) in keyword_scored.iter().enumerate() {
            *scores.entry(*i).or_insert(0.0) += 1.0 / (RRF_K + rank as f32);
        }

        let mut order: Vec<(usize, f32)> = scores.into_iter().collect();
        order.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        let mut slots: Vec<Option<RetrievedCapability>> = candidates.into_iter().map(Some).collect();
        order
            .into_iter()
            .take(top_n)
            .filter_map(|(i, score)| {
                slots[i].take().map(|mut c| {
                    c.score = score;
                    c
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(name: &str, doc: &str, score: f32) -> RetrievedCapability {
        RetrievedCapability {
            name: name.into(),
            owner: "Workspace".into(),
            document: doc.into(),
            score,
        }
    }

    #[test]
    fn test_keyword_match_promotes_candidate() {
        let candidates = vec![
            cand("get_datasets", "List datasets.", 0.9),
            cand("get_users", "List all users of the workspace.", 0.8),
        ];
        let ranked = LexicalReranker.rerank("workspace users", candidates, 2);
        assert_eq!(ranked[0].name, "get_users");
        assert_eq!(ranked.len(), 2);
    }

    #[test]
    fn test_top_n_truncates() {
        let candidates = vec![cand("a", "", 0.9), cand("b", "", 0.8), cand("c", "", 0.7)];
        let ranked = LexicalReranker.rerank("zzz", candidates, 2);
        assert_eq!(ranked.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
