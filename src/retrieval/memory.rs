//! 内存检索实现：按关键词加权重叠打分（无真实向量）
//!
//! 语料为预先切好的文本段，可从 JSON 文件加载：
//! `[{"documentId": "guide.pdf", "start": 0, "text": "..."}]`

use std::path::Path;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::retrieval::{RetrievalError, RetrievalPort, RetrievedPassage};
use crate::tokenizer::{tokenize, weighted_similarity};

/// JSON 语料条目
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CorpusEntry {
    document_id: String,
    #[serde(default)]
    start: usize,
    text: String,
}

#[derive(Clone, Default)]
pub struct InMemoryRetriever {
    /// (文本段, 词序列)
    store: Arc<RwLock<Vec<(RetrievedPassage, Vec<String>)>>>,
}

impl InMemoryRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_passages(passages: impl IntoIterator<Item = RetrievedPassage>) -> Self {
        let retriever = Self::new();
        for passage in passages {
            retriever.add(passage);
        }
        retriever
    }

    /// 从 JSON 文件加载语料
    pub fn from_json_file(path: &Path) -> Result<Self, RetrievalError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RetrievalError::Unavailable(format!("cannot read corpus {}: {e}", path.display()))
        })?;
        let entries: Vec<CorpusEntry> = serde_json::from_str(&raw).map_err(|e| {
            RetrievalError::Unavailable(format!("invalid corpus {}: {e}", path.display()))
        })?;
        let retriever = Self::from_passages(
            entries
                .into_iter()
                .map(|e| RetrievedPassage::new(e.document_id, e.start, e.text)),
        );
        info!(path = %path.display(), passages = retriever.len(), "corpus loaded");
        Ok(retriever)
    }

    pub fn add(&self, passage: RetrievedPassage) {
        if passage.text.trim().is_empty() {
            return;
        }
        let tokens = tokenize(&passage.text);
        let mut store = self.store.write().unwrap_or_else(|e| e.into_inner());
        store.push((passage, tokens));
    }

    pub fn len(&self) -> usize {
        self.store.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RetrievalPort for InMemoryRetriever {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedPassage>, RetrievalError> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let store = self
            .store
            .read()
            .map_err(|_| RetrievalError::Unavailable("index lock poisoned".to_string()))?;

        let mut scored: Vec<(usize, f32)> = store
            .iter()
            .enumerate()
            .map(|(idx, (_, tokens))| (idx, weighted_similarity(&query_tokens, tokens)))
            .filter(|(_, score)| *score > 0.0)
            .collect();
        // 分数降序；同分保持入库顺序
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let hits: Vec<RetrievedPassage> = scored
            .into_iter()
            .take(k)
            .map(|(idx, score)| store[idx].0.clone().with_score(score))
            .collect();
        debug!(hits = hits.len(), "in-memory search");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn corpus() -> InMemoryRetriever {
        InMemoryRetriever::from_passages(vec![
            RetrievedPassage::new("cardio.pdf", 0, "Hypertension is treated with ACE inhibitors and diuretics."),
            RetrievedPassage::new("diabetes.pdf", 120, "Metformin is the first-line therapy for type 2 diabetes."),
            RetrievedPassage::new("diabetes.pdf", 400, "Insulin therapy is required when metformin fails."),
        ])
    }

    #[tokio::test]
    async fn test_search_ranks_by_overlap() {
        let hits = corpus().search("metformin diabetes therapy", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document_id, "diabetes.pdf");
        assert_eq!(hits[0].range.start, 120);
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_no_match_returns_empty() {
        let hits = corpus().search("quantum chromodynamics", 5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_load_json_corpus() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"documentId": "a.pdf", "start": 10, "text": "aspirin lowers fever"}},
               {{"documentId": "b.pdf", "text": "rest helps recovery"}}]"#
        )
        .unwrap();
        let retriever = InMemoryRetriever::from_json_file(file.path()).unwrap();
        assert_eq!(retriever.len(), 2);
    }

    #[test]
    fn test_missing_corpus_is_unavailable() {
        let err = InMemoryRetriever::from_json_file(Path::new("/nonexistent/corpus.json"))
            .err()
            .unwrap();
        assert!(matches!(err, RetrievalError::Unavailable(_)));
    }
}
