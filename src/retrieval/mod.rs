//! 检索端口：核心只消费 RetrievalPort 接口
//!
//! 索引存储、向量化与相似度实现在外部；此处提供基于关键词重叠的内存实现，供 CLI 与测试使用。

pub mod memory;

use std::ops::Range;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::InMemoryRetriever;

/// 检索到的一段文本（只读，由会话以 Arc 共享引用）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedPassage {
    pub document_id: String,
    /// 在原文档中的字符区间
    pub range: Range<usize>,
    pub text: String,
    pub score: f32,
}

impl RetrievedPassage {
    pub fn new(document_id: impl Into<String>, start: usize, text: impl Into<String>) -> Self {
        let text = text.into();
        let end = start + text.chars().count();
        Self {
            document_id: document_id.into(),
            range: start..end,
            text,
            score: 0.0,
        }
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetrievalError {
    #[error("Retrieval unavailable: {0}")]
    Unavailable(String),
}

/// 检索端口：按查询返回按相关度排序的至多 k 段文本
#[async_trait]
pub trait RetrievalPort: Send + Sync {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedPassage>, RetrievalError>;
}
