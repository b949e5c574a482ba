//! 工作流类型定义
//!
//! 查询、候选答案、评估、状态机状态、引用与最终结果

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::FailureReason;
use crate::llm::AttemptFailure;
use crate::retrieval::RetrievedPassage;

pub type SessionId = String;

/// 用户查询（创建后不可变）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    text: String,
    locale: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

impl Query {
    /// 校验并创建查询：去除首尾空白后非空、不超过长度上限、不含控制字符
    pub fn new(text: impl Into<String>, max_chars: usize) -> Result<Self, QueryError> {
        let text = text.into().trim().to_string();
        if text.is_empty() {
            return Err(QueryError::InvalidQuery("query is empty".to_string()));
        }
        let len = text.chars().count();
        if len > max_chars {
            return Err(QueryError::InvalidQuery(format!(
                "query has {len} characters, limit is {max_chars}"
            )));
        }
        if text.chars().any(|c| c.is_control() && !c.is_whitespace()) {
            return Err(QueryError::InvalidQuery(
                "query contains control characters".to_string(),
            ));
        }
        if !text.chars().any(|c| c.is_alphanumeric()) {
            return Err(QueryError::InvalidQuery(
                "query has no searchable content".to_string(),
            ));
        }
        Ok(Self { text, locale: None })
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        let locale = locale.into();
        self.locale = (!locale.trim().is_empty()).then(|| locale.trim().to_string());
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }
}

/// 状态机状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WorkflowState {
    Retrieve,
    Analyze,
    Generate,
    Evaluate,
    Improve,
    Done,
    Failed,
}

impl WorkflowState {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowState::Done | WorkflowState::Failed)
    }

    /// 固定转移表；IMPROVE -> GENERATE 是唯一回边
    pub fn can_transition_to(self, next: WorkflowState) -> bool {
        use WorkflowState::*;
        matches!(
            (self, next),
            (Retrieve, Analyze)
                | (Analyze, Generate)
                | (Generate, Evaluate)
                | (Generate, Failed)
                | (Evaluate, Done)
                | (Evaluate, Improve)
                | (Improve, Generate)
        )
    }
}

/// 对外结果的终止标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TerminalState {
    Done,
    Capped,
    Failed,
}

/// 某次生成得到的候选答案；passages 为本次 prompt 实际使用的检索段（共享引用）
#[derive(Debug, Clone)]
pub struct Candidate {
    pub answer: String,
    pub provider_id: String,
    pub iteration: u32,
    pub passages: Vec<Arc<RetrievedPassage>>,
}

/// 评估结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    /// [0, 1]
    pub confidence: f64,
    /// confidence >= 阈值
    pub acceptable: bool,
    pub diagnostic: String,
    /// 自我评审不可用，仅使用启发式分数
    pub degraded: bool,
}

/// 引用：文档、片段与字符偏移
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub document_id: String,
    pub snippet: String,
    pub offset: usize,
}

/// 返回给调用方的结构化结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowResult {
    pub session_id: SessionId,
    pub answer: String,
    pub confidence: f64,
    pub provider_used: Option<String>,
    pub iterations: u32,
    pub terminal_state: TerminalState,
    pub citations: Vec<Citation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureReason>,
    pub evaluation_degraded: bool,
    pub diagnostic: String,
    /// 生成调用的失败尝试（按发生顺序）
    pub attempt_log: Vec<AttemptFailure>,
    /// 每次成功生成所用的提供商
    pub provider_sequence: Vec<String>,
    /// 经过的状态序列
    pub trace: Vec<WorkflowState>,
}

impl WorkflowResult {
    pub fn is_failed(&self) -> bool {
        self.terminal_state == TerminalState::Failed
    }
}
