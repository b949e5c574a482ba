//! LLM 客户端抽象
//!
//! 所有后端（Gemini / OpenAI 兼容 / DeepSeek / Ollama / Mock）实现 LlmClient：
//! complete(messages, params) 返回生成文本，失败时返回可分类的 LlmError，供降级链决定重试或前进。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 单次生成参数
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 1000,
        }
    }
}

/// 后端错误分类：超时 / 鉴权 / 限流配额 / 连接失败 / 其它
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rate limited or quota exhausted: {0}")]
    RateLimited(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl LlmError {
    /// 是否值得在同一提供商上立即重试；鉴权与配额错误重试无意义，直接前进到下一提供商
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Timeout(_) | LlmError::Connection(_) | LlmError::ApiError(_)
        )
    }

    /// 失败原因的稳定短标签（写入 attempt log）
    pub fn kind(&self) -> FailureKind {
        match self {
            LlmError::Timeout(_) => FailureKind::Timeout,
            LlmError::Auth(_) => FailureKind::Auth,
            LlmError::RateLimited(_) => FailureKind::Quota,
            LlmError::Connection(_) => FailureKind::Connection,
            LlmError::ApiError(_) => FailureKind::Other,
            LlmError::Cancelled => FailureKind::Cancelled,
        }
    }

    /// 根据 HTTP 状态码分类
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            401 | 403 => LlmError::Auth(body),
            429 => LlmError::RateLimited(body),
            _ => LlmError::ApiError(format!("HTTP {status}: {body}")),
        }
    }

    /// SDK 只给出错误文本时，按关键词分类
    pub fn classify_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("timed out") || lower.contains("timeout") {
            LlmError::Timeout(0)
        } else if lower.contains("api key")
            || lower.contains("api_key")
            || lower.contains("unauthorized")
            || lower.contains("authentication")
            || lower.contains("permission")
        {
            LlmError::Auth(message)
        } else if lower.contains("rate limit")
            || lower.contains("rate_limit")
            || lower.contains("quota")
            || lower.contains("429")
            || lower.contains("resource_exhausted")
        {
            LlmError::RateLimited(message)
        } else if lower.contains("connect")
            || lower.contains("connection")
            || lower.contains("dns")
            || lower.contains("broken pipe")
        {
            LlmError::Connection(message)
        } else {
            LlmError::ApiError(message)
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        // URL 可能带凭证，不进入错误信息
        let e = e.without_url();
        if e.is_timeout() {
            LlmError::Timeout(0)
        } else if e.is_connect() {
            LlmError::Connection(e.to_string())
        } else if let Some(status) = e.status() {
            LlmError::from_status(status.as_u16(), e.to_string())
        } else {
            LlmError::classify_message(e.to_string())
        }
    }
}

/// attempt log 中的失败原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Auth,
    Quota,
    Connection,
    Other,
    Cancelled,
}

/// LLM 客户端 trait：每种后端一个实现，由降级链按配置顺序调用
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(
        &self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<String, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
