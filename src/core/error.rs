//! 错误类型
//!
//! AgentError：提交 / 构建阶段直接返回给调用方的错误（如 InvalidQuery）；
//! FailureReason：会话以 FAILED 结束时附在结果上的原因。
//! 检索不可用、单个提供商失败、评估降级都在各自模块内就地恢复，不在此出现。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::ChainConfigError;
use crate::workflow::QueryError;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    InvalidQuery(#[from] QueryError),

    #[error("Config error: {0}")]
    ConfigError(#[from] config::ConfigError),

    #[error("Provider chain error: {0}")]
    ChainConfig(#[from] ChainConfigError),

    #[error("Session task failed: {0}")]
    SessionAborted(String),
}

/// 会话失败原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    AllProvidersExhausted,
    Cancelled,
    DeadlineExceeded,
    /// 状态机内部错误（非法转移）
    Internal,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            FailureReason::AllProvidersExhausted => "all providers exhausted",
            FailureReason::Cancelled => "cancelled",
            FailureReason::DeadlineExceeded => "session deadline exceeded",
            FailureReason::Internal => "internal workflow error",
        };
        f.write_str(text)
    }
}
