//! 提供商降级链
//!
//! 按优先级升序依次尝试各后端：每个后端独立超时、有限次立即重试（固定或指数退避），
//! 失败原因逐条写入本次调用的 attempt log；首个成功即返回，全部失败时返回 AllProvidersExhausted。
//! 标记 always_available 的后端（至多一个）必须排在最后，作为无需凭证的兜底。

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::llm::{FailureKind, GenerationParams, LlmClient, LlmError, Message};

/// 单个提供商的静态配置（会话内只读，顺序固定）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpec {
    /// 优先级，越小越先尝试；链内唯一
    pub priority: u32,
    pub provider_id: String,
    pub endpoint: Option<String>,
    /// 无凭证也可调用
    pub credentials_optional: bool,
    /// 单次尝试超时（毫秒），0 表示不限
    pub timeout_ms: u64,
    /// 同一提供商的额外重试次数
    pub max_retries: u32,
    pub always_available: bool,
}

impl ProviderSpec {
    pub fn new(priority: u32, provider_id: impl Into<String>) -> Self {
        Self {
            priority,
            provider_id: provider_id.into(),
            endpoint: None,
            credentials_optional: false,
            timeout_ms: 30_000,
            max_retries: 1,
            always_available: false,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// 标记为兜底后端（隐含无需凭证）
    pub fn always_available(mut self) -> Self {
        self.always_available = true;
        self.credentials_optional = true;
        self
    }
}

/// 重试退避策略
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub backoff_ms: u64,
    pub exponential: bool,
}

impl RetryPolicy {
    /// 第 attempt 次失败后（从 1 开始）的等待时长
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = if self.exponential {
            1u64 << attempt.saturating_sub(1).min(10)
        } else {
            1
        };
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }

    pub fn immediate() -> Self {
        Self {
            backoff_ms: 0,
            exponential: false,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_ms: 200,
            exponential: true,
        }
    }
}

/// attempt log 条目：一次失败的尝试
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptFailure {
    pub provider_id: String,
    /// 该提供商上的第几次尝试（从 1 开始）
    pub attempt: u32,
    pub reason: FailureKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl AttemptFailure {
    fn new(provider_id: &str, attempt: u32, err: &LlmError) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            attempt,
            reason: err.kind(),
            message: err.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// 成功结果：文本、产出的提供商，以及之前所有失败尝试
#[derive(Debug, Clone)]
pub struct ChainSuccess {
    pub text: String,
    pub provider_id: String,
    pub attempts: Vec<AttemptFailure>,
}

#[derive(Error, Debug, Clone)]
pub enum ChainError {
    #[error("All providers exhausted after {} failed attempts", attempts.len())]
    AllProvidersExhausted { attempts: Vec<AttemptFailure> },
}

impl ChainError {
    pub fn attempts(&self) -> &[AttemptFailure] {
        match self {
            ChainError::AllProvidersExhausted { attempts } => attempts,
        }
    }
}

/// 链配置错误（构建时校验）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainConfigError {
    #[error("Provider chain is empty")]
    Empty,
    #[error("Duplicate provider priority: {0}")]
    DuplicatePriority(u32),
    #[error("More than one provider is marked always-available")]
    MultipleAlwaysAvailable,
    #[error("Always-available provider '{0}' must occupy the last priority slot")]
    AlwaysAvailableNotLast(String),
}

/// 提供商降级链
pub struct ProviderChain {
    providers: Vec<(ProviderSpec, Arc<dyn LlmClient>)>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for ProviderChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderChain")
            .field("providers", &self.specs().collect::<Vec<_>>())
            .field("retry", &self.retry)
            .finish()
    }
}

impl ProviderChain {
    /// 按优先级排序并校验：非空、优先级唯一、至多一个 always_available 且位于末位
    pub fn new(
        mut providers: Vec<(ProviderSpec, Arc<dyn LlmClient>)>,
        retry: RetryPolicy,
    ) -> Result<Self, ChainConfigError> {
        if providers.is_empty() {
            return Err(ChainConfigError::Empty);
        }
        providers.sort_by_key(|(spec, _)| spec.priority);

        for pair in providers.windows(2) {
            if pair[0].0.priority == pair[1].0.priority {
                return Err(ChainConfigError::DuplicatePriority(pair[0].0.priority));
            }
        }

        let always: Vec<usize> = providers
            .iter()
            .enumerate()
            .filter(|(_, (spec, _))| spec.always_available)
            .map(|(i, _)| i)
            .collect();
        if always.len() > 1 {
            return Err(ChainConfigError::MultipleAlwaysAvailable);
        }
        if let Some(&idx) = always.first() {
            if idx != providers.len() - 1 {
                return Err(ChainConfigError::AlwaysAvailableNotLast(
                    providers[idx].0.provider_id.clone(),
                ));
            }
        }

        Ok(Self { providers, retry })
    }

    /// 按尝试顺序排列的提供商配置
    pub fn specs(&self) -> impl Iterator<Item = &ProviderSpec> {
        self.providers.iter().map(|(spec, _)| spec)
    }

    /// 各提供商累计 token 用量：(prompt, completion, total)
    pub fn usage(&self) -> impl Iterator<Item = (&ProviderSpec, (u64, u64, u64))> {
        self.providers
            .iter()
            .map(|(spec, client)| (spec, client.token_usage()))
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// 依优先级调用各后端，返回首个成功或聚合失败
    pub async fn generate(
        &self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<ChainSuccess, ChainError> {
        let mut attempts = Vec::new();

        for (spec, client) in &self.providers {
            let total = spec.max_retries.saturating_add(1);
            for attempt in 1..=total {
                let started = Instant::now();
                let outcome = if spec.timeout_ms == 0 {
                    client.complete(messages, params).await
                } else {
                    match tokio::time::timeout(
                        Duration::from_millis(spec.timeout_ms),
                        client.complete(messages, params),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(LlmError::Timeout(spec.timeout_ms)),
                    }
                };

                match outcome {
                    Ok(text) => {
                        info!(
                            provider = %spec.provider_id,
                            attempt,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            failed_before = attempts.len(),
                            "provider succeeded"
                        );
                        return Ok(ChainSuccess {
                            text,
                            provider_id: spec.provider_id.clone(),
                            attempts,
                        });
                    }
                    Err(err) => {
                        warn!(
                            provider = %spec.provider_id,
                            attempt,
                            max_attempts = total,
                            reason = ?err.kind(),
                            "provider attempt failed: {}",
                            err
                        );
                        let retry = err.is_retryable() && attempt < total;
                        attempts.push(AttemptFailure::new(&spec.provider_id, attempt, &err));
                        if !retry {
                            break;
                        }
                        let delay = self.retry.delay_after(attempt);
                        debug!(provider = %spec.provider_id, delay_ms = delay.as_millis() as u64, "retrying");
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }

        if let Some((spec, _)) = self.providers.last().filter(|(s, _)| s.always_available) {
            error!(
                provider = %spec.provider_id,
                "always-available provider failed; check its configuration"
            );
        }
        Err(ChainError::AllProvidersExhausted { attempts })
    }
}
