//! 根据 [[providers]] 配置构建降级链

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{AppConfig, ProviderKind, ProviderSection};
use crate::llm::{
    create_deepseek_client, ChainConfigError, GeminiClient, LlmClient, MockLlmClient,
    OllamaClient, OpenAiClient, ProviderChain, ProviderSpec, RetryPolicy, GEMINI_DEFAULT_MODEL,
    OLLAMA_DEFAULT_MODEL,
};

/// 按后端类型创建客户端；缺少凭证时仍创建（调用时返回 Auth 错误并记入 attempt log）
pub fn create_client(section: &ProviderSection) -> Arc<dyn LlmClient> {
    let api_key = section.api_key();
    if api_key.is_none() && !section.has_credentials() {
        warn!(provider = %section.id, "no API key found; attempts will fail with an auth error");
    }
    let endpoint = section.endpoint.as_deref();
    let model = section.model.as_deref();

    match section.kind {
        ProviderKind::Gemini => Arc::new(GeminiClient::new(
            endpoint,
            model.unwrap_or(GEMINI_DEFAULT_MODEL),
            api_key.as_deref(),
        )),
        ProviderKind::OpenAi => Arc::new(OpenAiClient::new(
            endpoint,
            model.unwrap_or("gpt-4o-mini"),
            api_key.as_deref(),
        )),
        ProviderKind::DeepSeek => {
            Arc::new(create_deepseek_client(endpoint, model, api_key.as_deref()))
        }
        ProviderKind::Ollama => Arc::new(OllamaClient::new(
            endpoint,
            model.unwrap_or(OLLAMA_DEFAULT_MODEL),
        )),
        ProviderKind::Mock => Arc::new(MockLlmClient::new()),
    }
}

pub fn spec_from_section(section: &ProviderSection) -> ProviderSpec {
    ProviderSpec {
        priority: section.priority,
        provider_id: section.id.clone(),
        endpoint: section.endpoint.clone(),
        credentials_optional: section.credentials_optional || section.always_available,
        timeout_ms: section.timeout_ms,
        max_retries: section.max_retries,
        always_available: section.always_available,
    }
}

/// 从配置构建 ProviderChain（顺序与 always-available 约束在此校验）
pub fn create_chain_from_config(cfg: &AppConfig) -> Result<ProviderChain, ChainConfigError> {
    let providers: Vec<(ProviderSpec, Arc<dyn LlmClient>)> = cfg
        .effective_providers()
        .iter()
        .map(|section| {
            info!(
                provider = %section.id,
                kind = ?section.kind,
                priority = section.priority,
                always_available = section.always_available,
                "registering provider"
            );
            (spec_from_section(section), create_client(section))
        })
        .collect();

    ProviderChain::new(
        providers,
        RetryPolicy {
            backoff_ms: cfg.chain.retry_backoff_ms,
            exponential: cfg.chain.exponential_backoff,
        },
    )
}
