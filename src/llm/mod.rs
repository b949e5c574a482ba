//! LLM 层：客户端抽象、各后端实现（Gemini / OpenAI 兼容 / DeepSeek / Ollama / Mock）与降级链

pub mod chain;
pub mod deepseek;
pub mod factory;
pub mod gemini;
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod traits;

pub use chain::{
    AttemptFailure, ChainConfigError, ChainError, ChainSuccess, ProviderChain, ProviderSpec,
    RetryPolicy,
};
pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT};
pub use factory::create_chain_from_config;
pub use gemini::{GeminiClient, GEMINI_DEFAULT_MODEL};
pub use mock::MockLlmClient;
pub use ollama::{OllamaClient, OLLAMA_DEFAULT_MODEL};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{FailureKind, GenerationParams, LlmClient, LlmError, Message, Role};
