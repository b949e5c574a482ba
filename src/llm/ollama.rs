//! Ollama 本地模型客户端（/api/chat，无需凭证）
//!
//! 作为降级链末位的 always-available 后端。

use async_trait::async_trait;

use crate::llm::{GenerationParams, LlmClient, LlmError, Message, Role, TokenUsage};

pub const OLLAMA_BASE_URL: &str = "http://localhost:11434";
pub const OLLAMA_DEFAULT_MODEL: &str = "llama3.2";

pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    usage: TokenUsage,
}

impl OllamaClient {
    pub fn new(base_url: Option<&str>, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.unwrap_or(OLLAMA_BASE_URL).trim_end_matches('/').to_string(),
            model: model.to_string(),
            usage: TokenUsage::new(),
        }
    }

    fn build_body(&self, messages: &[Message], params: &GenerationParams) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                serde_json::json!({"role": role, "content": m.content})
            })
            .collect();

        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "options": {
                "temperature": params.temperature,
                "num_predict": params.max_tokens,
            }
        })
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete(
        &self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<String, LlmError> {
        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&self.build_body(messages, params))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status.as_u16(), error_text));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::ApiError(format!("invalid Ollama response: {e}")))?;

        self.usage.add(
            json["prompt_eval_count"].as_u64().unwrap_or(0),
            json["eval_count"].as_u64().unwrap_or(0),
        );

        let text = json["message"]["content"].as_str().unwrap_or("").to_string();
        if text.trim().is_empty() {
            return Err(LlmError::ApiError("empty Ollama completion".to_string()));
        }
        Ok(text)
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }
}
