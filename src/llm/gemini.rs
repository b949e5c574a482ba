//! Google Gemini 客户端（generateContent REST 接口）

use async_trait::async_trait;
use reqwest::header;

use crate::llm::{GenerationParams, LlmClient, LlmError, Message, Role, TokenUsage};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const GEMINI_DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Gemini 客户端：system 消息单独放入 systemInstruction
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    usage: TokenUsage,
}

impl GeminiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.unwrap_or(GEMINI_BASE_URL).trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()).map(String::from),
            usage: TokenUsage::new(),
        }
    }

    fn build_body(messages: &[Message], params: &GenerationParams) -> serde_json::Value {
        let contents: Vec<serde_json::Value> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                let role = match m.role {
                    Role::Assistant => "model",
                    _ => "user",
                };
                serde_json::json!({
                    "role": role,
                    "parts": [{"text": m.content}]
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": {
                "temperature": params.temperature,
                "maxOutputTokens": params.max_tokens,
            }
        });

        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        if !system.is_empty() {
            body["systemInstruction"] = serde_json::json!({
                "parts": [{"text": system.join("\n\n")}]
            });
        }
        body
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn complete(
        &self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<String, LlmError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| LlmError::Auth("missing API key".to_string()))?;

        // 密钥只走请求头，URL 会出现在传输错误信息里
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        let response = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-goog-api-key", api_key)
            .json(&Self::build_body(messages, params))
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
            .map_err(|e| LlmError::ApiError(format!("invalid Gemini response: {e}")))?;

        let meta = &json["usageMetadata"];
        self.usage.add(
            meta["promptTokenCount"].as_u64().unwrap_or(0),
            meta["candidatesTokenCount"].as_u64().unwrap_or(0),
        );

        let text = json["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .unwrap_or("")
            .to_string();

        if text.trim().is_empty() {
            let reason = json["candidates"][0]["finishReason"]
                .as_str()
                .unwrap_or("no candidates");
            return Err(LlmError::ApiError(format!("empty Gemini completion ({reason})")));
        }
        Ok(text)
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }
}
