//! DeepSeek API 客户端（OpenAI 兼容格式）
//!
//! DeepSeek 提供与 OpenAI 完全兼容的 API 接口。
//! - Base URL: https://api.deepseek.com
//! - 默认模型: deepseek-chat

use crate::llm::OpenAiClient;

/// DeepSeek API 常量
pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";

/// 创建 DeepSeek 客户端
///
/// - endpoint 未配置时使用官方地址
/// - 模型未配置时使用 `deepseek-chat`
pub fn create_deepseek_client(
    endpoint: Option<&str>,
    model: Option<&str>,
    api_key: Option<&str>,
) -> OpenAiClient {
    let model = model.unwrap_or(DEEPSEEK_CHAT);
    OpenAiClient::new(
        Some(endpoint.unwrap_or(DEEPSEEK_BASE_URL)),
        model,
        api_key,
    )
}
