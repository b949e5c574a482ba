//! Mock LLM 客户端（用于测试与离线运行，无需 API）
//!
//! 按脚本依次返回预设结果；脚本耗尽后重复最后一条（为空时回显最后一条 User 消息）。
//! 可选延迟用于超时 / 取消测试，并统计调用次数与在途请求数。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{GenerationParams, LlmClient, LlmError, Message, Role};

/// Mock 客户端：脚本化输出
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    last: Mutex<Option<Result<String, LlmError>>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: Arc<AtomicUsize>,
}

/// 在途计数守卫：future 被丢弃（取消 / 超时）时同样会递减
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockLlmClient {
    /// 回显模式
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(outcomes: Vec<Result<String, LlmError>>) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
            ..Self::default()
        }
    }

    /// 每次调用都失败
    pub fn failing(error: LlmError) -> Self {
        Self::scripted(vec![Err(error)])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn next_outcome(&self, messages: &[Message]) -> Result<String, LlmError> {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(outcome) = script.pop_front() {
            *last = Some(outcome.clone());
            return outcome;
        }
        if let Some(outcome) = last.as_ref() {
            return outcome.clone();
        }
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(format!("Echo from Mock: {last_user}"))
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        _params: &GenerationParams,
    ) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlight(self.in_flight.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.next_outcome(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_repeat_last() {
        let mock = MockLlmClient::scripted(vec![
            Err(LlmError::Timeout(1)),
            Ok("second".to_string()),
        ]);
        let params = GenerationParams::default();
        assert!(mock.complete(&[], &params).await.is_err());
        assert_eq!(mock.complete(&[], &params).await.unwrap(), "second");
        assert_eq!(mock.complete(&[], &params).await.unwrap(), "second");
        assert_eq!(mock.calls(), 3);
        assert_eq!(mock.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_echo_mode() {
        let mock = MockLlmClient::new();
        let out = mock
            .complete(&[Message::user("hello")], &GenerationParams::default())
            .await
            .unwrap();
        assert!(out.contains("hello"));
    }
}
