//! 会话调度：Semaphore 限制同时运行的会话数
//!
//! 每个会话在自己的 tokio 任务上独立运行，调度器只负责并发配额，不串行化无关会话。

use std::sync::Arc;

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// 会话调度器
#[derive(Debug, Clone)]
pub struct TaskScheduler {
    session_semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl TaskScheduler {
    pub fn new(max_concurrent_sessions: usize) -> Self {
        let capacity = max_concurrent_sessions.max(1);
        Self {
            session_semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// 获取会话执行许可；等待期间被取消则返回 None
    pub async fn acquire_session(
        &self,
        cancel: &CancellationToken,
    ) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = self.session_semaphore.clone().acquire_owned() => {
                permit.map_err(|_: AcquireError| ()).ok()
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 当前空闲许可数
    pub fn available(&self) -> usize {
        self.session_semaphore.available_permits()
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_permits_are_bounded() {
        let scheduler = TaskScheduler::new(2);
        let token = CancellationToken::new();
        let a = scheduler.acquire_session(&token).await;
        let b = scheduler.acquire_session(&token).await;
        assert!(a.is_some() && b.is_some());
        assert_eq!(scheduler.available(), 0);
        drop(a);
        assert_eq!(scheduler.available(), 1);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting() {
        let scheduler = TaskScheduler::new(1);
        let token = CancellationToken::new();
        let _held = scheduler.acquire_session(&token).await;

        let waiting = CancellationToken::new();
        waiting.cancel();
        assert!(scheduler.acquire_session(&waiting).await.is_none());
    }

    #[test]
    fn test_zero_capacity_clamped() {
        assert_eq!(TaskScheduler::new(0).capacity(), 1);
    }
}
