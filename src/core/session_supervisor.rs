//! 会话监管：每个会话一个取消令牌
//!
//! register 返回 SessionGuard，守卫被丢弃时自动注销；cancel(session_id) 触发对应令牌，
//! 工作流在每个 I/O 挂起点监听该令牌并立即丢弃在途调用。
//! 注册表锁只在增删查时短暂持有，会话执行期间不持锁。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::workflow::SessionId;

#[derive(Debug, Default)]
pub struct SessionSupervisor {
    /// 根令牌：shutdown 时取消所有会话
    root: CancellationToken,
    sessions: Mutex<HashMap<SessionId, CancellationToken>>,
}

/// 会话存活期间持有；Drop 时从注册表移除
#[derive(Debug)]
pub struct SessionGuard {
    id: SessionId,
    token: CancellationToken,
    supervisor: Arc<SessionSupervisor>,
}

impl SessionGuard {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.supervisor.unregister(&self.id);
    }
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册会话，令牌为根令牌的子令牌
    pub fn register(self: &Arc<Self>, id: SessionId) -> SessionGuard {
        let token = self.root.child_token();
        self.lock().insert(id.clone(), token.clone());
        SessionGuard {
            id,
            token,
            supervisor: Arc::clone(self),
        }
    }

    /// 取消指定会话；会话不存在（未注册或已结束）时返回 false
    pub fn cancel(&self, id: &str) -> bool {
        match self.lock().get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// 取消全部会话（进程退出）
    pub fn cancel_all(&self) {
        self.root.cancel();
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn active_sessions(&self) -> usize {
        self.lock().len()
    }

    fn unregister(&self, id: &str) {
        self.lock().remove(id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, CancellationToken>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_cancel_unregister() {
        let supervisor = Arc::new(SessionSupervisor::new());
        let guard = supervisor.register("s1".to_string());
        assert!(supervisor.is_active("s1"));
        assert!(!guard.token().is_cancelled());

        assert!(supervisor.cancel("s1"));
        assert!(guard.token().is_cancelled());

        drop(guard);
        assert!(!supervisor.is_active("s1"));
        assert!(!supervisor.cancel("s1"));
    }

    #[test]
    fn test_cancel_all_reaches_children() {
        let supervisor = Arc::new(SessionSupervisor::new());
        let a = supervisor.register("a".to_string());
        let b = supervisor.register("b".to_string());
        assert_eq!(supervisor.active_sessions(), 2);
        supervisor.cancel_all();
        assert!(a.token().is_cancelled());
        assert!(b.token().is_cancelled());
    }

    #[test]
    fn test_cancel_is_isolated() {
        let supervisor = Arc::new(SessionSupervisor::new());
        let a = supervisor.register("a".to_string());
        let b = supervisor.register("b".to_string());
        supervisor.cancel("a");
        assert!(a.token().is_cancelled());
        assert!(!b.token().is_cancelled());
    }
}
