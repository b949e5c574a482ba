//! 核心层：错误类型、会话监管（取消）、会话调度（并发配额）

pub mod error;
pub mod session_supervisor;
pub mod task_scheduler;

pub use error::{AgentError, FailureReason};
pub use session_supervisor::{SessionGuard, SessionSupervisor};
pub use task_scheduler::TaskScheduler;
