//! 工作流：状态机类型、ANALYZE、prompt 构建、会话状态与控制器

pub mod analyze;
pub mod engine;
pub mod prompt;
pub mod session;
pub mod types;

pub use analyze::{analyze, GenerationPlan, LengthHint, QueryKind};
pub use engine::WorkflowController;
pub use session::{WorkflowError, WorkflowSession};
pub use types::*;
