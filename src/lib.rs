//! Agentic RAG - 检索 / 生成 / 自我评估闭环
//!
//! 模块划分：
//! - **agent**: RagAgent 上下文对象（submit / start / cancel / status）
//! - **citation**: 引用绑定（答案片段 -> 检索段）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、会话监管（取消）、会话调度（并发配额）
//! - **evaluation**: 启发式检查与自我评审打分
//! - **llm**: LLM 客户端抽象、各后端实现与降级链
//! - **observability**: tracing 日志初始化
//! - **retrieval**: 检索端口与内存实现
//! - **tokenizer**: 中英文分词与重叠度量
//! - **workflow**: 状态机、ANALYZE、prompt 构建与控制器

pub mod agent;
pub mod citation;
pub mod config;
pub mod core;
pub mod evaluation;
pub mod llm;
pub mod observability;
pub mod retrieval;
pub mod tokenizer;
pub mod workflow;

pub use agent::{RagAgent, SessionHandle, SystemStatus};
pub use crate::core::{AgentError, FailureReason};
pub use workflow::{TerminalState, WorkflowResult};
