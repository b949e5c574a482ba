//! RAG Agent 运行时
//!
//! 进程内只构建一次的上下文对象：持有 ProviderChain、检索端口、阈值与迭代上限，
//! 每个查询在自己的 tokio 任务上运行一个 WorkflowSession。
//! submit 等待结果；start 立即返回会话 ID，可随后 cancel(session_id)。
//! 句柄（或 submit 的 future）未等到结果就被丢弃时，会话随之取消。

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::DropGuard;
use tracing::info;

use crate::config::AppConfig;
use crate::core::{AgentError, SessionSupervisor, TaskScheduler};
use crate::llm::{create_chain_from_config, ProviderChain};
use crate::retrieval::RetrievalPort;
use crate::workflow::{Query, SessionId, WorkflowController, WorkflowResult};

/// 已启动的会话；丢弃句柄即取消会话
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    handle: JoinHandle<WorkflowResult>,
    cancel_on_drop: DropGuard,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 等待会话结束
    pub async fn join(self) -> Result<WorkflowResult, AgentError> {
        let SessionHandle {
            handle,
            cancel_on_drop,
            ..
        } = self;
        // 等待中途被丢弃时 cancel_on_drop 随 future 一起释放
        let result = handle
            .await
            .map_err(|e| AgentError::SessionAborted(e.to_string()));
        cancel_on_drop.disarm();
        result
    }
}

/// 提供商状态（status 输出）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub id: String,
    pub priority: u32,
    pub always_available: bool,
    pub credentials_present: bool,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// 系统状态
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub name: String,
    pub providers: Vec<ProviderStatus>,
    pub confidence_threshold: f64,
    pub max_iterations: u32,
    pub top_k: usize,
    pub active_sessions: usize,
    pub max_concurrent_sessions: usize,
}

#[derive(Clone)]
pub struct RagAgent {
    name: String,
    chain: Arc<ProviderChain>,
    controller: Arc<WorkflowController>,
    supervisor: Arc<SessionSupervisor>,
    scheduler: TaskScheduler,
    max_query_chars: usize,
    /// provider_id -> 是否具备凭证
    credentials: HashMap<String, bool>,
}

impl RagAgent {
    /// 由配置构建：校验配置并按 [[providers]] 创建降级链
    pub fn from_config(
        cfg: &AppConfig,
        retriever: Arc<dyn RetrievalPort>,
    ) -> Result<Self, AgentError> {
        cfg.validate()?;
        let chain = create_chain_from_config(cfg)?;
        let mut agent = Self::new(chain, retriever, cfg);
        agent.credentials = cfg
            .effective_providers()
            .iter()
            .map(|p| (p.id.clone(), p.has_credentials()))
            .collect();
        Ok(agent)
    }

    /// 使用现成的降级链构建（测试或嵌入方自行组装后端时）
    pub fn new(chain: ProviderChain, retriever: Arc<dyn RetrievalPort>, cfg: &AppConfig) -> Self {
        let chain = Arc::new(chain);
        let credentials = chain
            .specs()
            .map(|s| (s.provider_id.clone(), s.credentials_optional))
            .collect();
        let controller = WorkflowController::new(
            Arc::clone(&chain),
            retriever,
            cfg.workflow.clone(),
            cfg.evaluation.clone(),
        );
        Self {
            name: cfg
                .app
                .name
                .clone()
                .unwrap_or_else(|| "agentic-rag".to_string()),
            chain,
            controller: Arc::new(controller),
            supervisor: Arc::new(SessionSupervisor::new()),
            scheduler: TaskScheduler::new(cfg.app.max_concurrent_sessions),
            max_query_chars: cfg.workflow.max_query_chars,
            credentials,
        }
    }

    /// 提交查询并等待结果；非法查询在进入 RETRIEVE 前直接返回 InvalidQuery
    pub async fn submit(
        &self,
        text: &str,
        locale: Option<&str>,
    ) -> Result<WorkflowResult, AgentError> {
        self.start(text, locale)?.join().await
    }

    /// 启动会话并立即返回句柄
    pub fn start(&self, text: &str, locale: Option<&str>) -> Result<SessionHandle, AgentError> {
        let mut query = Query::new(text, self.max_query_chars)?;
        if let Some(locale) = locale {
            query = query.with_locale(locale);
        }

        let id: SessionId = uuid::Uuid::new_v4().to_string();
        // 先注册再 spawn，返回后即可 cancel
        let guard = self.supervisor.register(id.clone());
        let cancel_on_drop = guard.token().drop_guard();
        let controller = Arc::clone(&self.controller);
        let scheduler = self.scheduler.clone();
        info!(session_id = %id, chars = query.text().chars().count(), "query submitted");

        let session_id = id.clone();
        let handle = tokio::spawn(async move {
            let token = guard.token();
            // 排队期间被取消时 run 会立即以 CANCELLED 结束
            let _permit = scheduler.acquire_session(&token).await;
            let result = controller.run(session_id, &query, token).await;
            drop(guard);
            result
        });

        Ok(SessionHandle {
            id,
            handle,
            cancel_on_drop,
        })
    }

    /// 取消会话；会话不存在或已结束时返回 false
    pub fn cancel(&self, session_id: &str) -> bool {
        let found = self.supervisor.cancel(session_id);
        info!(session_id, found, "cancel requested");
        found
    }

    /// 取消全部在途会话
    pub fn shutdown(&self) {
        self.supervisor.cancel_all();
    }

    pub fn active_sessions(&self) -> usize {
        self.supervisor.active_sessions()
    }

    pub fn status(&self) -> SystemStatus {
        let settings = self.controller.settings();
        SystemStatus {
            name: self.name.clone(),
            providers: self
                .chain
                .usage()
                .map(|(spec, (prompt, completion, total))| ProviderStatus {
                    id: spec.provider_id.clone(),
                    priority: spec.priority,
                    always_available: spec.always_available,
                    credentials_present: self
                        .credentials
                        .get(&spec.provider_id)
                        .copied()
                        .unwrap_or(spec.credentials_optional),
                    timeout_ms: spec.timeout_ms,
                    max_retries: spec.max_retries,
                    prompt_tokens: prompt,
                    completion_tokens: completion,
                    total_tokens: total,
                })
                .collect(),
            confidence_threshold: settings.confidence_threshold,
            max_iterations: settings.max_iterations,
            top_k: settings.top_k,
            active_sessions: self.supervisor.active_sessions(),
            max_concurrent_sessions: self.scheduler.capacity(),
        }
    }
}
