//! 工作流集成测试：经 RagAgent 端到端驱动，后端为脚本化 Mock

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use agentic_rag::config::{AppConfig, DeadlinePolicy, ProviderKind, ProviderSection};
use agentic_rag::llm::{
    FailureKind, GenerationParams, LlmClient, LlmError, Message, MockLlmClient, ProviderChain,
    ProviderSpec, RetryPolicy,
};
use agentic_rag::retrieval::{
    InMemoryRetriever, RetrievalError, RetrievalPort, RetrievedPassage,
};
use agentic_rag::workflow::WorkflowState;
use agentic_rag::{AgentError, FailureReason, RagAgent, TerminalState};
use async_trait::async_trait;

const QUESTION: &str = "How can adults lower their blood pressure?";

fn corpus() -> Vec<RetrievedPassage> {
    vec![
        RetrievedPassage::new(
            "hypertension-guide.pdf",
            0,
            "Hypertension is a resting blood pressure persistently at or above 130/80 mmHg.",
        ),
        RetrievedPassage::new(
            "hypertension-guide.pdf",
            214,
            "Lifestyle measures lower blood pressure in most adults: regular aerobic exercise, \
             reduced sodium intake and weight loss.",
        ),
        RetrievedPassage::new(
            "diabetes-overview.pdf",
            0,
            "Metformin is the usual first-line therapy for type 2 diabetes.",
        ),
    ]
}

const GOOD_ANSWER: &str =
    "Adults lower blood pressure through regular aerobic exercise, reduced sodium intake and weight loss [2].";

/// 阈值 0.7，置信度完全取自评审分数
fn config(max_iterations: u32) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.workflow.confidence_threshold = 0.7;
    cfg.workflow.max_iterations = max_iterations;
    cfg.evaluation.heuristic_weight = 0.0;
    cfg
}

fn chain(entries: Vec<(ProviderSpec, Arc<dyn LlmClient>)>) -> ProviderChain {
    ProviderChain::new(entries, RetryPolicy::immediate()).unwrap()
}

fn single(client: Arc<dyn LlmClient>) -> ProviderChain {
    chain(vec![(
        ProviderSpec::new(1, "local").always_available().with_max_retries(0),
        client,
    )])
}

fn agent(chain: ProviderChain, cfg: &AppConfig) -> RagAgent {
    RagAgent::new(chain, Arc::new(InMemoryRetriever::from_passages(corpus())), cfg)
}

fn ok(text: &str) -> Result<String, LlmError> {
    Ok(text.to_string())
}

struct UnavailableRetriever;

#[async_trait]
impl RetrievalPort for UnavailableRetriever {
    async fn search(&self, _query: &str, _k: usize) -> Result<Vec<RetrievedPassage>, RetrievalError> {
        Err(RetrievalError::Unavailable("index offline".to_string()))
    }
}

/// 前 fast 次调用立即返回，之后的调用长时间挂起
struct StagedClient {
    outcomes: Vec<String>,
    fast: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl LlmClient for StagedClient {
    async fn complete(
        &self,
        _messages: &[Message],
        _params: &GenerationParams,
    ) -> Result<String, LlmError> {
        let idx = self.calls.fetch_add(1, Ordering::SeqCst);
        if idx >= self.fast {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        Ok(self.outcomes[idx.min(self.outcomes.len() - 1)].clone())
    }
}

#[tokio::test]
async fn scenario_a_quota_error_falls_through_to_next_provider() {
    let gemini = Arc::new(MockLlmClient::failing(LlmError::RateLimited(
        "RESOURCE_EXHAUSTED: quota exceeded".into(),
    )));
    let openai = Arc::new(MockLlmClient::scripted(vec![
        ok(GOOD_ANSWER),
        ok("SCORE: 9/10\nDIAGNOSTIC: none"),
    ]));
    let local = Arc::new(MockLlmClient::new());
    let chain = chain(vec![
        (ProviderSpec::new(1, "gemini"), gemini.clone() as Arc<dyn LlmClient>),
        (ProviderSpec::new(2, "openai"), openai.clone() as Arc<dyn LlmClient>),
        (ProviderSpec::new(3, "local").always_available(), local.clone() as Arc<dyn LlmClient>),
    ]);

    let result = agent(chain, &config(3)).submit(QUESTION, None).await.unwrap();

    assert_eq!(result.terminal_state, TerminalState::Done);
    assert_eq!(result.provider_used.as_deref(), Some("openai"));
    assert_eq!(result.attempt_log.len(), 1);
    assert_eq!(result.attempt_log[0].provider_id, "gemini");
    assert_eq!(result.attempt_log[0].reason, FailureKind::Quota);
    assert_eq!(local.calls(), 0);
}

#[tokio::test]
async fn scenario_b_one_improvement_cycle_reaches_threshold() {
    let client = Arc::new(MockLlmClient::scripted(vec![
        ok("Adults can lower blood pressure with medication."),
        ok("SCORE: 5/10\nDIAGNOSTIC: ignores the lifestyle measures in source [2]"),
        ok(GOOD_ANSWER),
        ok("SCORE: 8/10\nDIAGNOSTIC: none"),
    ]));

    let result = agent(single(client.clone()), &config(3))
        .submit(QUESTION, None)
        .await
        .unwrap();

    assert_eq!(result.terminal_state, TerminalState::Done);
    assert_eq!(result.iterations, 2);
    assert!((result.confidence - 0.8).abs() < 1e-9);
    assert_eq!(result.answer, GOOD_ANSWER);
    assert_eq!(client.calls(), 4);
    assert_eq!(
        result.trace,
        vec![
            WorkflowState::Retrieve,
            WorkflowState::Analyze,
            WorkflowState::Generate,
            WorkflowState::Evaluate,
            WorkflowState::Improve,
            WorkflowState::Generate,
            WorkflowState::Evaluate,
            WorkflowState::Done,
        ]
    );
}

#[tokio::test]
async fn scenario_c_all_providers_fail() {
    let chain = chain(vec![
        (
            ProviderSpec::new(1, "gemini"),
            Arc::new(MockLlmClient::failing(LlmError::Auth("invalid key".into()))) as Arc<dyn LlmClient>,
        ),
        (
            ProviderSpec::new(2, "openai"),
            Arc::new(MockLlmClient::failing(LlmError::Timeout(30_000))) as Arc<dyn LlmClient>,
        ),
        (
            ProviderSpec::new(3, "local").always_available(),
            Arc::new(MockLlmClient::failing(LlmError::Connection("connection refused".into())))
                as Arc<dyn LlmClient>,
        ),
    ]);

    let result = agent(chain, &config(3)).submit(QUESTION, None).await.unwrap();

    assert_eq!(result.terminal_state, TerminalState::Failed);
    assert_eq!(result.error, Some(FailureReason::AllProvidersExhausted));
    assert!(result.answer.is_empty());
    assert!(result.provider_used.is_none());
    assert!(result.citations.is_empty());

    // 每个提供商都有记录，且按优先级排列
    let mut seen: Vec<&str> = result
        .attempt_log
        .iter()
        .map(|a| a.provider_id.as_str())
        .collect();
    seen.dedup();
    assert_eq!(seen, vec!["gemini", "openai", "local"]);
    assert_eq!(result.attempt_log[0].reason, FailureKind::Auth);
}

#[tokio::test]
async fn scenario_d_cap_returns_best_candidate() {
    let client = Arc::new(MockLlmClient::scripted(vec![
        ok("First attempt about blood pressure."),
        ok("SCORE: 4/10\nDIAGNOSTIC: too vague"),
        ok(GOOD_ANSWER),
        ok("SCORE: 5/10\nDIAGNOSTIC: lacks thresholds"),
        ok("Third attempt mentioning sodium."),
        ok("SCORE: 4.5/10\nDIAGNOSTIC: incomplete"),
    ]));

    let result = agent(single(client), &config(3))
        .submit(QUESTION, None)
        .await
        .unwrap();

    assert_eq!(result.terminal_state, TerminalState::Capped);
    assert_eq!(result.iterations, 3);
    assert!((result.confidence - 0.5).abs() < 1e-9);
    assert_eq!(result.answer, GOOD_ANSWER);
    assert!(result.error.is_none());
    assert!(!result.citations.is_empty());
}

#[tokio::test]
async fn scenario_e_empty_retrieval_still_generates() {
    let client = Arc::new(MockLlmClient::scripted(vec![
        ok("Without sources: exercise and less salt usually help."),
        ok("SCORE: 7/10"),
    ]));
    let agent = RagAgent::new(
        single(client),
        Arc::new(InMemoryRetriever::new()),
        &config(3),
    );

    let result = agent.submit(QUESTION, None).await.unwrap();

    assert_eq!(result.terminal_state, TerminalState::Done);
    assert!(result.citations.is_empty());
    assert!(result.trace.contains(&WorkflowState::Generate));
}

#[tokio::test]
async fn retrieval_unavailable_degrades_to_empty_context() {
    let client = Arc::new(MockLlmClient::scripted(vec![
        ok("Exercise and reduced sodium intake help."),
        ok("SCORE: 8/10"),
    ]));
    let agent = RagAgent::new(single(client), Arc::new(UnavailableRetriever), &config(3));

    let result = agent.submit(QUESTION, None).await.unwrap();

    assert_eq!(result.terminal_state, TerminalState::Done);
    assert!(result.citations.is_empty());
    assert!(result.error.is_none());
}

#[tokio::test]
async fn citations_point_into_prompt_passages() {
    let client = Arc::new(MockLlmClient::scripted(vec![
        ok(GOOD_ANSWER),
        ok("SCORE: 9/10"),
    ]));
    let result = agent(single(client), &config(3))
        .submit(QUESTION, None)
        .await
        .unwrap();

    assert!(!result.citations.is_empty());
    let passages = corpus();
    for citation in &result.citations {
        let source = passages
            .iter()
            .find(|p| {
                p.document_id == citation.document_id
                    && p.range.start <= citation.offset
                    && citation.offset < p.range.end
            })
            .expect("citation must map to a retrieved passage");
        assert!(source.text.contains(&citation.snippet));
    }
    assert!(result
        .citations
        .iter()
        .all(|c| c.document_id != "diabetes-overview.pdf"));
}

#[tokio::test]
async fn critique_failure_is_flagged_not_fatal() {
    // 生成成功，评审调用全部失败
    let client = Arc::new(MockLlmClient::scripted(vec![
        ok(GOOD_ANSWER),
        Err(LlmError::Connection("reset".into())),
    ]));
    let mut cfg = config(1);
    cfg.evaluation.heuristic_weight = 0.3;

    let result = agent(single(client), &cfg).submit(QUESTION, None).await.unwrap();

    assert_ne!(result.terminal_state, TerminalState::Failed);
    assert!(result.evaluation_degraded);
    assert!(result.diagnostic.contains("degraded"));
    // 评审失败不进入生成调用的 attempt log
    assert!(result.attempt_log.is_empty());
}

#[tokio::test]
async fn invalid_query_is_rejected() {
    let agent = agent(single(Arc::new(MockLlmClient::new())), &config(3));
    let err = agent.submit("  \t ", None).await.unwrap_err();
    assert!(matches!(err, AgentError::InvalidQuery(_)));
}

#[tokio::test]
async fn cancel_drops_in_flight_call() {
    let client = Arc::new(MockLlmClient::new().with_delay(Duration::from_secs(30)));
    let agent = agent(single(client.clone()), &config(3));

    let handle = agent.start(QUESTION, None).unwrap();
    let id = handle.id().to_string();
    while client.in_flight() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(agent.cancel(&id));

    let result = tokio::time::timeout(Duration::from_secs(5), handle.join())
        .await
        .expect("cancelled session must finish promptly")
        .unwrap();

    assert_eq!(result.terminal_state, TerminalState::Failed);
    assert_eq!(result.error, Some(FailureReason::Cancelled));
    assert_eq!(client.in_flight(), 0);
    assert_eq!(agent.active_sessions(), 0);
    assert!(!agent.cancel(&id));
}

#[tokio::test]
async fn abandoned_submit_releases_provider_call() {
    let client = Arc::new(MockLlmClient::new().with_delay(Duration::from_secs(30)));
    let agent = agent(single(client.clone()), &config(3));

    let gave_up = tokio::time::timeout(Duration::from_millis(100), agent.submit(QUESTION, None)).await;
    assert!(gave_up.is_err());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(client.in_flight(), 0);
    assert_eq!(agent.active_sessions(), 0);
}

#[tokio::test]
async fn deadline_fails_session() {
    let client = Arc::new(MockLlmClient::new().with_delay(Duration::from_secs(30)));
    let mut cfg = config(3);
    cfg.workflow.session_deadline_ms = Some(100);

    let started = Instant::now();
    let result = agent(single(client.clone()), &cfg).submit(QUESTION, None).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(result.terminal_state, TerminalState::Failed);
    assert_eq!(result.error, Some(FailureReason::DeadlineExceeded));
    assert_eq!(client.in_flight(), 0);
}

#[tokio::test]
async fn deadline_with_best_so_far_returns_candidate() {
    let client = Arc::new(StagedClient {
        outcomes: vec![
            GOOD_ANSWER.to_string(),
            "SCORE: 3/10\nDIAGNOSTIC: needs numbers".to_string(),
            "never returned".to_string(),
        ],
        fast: 2,
        calls: AtomicUsize::new(0),
    });
    let mut cfg = config(3);
    cfg.workflow.session_deadline_ms = Some(300);
    cfg.workflow.on_deadline = DeadlinePolicy::BestSoFar;

    let result = agent(single(client), &cfg).submit(QUESTION, None).await.unwrap();

    assert_eq!(result.terminal_state, TerminalState::Done);
    assert_eq!(result.answer, GOOD_ANSWER);
    assert!((result.confidence - 0.3).abs() < 1e-9);
    assert!(result.diagnostic.contains("deadline"));
}

#[tokio::test]
async fn identical_inputs_give_identical_outcomes() {
    async fn run_once() -> (TerminalState, Vec<String>, u32) {
        let gemini = Arc::new(MockLlmClient::failing(LlmError::Timeout(10)));
        let local = Arc::new(MockLlmClient::scripted(vec![
            ok("Adults can lower blood pressure with medication."),
            ok("SCORE: 6/10"),
            ok(GOOD_ANSWER),
            ok("SCORE: 9/10"),
        ]));
        let chain = chain(vec![
            (ProviderSpec::new(1, "gemini").with_max_retries(0), gemini as Arc<dyn LlmClient>),
            (ProviderSpec::new(2, "local").always_available(), local as Arc<dyn LlmClient>),
        ]);
        let result = agent(chain, &config(3)).submit(QUESTION, None).await.unwrap();
        (result.terminal_state, result.provider_sequence, result.iterations)
    }

    let first = run_once().await;
    let second = run_once().await;
    assert_eq!(first, second);
    assert_eq!(first.1, vec!["local".to_string(), "local".to_string()]);
}

#[tokio::test]
async fn sessions_run_concurrently() {
    let client = Arc::new(MockLlmClient::new().with_delay(Duration::from_millis(200)));
    let mut cfg = config(1);
    cfg.app.max_concurrent_sessions = 8;
    let agent = agent(single(client), &cfg);

    let started = Instant::now();
    let handles: Vec<_> = (0..4)
        .map(|i| agent.start(&format!("{QUESTION} case {i}"), None).unwrap())
        .collect();
    let ids: std::collections::HashSet<String> =
        handles.iter().map(|h| h.id().to_string()).collect();
    assert_eq!(ids.len(), 4);

    let results = futures_util::future::join_all(handles.into_iter().map(|h| h.join())).await;

    // 每个会话两次 200ms 调用；串行需要约 1.6s
    assert!(started.elapsed() < Duration::from_millis(1200));
    for result in results {
        assert_ne!(result.unwrap().terminal_state, TerminalState::Failed);
    }
    assert_eq!(agent.active_sessions(), 0);
}

#[tokio::test]
async fn agent_from_config_builds_chain() {
    let mut cfg = config(3);
    cfg.providers = vec![ProviderSection {
        priority: 1,
        id: "offline".into(),
        kind: ProviderKind::Mock,
        endpoint: None,
        model: None,
        api_key_env: None,
        credentials_optional: true,
        timeout_ms: 1_000,
        max_retries: 0,
        always_available: true,
    }];
    let agent = RagAgent::from_config(&cfg, Arc::new(InMemoryRetriever::from_passages(corpus())))
        .unwrap();

    let status = agent.status();
    assert_eq!(status.providers.len(), 1);
    assert_eq!(status.providers[0].id, "offline");
    assert!(status.providers[0].credentials_present);

    let result = agent.submit(QUESTION, Some("en-GB")).await.unwrap();
    assert_eq!(result.provider_used.as_deref(), Some("offline"));
}

#[tokio::test]
async fn misordered_always_available_is_rejected() {
    let mut cfg = config(3);
    let mut first = agentic_rag::config::default_providers();
    first[0].always_available = true;
    cfg.providers = first;
    let err = RagAgent::from_config(&cfg, Arc::new(InMemoryRetriever::new())).err();
    assert!(matches!(err, Some(AgentError::ChainConfig(_))));
}
