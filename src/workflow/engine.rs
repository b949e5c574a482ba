//! 工作流控制器
//!
//! 固定形态的状态机：RETRIEVE -> ANALYZE -> GENERATE -> EVALUATE -> (IMPROVE -> GENERATE)* -> DONE / FAILED。
//! 每个 I/O 调用（检索、生成、自我评审）都与取消令牌和会话截止时间一起 select，
//! 中断时在途 future 被直接丢弃，不留孤儿调用。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::citation::CitationBinder;
use crate::config::{DeadlinePolicy, EvaluationSection, WorkflowSection};
use crate::core::FailureReason;
use crate::evaluation::ConfidenceEvaluator;
use crate::llm::{ChainError, ProviderChain};
use crate::retrieval::RetrievalPort;
use crate::workflow::analyze::analyze;
use crate::workflow::prompt::{generation_messages, select_context, Revision, DEFAULT_SYSTEM_PROMPT};
use crate::workflow::session::{ScoredCandidate, SessionParts, WorkflowError, WorkflowSession};
use crate::workflow::{Candidate, Query, SessionId, TerminalState, WorkflowResult, WorkflowState};

/// 外部中断
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Cancelled,
    Deadline,
}

/// 会话未正常结束的原因
#[derive(Debug)]
enum Stop {
    Exhausted,
    Interrupted(Interrupt),
    Invalid(WorkflowError),
}

impl From<Interrupt> for Stop {
    fn from(interrupt: Interrupt) -> Self {
        Stop::Interrupted(interrupt)
    }
}

impl From<WorkflowError> for Stop {
    fn from(err: WorkflowError) -> Self {
        Stop::Invalid(err)
    }
}

pub struct WorkflowController {
    chain: Arc<ProviderChain>,
    retriever: Arc<dyn RetrievalPort>,
    evaluator: ConfidenceEvaluator,
    binder: CitationBinder,
    settings: WorkflowSection,
}

impl WorkflowController {
    pub fn new(
        chain: Arc<ProviderChain>,
        retriever: Arc<dyn RetrievalPort>,
        settings: WorkflowSection,
        evaluation: EvaluationSection,
    ) -> Self {
        let binder = CitationBinder::new(evaluation.min_overlap_terms, 8);
        let evaluator =
            ConfidenceEvaluator::new(Arc::clone(&chain), evaluation, settings.confidence_threshold);
        Self {
            chain,
            retriever,
            evaluator,
            binder,
            settings,
        }
    }

    pub fn settings(&self) -> &WorkflowSection {
        &self.settings
    }

    /// 运行一个会话直到终止状态；总是返回结构化结果
    pub async fn run(
        &self,
        session_id: SessionId,
        query: &Query,
        cancel: CancellationToken,
    ) -> WorkflowResult {
        let deadline = self
            .settings
            .session_deadline_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));
        let mut session = WorkflowSession::new(session_id);
        info!(session_id = %session.id(), "session started");

        let outcome = self.drive(&mut session, query, &cancel, deadline).await;
        self.finish(session, outcome)
    }

    /// 与取消、截止时间竞争的 I/O 调用
    async fn guarded<F: Future>(
        &self,
        fut: F,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<F::Output, Interrupt> {
        let expiry = async {
            match deadline {
                Some(at) => sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Interrupt::Cancelled),
            _ = expiry => Err(Interrupt::Deadline),
            out = fut => Ok(out),
        }
    }

    async fn drive(
        &self,
        session: &mut WorkflowSession,
        query: &Query,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<TerminalState, Stop> {
        let top_k = self.settings.top_k;

        // RETRIEVE
        let retrieved = match self
            .guarded(self.retriever.search(query.text(), top_k), cancel, deadline)
            .await?
        {
            Ok(passages) => passages,
            Err(err) => {
                warn!(
                    session_id = %session.id(),
                    "retrieval unavailable, continuing with empty context: {}",
                    err
                );
                Vec::new()
            }
        };
        session.retrieved = retrieved.into_iter().take(top_k).map(Arc::new).collect();
        session.transition(WorkflowState::Analyze)?;

        // ANALYZE
        let passages = select_context(&session.retrieved, self.settings.max_context_chars);
        let plan = analyze(query, passages.len());
        debug!(
            session_id = %session.id(),
            retrieved = session.retrieved.len(),
            in_prompt = passages.len(),
            kind = ?plan.kind,
            length = ?plan.length,
            "generation plan ready"
        );
        let system_prompt = self
            .settings
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);
        session.transition(WorkflowState::Generate)?;

        loop {
            // GENERATE
            let messages = {
                let revision = session.last().map(|last| Revision {
                    previous_answer: &last.candidate.answer,
                    feedback: session.feedback(),
                });
                generation_messages(system_prompt, query, &plan, &passages, revision)
            };
            let generated = self
                .guarded(self.chain.generate(&messages, &plan.params()), cancel, deadline)
                .await?;
            let success = match generated {
                Ok(success) => success,
                Err(ChainError::AllProvidersExhausted { attempts }) => {
                    error!(
                        session_id = %session.id(),
                        iteration = session.iteration(),
                        failed_attempts = attempts.len(),
                        "all providers exhausted"
                    );
                    session.record_attempts(attempts);
                    session.transition(WorkflowState::Failed)?;
                    return Err(Stop::Exhausted);
                }
            };
            session.record_attempts(success.attempts);
            session.record_provider(&success.provider_id);
            let candidate = Candidate {
                answer: success.text,
                provider_id: success.provider_id,
                iteration: session.iteration(),
                passages: passages.clone(),
            };
            session.transition(WorkflowState::Evaluate)?;

            // EVALUATE
            let evaluation = self
                .guarded(
                    self.evaluator.evaluate(&candidate, query, &candidate.passages),
                    cancel,
                    deadline,
                )
                .await?;
            info!(
                session_id = %session.id(),
                iteration = candidate.iteration,
                provider = %candidate.provider_id,
                confidence = evaluation.confidence,
                acceptable = evaluation.acceptable,
                degraded = evaluation.degraded,
                "candidate evaluated"
            );
            let acceptable = evaluation.acceptable;
            let diagnostic = evaluation.diagnostic.clone();
            session.record(candidate, evaluation);

            if acceptable {
                session.transition(WorkflowState::Done)?;
                return Ok(TerminalState::Done);
            }
            if session.iteration() >= self.settings.max_iterations {
                warn!(
                    session_id = %session.id(),
                    cap = self.settings.max_iterations,
                    "iteration cap reached, returning best candidate"
                );
                session.transition(WorkflowState::Done)?;
                return Ok(TerminalState::Capped);
            }

            // IMPROVE
            session.transition(WorkflowState::Improve)?;
            session.append_feedback(&diagnostic);
            session.transition(WorkflowState::Generate)?;
        }
    }

    fn finish(
        &self,
        mut session: WorkflowSession,
        outcome: Result<TerminalState, Stop>,
    ) -> WorkflowResult {
        let (terminal, winner, error, note) = match outcome {
            Ok(TerminalState::Capped) => (TerminalState::Capped, session.best().cloned(), None, None),
            Ok(terminal) => (terminal, session.last().cloned(), None, None),
            Err(Stop::Interrupted(Interrupt::Deadline))
                if self.settings.on_deadline == DeadlinePolicy::BestSoFar
                    && session.best().is_some() =>
            {
                warn!(session_id = %session.id(), "session deadline reached, returning best candidate so far");
                session.finish_early();
                (
                    TerminalState::Done,
                    session.best().cloned(),
                    None,
                    Some("session deadline reached; returning best candidate so far".to_string()),
                )
            }
            Err(stop) => {
                let reason = match stop {
                    Stop::Exhausted => FailureReason::AllProvidersExhausted,
                    Stop::Interrupted(Interrupt::Cancelled) => FailureReason::Cancelled,
                    Stop::Interrupted(Interrupt::Deadline) => FailureReason::DeadlineExceeded,
                    Stop::Invalid(err) => {
                        error!(session_id = %session.id(), "workflow error: {}", err);
                        FailureReason::Internal
                    }
                };
                session.abort();
                (TerminalState::Failed, None, Some(reason), None)
            }
        };

        let parts = session.into_parts();
        let result = self.build_result(parts, terminal, winner, error, note);
        info!(
            session_id = %result.session_id,
            terminal = ?result.terminal_state,
            iterations = result.iterations,
            confidence = result.confidence,
            provider = result.provider_used.as_deref().unwrap_or("-"),
            "session finished"
        );
        result
    }

    fn build_result(
        &self,
        parts: SessionParts,
        terminal: TerminalState,
        winner: Option<ScoredCandidate>,
        error: Option<FailureReason>,
        note: Option<String>,
    ) -> WorkflowResult {
        let (answer, confidence, provider_used, citations, diagnostic) = match winner {
            Some(scored) => {
                let citations = self.binder.bind(&scored.candidate);
                (
                    scored.candidate.answer,
                    scored.evaluation.confidence,
                    Some(scored.candidate.provider_id),
                    citations,
                    note.unwrap_or(scored.evaluation.diagnostic),
                )
            }
            None => (
                String::new(),
                0.0,
                None,
                Vec::new(),
                error.map(|e| e.to_string()).unwrap_or_default(),
            ),
        };

        WorkflowResult {
            session_id: parts.id,
            answer,
            confidence,
            provider_used,
            iterations: parts.iteration,
            terminal_state: terminal,
            citations,
            error,
            evaluation_degraded: parts.degraded,
            diagnostic,
            attempt_log: parts.attempt_log,
            provider_sequence: parts.provider_sequence,
            trace: parts.trace,
        }
    }
}
