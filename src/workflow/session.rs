//! 单个查询的会话状态
//!
//! 由处理该查询的任务独占；状态转移按固定转移表校验，IMPROVE -> GENERATE 是唯一回边。

use std::sync::Arc;

use thiserror::Error;

use crate::llm::AttemptFailure;
use crate::retrieval::RetrievedPassage;
use crate::workflow::{Candidate, Evaluation, SessionId, WorkflowState};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("Invalid transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: WorkflowState,
        to: WorkflowState,
    },
}

/// 已评估的候选
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub evaluation: Evaluation,
}

#[derive(Debug)]
pub struct WorkflowSession {
    id: SessionId,
    state: WorkflowState,
    iteration: u32,
    /// 本会话检索到的全部段
    pub(crate) retrieved: Vec<Arc<RetrievedPassage>>,
    best: Option<ScoredCandidate>,
    last: Option<ScoredCandidate>,
    feedback: String,
    trace: Vec<WorkflowState>,
    attempt_log: Vec<AttemptFailure>,
    provider_sequence: Vec<String>,
    degraded: bool,
}

impl WorkflowSession {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            state: WorkflowState::Retrieve,
            iteration: 1,
            retrieved: Vec::new(),
            best: None,
            last: None,
            feedback: String::new(),
            trace: vec![WorkflowState::Retrieve],
            attempt_log: Vec::new(),
            provider_sequence: Vec::new(),
            degraded: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    /// 当前迭代号（从 1 开始）
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn transition(&mut self, next: WorkflowState) -> Result<(), WorkflowError> {
        if !self.state.can_transition_to(next) {
            return Err(WorkflowError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        if self.state == WorkflowState::Improve && next == WorkflowState::Generate {
            self.iteration += 1;
        }
        self.state = next;
        self.trace.push(next);
        Ok(())
    }

    /// 因取消 / 截止时间终止：任意非终止状态都可直接进入 FAILED
    pub fn abort(&mut self) {
        if !self.state.is_terminal() {
            self.state = WorkflowState::Failed;
            self.trace.push(WorkflowState::Failed);
        }
    }

    /// 截止时间下以当前最佳候选结束
    pub fn finish_early(&mut self) {
        if !self.state.is_terminal() {
            self.state = WorkflowState::Done;
            self.trace.push(WorkflowState::Done);
        }
    }

    /// 记录评估后的候选；仅当严格更高时替换最佳候选，平分时保留更早的迭代
    pub fn record(&mut self, candidate: Candidate, evaluation: Evaluation) {
        self.degraded |= evaluation.degraded;
        let scored = ScoredCandidate {
            candidate,
            evaluation,
        };
        let better = self
            .best
            .as_ref()
            .map_or(true, |best| scored.evaluation.confidence > best.evaluation.confidence);
        if better {
            self.best = Some(scored.clone());
        }
        self.last = Some(scored);
    }

    /// IMPROVE：把诊断追加到累计反馈
    pub fn append_feedback(&mut self, diagnostic: &str) {
        let diagnostic = diagnostic.trim();
        if diagnostic.is_empty() {
            return;
        }
        if !self.feedback.is_empty() {
            self.feedback.push('\n');
        }
        self.feedback
            .push_str(&format!("- (iteration {}) {}", self.iteration, diagnostic));
    }

    pub fn feedback(&self) -> &str {
        &self.feedback
    }

    pub fn best(&self) -> Option<&ScoredCandidate> {
        self.best.as_ref()
    }

    pub fn last(&self) -> Option<&ScoredCandidate> {
        self.last.as_ref()
    }

    pub fn record_attempts(&mut self, attempts: impl IntoIterator<Item = AttemptFailure>) {
        self.attempt_log.extend(attempts);
    }

    pub fn record_provider(&mut self, provider_id: &str) {
        self.provider_sequence.push(provider_id.to_string());
    }

    pub fn degraded(&self) -> bool {
        self.degraded
    }

    pub fn trace(&self) -> &[WorkflowState] {
        &self.trace
    }

    /// 结束会话，交出日志与轨迹
    pub(crate) fn into_parts(self) -> SessionParts {
        SessionParts {
            id: self.id,
            iteration: self.iteration,
            best: self.best,
            last: self.last,
            trace: self.trace,
            attempt_log: self.attempt_log,
            provider_sequence: self.provider_sequence,
            degraded: self.degraded,
        }
    }
}

pub(crate) struct SessionParts {
    pub id: SessionId,
    pub iteration: u32,
    pub best: Option<ScoredCandidate>,
    pub last: Option<ScoredCandidate>,
    pub trace: Vec<WorkflowState>,
    pub attempt_log: Vec<AttemptFailure>,
    pub provider_sequence: Vec<String>,
    pub degraded: bool,
}
