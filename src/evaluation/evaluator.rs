//! 置信度评估器
//!
//! 启发式分数与经 ProviderChain 发起的自我评审分数加权合成。
//! 评审调用失败（提供商耗尽）或输出无法解析时降级为仅启发式，并在诊断中标记，不会使会话失败。
//! 降级且没有检索段时，中性支撑率不计入分数，未经核对的答案不能凭长度过线。

use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::{debug, warn};

use crate::config::EvaluationSection;
use crate::evaluation::heuristic::{heuristic_check, HeuristicReport};
use crate::llm::{GenerationParams, ProviderChain};
use crate::retrieval::RetrievedPassage;
use crate::workflow::prompt::critique_messages;
use crate::workflow::{Candidate, Evaluation, Query};

/// 解析后的评审结果
#[derive(Debug, Clone, PartialEq)]
pub struct Critique {
    /// [0, 1]
    pub score: f64,
    pub diagnostic: String,
}

static SCORE_RE: OnceLock<Option<Regex>> = OnceLock::new();
static DIAGNOSTIC_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn score_regex() -> Option<&'static Regex> {
    SCORE_RE
        .get_or_init(|| {
            Regex::new(r"(?i)score\**\s*[:=]?\s*\**\s*(\d+(?:\.\d+)?)\s*(?:/\s*(\d+(?:\.\d+)?))?").ok()
        })
        .as_ref()
}

fn diagnostic_regex() -> Option<&'static Regex> {
    DIAGNOSTIC_RE
        .get_or_init(|| Regex::new(r"(?im)^\s*\**diagnostic\**\s*[:=]\s*(.+)$").ok())
        .as_ref()
}

/// 关键词兜底：没有给出数字分数时按评语措辞估分
const KEYWORD_SCORES: &[(&str, f64)] = &[
    ("excellent", 0.9),
    ("good", 0.8),
    ("adequate", 0.6),
    ("poor", 0.3),
];

/// 解析评审输出：优先 `SCORE: x/10`（缺省分母为 10），其次关键词；都没有时返回 None
pub fn parse_critique(text: &str) -> Option<Critique> {
    let score_re = score_regex()?;
    let diagnostic = diagnostic_regex()
        .and_then(|re| re.captures(text))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| {
            text.lines()
                .map(str::trim)
                .find(|line| !line.is_empty() && !score_re.is_match(line))
                .unwrap_or("")
                .to_string()
        });

    if let Some(caps) = score_re.captures(text) {
        let value: f64 = caps.get(1)?.as_str().parse().ok()?;
        let scale: f64 = caps
            .get(2)
            .and_then(|m| m.as_str().parse().ok())
            .filter(|s: &f64| *s > 0.0)
            .unwrap_or(10.0);
        return Some(Critique {
            score: (value / scale).clamp(0.0, 1.0),
            diagnostic,
        });
    }

    let lower = text.to_lowercase();
    KEYWORD_SCORES
        .iter()
        .find(|(word, _)| lower.contains(word))
        .map(|&(_, score)| Critique { score, diagnostic })
}

pub struct ConfidenceEvaluator {
    chain: Arc<ProviderChain>,
    settings: EvaluationSection,
    threshold: f64,
}

impl ConfidenceEvaluator {
    pub fn new(chain: Arc<ProviderChain>, settings: EvaluationSection, threshold: f64) -> Self {
        Self {
            chain,
            settings,
            threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn heuristic(&self, answer: &str, passages: &[Arc<RetrievedPassage>]) -> HeuristicReport {
        heuristic_check(answer, passages, &self.settings)
    }

    /// 评估候选答案；passages 为该候选 prompt 中实际使用的段
    pub async fn evaluate(
        &self,
        candidate: &Candidate,
        query: &Query,
        passages: &[Arc<RetrievedPassage>],
    ) -> Evaluation {
        let report = self.heuristic(&candidate.answer, passages);
        if candidate.answer.trim().is_empty() {
            return self.finish(0.0, "answer is empty".to_string(), false);
        }

        let params = GenerationParams {
            temperature: 0.0,
            max_tokens: 200,
        };
        let messages = critique_messages(query, &candidate.answer, passages);
        let critique = match self.chain.generate(&messages, &params).await {
            Ok(success) => {
                let parsed = parse_critique(&success.text);
                if parsed.is_none() {
                    warn!(
                        provider = %success.provider_id,
                        iteration = candidate.iteration,
                        "critique output could not be parsed; using heuristic score"
                    );
                }
                parsed
            }
            Err(err) => {
                warn!(
                    iteration = candidate.iteration,
                    "critique call failed ({}); using heuristic score",
                    err
                );
                None
            }
        };

        match critique {
            Some(critique) => {
                let w = self.settings.heuristic_weight;
                let confidence = w * report.score + (1.0 - w) * critique.score;
                debug!(
                    iteration = candidate.iteration,
                    heuristic = report.score,
                    critique = critique.score,
                    confidence,
                    "candidate evaluated"
                );
                let diagnostic = match critique.diagnostic.as_str() {
                    "" => report.summary(),
                    d if d.eq_ignore_ascii_case("none") => report.summary(),
                    d => d.to_string(),
                };
                self.finish(confidence, diagnostic, false)
            }
            None => {
                let diagnostic = format!("evaluation degraded: {}", report.summary());
                let confidence = if passages.is_empty() {
                    report.score_without_grounding()
                } else {
                    report.score
                };
                self.finish(confidence, diagnostic, true)
            }
        }
    }

    fn finish(&self, confidence: f64, diagnostic: String, degraded: bool) -> Evaluation {
        let confidence = confidence.clamp(0.0, 1.0);
        Evaluation {
            confidence,
            acceptable: confidence >= self.threshold,
            diagnostic,
            degraded,
        }
    }
}
