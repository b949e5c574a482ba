//! 启发式检查：答案非空、长度在预期区间、是否引用了检索内容
//!
//! 以句子为单位判断支撑：句子与某段检索文本共享足够多的有效词即视为有支撑。
//! score = 0.2 + 0.3 × 长度合格 + 0.5 × 支撑率；空答案为 0；没有检索段时支撑率取中性值 0.5。

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::EvaluationSection;
use crate::retrieval::RetrievedPassage;
use crate::tokenizer::{overlap_score, tokenize_to_set};

const NEUTRAL_GROUNDING: f64 = 0.5;
const GROUNDING_WEIGHT: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeuristicReport {
    pub score: f64,
    pub length_ok: bool,
    /// 有支撑句子占比
    pub grounding: f64,
    /// 与答案共享足够词数的检索段数量
    pub referenced_passages: usize,
    pub unsupported_sentences: Vec<String>,
}

impl HeuristicReport {
    /// 不计支撑率的分数：没有检索段可核对且评审也缺席时使用
    pub fn score_without_grounding(&self) -> f64 {
        (self.score - GROUNDING_WEIGHT * self.grounding).max(0.0)
    }

    /// 面向改进轮次的简短说明
    pub fn summary(&self) -> String {
        let mut notes = Vec::new();
        if !self.length_ok {
            notes.push("answer length is outside the expected range".to_string());
        }
        if self.referenced_passages == 0 && self.grounding < NEUTRAL_GROUNDING {
            notes.push("answer does not draw on the retrieved sources".to_string());
        } else if let Some(first) = self.unsupported_sentences.first() {
            notes.push(format!("unsupported statement: \"{}\"", truncate(first, 120)));
        }
        if notes.is_empty() {
            "heuristic checks passed".to_string()
        } else {
            notes.join("; ")
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}

/// 句子切分：中英文句末标点与换行
fn sentences(text: &str) -> Vec<&str> {
    text.split_inclusive(['.', '!', '?', '。', '！', '？', '\n'])
        .map(str::trim)
        .filter(|s| s.chars().any(char::is_alphanumeric))
        .collect()
}

pub fn heuristic_check(
    answer: &str,
    passages: &[Arc<RetrievedPassage>],
    settings: &EvaluationSection,
) -> HeuristicReport {
    let trimmed = answer.trim();
    if trimmed.is_empty() {
        return HeuristicReport {
            score: 0.0,
            length_ok: false,
            grounding: 0.0,
            referenced_passages: 0,
            unsupported_sentences: Vec::new(),
        };
    }

    let len = trimmed.chars().count();
    let length_ok = len >= settings.min_answer_chars && len <= settings.max_answer_chars;

    let (grounding, referenced_passages, unsupported_sentences) = if passages.is_empty() {
        (NEUTRAL_GROUNDING, 0, Vec::new())
    } else {
        let passage_terms: Vec<HashSet<String>> =
            passages.iter().map(|p| tokenize_to_set(&p.text)).collect();
        let answer_terms = tokenize_to_set(trimmed);
        let referenced = passage_terms
            .iter()
            .filter(|terms| overlap_score(&answer_terms, terms) >= settings.min_overlap_terms)
            .count();

        let mut supported = 0usize;
        let mut unsupported = Vec::new();
        let all = sentences(trimmed);
        for sentence in &all {
            let terms = tokenize_to_set(sentence);
            if terms.is_empty() {
                supported += 1;
                continue;
            }
            // 短句只需一个共同词
            let needed = settings.min_overlap_terms.min(terms.len()).max(1);
            if passage_terms
                .iter()
                .any(|p| overlap_score(&terms, p) >= needed)
            {
                supported += 1;
            } else {
                unsupported.push((*sentence).to_string());
            }
        }
        let grounding = if all.is_empty() {
            0.0
        } else {
            supported as f64 / all.len() as f64
        };
        (grounding, referenced, unsupported)
    };

    let score = 0.2 + 0.3 * if length_ok { 1.0 } else { 0.0 } + GROUNDING_WEIGHT * grounding;
    HeuristicReport {
        score: score.clamp(0.0, 1.0),
        length_ok,
        grounding,
        referenced_passages,
        unsupported_sentences,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passages() -> Vec<Arc<RetrievedPassage>> {
        vec![Arc::new(RetrievedPassage::new(
            "cardio",
            0,
            "Regular aerobic exercise lowers resting blood pressure in adults with hypertension.",
        ))]
    }

    #[test]
    fn test_empty_answer_scores_zero() {
        let report = heuristic_check("   ", &passages(), &EvaluationSection::default());
        assert_eq!(report.score, 0.0);
    }

    #[test]
    fn test_grounded_answer_scores_high() {
        let report = heuristic_check(
            "Aerobic exercise lowers resting blood pressure in adults with hypertension [1].",
            &passages(),
            &EvaluationSection::default(),
        );
        assert!(report.length_ok);
        assert_eq!(report.grounding, 1.0);
        assert_eq!(report.referenced_passages, 1);
        assert!((report.score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_ungrounded_answer_penalised() {
        let report = heuristic_check(
            "Quantum chromodynamics describes gluons binding quarks together.",
            &passages(),
            &EvaluationSection::default(),
        );
        assert_eq!(report.referenced_passages, 0);
        assert_eq!(report.grounding, 0.0);
        assert!((report.score - 0.5).abs() < 1e-9);
        assert!(report.summary().contains("does not draw on"));
    }

    #[test]
    fn test_no_passages_is_neutral() {
        let report = heuristic_check(
            "Paris is the capital city of France.",
            &[],
            &EvaluationSection::default(),
        );
        assert_eq!(report.grounding, 0.5);
        assert!((report.score - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_short_answer_fails_length() {
        let report = heuristic_check("Yes.", &[], &EvaluationSection::default());
        assert!(!report.length_ok);
    }
}
