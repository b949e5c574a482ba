//! Prompt 构建
//!
//! 生成 prompt：系统提示 + 编号来源块 + 问题 + 长度 / 引用要求；改进轮次附带上一版答案与累计评审意见。
//! 评审 prompt：要求以 `SCORE: x/10` 给分并附一句诊断。

use std::fmt::Write as _;
use std::sync::Arc;

use crate::llm::Message;
use crate::retrieval::RetrievedPassage;
use crate::workflow::analyze::GenerationPlan;
use crate::workflow::Query;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a research assistant that answers questions \
using the numbered sources provided. Base every statement on the sources, cite them inline as \
[n], and say plainly when the sources do not contain the answer. Do not invent facts or sources.";

const CRITIQUE_SYSTEM_PROMPT: &str = "You are a strict reviewer of answers produced from \
retrieved sources. Judge factual support by the sources, completeness with respect to the \
question, and clarity. Be critical: unsupported claims must lower the score.";

/// 改进轮次的附加信息
#[derive(Debug, Clone, Copy)]
pub struct Revision<'a> {
    pub previous_answer: &'a str,
    pub feedback: &'a str,
}

/// 按检索排名在字符预算内挑选进入 prompt 的段；超出剩余预算的段跳过
pub fn select_context(
    passages: &[Arc<RetrievedPassage>],
    budget_chars: usize,
) -> Vec<Arc<RetrievedPassage>> {
    let mut used = 0usize;
    let mut selected = Vec::new();
    for passage in passages {
        let len = passage.text.chars().count();
        if used + len > budget_chars {
            continue;
        }
        used += len;
        selected.push(Arc::clone(passage));
    }
    selected
}

/// 编号来源块：`[n] doc (chars a-b)` 后接原文
pub fn format_context(passages: &[Arc<RetrievedPassage>]) -> String {
    if passages.is_empty() {
        return "No sources were retrieved for this question.".to_string();
    }
    let mut out = String::new();
    for (i, passage) in passages.iter().enumerate() {
        let _ = writeln!(
            out,
            "[{}] {} (chars {}-{})\n{}\n",
            i + 1,
            passage.document_id,
            passage.range.start,
            passage.range.end,
            passage.text.trim()
        );
    }
    out.trim_end().to_string()
}

/// 生成（或改进）答案的消息序列
pub fn generation_messages(
    system_prompt: &str,
    query: &Query,
    plan: &GenerationPlan,
    passages: &[Arc<RetrievedPassage>],
    revision: Option<Revision<'_>>,
) -> Vec<Message> {
    let mut user = String::new();
    let _ = writeln!(user, "Sources:\n{}\n", format_context(passages));
    let _ = writeln!(user, "Question: {}\n", query.text());

    let (min_chars, max_chars) = plan.length.char_bounds();
    let _ = writeln!(
        user,
        "Write {} ({}-{} characters).",
        plan.length.describe(),
        min_chars,
        max_chars
    );
    if passages.is_empty() {
        user.push_str(
            "No sources are available: answer only if you are confident, and state that the \
             answer is not backed by retrieved sources.\n",
        );
    } else if plan.citation_density > 0 {
        let _ = writeln!(
            user,
            "Cite at least {} distinct source(s) using their [n] markers.",
            plan.citation_density
        );
    }
    if let Some(locale) = query.locale() {
        let _ = writeln!(user, "Answer in the language of locale '{locale}'.");
    }

    if let Some(revision) = revision {
        let _ = write!(
            user,
            "\nYour previous answer was:\n{}\n\nReviewer feedback to address:\n{}\n\n\
             Rewrite the answer so that it resolves the feedback while staying grounded in the sources.",
            revision.previous_answer.trim(),
            revision.feedback.trim()
        );
    }

    vec![
        Message::system(system_prompt),
        Message::user(user.trim_end()),
    ]
}

/// 自我评审消息序列
pub fn critique_messages(
    query: &Query,
    answer: &str,
    passages: &[Arc<RetrievedPassage>],
) -> Vec<Message> {
    let user = format!(
        "Sources:\n{}\n\nQuestion: {}\n\nAnswer to review:\n{}\n\n\
         Rate the answer from 0 to 10. Reply with exactly two lines:\n\
         SCORE: <number>/10\n\
         DIAGNOSTIC: <one sentence naming the most important problem, or 'none'>",
        format_context(passages),
        query.text(),
        answer.trim()
    );
    vec![Message::system(CRITIQUE_SYSTEM_PROMPT), Message::user(user)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::analyze::analyze;

    fn passage(doc: &str, start: usize, text: &str) -> Arc<RetrievedPassage> {
        Arc::new(RetrievedPassage::new(doc, start, text))
    }

    #[test]
    fn test_select_context_respects_budget() {
        let passages = vec![
            passage("a", 0, &"x".repeat(40)),
            passage("b", 0, &"y".repeat(80)),
            passage("c", 0, &"z".repeat(30)),
        ];
        let selected = select_context(&passages, 100);
        let ids: Vec<_> = selected.iter().map(|p| p.document_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert!(Arc::ptr_eq(&selected[0], &passages[0]));
    }

    #[test]
    fn test_format_context_numbers_sources() {
        let text = format_context(&[passage("doc-1", 10, "Alpha beta."), passage("doc-2", 0, "Gamma.")]);
        assert!(text.starts_with("[1] doc-1 (chars 10-21)\nAlpha beta."));
        assert!(text.contains("[2] doc-2 (chars 0-6)"));
        assert!(format_context(&[]).contains("No sources"));
    }

    #[test]
    fn test_revision_includes_previous_answer_and_feedback() {
        let query = Query::new("What is the capital of France?", 100).unwrap().with_locale("fr-FR");
        let passages = vec![passage("geo", 0, "Paris is the capital of France.")];
        let plan = analyze(&query, passages.len());
        let messages = generation_messages(
            DEFAULT_SYSTEM_PROMPT,
            &query,
            &plan,
            &passages,
            Some(Revision {
                previous_answer: "Lyon.",
                feedback: "The answer contradicts source [1].",
            }),
        );
        assert_eq!(messages.len(), 2);
        let user = &messages[1].content;
        assert!(user.contains("[1] geo"));
        assert!(user.contains("Lyon."));
        assert!(user.contains("contradicts source [1]"));
        assert!(user.contains("fr-FR"));
    }

    #[test]
    fn test_critique_asks_for_score() {
        let query = Query::new("Why is the sky blue?", 100).unwrap();
        let messages = critique_messages(&query, "Rayleigh scattering.", &[]);
        assert!(messages[1].content.contains("SCORE: <number>/10"));
        assert!(messages[1].content.contains("Rayleigh scattering."));
    }
}
