//! 引用绑定
//!
//! 对最终候选 prompt 中的每段检索文本，找出答案所依据的最小连续片段：
//! 在段内定位与答案共享的词，按最大间隔聚簇，取覆盖不同词最多的簇（并列取最早），
//! 片段从簇首词到簇尾词。共享词不足且答案未以 [n] 标记引用该段时不输出引用。
//! 只引用候选自身的 passages，纯计算、无外部调用。

use std::collections::{BTreeSet, HashSet};
use std::sync::OnceLock;

use regex::Regex;

use crate::retrieval::RetrievedPassage;
use crate::tokenizer::{char_offset, tokenize_to_set, word_spans, WordSpan};
use crate::workflow::{Candidate, Citation};

/// 仅有 [n] 标记而无共享词时，片段取段首的字符数
const MARKER_SNIPPET_CHARS: usize = 160;

static MARKER_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// 答案中出现的来源编号（[1]、[2, 3]）
fn cited_markers(answer: &str) -> BTreeSet<usize> {
    let Some(re) = MARKER_RE
        .get_or_init(|| Regex::new(r"\[(\d+(?:\s*,\s*\d+)*)\]").ok())
        .as_ref()
    else {
        return BTreeSet::new();
    };
    re.captures_iter(answer)
        .filter_map(|c| c.get(1))
        .flat_map(|m| {
            m.as_str()
                .split(',')
                .filter_map(|n| n.trim().parse::<usize>().ok())
                .collect::<Vec<_>>()
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct CitationBinder {
    /// 判定"使用了该段"所需的最少不同共享词
    min_matches: usize,
    /// 同一簇内相邻命中词之间最多间隔的词数
    max_gap: usize,
}

impl Default for CitationBinder {
    fn default() -> Self {
        Self {
            min_matches: 2,
            max_gap: 8,
        }
    }
}

impl CitationBinder {
    pub fn new(min_matches: usize, max_gap: usize) -> Self {
        Self {
            min_matches: min_matches.max(1),
            max_gap,
        }
    }

    pub fn bind(&self, candidate: &Candidate) -> Vec<Citation> {
        let answer_terms = tokenize_to_set(&candidate.answer);
        let markers = cited_markers(&candidate.answer);

        candidate
            .passages
            .iter()
            .enumerate()
            .filter_map(|(idx, passage)| {
                let marked = markers.contains(&(idx + 1));
                self.bind_passage(passage, &answer_terms, marked)
            })
            .collect()
    }

    fn bind_passage(
        &self,
        passage: &RetrievedPassage,
        answer_terms: &HashSet<String>,
        marked: bool,
    ) -> Option<Citation> {
        let spans = word_spans(&passage.text);
        let hits: Vec<(usize, &WordSpan)> = spans
            .iter()
            .enumerate()
            .filter(|(_, span)| answer_terms.contains(&span.term))
            .collect();

        match self.best_cluster(&hits) {
            Some((first, last, distinct)) if distinct >= self.min_matches => {
                Some(self.citation(passage, first.start, last.end))
            }
            Some((first, last, _)) if marked => Some(self.citation(passage, first.start, last.end)),
            None if marked => {
                let end = passage
                    .text
                    .char_indices()
                    .nth(MARKER_SNIPPET_CHARS)
                    .map(|(i, _)| i)
                    .unwrap_or(passage.text.len());
                Some(self.citation(passage, 0, end))
            }
            _ => None,
        }
    }

    /// 返回 (簇首词, 簇尾词, 簇内不同词数)
    fn best_cluster<'a>(
        &self,
        hits: &[(usize, &'a WordSpan)],
    ) -> Option<(&'a WordSpan, &'a WordSpan, usize)> {
        let mut best: Option<(&WordSpan, &WordSpan, usize)> = None;
        let mut start = 0;
        while start < hits.len() {
            let mut end = start;
            while end + 1 < hits.len() && hits[end + 1].0 - hits[end].0 <= self.max_gap + 1 {
                end += 1;
            }
            let distinct = hits[start..=end]
                .iter()
                .map(|(_, span)| span.term.as_str())
                .collect::<HashSet<_>>()
                .len();
            if best.map_or(true, |(_, _, d)| distinct > d) {
                best = Some((hits[start].1, hits[end].1, distinct));
            }
            start = end + 1;
        }
        best
    }

    fn citation(&self, passage: &RetrievedPassage, start: usize, end: usize) -> Citation {
        Citation {
            document_id: passage.document_id.clone(),
            snippet: passage.text[start..end].to_string(),
            offset: passage.range.start + char_offset(&passage.text, start),
        }
    }
}
