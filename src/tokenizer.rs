//! 分词模块
//!
//! 中英文混合分词，用于检索打分、答案评估与引用对齐。
//! CJK 片段使用 jieba-rs 切词，其余按字母数字连续段切分；均保留原文字节偏移。

use std::collections::HashSet;
use std::sync::OnceLock;

use jieba_rs::Jieba;

/// 全局 Jieba 实例（延迟初始化）
static JIEBA: OnceLock<Jieba> = OnceLock::new();

fn get_jieba() -> &'static Jieba {
    JIEBA.get_or_init(Jieba::new)
}

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "was", "were", "with", "that", "this", "from", "have", "has",
    "had", "not", "but", "its", "into", "than", "then", "them", "they", "their", "there", "these",
    "those", "which", "what", "when", "where", "who", "why", "how", "can", "could", "should",
    "would", "will", "may", "also", "been", "being", "such", "other", "about", "over", "only",
    "any", "all", "each", "more", "most", "some", "very", "our", "you", "your", "his", "her",
    "的", "了", "和", "是", "在", "与", "及", "或", "也", "就", "都", "而",
];

/// 判断字符是否为 CJK（中日韩）字符
fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}' |   // CJK Unified Ideographs
        '\u{3400}'..='\u{4DBF}' |   // CJK Unified Ideographs Extension A
        '\u{F900}'..='\u{FAFF}' |   // CJK Compatibility Ideographs
        '\u{3040}'..='\u{309F}' |   // Hiragana
        '\u{30A0}'..='\u{30FF}'     // Katakana
    )
}

/// 判断文本是否包含 CJK 字符
pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(is_cjk)
}

pub fn is_stopword(term: &str) -> bool {
    STOPWORDS.contains(&term)
}

/// 原文中的一个词：字节区间 [start, end) 与小写形式
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordSpan {
    pub start: usize,
    pub end: usize,
    pub term: String,
}

/// 是否为有意义的检索词：非停用词；拉丁词至少 3 个字符，CJK 词至少 2 个字
fn is_content_term(term: &str) -> bool {
    if is_stopword(term) {
        return false;
    }
    let chars = term.chars().count();
    if contains_cjk(term) {
        chars >= 2
    } else {
        chars >= 3 || term.chars().all(|c| c.is_ascii_digit())
    }
}

/// 切分为带偏移的词（仅保留有意义的词）
pub fn word_spans(text: &str) -> Vec<WordSpan> {
    let mut spans = Vec::new();
    let mut run_start: Option<(usize, bool)> = None;

    let flush = |start: usize, end: usize, cjk: bool, spans: &mut Vec<WordSpan>| {
        let piece = &text[start..end];
        if cjk {
            for word in get_jieba().cut(piece, true) {
                let term = word.to_lowercase();
                if is_content_term(&term) {
                    // jieba 返回原文切片，按指针差还原偏移
                    let offset = word.as_ptr() as usize - text.as_ptr() as usize;
                    spans.push(WordSpan {
                        start: offset,
                        end: offset + word.len(),
                        term,
                    });
                }
            }
        } else {
            let term = piece.to_lowercase();
            if is_content_term(&term) {
                spans.push(WordSpan { start, end, term });
            }
        }
    };

    for (idx, c) in text.char_indices() {
        let class = if is_cjk(c) {
            Some(true)
        } else if c.is_alphanumeric() {
            Some(false)
        } else {
            None
        };
        match (run_start, class) {
            (Some((start, cjk)), Some(now_cjk)) if cjk != now_cjk => {
                flush(start, idx, cjk, &mut spans);
                run_start = Some((idx, now_cjk));
            }
            (Some((start, cjk)), None) => {
                flush(start, idx, cjk, &mut spans);
                run_start = None;
            }
            (None, Some(now_cjk)) => run_start = Some((idx, now_cjk)),
            _ => {}
        }
    }
    if let Some((start, cjk)) = run_start {
        flush(start, text.len(), cjk, &mut spans);
    }
    spans
}

/// 分词：返回有意义的小写词序列
pub fn tokenize(text: &str) -> Vec<String> {
    word_spans(text).into_iter().map(|s| s.term).collect()
}

/// 分词并返回词集合（用于相似度计算）
pub fn tokenize_to_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

/// 计算两个词集合的重叠分数（交集大小）
pub fn overlap_score(set1: &HashSet<String>, set2: &HashSet<String>) -> usize {
    set1.intersection(set2).count()
}

/// 带长度权重的相似度（较长的词更重要）
pub fn weighted_similarity(tokens1: &[String], tokens2: &[String]) -> f32 {
    if tokens1.is_empty() || tokens2.is_empty() {
        return 0.0;
    }

    let set1: HashSet<_> = tokens1.iter().collect();
    let set2: HashSet<_> = tokens2.iter().collect();

    let mut score = 0.0;
    for token in set1.intersection(&set2) {
        score += (token.chars().count() as f32).sqrt();
    }

    let max_possible = set1
        .iter()
        .chain(set2.iter())
        .map(|t| (t.chars().count() as f32).sqrt())
        .sum::<f32>();

    if max_possible > 0.0 {
        score / max_possible * 2.0 // 相同词在两边各算一次
    } else {
        0.0
    }
}

/// 字节偏移转字符偏移
pub fn char_offset(text: &str, byte_offset: usize) -> usize {
    text.get(..byte_offset)
        .map(|s| s.chars().count())
        .unwrap_or_else(|| text.chars().count())
}
