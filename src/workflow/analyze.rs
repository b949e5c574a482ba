//! ANALYZE 步骤：根据查询形态与检索段数量推导生成参数
//!
//! 纯函数、无外部调用；同样的输入总得到同样的 GenerationPlan。

use serde::{Deserialize, Serialize};

use crate::llm::GenerationParams;
use crate::workflow::Query;

/// 查询类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    /// 事实型：是什么、何时、多少
    Factual,
    /// 分析型：为什么、影响、解释
    Analytical,
    /// 比较型：区别、优劣
    Comparative,
    /// 步骤型：如何做
    Procedural,
}

/// 答案长度提示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthHint {
    Brief,
    Standard,
    Detailed,
}

impl LengthHint {
    /// 期望答案的字符区间
    pub fn char_bounds(self) -> (usize, usize) {
        match self {
            LengthHint::Brief => (40, 500),
            LengthHint::Standard => (120, 1500),
            LengthHint::Detailed => (300, 3500),
        }
    }

    fn max_tokens(self) -> u32 {
        match self {
            LengthHint::Brief => 400,
            LengthHint::Standard => 800,
            LengthHint::Detailed => 1500,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            LengthHint::Brief => "a short, direct answer (one or two sentences)",
            LengthHint::Standard => "a focused answer of one to three paragraphs",
            LengthHint::Detailed => "a thorough answer that covers each relevant aspect",
        }
    }
}

/// 生成计划
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationPlan {
    pub kind: QueryKind,
    pub length: LengthHint,
    /// 答案至少应引用的不同来源数
    pub citation_density: usize,
    pub temperature: f32,
    pub max_tokens: u32,
    pub passage_count: usize,
}

impl GenerationPlan {
    pub fn params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

const COMPARATIVE_MARKERS: &[&str] = &[
    "compare", "comparison", "difference", "differ", "versus", " vs", "better than",
    "worse than", "pros and cons", "比较", "区别", "对比", "不同",
];

const PROCEDURAL_MARKERS: &[&str] = &[
    "how to", "how do i", "how can i", "steps", "procedure", "guide", "install", "configure",
    "set up", "如何", "怎么", "怎样", "步骤",
];

const ANALYTICAL_MARKERS: &[&str] = &[
    "why", "explain", "analy", "impact", "effect", "cause", "implication", "evaluate",
    "为什么", "分析", "影响", "原因", "解释",
];

fn classify(text: &str) -> QueryKind {
    let lower = text.to_lowercase();
    let has = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));
    if has(COMPARATIVE_MARKERS) {
        QueryKind::Comparative
    } else if has(PROCEDURAL_MARKERS) {
        QueryKind::Procedural
    } else if has(ANALYTICAL_MARKERS) {
        QueryKind::Analytical
    } else {
        QueryKind::Factual
    }
}

/// 由查询与本次进入 prompt 的检索段数推导生成计划
pub fn analyze(query: &Query, passage_count: usize) -> GenerationPlan {
    let kind = classify(query.text());
    let words = query.text().split_whitespace().count();

    let length = match kind {
        QueryKind::Factual if words <= 12 => LengthHint::Brief,
        QueryKind::Factual | QueryKind::Procedural => LengthHint::Standard,
        QueryKind::Analytical | QueryKind::Comparative => LengthHint::Detailed,
    };
    // 无上下文时不要求长答案
    let length = if passage_count == 0 && length == LengthHint::Detailed {
        LengthHint::Standard
    } else {
        length
    };

    let wanted = match kind {
        QueryKind::Factual | QueryKind::Procedural => 1,
        QueryKind::Analytical => 2,
        QueryKind::Comparative => 3,
    };

    GenerationPlan {
        kind,
        length,
        citation_density: wanted.min(passage_count),
        temperature: match kind {
            QueryKind::Factual => 0.1,
            QueryKind::Procedural => 0.2,
            QueryKind::Analytical | QueryKind::Comparative => 0.3,
        },
        max_tokens: length.max_tokens(),
        passage_count,
    }
}
