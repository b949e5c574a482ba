//! 答案评估：启发式检查 + 自我评审

pub mod evaluator;
pub mod heuristic;

pub use evaluator::{parse_critique, ConfidenceEvaluator, Critique};
pub use heuristic::{heuristic_check, HeuristicReport};
