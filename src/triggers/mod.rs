pub mod evaluator;
pub mod schedule;

pub use evaluator::TriggerEvaluator;
