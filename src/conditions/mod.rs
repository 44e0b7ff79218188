pub mod evaluator;

pub use evaluator::{assess, evaluate, evaluate_gate, ConditionOutcome, GateResult};
