use serde_json::json;
use tracing::debug;

use crate::errors::NightshiftError;
use crate::facts::FactSnapshot;
use crate::models::{AgentCondition, AgentLog, ConditionOperator, FactValue};

/// Result of checking one condition against a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionOutcome {
    Satisfied,
    Unsatisfied,
    /// Neither `<type>.<parameter>` nor `<parameter>` is present.
    MissingFact(String),
    /// Operator cannot be applied to the fact/value kinds involved.
    TypeMismatch(String),
}

impl ConditionOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, Self::Satisfied)
    }
}

impl From<bool> for ConditionOutcome {
    fn from(ok: bool) -> Self {
        if ok {
            Self::Satisfied
        } else {
            Self::Unsatisfied
        }
    }
}

/// Check a single condition. Pure: no clock, no I/O.
pub fn assess(condition: &AgentCondition, facts: &FactSnapshot) -> ConditionOutcome {
    let Some(fact) = facts.lookup(condition.condition_type, &condition.parameter) else {
        return ConditionOutcome::MissingFact(format!(
            "{}.{}",
            condition.condition_type, condition.parameter
        ));
    };
    let expected = &condition.value;

    match condition.operator {
        ConditionOperator::Equals => values_equal(fact, expected).into(),
        ConditionOperator::NotEquals => (!values_equal(fact, expected)).into(),
        ConditionOperator::GreaterThan | ConditionOperator::LessThan => {
            match (fact.as_number(), expected.as_number()) {
                (Some(actual), Some(bound)) => {
                    if condition.operator == ConditionOperator::GreaterThan {
                        (actual > bound).into()
                    } else {
                        (actual < bound).into()
                    }
                }
                _ => mismatch(condition, fact),
            }
        }
        ConditionOperator::Contains | ConditionOperator::NotContains => {
            let contained = match (fact, expected) {
                (FactValue::Text(haystack), FactValue::Text(needle)) => haystack.contains(needle.as_str()),
                (FactValue::List(items), needle) => items.iter().any(|item| values_equal(item, needle)),
                _ => return mismatch(condition, fact),
            };
            if condition.operator == ConditionOperator::Contains {
                contained.into()
            } else {
                (!contained).into()
            }
        }
    }
}

fn mismatch(condition: &AgentCondition, fact: &FactValue) -> ConditionOutcome {
    ConditionOutcome::TypeMismatch(format!(
        "{} cannot compare {} fact '{}' with {} value {}",
        condition.operator,
        fact.kind(),
        condition.parameter,
        condition.value.kind(),
        condition.value
    ))
}

/// Values of different kinds are never equal.
fn values_equal(a: &FactValue, b: &FactValue) -> bool {
    match (a, b) {
        (FactValue::Bool(x), FactValue::Bool(y)) => x == y,
        (FactValue::Number(x), FactValue::Number(y)) => x == y,
        (FactValue::Text(x), FactValue::Text(y)) => x == y,
        (FactValue::List(x), FactValue::List(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
        }
        _ => false,
    }
}

pub fn evaluate(condition: &AgentCondition, facts: &FactSnapshot) -> bool {
    assess(condition, facts).passed()
}

/// Outcome of the AND gate plus the logs it produced.
#[derive(Debug, Clone)]
pub struct GateResult {
    pub passed: bool,
    pub logs: Vec<AgentLog>,
}

/// AND all conditions. Every condition is evaluated so each problem gets logged.
pub fn evaluate_gate(conditions: &[AgentCondition], facts: &FactSnapshot) -> GateResult {
    let mut passed = true;
    let mut logs = Vec::new();

    for condition in conditions {
        let outcome = assess(condition, facts);
        let details = json!({
            "type": condition.condition_type.as_str(),
            "parameter": condition.parameter,
            "operator": condition.operator.as_str(),
            "value": condition.value,
        });

        match &outcome {
            ConditionOutcome::Satisfied => {}
            ConditionOutcome::Unsatisfied => {
                debug!(parameter = %condition.parameter, operator = %condition.operator, "Condition not met");
                logs.push(
                    AgentLog::debug(format!(
                        "Condition not met: {} {} {}",
                        condition.parameter, condition.operator, condition.value
                    ))
                    .with_details(details),
                );
            }
            ConditionOutcome::MissingFact(key) => {
                logs.push(
                    AgentLog::warning(format!("Condition skipped, fact '{}' is not available", key))
                        .with_details(details),
                );
            }
            ConditionOutcome::TypeMismatch(reason) => {
                let err = NightshiftError::ConditionEvaluation(reason.clone());
                logs.push(AgentLog::error(err.to_string()).with_details(details));
            }
        }

        passed &= outcome.passed();
    }

    GateResult { passed, logs }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConditionType, LogLevel};

    fn cond(
        condition_type: ConditionType,
        parameter: &str,
        operator: ConditionOperator,
        value: impl Into<FactValue>,
    ) -> AgentCondition {
        AgentCondition {
            condition_type,
            parameter: parameter.to_string(),
            operator,
            value: value.into(),
        }
    }

    fn facts() -> FactSnapshot {
        FactSnapshot::new()
            .with("weather.cloudCover", 12.0)
            .with("weather.sky", "clear and dark")
            .with("equipment.connected", vec!["mount", "camera"])
            .with("equipment.cooled", true)
            .with("moonPhase", "waning")
    }

    #[test]
    fn test_empty_gate_passes() {
        let result = evaluate_gate(&[], &FactSnapshot::new());
        assert!(result.passed);
        assert!(result.logs.is_empty());
    }

    #[test]
    fn test_numeric_comparisons() {
        let f = facts();
        assert!(evaluate(&cond(ConditionType::Weather, "cloudCover", ConditionOperator::LessThan, 30.0), &f));
        assert!(!evaluate(&cond(ConditionType::Weather, "cloudCover", ConditionOperator::GreaterThan, 30.0), &f));
    }

    #[test]
    fn test_equals_across_kinds_is_false() {
        let f = facts();
        let c = cond(ConditionType::Equipment, "cooled", ConditionOperator::Equals, "true");
        assert_eq!(assess(&c, &f), ConditionOutcome::Unsatisfied);
        let c = cond(ConditionType::Equipment, "cooled", ConditionOperator::NotEquals, "true");
        assert!(evaluate(&c, &f));
    }

    #[test]
    fn test_contains_text_and_list() {
        let f = facts();
        assert!(evaluate(&cond(ConditionType::Weather, "sky", ConditionOperator::Contains, "dark"), &f));
        assert!(evaluate(&cond(ConditionType::Equipment, "connected", ConditionOperator::Contains, "camera"), &f));
        assert!(evaluate(&cond(ConditionType::Equipment, "connected", ConditionOperator::NotContains, "focuser"), &f));
    }

    #[test]
    fn test_contains_on_scalar_is_type_mismatch() {
        let f = facts();
        let c = cond(ConditionType::Weather, "cloudCover", ConditionOperator::Contains, "1");
        assert!(matches!(assess(&c, &f), ConditionOutcome::TypeMismatch(_)));

        let gate = evaluate_gate(&[c], &f);
        assert!(!gate.passed);
        assert_eq!(gate.logs.len(), 1);
        assert_eq!(gate.logs[0].level, LogLevel::Error);
    }

    #[test]
    fn test_greater_than_on_text_fails_closed() {
        let f = facts();
        let c = cond(ConditionType::Weather, "sky", ConditionOperator::GreaterThan, 3.0);
        assert!(matches!(assess(&c, &f), ConditionOutcome::TypeMismatch(_)));
        assert!(!evaluate(&c, &f));
    }

    #[test]
    fn test_missing_fact_logs_warning() {
        let c = cond(ConditionType::Weather, "humidity", ConditionOperator::LessThan, 80.0);
        let gate = evaluate_gate(&[c], &facts());
        assert!(!gate.passed);
        assert_eq!(gate.logs[0].level, LogLevel::Warning);
        assert!(gate.logs[0].message.contains("weather.humidity"));
    }

    #[test]
    fn test_bare_key_fallback() {
        let c = cond(ConditionType::Custom, "moonPhase", ConditionOperator::Equals, "waning");
        assert!(evaluate(&c, &facts()));
    }

    #[test]
    fn test_gate_evaluates_every_condition() {
        let conditions = vec![
            cond(ConditionType::Weather, "humidity", ConditionOperator::LessThan, 80.0),
            cond(ConditionType::Weather, "cloudCover", ConditionOperator::LessThan, 30.0),
            cond(ConditionType::Weather, "sky", ConditionOperator::LessThan, 1.0),
        ];
        let gate = evaluate_gate(&conditions, &facts());
        assert!(!gate.passed);
        let levels: Vec<LogLevel> = gate.logs.iter().map(|l| l.level).collect();
        assert_eq!(levels, vec![LogLevel::Warning, LogLevel::Error]);
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let f = facts();
        let conditions = vec![
            cond(ConditionType::Weather, "cloudCover", ConditionOperator::LessThan, 30.0),
            cond(ConditionType::Equipment, "connected", ConditionOperator::Contains, "mount"),
            cond(ConditionType::Time, "hour", ConditionOperator::GreaterThan, 20.0),
        ];
        for c in &conditions {
            assert_eq!(assess(c, &f), assess(c, &f));
        }
        assert_eq!(evaluate_gate(&conditions, &f).passed, evaluate_gate(&conditions, &f).passed);
    }
}
