use super::types::NightshiftError;

#[derive(Debug, Clone)]
pub struct ErrorClassification {
    pub error_type: &'static str,
    pub retryable: bool,
}

impl NightshiftError {
    /// Classify this error to determine its type and whether it can be retried.
    pub fn classify(&self) -> ErrorClassification {
        match self {
            // Retryable errors
            NightshiftError::ActionTimeout(_) => ErrorClassification {
                error_type: "ActionTimeoutError",
                retryable: true,
            },
            NightshiftError::ActionExecution(_) => ErrorClassification {
                error_type: "ActionExecutionError",
                retryable: true,
            },
            NightshiftError::Notification(_) => ErrorClassification {
                error_type: "NotificationError",
                retryable: true,
            },
            NightshiftError::Io(_) => ErrorClassification {
                error_type: "IoError",
                retryable: true,
            },
            NightshiftError::Database(_) => ErrorClassification {
                error_type: "DatabaseError",
                retryable: true,
            },

            // Definition-time errors never get better on retry
            NightshiftError::Validation(_) => ErrorClassification {
                error_type: "ValidationError",
                retryable: false,
            },
            NightshiftError::Graph(_) => ErrorClassification {
                error_type: "ValidationError",
                retryable: false,
            },
            NightshiftError::Schedule(_) => ErrorClassification {
                error_type: "ValidationError",
                retryable: false,
            },
            NightshiftError::ConditionEvaluation(_) => ErrorClassification {
                error_type: "ConditionEvaluationError",
                retryable: false,
            },
            NightshiftError::NotFound(_) => ErrorClassification {
                error_type: "NotFoundError",
                retryable: false,
            },
            NightshiftError::Config(_) => ErrorClassification {
                error_type: "ConfigError",
                retryable: false,
            },
            NightshiftError::Json(_) => ErrorClassification {
                error_type: "JsonError",
                retryable: false,
            },
            NightshiftError::Yaml(_) => ErrorClassification {
                error_type: "YamlError",
                retryable: false,
            },
            NightshiftError::Internal(_) => ErrorClassification {
                error_type: "InternalError",
                retryable: false,
            },
        }
    }

    /// Errors raised while validating an agent definition.
    pub fn is_validation(&self) -> bool {
        self.classify().error_type == "ValidationError"
    }
}
