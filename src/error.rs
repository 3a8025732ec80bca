use thiserror::Error;

use crate::models::{ErrorKind, Session, ValidationResult};

/// Errors surfaced by `TranslationService::translate`.
///
/// Per-attempt failures (constraint, syntax, schema mismatch, generation
/// timeouts) never appear here directly: the repair loop absorbs them and only
/// reports `MaxAttemptsExceeded` once the attempt budget is spent.
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("Question cannot be empty")]
    EmptyQuery,

    #[error("No known metric matches the question (best score {best_score:.2})")]
    UnknownMetric { best_score: f64 },

    #[error("Question matches several metrics equally well: {}", .candidates.join(", "))]
    AmbiguousMetric { candidates: Vec<String> },

    #[error("Table schema unavailable: {0}")]
    SchemaUnavailable(String),

    #[error("No valid query after {attempts} attempts; last error {}: {}", kind_label(.last), .last.error_detail)]
    MaxAttemptsExceeded {
        attempts: u32,
        last: ValidationResult,
        session: Box<Session>,
    },

    #[error("Metric catalog error: {0}")]
    Catalog(String),
}

fn kind_label(result: &ValidationResult) -> &'static str {
    result.error_kind.map(|k| k.as_code()).unwrap_or("UNKNOWN")
}

impl TranslateError {
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            TranslateError::EmptyQuery | TranslateError::Catalog(_) => None,
            TranslateError::UnknownMetric { .. } => Some(ErrorKind::UnknownMetric),
            TranslateError::AmbiguousMetric { .. } => Some(ErrorKind::AmbiguousMetric),
            TranslateError::SchemaUnavailable(_) => Some(ErrorKind::SchemaUnavailable),
            TranslateError::MaxAttemptsExceeded { .. } => Some(ErrorKind::MaxAttemptsExceeded),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_attempts_message_names_last_error() {
        let last = ValidationResult::invalid(ErrorKind::SchemaMismatch, "unknown column 'x'");
        let err = TranslateError::MaxAttemptsExceeded {
            attempts: 3,
            last,
            session: Box::new(Session::new(3)),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("SCHEMA_MISMATCH"));
        assert!(msg.contains("unknown column 'x'"));
        assert_eq!(err.kind(), Some(ErrorKind::MaxAttemptsExceeded));
    }

    #[test]
    fn test_ambiguous_lists_candidates() {
        let err = TranslateError::AmbiguousMetric {
            candidates: vec!["a".to_string(), "b".to_string()],
        };
        assert!(err.to_string().contains("a, b"));
    }
}
