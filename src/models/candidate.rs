use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Failure taxonomy shared by every pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    UnknownMetric,
    AmbiguousMetric,
    SchemaUnavailable,
    ConstraintViolation,
    SyntaxError,
    SchemaMismatch,
    GenerationTimeout,
    GenerationFailed,
    MaxAttemptsExceeded,
}

impl ErrorKind {
    pub fn as_code(&self) -> &'static str {
        match self {
            ErrorKind::UnknownMetric => "UNKNOWN_METRIC",
            ErrorKind::AmbiguousMetric => "AMBIGUOUS_METRIC",
            ErrorKind::SchemaUnavailable => "SCHEMA_UNAVAILABLE",
            ErrorKind::ConstraintViolation => "CONSTRAINT_VIOLATION",
            ErrorKind::SyntaxError => "SYNTAX_ERROR",
            ErrorKind::SchemaMismatch => "SCHEMA_MISMATCH",
            ErrorKind::GenerationTimeout => "GENERATION_TIMEOUT",
            ErrorKind::GenerationFailed => "GENERATION_FAILED",
            ErrorKind::MaxAttemptsExceeded => "MAX_ATTEMPTS_EXCEEDED",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_code())
    }
}

/// Outcome of one check (constraint, schema or generation)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub error_detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offending_fragment: Option<String>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            error_kind: None,
            error_detail: String::new(),
            offending_fragment: None,
        }
    }

    pub fn invalid(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            error_kind: Some(kind),
            error_detail: detail.into(),
            offending_fragment: None,
        }
    }

    pub fn with_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.offending_fragment = Some(fragment.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub sql_text: String,
    pub attempt_index: u32,
    /// Failure of the previous attempt that this candidate tries to repair
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_failure: Option<ValidationResult>,
}

/// One generate/check cycle. `candidate` is absent when generation itself failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub attempt_index: u32,
    pub candidate: Option<Candidate>,
    pub result: ValidationResult,
}

/// Attempt history of a single translation request, bounded by `max_attempts`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub max_attempts: u32,
    attempts: Vec<Attempt>,
}

impl Session {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            max_attempts,
            attempts: Vec::with_capacity(max_attempts as usize),
        }
    }

    /// Append an attempt; refused once the session is full
    pub fn record(&mut self, attempt: Attempt) -> bool {
        if self.is_full() {
            return false;
        }
        self.attempts.push(attempt);
        true
    }

    pub fn is_full(&self) -> bool {
        self.attempts.len() >= self.max_attempts as usize
    }

    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn last_result(&self) -> Option<&ValidationResult> {
        self.attempts.last().map(|a| &a.result)
    }
}
