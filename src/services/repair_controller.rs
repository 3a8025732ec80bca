// Generate-validate-repair loop
//
// Each request walks an explicit state machine:
//   Start -> Generating -> Enforcing -> Validating -> Conforming -> Success
//                 ^                                                  |
//                 +------------------- Retrying <--------------------+ (any failure)
//   Retrying -> Exhausted once max_attempts attempts are recorded.

use std::sync::Arc;

use super::candidate_generator::{same_query, CandidateGenerator, PriorAttempt};
use super::llm_service::GenerationError;
use crate::error::TranslateError;
use crate::models::{Attempt, Candidate, ErrorKind, QueryIntent, Schema, Session, ValidationResult};
use crate::validation::{ConstraintEnforcer, IntentChecker, QueryValidator};

#[derive(Debug)]
enum State {
    Start,
    Generating,
    Enforcing(Candidate),
    Validating(Candidate),
    Conforming(Candidate),
    Retrying {
        candidate: Option<Candidate>,
        failure: ValidationResult,
    },
    Success(Candidate),
    Exhausted,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Start => "start",
            State::Generating => "generating",
            State::Enforcing(_) => "enforcing",
            State::Validating(_) => "validating",
            State::Conforming(_) => "conforming",
            State::Retrying { .. } => "retrying",
            State::Success(_) => "success",
            State::Exhausted => "exhausted",
        }
    }
}

pub struct RepairController {
    generator: CandidateGenerator,
    enforcer: ConstraintEnforcer,
    validator: Arc<dyn QueryValidator>,
    intent_checker: IntentChecker,
    max_attempts: u32,
}

impl RepairController {
    pub fn new(
        generator: CandidateGenerator,
        enforcer: ConstraintEnforcer,
        validator: Arc<dyn QueryValidator>,
        max_attempts: u32,
    ) -> Self {
        let intent_checker = IntentChecker::new(enforcer.dialect());
        Self {
            generator,
            enforcer,
            validator,
            intent_checker,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run the loop until a candidate passes every check or the attempt
    /// budget is spent. Only validated SQL is ever returned.
    pub async fn run(
        &self,
        intent: &QueryIntent<'_>,
        schema: &Schema,
    ) -> Result<(Candidate, Session), TranslateError> {
        let mut session = Session::new(self.max_attempts);
        let mut attempt_index: u32 = 0;
        let mut last: Option<(Option<Candidate>, ValidationResult)> = None;
        let mut state = State::Start;

        loop {
            let from = state.name();
            state = match state {
                State::Start => {
                    attempt_index = 0;
                    State::Generating
                }
                State::Generating => {
                    let prior = last.as_ref().map(|(candidate, failure)| PriorAttempt {
                        candidate: candidate.as_ref(),
                        failure,
                    });
                    match self.generator.generate(intent, schema, prior, attempt_index).await {
                        Ok(candidate) => match repeated_failure(&candidate, last.as_ref()) {
                            Some(failure) => State::Retrying {
                                candidate: Some(candidate),
                                failure,
                            },
                            None => State::Enforcing(candidate),
                        },
                        Err(e) => {
                            let kind = match e {
                                GenerationError::Timeout(_) => ErrorKind::GenerationTimeout,
                                GenerationError::Failed(_) => ErrorKind::GenerationFailed,
                            };
                            State::Retrying {
                                candidate: None,
                                failure: ValidationResult::invalid(kind, e.to_string()),
                            }
                        }
                    }
                }
                State::Enforcing(candidate) => {
                    let result = self.enforcer.check(&candidate.sql_text);
                    if result.is_valid {
                        State::Validating(candidate)
                    } else {
                        State::Retrying {
                            candidate: Some(candidate),
                            failure: result,
                        }
                    }
                }
                State::Validating(candidate) => {
                    let result = self.validator.validate(&candidate.sql_text, schema);
                    if result.is_valid {
                        State::Conforming(candidate)
                    } else {
                        State::Retrying {
                            candidate: Some(candidate),
                            failure: result,
                        }
                    }
                }
                State::Conforming(candidate) => {
                    let result = self.intent_checker.check(&candidate.sql_text, intent);
                    if result.is_valid {
                        State::Success(candidate)
                    } else {
                        State::Retrying {
                            candidate: Some(candidate),
                            failure: result,
                        }
                    }
                }
                State::Retrying { candidate, failure } => {
                    tracing::warn!(
                        "Attempt {} failed with {}: {}",
                        attempt_index,
                        failure.error_kind.map(|k| k.as_code()).unwrap_or("UNKNOWN"),
                        failure.error_detail
                    );
                    session.record(Attempt {
                        attempt_index,
                        candidate: candidate.clone(),
                        result: failure.clone(),
                    });
                    last = Some((candidate, failure));
                    attempt_index += 1;
                    if attempt_index >= self.max_attempts {
                        State::Exhausted
                    } else {
                        State::Generating
                    }
                }
                State::Success(candidate) => {
                    tracing::info!("Attempt {} produced a valid query", attempt_index);
                    session.record(Attempt {
                        attempt_index,
                        candidate: Some(candidate.clone()),
                        result: ValidationResult::valid(),
                    });
                    return Ok((candidate, session));
                }
                State::Exhausted => {
                    let last = session.last_result().cloned().unwrap_or_else(|| {
                        ValidationResult::invalid(ErrorKind::MaxAttemptsExceeded, "no attempt recorded")
                    });
                    tracing::warn!("Giving up after {} attempts", session.len());
                    return Err(TranslateError::MaxAttemptsExceeded {
                        attempts: session.len() as u32,
                        last,
                        session: Box::new(session),
                    });
                }
            };
            tracing::debug!("attempt {}: {} -> {}", attempt_index, from, state.name());
        }
    }
}

/// A candidate identical to the failed predecessor fails the same way
fn repeated_failure(
    candidate: &Candidate,
    last: Option<&(Option<Candidate>, ValidationResult)>,
) -> Option<ValidationResult> {
    let (Some(previous), failure) = last? else {
        return None;
    };
    if !same_query(&candidate.sql_text, &previous.sql_text) {
        return None;
    }
    let kind = failure.error_kind.unwrap_or(ErrorKind::ConstraintViolation);
    let mut repeated = ValidationResult::invalid(
        kind,
        format!("Repeated the previously failing query: {}", failure.error_detail),
    );
    repeated.offending_fragment = failure.offending_fragment.clone();
    Some(repeated)
}
