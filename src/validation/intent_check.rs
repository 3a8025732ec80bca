// Intent conformance
//
// A query can be well formed and schema-correct yet answer another question.
// This check runs after validation and requires the resolved metric and the
// tag values of the primary metric to appear as equality filters.

use super::dialect::SqlDialectKind;
use super::inspect::{inspect, Comparison, LiteralKind, QueryFacts};
use crate::models::{ErrorKind, QueryIntent, ValidationResult};

#[derive(Debug, Clone, Copy)]
pub struct IntentChecker {
    dialect: SqlDialectKind,
}

impl IntentChecker {
    pub fn new(dialect: SqlDialectKind) -> Self {
        Self { dialect }
    }

    pub fn check(&self, candidate_sql: &str, intent: &QueryIntent<'_>) -> ValidationResult {
        let statements = match self.dialect.parse(candidate_sql) {
            Ok(statements) => statements,
            Err(message) => return ValidationResult::invalid(ErrorKind::SyntaxError, message),
        };
        let facts = inspect(&statements);

        let Some(metric) = intent.primary_metric() else {
            return ValidationResult::valid();
        };

        if !filters_on(&facts, |column| column.eq_ignore_ascii_case("metric"), &metric.name) {
            return ValidationResult::invalid(
                ErrorKind::SchemaMismatch,
                format!(
                    "Query does not select the requested metric; add metric = '{}'",
                    metric.name
                ),
            )
            .with_fragment(metric.name.clone());
        }

        // tags found only on secondary metrics have no slot to check against
        for (key, value) in &intent.matched_tags {
            let Some(slot) = metric.tag_slot(key) else {
                continue;
            };
            let value_column = format!("tagV{}", slot);
            if !filters_on(&facts, |column| column.eq_ignore_ascii_case(&value_column), value) {
                return ValidationResult::invalid(
                    ErrorKind::SchemaMismatch,
                    format!(
                        "Query does not filter on tag {} = '{}'; add tagK{} = '{}' AND tagV{} = '{}'",
                        key, value, slot, key, slot, value
                    ),
                )
                .with_fragment(value.clone());
            }
        }

        ValidationResult::valid()
    }
}

fn filters_on(facts: &QueryFacts, column_matches: impl Fn(&str) -> bool, value: &str) -> bool {
    facts
        .comparisons
        .iter()
        .filter(|c| c.equality && c.literal == LiteralKind::String && column_matches(&c.column))
        .any(|c| string_literal(c).eq_ignore_ascii_case(value))
}

fn string_literal(comparison: &Comparison) -> String {
    let text = comparison.literal_text.trim();
    let inner = text
        .strip_prefix('\'')
        .and_then(|t| t.strip_suffix('\''))
        .unwrap_or(text);
    inner.replace("''", "'")
}
