use sqlparser::ast::Statement;
use std::collections::BTreeSet;

use super::dialect::SqlDialectKind;
use super::inspect::{inspect, QueryFacts};
use crate::models::{ErrorKind, ValidationResult};

/// Structural policy for generated queries: one SELECT, one table, no joins,
/// only allow-listed functions. Column existence is the validator's job.
#[derive(Debug, Clone)]
pub struct ConstraintEnforcer {
    dialect: SqlDialectKind,
    allowed_functions: BTreeSet<String>,
}

impl ConstraintEnforcer {
    pub fn new<I, S>(dialect: SqlDialectKind, allowed_functions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            dialect,
            allowed_functions: allowed_functions
                .into_iter()
                .map(|f| f.as_ref().trim().to_lowercase())
                .collect(),
        }
    }

    pub fn dialect(&self) -> SqlDialectKind {
        self.dialect
    }

    pub fn check(&self, candidate_sql: &str) -> ValidationResult {
        let sql = candidate_sql.trim();
        if sql.is_empty() {
            return ValidationResult::invalid(ErrorKind::ConstraintViolation, "Empty SQL query");
        }

        let statements = match self.dialect.parse(sql) {
            Ok(statements) => statements,
            Err(message) => return ValidationResult::invalid(ErrorKind::SyntaxError, message),
        };

        if let Some(violation) = Self::check_statements(&statements) {
            return violation;
        }

        let facts = inspect(&statements);
        if let Some(violation) = Self::check_tables(&facts) {
            return violation;
        }
        if let Some(violation) = self.check_functions(&facts) {
            return violation;
        }

        ValidationResult::valid()
    }

    fn check_statements(statements: &[Statement]) -> Option<ValidationResult> {
        if statements.is_empty() {
            return Some(ValidationResult::invalid(ErrorKind::ConstraintViolation, "Empty SQL query"));
        }
        if statements.len() > 1 {
            return Some(ValidationResult::invalid(
                ErrorKind::ConstraintViolation,
                format!("Exactly one statement is allowed, found {}", statements.len()),
            ));
        }

        let kind = match &statements[0] {
            Statement::Query(_) => return None,
            Statement::Insert { .. } => "INSERT",
            Statement::Update { .. } => "UPDATE",
            Statement::Delete { .. } => "DELETE",
            Statement::Drop { .. } => "DROP",
            Statement::CreateTable { .. } => "CREATE TABLE",
            Statement::AlterTable { .. } => "ALTER TABLE",
            _ => "non-SELECT",
        };
        Some(
            ValidationResult::invalid(
                ErrorKind::ConstraintViolation,
                format!("{} statements are not allowed. Only SELECT queries are permitted.", kind),
            )
            .with_fragment(statements[0].to_string()),
        )
    }

    fn check_tables(facts: &QueryFacts) -> Option<ValidationResult> {
        if let Some(join) = &facts.join_fragment {
            return Some(
                ValidationResult::invalid(
                    ErrorKind::ConstraintViolation,
                    format!("JOIN is not allowed; query the single metrics table only (joined: {})", join),
                )
                .with_fragment(join.clone()),
            );
        }
        if facts.comma_join {
            return Some(ValidationResult::invalid(
                ErrorKind::ConstraintViolation,
                "Multiple tables in FROM are not allowed; query the single metrics table only",
            ));
        }

        let tables = facts.distinct_tables();
        if tables.is_empty() {
            return Some(ValidationResult::invalid(
                ErrorKind::ConstraintViolation,
                "Query does not read from any table; select from the metrics table",
            ));
        }
        if tables.len() > 1 {
            let names: Vec<&str> = tables.into_iter().collect();
            return Some(
                ValidationResult::invalid(
                    ErrorKind::ConstraintViolation,
                    format!(
                        "Query references {} tables ({}); only a single table is allowed, including inside subqueries",
                        names.len(),
                        names.join(", ")
                    ),
                )
                .with_fragment(names.join(", ")),
            );
        }
        None
    }

    fn check_functions(&self, facts: &QueryFacts) -> Option<ValidationResult> {
        let disallowed = facts
            .functions
            .iter()
            .find(|f| !self.allowed_functions.contains(f.as_str()))?;

        Some(
            ValidationResult::invalid(
                ErrorKind::ConstraintViolation,
                format!(
                    "Function '{}' is not allowed. Allowed functions: {}",
                    disallowed,
                    self.allowed_functions.iter().cloned().collect::<Vec<_>>().join(", ")
                ),
            )
            .with_fragment(disallowed.clone()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_ALLOWED_FUNCTIONS;

    fn enforcer() -> ConstraintEnforcer {
        ConstraintEnforcer::new(SqlDialectKind::ClickHouse, DEFAULT_ALLOWED_FUNCTIONS.iter())
    }

    #[test]
    fn test_accepts_single_table_select() {
        let result = enforcer().check(
            "SELECT metric, to_float64(value) AS v FROM t_metrics WHERE metric = 'tick_latency' LIMIT 10",
        );
        assert!(result.is_valid, "{:?}", result);
    }

    #[test]
    fn test_rejects_join() {
        let result = enforcer().check("SELECT * FROM t_metrics JOIN other_table ON t_metrics.metric = other_table.metric");
        assert!(!result.is_valid);
        assert_eq!(result.error_kind, Some(ErrorKind::ConstraintViolation));
        assert!(result.error_detail.contains("JOIN"));
    }

    #[test]
    fn test_rejects_comma_join() {
        let result = enforcer().check("SELECT * FROM t_metrics, other_table");
        assert_eq!(result.error_kind, Some(ErrorKind::ConstraintViolation));
    }

    #[test]
    fn test_rejects_subquery_on_second_table() {
        let result = enforcer().check("SELECT * FROM t_metrics WHERE metric IN (SELECT name FROM metric_names)");
        assert_eq!(result.error_kind, Some(ErrorKind::ConstraintViolation));
        assert!(result.offending_fragment.unwrap().contains("metric_names"));
    }

    #[test]
    fn test_allows_subquery_on_same_table() {
        let result = enforcer().check(
            "SELECT * FROM t_metrics WHERE to_float64(value) > (SELECT avg(to_float64(value)) FROM t_metrics)",
        );
        assert!(result.is_valid, "{:?}", result);
    }

    #[test]
    fn test_rejects_query_without_table() {
        for sql in ["SELECT 1", "SELECT now()", "WITH x AS (SELECT 1 AS one) SELECT one FROM x"] {
            let result = enforcer().check(sql);
            assert_eq!(result.error_kind, Some(ErrorKind::ConstraintViolation), "{}", sql);
            assert!(result.error_detail.contains("any table"), "{}", sql);
        }
    }

    #[test]
    fn test_nested_window_source_counts_as_table() {
        let ok = enforcer().check(
            "SELECT window_start, count(*) FROM tumble(table(t_metrics), _tp_time, INTERVAL 1 MINUTE) GROUP BY window_start",
        );
        assert!(ok.is_valid, "{:?}", ok);

        let mixed = enforcer().check(
            "SELECT count(*) FROM tumble(table(other_stream), _tp_time, INTERVAL 1 MINUTE) \
             WHERE metric IN (SELECT metric FROM t_metrics)",
        );
        assert_eq!(mixed.error_kind, Some(ErrorKind::ConstraintViolation));
        assert!(mixed.offending_fragment.unwrap().contains("other_stream"));
    }

    #[test]
    fn test_rejects_disallowed_function() {
        let result = enforcer().check("SELECT sleep(3) FROM t_metrics");
        assert_eq!(result.error_kind, Some(ErrorKind::ConstraintViolation));
        assert_eq!(result.offending_fragment.as_deref(), Some("sleep"));
    }

    #[test]
    fn test_function_names_are_case_insensitive() {
        let result = enforcer().check("SELECT COUNT(*) FROM t_metrics");
        assert!(result.is_valid, "{:?}", result);
    }

    #[test]
    fn test_rejects_non_select_statements() {
        for sql in [
            "INSERT INTO t_metrics (metric) VALUES ('x')",
            "DELETE FROM t_metrics WHERE metric = 'x'",
            "DROP TABLE t_metrics",
        ] {
            let result = enforcer().check(sql);
            assert_eq!(result.error_kind, Some(ErrorKind::ConstraintViolation), "{}", sql);
        }
    }

    #[test]
    fn test_rejects_multiple_statements() {
        let result = enforcer().check("SELECT 1 FROM t_metrics; SELECT 2 FROM t_metrics");
        assert_eq!(result.error_kind, Some(ErrorKind::ConstraintViolation));
    }

    #[test]
    fn test_unparseable_is_syntax_error() {
        let result = enforcer().check("SELEC metric FRM t_metrics");
        assert_eq!(result.error_kind, Some(ErrorKind::SyntaxError));
    }

    #[test]
    fn test_window_function_is_allowed() {
        let result = enforcer().check(
            "SELECT window_start, count(*) FROM tumble(t_metrics, _tp_time, INTERVAL 1 MINUTE) GROUP BY window_start",
        );
        assert!(result.is_valid, "{:?}", result);
    }
}
