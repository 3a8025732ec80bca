use std::collections::BTreeSet;

use super::dialect::SqlDialectKind;
use super::inspect::{inspect, LiteralKind, QueryFacts, WINDOW_PSEUDO_COLUMNS};
use crate::models::{ColumnType, ErrorKind, Schema, ValidationResult};

/// Checks a candidate against the table schema without executing it
pub trait QueryValidator: Send + Sync {
    fn validate(&self, candidate_sql: &str, schema: &Schema) -> ValidationResult;
}

/// SQL validation against the target dialect and the single table schema.
///
/// Stops at the first problem; the repair loop surfaces later ones on the
/// next attempt.
pub struct SqlValidator {
    dialect: SqlDialectKind,
}

impl SqlValidator {
    pub fn new(dialect: SqlDialectKind) -> Self {
        Self { dialect }
    }

    fn check_tables(facts: &QueryFacts, schema: &Schema) -> Option<ValidationResult> {
        let foreign = facts
            .tables
            .iter()
            .filter(|t| !facts.cte_names.contains(&t.name))
            .find(|t| t.name != schema.table_name);

        let Some(foreign) = foreign else {
            if facts.tables.iter().any(|t| t.name == schema.table_name) {
                return None;
            }
            return Some(ValidationResult::invalid(
                ErrorKind::SchemaMismatch,
                format!("Query does not read from {}; add FROM {}", schema.table_name, schema.table_name),
            ));
        };

        Some(
            ValidationResult::invalid(
                ErrorKind::SchemaMismatch,
                format!(
                    "Unknown table '{}'. Only '{}' can be queried",
                    foreign.name, schema.table_name
                ),
            )
            .with_fragment(foreign.name.clone()),
        )
    }

    fn check_identifiers(facts: &QueryFacts, schema: &Schema) -> Option<ValidationResult> {
        let mut known: BTreeSet<&str> = schema.columns.iter().map(|c| c.name.as_str()).collect();
        known.extend(facts.cte_names.iter().map(String::as_str));
        known.insert(schema.table_name.as_str());
        if facts.uses_window_function() {
            known.extend(WINDOW_PSEUDO_COLUMNS.iter().copied());
        }
        // an alias only names a column once its own expression resolves
        let aliases = facts.grounded_aliases(&known);
        known.extend(aliases);

        let mut qualifiers: BTreeSet<&str> = facts.table_aliases().collect();
        qualifiers.insert(schema.table_name.as_str());
        qualifiers.extend(facts.cte_names.iter().map(String::as_str));

        for path in &facts.identifiers {
            let Some(column) = path.last() else {
                continue;
            };
            if path.len() > 1 {
                let qualifier = &path[path.len() - 2];
                if !qualifiers.contains(qualifier.as_str()) {
                    return Some(
                        ValidationResult::invalid(
                            ErrorKind::SchemaMismatch,
                            format!(
                                "Unknown table qualifier '{}' in '{}'. Only '{}' can be referenced",
                                qualifier,
                                path.join("."),
                                schema.table_name
                            ),
                        )
                        .with_fragment(path.join(".")),
                    );
                }
            }
            if !known.contains(column.as_str()) {
                let hint = if column.chars().any(|c| !c.is_ascii()) || column.contains(' ') {
                    " (string values must use single quotes)"
                } else {
                    ""
                };
                return Some(
                    ValidationResult::invalid(
                        ErrorKind::SchemaMismatch,
                        format!(
                            "Unknown column '{}' in table {}{}. Available columns: {}",
                            column,
                            schema.table_name,
                            hint,
                            schema.column_names().join(", ")
                        ),
                    )
                    .with_fragment(column.clone()),
                );
            }
        }
        None
    }

    fn check_comparisons(facts: &QueryFacts, schema: &Schema) -> Option<ValidationResult> {
        for comparison in &facts.comparisons {
            let Some(column) = schema.column(&comparison.column) else {
                continue;
            };
            let mismatch = match (&column.column_type, comparison.literal) {
                (ColumnType::String, LiteralKind::Number | LiteralKind::Boolean) => true,
                (ColumnType::Integer | ColumnType::Float, LiteralKind::String) => {
                    let unquoted = comparison.literal_text.trim_matches('\'');
                    unquoted.parse::<f64>().is_err()
                }
                _ => false,
            };
            if mismatch {
                let advice = if column.name == "value" {
                    " Convert it with to_float64(value) before numeric comparisons."
                } else if column.is_tag {
                    " Tag columns hold strings; quote the value."
                } else {
                    ""
                };
                return Some(
                    ValidationResult::invalid(
                        ErrorKind::SchemaMismatch,
                        format!(
                            "Type mismatch in '{}': column '{}' is {} but is compared with {}.{}",
                            comparison.expr_text,
                            column.name,
                            column.data_type,
                            comparison.literal_text,
                            advice
                        ),
                    )
                    .with_fragment(comparison.expr_text.clone()),
                );
            }
        }
        None
    }
}

impl QueryValidator for SqlValidator {
    fn validate(&self, candidate_sql: &str, schema: &Schema) -> ValidationResult {
        let statements = match self.dialect.parse(candidate_sql) {
            Ok(statements) => statements,
            Err(message) => return ValidationResult::invalid(ErrorKind::SyntaxError, message),
        };
        if statements.is_empty() {
            return ValidationResult::invalid(ErrorKind::SyntaxError, "Empty SQL query");
        }

        let facts = inspect(&statements);

        Self::check_tables(&facts, schema)
            .or_else(|| Self::check_identifiers(&facts, schema))
            .or_else(|| Self::check_comparisons(&facts, schema))
            .unwrap_or_else(ValidationResult::valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::schema_provider::t_metrics_schema;

    fn validate(sql: &str) -> ValidationResult {
        SqlValidator::new(SqlDialectKind::ClickHouse).validate(sql, &t_metrics_schema("t_metrics"))
    }

    #[test]
    fn test_valid_tag_filter() {
        let result = validate(
            "SELECT _tp_time, to_float64(value) AS latency FROM t_metrics \
             WHERE metric = 'tick_latency' AND tagK1 = 'city' AND tagV1 = '深圳' \
             ORDER BY _tp_time DESC LIMIT 100",
        );
        assert!(result.is_valid, "{:?}", result);
    }

    #[test]
    fn test_unknown_column_is_schema_mismatch() {
        let result = validate("SELECT nonexistent_col FROM t_metrics");
        assert!(!result.is_valid);
        assert_eq!(result.error_kind, Some(ErrorKind::SchemaMismatch));
        assert!(result.error_detail.contains("nonexistent_col"));
        assert_eq!(result.offending_fragment.as_deref(), Some("nonexistent_col"));
    }

    #[test]
    fn test_wrong_table_is_schema_mismatch() {
        let result = validate("SELECT metric FROM metrics_v2");
        assert_eq!(result.error_kind, Some(ErrorKind::SchemaMismatch));
        assert!(result.error_detail.contains("metrics_v2"));
    }

    #[test]
    fn test_database_qualified_table_is_accepted() {
        let result = validate("SELECT metric FROM analytics.t_metrics");
        assert!(result.is_valid, "{:?}", result);
    }

    #[test]
    fn test_syntax_error() {
        let result = validate("SELECT metric FROM t_metrics WHERE");
        assert_eq!(result.error_kind, Some(ErrorKind::SyntaxError));
    }

    #[test]
    fn test_tag_compared_with_number() {
        let result = validate("SELECT * FROM t_metrics WHERE tagV1 = 100");
        assert_eq!(result.error_kind, Some(ErrorKind::SchemaMismatch));
        assert!(result.error_detail.contains("tagV1"));
    }

    #[test]
    fn test_string_value_compared_with_number() {
        let result = validate("SELECT * FROM t_metrics WHERE value > 100");
        assert_eq!(result.error_kind, Some(ErrorKind::SchemaMismatch));
        assert!(result.error_detail.contains("to_float64"));

        let converted = validate("SELECT * FROM t_metrics WHERE to_float64(value) > 100");
        assert!(converted.is_valid, "{:?}", converted);
    }

    #[test]
    fn test_numeric_column_compared_with_text() {
        let result = validate("SELECT * FROM t_metrics WHERE metric_date = 'yesterday'");
        assert_eq!(result.error_kind, Some(ErrorKind::SchemaMismatch));

        let numeric_text = validate("SELECT * FROM t_metrics WHERE metric_date = '20240101'");
        assert!(numeric_text.is_valid, "{:?}", numeric_text);
    }

    #[test]
    fn test_double_quoted_value_hints_quoting() {
        let result = validate("SELECT * FROM t_metrics WHERE tagV1 = \"深圳\"");
        assert_eq!(result.error_kind, Some(ErrorKind::SchemaMismatch));
        assert!(result.error_detail.contains("single quotes"));
    }

    #[test]
    fn test_aliases_and_window_columns_are_known() {
        let result = validate(
            "SELECT window_start, avg(to_float64(value)) AS avg_latency \
             FROM tumble(t_metrics, _tp_time, INTERVAL 1 MINUTE) \
             WHERE metric = 'tick_latency' GROUP BY window_start ORDER BY avg_latency DESC",
        );
        assert!(result.is_valid, "{:?}", result);
    }

    #[test]
    fn test_nested_table_in_window_function() {
        let result = validate(
            "SELECT window_start, avg(to_float64(value)) AS avg_latency \
             FROM tumble(table(t_metrics), _tp_time, INTERVAL 1 MINUTE) \
             WHERE metric = 'tick_latency' GROUP BY window_start",
        );
        assert!(result.is_valid, "{:?}", result);

        let other = validate("SELECT count(*) FROM tumble(table(other_stream), _tp_time, INTERVAL 1 MINUTE)");
        assert_eq!(other.error_kind, Some(ErrorKind::SchemaMismatch));
        assert_eq!(other.offending_fragment.as_deref(), Some("other_stream"));
    }

    #[test]
    fn test_query_without_table_is_schema_mismatch() {
        for sql in ["SELECT 1", "SELECT now()", "SELECT 'tick_latency'"] {
            let result = validate(sql);
            assert_eq!(result.error_kind, Some(ErrorKind::SchemaMismatch), "{}", sql);
            assert!(result.error_detail.contains("t_metrics"), "{}", sql);
        }
    }

    #[test]
    fn test_alias_does_not_vouch_for_itself() {
        let result = validate("SELECT nonexistent_col AS nonexistent_col FROM t_metrics");
        assert_eq!(result.error_kind, Some(ErrorKind::SchemaMismatch));
        assert!(result.error_detail.contains("nonexistent_col"));

        let aggregated = validate("SELECT avg(to_float64(latency)) AS latency FROM t_metrics ORDER BY latency");
        assert_eq!(aggregated.error_kind, Some(ErrorKind::SchemaMismatch));
        assert_eq!(aggregated.offending_fragment.as_deref(), Some("latency"));

        let chained = validate(
            "SELECT to_float64(value) AS v, v * 2 AS doubled FROM t_metrics ORDER BY doubled",
        );
        assert!(chained.is_valid, "{:?}", chained);

        let renamed = validate("SELECT to_float64(value) AS value FROM t_metrics");
        assert!(renamed.is_valid, "{:?}", renamed);
    }

    #[test]
    fn test_table_alias_qualifier() {
        let ok = validate("SELECT m.metric FROM t_metrics AS m WHERE m.tagV1 = '深圳'");
        assert!(ok.is_valid, "{:?}", ok);

        let bad = validate("SELECT x.metric FROM t_metrics AS m");
        assert_eq!(bad.error_kind, Some(ErrorKind::SchemaMismatch));
    }

    #[test]
    fn test_first_error_only() {
        let result = validate("SELECT bad_one, bad_two FROM t_metrics");
        assert!(result.error_detail.contains("bad_one"));
        assert!(!result.error_detail.contains("bad_two"));
    }
}
