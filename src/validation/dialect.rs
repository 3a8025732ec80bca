// SQL dialect selection
//
// Generated queries target a single engine; the dialect decides which grammar
// sqlparser applies when checking them.

use sqlparser::ast::Statement;
use sqlparser::dialect::{ClickHouseDialect, Dialect, GenericDialect, PostgreSqlDialect};
use sqlparser::parser::Parser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialectKind {
    /// Timeplus/Proton speak a ClickHouse-flavoured SQL
    ClickHouse,
    Generic,
    PostgreSql,
}

impl SqlDialectKind {
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.trim().to_lowercase().as_str() {
            "clickhouse" | "timeplus" | "proton" => Ok(SqlDialectKind::ClickHouse),
            "generic" | "ansi" => Ok(SqlDialectKind::Generic),
            "postgresql" | "postgres" => Ok(SqlDialectKind::PostgreSql),
            _ => Err(format!("Unsupported SQL dialect: {}", s)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SqlDialectKind::ClickHouse => "clickhouse",
            SqlDialectKind::Generic => "generic",
            SqlDialectKind::PostgreSql => "postgresql",
        }
    }

    fn dialect(&self) -> Box<dyn Dialect> {
        match self {
            SqlDialectKind::ClickHouse => Box::new(ClickHouseDialect {}),
            SqlDialectKind::Generic => Box::new(GenericDialect {}),
            SqlDialectKind::PostgreSql => Box::new(PostgreSqlDialect {}),
        }
    }

    /// Parse `sql` into statements, returning the parser message on failure
    pub fn parse(&self, sql: &str) -> Result<Vec<Statement>, String> {
        let dialect = self.dialect();
        Parser::parse_sql(dialect.as_ref(), sql).map_err(|e| format!("SQL parsing error: {}", e))
    }
}

impl Default for SqlDialectKind {
    fn default() -> Self {
        SqlDialectKind::ClickHouse
    }
}

/// Last dotted segment of a (possibly qualified, possibly quoted) object name
pub fn unqualified_name(name: &str) -> String {
    let last = name.rsplit('.').next().unwrap_or(name);
    last.trim_matches(|c| c == '"' || c == '`' || c == '[' || c == ']')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_from_str() {
        assert_eq!(SqlDialectKind::from_str("ClickHouse").unwrap(), SqlDialectKind::ClickHouse);
        assert_eq!(SqlDialectKind::from_str("proton").unwrap(), SqlDialectKind::ClickHouse);
        assert_eq!(SqlDialectKind::from_str("postgres").unwrap(), SqlDialectKind::PostgreSql);
        assert!(SqlDialectKind::from_str("oracle").is_err());
    }

    #[test]
    fn test_parse_reports_errors() {
        let dialect = SqlDialectKind::ClickHouse;
        assert!(dialect.parse("SELECT metric FROM t_metrics").is_ok());
        let err = dialect.parse("SELEC metric FRM t_metrics").unwrap_err();
        assert!(err.contains("SQL parsing error"));
    }

    #[test]
    fn test_unqualified_name() {
        assert_eq!(unqualified_name("default.t_metrics"), "t_metrics");
        assert_eq!(unqualified_name("\"t_metrics\""), "t_metrics");
        assert_eq!(unqualified_name("t_metrics"), "t_metrics");
    }
}
