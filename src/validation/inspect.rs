// Structural facts about a parsed query
//
// One walk over the sqlparser AST collects everything the constraint
// enforcer and the schema validator need: table references, joins, function
// calls, identifiers, aliases and literal comparisons.

use sqlparser::ast::{
    visit_expressions, BinaryOperator, Expr, FunctionArg, FunctionArgExpr, FunctionArguments, Query,
    SelectItem, SetExpr, Statement, TableFactor, UnaryOperator, Visit, Visitor,
};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::ControlFlow;

use super::dialect::unqualified_name;

/// Table-valued functions whose first argument names the scanned stream
pub const WINDOW_TABLE_FUNCTIONS: &[&str] = &["tumble", "hop", "session", "table"];

/// Columns produced by window table functions
pub const WINDOW_PSEUDO_COLUMNS: &[&str] = &["window_start", "window_end"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub name: String,
    pub alias: Option<String>,
    /// Set when the table was referenced through e.g. `tumble(t_metrics, ...)`
    pub via_function: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralKind {
    String,
    Number,
    Boolean,
}

/// A column compared against a literal
#[derive(Debug, Clone)]
pub struct Comparison {
    pub column: String,
    pub literal: LiteralKind,
    pub literal_text: String,
    pub expr_text: String,
    /// `=` or a non-negated `IN`, i.e. the comparison selects rows by this value
    pub equality: bool,
}

#[derive(Debug, Default)]
pub struct QueryFacts {
    pub tables: Vec<TableRef>,
    pub join_fragment: Option<String>,
    pub comma_join: bool,
    pub functions: Vec<String>,
    pub cte_names: BTreeSet<String>,
    /// Select alias -> identifier paths inside its defining expression
    pub select_aliases: BTreeMap<String, Vec<Vec<String>>>,
    pub derived_aliases: BTreeSet<String>,
    /// Identifier paths as written, e.g. `["m", "tagV1"]`
    pub identifiers: Vec<Vec<String>>,
    pub comparisons: Vec<Comparison>,
}

impl QueryFacts {
    /// Distinct physical tables, CTE names excluded
    pub fn distinct_tables(&self) -> BTreeSet<&str> {
        self.tables
            .iter()
            .map(|t| t.name.as_str())
            .filter(|name| !self.cte_names.contains(*name))
            .collect()
    }

    pub fn uses_window_function(&self) -> bool {
        self.tables.iter().any(|t| t.via_function.is_some())
    }

    /// Select aliases that resolve to `known` names, directly or through
    /// other resolved aliases. An alias whose expression only reaches itself
    /// or unknown names stays unresolved.
    pub fn grounded_aliases<'a>(&'a self, known: &BTreeSet<&str>) -> BTreeSet<&'a str> {
        let mut grounded: BTreeSet<&'a str> = BTreeSet::new();
        loop {
            let before = grounded.len();
            for (alias, paths) in &self.select_aliases {
                if grounded.contains(alias.as_str()) {
                    continue;
                }
                let resolves = paths
                    .iter()
                    .filter_map(|path| path.last())
                    .all(|name| known.contains(name.as_str()) || grounded.contains(name.as_str()));
                if resolves {
                    grounded.insert(alias.as_str());
                }
            }
            if grounded.len() == before {
                return grounded;
            }
        }
    }

    pub fn table_aliases(&self) -> impl Iterator<Item = &str> {
        self.tables
            .iter()
            .filter_map(|t| t.alias.as_deref())
            .chain(self.derived_aliases.iter().map(String::as_str))
    }
}

/// Walk every statement and collect its structural facts
pub fn inspect(statements: &[Statement]) -> QueryFacts {
    let mut collector = FactCollector::default();
    for statement in statements {
        let _ = statement.visit(&mut collector);
    }
    collector.facts
}

#[derive(Default)]
struct FactCollector {
    facts: QueryFacts,
}

impl FactCollector {
    fn collect_set_expr(&mut self, body: &SetExpr) {
        match body {
            SetExpr::Select(select) => {
                for item in &select.projection {
                    if let SelectItem::ExprWithAlias { expr, alias } = item {
                        let paths = self.facts.select_aliases.entry(alias.value.clone()).or_default();
                        let _ = visit_expressions(expr, |e| {
                            if let Some(path) = identifier_path(e) {
                                paths.push(path);
                            }
                            ControlFlow::<()>::Continue(())
                        });
                    }
                }
                if select.from.len() > 1 {
                    self.facts.comma_join = true;
                }
                for table in &select.from {
                    if let Some(join) = table.joins.first() {
                        if self.facts.join_fragment.is_none() {
                            self.facts.join_fragment = Some(join.relation.to_string());
                        }
                    }
                }
            }
            SetExpr::SetOperation { left, right, .. } => {
                self.collect_set_expr(left);
                self.collect_set_expr(right);
            }
            // nested queries are visited on their own
            _ => {}
        }
    }

    fn record_comparison(&mut self, column_side: &Expr, literal_side: &Expr, whole: &Expr, equality: bool) {
        let (Some(column), Some(literal)) = (column_name(column_side), literal_kind(literal_side)) else {
            return;
        };
        self.facts.comparisons.push(Comparison {
            column,
            literal,
            literal_text: literal_side.to_string(),
            expr_text: whole.to_string(),
            equality,
        });
    }
}

impl Visitor for FactCollector {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.facts.cte_names.insert(cte.alias.name.value.clone());
            }
        }
        self.collect_set_expr(&query.body);
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, table_factor: &TableFactor) -> ControlFlow<Self::Break> {
        match table_factor {
            TableFactor::Table { name, alias, args, .. } => {
                let alias = alias.as_ref().map(|a| a.name.value.clone());
                let function = unqualified_name(&name.to_string()).to_lowercase();
                match args {
                    Some(table_args) => {
                        self.facts.functions.push(function.clone());
                        let first = table_args.args.first().and_then(|arg| match arg {
                            FunctionArg::Unnamed(FunctionArgExpr::Expr(expr)) => Some(window_source(expr)),
                            _ => None,
                        });
                        if WINDOW_TABLE_FUNCTIONS.contains(&function.as_str()) {
                            if let Some(table) = first {
                                self.facts.tables.push(TableRef {
                                    name: unqualified_name(&table),
                                    alias,
                                    via_function: Some(function),
                                });
                            }
                        } else {
                            // other table functions read from outside the table
                            self.facts.tables.push(TableRef {
                                name: function.clone(),
                                alias,
                                via_function: None,
                            });
                        }
                    }
                    None => self.facts.tables.push(TableRef {
                        name: unqualified_name(&name.to_string()),
                        alias,
                        via_function: None,
                    }),
                }
            }
            TableFactor::TableFunction { expr, alias, .. } => {
                self.facts.functions.push("table".to_string());
                self.facts.tables.push(TableRef {
                    name: unqualified_name(&expr.to_string()),
                    alias: alias.as_ref().map(|a| a.name.value.clone()),
                    via_function: Some("table".to_string()),
                });
            }
            TableFactor::Derived { alias, .. } => {
                if let Some(alias) = alias {
                    self.facts.derived_aliases.insert(alias.name.value.clone());
                }
            }
            TableFactor::NestedJoin { table_with_joins, .. } => {
                if self.facts.join_fragment.is_none() {
                    self.facts.join_fragment = Some(table_with_joins.to_string());
                }
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        match expr {
            Expr::Identifier(_) | Expr::CompoundIdentifier(_) => {
                if let Some(path) = identifier_path(expr) {
                    self.facts.identifiers.push(path);
                }
            }
            Expr::Function(function) => {
                self.facts
                    .functions
                    .push(unqualified_name(&function.name.to_string()).to_lowercase());
            }
            Expr::BinaryOp { left, op, right } if is_comparison(op) => {
                let equality = *op == BinaryOperator::Eq;
                self.record_comparison(left, right, expr, equality);
                self.record_comparison(right, left, expr, equality);
            }
            Expr::InList { expr: column, list, negated } => {
                for item in list {
                    self.record_comparison(column, item, expr, !negated);
                }
            }
            Expr::Between { expr: column, low, high, .. } => {
                self.record_comparison(column, low, expr, false);
                self.record_comparison(column, high, expr, false);
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

fn identifier_path(expr: &Expr) -> Option<Vec<String>> {
    match expr {
        Expr::Identifier(ident) => Some(vec![ident.value.clone()]),
        Expr::CompoundIdentifier(parts) => Some(parts.iter().map(|p| p.value.clone()).collect()),
        _ => None,
    }
}

/// The stream scanned by a window function: `t_metrics` for both
/// `tumble(t_metrics, ...)` and `tumble(table(t_metrics), ...)`
fn window_source(expr: &Expr) -> String {
    if let Expr::Function(function) = expr {
        if unqualified_name(&function.name.to_string()).eq_ignore_ascii_case("table") {
            if let FunctionArguments::List(list) = &function.args {
                if let Some(FunctionArg::Unnamed(FunctionArgExpr::Expr(inner))) = list.args.first() {
                    return inner.to_string();
                }
            }
        }
    }
    expr.to_string()
}

fn is_comparison(op: &BinaryOperator) -> bool {
    matches!(
        op,
        BinaryOperator::Eq
            | BinaryOperator::NotEq
            | BinaryOperator::Lt
            | BinaryOperator::LtEq
            | BinaryOperator::Gt
            | BinaryOperator::GtEq
    )
}

fn column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.clone()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|p| p.value.clone()),
        Expr::Nested(inner) => column_name(inner),
        _ => None,
    }
}

fn literal_kind(expr: &Expr) -> Option<LiteralKind> {
    match expr {
        Expr::Value(_) => classify_literal(&expr.to_string()),
        Expr::UnaryOp { op: UnaryOperator::Minus, expr: inner } => match literal_kind(inner) {
            Some(LiteralKind::Number) => Some(LiteralKind::Number),
            _ => None,
        },
        Expr::Nested(inner) => literal_kind(inner),
        _ => None,
    }
}

fn classify_literal(text: &str) -> Option<LiteralKind> {
    let text = text.trim();
    if text.starts_with('\'') {
        Some(LiteralKind::String)
    } else if text.eq_ignore_ascii_case("true") || text.eq_ignore_ascii_case("false") {
        Some(LiteralKind::Boolean)
    } else if text.parse::<f64>().is_ok() {
        Some(LiteralKind::Number)
    } else {
        None
    }
}
