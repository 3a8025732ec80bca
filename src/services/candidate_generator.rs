use std::sync::Arc;
use std::time::Duration;

use super::llm_service::{clean_sql, GenerationError, HttpTextGenerator, TextGenerator};
use crate::config::Config;
use crate::models::{Candidate, MetricEntry, QueryIntent, Schema, ValidationResult};

/// The attempt a new candidate is supposed to repair
#[derive(Debug, Clone, Copy)]
pub struct PriorAttempt<'p> {
    /// Absent when the previous generation itself failed
    pub candidate: Option<&'p Candidate>,
    pub failure: &'p ValidationResult,
}

pub enum GenerationStrategy {
    Model(Arc<dyn TextGenerator>),
    /// Keyword templates, used when no gateway is configured
    Template,
}

/// Drafts SQL candidates from an intent and the table schema
pub struct CandidateGenerator {
    strategy: GenerationStrategy,
    timeout: Duration,
    allowed_functions: Vec<String>,
}

impl CandidateGenerator {
    pub fn new(strategy: GenerationStrategy, timeout: Duration, allowed_functions: Vec<String>) -> Self {
        Self {
            strategy,
            timeout,
            allowed_functions,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let strategy = if config.llm.is_configured() {
            tracing::info!("Using {} LLM endpoint at {}", config.llm.provider, config.llm.gateway_url);
            GenerationStrategy::Model(Arc::new(HttpTextGenerator::new(&config.llm)))
        } else {
            tracing::warn!("LLM gateway not configured; falling back to template generation");
            GenerationStrategy::Template
        };
        Self::new(
            strategy,
            config.pipeline.per_call_timeout(),
            config.pipeline.allowed_functions.clone(),
        )
    }

    pub fn is_template(&self) -> bool {
        matches!(self.strategy, GenerationStrategy::Template)
    }

    pub async fn generate(
        &self,
        intent: &QueryIntent<'_>,
        schema: &Schema,
        prior: Option<PriorAttempt<'_>>,
        attempt_index: u32,
    ) -> Result<Candidate, GenerationError> {
        let sql_text = match &self.strategy {
            GenerationStrategy::Template => {
                let sql = template_sql(intent, schema, attempt_index.min(2));
                tracing::warn!("Template generation (level {}): {}", attempt_index.min(2), sql);
                sql
            }
            GenerationStrategy::Model(generator) => {
                let prompt = self.build_prompt(intent, schema, prior, false);
                let mut sql = clean_sql(&self.complete(generator.as_ref(), &prompt).await?);

                let previous = prior.and_then(|p| p.candidate);
                if let Some(previous) = previous {
                    if same_query(&sql, &previous.sql_text) {
                        tracing::warn!("Generator repeated the failing query; re-prompting once");
                        let prompt = self.build_prompt(intent, schema, prior, true);
                        sql = clean_sql(&self.complete(generator.as_ref(), &prompt).await?);
                    }
                }
                sql
            }
        };

        Ok(Candidate {
            sql_text,
            attempt_index,
            parent_failure: prior.map(|p| p.failure.clone()),
        })
    }

    async fn complete(&self, generator: &dyn TextGenerator, prompt: &str) -> Result<String, GenerationError> {
        tokio::time::timeout(self.timeout, generator.complete(prompt))
            .await
            .map_err(|_| GenerationError::Timeout(self.timeout.as_secs()))?
    }

    /// Instructions, schema, matched metrics and tags, the question and,
    /// on repair attempts, the failure to fix.
    pub fn build_prompt(
        &self,
        intent: &QueryIntent<'_>,
        schema: &Schema,
        prior: Option<PriorAttempt<'_>>,
        repeated: bool,
    ) -> String {
        let table = &schema.table_name;
        let schema_context = prepare_schema_context(schema);
        let metric_context = prepare_metric_context(&intent.matched_metrics);

        let mut tag_context = String::new();
        if !intent.matched_tags.is_empty() {
            tag_context.push_str("Matched tags:\n");
            for (key, value) in &intent.matched_tags {
                tag_context.push_str(&format!("  - {} = {}\n", key, value));
            }
        }

        let mut prompt = format!(
            r#"You are a SQL expert for Timeplus streaming SQL (ClickHouse-compatible). Given the schema of a single metrics stream and a question, write one SELECT query.

{schema_context}
{metric_context}
{tag_context}
Question: {question}

Instructions:
1. Query only the table {table}; never use JOIN or any other table, also not in subqueries
2. Select the metric with metric = '<metric name>'
3. Filter a tag with tagK<n> = '<tag key>' AND tagV<n> = '<tag value>' using the slot listed for the metric
4. value is a string column: use to_float64(value) for numeric comparisons and aggregations
5. Use _tp_time for time filters, e.g. _tp_time > now() - INTERVAL 1 HOUR
6. Use table({table}) for historical queries; tumble/hop/session windows expose window_start and window_end
7. Only these functions are allowed: {functions}
8. String values must use single quotes
9. Return ONLY the SQL query, no explanations or markdown
"#,
            schema_context = schema_context,
            metric_context = metric_context,
            tag_context = tag_context,
            question = intent.raw_text,
            table = table,
            functions = self.allowed_functions.join(", "),
        );

        if let Some(prior) = prior {
            prompt.push_str("\nThe previous attempt failed.\n");
            if let Some(candidate) = prior.candidate {
                prompt.push_str(&format!("Previous SQL: {}\n", candidate.sql_text));
            }
            let kind = prior.failure.error_kind.map(|k| k.as_code()).unwrap_or("UNKNOWN");
            prompt.push_str(&format!("Error: {}: {}\n", kind, prior.failure.error_detail));
            if let Some(fragment) = &prior.failure.offending_fragment {
                prompt.push_str(&format!("Offending fragment: {}\n", fragment));
            }
            if repeated {
                prompt.push_str("You repeated the failing query. Write a different query that avoids this error.\n");
            } else {
                prompt.push_str("Fix the error and return a corrected query.\n");
            }
        }

        prompt.push_str("\nSQL Query:");
        prompt
    }
}

fn prepare_schema_context(schema: &Schema) -> String {
    let mut context = format!("Table {} columns:\n", schema.table_name);
    for column in &schema.columns {
        context.push_str(&format!("  * {} ({})", column.name, column.data_type));
        if column.is_tag {
            context.push_str(" [TAG]");
        }
        if let Some(description) = &column.description {
            context.push_str(&format!(" - {}", description));
        }
        context.push('\n');
    }
    context
}

fn prepare_metric_context(metrics: &[&MetricEntry]) -> String {
    if metrics.is_empty() {
        return String::new();
    }
    let mut context = String::from("Matched metrics (best first):\n");
    for metric in metrics {
        context.push_str(&format!("  - {}", metric.name));
        if !metric.description.is_empty() {
            context.push_str(&format!(": {}", metric.description));
        }
        context.push('\n');
        if !metric.aliases.is_empty() {
            let aliases: Vec<&str> = metric.aliases.iter().map(String::as_str).collect();
            context.push_str(&format!("    aliases: {}\n", aliases.join(", ")));
        }
        for (idx, tag) in metric.tags.iter().enumerate() {
            let slot = idx + 1;
            context.push_str(&format!("    tag {} -> tagK{}/tagV{}", tag.key, slot, slot));
            if let Some(values) = &tag.allowed_values {
                let values: Vec<&str> = values.iter().map(String::as_str).collect();
                context.push_str(&format!(" (values: {})", values.join(", ")));
            }
            context.push('\n');
        }
    }
    context
}

pub(crate) fn same_query(a: &str, b: &str) -> bool {
    let normalize = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    normalize(a) == normalize(b)
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

struct Aggregation {
    expr: &'static str,
    alias: &'static str,
}

fn detect_aggregation(question: &str) -> Option<Aggregation> {
    let has = |words: &[&str]| words.iter().any(|w| question.contains(w));
    if has(&["count", "how many", "数量", "多少"]) {
        Some(Aggregation { expr: "count(*)", alias: "total" })
    } else if has(&["average", "avg", "mean", "平均"]) {
        Some(Aggregation {
            expr: "avg(to_float64(value))",
            alias: "avg_value",
        })
    } else if has(&["max", "maximum", "highest", "最大", "最高"]) {
        Some(Aggregation {
            expr: "max(to_float64(value))",
            alias: "max_value",
        })
    } else if has(&["min", "minimum", "lowest", "最小", "最低"]) {
        Some(Aggregation {
            expr: "min(to_float64(value))",
            alias: "min_value",
        })
    } else if has(&["sum", "total", "总", "成交额"]) {
        Some(Aggregation {
            expr: "sum(to_float64(value))",
            alias: "sum_value",
        })
    } else {
        None
    }
}

fn detect_time_filter(question: &str) -> Option<&'static str> {
    if ["last hour", "past hour", "近一小时", "最近一小时", "过去一小时"]
        .iter()
        .any(|w| question.contains(w))
    {
        Some("_tp_time > now() - INTERVAL 1 HOUR")
    } else if ["today", "今天", "今日"].iter().any(|w| question.contains(w)) {
        Some("_tp_time >= today()")
    } else {
        None
    }
}

/// Deterministic SQL from the intent. Higher levels are simpler:
/// level 1 drops aggregation and time filter, level 2 selects bare rows.
/// Metric and tag filters are kept at every level.
fn template_sql(intent: &QueryIntent<'_>, schema: &Schema, level: u32) -> String {
    let table = &schema.table_name;
    let Some(metric) = intent.primary_metric() else {
        return format!("SELECT * FROM {} LIMIT 100", table);
    };
    let question = intent.raw_text.to_lowercase();

    let aggregation = if level == 0 { detect_aggregation(&question) } else { None };
    let time_filter = if level == 0 { detect_time_filter(&question) } else { None };

    let mut filters = vec![format!("metric = {}", quote(&metric.name))];
    for (key, value) in &intent.matched_tags {
        if let Some(slot) = metric.tag_slot(key) {
            filters.push(format!("tagK{} = {}", slot, quote(key)));
            filters.push(format!("tagV{} = {}", slot, quote(value)));
        }
    }
    if let Some(time_filter) = time_filter {
        filters.push(time_filter.to_string());
    }
    let where_clause = filters.join(" AND ");

    if level >= 2 {
        return format!("SELECT * FROM {} WHERE {} LIMIT 100", table, where_clause);
    }
    match aggregation {
        Some(agg) => format!(
            "SELECT {} AS {} FROM {} WHERE {}",
            agg.expr, agg.alias, table, where_clause
        ),
        None => format!(
            "SELECT _tp_time, metric, to_float64(value) AS metric_value FROM {} WHERE {} ORDER BY _tp_time DESC LIMIT 100",
            table, where_clause
        ),
    }
}
