use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use url::Url;

use crate::config::Config;
use crate::error::TranslateError;
use crate::models::{ColumnDef, Schema, SchemaOrigin};

#[derive(Debug, Error)]
pub enum SchemaSourceError {
    #[error("Invalid schema source configuration: {0}")]
    Config(String),

    #[error("Schema request failed: {0}")]
    Request(String),

    #[error("Schema source returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse schema response: {0}")]
    Parse(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),
}

/// Where the authoritative table layout comes from
#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn fetch(&self, table_name: &str) -> Result<Schema, SchemaSourceError>;
}

/// Built-in layout of the metrics stream
pub fn t_metrics_schema(table_name: &str) -> Schema {
    let mut columns = vec![
        ColumnDef::new("event_ts", "uint64").with_description("Event timestamp in milliseconds"),
        ColumnDef::new("metric", "string").with_description("Metric name"),
        ColumnDef::new("value", "string")
            .with_description("Metric value; convert with to_float64(value) for numeric work"),
        ColumnDef::new("metric_date", "int64").with_description("Date as yyyymmdd"),
        ColumnDef::new("metric_time", "int64").with_description("Time of day as hhmmss"),
        ColumnDef::new("metric_datetime", "int64").with_description("Datetime as yyyymmddhhmmss"),
    ];
    for slot in 1..=5 {
        columns.push(
            ColumnDef::new(format!("tagK{}", slot), "low_cardinality(string)")
                .with_description(format!("Tag key of slot {}", slot)),
        );
    }
    for slot in 1..=5 {
        columns.push(
            ColumnDef::new(format!("tagV{}", slot), "string")
                .with_description(format!("Tag value of slot {}", slot)),
        );
    }
    columns.push(
        ColumnDef::new("_tp_time", "datetime64(3, 'UTC')").with_description("Ingestion time, used for time filters"),
    );

    Schema::new(table_name, columns, SchemaOrigin::Static)
}

/// Serves the built-in layout for the configured table only
pub struct StaticSchemaSource {
    table_name: String,
}

impl StaticSchemaSource {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
        }
    }
}

#[async_trait]
impl SchemaSource for StaticSchemaSource {
    async fn fetch(&self, table_name: &str) -> Result<Schema, SchemaSourceError> {
        if table_name != self.table_name {
            return Err(SchemaSourceError::TableNotFound(table_name.to_string()));
        }
        Ok(t_metrics_schema(table_name))
    }
}

#[derive(Debug, Deserialize)]
struct SystemColumnRow {
    name: String,
    #[serde(rename = "type")]
    data_type: String,
    #[serde(default)]
    comment: String,
}

/// Reads `system.columns` over the engine's HTTP interface
pub struct TimeplusSchemaSource {
    base_url: Url,
    database: String,
    user: String,
    password: String,
    client: Client,
}

impl TimeplusSchemaSource {
    pub fn new(
        url: &str,
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SchemaSourceError> {
        let base_url = Url::parse(url).map_err(|e| SchemaSourceError::Config(format!("Invalid Timeplus URL: {}", e)))?;
        if base_url.scheme() != "http" && base_url.scheme() != "https" {
            return Err(SchemaSourceError::Config(
                "Timeplus URL must use http:// or https://".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SchemaSourceError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            database: database.into(),
            user: user.into(),
            password: password.into(),
            client,
        })
    }

    fn columns_query(&self, table_name: &str) -> String {
        format!(
            "SELECT name, type, comment FROM system.columns WHERE database = '{}' AND table = '{}' ORDER BY position FORMAT JSONEachRow",
            escape_literal(&self.database),
            escape_literal(table_name)
        )
    }

    fn parse_rows(body: &str) -> Result<Vec<ColumnDef>, SchemaSourceError> {
        body.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                let row: SystemColumnRow =
                    serde_json::from_str(line).map_err(|e| SchemaSourceError::Parse(e.to_string()))?;
                Ok(ColumnDef::new(row.name, row.data_type).with_description(row.comment))
            })
            .collect()
    }
}

#[async_trait]
impl SchemaSource for TimeplusSchemaSource {
    async fn fetch(&self, table_name: &str) -> Result<Schema, SchemaSourceError> {
        let sql = self.columns_query(table_name);
        tracing::debug!("Fetching schema of {}.{} from {}", self.database, table_name, self.base_url);

        let mut request = self.client.post(self.base_url.clone()).body(sql);
        if !self.user.is_empty() {
            request = request.basic_auth(&self.user, Some(&self.password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| SchemaSourceError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SchemaSourceError::Status { status, body });
        }

        let body = response
            .text()
            .await
            .map_err(|e| SchemaSourceError::Request(e.to_string()))?;
        let columns = Self::parse_rows(&body)?;
        if columns.is_empty() {
            return Err(SchemaSourceError::TableNotFound(format!("{}.{}", self.database, table_name)));
        }

        Ok(Schema::new(table_name, columns, SchemaOrigin::Live))
    }
}

fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Cached access to the target table's schema.
///
/// Readers share one `Arc<Schema>`; `invalidate` only drops the cached copy,
/// so requests already holding a snapshot keep using it.
pub struct SchemaProvider {
    source: Arc<dyn SchemaSource>,
    table_name: String,
    timeout: Duration,
    cache: RwLock<Option<Arc<Schema>>>,
}

impl SchemaProvider {
    pub fn new(source: Arc<dyn SchemaSource>, table_name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            source,
            table_name: table_name.into(),
            timeout,
            cache: RwLock::new(None),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, SchemaSourceError> {
        let table = &config.pipeline.target_table;
        let timeout = config.pipeline.per_call_timeout();
        let source: Arc<dyn SchemaSource> = match config.schema.source.to_lowercase().as_str() {
            "static" => Arc::new(StaticSchemaSource::new(table.clone())),
            "timeplus" | "proton" => Arc::new(TimeplusSchemaSource::new(
                &config.schema.url,
                config.schema.database.clone(),
                config.schema.user.clone(),
                config.schema.password.clone(),
                timeout,
            )?),
            other => {
                return Err(SchemaSourceError::Config(format!("Unknown schema source '{}'", other)));
            }
        };

        tracing::info!("Schema source: {} (table {})", config.schema.source, table);
        Ok(Self::new(source, table.clone(), timeout))
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub async fn get_schema(&self) -> Result<Arc<Schema>, TranslateError> {
        if let Some(schema) = self.cache.read().await.as_ref() {
            return Ok(Arc::clone(schema));
        }

        let mut cache = self.cache.write().await;
        // another request may have filled it while we waited
        if let Some(schema) = cache.as_ref() {
            return Ok(Arc::clone(schema));
        }

        let schema = Arc::new(self.fetch().await?);
        tracing::info!(
            "Schema for {} loaded ({} columns, {:?})",
            schema.table_name,
            schema.columns.len(),
            schema.origin
        );
        *cache = Some(Arc::clone(&schema));
        Ok(schema)
    }

    pub async fn invalidate(&self) {
        let mut cache = self.cache.write().await;
        if cache.take().is_some() {
            tracing::info!("Schema cache for {} invalidated", self.table_name);
        }
    }

    async fn fetch(&self) -> Result<Schema, TranslateError> {
        let schema = match tokio::time::timeout(self.timeout, self.source.fetch(&self.table_name)).await {
            Ok(Ok(schema)) => schema,
            Ok(Err(e)) => {
                tracing::error!("Schema fetch for {} failed: {}", self.table_name, e);
                return Err(TranslateError::SchemaUnavailable(e.to_string()));
            }
            Err(_) => {
                tracing::error!("Schema fetch for {} timed out", self.table_name);
                return Err(TranslateError::SchemaUnavailable(format!(
                    "Schema fetch timed out after {} seconds",
                    self.timeout.as_secs_f64()
                )));
            }
        };

        if schema.table_name != self.table_name {
            return Err(TranslateError::SchemaUnavailable(format!(
                "Schema source returned table '{}' instead of '{}'",
                schema.table_name, self.table_name
            )));
        }
        if schema.columns.is_empty() {
            return Err(TranslateError::SchemaUnavailable(format!(
                "Schema for '{}' has no columns",
                self.table_name
            )));
        }
        Ok(schema)
    }
}
