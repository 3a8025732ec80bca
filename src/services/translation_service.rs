use serde::Serialize;
use std::sync::Arc;

use super::candidate_generator::CandidateGenerator;
use super::metric_dictionary::MetricDictionary;
use super::repair_controller::RepairController;
use super::schema_provider::{SchemaProvider, SchemaSourceError};
use crate::config::{Config, PipelineConfig};
use crate::error::TranslateError;
use crate::models::Session;
use crate::validation::{ConstraintEnforcer, SqlDialectKind, SqlValidator};

/// A validated query and the attempts that led to it
#[derive(Debug, Clone, Serialize)]
pub struct Translation {
    pub sql: String,
    pub attempts: usize,
    pub session: Session,
}

/// Entry point: question in, validated single-table SQL out
pub struct TranslationService {
    dictionary: Arc<MetricDictionary>,
    schema_provider: Arc<SchemaProvider>,
    controller: RepairController,
    settings: PipelineConfig,
}

impl TranslationService {
    pub fn new(
        dictionary: Arc<MetricDictionary>,
        schema_provider: Arc<SchemaProvider>,
        controller: RepairController,
        settings: PipelineConfig,
    ) -> Self {
        Self {
            dictionary,
            schema_provider,
            controller,
            settings,
        }
    }

    pub fn from_config(config: &Config, dictionary: Arc<MetricDictionary>) -> Result<Self, SchemaSourceError> {
        let settings = config.pipeline.clone();
        let dialect = SqlDialectKind::from_str(&settings.dialect).map_err(SchemaSourceError::Config)?;

        let schema_provider = Arc::new(SchemaProvider::from_config(config)?);
        let controller = RepairController::new(
            CandidateGenerator::from_config(config),
            ConstraintEnforcer::new(dialect, &settings.allowed_functions),
            Arc::new(SqlValidator::new(dialect)),
            settings.max_attempts,
        );

        Ok(Self::new(dictionary, schema_provider, controller, settings))
    }

    pub fn dictionary(&self) -> &MetricDictionary {
        &self.dictionary
    }

    pub fn schema_provider(&self) -> &SchemaProvider {
        &self.schema_provider
    }

    pub fn settings(&self) -> &PipelineConfig {
        &self.settings
    }

    pub async fn translate(&self, query_text: &str) -> Result<String, TranslateError> {
        self.translate_detailed(query_text).await.map(|t| t.sql)
    }

    /// Same as `translate`, also returning the attempt history
    pub async fn translate_detailed(&self, query_text: &str) -> Result<Translation, TranslateError> {
        let text = query_text.trim();
        if text.is_empty() {
            return Err(TranslateError::EmptyQuery);
        }
        tracing::info!("Translating question: {}", text);

        let intent = self.dictionary.resolve_intent(text, self.settings.min_match_score)?;
        if let Some(metric) = intent.primary_metric() {
            tracing::info!(
                "Resolved metric {} (score {:.2}), tags {:?}",
                metric.name,
                intent.scores.first().copied().unwrap_or_default(),
                intent.matched_tags
            );
        }

        let schema = self.schema_provider.get_schema().await?;
        let (candidate, session) = self.controller.run(&intent, &schema).await?;

        tracing::info!(
            "Translated in {} attempt(s) (session {}): {}",
            session.len(),
            session.session_id,
            candidate.sql_text
        );
        Ok(Translation {
            sql: candidate.sql_text,
            attempts: session.len(),
            session,
        })
    }
}
