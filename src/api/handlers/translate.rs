use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::middleware::AppError;
use crate::config::Config;
use crate::services::{Translation, TranslationService};

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub translator: Arc<TranslationService>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TranslateRequest {
    pub question: String,
}

/// Translate a natural language question into validated SQL
pub async fn translate(
    State(state): State<AppState>,
    Json(payload): Json<TranslateRequest>,
) -> Result<Json<Translation>, AppError> {
    let question = payload.question.trim();
    if question.is_empty() {
        return Err(AppError::Validation("Question cannot be empty".to_string()));
    }

    let translation = state.translator.translate_detailed(question).await?;
    Ok(Json(translation))
}

/// Non-secret pipeline and generation settings the server runs with
pub async fn get_settings(State(state): State<AppState>) -> Json<serde_json::Value> {
    let pipeline = &state.config.pipeline;
    let llm = &state.config.llm;
    Json(serde_json::json!({
        "target_table": pipeline.target_table,
        "max_attempts": pipeline.max_attempts,
        "per_call_timeout_secs": pipeline.per_call_timeout_secs,
        "dialect": pipeline.dialect,
        "min_match_score": pipeline.min_match_score,
        "allowed_functions": pipeline.allowed_functions,
        "generation": {
            "mode": if llm.is_configured() { "model" } else { "template" },
            "provider": llm.provider,
            "model": llm.model,
        },
        "schema_source": state.config.schema.source,
    }))
}
