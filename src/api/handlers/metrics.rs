use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::api::handlers::translate::AppState;
use crate::api::middleware::AppError;
use crate::models::{Language, MetricEntry};

const DEFAULT_LOOKUP_LIMIT: usize = 10;

#[derive(Debug, Deserialize)]
pub struct LookupParams {
    pub q: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct MetricHit {
    pub score: f64,
    #[serde(flatten)]
    pub metric: MetricEntry,
}

#[derive(Debug, Serialize)]
pub struct LookupResponse {
    pub query: String,
    pub language: Language,
    pub catalog_version: String,
    pub matches: Vec<MetricHit>,
}

/// Rank catalog metrics against a text fragment
pub async fn lookup_metrics(
    State(state): State<AppState>,
    Query(params): Query<LookupParams>,
) -> Result<Json<LookupResponse>, AppError> {
    let query = params.q.trim();
    if query.is_empty() {
        return Err(AppError::Validation("Query parameter 'q' cannot be empty".to_string()));
    }

    let dictionary = state.translator.dictionary();
    let language = Language::detect(query);
    let matches = dictionary
        .lookup(query, language)
        .into_iter()
        .take(params.limit.unwrap_or(DEFAULT_LOOKUP_LIMIT))
        .map(|m| MetricHit {
            score: m.score,
            metric: m.entry.clone(),
        })
        .collect();

    Ok(Json(LookupResponse {
        query: query.to_string(),
        language,
        catalog_version: dictionary.catalog_version().to_string(),
        matches,
    }))
}

/// List the whole catalog
pub async fn list_metrics(State(state): State<AppState>) -> Json<serde_json::Value> {
    let dictionary = state.translator.dictionary();
    Json(serde_json::json!({
        "catalog_version": dictionary.catalog_version(),
        "metrics": dictionary.entries(),
    }))
}
