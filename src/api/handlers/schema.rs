use axum::{extract::State, Json};

use crate::api::handlers::translate::AppState;
use crate::api::middleware::AppError;
use crate::models::Schema;

/// Current schema of the target table, fetched on first use
pub async fn get_schema(State(state): State<AppState>) -> Result<Json<Schema>, AppError> {
    let schema = state.translator.schema_provider().get_schema().await?;
    Ok(Json(Schema::clone(&schema)))
}

/// Drop the cached schema; the next request re-fetches it
pub async fn invalidate_schema(State(state): State<AppState>) -> Json<serde_json::Value> {
    let provider = state.translator.schema_provider();
    provider.invalidate().await;
    tracing::info!("Schema cache invalidated via API");
    Json(serde_json::json!({
        "invalidated": true,
        "table": provider.table_name(),
    }))
}
