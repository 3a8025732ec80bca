use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::api::handlers::{metrics, schema, translate, AppState};
use crate::config::Config;
use crate::services::TranslationService;

/// Create router with application state
pub fn create_router_with_state(translator: Arc<TranslationService>, config: Config) -> Router {
    let state = AppState { config, translator };

    Router::new()
        .route("/health", get(health_check))
        .route("/api/translate", post(translate::translate))
        .route("/api/settings", get(translate::get_settings))
        .route("/api/metrics", get(metrics::list_metrics))
        .route("/api/metrics/lookup", get(metrics::lookup_metrics))
        .route("/api/schema", get(schema::get_schema))
        .route("/api/schema/invalidate", post(schema::invalidate_schema))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MetricEntry, TagSpec};
    use crate::services::MetricDictionary;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> Router {
        let config = crate::config::tests::test_config();
        let dictionary = Arc::new(MetricDictionary::from_entries(
            vec![
                MetricEntry::new("tick_latency", "Tick market data latency")
                    .with_alias("tick行情延时")
                    .with_alias("tick latency")
                    .with_tag(TagSpec::with_values("city", ["深圳", "上海"])),
                MetricEntry::new("tick_count", "").with_alias("延时"),
                MetricEntry::new("order_latency", "").with_alias("延时"),
            ],
            "test",
        ));
        let translator = Arc::new(TranslationService::from_config(&config, dictionary).unwrap());
        create_router_with_state(translator, config)
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_translate_endpoint() {
        let response = app()
            .oneshot(post_json("/api/translate", json!({ "question": "查询深圳的tick行情延时" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        let sql = body["sql"].as_str().unwrap();
        assert!(sql.contains("tagV1 = '深圳'"));
        assert_eq!(body["attempts"], 1);
        assert!(body["session"]["session_id"].is_string());
    }

    #[tokio::test]
    async fn test_translate_unknown_metric() {
        let response = app()
            .oneshot(post_json("/api/translate", json!({ "question": "weather forecast" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "UNKNOWN_METRIC");
    }

    #[tokio::test]
    async fn test_translate_ambiguous_metric() {
        let response = app()
            .oneshot(post_json("/api/translate", json!({ "question": "延时" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "AMBIGUOUS_METRIC");
        assert_eq!(body["error"]["details"]["candidates"], json!(["tick_count", "order_latency"]));
    }

    #[tokio::test]
    async fn test_translate_empty_question() {
        let response = app()
            .oneshot(post_json("/api/translate", json!({ "question": "  " })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_settings_endpoint() {
        let response = app()
            .oneshot(Request::builder().uri("/api/settings").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["target_table"], "t_metrics");
        assert_eq!(body["max_attempts"], 3);
        assert_eq!(body["generation"]["mode"], "template");
        assert!(body.get("password").is_none());
        assert!(body["generation"].get("api_key").is_none());
    }

    #[tokio::test]
    async fn test_metric_lookup() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/api/metrics/lookup?q=tick%20latency")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["language"], "en");
        assert_eq!(body["matches"][0]["name"], "tick_latency");
        assert_eq!(body["matches"][0]["score"], 1.0);
    }

    #[tokio::test]
    async fn test_schema_endpoints() {
        let app = app();
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/api/schema").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["table_name"], "t_metrics");
        assert_eq!(body["columns"].as_array().unwrap().len(), 17);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/schema/invalidate")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["invalidated"], true);
    }
}
