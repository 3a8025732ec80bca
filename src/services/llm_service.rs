use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::LlmConfig;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GenerationError {
    #[error("Generation timed out after {0} seconds")]
    Timeout(u64),

    #[error("Generation failed: {0}")]
    Failed(String),
}

/// Request shape spoken by the completion endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LlmProvider {
    /// `{prompt, model, max_tokens, temperature}` to an internal gateway
    #[default]
    Gateway,
    /// Anthropic Messages API
    Anthropic,
    /// OpenAI chat completions
    OpenAi,
    /// Groq, OpenAI-compatible chat completions
    Groq,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.trim().to_lowercase().as_str() {
            "" | "gateway" => Ok(LlmProvider::Gateway),
            "anthropic" | "claude" => Ok(LlmProvider::Anthropic),
            "openai" => Ok(LlmProvider::OpenAi),
            "groq" => Ok(LlmProvider::Groq),
            other => Err(format!(
                "Unsupported LLM provider '{}'. Use gateway, anthropic, openai or groq",
                other
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::Gateway => "gateway",
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::OpenAi => "openai",
            LlmProvider::Groq => "groq",
        }
    }
}

/// Text completion backend used to draft SQL
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// Completion over an HTTP LLM gateway
pub struct HttpTextGenerator {
    provider: LlmProvider,
    gateway_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f64,
    max_tokens: u32,
    http_client: HttpClient,
}

impl HttpTextGenerator {
    pub fn new(config: &LlmConfig) -> Self {
        let provider = LlmProvider::from_str(&config.provider).unwrap_or_else(|e| {
            tracing::warn!("{}; using the gateway request shape", e);
            LlmProvider::Gateway
        });
        Self {
            provider,
            gateway_url: config.gateway_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            http_client: HttpClient::new(),
        }
    }

    fn request_body(&self, prompt: &str) -> Value {
        match self.provider {
            LlmProvider::Gateway => json!({
                "prompt": prompt,
                "model": self.model,
                "max_tokens": self.max_tokens,
                "temperature": self.temperature,
            }),
            LlmProvider::Anthropic | LlmProvider::OpenAi | LlmProvider::Groq => json!({
                "model": self.model,
                "max_tokens": self.max_tokens,
                "temperature": self.temperature,
                "messages": [{ "role": "user", "content": prompt }],
            }),
        }
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        let mut request = self.http_client.post(&self.gateway_url).json(&self.request_body(prompt));

        match (&self.api_key, self.provider) {
            (Some(api_key), LlmProvider::Anthropic) => {
                request = request
                    .header("x-api-key", api_key)
                    .header("anthropic-version", "2023-06-01");
            }
            (Some(api_key), _) => {
                request = request.header("Authorization", format!("Bearer {}", api_key));
            }
            (None, _) => {}
        }

        let response = request
            .send()
            .await
            .map_err(|e| GenerationError::Failed(format!("Failed to call LLM service: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GenerationError::Failed(format!(
                "LLM service returned error {}: {}",
                status, error_text
            )));
        }

        let result: Value = response
            .json()
            .await
            .map_err(|e| GenerationError::Failed(format!("Failed to parse LLM response: {}", e)))?;

        extract_text(&result)
            .map(str::to_string)
            .ok_or_else(|| GenerationError::Failed("LLM response does not contain text".to_string()))
    }
}

/// Pull the completion out of the common gateway response shapes
fn extract_text(result: &Value) -> Option<&str> {
    result["text"]
        .as_str()
        .or_else(|| result["content"].as_str())
        .or_else(|| result["content"][0]["text"].as_str())
        .or_else(|| result["response"].as_str())
        .or_else(|| result["choices"][0]["message"]["content"].as_str())
        .or_else(|| result["choices"][0]["text"].as_str())
}

/// Strip markdown fences, a leading `SQL:` label and trailing semicolons
pub fn clean_sql(raw: &str) -> String {
    let mut sql = raw.trim();
    if let Some(start) = sql.find("```") {
        let fenced = &sql[start + 3..];
        let fenced = fenced
            .strip_prefix("sql")
            .or_else(|| fenced.strip_prefix("SQL"))
            .unwrap_or(fenced);
        sql = match fenced.find("```") {
            Some(end) => &fenced[..end],
            None => fenced,
        };
    }

    let mut sql = sql.trim();
    for label in ["SQL:", "sql:", "SQL Query:"] {
        if let Some(rest) = sql.strip_prefix(label) {
            sql = rest.trim_start();
        }
    }

    sql.trim().trim_end_matches(';').trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_sql_strips_fences() {
        let raw = "```sql\nSELECT metric FROM t_metrics;\n```";
        assert_eq!(clean_sql(raw), "SELECT metric FROM t_metrics");
    }

    #[test]
    fn test_clean_sql_strips_label_and_prose() {
        assert_eq!(clean_sql("SQL: SELECT 1 FROM t_metrics ;;"), "SELECT 1 FROM t_metrics");
        assert_eq!(
            clean_sql("Here is the query:\n```\nSELECT metric FROM t_metrics\n```\nDone."),
            "SELECT metric FROM t_metrics"
        );
    }

    #[test]
    fn test_extract_text_shapes() {
        assert_eq!(extract_text(&json!({"text": "a"})), Some("a"));
        assert_eq!(extract_text(&json!({"content": "b"})), Some("b"));
        assert_eq!(extract_text(&json!({"response": "c"})), Some("c"));
        assert_eq!(
            extract_text(&json!({"choices": [{"message": {"content": "d"}}]})),
            Some("d")
        );
        assert_eq!(extract_text(&json!({"choices": [{"text": "e"}]})), Some("e"));
        assert_eq!(
            extract_text(&json!({"content": [{"type": "text", "text": "f"}]})),
            Some("f")
        );
        assert_eq!(extract_text(&json!({"other": 1})), None);
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_failure() {
        let generator = HttpTextGenerator::new(&llm_config("gateway"));
        let err = generator.complete("SELECT").await.unwrap_err();
        assert!(matches!(err, GenerationError::Failed(_)));
    }

    fn llm_config(provider: &str) -> LlmConfig {
        LlmConfig {
            provider: provider.to_string(),
            gateway_url: "http://127.0.0.1:9/v1/complete".to_string(),
            api_key: None,
            model: "test".to_string(),
            temperature: 0.1,
            max_tokens: 100,
        }
    }

    #[test]
    fn test_request_body_follows_provider() {
        let gateway = HttpTextGenerator::new(&llm_config("gateway")).request_body("q");
        assert_eq!(gateway["prompt"], "q");
        assert!(gateway.get("messages").is_none());

        for provider in ["anthropic", "openai", "groq"] {
            let body = HttpTextGenerator::new(&llm_config(provider)).request_body("q");
            assert_eq!(body["messages"][0]["role"], "user", "{}", provider);
            assert_eq!(body["messages"][0]["content"], "q", "{}", provider);
            assert_eq!(body["model"], "test");
            assert!(body.get("prompt").is_none());
        }
    }

    #[test]
    fn test_provider_names() {
        assert_eq!(LlmProvider::from_str("OpenAI"), Ok(LlmProvider::OpenAi));
        assert_eq!(LlmProvider::from_str("claude"), Ok(LlmProvider::Anthropic));
        assert_eq!(LlmProvider::from_str(""), Ok(LlmProvider::Gateway));
        assert!(LlmProvider::from_str("mistral").is_err());
    }
}
