use std::time::Duration;

use buhbot_core::types::Classification;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ClassifierError, Result};

/// Context accompanying a classification request — gives the classifier
/// service the surrounding chat/tier signal without sharing store internals.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifyContext {
    pub chat_id: i64,
    pub client_tier: Option<String>,
    pub recent_history: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
struct ClassifyRequest<'a> {
    message_text: &'a str,
    model: &'a str,
    context: &'a ClassifyContext,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiResponse {
    classification: String,
    confidence: f64,
    model: String,
    reasoning: Option<String>,
}

/// Result of a single `classify` call. §4.4's deterministic four-label
/// schema; `confidence` below the configured threshold is still acted on —
/// the threshold is informational for UI, not a gate here.
#[derive(Debug, Clone)]
pub struct ClassifierResponse {
    pub classification: Classification,
    pub confidence: f64,
    pub model: String,
    pub reasoning: Option<String>,
}

/// Thin HTTP client over an external message-classification service.
pub struct ClassifierClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl ClassifierClient {
    pub fn new(api_key: String, base_url: String, model: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, api_key, base_url, model }
    }

    /// §4.4: classify one client message. Failures surface as an error; the
    /// caller (ingress pipeline) decides whether to drop the message.
    pub async fn classify(&self, message_text: &str, ctx: &ClassifyContext) -> Result<ClassifierResponse> {
        let body = ClassifyRequest { message_text, model: &self.model, context: ctx };
        let url = format!("{}/v1/classify", self.base_url);

        debug!(chat_id = ctx.chat_id, "sending classify request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { ClassifierError::Timeout } else { ClassifierError::Request(e) })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "classifier API error");
            return Err(ClassifierError::Api { status, message: text });
        }

        let api_resp: ApiResponse = resp.json().await.map_err(|e| ClassifierError::Parse(e.to_string()))?;

        let classification = api_resp
            .classification
            .parse::<Classification>()
            .map_err(ClassifierError::Parse)?;

        Ok(ClassifierResponse {
            classification,
            confidence: api_resp.confidence,
            model: api_resp.model,
            reasoning: api_resp.reasoning,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_builds_with_explicit_timeout() {
        let client = ClassifierClient::new(
            "test-key".to_string(),
            "https://classifier.internal".to_string(),
            "default".to_string(),
            Duration::from_secs(10),
        );
        assert_eq!(client.model, "default");
    }
}
