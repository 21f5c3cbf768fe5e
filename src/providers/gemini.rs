// =============================================================================
// gemini.rs - Gemini generateContent adapter
// =============================================================================
//
// Gemini deployments rotate model availability faster than config changes
// ship, so the adapter carries an ordered fallback-model list. Each model
// gets the full retry budget before the next one is tried; the final error
// names every model attempted.
// =============================================================================

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::models::{Citation, Confidence};
use crate::prompts::build_combined_runtime_prompt;
use crate::providers::{
    map_transport_error, Provider, ProviderError, ProviderErrorCode, ProviderResult,
};

const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    api_key: Option<String>,
    model: String,
    fallback_models: Vec<String>,
    base_url: String,
    max_retries: u32,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateContentResponse {
    fn text(&self) -> String {
        self.candidates
            .iter()
            .filter_map(|candidate| candidate.content.as_ref())
            .flat_map(|content| content.parts.iter())
            .filter_map(|part| part.text.as_deref())
            .collect::<Vec<_>>()
            .join("")
    }
}

impl GeminiProvider {
    pub fn new(
        api_key: Option<String>,
        model: impl Into<String>,
        fallback_models: Vec<String>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("immcad-api/0.1")
            .build()?;
        Ok(Self {
            api_key,
            model: model.into(),
            fallback_models,
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            max_retries,
            http,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn attempt(
        &self,
        api_key: &str,
        model: &str,
        prompt: &str,
    ) -> Result<String, ProviderError> {
        let endpoint = format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(model)
        );
        let body = json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": {"temperature": 0.2},
        });

        let response = self
            .http
            .post(&endpoint)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| map_transport_error("gemini", &err))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProviderError::new(
                "gemini",
                ProviderErrorCode::RateLimit,
                format!("Gemini rate limited the request: {detail}"),
            ));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProviderError::new(
                "gemini",
                ProviderErrorCode::ProviderError,
                format!("Gemini returned HTTP {status}: {detail}"),
            ));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|err| map_transport_error("gemini", &err))?;
        let answer = parsed.text();
        if answer.is_empty() {
            return Err(ProviderError::new(
                "gemini",
                ProviderErrorCode::ProviderError,
                format!("Empty Gemini response from model '{model}'"),
            ));
        }
        Ok(answer)
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(
        &self,
        message: &str,
        citations: &[Citation],
        locale: &str,
    ) -> Result<ProviderResult, ProviderError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ProviderError::new(
                "gemini",
                ProviderErrorCode::ProviderError,
                "GEMINI_API_KEY not configured",
            ));
        };

        let prompt = build_combined_runtime_prompt(message, citations, locale);
        let models: Vec<&str> = std::iter::once(self.model.as_str())
            .chain(self.fallback_models.iter().map(String::as_str))
            .collect();

        let mut last_error: Option<ProviderError> = None;
        for model in &models {
            for attempt in 0..=self.max_retries {
                match self.attempt(api_key, model, &prompt).await {
                    Ok(answer) => {
                        return Ok(ProviderResult {
                            provider: self.name().to_string(),
                            answer,
                            citations: citations.to_vec(),
                            confidence: Confidence::Medium,
                        });
                    }
                    Err(err) => {
                        debug!(model, attempt, code = %err.code, "gemini attempt failed");
                        last_error = Some(err);
                    }
                }
                if attempt < self.max_retries {
                    tokio::time::sleep(Duration::from_millis(400 * (attempt as u64 + 1))).await;
                }
            }
        }

        let models_tried = models.join(", ");
        Err(match last_error {
            Some(err) => ProviderError::new(
                "gemini",
                err.code,
                format!("{} (models tried: {models_tried})", err.message),
            ),
            None => ProviderError::new(
                "gemini",
                ProviderErrorCode::ProviderError,
                "Empty Gemini response",
            ),
        })
    }
}
