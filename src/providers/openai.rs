// =============================================================================
// openai.rs - OpenAI chat-completions adapter
// =============================================================================

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::models::{Citation, Confidence};
use crate::prompts::build_runtime_prompts;
use crate::providers::{
    map_transport_error, Provider, ProviderError, ProviderErrorCode, ProviderResult,
};

const DEFAULT_OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAIProvider {
    api_key: Option<String>,
    model: String,
    endpoint: String,
    max_retries: u32,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAIProvider {
    pub fn new(
        api_key: Option<String>,
        model: impl Into<String>,
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
            endpoint: DEFAULT_OPENAI_ENDPOINT.to_string(),
            max_retries,
            http,
        })
    }

    /// Point the adapter at a compatible endpoint (tests, proxies).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn attempt(
        &self,
        api_key: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<AttemptOutcome, ProviderError> {
        let body = json!({
            "model": self.model,
            "temperature": 0.2,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
        });

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| map_transport_error("openai", &err))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProviderError::new(
                "openai",
                ProviderErrorCode::RateLimit,
                format!("OpenAI rate limited the request: {detail}"),
            ));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProviderError::new(
                "openai",
                ProviderErrorCode::ProviderError,
                format!("OpenAI returned HTTP {status}: {detail}"),
            ));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|err| map_transport_error("openai", &err))?;

        // Missing choices/content are response-shape defects, not transient
        // upstream weather; the caller must not burn retries on them.
        let Some(first_choice) = completion.choices.into_iter().next() else {
            return Ok(AttemptOutcome::NonTransient(
                "OpenAI response contained no choices".to_string(),
            ));
        };
        let content = first_choice.message.and_then(|message| message.content);
        let Some(answer) = content else {
            return Ok(AttemptOutcome::NonTransient(
                "OpenAI response contained no message content".to_string(),
            ));
        };
        Ok(AttemptOutcome::Answer(answer))
    }
}

enum AttemptOutcome {
    Answer(String),
    NonTransient(String),
}

#[async_trait]
impl Provider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(
        &self,
        message: &str,
        citations: &[Citation],
        locale: &str,
    ) -> Result<ProviderResult, ProviderError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ProviderError::new(
                "openai",
                ProviderErrorCode::ProviderError,
                "OPENAI_API_KEY not configured",
            ));
        };

        let (system_prompt, user_prompt) = build_runtime_prompts(message, citations, locale);

        let mut last_error: Option<ProviderError> = None;
        for attempt in 0..=self.max_retries {
            match self.attempt(api_key, &system_prompt, &user_prompt).await {
                Ok(AttemptOutcome::Answer(answer)) if !answer.is_empty() => {
                    return Ok(ProviderResult {
                        provider: self.name().to_string(),
                        answer,
                        citations: citations.to_vec(),
                        confidence: Confidence::Medium,
                    });
                }
                Ok(AttemptOutcome::Answer(_)) => {
                    last_error = Some(ProviderError::new(
                        "openai",
                        ProviderErrorCode::ProviderError,
                        "Empty OpenAI response",
                    ));
                }
                Ok(AttemptOutcome::NonTransient(message)) => {
                    return Err(ProviderError::new(
                        "openai",
                        ProviderErrorCode::ProviderError,
                        message,
                    ));
                }
                Err(err) => {
                    debug!(attempt, code = %err.code, "openai attempt failed");
                    last_error = Some(err);
                }
            }

            if attempt < self.max_retries {
                tokio::time::sleep(Duration::from_millis(400 * (attempt as u64 + 1))).await;
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ProviderError::new(
                "openai",
                ProviderErrorCode::ProviderError,
                "Empty OpenAI response",
            )
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_api_key_is_a_provider_error() {
        let provider =
            OpenAIProvider::new(None, "gpt-4o-mini", Duration::from_secs(5), 1).unwrap();
        let err = provider.generate("hi", &[], "en-CA").await.unwrap_err();
        assert_eq!(err.code, ProviderErrorCode::ProviderError);
        assert!(err.message.contains("OPENAI_API_KEY"));
    }

    #[test]
    fn completion_shape_tolerates_missing_fields() {
        let parsed: ChatCompletionResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(parsed.choices.is_empty());

        let parsed: ChatCompletionResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"content": "Informational answer."}}]}"#,
        )
        .unwrap();
        assert_eq!(
            parsed.choices[0]
                .message
                .as_ref()
                .and_then(|m| m.content.as_deref()),
            Some("Informational answer.")
        );

        let parsed: ChatCompletionResponse =
            serde_json::from_str(r#"{"choices": [{"message": {}}]}"#).unwrap();
        assert!(parsed.choices[0]
            .message
            .as_ref()
            .and_then(|m| m.content.as_deref())
            .is_none());
    }
}
