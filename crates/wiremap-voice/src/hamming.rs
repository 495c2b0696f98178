use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::VoiceClient;

/// Client for the Hamming voice exercise API. Call completion arrives on the
/// webhook URL passed with each call, not on this client.
#[derive(Debug, Clone)]
pub struct HammingVoiceClient {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    webhook_url: String,
}

impl HammingVoiceClient {
    pub fn new(
        api_key: impl Into<String>,
        api_base: impl Into<String>,
        webhook_url: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            webhook_url: webhook_url.into(),
        }
    }

    pub fn from_env(api_base: impl Into<String>, webhook_url: impl Into<String>) -> Result<Self> {
        let api_key =
            std::env::var("HAMMING_API_KEY").map_err(|_| anyhow!("HAMMING_API_KEY is not set"))?;
        Ok(Self::new(api_key, api_base, webhook_url))
    }

    /// The provider drives the scripted caller from a single prompt; render
    /// the ordered user lines into that form.
    fn render_prompt(script: &[String]) -> String {
        if script.is_empty() {
            return "Stay silent and listen until the agent finishes speaking, then hang up."
                .to_string();
        }
        let mut prompt = String::from(
            "You are the caller. Speak exactly these lines, one per agent turn, in order:\n",
        );
        for (i, line) in script.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", i + 1, line));
        }
        prompt.push_str("After the last line, end the call politely.");
        prompt
    }
}

#[async_trait]
impl VoiceClient for HammingVoiceClient {
    async fn place_call(&self, script: &[String], phone_number: &str) -> Result<String> {
        let url = format!("{}/rest/exercise/start-call", self.api_base);
        let payload = StartCallRequest {
            phone_number: phone_number.to_string(),
            prompt: Self::render_prompt(script),
            webhook_url: self.webhook_url.clone(),
        };

        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        if status != StatusCode::OK {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("failed to start call ({status}): {text}"));
        }

        let body: StartCallResponse = resp.json().await?;
        tracing::debug!(call_id = %body.id, "call placed");
        Ok(body.id)
    }

    async fn fetch_recording(&self, recording_url: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(recording_url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let status = resp.status();
        if status != StatusCode::OK {
            return Err(anyhow!("failed to fetch recording ({status})"));
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StartCallRequest {
    phone_number: String,
    prompt: String,
    webhook_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StartCallResponse {
    id: String,
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn render_prompt_numbers_script_lines() {
        let prompt = HammingVoiceClient::render_prompt(&[
            "I need a plumber".to_string(),
            "tomorrow morning".to_string(),
        ]);
        assert!(prompt.contains("1. I need a plumber"));
        assert!(prompt.contains("2. tomorrow morning"));
    }

    #[test]
    fn empty_script_listens_only() {
        let prompt = HammingVoiceClient::render_prompt(&[]);
        assert!(prompt.contains("Stay silent"));
    }

    #[tokio::test]
    async fn place_call_returns_call_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/exercise/start-call"))
            .and(body_partial_json(serde_json::json!({
                "phone_number": "+15551230000"
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "call-42"})),
            )
            .mount(&server)
            .await;

        let client = HammingVoiceClient::new("key", server.uri(), "https://example.test/webhook");
        let call_id = client
            .place_call(&["hello".to_string()], "+15551230000")
            .await
            .unwrap();
        assert_eq!(call_id, "call-42");
    }

    #[tokio::test]
    async fn place_call_surfaces_provider_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/exercise/start-call"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = HammingVoiceClient::new("key", server.uri(), "https://example.test/webhook");
        let err = client.place_call(&[], "+15551230000").await.unwrap_err();
        assert!(err.to_string().contains("500"), "{err}");
    }

    #[tokio::test]
    async fn fetch_recording_returns_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/media/call-42"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"RIFFdata".to_vec()))
            .mount(&server)
            .await;

        let client = HammingVoiceClient::new("key", server.uri(), "https://example.test/webhook");
        let bytes = client
            .fetch_recording(&format!("{}/media/call-42", server.uri()))
            .await
            .unwrap();
        assert_eq!(bytes, b"RIFFdata");
    }
}
