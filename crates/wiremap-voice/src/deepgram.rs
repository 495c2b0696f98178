use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use wiremap_schema::{Speaker, TranscriptTurn};

use crate::Transcriber;

const DEFAULT_API_BASE: &str = "https://api.deepgram.com";

/// Deepgram pre-recorded transcription with diarization and utterance splits.
#[derive(Debug, Clone)]
pub struct DeepgramTranscriber {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
}

impl DeepgramTranscriber {
    pub fn new(api_key: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("DEEPGRAM_API_KEY")
            .map_err(|_| anyhow!("DEEPGRAM_API_KEY is not set"))?;
        Ok(Self::new(api_key, DEFAULT_API_BASE))
    }

    /// Map a diarized speaker index to a role. The agent answers the call, so
    /// the first index heard is the agent.
    fn map_turns(body: ListenResponse) -> Vec<TranscriptTurn> {
        let utterances = body.results.utterances.unwrap_or_default();
        let agent_index = utterances.iter().find_map(|u| u.speaker);

        utterances
            .into_iter()
            .filter(|u| !u.transcript.trim().is_empty())
            .map(|u| {
                let speaker = match (u.speaker, agent_index) {
                    (Some(idx), Some(agent)) => Some(if idx == agent {
                        Speaker::Agent
                    } else {
                        Speaker::User
                    }),
                    _ => None,
                };
                TranscriptTurn::new(speaker, u.transcript.trim(), u.start, u.end)
            })
            .collect()
    }
}

#[async_trait]
impl Transcriber for DeepgramTranscriber {
    async fn transcribe(&self, audio: &[u8], format: &str) -> Result<Vec<TranscriptTurn>> {
        let url = format!(
            "{}/v1/listen?diarize=true&utterances=true&punctuate=true",
            self.api_base
        );
        let resp = self
            .client
            .post(url)
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", format!("audio/{format}"))
            .body(audio.to_vec())
            .send()
            .await?;

        let status = resp.status();
        if status != StatusCode::OK {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("transcription failed ({status}): {text}"));
        }

        let body: ListenResponse = resp.json().await?;
        Ok(Self::map_turns(body))
    }
}

#[derive(Debug, Deserialize)]
struct ListenResponse {
    results: ListenResults,
}

#[derive(Debug, Deserialize)]
struct ListenResults {
    #[serde(default)]
    utterances: Option<Vec<Utterance>>,
}

#[derive(Debug, Deserialize)]
struct Utterance {
    start: f64,
    end: f64,
    transcript: String,
    #[serde(default)]
    speaker: Option<u32>,
}
