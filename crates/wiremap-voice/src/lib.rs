pub mod deepgram;
pub mod hamming;
pub mod roles;

pub use deepgram::DeepgramTranscriber;
pub use hamming::HammingVoiceClient;
pub use roles::assign_roles;

use anyhow::Result;
use async_trait::async_trait;
use wiremap_schema::TranscriptTurn;

/// Capability contract for the telephony provider. Calls complete
/// asynchronously via the webhook endpoint.
#[async_trait]
pub trait VoiceClient: Send + Sync {
    /// Place an outbound call speaking `script` lines in order. Returns the
    /// provider's call id.
    async fn place_call(&self, script: &[String], phone_number: &str) -> Result<String>;

    /// Download the recording referenced by a webhook payload.
    async fn fetch_recording(&self, recording_url: &str) -> Result<Vec<u8>>;
}

/// Capability contract for speech-to-text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &[u8], format: &str) -> Result<Vec<TranscriptTurn>>;
}
