//! Speech collaborators: Whisper transcription and ElevenLabs synthesis.

pub mod stt;
pub mod tts;

pub use stt::SpeechToText;
pub use tts::{SentenceBuffer, TextToSpeech};

#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    #[error("voice configuration error: {0}")]
    Config(String),

    #[error("voice request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{service} returned {status}: {body}")]
    Provider {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("failed to read audio: {0}")]
    Io(#[from] std::io::Error),
}

pub(crate) async fn check_status(
    service: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, VoiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::error!(status = %status, body = %body, "{} API error", service);
    Err(VoiceError::Provider {
        service,
        status: status.as_u16(),
        body,
    })
}
