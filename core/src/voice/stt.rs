use super::{VoiceError, check_status};
use crate::config::SttConfig;
use std::path::Path;

const DEFAULT_FILE_NAME: &str = "audio.wav";

#[derive(serde::Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// OpenAI Whisper transcription client.
#[derive(Clone)]
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl SpeechToText {
    /// # Errors
    ///
    /// Returns [`VoiceError::Config`] if the API key is empty.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, VoiceError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(VoiceError::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: model.into(),
            base_url: SttConfig::default().base_url,
        })
    }

    pub fn from_config(config: &SttConfig) -> Result<Self, VoiceError> {
        Ok(Self::new(config.api_key.clone(), config.model.clone())?.with_base_url(&config.base_url))
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/audio/transcriptions", self.base_url)
    }

    pub async fn transcribe(&self, audio: &[u8]) -> Result<String, VoiceError> {
        self.transcribe_named(audio, DEFAULT_FILE_NAME).await
    }

    /// Reads an audio file and transcribes it, keeping its file name so the
    /// service can infer the container format.
    pub async fn transcribe_file(&self, path: &Path) -> Result<String, VoiceError> {
        let audio = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(DEFAULT_FILE_NAME)
            .to_string();
        self.transcribe_named(&audio, &file_name).await
    }

    /// Transcribes audio uploaded under `file_name`; the extension tells the
    /// service which container format to expect.
    pub async fn transcribe_named(
        &self,
        audio: &[u8],
        file_name: &str,
    ) -> Result<String, VoiceError> {
        if audio.is_empty() {
            return Err(VoiceError::Config("no audio to transcribe".to_string()));
        }
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.to_vec()).file_name(file_name.to_string()),
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;
        let response = check_status("Whisper", response).await?;

        let result: TranscriptionResponse = response.json().await?;
        tracing::info!(chars = result.text.len(), "transcription complete");
        Ok(result.text)
    }
}
