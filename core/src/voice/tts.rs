use super::{VoiceError, check_status};
use crate::config::TtsConfig;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io/v1";
const AUDIO_CHANNEL_CAPACITY: usize = 32;

#[derive(serde::Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    model_id: &'a str,
}

/// ElevenLabs speech synthesis client. Audio is MP3.
#[derive(Clone)]
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: String,
    voice_id: String,
    model: String,
    base_url: String,
}

impl TextToSpeech {
    /// # Errors
    ///
    /// Returns [`VoiceError::Config`] if the API key or voice id is empty.
    pub fn new(
        api_key: impl Into<String>,
        voice_id: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, VoiceError> {
        let api_key = api_key.into();
        let voice_id = voice_id.into();
        if api_key.trim().is_empty() {
            return Err(VoiceError::Config(
                "ElevenLabs API key required for TTS".to_string(),
            ));
        }
        if voice_id.trim().is_empty() {
            return Err(VoiceError::Config("ElevenLabs voice id required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice_id,
            model: model.into(),
            base_url: ELEVENLABS_BASE_URL.to_string(),
        })
    }

    pub fn from_config(config: &TtsConfig) -> Result<Self, VoiceError> {
        Self::new(
            config.api_key.clone(),
            config.voice_id.clone(),
            config.model.clone(),
        )
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self, streaming: bool) -> String {
        let suffix = if streaming { "/stream" } else { "" };
        format!(
            "{}/text-to-speech/{}{}",
            self.base_url, self.voice_id, suffix
        )
    }

    async fn post(&self, text: &str, streaming: bool) -> Result<reqwest::Response, VoiceError> {
        let response = self
            .client
            .post(self.endpoint(streaming))
            .header("xi-api-key", &self.api_key)
            .header("Accept", "audio/mpeg")
            .json(&SynthesisRequest {
                text,
                model_id: &self.model,
            })
            .send()
            .await?;
        check_status("ElevenLabs", response).await
    }

    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>, VoiceError> {
        if text.trim().is_empty() {
            return Err(VoiceError::Config("no text to synthesize".to_string()));
        }
        tracing::debug!(chars = text.len(), "starting ElevenLabs synthesis");

        let audio = self.post(text, false).await?.bytes().await?;
        Ok(audio.to_vec())
    }

    /// Speaks streamed text as it arrives. Fragments are grouped into
    /// sentences and each sentence's audio is forwarded chunk by chunk.
    /// The stream ends after the first error.
    pub fn synthesize_stream(
        &self,
        mut text: BoxStream<'static, String>,
    ) -> BoxStream<'static, Result<Bytes, VoiceError>> {
        let (tx, rx) = mpsc::channel(AUDIO_CHANNEL_CAPACITY);
        let tts = self.clone();

        tokio::spawn(async move {
            let mut sentences = SentenceBuffer::new();
            while let Some(fragment) = text.next().await {
                for sentence in sentences.push(&fragment) {
                    if !tts.speak_sentence(&sentence, &tx).await {
                        return;
                    }
                }
            }
            if let Some(rest) = sentences.finish() {
                tts.speak_sentence(&rest, &tx).await;
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }

    /// Returns false once the receiver is gone or an error was delivered.
    async fn speak_sentence(
        &self,
        sentence: &str,
        tx: &mpsc::Sender<Result<Bytes, VoiceError>>,
    ) -> bool {
        let response = match self.post(sentence, true).await {
            Ok(response) => response,
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return false;
            }
        };

        let mut audio = response.bytes_stream();
        while let Some(chunk) = audio.next().await {
            let failed = chunk.is_err();
            if tx.send(chunk.map_err(VoiceError::from)).await.is_err() || failed {
                return false;
            }
        }
        true
    }
}

/// Accumulates streamed text and releases complete sentences.
///
/// A sentence ends at a newline, at a CJK full stop, exclamation or question
/// mark, or at `.`, `!` or `?` followed by whitespace. A terminator at the
/// very end of the buffer waits for the next fragment, so `25.5` stays whole.
#[derive(Debug, Default)]
pub struct SentenceBuffer {
    pending: String,
}

impl SentenceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: &str) -> Vec<String> {
        self.pending.push_str(fragment);

        let mut sentences = Vec::new();
        while let Some(end) = sentence_end(&self.pending) {
            let rest = self.pending.split_off(end);
            let sentence = std::mem::replace(&mut self.pending, rest);
            let sentence = sentence.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
        }
        sentences
    }

    /// Flushes whatever is left once the text stream ends.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }
}

fn sentence_end(text: &str) -> Option<usize> {
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let end = i + c.len_utf8();
        match c {
            '\n' | '。' | '！' | '？' => return Some(end),
            '.' | '!' | '?' => {
                if chars.peek().is_some_and(|(_, next)| next.is_whitespace()) {
                    return Some(end);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn text_stream(fragments: &[&str]) -> BoxStream<'static, String> {
        let owned: Vec<String> = fragments.iter().map(|f| f.to_string()).collect();
        futures_util::stream::iter(owned).boxed()
    }

    fn tts_for(server: &MockServer) -> TextToSpeech {
        TextToSpeech::new("xi-test", "voice", "eleven_multilingual_v2")
            .unwrap()
            .with_base_url(&format!("{}/v1", server.uri()))
    }

    #[tokio::test]
    async fn streamed_reply_is_spoken_sentence_by_sentence() {
        let server = MockServer::start().await;
        for sentence in ["It is 25°C in Beijing.", "Enjoy the sun!"] {
            Mock::given(method("POST"))
                .and(path("/v1/text-to-speech/voice/stream"))
                .and(header("xi-api-key", "xi-test"))
                .and(body_partial_json(serde_json::json!({
                    "text": sentence,
                    "model_id": "eleven_multilingual_v2"
                })))
                .respond_with(
                    ResponseTemplate::new(200).set_body_raw(format!("<{}>", sentence), "audio/mpeg"),
                )
                .expect(1)
                .mount(&server)
                .await;
        }

        let tts = tts_for(&server);
        let chunks: Vec<Bytes> = tts
            .synthesize_stream(text_stream(&["It is 25", ".5", "°C in Beijing. Enjoy", " the sun!"]))
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;
        let audio: Vec<u8> = chunks.concat();
        assert_eq!(
            String::from_utf8(audio).unwrap(),
            "<It is 25.5°C in Beijing.><Enjoy the sun!>"
        );
    }

    #[tokio::test]
    async fn failed_sentence_ends_the_audio_stream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(1)
            .mount(&server)
            .await;

        let tts = tts_for(&server);
        let items: Vec<_> = tts
            .synthesize_stream(text_stream(&["One. Two. Three."]))
            .collect()
            .await;
        assert_eq!(items.len(), 1);
        assert!(matches!(
            items[0],
            Err(VoiceError::Provider { status: 401, .. })
        ));
    }

    #[tokio::test]
    async fn synthesize_returns_whole_clip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/text-to-speech/voice"))
            .and(header("xi-api-key", "xi-test"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ID3audio".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let audio = tts_for(&server).synthesize("Hello.").await.unwrap();
        assert_eq!(audio, b"ID3audio");
    }

    #[test]
    fn sentences_are_released_when_complete() {
        let mut buffer = SentenceBuffer::new();
        assert!(buffer.push("It is 25").is_empty());
        assert!(buffer.push(".5°C in Beijing.").is_empty());
        assert_eq!(buffer.push(" Enjoy"), vec!["It is 25.5°C in Beijing."]);
        assert_eq!(buffer.push("! Bye"), vec!["Enjoy!"]);
        assert_eq!(buffer.finish().as_deref(), Some("Bye"));
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn cjk_and_newlines_split_immediately() {
        let mut buffer = SentenceBuffer::new();
        assert_eq!(
            buffer.push("北京今天晴。上海多云！\nok"),
            vec!["北京今天晴。", "上海多云！"]
        );
        assert_eq!(buffer.finish().as_deref(), Some("ok"));
    }

    #[test]
    fn whitespace_only_output_is_dropped() {
        let mut buffer = SentenceBuffer::new();
        assert!(buffer.push("\n\n   \n").is_empty());
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn empty_key_or_voice_is_a_config_error() {
        assert!(matches!(
            TextToSpeech::new("", "voice", "eleven_multilingual_v2"),
            Err(VoiceError::Config(_))
        ));
        assert!(matches!(
            TextToSpeech::new("key", " ", "eleven_multilingual_v2"),
            Err(VoiceError::Config(_))
        ));
    }

    #[test]
    fn endpoints_include_voice_id() {
        let tts = TextToSpeech::from_config(&TtsConfig {
            api_key: "key".into(),
            ..TtsConfig::default()
        })
        .unwrap()
        .with_base_url("http://localhost:1234/v1/");
        assert_eq!(
            tts.endpoint(false),
            "http://localhost:1234/v1/text-to-speech/21m00Tcm4TlvDq8ikWAM"
        );
        assert!(tts.endpoint(true).ends_with("/stream"));
    }

    #[tokio::test]
    async fn blank_text_is_rejected() {
        let tts = TextToSpeech::new("key", "voice", "m").unwrap();
        assert!(matches!(
            tts.synthesize("  ").await,
            Err(VoiceError::Config(_))
        ));
    }

    #[tokio::test]
    async fn empty_text_stream_yields_no_audio() {
        let tts = TextToSpeech::new("key", "voice", "m").unwrap();
        let text = futures_util::stream::empty::<String>().boxed();
        let chunks: Vec<_> = tts.synthesize_stream(text).collect().await;
        assert!(chunks.is_empty());
    }
}
