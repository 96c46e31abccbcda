//! HTTP surface: health, streamed chat, transcription and synthesis.

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{FromRequest, Multipart, Request, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures_util::StreamExt;
use jarvis_core::{AgentLoop, SpeechToText, TextToSpeech};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

const DEFAULT_SESSION_ID: &str = "default_session";

pub struct AppState {
    pub agent: Arc<AgentLoop>,
    pub stt: Option<SpeechToText>,
    pub tts: Option<TextToSpeech>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/chat", post(chat))
        .route("/transcribe", post(transcribe))
        .route("/synthesize", post(synthesize))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: Arc<AppState>, host: &str, port: u16) -> Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Jarvis API listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutting down");
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    message: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        message: "Welcome to Jarvis API!",
    })
}

fn default_session_id() -> String {
    DEFAULT_SESSION_ID.to_string()
}

#[derive(Debug, Deserialize)]
struct ChatBody {
    message: String,
    #[serde(default = "default_session_id")]
    session_id: String,
}

/// Streams reply fragments as they are produced. A turn that fails before
/// its first fragment becomes a 500; a later failure aborts the body.
async fn chat(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatBody>,
) -> Result<Response, ApiError> {
    if body.message.trim().is_empty() {
        return Err(ApiError::BadRequest("Empty message"));
    }

    let mut fragments = state.agent.respond(&body.session_id, &body.message);
    let first = match fragments.next().await {
        Some(Ok(fragment)) => Some(fragment),
        Some(Err(e)) => return Err(ApiError::Failed("chat_failed", format!("{:#}", e))),
        None => None,
    };

    let session_id = body.session_id;
    let rest = fragments.map(move |item| {
        item.map_err(|e| {
            tracing::error!("Chat stream for session {} failed: {:#}", session_id, e);
            std::io::Error::other(format!("{:#}", e))
        })
    });
    let stream = futures_util::stream::iter(first.map(Ok)).chain(rest);

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/event-stream; charset=utf-8")],
        Body::from_stream(stream),
    )
        .into_response())
}

#[derive(Debug, Serialize)]
struct TranscribeResponse {
    transcription: String,
}

/// Accepts a multipart upload with a `file` field, or the raw audio as the
/// request body.
async fn transcribe(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<TranscribeResponse>, ApiError> {
    let stt = state
        .stt
        .as_ref()
        .ok_or(ApiError::NotConfigured("Speech-to-text is not configured"))?;

    let (audio, file_name) = read_audio(request).await?;
    if audio.is_empty() {
        return Err(ApiError::BadRequest("Empty audio data"));
    }

    let transcription = match file_name {
        Some(name) => stt.transcribe_named(&audio, &name).await,
        None => stt.transcribe(&audio).await,
    }
    .map_err(|e| ApiError::Failed("transcription_failed", e.to_string()))?;

    Ok(Json(TranscribeResponse { transcription }))
}

async fn read_audio(request: Request) -> Result<(Bytes, Option<String>), ApiError> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));

    if !is_multipart {
        let body = Bytes::from_request(request, &())
            .await
            .map_err(|_| ApiError::BadRequest("Unreadable audio body"))?;
        return Ok((body, None));
    }

    let mut form = Multipart::from_request(request, &())
        .await
        .map_err(|_| ApiError::BadRequest("Malformed multipart body"))?;
    while let Some(field) = form
        .next_field()
        .await
        .map_err(|_| ApiError::BadRequest("Malformed multipart body"))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let audio = field
            .bytes()
            .await
            .map_err(|_| ApiError::BadRequest("Malformed multipart body"))?;
        return Ok((audio, file_name));
    }
    Err(ApiError::BadRequest("Missing 'file' field"))
}

#[derive(Debug, Deserialize)]
struct SynthesizeBody {
    text: String,
}

async fn synthesize(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SynthesizeBody>,
) -> Result<Response, ApiError> {
    let tts = state
        .tts
        .as_ref()
        .ok_or(ApiError::NotConfigured("Text-to-speech is not configured"))?;

    if body.text.trim().is_empty() {
        return Err(ApiError::BadRequest("Empty text"));
    }

    let audio = tts
        .synthesize(&body.text)
        .await
        .map_err(|e| ApiError::Failed("synthesis_failed", e.to_string()))?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "audio/mpeg")],
        audio,
    )
        .into_response())
}

#[derive(Debug)]
pub enum ApiError {
    NotConfigured(&'static str),
    BadRequest(&'static str),
    Failed(&'static str, String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code, message) = match self {
            Self::NotConfigured(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "not_configured",
                msg.to_string(),
            ),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.to_string()),
            Self::Failed(code, msg) => (StatusCode::INTERNAL_SERVER_ERROR, code, msg),
        };

        (
            status,
            Json(ErrorResponse {
                error: ErrorBody { code, message },
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::http::Request;
    use futures_util::stream::BoxStream;
    use jarvis_core::{
        ChatRequest, ChatResponse, InMemorySessionStore, Provider, ProviderEvent, SessionStore,
        default_registry,
    };
    use tower::ServiceExt;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Answers every question with the same streamed tokens.
    struct CannedProvider {
        tokens: Vec<&'static str>,
        fail: bool,
    }

    #[async_trait]
    impl Provider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }

        async fn chat(&self, _request: ChatRequest<'_>) -> anyhow::Result<ChatResponse> {
            if self.fail {
                anyhow::bail!("upstream unavailable");
            }
            Ok(ChatResponse::text(self.tokens.concat()))
        }

        async fn chat_stream(
            &self,
            _request: ChatRequest<'_>,
        ) -> anyhow::Result<BoxStream<'static, ProviderEvent>> {
            let mut events: Vec<ProviderEvent> = self
                .tokens
                .iter()
                .map(|t| ProviderEvent::Token(t.to_string()))
                .collect();
            events.push(ProviderEvent::Done);
            Ok(futures_util::stream::iter(events).boxed())
        }
    }

    fn state_with(provider: CannedProvider) -> Arc<AppState> {
        let agent = AgentLoop::new(
            Arc::new(provider),
            Arc::new(default_registry().unwrap()),
            Arc::new(InMemorySessionStore::new()),
        );
        Arc::new(AppState {
            agent: Arc::new(agent),
            stt: None,
            tts: None,
        })
    }

    fn greeting_state() -> Arc<AppState> {
        state_with(CannedProvider {
            tokens: vec!["Hel", "lo, ", "world"],
            fail: false,
        })
    }

    fn json_post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_bytes(response: Response) -> Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let response = router(greeting_state())
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn chat_streams_reply_into_default_session() {
        let state = greeting_state();
        let response = router(state.clone())
            .oneshot(json_post("/chat", serde_json::json!({"message": "hi"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/event-stream")
        );
        assert_eq!(&body_bytes(response).await[..], b"Hello, world");

        let transcript = state.agent.sessions().snapshot(DEFAULT_SESSION_ID);
        assert_eq!(transcript.last().unwrap().content, "Hello, world");
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let state = greeting_state();
        for session in ["alice", "bob"] {
            let response = router(state.clone())
                .oneshot(json_post(
                    "/chat",
                    serde_json::json!({"message": "hi", "session_id": session}),
                ))
                .await
                .unwrap();
            body_bytes(response).await;
        }

        let sessions = state.agent.sessions();
        assert_eq!(sessions.session_count(), 2);
        assert_eq!(sessions.snapshot("alice").len(), 3);
        assert_eq!(sessions.snapshot("bob").len(), 3);
    }

    #[tokio::test]
    async fn failed_turn_is_a_server_error() {
        let state = state_with(CannedProvider {
            tokens: vec![],
            fail: true,
        });
        let response = router(state)
            .oneshot(json_post("/chat", serde_json::json!({"message": "hi"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "chat_failed");
        assert!(
            body["error"]["message"]
                .as_str()
                .unwrap()
                .contains("upstream unavailable")
        );
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let response = router(greeting_state())
            .oneshot(json_post("/chat", serde_json::json!({"message": "  "})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn voice_routes_without_credentials_are_unavailable() {
        let response = router(greeting_state())
            .oneshot(
                Request::post("/transcribe")
                    .body(Body::from(vec![0u8; 16]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["error"]["code"], "not_configured");

        let response = router(greeting_state())
            .oneshot(json_post("/synthesize", serde_json::json!({"text": "hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn blank_synthesis_text_is_rejected() {
        let state = greeting_state();
        let state = Arc::new(AppState {
            agent: state.agent.clone(),
            stt: None,
            tts: Some(TextToSpeech::new("key", "voice", "eleven_multilingual_v2").unwrap()),
        });

        let response = router(state)
            .oneshot(json_post("/synthesize", serde_json::json!({"text": ""})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn empty_audio_is_rejected() {
        let state = greeting_state();
        let state = Arc::new(AppState {
            agent: state.agent.clone(),
            stt: Some(SpeechToText::new("sk-test", "whisper-1").unwrap()),
            tts: None,
        });

        let response = router(state)
            .oneshot(Request::post("/transcribe").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    const BOUNDARY: &str = "jarvis-form-boundary";

    fn multipart_post(field: &str, file_name: &str, audio: &str) -> Request<Body> {
        let body = format!(
            "--{b}\r\n\
             Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n\
             Content-Type: audio/webm\r\n\r\n\
             {audio}\r\n\
             --{b}--\r\n",
            b = BOUNDARY,
        );
        Request::post("/transcribe")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn whisper_state(server: &MockServer) -> Arc<AppState> {
        let state = greeting_state();
        Arc::new(AppState {
            agent: state.agent.clone(),
            stt: Some(
                SpeechToText::new("sk-test", "whisper-1")
                    .unwrap()
                    .with_base_url(&server.uri()),
            ),
            tts: None,
        })
    }

    #[tokio::test]
    async fn multipart_upload_is_transcribed_under_its_name() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .and(body_string_contains("filename=\"note.webm\""))
            .and(body_string_contains("WEBMDATA"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"text": "what time is it"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let response = router(whisper_state(&server).await)
            .oneshot(multipart_post("file", "note.webm", "WEBMDATA"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"transcription": "what time is it"})
        );
    }

    #[tokio::test]
    async fn raw_body_upload_is_still_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .and(body_string_contains("RAWAUDIO"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"text": "hi"})))
            .expect(1)
            .mount(&server)
            .await;

        let response = router(whisper_state(&server).await)
            .oneshot(
                Request::post("/transcribe")
                    .header(header::CONTENT_TYPE, "application/octet-stream")
                    .body(Body::from("RAWAUDIO"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["transcription"], "hi");
    }

    #[tokio::test]
    async fn multipart_without_file_field_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"text": ""})))
            .expect(0)
            .mount(&server)
            .await;

        let response = router(whisper_state(&server).await)
            .oneshot(multipart_post("audio", "note.webm", "WEBMDATA"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], "bad_request");
    }
}
