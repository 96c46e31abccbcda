use crate::traits::{ChatMessage, ChatResponse, Provider, Role, ToolCall, ToolSpec};
use crate::{ChatRequest, ProviderEvent};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com/v1";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    temperature: f64,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: &'static str,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage<'a> {
    role: &'a str,
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAIToolCallRequest<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct OpenAIToolCallRequest<'a> {
    id: &'a str,
    r#type: &'a str,
    function: OpenAIFunctionRequest<'a>,
}

#[derive(Debug, Serialize)]
struct OpenAIFunctionRequest<'a> {
    name: &'a str,
    arguments: &'a str,
}

#[derive(Debug, Serialize)]
struct OpenAITool<'a> {
    r#type: &'a str,
    function: OpenAIToolFunction<'a>,
}

#[derive(Debug, Serialize)]
struct OpenAIToolFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAIToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAIToolCall {
    id: String,
    function: OpenAIFunction,
}

#[derive(Debug, Deserialize)]
struct OpenAIFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    message: String,
}

/// Client for any endpoint speaking the OpenAI chat-completions protocol
/// (DeepSeek, OpenAI and compatible gateways).
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f64,
}

impl OpenAIProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_key: api_key.into(),
            model: "deepseek-chat".to_string(),
            base_url: DEEPSEEK_BASE_URL.to_string(),
            temperature: 1.0,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    fn convert_messages<'a>(messages: &'a [ChatMessage]) -> Vec<OpenAIMessage<'a>> {
        messages
            .iter()
            .map(|m| {
                let tool_calls = m.tool_calls.as_ref().map(|tool_calls| {
                    tool_calls
                        .iter()
                        .map(|tc| OpenAIToolCallRequest {
                            id: &tc.id,
                            r#type: "function",
                            function: OpenAIFunctionRequest {
                                name: &tc.name,
                                arguments: &tc.arguments,
                            },
                        })
                        .collect()
                });

                let content = if m.role == Role::Assistant
                    && tool_calls.is_some()
                    && m.content.is_empty()
                {
                    None
                } else {
                    Some(m.content.as_str())
                };

                OpenAIMessage {
                    role: m.role.as_str(),
                    content,
                    tool_calls,
                    tool_call_id: m.tool_call_id.as_deref(),
                }
            })
            .collect()
    }

    fn convert_tools(tools: &[ToolSpec]) -> Vec<OpenAITool<'_>> {
        tools
            .iter()
            .map(|t| OpenAITool {
                r#type: "function",
                function: OpenAIToolFunction {
                    name: &t.name,
                    description: &t.description,
                    parameters: &t.parameters_schema,
                },
            })
            .collect()
    }

    fn build_request<'a>(&'a self, request: &ChatRequest<'a>, stream: bool) -> OpenAIRequest<'a> {
        let tools = request.tools.map(Self::convert_tools);
        OpenAIRequest {
            model: &self.model,
            messages: Self::convert_messages(request.messages),
            tool_choice: tools.as_ref().map(|_| "auto"),
            tools,
            response_format: request
                .json_mode
                .then_some(ResponseFormat { r#type: "json_object" }),
            temperature: self.temperature,
            stream,
        }
    }

    async fn send(&self, body: &OpenAIRequest<'_>) -> anyhow::Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Chat completion API error {}: {}",
                status,
                error_text
            ));
        }

        Ok(response)
    }

    fn parse_sse_line(line: &str) -> Option<ProviderEvent> {
        let line = line.trim();
        let data = line.strip_prefix("data:")?.trim_start();

        if data == "[DONE]" {
            return Some(ProviderEvent::Done);
        }

        match serde_json::from_str::<StreamResponse>(data) {
            Ok(response) => {
                if let Some(error) = response.error {
                    return Some(ProviderEvent::Error(error.message));
                }
                response
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.delta.content)
                    .filter(|c| !c.is_empty())
                    .map(ProviderEvent::Token)
            }
            Err(e) => {
                tracing::debug!("Skipping unparseable stream chunk: {}", e);
                None
            }
        }
    }
}

/// Reassembles SSE lines from arbitrary network chunks. Bytes are kept
/// until a newline arrives, so a line or a multi-byte character split
/// across chunks is decoded whole.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<ProviderEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            events.extend(OpenAIProvider::parse_sse_line(&String::from_utf8_lossy(&line)));
        }
        events
    }

    /// Parses a final line the server did not terminate.
    fn finish(&mut self) -> Option<ProviderEvent> {
        let rest = std::mem::take(&mut self.buffer);
        OpenAIProvider::parse_sse_line(&String::from_utf8_lossy(&rest))
    }
}

/// Returns false once the stream should stop: the receiver is gone or the
/// event was terminal.
async fn forward(tx: &tokio::sync::mpsc::Sender<ProviderEvent>, event: ProviderEvent) -> bool {
    let terminal = !matches!(event, ProviderEvent::Token(_));
    tx.send(event).await.is_ok() && !terminal
}

#[async_trait]
impl Provider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn chat(&self, request: ChatRequest<'_>) -> anyhow::Result<ChatResponse> {
        let body = self.build_request(&request, false);
        tracing::debug!(
            model = %self.model,
            messages = request.messages.len(),
            json_mode = request.json_mode,
            "chat completion request"
        );

        let response: OpenAIResponse = self.send(&body).await?.json().await?;

        let message = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| anyhow::anyhow!("No choices in response"))?;

        let tool_calls: Vec<ToolCall> = message
            .tool_calls
            .map(|calls| {
                calls
                    .into_iter()
                    .map(|c| ToolCall {
                        id: c.id,
                        name: c.function.name,
                        arguments: c.function.arguments,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(ChatResponse {
            text: message.content,
            tool_calls,
        })
    }

    async fn chat_stream(
        &self,
        request: ChatRequest<'_>,
    ) -> anyhow::Result<BoxStream<'static, ProviderEvent>> {
        let body = self.build_request(&request, true);
        let response = self.send(&body).await?;

        let (tx, rx) = tokio::sync::mpsc::channel::<ProviderEvent>(256);

        tokio::spawn(async move {
            use futures_util::StreamExt as _;
            let mut stream = response.bytes_stream();
            let mut decoder = SseDecoder::default();

            loop {
                let chunk_result = tokio::select! {
                    _ = tx.closed() => return,
                    next = stream.next() => match next {
                        Some(result) => result,
                        None => break,
                    },
                };
                let chunk = match chunk_result {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx.send(ProviderEvent::Error(e.to_string())).await;
                        return;
                    }
                };

                for event in decoder.push(&chunk) {
                    if !forward(&tx, event).await {
                        return;
                    }
                }
            }

            if let Some(event) = decoder.finish()
                && !forward(&tx, event).await
            {
                return;
            }
            let _ = tx.send(ProviderEvent::Done).await;
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Tool;
    use futures_util::StreamExt;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn delta(content: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"content": content}}]})
        )
    }

    #[test]
    fn decoder_joins_lines_split_across_chunks() {
        let line = delta("你好");
        let bytes = line.as_bytes();
        // Split inside the first multi-byte character.
        let cut = line.find('你').unwrap() + 1;

        let mut decoder = SseDecoder::default();
        assert!(decoder.push(&bytes[..cut]).is_empty());
        assert_eq!(
            decoder.push(&bytes[cut..]),
            vec![ProviderEvent::Token("你好".to_string())]
        );
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn decoder_flushes_unterminated_last_line() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: [DO").is_empty());
        assert!(decoder.push(b"NE]").is_empty());
        assert_eq!(decoder.finish(), Some(ProviderEvent::Done));
    }

    #[tokio::test]
    async fn chat_stream_reads_tokens_over_http() {
        let server = MockServer::start().await;
        let body = format!(
            "{}{}{}",
            delta("Hel"),
            delta("lo, "),
            delta("world").trim_end()
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({"stream": true, "model": "deepseek-chat"})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OpenAIProvider::new("sk-test").with_base_url(server.uri());
        let messages = vec![ChatMessage::user("greet me")];
        let events: Vec<ProviderEvent> = provider
            .chat_stream(ChatRequest::new(&messages))
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(
            events,
            vec![
                ProviderEvent::Token("Hel".into()),
                ProviderEvent::Token("lo, ".into()),
                ProviderEvent::Token("world".into()),
                ProviderEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn chat_parses_tool_calls_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({
                "tool_choice": "auto",
                "tools": [{"type": "function", "function": {"name": "get_weather"}}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": {"name": "get_weather", "arguments": "{\"location\":\"Beijing\"}"}
                        }]
                    }
                }]
            })))
            .mount(&server)
            .await;

        let provider = OpenAIProvider::new("sk-test").with_base_url(server.uri());
        let messages = vec![ChatMessage::user("weather in Beijing?")];
        let tools = vec![crate::tools::WeatherTool.spec()];
        let response = provider
            .chat(ChatRequest::new(&messages).with_tools(&tools))
            .await
            .unwrap();

        assert_eq!(response.text, None);
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "get_weather");
        assert_eq!(response.tool_calls[0].arguments, r#"{"location":"Beijing"}"#);
    }

    #[tokio::test]
    async fn error_status_fails_the_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let provider = OpenAIProvider::new("sk-test").with_base_url(server.uri());
        let messages = vec![ChatMessage::user("hi")];
        let err = provider
            .chat(ChatRequest::new(&messages))
            .await
            .unwrap_err()
            .to_string();
        assert!(err.contains("429"));
        assert!(err.contains("slow down"));
    }

    #[test]
    fn parses_content_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#;
        assert_eq!(
            OpenAIProvider::parse_sse_line(line),
            Some(ProviderEvent::Token("Hel".to_string()))
        );
    }

    #[test]
    fn parses_done_marker() {
        assert_eq!(
            OpenAIProvider::parse_sse_line("data: [DONE]\n"),
            Some(ProviderEvent::Done)
        );
    }

    #[test]
    fn skips_role_only_and_blank_lines() {
        let line = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(OpenAIProvider::parse_sse_line(line), None);
        assert_eq!(OpenAIProvider::parse_sse_line(""), None);
        assert_eq!(OpenAIProvider::parse_sse_line(": keep-alive"), None);
    }

    #[test]
    fn surfaces_stream_errors() {
        let line = r#"data: {"error":{"message":"rate limited"}}"#;
        assert_eq!(
            OpenAIProvider::parse_sse_line(line),
            Some(ProviderEvent::Error("rate limited".to_string()))
        );
    }

    #[test]
    fn request_carries_tools_and_json_mode() {
        let provider = OpenAIProvider::new("sk").with_model("deepseek-chat");
        let messages = vec![
            ChatMessage::system("sys"),
            ChatMessage::assistant_with_tool_calls(
                "",
                vec![ToolCall {
                    id: "call_1".into(),
                    name: "get_weather".into(),
                    arguments: "{}".into(),
                }],
            ),
            ChatMessage::tool_result("call_1", "get_weather", "sunny"),
        ];
        let tools = vec![ToolSpec {
            name: "get_weather".into(),
            description: "weather".into(),
            parameters_schema: serde_json::json!({"type": "object", "properties": {}}),
        }];

        let request = ChatRequest::new(&messages).with_tools(&tools);
        let body = serde_json::to_value(provider.build_request(&request, false)).unwrap();
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["tools"][0]["function"]["name"], "get_weather");
        assert!(body["messages"][1]["content"].is_null());
        assert_eq!(body["messages"][2]["tool_call_id"], "call_1");
        assert!(body.get("response_format").is_none());

        let json_request = ChatRequest::new(&messages).json();
        let body = serde_json::to_value(provider.build_request(&json_request, true)).unwrap();
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["stream"], true);
        assert!(body.get("tools").is_none());
    }
}
