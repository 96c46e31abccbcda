use crate::agent::{ContextBuilder, SessionStore, ToolRegistry};
use crate::traits::{ChatMessage, ChatRequest, ChatResponse, MemoryStore, Provider, ProviderEvent, ToolCall};
use anyhow::{Context, Result};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, warn};

pub const MAX_TURNS_NOTICE: &str =
    "Max tool call turns reached. Please try rephrasing your request.";

const DEFAULT_MAX_TURNS: usize = 5;
const DEFAULT_MEMORY_TOP_K: usize = 3;
const RESPONSE_CHANNEL_CAPACITY: usize = 64;

/// Fragments of one reply, in generation order. An `Err` item ends the turn.
pub type ResponseStream = BoxStream<'static, Result<String>>;

struct FragmentSink {
    tx: mpsc::Sender<Result<String>>,
}

impl FragmentSink {
    async fn send(&self, fragment: impl Into<String>) -> Result<()> {
        self.tx
            .send(Ok(fragment.into()))
            .await
            .map_err(|_| anyhow::anyhow!("response stream closed by caller"))
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    tool_registry: Arc<ToolRegistry>,
    sessions: Arc<dyn SessionStore>,
    memory: Option<Arc<dyn MemoryStore>>,
    context_builder: ContextBuilder,
    max_turns: usize,
    memory_top_k: usize,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        tool_registry: Arc<ToolRegistry>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            provider,
            tool_registry,
            sessions,
            memory: None,
            context_builder: ContextBuilder::new(),
            max_turns: DEFAULT_MAX_TURNS,
            memory_top_k: DEFAULT_MEMORY_TOP_K,
        }
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_context_builder(mut self, context_builder: ContextBuilder) -> Self {
        self.context_builder = context_builder;
        self
    }

    pub fn with_max_turns(mut self, max: usize) -> Self {
        self.max_turns = max.max(1);
        self
    }

    pub fn with_memory_top_k(mut self, top_k: usize) -> Self {
        self.memory_top_k = top_k;
        self
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    /// Runs one turn for `session_id` on the runtime and streams the reply.
    /// Dropping the stream cancels the turn at its next fragment, together
    /// with any in-flight completion stream.
    pub fn respond(self: &Arc<Self>, session_id: &str, user_text: &str) -> ResponseStream {
        let (tx, rx) = mpsc::channel(RESPONSE_CHANNEL_CAPACITY);
        let agent = Arc::clone(self);
        let session_id = session_id.to_string();
        let user_text = user_text.to_string();

        tokio::spawn(async move {
            let sink = FragmentSink { tx };
            if let Err(e) = agent.run_turn(&session_id, &user_text, &sink).await {
                if sink.is_closed() {
                    debug!("Turn for session {} cancelled: {}", session_id, e);
                } else {
                    error!("Turn for session {} failed: {:#}", session_id, e);
                    let _ = sink.tx.send(Err(e)).await;
                }
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }

    /// Runs one turn and returns the concatenated reply.
    pub async fn process(self: &Arc<Self>, session_id: &str, user_text: &str) -> Result<String> {
        let mut stream = self.respond(session_id, user_text);
        let mut reply = String::new();
        while let Some(fragment) = stream.next().await {
            reply.push_str(&fragment?);
        }
        Ok(reply)
    }

    async fn run_turn(&self, session_id: &str, user_text: &str, sink: &FragmentSink) -> Result<()> {
        let turn_lock = self.sessions.turn_lock(session_id);
        let _turn = tokio::select! {
            guard = turn_lock.lock_owned() => guard,
            _ = sink.tx.closed() => anyhow::bail!("response stream closed while waiting for the session"),
        };

        self.sessions
            .get_or_create(session_id, &self.context_builder.build_system_prompt());

        let background = match &self.memory {
            Some(memory) => memory.retrieve_context(user_text, self.memory_top_k).await,
            None => String::new(),
        };
        self.sessions.append(
            session_id,
            vec![ChatMessage::user(
                self.context_builder.user_message(&background, user_text),
            )],
        );

        let tools = self.tool_registry.list_tools();

        for turn in 1..=self.max_turns {
            let messages = self.sessions.snapshot(session_id);
            let response = self
                .provider
                .chat(ChatRequest::new(&messages).with_tools(&tools))
                .await
                .context("chat completion failed")?;

            if response.has_tool_calls() {
                debug!(turn, calls = response.tool_calls.len(), "model requested tools");
                self.dispatch_tools(session_id, response, sink).await?;
                continue;
            }

            let reply = self.stream_answer(&messages, sink).await?;
            if !reply.is_empty() {
                self.sessions
                    .append(session_id, vec![ChatMessage::assistant(reply.clone())]);
                self.remember(user_text, &reply);
            }
            return Ok(());
        }

        warn!(
            "Session {} exhausted {} turns without a final answer",
            session_id, self.max_turns
        );
        sink.send(MAX_TURNS_NOTICE).await
    }

    async fn dispatch_tools(
        &self,
        session_id: &str,
        response: ChatResponse,
        sink: &FragmentSink,
    ) -> Result<()> {
        let calls = response.tool_calls;
        self.sessions.append(
            session_id,
            vec![ChatMessage::assistant_with_tool_calls(
                response.text.unwrap_or_default(),
                calls.clone(),
            )],
        );

        for call in calls {
            if let Some(notice) = tool_notice(&call) {
                sink.send(notice).await?;
            }

            let result = self
                .tool_registry
                .invoke(&call.name, &call.arguments)
                .await;
            let content = if result.success {
                result.output
            } else {
                let error = result.error.unwrap_or_default();
                debug!("{}", error);
                error
            };

            self.sessions.append(
                session_id,
                vec![ChatMessage::tool_result(call.id, call.name, content)],
            );
        }

        Ok(())
    }

    async fn stream_answer(&self, messages: &[ChatMessage], sink: &FragmentSink) -> Result<String> {
        let mut stream = self
            .provider
            .chat_stream(ChatRequest::new(messages))
            .await
            .context("chat completion stream failed")?;

        let mut reply = String::new();
        while let Some(event) = stream.next().await {
            match event {
                ProviderEvent::Token(token) => {
                    reply.push_str(&token);
                    sink.send(token).await?;
                }
                ProviderEvent::Error(message) => {
                    anyhow::bail!("chat completion stream failed: {}", message)
                }
                ProviderEvent::Done => break,
            }
        }

        Ok(reply)
    }

    fn remember(&self, user_text: &str, reply: &str) {
        let Some(memory) = self.memory.clone() else {
            return;
        };
        let summary = self.context_builder.memory_summary(user_text, reply);

        drop(tokio::spawn(async move {
            let stored = memory.extract_and_store(&summary).await;
            debug!(stored, "memory updated after turn");
        }));
    }
}

/// Announces a call whose arguments parse. Malformed arguments get no
/// notice; the registry reports them back to the model instead.
fn tool_notice(call: &ToolCall) -> Option<String> {
    let args = if call.arguments.trim().is_empty() {
        serde_json::json!({})
    } else {
        serde_json::from_str::<serde_json::Value>(&call.arguments).ok()?
    };
    Some(format!(
        "\n[Jarvis is using tool: {}({})]...\n",
        call.name, args
    ))
}
