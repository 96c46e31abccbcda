//! Scripted collaborators shared by the unit tests.

use crate::traits::{
    ChatMessage, ChatRequest, ChatResponse, MemoryStore, Provider, ProviderEvent, ToolCall,
};
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

#[derive(Default)]
pub(crate) struct ScriptedProvider {
    replies: Mutex<VecDeque<anyhow::Result<ChatResponse>>>,
    fallback: Option<ChatResponse>,
    streams: Mutex<VecDeque<Vec<ProviderEvent>>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
    chat_calls: AtomicUsize,
    stream_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reply(self, response: ChatResponse) -> Self {
        self.replies.lock().unwrap().push_back(Ok(response));
        self
    }

    pub(crate) fn reply_json(self, json: &str) -> Self {
        self.reply(ChatResponse::text(json))
    }

    pub(crate) fn fail(self, message: &str) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(Err(anyhow::anyhow!(message.to_string())));
        self
    }

    pub(crate) fn always(mut self, response: ChatResponse) -> Self {
        self.fallback = Some(response);
        self
    }

    pub(crate) fn stream(self, tokens: &[&str]) -> Self {
        let mut events: Vec<ProviderEvent> = tokens
            .iter()
            .map(|t| ProviderEvent::Token(t.to_string()))
            .collect();
        events.push(ProviderEvent::Done);
        self.stream_events(events)
    }

    pub(crate) fn stream_events(self, events: Vec<ProviderEvent>) -> Self {
        self.streams.lock().unwrap().push_back(events);
        self
    }

    pub(crate) fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, request: ChatRequest<'_>) -> anyhow::Result<ChatResponse> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push(request.messages.to_vec());

        let next = self.replies.lock().unwrap().pop_front();
        match (next, &self.fallback) {
            (Some(reply), _) => reply,
            (None, Some(fallback)) => Ok(fallback.clone()),
            (None, None) => Err(anyhow::anyhow!("scripted provider exhausted")),
        }
    }

    async fn chat_stream(
        &self,
        request: ChatRequest<'_>,
    ) -> anyhow::Result<BoxStream<'static, ProviderEvent>> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push(request.messages.to_vec());

        let events = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("no scripted stream"))?;
        Ok(Box::pin(stream::iter(events)))
    }
}

pub(crate) fn tool_call(id: &str, name: &str, arguments: &str) -> ChatResponse {
    ChatResponse {
        text: None,
        tool_calls: vec![ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }],
    }
}

/// Memory fake that returns a fixed context and records stored texts.
#[derive(Default)]
pub(crate) struct RecordingMemory {
    pub(crate) context: String,
    stored: Mutex<Vec<String>>,
    queries: Mutex<Vec<String>>,
    pub(crate) stored_signal: Notify,
}

impl RecordingMemory {
    pub(crate) fn with_context(context: &str) -> Self {
        Self {
            context: context.to_string(),
            ..Self::default()
        }
    }

    pub(crate) fn stored(&self) -> Vec<String> {
        self.stored.lock().unwrap().clone()
    }

    pub(crate) fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl MemoryStore for RecordingMemory {
    async fn extract_and_store(&self, text: &str) -> usize {
        self.stored.lock().unwrap().push(text.to_string());
        self.stored_signal.notify_one();
        1
    }

    async fn retrieve_context(&self, query: &str, _top_k: usize) -> String {
        self.queries.lock().unwrap().push(query.to_string());
        self.context.clone()
    }
}
