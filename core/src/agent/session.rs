use crate::traits::{ChatMessage, Role, ToolCall};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

pub const INTERRUPTED_TOOL_RESULT: &str = "Error: tool call was interrupted before it returned";

/// Owner of conversation transcripts, keyed by session id.
pub trait SessionStore: Send + Sync {
    /// Ensures the session exists, seeding it with `system_prompt`. Returns
    /// `true` when this call created it.
    fn get_or_create(&self, session_id: &str, system_prompt: &str) -> bool;

    fn append(&self, session_id: &str, messages: Vec<ChatMessage>);

    /// A copy of the transcript that a provider will accept.
    fn snapshot(&self, session_id: &str) -> Vec<ChatMessage>;

    fn session_count(&self) -> usize;

    /// Lock that serializes turns on one session. A turn holds the guard
    /// from its first append until its last, so tool results are never
    /// interleaved with another turn's messages.
    fn turn_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>>;
}

type Transcript = Arc<Mutex<Vec<ChatMessage>>>;

/// Process-local session table. `max_messages` caps each transcript,
/// excluding the system message; 0 keeps everything.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Transcript>>,
    turn_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    max_messages: usize,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_messages(mut self, max: usize) -> Self {
        self.max_messages = max;
        self
    }

    fn transcript(&self, session_id: &str) -> Option<Transcript> {
        self.sessions
            .read()
            .ok()
            .and_then(|sessions| sessions.get(session_id).cloned())
    }
}

impl SessionStore for InMemorySessionStore {
    fn get_or_create(&self, session_id: &str, system_prompt: &str) -> bool {
        if self.transcript(session_id).is_some() {
            return false;
        }

        let Ok(mut sessions) = self.sessions.write() else {
            tracing::warn!("Session table lock poisoned; not creating {}", session_id);
            return false;
        };
        let mut created = false;
        sessions.entry(session_id.to_string()).or_insert_with(|| {
            created = true;
            Arc::new(Mutex::new(vec![ChatMessage::system(system_prompt)]))
        });
        if created {
            tracing::debug!("Created session {}", session_id);
        }
        created
    }

    fn append(&self, session_id: &str, messages: Vec<ChatMessage>) {
        let Some(transcript) = self.transcript(session_id) else {
            tracing::warn!("Dropping messages for unknown session {}", session_id);
            return;
        };
        let Ok(mut transcript) = transcript.lock() else {
            tracing::warn!(
                "Transcript lock poisoned; dropping {} messages for session {}",
                messages.len(),
                session_id
            );
            return;
        };
        transcript.extend(messages);
        trim_history(&mut transcript, self.max_messages);
    }

    fn snapshot(&self, session_id: &str) -> Vec<ChatMessage> {
        let messages = self
            .transcript(session_id)
            .and_then(|t| t.lock().ok().map(|t| t.clone()))
            .unwrap_or_default();
        repair_dangling_tool_calls(messages)
    }

    fn session_count(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or_default()
    }

    fn turn_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.turn_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(session_id.to_string()).or_default())
    }
}

/// Drops the oldest non-system messages once the cap is exceeded. The
/// retained window always starts at a user message so no tool exchange is
/// split.
fn trim_history(messages: &mut Vec<ChatMessage>, max: usize) {
    if max == 0 {
        return;
    }
    let start = usize::from(messages.first().is_some_and(|m| m.role == Role::System));
    let body_len = messages.len() - start;
    if body_len <= max {
        return;
    }

    let cut = start + (body_len - max);
    if let Some(offset) = messages[cut..].iter().position(|m| m.role == Role::User) {
        messages.drain(start..cut + offset);
    }
}

/// Pairs every assistant tool call with a result. Calls left unanswered by
/// a cancelled turn get a synthetic error result; orphan tool messages are
/// dropped.
pub fn repair_dangling_tool_calls(messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    let mut repaired = Vec::with_capacity(messages.len());
    let mut iter = messages.into_iter().peekable();

    while let Some(message) = iter.next() {
        if message.role == Role::Tool {
            tracing::debug!("Dropping orphan tool result {:?}", message.tool_call_id);
            continue;
        }

        let pending: Vec<ToolCall> = message.requested_calls().to_vec();
        repaired.push(message);
        if pending.is_empty() {
            continue;
        }

        let mut answered = HashSet::new();
        while let Some(result) = iter.next_if(|m| m.role == Role::Tool) {
            if let Some(id) = &result.tool_call_id {
                answered.insert(id.clone());
            }
            repaired.push(result);
        }

        for call in pending.iter().filter(|c| !answered.contains(&c.id)) {
            repaired.push(ChatMessage::tool_result(
                &call.id,
                &call.name,
                INTERRUPTED_TOOL_RESULT,
            ));
        }
    }

    repaired
}
