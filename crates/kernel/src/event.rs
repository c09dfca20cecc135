//! The Event Stream: an append-only, typed log of everything an agent does,
//! with type-filtered subscriptions.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::tool::{MultimodalContent, ToolCall, ToolDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    Stop,
    ToolCalls,
    Length,
    ContentFilter,
    Abort,
    MaxIterations,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// The closed set of event payloads. `#[serde(tag = "type")]` gives each
/// variant a `"type"` discriminant matching the wire name in its doc comment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    UserMessage {
        content: MultimodalContent,
    },
    EnvironmentInput {
        content: MultimodalContent,
        description: Option<String>,
    },
    AssistantStreamingMessage {
        content: String,
        message_id: String,
        is_complete: bool,
    },
    AssistantStreamingThinkingMessage {
        content: String,
        message_id: String,
        is_complete: bool,
    },
    AssistantStreamingToolCall {
        tool_call_id: String,
        tool_name: String,
        arguments_delta: String,
        is_complete: bool,
    },
    AssistantMessage {
        content: String,
        raw_content: Option<String>,
        tool_calls: Option<Vec<ToolCall>>,
        finish_reason: FinishReason,
        message_id: String,
    },
    AssistantThinkingMessage {
        content: String,
        thinking_duration_ms: Option<u64>,
    },
    ToolCall {
        tool_call_id: String,
        name: String,
        arguments: String,
        start_time: DateTime<Utc>,
        tool: ToolDefinition,
    },
    ToolResult {
        tool_call_id: String,
        name: String,
        content: MultimodalContent,
        error: Option<String>,
        elapsed_ms: u64,
    },
    PlanStart {
        session_id: String,
        steps: Vec<String>,
        summary: Option<String>,
    },
    PlanUpdate {
        session_id: String,
        steps: Vec<String>,
        summary: Option<String>,
    },
    PlanFinish {
        session_id: String,
        steps: Vec<String>,
        summary: Option<String>,
    },
    System {
        level: SystemLevel,
        message: String,
        details: Option<Value>,
    },
}

impl EventPayload {
    /// The wire discriminant, e.g. `"tool_result"`. Matches the `#[serde(tag
    /// = "type")]` rendering; used by `getEventsByType`-style filters.
    pub fn type_name(&self) -> &'static str {
        match self {
            EventPayload::UserMessage { .. } => "user_message",
            EventPayload::EnvironmentInput { .. } => "environment_input",
            EventPayload::AssistantStreamingMessage { .. } => "assistant_streaming_message",
            EventPayload::AssistantStreamingThinkingMessage { .. } => "assistant_streaming_thinking_message",
            EventPayload::AssistantStreamingToolCall { .. } => "assistant_streaming_tool_call",
            EventPayload::AssistantMessage { .. } => "assistant_message",
            EventPayload::AssistantThinkingMessage { .. } => "assistant_thinking_message",
            EventPayload::ToolCall { .. } => "tool_call",
            EventPayload::ToolResult { .. } => "tool_result",
            EventPayload::PlanStart { .. } => "plan_start",
            EventPayload::PlanUpdate { .. } => "plan_update",
            EventPayload::PlanFinish { .. } => "plan_finish",
            EventPayload::System { .. } => "system",
        }
    }
}

/// An immutable, totally-ordered record. `id`/`timestamp` are assigned by the
/// stream on `send`/`create`, never by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    pub fn type_name(&self) -> &'static str {
        self.payload.type_name()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    types: Option<HashSet<&'static str>>,
    handler: Box<dyn Fn(&Event) + Send + Sync>,
}

struct Inner {
    events: Vec<Event>,
    last_timestamp: DateTime<Utc>,
    subscribers: Vec<Subscriber>,
}

/// Append-only event log with synchronous, type-filtered subscriber delivery.
///
/// Delivery happens in `send` itself (the kernel's scheduling model is
/// single-threaded cooperative, per the agent's concurrency model), in
/// subscription order, and a panicking handler is caught and logged rather
/// than propagated to the sender.
pub struct EventStream {
    inner: Mutex<Inner>,
    next_subscriber_id: AtomicU64,
}

impl Default for EventStream {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStream {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner { events: Vec::new(), last_timestamp: DateTime::<Utc>::MIN_UTC, subscribers: Vec::new() }),
            next_subscriber_id: AtomicU64::new(1),
        }
    }

    /// Assign `id`/`timestamp`, append, and synchronously notify matching
    /// subscribers, returning the finished event.
    pub fn send(&self, payload: EventPayload) -> Event {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now().max(inner.last_timestamp);
        inner.last_timestamp = now;
        let event = Event { id: Uuid::new_v4(), timestamp: now, payload };
        inner.events.push(event.clone());

        for subscriber in &inner.subscribers {
            if subscriber.types.as_ref().is_some_and(|types| !types.contains(event.type_name())) {
                continue;
            }
            let handler = &subscriber.handler;
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| handler(&event)));
            if let Err(panic) = result {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "subscriber panicked".to_string());
                tracing::error!(subscriber_id = subscriber.id.0, error = %message, "event subscriber panicked");
            }
        }

        event
    }

    /// Alias for `send`, read more naturally at call sites that are
    /// constructing a fresh event rather than forwarding one.
    pub fn create(&self, payload: EventPayload) -> Event {
        self.send(payload)
    }

    /// Stable snapshot: never observes a send that is still in progress.
    pub fn get_events(&self) -> Vec<Event> {
        self.inner.lock().unwrap().events.clone()
    }

    pub fn get_events_by_type(&self, types: &[&str]) -> Vec<Event> {
        self.inner
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|e| types.contains(&e.type_name()))
            .cloned()
            .collect()
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe_inner(None, handler)
    }

    pub fn subscribe_to_types<F>(&self, types: &[&'static str], handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe_inner(Some(types.iter().copied().collect()), handler)
    }

    fn subscribe_inner<F>(&self, types: Option<HashSet<&'static str>>, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscriber_id.fetch_add(1, Ordering::SeqCst));
        self.inner.lock().unwrap().subscribers.push(Subscriber { id, types, handler: Box::new(handler) });
        id
    }

    /// Callers hold the returned [`SubscriptionId`] and pass it back here
    /// to detach a subscriber, in place of a closure-returning-closure
    /// unsubscribe function.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.lock().unwrap().subscribers.retain(|s| s.id != id);
    }
}

impl PartialEq for SubscriptionId {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for SubscriptionId {}
