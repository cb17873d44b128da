//! In-process mailbox system for addressed and broadcast messages between
//! agents.
//!
//! Delivery is at-least-once within the process and in-order per
//! `(sender, recipient)` pair: each recipient's inbox is a plain `Vec`
//! appended to under a single lock, so ordering falls out of insertion
//! order. A broadcast is stored once, addressed to the reserved recipient
//! name [`BROADCAST`], and is returned to every registered agent's inbox
//! view except the sender's.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Reserved recipient name meaning "every other registered agent".
pub const BROADCAST: &str = "broadcast";

/// The kind of a `SwarmMessage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Request,
    Response,
    Notification,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::Notification => "notification",
        }
    }
}

/// A single message on the bus.
#[derive(Debug, Clone)]
pub struct SwarmMessage {
    pub id: Uuid,
    pub from: String,
    /// Recipient name, or [`BROADCAST`].
    pub to: String,
    pub message_type: MessageType,
    pub content: String,
    pub channel: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<String>,
    pub round: Option<u32>,
    pub metadata: HashMap<String, Value>,
}

impl SwarmMessage {
    pub fn is_broadcast(&self) -> bool {
        self.to == BROADCAST
    }
}

/// Builder for a message not yet assigned an id/timestamp; `MessageBus::send`
/// fills those in.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub from: String,
    pub to: String,
    pub message_type: MessageType,
    pub content: String,
    pub channel: Option<String>,
    pub correlation_id: Option<String>,
    pub round: Option<u32>,
    pub metadata: HashMap<String, Value>,
}

impl OutgoingMessage {
    pub fn new(from: impl Into<String>, to: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            message_type: MessageType::Notification,
            content: content.into(),
            channel: None,
            correlation_id: None,
            round: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_round(mut self, round: u32) -> Self {
        self.round = Some(round);
        self
    }
}

/// Optional filter applied when reading a recipient's messages.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub from: Option<String>,
    pub message_type: Option<MessageType>,
    pub channel: Option<String>,
    pub correlation_id: Option<String>,
}

impl MessageFilter {
    fn matches(&self, msg: &SwarmMessage) -> bool {
        if let Some(from) = &self.from {
            if &msg.from != from {
                return false;
            }
        }
        if let Some(ty) = self.message_type {
            if msg.message_type != ty {
                return false;
            }
        }
        if let Some(channel) = &self.channel {
            if msg.channel.as_deref() != Some(channel.as_str()) {
                return false;
            }
        }
        if let Some(cid) = &self.correlation_id {
            if msg.correlation_id.as_deref() != Some(cid.as_str()) {
                return false;
            }
        }
        true
    }
}

type Handler = Arc<dyn Fn(&SwarmMessage) + Send + Sync>;

struct Inner {
    /// All agent names currently registered with the bus, used to compute
    /// broadcast fan-out.
    known_agents: Vec<String>,
    /// Messages addressed directly to a recipient, newest-last.
    inboxes: HashMap<String, Vec<SwarmMessage>>,
    /// Broadcast messages, newest-last; visible to every agent except the
    /// sender.
    broadcasts: Vec<SwarmMessage>,
    subscribers: HashMap<String, Vec<Handler>>,
}

/// Addressed and broadcast message delivery between named agents.
pub struct MessageBus {
    inner: Mutex<Inner>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                known_agents: Vec::new(),
                inboxes: HashMap::new(),
                broadcasts: Vec::new(),
                subscribers: HashMap::new(),
            }),
        }
    }

    /// Register an agent name so broadcast fan-out knows about it.
    pub fn register_agent(&self, name: impl Into<String>) {
        let mut inner = self.inner.lock().expect("message bus lock poisoned");
        let name = name.into();
        if !inner.known_agents.contains(&name) {
            inner.known_agents.push(name);
        }
    }

    /// Send a message, assigning it an id and timestamp, enqueuing it in the
    /// recipient's inbox (or the broadcast log), and firing subscriber
    /// handlers synchronously.
    pub fn send(&self, outgoing: OutgoingMessage) -> SwarmMessage {
        let msg = SwarmMessage {
            id: Uuid::new_v4(),
            from: outgoing.from,
            to: outgoing.to,
            message_type: outgoing.message_type,
            content: outgoing.content,
            channel: outgoing.channel,
            timestamp: Utc::now(),
            correlation_id: outgoing.correlation_id,
            round: outgoing.round,
            metadata: outgoing.metadata,
        };

        let handlers = {
            let mut inner = self.inner.lock().expect("message bus lock poisoned");
            if msg.is_broadcast() {
                inner.broadcasts.push(msg.clone());
            } else {
                inner.inboxes.entry(msg.to.clone()).or_default().push(msg.clone());
            }

            let mut handlers = Vec::new();
            if msg.is_broadcast() {
                for (recipient, list) in &inner.subscribers {
                    if recipient != &msg.from {
                        handlers.extend(list.iter().cloned());
                    }
                }
            } else if let Some(list) = inner.subscribers.get(&msg.to) {
                handlers.extend(list.iter().cloned());
            }
            handlers
        };

        for handler in handlers {
            handler(&msg);
        }

        msg
    }

    /// Convenience for sending a broadcast notification from `from`.
    pub fn broadcast(&self, from: impl Into<String>, content: impl Into<String>, channel: Option<String>) -> SwarmMessage {
        let mut outgoing = OutgoingMessage::new(from, BROADCAST, content).with_type(MessageType::Notification);
        outgoing.channel = channel;
        self.send(outgoing)
    }

    /// Return messages visible to `recipient`, newest-first: direct
    /// messages addressed to it plus any broadcast not sent by it.
    pub fn get_messages(&self, recipient: &str, filter: Option<&MessageFilter>) -> Vec<SwarmMessage> {
        let inner = self.inner.lock().expect("message bus lock poisoned");
        let mut messages: Vec<SwarmMessage> = inner
            .inboxes
            .get(recipient)
            .map(|v| v.clone())
            .unwrap_or_default();
        messages.extend(inner.broadcasts.iter().filter(|m| m.from != recipient).cloned());
        messages.sort_by_key(|m| m.timestamp);
        messages.reverse();
        if let Some(filter) = filter {
            messages.retain(|m| filter.matches(m));
        }
        messages
    }

    /// Poll `recipient`'s inbox, filtered by sender/type/correlation id, up
    /// to `deadline`. Used to implement request/response correlation: the
    /// sender records a correlation id, the recipient echoes it in its
    /// response, and the waiter polls filtered by `(from, Response,
    /// correlation_id)`.
    pub async fn wait_for_reply(
        &self,
        recipient: &str,
        filter: MessageFilter,
        deadline: std::time::Duration,
    ) -> Option<SwarmMessage> {
        let poll_interval = std::time::Duration::from_millis(20);
        let started = tokio::time::Instant::now();
        loop {
            if let Some(msg) = self.get_messages(recipient, Some(&filter)).into_iter().next() {
                return Some(msg);
            }
            if started.elapsed() >= deadline {
                return None;
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Subscribe `recipient` to messages addressed (directly or via
    /// broadcast) to it.
    pub fn subscribe<F>(&self, recipient: impl Into<String>, handler: F)
    where
        F: Fn(&SwarmMessage) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().expect("message bus lock poisoned");
        inner.subscribers.entry(recipient.into()).or_default().push(Arc::new(handler));
    }

    /// Drop all inboxes, broadcasts, and subscribers.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("message bus lock poisoned");
        inner.inboxes.clear();
        inner.broadcasts.clear();
        inner.subscribers.clear();
    }
}
