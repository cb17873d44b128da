//! Versioned keyed shared memory available to all agents and strategies
//! within one run.
//!
//! Sections are created on first write. Every write increments the
//! section's version; readers always observe the highest-version write
//! committed so far (§8: "the final `read(S)` equals the value of the
//! highest-version write"). `append` never mutates a previous value in
//! place — subscribers may still hold a clone of it — it always commits a
//! freshly allocated list via the same `write` path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Returned by `read` when a section has never been written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotFound(pub String);

impl std::fmt::Display for NotFound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "blackboard section not found: {}", self.0)
    }
}

impl std::error::Error for NotFound {}

/// Writer of a section: either a named agent or the reserved literal
/// `system`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Writer {
    Agent(String),
    System,
}

impl Writer {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Agent(name) => name,
            Self::System => "system",
        }
    }
}

impl From<&str> for Writer {
    fn from(value: &str) -> Self {
        Self::Agent(value.to_string())
    }
}

impl From<String> for Writer {
    fn from(value: String) -> Self {
        Self::Agent(value)
    }
}

/// One committed section: its current value plus write metadata.
#[derive(Debug, Clone)]
pub struct Section {
    pub name: String,
    pub data: Value,
    pub version: u64,
    pub last_modified: DateTime<Utc>,
    pub modified_by: Writer,
}

/// One entry in a section's write history, present only when history is
/// enabled for the blackboard.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub value: Value,
    pub written_by: Writer,
    pub timestamp: DateTime<Utc>,
    pub version: u64,
}

type SubscriberHandler = Arc<dyn Fn(&Section) + Send + Sync>;

struct Inner {
    sections: HashMap<String, Section>,
    history: HashMap<String, Vec<HistoryEntry>>,
    subscribers: HashMap<String, Vec<SubscriberHandler>>,
    track_history: bool,
}

/// Versioned keyed shared memory with subscriptions and optional change
/// history.
pub struct Blackboard {
    inner: Mutex<Inner>,
}

impl Default for Blackboard {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Blackboard {
    /// `track_history` toggles whether writes are retained in per-section
    /// history (disabling it saves memory on long runs with hot sections).
    pub fn new(track_history: bool) -> Self {
        Self {
            inner: Mutex::new(Inner {
                sections: HashMap::new(),
                history: HashMap::new(),
                subscribers: HashMap::new(),
                track_history,
            }),
        }
    }

    /// Read the committed value of `section`, or `NotFound`.
    pub fn read(&self, section: &str) -> Result<Value, NotFound> {
        let inner = self.inner.lock().expect("blackboard lock poisoned");
        inner.sections.get(section).map(|s| s.data.clone()).ok_or_else(|| NotFound(section.to_string()))
    }

    /// Does `section` exist (has it ever been written)?
    pub fn has(&self, section: &str) -> bool {
        self.inner.lock().expect("blackboard lock poisoned").sections.contains_key(section)
    }

    /// Write `data` into `section`, allocating it on first write and
    /// incrementing its version otherwise. Notifies subscribers
    /// synchronously after the write commits; subscriber panics are
    /// isolated.
    pub fn write(&self, section: &str, data: Value, writer: impl Into<Writer>) -> Section {
        let writer = writer.into();
        let (committed, handlers) = {
            let mut inner = self.inner.lock().expect("blackboard lock poisoned");
            let now = Utc::now();
            let next_version = inner.sections.get(section).map_or(1, |s| s.version + 1);
            let committed = Section {
                name: section.to_string(),
                data: data.clone(),
                version: next_version,
                last_modified: now,
                modified_by: writer.clone(),
            };
            inner.sections.insert(section.to_string(), committed.clone());

            if inner.track_history {
                inner.history.entry(section.to_string()).or_default().push(HistoryEntry {
                    value: data,
                    written_by: writer,
                    timestamp: now,
                    version: next_version,
                });
            }

            let handlers: Vec<SubscriberHandler> =
                inner.subscribers.get(section).map(|v| v.clone()).unwrap_or_default();
            (committed, handlers)
        };

        for handler in &handlers {
            if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(&committed))) {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "<non-string panic payload>".to_string());
                tracing::warn!(section = %committed.name, %message, "blackboard subscriber panicked");
            }
        }

        committed
    }

    /// Append `item` to the ordered list stored in `section`, creating it
    /// as a one-element list if absent. Requires the existing value (if
    /// any) to already be a JSON array.
    pub fn append(&self, section: &str, item: Value, writer: impl Into<Writer>) -> Result<Section, AppendError> {
        let current = self.inner.lock().expect("blackboard lock poisoned").sections.get(section).cloned();
        let mut list = match current {
            None => Vec::new(),
            Some(existing) => match existing.data {
                Value::Array(items) => items,
                other => return Err(AppendError::NotAList { section: section.to_string(), found: other }),
            },
        };
        list.push(item);
        Ok(self.write(section, Value::Array(list), writer))
    }

    /// Remove a section, its history, and its subscribers.
    pub fn delete(&self, section: &str) {
        let mut inner = self.inner.lock().expect("blackboard lock poisoned");
        inner.sections.remove(section);
        inner.history.remove(section);
        inner.subscribers.remove(section);
    }

    /// Names of every section ever written.
    pub fn get_sections(&self) -> Vec<String> {
        let mut names: Vec<String> =
            self.inner.lock().expect("blackboard lock poisoned").sections.keys().cloned().collect();
        names.sort();
        names
    }

    /// Full committed `Section` record (value + metadata), or `None`.
    pub fn get_section(&self, section: &str) -> Option<Section> {
        self.inner.lock().expect("blackboard lock poisoned").sections.get(section).cloned()
    }

    /// Ordered write history for `section`, oldest-first. Empty if history
    /// tracking is disabled or the section has no writes.
    pub fn get_history(&self, section: &str) -> Vec<HistoryEntry> {
        self.inner.lock().expect("blackboard lock poisoned").history.get(section).cloned().unwrap_or_default()
    }

    /// Subscribe to every future commit to `section`.
    pub fn subscribe<F>(&self, section: impl Into<String>, handler: F)
    where
        F: Fn(&Section) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().expect("blackboard lock poisoned");
        inner.subscribers.entry(section.into()).or_default().push(Arc::new(handler));
    }

    /// Drop every section, its history, and all subscribers.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("blackboard lock poisoned");
        inner.sections.clear();
        inner.history.clear();
        inner.subscribers.clear();
    }
}

/// `append` called against a section whose committed value is not a JSON
/// array.
#[derive(Debug, Clone)]
pub enum AppendError {
    NotAList { section: String, found: Value },
}

impl std::fmt::Display for AppendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAList { section, .. } => {
                write!(f, "section `{section}` does not hold an ordered list")
            }
        }
    }
}

impl std::error::Error for AppendError {}
