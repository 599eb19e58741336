//! Delta buffers for streamed text and tool calls
//!
//! Every chunk is merged as soon as it arrives. Only the notifications are
//! throttled, and each one carries the full accumulated value, so a skipped
//! intermediate notification never loses data.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use taskwire_api::ToolCallChunk;
use tokio::time::Instant;

use crate::throttle::Throttle;

/// Accumulates text deltas of the streaming assistant message
#[derive(Debug, Clone)]
pub struct TextBuffer {
    text: String,
    throttle: Throttle,
}

impl TextBuffer {
    pub fn new(interval: Duration) -> Self {
        Self {
            text: String::new(),
            throttle: Throttle::new(interval),
        }
    }

    /// Append a chunk; returns the full text if a notification is due now
    pub fn accumulate(&mut self, chunk: &str, now: Instant) -> Option<String> {
        self.text.push_str(chunk);
        self.throttle.hit(now).then(|| self.text.clone())
    }

    /// The deferred notification, once its deadline has passed
    pub fn flush_due(&mut self, now: Instant) -> Option<String> {
        self.throttle.due(now).then(|| self.text.clone())
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.throttle.deadline()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Reset the text and cancel any pending notification
    pub fn clear(&mut self) {
        self.text.clear();
        self.throttle.reset();
    }
}

/// Merged state of one streamed tool call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallSnapshot {
    pub index: usize,
    /// Empty until the server has sent the call id
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Accumulates tool-call deltas keyed by their position in the message
#[derive(Debug, Clone)]
pub struct ToolCallBuffer {
    calls: BTreeMap<usize, ToolCallSnapshot>,
    pending: BTreeSet<usize>,
    throttle: Throttle,
}

impl ToolCallBuffer {
    pub fn new(interval: Duration) -> Self {
        Self {
            calls: BTreeMap::new(),
            pending: BTreeSet::new(),
            throttle: Throttle::new(interval),
        }
    }

    /// Merge a chunk; returns snapshots of every changed call if a
    /// notification is due now
    pub fn accumulate(&mut self, chunk: &ToolCallChunk, now: Instant) -> Vec<ToolCallSnapshot> {
        let call = self
            .calls
            .entry(chunk.index)
            .or_insert_with(|| ToolCallSnapshot {
                index: chunk.index,
                ..Default::default()
            });

        call.arguments.push_str(&chunk.arguments);
        if let Some(id) = chunk.id.as_deref().filter(|id| !id.is_empty()) {
            call.id = id.to_string();
        }
        if let Some(name) = chunk.name.as_deref().filter(|name| !name.is_empty()) {
            call.name = name.to_string();
        }

        self.pending.insert(chunk.index);
        if self.throttle.hit(now) {
            self.take_pending()
        } else {
            vec![]
        }
    }

    /// The deferred notifications, once their deadline has passed
    pub fn flush_due(&mut self, now: Instant) -> Vec<ToolCallSnapshot> {
        if self.throttle.due(now) {
            self.take_pending()
        } else {
            vec![]
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.throttle.deadline()
    }

    pub fn get(&self, index: usize) -> Option<&ToolCallSnapshot> {
        self.calls.get(&index)
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Drop all calls and pending notifications
    pub fn clear(&mut self) {
        self.calls.clear();
        self.pending.clear();
        self.throttle.reset();
    }

    fn take_pending(&mut self) -> Vec<ToolCallSnapshot> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .filter_map(|index| self.calls.get(&index).cloned())
            .collect()
    }
}
