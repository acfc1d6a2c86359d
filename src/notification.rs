//! Status notifications
//!
//! Expansion progress and per-expander failures are published as
//! [`StatusEvent`]s on a [`StatusBus`]. Front-ends subscribe to the bus and can
//! keep a bounded [`StatusHistory`] for display.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Buffered events per subscriber; older events are dropped when full
const STATUS_BUS_CAPACITY: usize = 30;

pub const IN_PROGRESS_TIMEOUT: Duration = Duration::from_secs(5);
pub const FAILURE_TIMEOUT: Duration = Duration::from_secs(15);
pub const TIMEOUT_FAILURE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    InProgress,
    Success,
    Failure,
}

impl StatusKind {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Self::InProgress => "↻",
            Self::Success => "✓",
            Self::Failure => "✗",
        }
    }
}

/// A single status message
#[derive(Debug, Clone)]
pub struct StatusEvent {
    pub id: Uuid,
    pub message: String,
    pub kind: StatusKind,
    /// How long the message stays visible after it was created
    pub timeout: Duration,
    pub created_at: Instant,
}

impl StatusEvent {
    fn new(message: impl Into<String>, kind: StatusKind, timeout: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            message: message.into(),
            kind,
            timeout,
            created_at: Instant::now(),
        }
    }

    pub fn in_progress(message: impl Into<String>) -> Self {
        Self::new(message, StatusKind::InProgress, IN_PROGRESS_TIMEOUT)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(message, StatusKind::Success, IN_PROGRESS_TIMEOUT)
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(message, StatusKind::Failure, FAILURE_TIMEOUT)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn icon(&self) -> &'static str {
        self.kind.icon()
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }

    pub fn has_expired(&self) -> bool {
        self.created_at.elapsed() > self.timeout
    }

    /// Mark an in-progress event as finished, keeping its id
    pub fn done(&mut self) {
        if self.kind == StatusKind::InProgress {
            self.kind = StatusKind::Success;
        }
    }

    /// `icon message`
    pub fn display(&self) -> String {
        format!("{} {}", self.icon(), self.message)
    }
}

/// Broadcast channel for status events
#[derive(Debug, Clone)]
pub struct StatusBus {
    sender: broadcast::Sender<StatusEvent>,
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(STATUS_BUS_CAPACITY);
        Self { sender }
    }

    /// Publish an event. Dropped silently when nobody is listening.
    pub fn publish(&self, event: StatusEvent) {
        tracing::debug!("status: {}", event.display());
        let _ = self.sender.send(event);
    }

    /// Publish an in-progress event and return it so the caller can finish it
    pub fn start(&self, message: impl Into<String>) -> StatusEvent {
        let event = StatusEvent::in_progress(message);
        self.publish(event.clone());
        event
    }

    /// Publish the finished version of an event returned by [`StatusBus::start`]
    pub fn finish(&self, mut event: StatusEvent) {
        event.done();
        self.publish(event);
    }

    pub fn failure(&self, message: impl Into<String>) {
        self.publish(StatusEvent::failure(message));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }
}

/// Most-recent-first log of status events
#[derive(Debug)]
pub struct StatusHistory {
    pub events: VecDeque<StatusEvent>,
    pub max_history: usize,
}

impl Default for StatusHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusHistory {
    pub fn new() -> Self {
        Self {
            events: VecDeque::new(),
            max_history: 50,
        }
    }

    /// Record an event; an event with a known id replaces the earlier version
    pub fn record(&mut self, event: StatusEvent) {
        if let Some(existing) = self.events.iter_mut().find(|e| e.id == event.id) {
            *existing = event;
            return;
        }
        self.events.push_front(event);
        self.trim_history();
    }

    pub fn get(&self, id: Uuid) -> Option<&StatusEvent> {
        self.events.iter().find(|e| e.id == id)
    }

    /// Events that are still within their timeout
    pub fn visible(&self) -> impl Iterator<Item = &StatusEvent> {
        self.events.iter().filter(|e| !e.has_expired())
    }

    pub fn in_progress_count(&self) -> usize {
        self.events.iter().filter(|e| !e.is_terminal()).count()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    fn trim_history(&mut self) {
        while self.events.len() > self.max_history {
            // Prefer dropping the oldest finished event
            if let Some(pos) = self.events.iter().rposition(|e| e.is_terminal()) {
                self.events.remove(pos);
            } else {
                self.events.pop_back();
            }
        }
    }
}
