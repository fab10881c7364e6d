/// Event bus and broadcast bridge
///
/// Every state transition in the engine, debugger and scheduler is announced
/// on the `EventBus`. Emission is fire-and-forget: a slow or missing
/// subscriber never blocks or fails the emitter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;
const MAX_HISTORY: usize = 1000;

/// One published event
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub name: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

/// Async publish/subscribe channel with a bounded recent-history ring
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    history: Mutex<VecDeque<Event>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            history: Mutex::new(VecDeque::with_capacity(MAX_HISTORY)),
        }
    }

    /// Publish an event to all current subscribers
    pub async fn emit(&self, name: &str, data: Value) {
        let event = Event {
            name: name.to_string(),
            data,
            timestamp: Utc::now(),
        };
        tracing::debug!("📣 Event: {}", name);

        if let Ok(mut history) = self.history.lock() {
            if history.len() >= MAX_HISTORY {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        // No receivers is not an error for a fire-and-forget bus
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Most recent `count` events, oldest first
    pub fn recent_events(&self, count: usize) -> Vec<Event> {
        self.history
            .lock()
            .map(|history| {
                let skip = history.len().saturating_sub(count);
                history.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    /// Most recent `count` events with the given name, oldest first
    pub fn events_named(&self, name: &str, count: usize) -> Vec<Event> {
        let matching: Vec<Event> = self
            .history
            .lock()
            .map(|history| history.iter().filter(|e| e.name == name).cloned().collect())
            .unwrap_or_default();
        let skip = matching.len().saturating_sub(count);
        matching.into_iter().skip(skip).collect()
    }
}

/// Outbound bridge to live clients (WebSocket fan-out in a full deployment)
///
/// Engine and scheduler call it best-effort: errors are logged, never fatal.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast(&self, message: Value) -> anyhow::Result<()>;
}

/// Default bridge that only writes broadcasts to the log
#[derive(Debug, Default)]
pub struct LoggingBroadcaster;

#[async_trait]
impl Broadcaster for LoggingBroadcaster {
    async fn broadcast(&self, message: Value) -> anyhow::Result<()> {
        tracing::debug!("📡 Broadcast: {}", message);
        Ok(())
    }
}

/// Send through an optional bridge, logging any failure
pub async fn broadcast_best_effort(broadcaster: Option<&dyn Broadcaster>, message: Value) {
    if let Some(broadcaster) = broadcaster {
        if let Err(e) = broadcaster.broadcast(message).await {
            tracing::warn!("⚠️ Broadcast failed: {}", e);
        }
    }
}
