//! The alert handler interface (§6): `RegisterHandler`, `Collect`,
//! `UpdateEvent`, `RestoreTopic`, `CloseTopic`, `DeleteTopic`. Concrete
//! handlers (email, chat, paging) are external collaborators; this module
//! only defines the boundary and the in-process topic registry that
//! dispatches to registered handlers.

use crate::error::Result;
use crate::model::point::{FieldValue, Point};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Ok,
    Info,
    Warning,
    Critical,
}

/// One alert occurrence: the level it fired at, the point that triggered
/// it, and an optional human-readable message.
#[derive(Debug, Clone)]
pub struct Event {
    pub topic: String,
    pub level: Level,
    pub time: DateTime<Utc>,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub message: String,
}

/// A registered alert sink. Handlers are external collaborators (email,
/// chat, paging); this crate only dispatches to whatever is registered.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, event: &Event) -> Result<()>;
}

struct TopicState {
    handlers: Vec<Arc<dyn Handler>>,
    last_event: Option<Event>,
}

/// The in-process registry an alert-emitting node consults: register
/// handlers per topic, publish events, and track each topic's last event
/// for restore-after-restart and `closed`/`open` queries.
#[derive(Default)]
pub struct AlertRegistry {
    topics: RwLock<HashMap<String, TopicState>>,
}

impl AlertRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_handler(&self, topic: impl Into<String>, handler: Arc<dyn Handler>) {
        let mut topics = self.topics.write().await;
        topics.entry(topic.into()).or_insert_with(|| TopicState { handlers: Vec::new(), last_event: None }).handlers.push(handler);
    }

    /// Publish an event to every handler registered on its topic, then
    /// remember it as the topic's current state.
    pub async fn collect(&self, event: Event) -> Result<()> {
        let mut topics = self.topics.write().await;
        let state = topics.entry(event.topic.clone()).or_insert_with(|| TopicState { handlers: Vec::new(), last_event: None });
        for handler in &state.handlers {
            handler.handle(&event).await?;
        }
        state.last_event = Some(event);
        Ok(())
    }

    /// Re-publish a topic's last known event to its handlers, e.g. after a
    /// process restart, without waiting for the next triggering point.
    pub async fn restore_topic(&self, topic: &str) -> Result<()> {
        let topics = self.topics.read().await;
        if let Some(state) = topics.get(topic) {
            if let Some(event) = state.last_event.clone() {
                for handler in &state.handlers {
                    handler.handle(&event).await?;
                }
            }
        }
        Ok(())
    }

    /// Drop a topic's handlers without forgetting its last event.
    pub async fn close_topic(&self, topic: &str) {
        if let Some(state) = self.topics.write().await.get_mut(topic) {
            state.handlers.clear();
        }
    }

    /// Forget a topic entirely.
    pub async fn delete_topic(&self, topic: &str) {
        self.topics.write().await.remove(topic);
    }

    pub async fn last_event(&self, topic: &str) -> Option<Event> {
        self.topics.read().await.get(topic).and_then(|s| s.last_event.clone())
    }
}

/// Build an [`Event`] from a triggering point, as an alert node's
/// evaluation step would.
pub fn event_from_point(topic: impl Into<String>, level: Level, message: impl Into<String>, p: &Point) -> Event {
    Event {
        topic: topic.into(),
        level,
        time: p.time,
        tags: p.tags.clone(),
        fields: p.fields.clone(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::group::Dimensions;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl Handler for CountingHandler {
        async fn handle(&self, _event: &Event) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn point() -> Point {
        Point::new("db", "autogen", "cpu", Utc::now(), BTreeMap::new(), BTreeMap::new(), Dimensions::default())
    }

    #[tokio::test]
    async fn collect_dispatches_to_every_handler_on_the_topic() {
        let registry = AlertRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        registry.register_handler("cpu_high", Arc::new(CountingHandler(count.clone()))).await;
        registry.register_handler("cpu_high", Arc::new(CountingHandler(count.clone()))).await;

        registry.collect(event_from_point("cpu_high", Level::Critical, "cpu above threshold", &point())).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn restore_topic_replays_the_last_event() {
        let registry = AlertRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        registry.register_handler("cpu_high", Arc::new(CountingHandler(count.clone()))).await;
        registry.collect(event_from_point("cpu_high", Level::Warning, "rising", &point())).await.unwrap();
        registry.restore_topic("cpu_high").await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn close_topic_stops_dispatch_but_keeps_the_last_event() {
        let registry = AlertRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        registry.register_handler("cpu_high", Arc::new(CountingHandler(count.clone()))).await;
        registry.collect(event_from_point("cpu_high", Level::Ok, "recovered", &point())).await.unwrap();
        registry.close_topic("cpu_high").await;
        assert!(registry.last_event("cpu_high").await.is_some());
        registry.collect(event_from_point("cpu_high", Level::Ok, "still recovered", &point())).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
