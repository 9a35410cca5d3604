//! Analytics sink: the external collaborator that receives named events.
//!
//! The core hands conversions and other named events to an `Arc<dyn AnalyticsSink>`.
//! Delivery is fire-and-forget: `emit` must not block the caller and the core
//! never retries or waits for confirmation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use tracing::info;

/// Event name reported when a conversion goal is first achieved
pub const CONVERSION_EVENT: &str = "conversion";

/// Event name reported when a funnel completes
pub const FUNNEL_COMPLETED_EVENT: &str = "funnel_completed";

/// Receiver of named analytics events with a property bag
pub trait AnalyticsSink: Send + Sync {
    fn emit(&self, event_name: &str, properties: &Map<String, Value>);
}

/// A captured or forwarded sink emission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Emission {
    pub event: String,
    pub properties: Map<String, Value>,
}

/// Sink that drops everything
pub struct NoOpSink;

impl AnalyticsSink for NoOpSink {
    fn emit(&self, _event_name: &str, _properties: &Map<String, Value>) {}
}

/// Sink that logs each emission through `tracing`
pub struct TracingSink;

impl AnalyticsSink for TracingSink {
    fn emit(&self, event_name: &str, properties: &Map<String, Value>) {
        let properties = Value::Object(properties.clone());
        info!(event = event_name, properties = %properties, "analytics event");
    }
}

/// In-memory sink that captures emissions for tests
#[derive(Default)]
pub struct CaptureSink {
    emissions: Mutex<Vec<Emission>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emissions(&self) -> Vec<Emission> {
        self.emissions.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.emissions.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Number of captured emissions with the given event name
    pub fn count_named(&self, event_name: &str) -> usize {
        self.emissions
            .lock()
            .map(|e| e.iter().filter(|em| em.event == event_name).count())
            .unwrap_or(0)
    }

    pub fn clear(&self) {
        if let Ok(mut e) = self.emissions.lock() {
            e.clear();
        }
    }
}

impl AnalyticsSink for CaptureSink {
    fn emit(&self, event_name: &str, properties: &Map<String, Value>) {
        if let Ok(mut e) = self.emissions.lock() {
            e.push(Emission {
                event: event_name.to_string(),
                properties: properties.clone(),
            });
        }
    }
}

/// Sink that forwards emissions over an unbounded channel.
///
/// Sending never blocks; a dropped receiver silently discards emissions.
pub struct ChannelSink {
    sender: Mutex<Sender<Emission>>,
}

impl ChannelSink {
    /// Create a sink and the receiver that drains it
    pub fn new() -> (Self, Receiver<Emission>) {
        let (sender, receiver) = channel();
        (
            Self {
                sender: Mutex::new(sender),
            },
            receiver,
        )
    }
}

impl AnalyticsSink for ChannelSink {
    fn emit(&self, event_name: &str, properties: &Map<String, Value>) {
        if let Ok(sender) = self.sender.lock() {
            let _ = sender.send(Emission {
                event: event_name.to_string(),
                properties: properties.clone(),
            });
        }
    }
}

/// Convenience: a no-op sink for callers that do not report anywhere
pub fn noop_sink() -> Arc<dyn AnalyticsSink> {
    Arc::new(NoOpSink)
}

/// Convenience: a capture sink for tests
pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(goal: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("goal_id".into(), json!(goal));
        map
    }

    #[test]
    fn test_capture_sink() {
        let sink = capture_sink();
        assert_eq!(sink.count(), 0);

        sink.emit(CONVERSION_EVENT, &props("demo"));
        sink.emit(FUNNEL_COMPLETED_EVENT, &props("funnel"));
        sink.emit(CONVERSION_EVENT, &props("contact"));

        assert_eq!(sink.count(), 3);
        assert_eq!(sink.count_named(CONVERSION_EVENT), 2);
        assert_eq!(sink.emissions()[0].properties["goal_id"], "demo");

        sink.clear();
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn test_channel_sink_forwards() {
        let (sink, receiver) = ChannelSink::new();
        sink.emit(CONVERSION_EVENT, &props("demo"));

        let emission = receiver.try_recv().unwrap();
        assert_eq!(emission.event, CONVERSION_EVENT);
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (sink, receiver) = ChannelSink::new();
        drop(receiver);
        sink.emit(CONVERSION_EVENT, &props("demo"));
    }

    #[test]
    fn test_dyn_sinks() {
        let sinks: Vec<Arc<dyn AnalyticsSink>> = vec![noop_sink(), Arc::new(TracingSink)];
        for sink in sinks {
            sink.emit("page_event", &Map::new());
        }
    }
}
