//! Event collection
//!
//! Validates incoming events against their kind, stamps them with the
//! server-observed time and appends them to the owning session.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::EventRejection;
use crate::session::SessionStore;
use crate::types::{Event, EventInput, EventKind, RecordOutcome};

/// Largest accepted scroll depth (percent of document height)
const MAX_SCROLL_DEPTH: f64 = 100.0;

/// Collector for behavioral events
pub struct EventCollector;

impl EventCollector {
    /// Check an input against its kind and turn it into a stored event.
    ///
    /// Fields that do not belong to the kind are dropped so stored events only
    /// carry coordinates for click/hover and scroll depth for scroll.
    pub fn validate(input: EventInput, at: DateTime<Utc>) -> Result<Event, EventRejection> {
        let point = if input.kind.is_spatial() {
            Some(input.point.ok_or(EventRejection::MissingCoordinates { kind: input.kind })?)
        } else {
            None
        };

        let scroll_depth = if input.kind == EventKind::Scroll {
            let depth = input.scroll_depth.ok_or(EventRejection::MissingScrollDepth)?;
            if !depth.is_finite() || !(0.0..=MAX_SCROLL_DEPTH).contains(&depth) {
                return Err(EventRejection::ScrollDepthOutOfRange { depth });
            }
            Some(depth)
        } else {
            None
        };

        Ok(Event {
            timestamp: at,
            kind: input.kind,
            point,
            element: input.element,
            scroll_depth,
            value: input.value,
            metadata: input.metadata,
        })
    }

    /// Validate and append an event, stamped now
    pub fn record(store: &mut SessionStore, session_id: &str, input: EventInput) -> RecordOutcome {
        Self::record_at(store, session_id, input, Utc::now())
    }

    /// Validate and append an event observed at `at`.
    ///
    /// Unknown sessions and malformed events are reported through the outcome;
    /// neither touches the store.
    pub fn record_at(
        store: &mut SessionStore,
        session_id: &str,
        input: EventInput,
        at: DateTime<Utc>,
    ) -> RecordOutcome {
        if store.get(session_id).is_none() {
            debug!(session_id, kind = input.kind.as_str(), "event for unknown session dropped");
            return RecordOutcome::UnknownSession;
        }

        let kind = input.kind;
        match Self::validate(input, at) {
            Ok(event) => {
                store.append(session_id, event);
                debug!(session_id, kind = kind.as_str(), "event recorded");
                RecordOutcome::Recorded
            }
            Err(rejection) => {
                debug!(session_id, kind = kind.as_str(), %rejection, "event rejected");
                RecordOutcome::Rejected { rejection }
            }
        }
    }
}
