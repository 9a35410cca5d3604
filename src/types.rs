//! Behavioral analytics data types
//!
//! This module defines the sessions, events and derived metric records that flow
//! through the analytics pipeline.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::EventRejection;

/// Behavioral event kinds captured from the page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PageView,
    Scroll,
    Click,
    Hover,
    InputFocus,
    InputChange,
    FormSubmit,
    ExitIntent,
}

impl EventKind {
    /// Spatial kinds carry pointer coordinates
    pub fn is_spatial(self) -> bool {
        matches!(self, EventKind::Click | EventKind::Hover)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::PageView => "page_view",
            EventKind::Scroll => "scroll",
            EventKind::Click => "click",
            EventKind::Hover => "hover",
            EventKind::InputFocus => "input_focus",
            EventKind::InputChange => "input_change",
            EventKind::FormSubmit => "form_submit",
            EventKind::ExitIntent => "exit_intent",
        }
    }
}

/// Pointer coordinate in page pixels, as recorded by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// An event as submitted by calling UI code, before validation and timestamping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventInput {
    /// Event kind
    pub kind: EventKind,
    /// Pointer position (click and hover only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point: Option<Point>,
    /// Opaque identifier of the UI target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,
    /// Scroll depth in percent of document height (scroll only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_depth: Option<f64>,
    /// Free-form value payload (input value, page path, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl EventInput {
    /// Bare event of the given kind
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            point: None,
            element: None,
            scroll_depth: None,
            value: None,
            metadata: HashMap::new(),
        }
    }

    pub fn page_view() -> Self {
        Self::new(EventKind::PageView)
    }

    pub fn click(x: i32, y: i32, element: impl Into<String>) -> Self {
        Self::new(EventKind::Click)
            .at_point(x, y)
            .on_element(element)
    }

    pub fn hover(x: i32, y: i32) -> Self {
        Self::new(EventKind::Hover).at_point(x, y)
    }

    pub fn scroll(depth: f64) -> Self {
        Self {
            scroll_depth: Some(depth),
            ..Self::new(EventKind::Scroll)
        }
    }

    pub fn form_submit(element: impl Into<String>) -> Self {
        Self::new(EventKind::FormSubmit).on_element(element)
    }

    pub fn exit_intent() -> Self {
        Self::new(EventKind::ExitIntent)
    }

    pub fn at_point(mut self, x: i32, y: i32) -> Self {
        self.point = Some(Point::new(x, y));
        self
    }

    pub fn on_element(mut self, element: impl Into<String>) -> Self {
        self.element = Some(element.into());
        self
    }

    pub fn with_value(mut self, value: serde_json::Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// A stored behavioral event.
///
/// `point` is only present for spatial kinds and `scroll_depth` only for scroll
/// events; the collector enforces this before anything is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Server-observed timestamp
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point: Option<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_depth: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Client-side descriptors supplied when a session starts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionDescriptor {
    /// Page URL (path) the session belongs to
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
}

impl SessionDescriptor {
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// One browsing visit to one URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Events in arrival order
    #[serde(default)]
    pub events: Vec<Event>,
}

impl Session {
    pub(crate) fn from_descriptor(
        id: String,
        descriptor: SessionDescriptor,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id: descriptor.user_id,
            url: descriptor.url,
            device: descriptor.device,
            browser: descriptor.browser,
            country: descriptor.country,
            referrer: descriptor.referrer,
            started_at,
            ended_at: None,
            events: Vec::new(),
        }
    }

    /// Session length in seconds, measured to `now` while the session is open
    pub fn duration_sec(&self, now: DateTime<Utc>) -> f64 {
        let end = self.ended_at.unwrap_or(now);
        ((end - self.started_at).num_milliseconds() as f64 / 1000.0).max(0.0)
    }

    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Highest scroll depth recorded, if the session scrolled at all
    pub fn max_scroll_depth(&self) -> Option<f64> {
        self.events
            .iter()
            .filter(|e| e.kind == EventKind::Scroll)
            .filter_map(|e| e.scroll_depth)
            .fold(None, |max: Option<f64>, depth| {
                Some(max.map_or(depth, |m| m.max(depth)))
            })
    }

    pub fn has_event(&self, kind: EventKind) -> bool {
        self.events.iter().any(|e| e.kind == kind)
    }
}

/// Click frequency at a single pixel coordinate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapDataPoint {
    pub x: i32,
    pub y: i32,
    pub count: u32,
    /// Element label last observed at this coordinate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,
}

/// Number of equal-width scroll depth histogram buckets
pub const SCROLL_HISTOGRAM_BUCKETS: usize = 10;

/// Per-URL scroll depth aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrollDepthData {
    pub url: String,
    /// Deepest scroll observed across all sessions
    pub max_depth: f64,
    /// Mean of per-session maximum depths (0 when no session scrolled)
    pub average_depth: f64,
    /// Sessions that recorded at least one scroll event
    pub sessions: u32,
    /// Per-session max depth in 10% buckets; 100% lands in the last bucket
    pub histogram: [u32; SCROLL_HISTOGRAM_BUCKETS],
}

/// Per-element click aggregate for one URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickMapData {
    pub element: String,
    pub count: u32,
    /// Coordinate of the most recent click on this element
    pub x: i32,
    pub y: i32,
}

/// Time window used to select sessions for a report (by session start)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportPeriod {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

impl ReportPeriod {
    /// No bounds: every stored session is included
    pub fn all_time() -> Self {
        Self::default()
    }

    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// The trailing `days` days ending at `now`; unbounded below when the
    /// window reaches past the earliest representable time
    pub fn last_days(days: u32, now: DateTime<Utc>) -> Self {
        Self {
            start: now.checked_sub_signed(Duration::days(i64::from(days))),
            end: Some(now),
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| at >= s) && self.end.map_or(true, |e| at <= e)
    }
}

/// Heuristic finding attached to a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    HighBounceRate,
    ShallowScroll,
    HighExitIntent,
    LowEngagement,
    Healthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub kind: RecommendationKind,
    pub message: String,
}

/// Per-URL behavior report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorReport {
    pub url: String,
    pub period: ReportPeriod,
    pub generated_at: DateTime<Utc>,
    pub total_sessions: u32,
    pub avg_session_duration_sec: f64,
    /// Percentage of sessions with at most one event
    pub bounce_rate: f64,
    pub avg_scroll_depth: f64,
    /// Up to five most clicked elements, descending by count
    pub top_clicked_elements: Vec<ClickMapData>,
    pub heatmap: Vec<HeatmapDataPoint>,
    pub scroll_depth: ScrollDepthData,
    /// Percentage of sessions with at least one exit-intent event
    pub exit_intent_rate: f64,
    /// Never empty
    pub recommendations: Vec<Recommendation>,
}

/// Condition that completes a conversion goal or funnel step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GoalCondition {
    PageView { path: String },
    Click { element: String },
    FormSubmit { element: String },
    InputFocus { element: String },
    InputChange { element: String },
    ExitIntent,
    /// Running max scroll depth reaches `threshold` percent
    ScrollDepth { threshold: f64 },
    /// Time since session start reaches `seconds`
    TimeOnPage { seconds: u64 },
}

impl GoalCondition {
    pub fn is_threshold(&self) -> bool {
        matches!(
            self,
            GoalCondition::ScrollDepth { .. } | GoalCondition::TimeOnPage { .. }
        )
    }
}

/// A declared target action, achieved at most once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionGoal {
    pub id: String,
    pub name: String,
    pub condition: GoalCondition,
    /// Conversion value reported to the sink
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub achieved: bool,
}

impl ConversionGoal {
    pub fn new(id: impl Into<String>, name: impl Into<String>, condition: GoalCondition) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            condition,
            value: 0.0,
            achieved: false,
        }
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = value;
        self
    }
}

/// Ordered goal steps with a monotonic progress pointer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionFunnel {
    pub id: String,
    pub name: String,
    pub steps: Vec<ConversionGoal>,
    #[serde(default)]
    pub current_step: usize,
    #[serde(default)]
    pub completed: bool,
}

impl ConversionFunnel {
    pub fn new(id: impl Into<String>, name: impl Into<String>, steps: Vec<ConversionGoal>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            steps,
            current_step: 0,
            completed: false,
        }
    }
}

/// Result of handing an event to the collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordOutcome {
    Recorded,
    UnknownSession,
    Rejected { rejection: EventRejection },
}

impl RecordOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, RecordOutcome::Recorded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_event_kind_serialization() {
        let json = serde_json::to_string(&EventKind::ExitIntent).unwrap();
        assert_eq!(json, "\"exit_intent\"");

        let parsed: EventKind = serde_json::from_str("\"input_change\"").unwrap();
        assert_eq!(parsed, EventKind::InputChange);
    }

    #[test]
    fn test_spatial_kinds() {
        assert!(EventKind::Click.is_spatial());
        assert!(EventKind::Hover.is_spatial());
        assert!(!EventKind::Scroll.is_spatial());
        assert!(!EventKind::FormSubmit.is_spatial());
    }

    #[test]
    fn test_event_input_deserialization() {
        let json = r#"{
            "kind": "click",
            "point": { "x": 120, "y": 48 },
            "element": "cta-demo",
            "metadata": { "label": "Book a demo" }
        }"#;

        let input: EventInput = serde_json::from_str(json).unwrap();
        assert_eq!(input.kind, EventKind::Click);
        assert_eq!(input.point, Some(Point::new(120, 48)));
        assert_eq!(input.element.as_deref(), Some("cta-demo"));
        assert_eq!(input.metadata["label"], "Book a demo");
        assert!(input.scroll_depth.is_none());
    }

    #[test]
    fn test_goal_condition_tagging() {
        let json = r#"{ "kind": "scroll_depth", "threshold": 75.0 }"#;
        let condition: GoalCondition = serde_json::from_str(json).unwrap();
        assert_eq!(condition, GoalCondition::ScrollDepth { threshold: 75.0 });
        assert!(condition.is_threshold());

        let exit: GoalCondition = serde_json::from_str(r#"{ "kind": "exit_intent" }"#).unwrap();
        assert_eq!(exit, GoalCondition::ExitIntent);
        assert!(!exit.is_threshold());
    }

    #[test]
    fn test_session_duration_uses_now_when_open() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let mut session =
            Session::from_descriptor("s".into(), SessionDescriptor::for_url("/"), start);

        let now = start + Duration::seconds(45);
        assert_eq!(session.duration_sec(now), 45.0);

        session.ended_at = Some(start + Duration::seconds(20));
        assert_eq!(session.duration_sec(now), 20.0);
    }

    #[test]
    fn test_report_period_bounds() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        let period = ReportPeriod::last_days(7, now);

        assert!(period.contains(now));
        assert!(period.contains(now - Duration::days(7)));
        assert!(!period.contains(now - Duration::days(8)));
        assert!(ReportPeriod::all_time().contains(now - Duration::days(3650)));
    }

    #[test]
    fn test_report_period_huge_window_is_open_ended() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        let period = ReportPeriod::last_days(u32::MAX, now);

        assert_eq!(period.start, None);
        assert_eq!(period.end, Some(now));
        assert!(period.contains(now - Duration::days(365 * 200)));
        assert!(!period.contains(now + Duration::seconds(1)));
    }
}
