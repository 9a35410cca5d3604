//! Conversion goal and funnel tracking
//!
//! Each goal is a one-way `pending → achieved` state machine fed by the same
//! event stream as the collector. The first matching event achieves the goal and
//! reports one conversion to the analytics sink; later matches are ignored.
//!
//! Funnels keep a monotonic progress pointer. Any step may be satisfied out of
//! order; `current_step` only ever moves forward to `matched_index + 1`, and the
//! funnel completes once the pointer reaches the step count.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::AnalyticsConfig;
use crate::sink::{AnalyticsSink, CONVERSION_EVENT, FUNNEL_COMPLETED_EVENT};
use crate::types::{ConversionFunnel, ConversionGoal, Event, EventKind, GoalCondition, Session};

/// Currency attached to conversion values
const CONVERSION_CURRENCY: &str = "USD";

/// Running values threshold goals are compared against
#[derive(Debug, Clone, Copy, Default)]
struct Progress {
    max_scroll_depth: f64,
    elapsed_sec: f64,
}

/// Signal a condition is evaluated against: an event, or a time check with no event
enum Signal<'a> {
    Event(&'a Event),
    Tick,
}

/// Tracker for declared conversion goals and funnels
pub struct ConversionGoalTracker {
    goals: Vec<ConversionGoal>,
    funnels: Vec<ConversionFunnel>,
    /// Pristine catalog, restored by `reset`
    catalog: (Vec<ConversionGoal>, Vec<ConversionFunnel>),
    progress: HashMap<String, Progress>,
    sink: Arc<dyn AnalyticsSink>,
}

impl ConversionGoalTracker {
    /// Build a tracker with every goal and funnel pending.
    ///
    /// Funnels without steps can never progress and are left out.
    pub fn new(config: &AnalyticsConfig, sink: Arc<dyn AnalyticsSink>) -> Self {
        let goals = pending(&config.goals);
        let funnels: Vec<ConversionFunnel> = config
            .funnels
            .iter()
            .filter(|f| {
                if f.steps.is_empty() {
                    warn!(funnel_id = %f.id, "funnel has no steps; skipped");
                }
                !f.steps.is_empty()
            })
            .map(|f| ConversionFunnel {
                steps: pending(&f.steps),
                current_step: 0,
                completed: false,
                ..f.clone()
            })
            .collect();

        Self {
            catalog: (goals.clone(), funnels.clone()),
            goals,
            funnels,
            progress: HashMap::new(),
            sink,
        }
    }

    /// Feed an accepted event of `session` through every goal and funnel.
    ///
    /// Returns the ids of goals achieved by this event.
    pub fn observe(&mut self, session: &Session, event: &Event) -> Vec<String> {
        let progress = self.progress.entry(session.id.clone()).or_default();
        if let Some(depth) = event.scroll_depth {
            progress.max_scroll_depth = progress.max_scroll_depth.max(depth);
        }
        progress.elapsed_sec = progress.elapsed_sec.max(elapsed_sec(session, event.timestamp));
        let progress = *progress;

        self.evaluate(session, Signal::Event(event), progress)
    }

    /// Re-evaluate time thresholds for `session` at `now` without a new event
    pub fn tick(&mut self, session: &Session, now: DateTime<Utc>) -> Vec<String> {
        let progress = self.progress.entry(session.id.clone()).or_default();
        progress.elapsed_sec = progress.elapsed_sec.max(elapsed_sec(session, now));
        let progress = *progress;

        self.evaluate(session, Signal::Tick, progress)
    }

    fn evaluate(&mut self, session: &Session, signal: Signal<'_>, progress: Progress) -> Vec<String> {
        let mut achieved = Vec::new();

        for goal in self.goals.iter_mut().filter(|g| !g.achieved) {
            if condition_met(&goal.condition, session, &signal, progress) {
                goal.achieved = true;
                info!(goal_id = %goal.id, session_id = %session.id, value = goal.value, "conversion goal achieved");
                self.sink.emit(CONVERSION_EVENT, &conversion_properties(goal, session));
                achieved.push(goal.id.clone());
            }
        }

        for funnel in &mut self.funnels {
            let was_completed = funnel.completed;
            for (index, step) in funnel.steps.iter_mut().enumerate() {
                if condition_met(&step.condition, session, &signal, progress) {
                    step.achieved = true;
                    funnel.current_step = funnel.current_step.max(index + 1);
                }
            }

            if funnel.current_step >= funnel.steps.len() {
                funnel.completed = true;
            }

            if funnel.completed && !was_completed {
                info!(funnel_id = %funnel.id, session_id = %session.id, "funnel completed");
                let mut properties = Map::new();
                properties.insert("funnel_id".into(), json!(funnel.id));
                properties.insert("funnel_name".into(), json!(funnel.name));
                properties.insert("session_id".into(), json!(session.id));
                self.sink.emit(FUNNEL_COMPLETED_EVENT, &properties);
            }
        }

        achieved
    }

    pub fn goals(&self) -> &[ConversionGoal] {
        &self.goals
    }

    pub fn funnels(&self) -> &[ConversionFunnel] {
        &self.funnels
    }

    pub fn goal(&self, id: &str) -> Option<&ConversionGoal> {
        self.goals.iter().find(|g| g.id == id)
    }

    pub fn funnel(&self, id: &str) -> Option<&ConversionFunnel> {
        self.funnels.iter().find(|f| f.id == id)
    }

    /// Ids of goals achieved so far
    pub fn achieved_goals(&self) -> Vec<&str> {
        self.goals
            .iter()
            .filter(|g| g.achieved)
            .map(|g| g.id.as_str())
            .collect()
    }

    /// Drop threshold progress kept for a session
    pub fn forget_session(&mut self, session_id: &str) {
        self.progress.remove(session_id);
    }

    /// Keep threshold progress only for sessions accepted by `keep`
    pub fn retain_sessions(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.progress.retain(|id, _| keep(id));
    }

    /// Number of sessions with threshold progress held
    pub fn tracked_sessions(&self) -> usize {
        self.progress.len()
    }

    /// Restore the catalog to its initial, all-pending state
    pub fn reset(&mut self) {
        self.goals = self.catalog.0.clone();
        self.funnels = self.catalog.1.clone();
        self.progress.clear();
    }
}

fn pending(goals: &[ConversionGoal]) -> Vec<ConversionGoal> {
    goals
        .iter()
        .map(|g| ConversionGoal {
            achieved: false,
            ..g.clone()
        })
        .collect()
}

fn elapsed_sec(session: &Session, at: DateTime<Utc>) -> f64 {
    ((at - session.started_at).num_milliseconds() as f64 / 1000.0).max(0.0)
}

fn condition_met(condition: &GoalCondition, session: &Session, signal: &Signal<'_>, progress: Progress) -> bool {
    match condition {
        GoalCondition::ScrollDepth { threshold } => progress.max_scroll_depth >= *threshold,
        GoalCondition::TimeOnPage { seconds } => progress.elapsed_sec >= *seconds as f64,
        _ => match signal {
            Signal::Event(event) => matches_event(condition, session, event),
            Signal::Tick => false,
        },
    }
}

fn matches_event(condition: &GoalCondition, session: &Session, event: &Event) -> bool {
    let on_element = |kind: EventKind, target: &str| {
        event.kind == kind && event.element.as_deref() == Some(target)
    };

    match condition {
        GoalCondition::PageView { path } => {
            event.kind == EventKind::PageView
                && (session.url == *path || event.value.as_ref().and_then(Value::as_str) == Some(path.as_str()))
        }
        GoalCondition::Click { element } => on_element(EventKind::Click, element.as_str()),
        GoalCondition::FormSubmit { element } => on_element(EventKind::FormSubmit, element.as_str()),
        GoalCondition::InputFocus { element } => on_element(EventKind::InputFocus, element.as_str()),
        GoalCondition::InputChange { element } => on_element(EventKind::InputChange, element.as_str()),
        GoalCondition::ExitIntent => event.kind == EventKind::ExitIntent,
        GoalCondition::ScrollDepth { .. } | GoalCondition::TimeOnPage { .. } => false,
    }
}

fn conversion_properties(goal: &ConversionGoal, session: &Session) -> Map<String, Value> {
    let mut properties = Map::new();
    properties.insert("goal_id".into(), json!(goal.id));
    properties.insert("goal_name".into(), json!(goal.name));
    properties.insert("value".into(), json!(goal.value));
    properties.insert("currency".into(), json!(CONVERSION_CURRENCY));
    properties.insert("transaction_id".into(), json!(session.id));
    properties.insert("session_id".into(), json!(session.id));
    properties.insert("url".into(), json!(session.url));
    properties
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{capture_sink, CaptureSink};
    use crate::types::{Point, SessionDescriptor};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 12, 15, 0, 0).unwrap()
    }

    fn session(url: &str) -> Session {
        Session::from_descriptor(format!("session-{}", url), SessionDescriptor::for_url(url), t0())
    }

    fn event(kind: EventKind, offset_sec: i64) -> Event {
        Event {
            timestamp: t0() + Duration::seconds(offset_sec),
            kind,
            point: None,
            element: None,
            scroll_depth: None,
            value: None,
            metadata: HashMap::new(),
        }
    }

    fn submit(element: &str, offset_sec: i64) -> Event {
        Event {
            element: Some(element.to_string()),
            ..event(EventKind::FormSubmit, offset_sec)
        }
    }

    fn scroll(depth: f64, offset_sec: i64) -> Event {
        Event {
            scroll_depth: Some(depth),
            ..event(EventKind::Scroll, offset_sec)
        }
    }

    fn tracker(config: AnalyticsConfig) -> (ConversionGoalTracker, Arc<CaptureSink>) {
        let sink = capture_sink();
        (ConversionGoalTracker::new(&config, sink.clone()), sink)
    }

    fn goal_config(goals: Vec<ConversionGoal>) -> AnalyticsConfig {
        AnalyticsConfig {
            goals,
            ..Default::default()
        }
    }

    #[test]
    fn test_goal_achieved_exactly_once() {
        let (mut tracker, sink) = tracker(goal_config(vec![ConversionGoal::new(
            "contact",
            "Contact",
            GoalCondition::FormSubmit { element: "contact-form".into() },
        )
        .with_value(100.0)]));
        let s = session("/contact");

        let first = tracker.observe(&s, &submit("contact-form", 1));
        assert_eq!(first, vec!["contact".to_string()]);
        for offset in 2..6 {
            assert!(tracker.observe(&s, &submit("contact-form", offset)).is_empty());
        }

        assert!(tracker.goal("contact").unwrap().achieved);
        assert_eq!(sink.count_named(CONVERSION_EVENT), 1);

        let emission = &sink.emissions()[0];
        assert_eq!(emission.properties["goal_id"], "contact");
        assert_eq!(emission.properties["value"], 100.0);
        assert_eq!(emission.properties["transaction_id"], json!(s.id));
        assert_eq!(emission.properties["currency"], "USD");
    }

    #[test]
    fn test_non_matching_events_leave_goal_pending() {
        let (mut tracker, sink) = tracker(goal_config(vec![ConversionGoal::new(
            "cta",
            "CTA click",
            GoalCondition::Click { element: "cta".into() },
        )]));
        let s = session("/");

        let other_click = Event {
            point: Some(Point::new(1, 1)),
            element: Some("nav".into()),
            ..event(EventKind::Click, 1)
        };
        let hover_on_cta = Event {
            point: Some(Point::new(1, 1)),
            element: Some("cta".into()),
            ..event(EventKind::Hover, 2)
        };
        tracker.observe(&s, &other_click);
        tracker.observe(&s, &hover_on_cta);

        assert!(tracker.achieved_goals().is_empty());
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn test_page_view_goal_matches_session_url_or_value() {
        let (mut tracker, _) = tracker(goal_config(vec![ConversionGoal::new(
            "pricing",
            "Pricing",
            GoalCondition::PageView { path: "/pricing".into() },
        )]));

        tracker.observe(&session("/"), &event(EventKind::PageView, 1));
        assert!(tracker.achieved_goals().is_empty());

        let spa_navigation = Event {
            value: Some(json!("/pricing")),
            ..event(EventKind::PageView, 2)
        };
        tracker.observe(&session("/"), &spa_navigation);
        assert_eq!(tracker.achieved_goals(), vec!["pricing"]);
    }

    #[test]
    fn test_scroll_threshold_uses_running_max() {
        let (mut tracker, sink) = tracker(goal_config(vec![ConversionGoal::new(
            "deep",
            "Deep scroll",
            GoalCondition::ScrollDepth { threshold: 75.0 },
        )]));
        let s = session("/blog");

        tracker.observe(&s, &scroll(40.0, 1));
        tracker.observe(&s, &scroll(74.9, 2));
        assert!(tracker.achieved_goals().is_empty());

        tracker.observe(&s, &scroll(80.0, 3));
        tracker.observe(&s, &scroll(30.0, 4));
        tracker.observe(&s, &scroll(95.0, 5));

        assert_eq!(tracker.achieved_goals(), vec!["deep"]);
        assert_eq!(sink.count(), 1);
    }

    #[test]
    fn test_time_on_page_via_events_and_tick() {
        let (mut tracker, sink) = tracker(goal_config(vec![ConversionGoal::new(
            "engaged",
            "Engaged",
            GoalCondition::TimeOnPage { seconds: 60 },
        )]));
        let s = session("/");

        tracker.observe(&s, &event(EventKind::PageView, 10));
        assert!(tracker.tick(&s, t0() + Duration::seconds(59)).is_empty());

        assert_eq!(tracker.tick(&s, t0() + Duration::seconds(60)), vec!["engaged".to_string()]);
        assert!(tracker.tick(&s, t0() + Duration::seconds(120)).is_empty());
        assert_eq!(sink.count(), 1);
    }

    #[test]
    fn test_time_on_page_from_event_timestamp() {
        let (mut tracker, _) = tracker(goal_config(vec![ConversionGoal::new(
            "engaged",
            "Engaged",
            GoalCondition::TimeOnPage { seconds: 30 },
        )]));
        let s = session("/");

        tracker.observe(&s, &event(EventKind::Scroll, 45));
        assert_eq!(tracker.achieved_goals(), vec!["engaged"]);
    }

    fn two_step_funnel() -> AnalyticsConfig {
        AnalyticsConfig {
            funnels: vec![ConversionFunnel::new(
                "signup",
                "Signup",
                vec![
                    ConversionGoal::new("a", "Step A", GoalCondition::Click { element: "start".into() }),
                    ConversionGoal::new("b", "Step B", GoalCondition::FormSubmit { element: "signup".into() }),
                ],
            )],
            ..Default::default()
        }
    }

    fn click_on(element: &str, offset_sec: i64) -> Event {
        Event {
            point: Some(Point::new(0, 0)),
            element: Some(element.to_string()),
            ..event(EventKind::Click, offset_sec)
        }
    }

    #[test]
    fn test_funnel_in_order() {
        let (mut tracker, sink) = tracker(two_step_funnel());
        let s = session("/");

        tracker.observe(&s, &click_on("start", 1));
        let funnel = tracker.funnel("signup").unwrap();
        assert_eq!(funnel.current_step, 1);
        assert!(!funnel.completed);

        tracker.observe(&s, &submit("signup", 2));
        let funnel = tracker.funnel("signup").unwrap();
        assert_eq!(funnel.current_step, 2);
        assert!(funnel.completed);
        assert_eq!(sink.count_named(FUNNEL_COMPLETED_EVENT), 1);
    }

    #[test]
    fn test_funnel_out_of_order_completion_is_monotonic() {
        let (mut tracker, sink) = tracker(two_step_funnel());
        let s = session("/");

        tracker.observe(&s, &submit("signup", 1));
        let funnel = tracker.funnel("signup").unwrap();
        assert!(funnel.completed);
        assert_eq!(funnel.current_step, 2);
        assert!(!funnel.steps[0].achieved);

        // Step A arriving later never moves the pointer backwards
        tracker.observe(&s, &click_on("start", 2));
        let funnel = tracker.funnel("signup").unwrap();
        assert_eq!(funnel.current_step, 2);
        assert!(funnel.completed);
        assert!(funnel.steps[0].achieved);
        assert_eq!(sink.count_named(FUNNEL_COMPLETED_EVENT), 1);
    }

    #[test]
    fn test_funnel_without_steps_is_skipped() {
        let config = AnalyticsConfig {
            funnels: vec![
                ConversionFunnel::new("empty", "No steps", Vec::new()),
                ConversionFunnel::new(
                    "exit",
                    "Exit",
                    vec![ConversionGoal::new("leave", "Leave", GoalCondition::ExitIntent)],
                ),
            ],
            ..Default::default()
        };
        let sink = capture_sink();
        let mut tracker = ConversionGoalTracker::new(&config, sink.clone());
        let s = session("/");

        assert!(tracker.funnel("empty").is_none());
        tracker.observe(&s, &event(EventKind::PageView, 1));
        assert_eq!(sink.count_named(FUNNEL_COMPLETED_EVENT), 0);

        tracker.observe(&s, &event(EventKind::ExitIntent, 2));
        assert_eq!(sink.count_named(FUNNEL_COMPLETED_EVENT), 1);
    }

    #[test]
    fn test_independent_trackers() {
        let config = AnalyticsConfig::site_defaults();
        let (mut first, _) = tracker(config.clone());
        let (second, _) = tracker(config);

        first.observe(&session("/contact"), &submit("contact-form", 1));
        assert_eq!(first.achieved_goals(), vec!["contact_form"]);
        assert!(second.achieved_goals().is_empty());
    }

    #[test]
    fn test_catalog_starts_pending_and_resets() {
        let mut config = goal_config(vec![ConversionGoal::new(
            "exit",
            "Exit",
            GoalCondition::ExitIntent,
        )]);
        config.goals[0].achieved = true;

        let (mut tracker, sink) = tracker(config);
        assert!(tracker.achieved_goals().is_empty());

        let s = session("/");
        tracker.observe(&s, &event(EventKind::ExitIntent, 1));
        assert_eq!(tracker.achieved_goals(), vec!["exit"]);

        tracker.reset();
        assert!(tracker.achieved_goals().is_empty());
        tracker.observe(&s, &event(EventKind::ExitIntent, 2));
        assert_eq!(sink.count(), 2);
    }
}
