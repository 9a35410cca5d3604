//! Analytics pipeline orchestration
//!
//! `AnalyticsEngine` is the public entry point. It wires the event collector to
//! the session store and, independently, to the conversion goal tracker, and
//! exposes the per-URL metric and report queries.
//!
//! Pipeline: record → EventCollector → SessionStore (append) → ConversionGoalTracker
//!           query → SessionStore (read) → MetricsAggregator → ReportGenerator

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

use crate::aggregator::MetricsAggregator;
use crate::collector::EventCollector;
use crate::config::AnalyticsConfig;
use crate::conversion::ConversionGoalTracker;
use crate::error::AnalyticsError;
use crate::report::ReportGenerator;
use crate::session::SessionStore;
use crate::sink::{noop_sink, AnalyticsSink, TracingSink};
use crate::types::{
    BehaviorReport, ClickMapData, EventInput, HeatmapDataPoint, RecordOutcome, ReportPeriod,
    ScrollDepthData, SessionDescriptor,
};

/// Stateful behavioral analytics engine
pub struct AnalyticsEngine {
    store: SessionStore,
    tracker: ConversionGoalTracker,
    retention_days: u32,
}

impl Default for AnalyticsEngine {
    fn default() -> Self {
        Self::new(AnalyticsConfig::default(), noop_sink())
    }
}

impl AnalyticsEngine {
    /// Create an engine from a configuration and the sink conversions are reported to
    pub fn new(config: AnalyticsConfig, sink: Arc<dyn AnalyticsSink>) -> Self {
        info!(
            goals = config.goals.len(),
            funnels = config.funnels.len(),
            retention_days = config.retention_days,
            "analytics engine initialised"
        );
        Self {
            tracker: ConversionGoalTracker::new(&config, sink),
            store: SessionStore::new(),
            retention_days: config.retention_days,
        }
    }

    /// Site goal catalog with emissions logged through `tracing`
    pub fn with_defaults() -> Self {
        Self::new(AnalyticsConfig::site_defaults(), Arc::new(TracingSink))
    }

    pub fn start_session(&mut self, descriptor: SessionDescriptor) -> String {
        self.store.start_session(descriptor)
    }

    pub fn start_session_at(&mut self, descriptor: SessionDescriptor, at: DateTime<Utc>) -> String {
        self.store.start_session_at(descriptor, at)
    }

    /// Close a session; unknown ids are ignored
    pub fn end_session(&mut self, session_id: &str) -> bool {
        self.end_session_at(session_id, Utc::now())
    }

    pub fn end_session_at(&mut self, session_id: &str, at: DateTime<Utc>) -> bool {
        let ended = self.store.end_session_at(session_id, at);
        if ended {
            self.tracker.forget_session(session_id);
        }
        ended
    }

    /// Record an event observed now
    pub fn record(&mut self, session_id: &str, input: EventInput) -> RecordOutcome {
        self.record_at(session_id, input, Utc::now())
    }

    /// Record an event observed at `at`.
    ///
    /// Accepted events are stored and then offered to the conversion tracker;
    /// rejected events and unknown sessions reach neither.
    pub fn record_at(&mut self, session_id: &str, input: EventInput, at: DateTime<Utc>) -> RecordOutcome {
        let outcome = EventCollector::record_at(&mut self.store, session_id, input, at);
        if outcome.is_recorded() {
            if let Some(session) = self.store.get(session_id) {
                if let Some(event) = session.events.last() {
                    self.tracker.observe(session, event);
                }
            }
        }
        outcome
    }

    /// Evaluate time-on-page goals for a session at the current time
    pub fn tick(&mut self, session_id: &str) -> Vec<String> {
        self.tick_at(session_id, Utc::now())
    }

    pub fn tick_at(&mut self, session_id: &str, now: DateTime<Utc>) -> Vec<String> {
        match self.store.get(session_id) {
            Some(session) if session.is_active() => self.tracker.tick(session, now),
            _ => Vec::new(),
        }
    }

    pub fn heatmap(&self, url: &str) -> Vec<HeatmapDataPoint> {
        MetricsAggregator::heatmap(&self.store.sessions_for(url))
    }

    pub fn scroll_depth(&self, url: &str) -> ScrollDepthData {
        MetricsAggregator::scroll_depth(url, &self.store.sessions_for(url))
    }

    pub fn click_map(&self, url: &str) -> Vec<ClickMapData> {
        MetricsAggregator::click_map(&self.store.sessions_for(url))
    }

    pub fn generate_report(&self, url: &str, period: ReportPeriod) -> BehaviorReport {
        self.generate_report_at(url, period, Utc::now())
    }

    pub fn generate_report_at(&self, url: &str, period: ReportPeriod, now: DateTime<Utc>) -> BehaviorReport {
        ReportGenerator::generate(url, period, &self.store.sessions_for(url), now)
    }

    /// Drop sessions past the configured retention window
    pub fn cleanup(&mut self) -> usize {
        self.cleanup_at(Utc::now())
    }

    pub fn cleanup_at(&mut self, now: DateTime<Utc>) -> usize {
        let removed = self.store.cleanup_at(self.retention_days, now);
        self.prune_tracker();
        removed
    }

    /// Drop sessions older than an explicit retention window
    pub fn cleanup_older_than(&mut self, retention_days: u32) -> usize {
        let removed = self.store.cleanup(retention_days);
        self.prune_tracker();
        removed
    }

    /// Save stored sessions as a JSON snapshot
    pub fn save_sessions(&self) -> Result<String, AnalyticsError> {
        self.store.to_json()
    }

    /// Replace stored sessions with a JSON snapshot
    pub fn load_sessions(&mut self, json: &str) -> Result<(), AnalyticsError> {
        self.store = SessionStore::from_json(json)?;
        self.prune_tracker();
        Ok(())
    }

    /// Release tracker progress for sessions the store no longer holds
    fn prune_tracker(&mut self) {
        let store = &self.store;
        self.tracker.retain_sessions(|id| store.get(id).is_some());
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn tracker(&self) -> &ConversionGoalTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut ConversionGoalTracker {
        &mut self.tracker
    }

    pub fn retention_days(&self) -> u32 {
        self.retention_days
    }
}
