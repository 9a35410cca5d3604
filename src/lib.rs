//! Pulse Analytics - In-memory behavioral analytics core for the marketing site
//!
//! Pulse captures page sessions and behavioral events and turns them into
//! per-URL metrics through a deterministic pipeline: event collection →
//! session storage → metric aggregation → behavior report.
//!
//! ## Modules
//!
//! - **Sessions & Events**: `SessionStore` and `EventCollector` ingest and validate events
//! - **Metrics**: `MetricsAggregator` builds heatmaps, scroll depth and click maps
//! - **Reports**: `ReportGenerator` composes per-URL reports with recommendations
//! - **Conversions**: `ConversionGoalTracker` reports goal and funnel completions to a sink

pub mod aggregator;
pub mod collector;
pub mod config;
pub mod conversion;
pub mod error;
pub mod pipeline;
pub mod report;
pub mod session;
pub mod sink;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use aggregator::MetricsAggregator;
pub use collector::EventCollector;
pub use config::AnalyticsConfig;
pub use conversion::ConversionGoalTracker;
pub use error::{AnalyticsError, EventRejection};
pub use pipeline::AnalyticsEngine;
pub use report::ReportGenerator;
pub use session::SessionStore;
pub use sink::{AnalyticsSink, CaptureSink, ChannelSink, Emission, NoOpSink, TracingSink};
pub use types::{
    BehaviorReport, ClickMapData, ConversionFunnel, ConversionGoal, Event, EventInput, EventKind,
    GoalCondition, HeatmapDataPoint, Point, RecordOutcome, ReportPeriod, ScrollDepthData, Session,
    SessionDescriptor,
};

/// Pulse version embedded in CLI and FFI output
pub const PULSE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the CLI
pub const PRODUCER_NAME: &str = "pulse-analytics";
