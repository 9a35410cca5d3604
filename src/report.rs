//! Behavior report generation
//!
//! Combines aggregated metrics for one URL into a `BehaviorReport` and derives
//! heuristic recommendations from fixed thresholds.

use chrono::{DateTime, Utc};

use crate::aggregator::MetricsAggregator;
use crate::types::{
    BehaviorReport, EventKind, Recommendation, RecommendationKind, ReportPeriod, Session,
};

/// Bounce rate (percent) above which a high-bounce finding is raised
const HIGH_BOUNCE_RATE_PCT: f64 = 50.0;

/// Average scroll depth (percent) below which engagement is considered shallow
const SHALLOW_SCROLL_DEPTH_PCT: f64 = 40.0;

/// Exit-intent rate (percent) above which retention prompts are suggested
const HIGH_EXIT_INTENT_PCT: f64 = 20.0;

/// Average session duration (seconds) below which engagement is considered low
const LOW_SESSION_DURATION_SEC: f64 = 30.0;

/// Number of elements listed in `top_clicked_elements`
const TOP_ELEMENTS: usize = 5;

/// A session with at most this many events counts as a bounce
const BOUNCE_MAX_EVENTS: usize = 1;

/// Report generator
pub struct ReportGenerator;

impl ReportGenerator {
    /// Build the behavior report for `url` from the sessions started within `period`.
    ///
    /// `sessions` may contain other URLs and periods; they are filtered here.
    /// Open sessions are measured up to `now`.
    pub fn generate(
        url: &str,
        period: ReportPeriod,
        sessions: &[&Session],
        now: DateTime<Utc>,
    ) -> BehaviorReport {
        let selected: Vec<&Session> = sessions
            .iter()
            .copied()
            .filter(|s| s.url == url && period.contains(s.started_at))
            .collect();

        let total = selected.len();
        let avg_session_duration_sec = average(selected.iter().map(|s| s.duration_sec(now)), total);
        let bounce_rate = percentage(
            selected.iter().filter(|s| s.events.len() <= BOUNCE_MAX_EVENTS).count(),
            total,
        );
        let exit_intent_rate = percentage(
            selected.iter().filter(|s| s.has_event(EventKind::ExitIntent)).count(),
            total,
        );

        let heatmap = MetricsAggregator::heatmap(&selected);
        let scroll_depth = MetricsAggregator::scroll_depth(url, &selected);
        let mut top_clicked_elements = MetricsAggregator::click_map(&selected);
        top_clicked_elements.truncate(TOP_ELEMENTS);

        let recommendations = recommend(
            bounce_rate,
            scroll_depth.average_depth,
            exit_intent_rate,
            avg_session_duration_sec,
        );

        BehaviorReport {
            url: url.to_string(),
            period,
            generated_at: now,
            total_sessions: total as u32,
            avg_session_duration_sec,
            bounce_rate,
            avg_scroll_depth: scroll_depth.average_depth,
            top_clicked_elements,
            heatmap,
            scroll_depth,
            exit_intent_rate,
            recommendations,
        }
    }
}

/// Evaluate every heuristic independently; falls back to a healthy note so the
/// list is never empty.
fn recommend(
    bounce_rate: f64,
    avg_scroll_depth: f64,
    exit_intent_rate: f64,
    avg_session_duration_sec: f64,
) -> Vec<Recommendation> {
    let mut recommendations = Vec::new();

    if bounce_rate > HIGH_BOUNCE_RATE_PCT {
        recommendations.push(Recommendation {
            kind: RecommendationKind::HighBounceRate,
            message: format!(
                "High bounce rate ({:.1}%). Optimize above-the-fold content and call-to-action placement.",
                bounce_rate
            ),
        });
    }

    if avg_scroll_depth < SHALLOW_SCROLL_DEPTH_PCT {
        recommendations.push(Recommendation {
            kind: RecommendationKind::ShallowScroll,
            message: format!(
                "Low scroll depth ({:.1}%). Review content flow and use clearer headings to pull readers down the page.",
                avg_scroll_depth
            ),
        });
    }

    if exit_intent_rate > HIGH_EXIT_INTENT_PCT {
        recommendations.push(Recommendation {
            kind: RecommendationKind::HighExitIntent,
            message: format!(
                "High exit intent ({:.1}%). Consider retention prompts or a targeted offer.",
                exit_intent_rate
            ),
        });
    }

    if avg_session_duration_sec < LOW_SESSION_DURATION_SEC {
        recommendations.push(Recommendation {
            kind: RecommendationKind::LowEngagement,
            message: format!(
                "Short sessions ({:.0}s on average). Add richer or interactive content to hold attention.",
                avg_session_duration_sec
            ),
        });
    }

    if recommendations.is_empty() {
        recommendations.push(Recommendation {
            kind: RecommendationKind::Healthy,
            message: "User behavior looks healthy. Keep monitoring for changes.".to_string(),
        });
    }

    recommendations
}

fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    part as f64 / total as f64 * 100.0
}

fn average(values: impl Iterator<Item = f64>, count: usize) -> f64 {
    if count == 0 {
        return 0.0;
    }
    values.sum::<f64>() / count as f64
}
