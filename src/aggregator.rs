//! Derived metric aggregation
//!
//! Computes heatmap points, scroll depth distributions and click maps from a set
//! of sessions. Every call is a fresh computation over the sessions it is given;
//! nothing is cached.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

use crate::types::{
    ClickMapData, EventKind, HeatmapDataPoint, Point, ScrollDepthData, Session,
    SCROLL_HISTOGRAM_BUCKETS,
};

/// Width of one histogram bucket in percent
const BUCKET_WIDTH: f64 = 100.0 / SCROLL_HISTOGRAM_BUCKETS as f64;

/// Aggregator for per-URL behavioral metrics
pub struct MetricsAggregator;

impl MetricsAggregator {
    /// Bucket click events by exact coordinate.
    ///
    /// Points are ordered top-to-bottom, then left-to-right.
    pub fn heatmap(sessions: &[&Session]) -> Vec<HeatmapDataPoint> {
        // (y, x) keys give row-major order
        let mut buckets: BTreeMap<(i32, i32), (u32, Option<(DateTime<Utc>, String)>)> =
            BTreeMap::new();

        for event in sessions
            .iter()
            .flat_map(|s| s.events.iter())
            .filter(|e| e.kind == EventKind::Click)
        {
            let Some(point) = event.point else {
                continue;
            };

            let (count, label) = buckets.entry((point.y, point.x)).or_insert((0, None));
            *count += 1;
            if let Some(element) = &event.element {
                let newer = label
                    .as_ref()
                    .map_or(true, |(seen_at, _)| event.timestamp >= *seen_at);
                if newer {
                    *label = Some((event.timestamp, element.clone()));
                }
            }
        }

        buckets
            .into_iter()
            .map(|((y, x), (count, label))| HeatmapDataPoint {
                x,
                y,
                count,
                element: label.map(|(_, element)| element),
            })
            .collect()
    }

    /// Scroll depth aggregate over the sessions of `url`.
    ///
    /// Sessions without scroll events are left out of the average and histogram.
    pub fn scroll_depth(url: &str, sessions: &[&Session]) -> ScrollDepthData {
        let per_session: Vec<f64> = sessions.iter().filter_map(|s| s.max_scroll_depth()).collect();

        let mut histogram = [0u32; SCROLL_HISTOGRAM_BUCKETS];
        for depth in &per_session {
            histogram[histogram_bucket(*depth)] += 1;
        }

        let max_depth = per_session.iter().copied().fold(0.0, f64::max);
        let average_depth = if per_session.is_empty() {
            0.0
        } else {
            per_session.iter().sum::<f64>() / per_session.len() as f64
        };

        ScrollDepthData {
            url: url.to_string(),
            max_depth,
            average_depth,
            sessions: per_session.len() as u32,
            histogram,
        }
    }

    /// Count clicks per element label.
    ///
    /// Clicks without a label are skipped. Each entry carries the coordinate of
    /// the element's most recent click. Ordered by descending count, then label.
    pub fn click_map(sessions: &[&Session]) -> Vec<ClickMapData> {
        let mut elements: HashMap<&str, (u32, DateTime<Utc>, Point)> = HashMap::new();

        for event in sessions
            .iter()
            .flat_map(|s| s.events.iter())
            .filter(|e| e.kind == EventKind::Click)
        {
            let (Some(element), Some(point)) = (event.element.as_deref(), event.point) else {
                continue;
            };

            elements
                .entry(element)
                .and_modify(|(count, seen_at, last)| {
                    *count += 1;
                    if event.timestamp >= *seen_at {
                        *seen_at = event.timestamp;
                        *last = point;
                    }
                })
                .or_insert((1, event.timestamp, point));
        }

        let mut map: Vec<ClickMapData> = elements
            .into_iter()
            .map(|(element, (count, _, point))| ClickMapData {
                element: element.to_string(),
                count,
                x: point.x,
                y: point.y,
            })
            .collect();
        map.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.element.cmp(&b.element)));
        map
    }
}

/// Histogram bucket for a per-session max depth; 100% falls into the last bucket
fn histogram_bucket(depth: f64) -> usize {
    let bucket = (depth / BUCKET_WIDTH).floor();
    if bucket <= 0.0 {
        0
    } else {
        (bucket as usize).min(SCROLL_HISTOGRAM_BUCKETS - 1)
    }
}
