//! Tracker configuration
//!
//! Goal and funnel catalogs are declared once and handed to the tracker at
//! construction, so independent trackers can run side by side.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::AnalyticsError;
use crate::session::DEFAULT_RETENTION_DAYS;
use crate::types::{ConversionFunnel, ConversionGoal, GoalCondition};

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Sessions older than this are dropped by cleanup
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Conversion goal catalog
    #[serde(default)]
    pub goals: Vec<ConversionGoal>,
    /// Funnel catalog
    #[serde(default)]
    pub funnels: Vec<ConversionFunnel>,
}

fn default_retention_days() -> u32 {
    DEFAULT_RETENTION_DAYS
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            retention_days: DEFAULT_RETENTION_DAYS,
            goals: Vec::new(),
            funnels: Vec::new(),
        }
    }
}

impl AnalyticsConfig {
    /// Catalog used by the marketing site
    pub fn site_defaults() -> Self {
        Self {
            retention_days: DEFAULT_RETENTION_DAYS,
            goals: vec![
                ConversionGoal::new(
                    "demo_request",
                    "Demo request",
                    GoalCondition::FormSubmit { element: "demo-form".into() },
                )
                .with_value(250.0),
                ConversionGoal::new(
                    "contact_form",
                    "Contact form submitted",
                    GoalCondition::FormSubmit { element: "contact-form".into() },
                )
                .with_value(100.0),
                ConversionGoal::new(
                    "pricing_view",
                    "Pricing page viewed",
                    GoalCondition::PageView { path: "/pricing".into() },
                )
                .with_value(10.0),
                ConversionGoal::new(
                    "deep_scroll",
                    "Scrolled 75% of a page",
                    GoalCondition::ScrollDepth { threshold: 75.0 },
                )
                .with_value(5.0),
                ConversionGoal::new(
                    "engaged_visit",
                    "Spent a minute on a page",
                    GoalCondition::TimeOnPage { seconds: 60 },
                )
                .with_value(5.0),
            ],
            funnels: vec![ConversionFunnel::new(
                "contact_funnel",
                "Landing to contact",
                vec![
                    ConversionGoal::new(
                        "landing",
                        "Landing page",
                        GoalCondition::PageView { path: "/".into() },
                    ),
                    ConversionGoal::new(
                        "pricing",
                        "Pricing page",
                        GoalCondition::PageView { path: "/pricing".into() },
                    ),
                    ConversionGoal::new(
                        "contact",
                        "Contact form",
                        GoalCondition::FormSubmit { element: "contact-form".into() },
                    ),
                ],
            )],
        }
    }

    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> Result<Self, AnalyticsError> {
        let config: AnalyticsConfig = serde_json::from_str(json)
            .map_err(|e| AnalyticsError::ParseError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file
    pub fn from_file(path: &Path) -> Result<Self, AnalyticsError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String, AnalyticsError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check catalog consistency
    pub fn validate(&self) -> Result<(), AnalyticsError> {
        let mut ids = HashSet::new();
        for goal in &self.goals {
            if !ids.insert(goal.id.as_str()) {
                return Err(AnalyticsError::InvalidConfig(format!(
                    "duplicate goal id '{}'",
                    goal.id
                )));
            }
            validate_condition(&goal.id, &goal.condition)?;
        }

        let mut funnel_ids = HashSet::new();
        for funnel in &self.funnels {
            if !funnel_ids.insert(funnel.id.as_str()) {
                return Err(AnalyticsError::InvalidConfig(format!(
                    "duplicate funnel id '{}'",
                    funnel.id
                )));
            }
            if funnel.steps.is_empty() {
                return Err(AnalyticsError::InvalidConfig(format!(
                    "funnel '{}' has no steps",
                    funnel.id
                )));
            }
            for step in &funnel.steps {
                validate_condition(&step.id, &step.condition)?;
            }
        }

        Ok(())
    }
}

fn validate_condition(id: &str, condition: &GoalCondition) -> Result<(), AnalyticsError> {
    match condition {
        GoalCondition::ScrollDepth { threshold }
            if !threshold.is_finite() || *threshold < 0.0 || *threshold > 100.0 =>
        {
            Err(AnalyticsError::InvalidConfig(format!(
                "goal '{}' scroll threshold {} is outside 0-100",
                id, threshold
            )))
        }
        GoalCondition::PageView { path } if path.is_empty() => Err(AnalyticsError::InvalidConfig(
            format!("goal '{}' has an empty page path", id),
        )),
        GoalCondition::Click { element }
        | GoalCondition::FormSubmit { element }
        | GoalCondition::InputFocus { element }
        | GoalCondition::InputChange { element }
            if element.is_empty() =>
        {
            Err(AnalyticsError::InvalidConfig(format!(
                "goal '{}' has an empty element target",
                id
            )))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AnalyticsConfig::default();
        assert_eq!(config.retention_days, 30);
        assert!(config.goals.is_empty());
        assert!(config.funnels.is_empty());
    }

    #[test]
    fn test_site_defaults_are_valid() {
        let config = AnalyticsConfig::site_defaults();
        assert!(config.validate().is_ok());
        assert_eq!(config.goals.len(), 5);
        assert_eq!(config.funnels[0].steps.len(), 3);
    }

    #[test]
    fn test_from_json_with_defaults() {
        let json = r#"{
            "goals": [
                { "id": "demo", "name": "Demo", "condition": { "kind": "form_submit", "element": "demo-form" }, "value": 250 }
            ]
        }"#;

        let config = AnalyticsConfig::from_json(json).unwrap();
        assert_eq!(config.retention_days, 30);
        assert_eq!(config.goals[0].value, 250.0);
        assert!(!config.goals[0].achieved);
    }

    #[test]
    fn test_duplicate_goal_rejected() {
        let mut config = AnalyticsConfig::site_defaults();
        let dup = config.goals[0].clone();
        config.goals.push(dup);

        assert!(matches!(config.validate(), Err(AnalyticsError::InvalidConfig(_))));
    }

    #[test]
    fn test_empty_funnel_rejected() {
        let mut config = AnalyticsConfig::default();
        config.funnels.push(ConversionFunnel::new("f", "Empty", vec![]));

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_scroll_threshold_rejected() {
        let json = r#"{
            "goals": [
                { "id": "s", "name": "S", "condition": { "kind": "scroll_depth", "threshold": 150 } }
            ]
        }"#;

        assert!(matches!(
            AnalyticsConfig::from_json(json),
            Err(AnalyticsError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_roundtrip() {
        let config = AnalyticsConfig::site_defaults();
        let json = config.to_json().unwrap();
        let parsed = AnalyticsConfig::from_json(&json).unwrap();
        assert_eq!(parsed.goals, config.goals);
    }
}
