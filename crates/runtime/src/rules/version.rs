//! Versioned serialisation of the enabled rule set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Rule;

/// A frozen copy of the enabled rules, tagged with a timestamp version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyVersion {
    /// `vYYYYMMDDHHMMSS` in UTC.
    pub version: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl PolicyVersion {
    pub fn from_rules(rules: &[Rule]) -> Result<Self, serde_json::Error> {
        let enabled: Vec<&Rule> = rules.iter().filter(|r| r.enabled).collect();
        let now = Utc::now();
        Ok(Self {
            version: now.format("v%Y%m%d%H%M%S").to_string(),
            kind: "rule".to_string(),
            config: serde_json::to_value(enabled)?,
            created_at: now,
        })
    }

    pub fn rule_count(&self) -> usize {
        self.config.as_array().map(Vec::len).unwrap_or(0)
    }
}
