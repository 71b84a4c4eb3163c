// Graceful degradation - which non-essential features are running reduced or switched off

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Overall degradation, derived purely from feature counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationLevel {
    Normal,
    Minor,
    Moderate,
    Severe,
}

impl DegradationLevel {
    pub fn from_counts(degraded: usize, disabled: usize) -> Self {
        if degraded == 0 && disabled == 0 {
            DegradationLevel::Normal
        } else if disabled >= 2 || degraded >= 5 {
            DegradationLevel::Severe
        } else if disabled == 1 || degraded >= 3 {
            DegradationLevel::Moderate
        } else {
            DegradationLevel::Minor
        }
    }
}

impl std::fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DegradationLevel::Normal => write!(f, "normal"),
            DegradationLevel::Minor => write!(f, "minor"),
            DegradationLevel::Moderate => write!(f, "moderate"),
            DegradationLevel::Severe => write!(f, "severe"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureMode {
    /// Still working, with reduced capability
    Degraded,
    /// Switched off
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub mode: FeatureMode,
    pub cause: String,
    pub mitigation: Option<String>,
    /// ISO-8601, when the feature entered its current mode
    pub since: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradationStatus {
    pub degraded_features: usize,
    pub disabled_features: usize,
    pub level: DegradationLevel,
    pub features: BTreeMap<String, FeatureRecord>,
}

#[derive(Debug, Default)]
pub struct GracefulDegradation {
    features: BTreeMap<String, FeatureRecord>,
}

impl GracefulDegradation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a feature degraded. A disabled feature stays disabled.
    pub fn degrade_feature(&mut self, name: &str, cause: &str, mitigation: Option<&str>) {
        match self.features.get_mut(name) {
            Some(record) if record.mode == FeatureMode::Disabled => {
                debug!(feature = name, "feature already disabled, not degrading");
            }
            Some(record) => {
                record.cause = cause.to_string();
                record.mitigation = mitigation.map(str::to_string);
            }
            None => {
                warn!(feature = name, cause, "feature degraded");
                self.features.insert(
                    name.to_string(),
                    FeatureRecord {
                        mode: FeatureMode::Degraded,
                        cause: cause.to_string(),
                        mitigation: mitigation.map(str::to_string),
                        since: Utc::now().to_rfc3339(),
                    },
                );
            }
        }
    }

    pub fn disable_feature(&mut self, name: &str, cause: &str) {
        match self.features.get_mut(name) {
            Some(record) if record.mode == FeatureMode::Disabled => {
                record.cause = cause.to_string();
            }
            Some(record) => {
                warn!(feature = name, cause, "degraded feature disabled");
                record.mode = FeatureMode::Disabled;
                record.cause = cause.to_string();
                record.mitigation = None;
                record.since = Utc::now().to_rfc3339();
            }
            None => {
                warn!(feature = name, cause, "feature disabled");
                self.features.insert(
                    name.to_string(),
                    FeatureRecord {
                        mode: FeatureMode::Disabled,
                        cause: cause.to_string(),
                        mitigation: None,
                        since: Utc::now().to_rfc3339(),
                    },
                );
            }
        }
    }

    /// Clear any status for the feature. Returns whether anything changed.
    pub fn recover_feature(&mut self, name: &str) -> bool {
        match self.features.remove(name) {
            Some(record) => {
                info!(feature = name, previous = ?record.mode, "feature recovered");
                true
            }
            None => false,
        }
    }

    /// Clear the feature only if it is degraded. A disabled feature stays
    /// disabled until `recover_feature` is called for it.
    pub fn recover_degraded(&mut self, name: &str) -> bool {
        match self.features.get(name) {
            Some(record) if record.mode == FeatureMode::Degraded => self.recover_feature(name),
            _ => false,
        }
    }

    pub fn feature(&self, name: &str) -> Option<&FeatureRecord> {
        self.features.get(name)
    }

    pub fn is_disabled(&self, name: &str) -> bool {
        self.features
            .get(name)
            .map(|r| r.mode == FeatureMode::Disabled)
            .unwrap_or(false)
    }

    pub fn get_status(&self) -> DegradationStatus {
        let disabled = self
            .features
            .values()
            .filter(|r| r.mode == FeatureMode::Disabled)
            .count();
        let degraded = self.features.len() - disabled;

        DegradationStatus {
            degraded_features: degraded,
            disabled_features: disabled,
            level: DegradationLevel::from_counts(degraded, disabled),
            features: self.features.clone(),
        }
    }
}
