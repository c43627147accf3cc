//! Per-domain routing thresholds with global defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Thresholds applied to one domain's calibrated probability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DomainThresholds {
    /// Minimum calibrated probability to route.
    #[serde(default = "default_tau")]
    pub tau: f64,
    /// Minimum margin over the second-best domain's probability required
    /// to route instead of clarify.
    #[serde(default = "default_delta_top2")]
    pub delta_top2: f64,
}

const fn default_tau() -> f64 {
    0.75
}

const fn default_delta_top2() -> f64 {
    0.1
}

impl Default for DomainThresholds {
    fn default() -> Self {
        Self {
            tau: default_tau(),
            delta_top2: default_delta_top2(),
        }
    }
}

/// Threshold configuration for the decision policy. Read-mostly and
/// reloadable without restarting the online path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ThresholdConfig {
    /// Global defaults for domains without an override.
    #[serde(default)]
    pub default: DomainThresholds,
    /// Per-domain overrides.
    #[serde(default)]
    pub overrides: HashMap<String, DomainThresholds>,
    /// Deterministic tie-break order for exactly equal probabilities.
    /// Domains not listed here rank after listed ones, lexicographically.
    #[serde(default)]
    pub priority: Vec<String>,
}

impl ThresholdConfig {
    /// Thresholds for a domain, falling back to the global defaults.
    pub fn for_domain(&self, domain: &str) -> DomainThresholds {
        self.overrides.get(domain).copied().unwrap_or(self.default)
    }

    /// Rank of a domain in the tie-break order: listed domains by index,
    /// unlisted domains after all listed ones.
    pub fn priority_rank(&self, domain: &str) -> usize {
        self.priority
            .iter()
            .position(|d| d == domain)
            .unwrap_or(self.priority.len())
    }
}
