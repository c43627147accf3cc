//! Multi-signal score fusion.
//!
//! Combines the embedding-similarity score, classifier probability, and
//! rule-engine vote into one raw score per domain using configured weights.
//! When a signal abstains, its weight is redistributed across the present
//! signals for that call only, so an abstaining rule engine does not drag
//! every domain toward zero.

use std::collections::HashMap;

use crate::domain::models::{FusionConfig, SignalScores};

/// Weighted signal fusion. Pure; weight validity is checked at config load.
#[derive(Debug, Clone, Copy)]
pub struct SignalFusion {
    weights: FusionConfig,
}

impl SignalFusion {
    pub fn new(weights: FusionConfig) -> Self {
        Self { weights }
    }

    /// Fuse one domain's signals into a raw score in [0,1].
    ///
    /// Missing signals contribute nothing and the remaining weights are
    /// renormalized. All signals absent yields 0.0. Note that
    /// renormalization can change the ranking between domains when signal
    /// availability differs, which is why abstention is per-call.
    pub fn fuse(&self, scores: &SignalScores) -> f64 {
        let pairs = [
            (self.weights.w_embedding, scores.embedding),
            (self.weights.w_classifier, scores.classifier),
            (self.weights.w_rule, scores.rule),
        ];

        let present_weight: f64 = pairs
            .iter()
            .filter(|(_, score)| score.is_some())
            .map(|(w, _)| w)
            .sum();

        if present_weight <= 0.0 {
            return 0.0;
        }

        pairs
            .iter()
            .filter_map(|(w, score)| score.map(|s| w / present_weight * s.clamp(0.0, 1.0)))
            .sum()
    }

    /// Fuse every candidate domain's signals.
    pub fn fuse_all(&self, signals: &HashMap<String, SignalScores>) -> HashMap<String, f64> {
        signals
            .iter()
            .map(|(domain, scores)| (domain.clone(), self.fuse(scores)))
            .collect()
    }
}
