//! Deterministic split and experiment-arm assignment.
//!
//! Both assignments hash the conversation id with FNV-1a 64 (offset basis
//! 0xcbf2_9ce4_8422_2325, prime 0x0000_0100_0000_01b3). The hash is
//! implemented here, not taken from `std` or a crate, because split and
//! arm membership must never reshuffle when a dependency changes its
//! hasher. Arm assignment prefixes the id with `ab::` so it is
//! uncorrelated with split assignment.

use crate::domain::models::{ExperimentConfig, Split};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a 64-bit hash of a byte string.
pub fn fnv1a64(input: &str) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in input.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Assigns conversations to dataset splits and experiment arms.
#[derive(Debug, Clone)]
pub struct ConversationAssigner {
    experiment: ExperimentConfig,
}

impl ConversationAssigner {
    pub fn new(experiment: ExperimentConfig) -> Self {
        Self { experiment }
    }

    /// Split for a conversation: hash into [0,100), then
    /// [0,70) train, [70,90) validation, [90,100) test. Every turn of a
    /// conversation lands in the same split, preventing train/test leakage
    /// across turns.
    pub fn assign_split(conversation_id: &str) -> Split {
        match fnv1a64(conversation_id) % 100 {
            0..=69 => Split::Train,
            70..=89 => Split::Validation,
            _ => Split::Test,
        }
    }

    /// Experiment arm for a conversation. Stable across calls and process
    /// restarts; the default arm when the experiment is disabled or no
    /// arms are configured.
    pub fn assign_arm(&self, conversation_id: &str) -> String {
        if !self.experiment.enabled || self.experiment.arms.is_empty() {
            return self.experiment.default_arm.clone();
        }

        let index = fnv1a64(&format!("ab::{conversation_id}")) % self.experiment.arms.len() as u64;
        self.experiment.arms[index as usize].clone()
    }
}
