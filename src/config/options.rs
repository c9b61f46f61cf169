/**
 * Recognized configuration options
 *
 * DESIGN DECISION: one struct per component, `#[serde(default)]` throughout
 * WHY: an operator's `scb.toml` only needs to name the options it wants to
 * override; every field not present falls back to the value named in
 * (spec §6), matching the teacher's `#[serde(default)]` convention in
 * `config/loader.rs`.
 */

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Complete recognized configuration surface for a coherence bus instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScbConfig {
    pub circuit_breaker: CircuitBreakerOptions,
    pub channels: HashMap<String, ChannelOptions>,
    pub evaluator: EvaluatorOptions,
    pub store: StoreOptions,
    pub pipeline: PipelineOptions,
    pub coherence: CoherenceOptions,
}

impl Default for ScbConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerOptions::default(),
            channels: default_channels(),
            evaluator: EvaluatorOptions::default(),
            store: StoreOptions::default(),
            pipeline: PipelineOptions::default(),
            coherence: CoherenceOptions::default(),
        }
    }
}

/// Default caps/retention for the four fixed channels (§4.A).
fn default_channels() -> HashMap<String, ChannelOptions> {
    let mut channels = HashMap::new();
    channels.insert(
        "context_mutations".to_string(),
        ChannelOptions { max_len: 10_000, retention_days: 7 },
    );
    channels.insert(
        "semantic_validation".to_string(),
        ChannelOptions { max_len: 5_000, retention_days: 3 },
    );
    channels.insert(
        "coherence_alerts".to_string(),
        ChannelOptions { max_len: 1_000, retention_days: 30 },
    );
    channels.insert(
        "fragment_updates".to_string(),
        ChannelOptions { max_len: 20_000, retention_days: 14 },
    );
    channels
}

/// `circuit_breaker.*` options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerOptions {
    pub failure_threshold: u32,
    pub recovery_threshold: u32,
    pub timeout_window_s: u64,
}

impl Default for CircuitBreakerOptions {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_threshold: 5,
            timeout_window_s: 300,
        }
    }
}

/// `channels.<name>.*` options.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelOptions {
    pub max_len: usize,
    pub retention_days: u32,
}

/// `evaluator.<kind>.deadline_ms` options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EvaluatorOptions {
    pub drift_deadline_ms: u64,
    pub contradiction_deadline_ms: u64,
    pub belief_deadline_ms: u64,
    pub utility_deadline_ms: u64,
    pub drift_magnitude_threshold: f64,
    pub contradiction_confidence_threshold: f64,
    pub utility_floor_critical: f64,
    pub utility_floor_standard: f64,
}

impl Default for EvaluatorOptions {
    fn default() -> Self {
        Self {
            drift_deadline_ms: 200,
            contradiction_deadline_ms: 500,
            belief_deadline_ms: 300,
            utility_deadline_ms: 100,
            drift_magnitude_threshold: 0.78,
            contradiction_confidence_threshold: 0.85,
            utility_floor_critical: 0.3,
            utility_floor_standard: 0.6,
        }
    }
}

/// `store.*` options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreOptions {
    pub snapshot_every: u64,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self { snapshot_every: 256 }
    }
}

/// `pipeline.*` options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineOptions {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 100,
        }
    }
}

/// `coherence.min_score` and `confidence_floor.*` options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoherenceOptions {
    pub min_score: f64,
    pub confidence_floor_high: f64,
    pub confidence_floor_medium: f64,
    pub confidence_floor_low: f64,
}

impl Default for CoherenceOptions {
    fn default() -> Self {
        Self {
            min_score: 0.7,
            confidence_floor_high: 0.8,
            confidence_floor_medium: 0.6,
            confidence_floor_low: 0.4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_channels_match_spec_caps() {
        let cfg = ScbConfig::default();
        assert_eq!(cfg.channels["context_mutations"].max_len, 10_000);
        assert_eq!(cfg.channels["fragment_updates"].retention_days, 14);
    }

    #[test]
    fn default_confidence_floors_match_criticality_table() {
        let cfg = ScbConfig::default();
        assert_eq!(cfg.coherence.confidence_floor_high, 0.8);
        assert_eq!(cfg.coherence.confidence_floor_medium, 0.6);
        assert_eq!(cfg.coherence.confidence_floor_low, 0.4);
    }

    #[test]
    fn toml_round_trips_with_partial_overrides() {
        let partial = "[coherence]\nmin_score = 0.75\n";
        let cfg: ScbConfig = toml::from_str(partial).unwrap();
        assert_eq!(cfg.coherence.min_score, 0.75);
        assert_eq!(cfg.pipeline.max_retries, 3);
    }
}
