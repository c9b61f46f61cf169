/**
 * Configuration Module
 *
 * DESIGN DECISION: single flat TOML document + environment overrides
 * WHY: the bus runs as one process per knowledge tree; there is no
 * multi-stakeholder hierarchy to merge, so layering is reduced to the
 * simplest form that still lets an operator override file values without
 * editing the file (environment wins over file wins over built-in default).
 *
 * PATTERN: `ConfigLoader` mirrors the teacher's loader.rs load-and-merge
 * shape, collapsed from four tiers to two.
 */

pub mod loader;
pub mod options;

pub use loader::ConfigLoader;
pub use options::{
    ChannelOptions, CircuitBreakerOptions, CoherenceOptions, EvaluatorOptions, PipelineOptions,
    ScbConfig, StoreOptions,
};
