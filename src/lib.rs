/**
 * Semantic Coherence Bus — core library
 *
 * DESIGN DECISION: nine top-level modules, one per component in the
 * producer -> bus -> pipeline -> validator -> evaluator pool -> store ->
 * projector -> bus -> consumers data flow, plus `config`/`error` as the
 * ambient layers every component depends on
 * WHY: generalizes the teacher's `lib.rs` module layout (storage, scoring,
 * matching, error, config each as a top-level module with a narrow public
 * surface re-exported at the crate root) to this crate's nine-component
 * core, so a consumer wiring up a bus only ever imports from
 * `scb_core::{bus, store, pipeline, projector, ...}` or the re-exports here
 *
 * # Architecture
 *
 * ```text
 * Producer -> bus::CoherenceBus -> pipeline::MutationPipeline
 *                                      |  validator::validate
 *                                      v
 *                              evaluator::EvaluatorPool
 *                                      v
 *                              store::KnowledgeStore (WAL + snapshot)
 *                                      v
 *                              projector::Projector -> bus -> Consumers
 * ```
 *
 * Every hop above crosses a `circuit_breaker::CircuitBreaker`.
 *
 * # Example
 *
 * ```rust
 * use scb_core::config::ScbConfig;
 * use scb_core::domain::KnowledgeTree;
 *
 * let config = ScbConfig::default();
 * let tree = KnowledgeTree::bootstrap().unwrap();
 * assert!(tree.check_invariants(config.coherence.min_score).is_ok());
 * ```
 */

pub mod bus;
pub mod circuit_breaker;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod evaluator;
pub mod mutation;
pub mod pipeline;
pub mod projector;
pub mod store;
pub mod validator;

pub use bus::{Channel, CoherenceBus, Envelope, Priority};
pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use config::{ConfigLoader, ScbConfig};
pub use domain::{Domain, DomainId, Field, KnowledgeTree};
pub use error::{Error, ErrorClass, Result};
pub use evaluator::{EvaluationOutcome, EvaluatorPool};
pub use mutation::{Mutation, MutationStatus, MutationTarget, MutationType};
pub use pipeline::{MutationPipeline, SubmitAck};
pub use projector::{AgentKind, Fragment, Phase, Projector};
pub use store::{KnowledgeStore, ProposalToken};
