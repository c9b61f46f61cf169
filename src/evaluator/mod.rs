/**
 * Evaluator Pool capability traits (§4.E)
 *
 * DESIGN DECISION: four narrow `#[async_trait]` capability traits instead of
 * one "evaluator" trait with a mode flag
 * WHY: re-architects the source's dynamic duck-typed plugin model (§9) into
 * a polymorphic capability set with tagged result variants; each capability
 * is independently pluggable and independently deadline-bounded, grounded on
 * `domain_agent.rs`'s `#[async_trait] DomainAgent` trait-object pattern
 */

pub mod defaults;
pub mod pool;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::KnowledgeTree;
use crate::error::Result;
use crate::mutation::Mutation;

pub use pool::{EvaluationOutcome, EvaluatorPool};

/// Result of the drift evaluator: how far a mutation pushes its target from
/// its current trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftResult {
    pub magnitude: f64,
    pub explanation: String,
}

/// Result of the contradiction evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContradictionResult {
    pub verdict: ContradictionVerdict,
    pub confidence: f64,
    pub evidence: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContradictionVerdict {
    Contradicts,
    NotContradicts,
}

/// Result of the belief reviser: may propose a revised value/confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionResult {
    pub approved_value: serde_json::Value,
    pub rationale: String,
    pub new_confidence: f64,
}

/// Result of the utility evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilityResult {
    pub score: f64,
    pub features: Vec<(String, f64)>,
}

#[async_trait]
pub trait DriftEvaluator: Send + Sync {
    async fn drift(&self, tree: &KnowledgeTree, mutation: &Mutation) -> Result<DriftResult>;
}

#[async_trait]
pub trait ContradictionEvaluator: Send + Sync {
    async fn contradict(
        &self,
        tree: &KnowledgeTree,
        mutation: &Mutation,
    ) -> Result<ContradictionResult>;
}

#[async_trait]
pub trait BeliefReviser: Send + Sync {
    async fn revise(&self, tree: &KnowledgeTree, mutation: &Mutation) -> Result<RevisionResult>;
}

#[async_trait]
pub trait UtilityEvaluator: Send + Sync {
    async fn utility(&self, tree: &KnowledgeTree, mutation: &Mutation) -> Result<UtilityResult>;
}
