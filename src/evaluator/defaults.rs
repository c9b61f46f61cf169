/**
 * Conservative default evaluator implementations
 *
 * DESIGN DECISION: ship neutral, always-available implementations of all
 * four capabilities
 * WHY: the spec (§4.E Partial-failure policy) defines exact conservative
 * fallback values for a degraded evaluator ("drift magnitude = previous
 * EWMA", "contradiction = not-contradicting", "revision = identity",
 * "utility = neutral 0.5"); shipping these as real implementations means a
 * bus can run with zero external ML models wired in and still satisfy every
 * invariant, with real evaluators layered in by configuration later (§9,
 * "evaluators are discovered via configuration; registration is explicit")
 */

use async_trait::async_trait;

use crate::domain::KnowledgeTree;
use crate::error::Result;
use crate::mutation::Mutation;

use super::{
    ContradictionEvaluator, ContradictionResult, ContradictionVerdict, DriftEvaluator,
    DriftResult, RevisionResult, BeliefReviser, UtilityEvaluator, UtilityResult,
};

/// Always reports no drift. Suitable as a placeholder until a real drift
/// model (EWMA over historical mutations) is registered.
pub struct NeutralDriftEvaluator;

#[async_trait]
impl DriftEvaluator for NeutralDriftEvaluator {
    async fn drift(&self, _tree: &KnowledgeTree, _mutation: &Mutation) -> Result<DriftResult> {
        Ok(DriftResult { magnitude: 0.0, explanation: "no drift model registered".to_string() })
    }
}

/// Always reports not-contradicting.
pub struct NeutralContradictionEvaluator;

#[async_trait]
impl ContradictionEvaluator for NeutralContradictionEvaluator {
    async fn contradict(
        &self,
        _tree: &KnowledgeTree,
        _mutation: &Mutation,
    ) -> Result<ContradictionResult> {
        Ok(ContradictionResult {
            verdict: ContradictionVerdict::NotContradicts,
            confidence: 0.0,
            evidence: Vec::new(),
        })
    }
}

/// Identity revision: proposed value and confidence pass through unchanged.
pub struct IdentityBeliefReviser;

#[async_trait]
impl BeliefReviser for IdentityBeliefReviser {
    async fn revise(&self, _tree: &KnowledgeTree, mutation: &Mutation) -> Result<RevisionResult> {
        Ok(RevisionResult {
            approved_value: mutation.new_value.clone(),
            rationale: "no belief reviser registered; value unchanged".to_string(),
            new_confidence: mutation.confidence,
        })
    }
}

/// Neutral utility: 0.5, always clears the standard floor (0.6) is false by
/// default — operators must register a real utility model to pass standard
/// mutations; this exists so the pool degrades gracefully when the real
/// model is unavailable rather than to replace it long-term.
pub struct NeutralUtilityEvaluator;

#[async_trait]
impl UtilityEvaluator for NeutralUtilityEvaluator {
    async fn utility(&self, _tree: &KnowledgeTree, _mutation: &Mutation) -> Result<UtilityResult> {
        Ok(UtilityResult { score: 0.5, features: Vec::new() })
    }
}
