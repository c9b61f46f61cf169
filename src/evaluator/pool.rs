/**
 * Evaluator Pool coordinator (§4.E)
 *
 * DESIGN DECISION: sequential evaluator calls per mutation (drift →
 * contradiction → belief revision → utility), each wrapped in
 * `tokio::time::timeout`
 * WHY: the spec fixes this exact ordering within one mutation (a later
 * evaluator may need the earlier ones' verdicts, e.g. contradiction's
 * `requires_deliberation` override from drift); across mutations the pool
 * itself imposes no extra serialization, deferring the "parallel across
 * mutations" requirement to the pipeline's worker pool. Deadline enforcement
 * is grounded on `agent_network.rs::AgentConnection::send_query`'s
 * `tokio::time::timeout` wrapper.
 */

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::options::EvaluatorOptions;
use crate::domain::KnowledgeTree;
use crate::error::{Error, Result};
use crate::mutation::Mutation;

use super::{
    BeliefReviser, ContradictionEvaluator, ContradictionVerdict, DriftEvaluator, RevisionResult,
    UtilityEvaluator,
};

/// Final, possibly-revised outcome of running a mutation through the pool.
#[derive(Debug, Clone)]
pub enum EvaluationOutcome {
    /// Mutation passed every evaluator gate; the (possibly belief-revised)
    /// mutation is ready for commit.
    Approved(Mutation),
    /// One evaluator's verdict suspends the mutation pending operator review.
    Suspended(Mutation),
    /// A terminal rejection, carrying the error the pipeline should surface.
    Rejected(Error),
}

/// Coordinates the four pluggable evaluator capabilities for one mutation at
/// a time. Multiple mutations run through distinct `EvaluatorPool::evaluate`
/// calls concurrently, bounded by the pipeline's worker pool.
pub struct EvaluatorPool {
    drift: Arc<dyn DriftEvaluator>,
    contradiction: Arc<dyn ContradictionEvaluator>,
    reviser: Arc<dyn BeliefReviser>,
    utility: Arc<dyn UtilityEvaluator>,
    options: EvaluatorOptions,
}

impl EvaluatorPool {
    pub fn new(
        drift: Arc<dyn DriftEvaluator>,
        contradiction: Arc<dyn ContradictionEvaluator>,
        reviser: Arc<dyn BeliefReviser>,
        utility: Arc<dyn UtilityEvaluator>,
        options: EvaluatorOptions,
    ) -> Self {
        Self { drift, contradiction, reviser, utility, options }
    }

    /// Run the full evaluation protocol (§4.E) for one mutation.
    pub async fn evaluate(&self, tree: &KnowledgeTree, mutation: &Mutation) -> EvaluationOutcome {
        let mut mutation = mutation.clone();
        let mut degraded = 0usize;

        // 1. Drift (<=200ms).
        let drift = match timeout_call(
            self.drift.drift(tree, &mutation),
            Duration::from_millis(self.options.drift_deadline_ms),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                degraded += 1;
                warn!(mutation_id = %mutation.mutation_id, "drift evaluator degraded");
                super::DriftResult { magnitude: 0.0, explanation: "degraded: previous EWMA assumed".into() }
            }
        };
        if drift.magnitude > self.options.drift_magnitude_threshold && !mutation.requires_deliberation {
            mutation.requires_deliberation = true;
        }

        // 2. Contradiction (<=500ms).
        let contradiction = match timeout_call(
            self.contradiction.contradict(tree, &mutation),
            Duration::from_millis(self.options.contradiction_deadline_ms),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                degraded += 1;
                warn!(mutation_id = %mutation.mutation_id, "contradiction evaluator degraded");
                super::ContradictionResult {
                    verdict: ContradictionVerdict::NotContradicts,
                    confidence: 0.0,
                    evidence: Vec::new(),
                }
            }
        };
        if degraded >= 2 {
            return EvaluationOutcome::Rejected(Error::EvaluatorsDegraded(degraded));
        }
        if contradiction.verdict == ContradictionVerdict::Contradicts
            && contradiction.confidence >= self.options.contradiction_confidence_threshold
        {
            if mutation.requires_deliberation {
                return EvaluationOutcome::Suspended(mutation);
            }
            return EvaluationOutcome::Rejected(Error::Contradiction(contradiction.confidence));
        }

        // 3. Belief revision (<=300ms). May alter new_value/confidence in place.
        let revision: RevisionResult = match timeout_call(
            self.reviser.revise(tree, &mutation),
            Duration::from_millis(self.options.belief_deadline_ms),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                degraded += 1;
                warn!(mutation_id = %mutation.mutation_id, "belief reviser degraded");
                RevisionResult {
                    approved_value: mutation.new_value.clone(),
                    rationale: "degraded: identity revision".into(),
                    new_confidence: mutation.confidence,
                }
            }
        };
        if degraded >= 2 {
            return EvaluationOutcome::Rejected(Error::EvaluatorsDegraded(degraded));
        }
        mutation.new_value = revision.approved_value;
        mutation.confidence = revision.new_confidence.clamp(0.0, 1.0);

        // 4. Utility (<=100ms).
        let utility = match timeout_call(
            self.utility.utility(tree, &mutation),
            Duration::from_millis(self.options.utility_deadline_ms),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                degraded += 1;
                warn!(mutation_id = %mutation.mutation_id, "utility evaluator degraded");
                super::UtilityResult { score: 0.5, features: Vec::new() }
            }
        };
        if degraded >= 2 {
            return EvaluationOutcome::Rejected(Error::EvaluatorsDegraded(degraded));
        }
        let floor = if mutation.is_critical() {
            self.options.utility_floor_critical
        } else {
            self.options.utility_floor_standard
        };
        if utility.score < floor {
            return EvaluationOutcome::Rejected(Error::UtilityTooLow { score: utility.score, floor });
        }

        debug!(mutation_id = %mutation.mutation_id, degraded, "mutation cleared evaluator pool");
        EvaluationOutcome::Approved(mutation)
    }
}

async fn timeout_call<T>(
    fut: impl std::future::Future<Output = Result<T>>,
    deadline: Duration,
) -> std::result::Result<T, ()> {
    match tokio::time::timeout(deadline, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(_)) | Err(_) => Err(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::KnowledgeTree;
    use crate::evaluator::defaults::{
        IdentityBeliefReviser, NeutralContradictionEvaluator, NeutralDriftEvaluator,
    };
    use crate::evaluator::{ContradictionResult, DriftResult, UtilityResult};
    use crate::mutation::{Mutation, MutationTarget, MutationType};
    use async_trait::async_trait;

    struct FixedUtility(f64);
    #[async_trait]
    impl UtilityEvaluator for FixedUtility {
        async fn utility(&self, _t: &KnowledgeTree, _m: &Mutation) -> Result<UtilityResult> {
            Ok(UtilityResult { score: self.0, features: vec![] })
        }
    }

    struct ContradictsEvaluator { confidence: f64 }
    #[async_trait]
    impl ContradictionEvaluator for ContradictsEvaluator {
        async fn contradict(&self, _t: &KnowledgeTree, _m: &Mutation) -> Result<ContradictionResult> {
            Ok(ContradictionResult {
                verdict: ContradictionVerdict::Contradicts,
                confidence: self.confidence,
                evidence: vec!["conflicting prior field".into()],
            })
        }
    }

    struct HighDrift;
    #[async_trait]
    impl DriftEvaluator for HighDrift {
        async fn drift(&self, _t: &KnowledgeTree, _m: &Mutation) -> Result<DriftResult> {
            Ok(DriftResult { magnitude: 0.95, explanation: "large jump".into() })
        }
    }

    fn tree() -> KnowledgeTree {
        KnowledgeTree::bootstrap().unwrap()
    }

    fn mutation(tree: &KnowledgeTree) -> Mutation {
        Mutation::new(
            MutationType::AddInsight,
            MutationTarget::parse("PAIN_POINTS.problemas_actuales").unwrap(),
            serde_json::json!("Context drift"),
            0.9,
            "ai_system",
            tree.version,
        )
    }

    #[tokio::test]
    async fn s1_happy_path_approves_with_sufficient_utility() {
        let pool = EvaluatorPool::new(
            Arc::new(NeutralDriftEvaluator),
            Arc::new(NeutralContradictionEvaluator),
            Arc::new(IdentityBeliefReviser),
            Arc::new(FixedUtility(0.9)),
            EvaluatorOptions::default(),
        );
        let tree = tree();
        let outcome = pool.evaluate(&tree, &mutation(&tree)).await;
        assert!(matches!(outcome, EvaluationOutcome::Approved(_)));
    }

    #[tokio::test]
    async fn s4_contradiction_with_deliberation_suspends_instead_of_rejecting() {
        let pool = EvaluatorPool::new(
            Arc::new(NeutralDriftEvaluator),
            Arc::new(ContradictsEvaluator { confidence: 0.9 }),
            Arc::new(IdentityBeliefReviser),
            Arc::new(FixedUtility(0.9)),
            EvaluatorOptions::default(),
        );
        let tree = tree();
        let mut m = mutation(&tree);
        m.requires_deliberation = true;
        let outcome = pool.evaluate(&tree, &m).await;
        assert!(matches!(outcome, EvaluationOutcome::Suspended(_)));
    }

    #[tokio::test]
    async fn contradiction_without_deliberation_is_rejected_terminally() {
        let pool = EvaluatorPool::new(
            Arc::new(NeutralDriftEvaluator),
            Arc::new(ContradictsEvaluator { confidence: 0.9 }),
            Arc::new(IdentityBeliefReviser),
            Arc::new(FixedUtility(0.9)),
            EvaluatorOptions::default(),
        );
        let tree = tree();
        let outcome = pool.evaluate(&tree, &mutation(&tree)).await;
        assert!(matches!(outcome, EvaluationOutcome::Rejected(Error::Contradiction(_))));
    }

    #[tokio::test]
    async fn high_drift_auto_sets_requires_deliberation() {
        let pool = EvaluatorPool::new(
            Arc::new(HighDrift),
            Arc::new(NeutralContradictionEvaluator),
            Arc::new(IdentityBeliefReviser),
            Arc::new(FixedUtility(0.9)),
            EvaluatorOptions::default(),
        );
        let tree = tree();
        let outcome = pool.evaluate(&tree, &mutation(&tree)).await;
        match outcome {
            EvaluationOutcome::Approved(m) => assert!(m.requires_deliberation),
            other => panic!("expected Approved, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn utility_below_standard_floor_is_rejected() {
        let pool = EvaluatorPool::new(
            Arc::new(NeutralDriftEvaluator),
            Arc::new(NeutralContradictionEvaluator),
            Arc::new(IdentityBeliefReviser),
            Arc::new(FixedUtility(0.2)),
            EvaluatorOptions::default(),
        );
        let tree = tree();
        let outcome = pool.evaluate(&tree, &mutation(&tree)).await;
        assert!(matches!(outcome, EvaluationOutcome::Rejected(Error::UtilityTooLow { .. })));
    }
}
