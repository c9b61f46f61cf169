/**
 * Mutation Pipeline (§4.F)
 *
 * DESIGN DECISION: `submit` only enqueues; a separate `drain` step pulls a
 * batch off the bus and drives each mutation through validator -> evaluator
 * pool -> store -> projector, instead of doing all of that synchronously
 * inside `submit`
 * WHY: §7 is explicit that "submit always returns an ack with a
 * mutation_id; final outcome is delivered asynchronously on
 * semantic_validation" — the two-phase shape is required by the spec, not
 * an implementation convenience. `drain` is what a worker-pool task
 * (§5: "work-stealing pool of size = #CPU") calls in a loop; tests call it
 * directly without needing a real background task.
 *
 * Per-target serialization (§5) is a `tokio::sync::Mutex` keyed by
 * `DomainId` in a `DashMap`, grounded on `agent_network.rs`'s per-connection
 * retry/backoff shape generalized into a per-target critical section plus
 * the same exponential schedule (`circuit_breaker::backoff_duration`).
 */

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::bus::{Channel, CoherenceBus, Priority};
use crate::circuit_breaker::backoff_duration;
use crate::config::options::PipelineOptions;
use crate::domain::DomainId;
use crate::error::{Error, ErrorClass, Result};
use crate::evaluator::{EvaluationOutcome, EvaluatorPool};
use crate::mutation::{Mutation, MutationStatus};
use crate::projector::{Phase, Projector};
use crate::store::{KnowledgeStore, ProposalToken};
use crate::validator;

/// Returned immediately by `submit` (§4.F, §7): the producer gets an ack
/// with the bus offset and the mutation's id; the final status is only
/// knowable later, from a `semantic_validation` event.
#[derive(Debug, Clone, Copy)]
pub struct SubmitAck {
    pub mutation_id: Uuid,
    pub offset: u64,
}

/// Drives proposed mutations from the bus through validation, evaluation,
/// commit, and fragment projection (§4.F).
pub struct MutationPipeline {
    bus: Arc<CoherenceBus>,
    store: Arc<KnowledgeStore>,
    evaluators: Arc<EvaluatorPool>,
    projector: Arc<Projector>,
    target_locks: DashMap<DomainId, Arc<AsyncMutex<()>>>,
    options: PipelineOptions,
    min_coherence_score: f64,
}

impl MutationPipeline {
    pub fn new(
        bus: Arc<CoherenceBus>,
        store: Arc<KnowledgeStore>,
        evaluators: Arc<EvaluatorPool>,
        projector: Arc<Projector>,
        options: PipelineOptions,
        min_coherence_score: f64,
    ) -> Self {
        Self {
            bus,
            store,
            evaluators,
            projector,
            target_locks: DashMap::new(),
            options,
            min_coherence_score,
        }
    }

    /// `submit(mutation) → ack(offset)` (§4.F step 1): enqueue onto
    /// `context_mutations` and return immediately.
    pub async fn submit(&self, mutation: &Mutation) -> Result<SubmitAck> {
        let payload = serde_json::to_value(mutation)?;
        let offset = self.bus.publish_mutation(payload, &mutation.source, Some(mutation.mutation_id)).await?;
        Ok(SubmitAck { mutation_id: mutation.mutation_id, offset })
    }

    /// Pull up to `max_batch` queued mutations for `group` and drive each
    /// one to a terminal or suspended outcome (§4.F steps 2-7). A worker
    /// loop (§5) calls this repeatedly; tests call it directly.
    pub async fn drain(&self, group: &str, max_batch: usize) -> Result<Vec<Mutation>> {
        let batch = self
            .bus
            .subscribe(Channel::ContextMutations, group, max_batch, Duration::from_secs(5))
            .await?;

        // Group by target so mutations on the same domain are processed in
        // offset order within this batch, while different targets may
        // still run concurrently once a worker pool dispatches them.
        let mut outcomes = Vec::with_capacity(batch.len());
        for (offset, envelope) in batch {
            let mutation: Mutation = match serde_json::from_value(envelope.payload.clone()) {
                Ok(m) => m,
                Err(e) => {
                    warn!(error = %e, "dropping malformed mutation envelope");
                    self.bus.ack(Channel::ContextMutations, group, offset);
                    continue;
                }
            };

            match self.process_with_retry(mutation.clone()).await {
                Ok(final_mutation) => {
                    self.bus.ack(Channel::ContextMutations, group, offset);
                    outcomes.push(final_mutation);
                }
                Err(e) => {
                    let dead_lettered = self.bus.broker().record_failure_and_maybe_dead_letter(
                        Channel::ContextMutations,
                        group,
                        offset,
                        &envelope,
                        self.options.max_retries.max(5),
                    );
                    if dead_lettered {
                        self.bus
                            .publish_alert(
                                serde_json::json!({
                                    "kind": "mutation_dead_lettered",
                                    "mutation_id": mutation.mutation_id,
                                    "reason": e.to_string(),
                                }),
                                "pipeline",
                                Priority::High,
                            )
                            .await
                            .ok();
                    }
                }
            }
        }
        Ok(outcomes)
    }

    /// Transient-error retry loop (§7): exponential backoff, base 100ms,
    /// cap 5s, +-20% jitter, up to 5 attempts, then give up (caller
    /// dead-letters). Terminal rejects and suspensions return immediately
    /// without retrying.
    async fn process_with_retry(&self, mutation: Mutation) -> Result<Mutation> {
        let mut attempt = 0u32;
        loop {
            match self.process_one(mutation.clone()).await {
                Ok(result) => return Ok(result),
                Err(e) if e.classify() == ErrorClass::Transient => {
                    attempt += 1;
                    if attempt >= 5 {
                        return Err(e);
                    }
                    let jitter_seed = mutation.mutation_id.as_u128() as u64 ^ attempt as u64;
                    let backoff = backoff_duration(attempt, self.options.backoff_base_ms, jitter_seed);
                    warn!(mutation_id = %mutation.mutation_id, attempt, ?backoff, "retrying after transient error");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One pass of validate -> evaluate -> commit (with bounded rebase on
    /// conflict) -> project, for a single mutation (§4.F steps 3-7).
    async fn process_one(&self, mut mutation: Mutation) -> Result<Mutation> {
        let domain = mutation.target.domain();
        let lock = self
            .target_locks
            .entry(domain)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let mut rebase_attempts = 0u32;
        loop {
            let (version, tree) = self.store.current();
            mutation.base_version = version;
            mutation.status = MutationStatus::Validating;

            if let Err(e) = validator::validate(&tree, &mutation) {
                return self.finalize_rejected(mutation, e).await;
            }

            let evaluation = self.evaluators.evaluate(&tree, &mutation).await;
            let evaluated = match evaluation {
                EvaluationOutcome::Approved(m) => m,
                EvaluationOutcome::Suspended(m) => {
                    return self.finalize_suspended(m).await;
                }
                EvaluationOutcome::Rejected(e) => {
                    return self.finalize_rejected(mutation, e).await;
                }
            };

            // Belief revision may have changed `new_value`/`confidence`; the
            // revised form re-enters validation exactly once (§4.E step 3)
            // before it's allowed anywhere near a commit.
            if let Err(e) = validator::validate(&tree, &evaluated) {
                return self.finalize_rejected(evaluated, e).await;
            }

            let token = ProposalToken { mutation: evaluated.clone(), base_version: version };
            match self.store.commit(token, 0.0) {
                Ok(_new_version) => {
                    return self.finalize_applied(evaluated).await;
                }
                Err(Error::Conflict { .. }) => {
                    rebase_attempts += 1;
                    if rebase_attempts >= self.options.max_retries {
                        return Err(Error::Contention(rebase_attempts as usize));
                    }
                    info!(mutation_id = %mutation.mutation_id, rebase_attempts, "rebasing after commit conflict");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn finalize_applied(&self, mut mutation: Mutation) -> Result<Mutation> {
        mutation.status = MutationStatus::Applied;
        self.publish_validation_event(&mutation, "applied", None).await;

        let (version, tree) = self.store.current();
        let diff = Projector::diff_set(mutation.target.domain());
        // Fragment projection runs after the commit is already durable; a
        // publish failure here must not unwind into re-running process_one
        // (which would attempt to recommit an already-applied mutation), so
        // it's logged rather than propagated.
        match self.projector.project(&tree, &diff, Phase::Execution) {
            Ok(fragments) => {
                for fragment in fragments {
                    match serde_json::to_value(&fragment) {
                        Ok(payload) => {
                            if let Err(e) = self.bus.publish_fragment(payload, "projector").await {
                                warn!(mutation_id = %mutation.mutation_id, error = %e, "failed to publish fragment");
                            }
                        }
                        Err(e) => warn!(error = %e, "failed to serialize fragment"),
                    }
                }
            }
            Err(e) => warn!(mutation_id = %mutation.mutation_id, error = %e, "fragment projection failed"),
        }

        if let Err(e) = self.store.audit_invariants(self.min_coherence_score) {
            error!(mutation_id = %mutation.mutation_id, error = %e, "post-commit invariant audit failed, rolling back");
            if let Err(rollback_err) = self.store.rollback(version.saturating_sub(1)) {
                error!(mutation_id = %mutation.mutation_id, error = %rollback_err, "rollback after invariant violation failed");
            }
            mutation.status = MutationStatus::RolledBack;
            if let Err(alert_err) = self
                .bus
                .publish_alert(
                    serde_json::json!({
                        "kind": "invariant_violation",
                        "mutation_id": mutation.mutation_id,
                        "reason": e.to_string(),
                    }),
                    "pipeline",
                    Priority::High,
                )
                .await
            {
                warn!(mutation_id = %mutation.mutation_id, error = %alert_err, "failed to publish invariant_violation alert");
            }
        }
        Ok(mutation)
    }

    async fn finalize_rejected(&self, mut mutation: Mutation, error: Error) -> Result<Mutation> {
        mutation.status = MutationStatus::Rejected;
        self.publish_validation_event(&mutation, "rejected", Some(&error)).await;
        Ok(mutation)
    }

    async fn finalize_suspended(&self, mut mutation: Mutation) -> Result<Mutation> {
        mutation.status = MutationStatus::Suspended;
        if let Err(e) = self
            .bus
            .publish_alert(
                serde_json::json!({
                    "kind": "contradiction_pending",
                    "mutation_id": mutation.mutation_id,
                    "target": format!("{:?}", mutation.target),
                }),
                "pipeline",
                Priority::Standard,
            )
            .await
        {
            warn!(mutation_id = %mutation.mutation_id, error = %e, "failed to publish contradiction_pending alert");
        }
        Ok(mutation)
    }

    async fn publish_validation_event(&self, mutation: &Mutation, outcome: &str, error: Option<&Error>) {
        let payload = serde_json::json!({
            "mutation_id": mutation.mutation_id,
            "outcome": outcome,
            "reason": error.map(|e| e.to_string()),
        });
        if let Err(e) = self.bus.publish_validation(payload, "pipeline", Some(mutation.mutation_id)).await {
            warn!(error = %e, "failed to publish semantic_validation event");
        }
    }

    /// Operator decision on a suspended mutation (§8 scenario S4): `approve`
    /// re-enters the commit path directly (the deliberation gate is the
    /// only thing that was pending); `discard` marks it rejected.
    pub async fn resolve_suspended(&self, mutation: Mutation, approve: bool) -> Result<Mutation> {
        if !approve {
            let mut mutation = mutation;
            mutation.status = MutationStatus::Rejected;
            self.publish_validation_event(&mutation, "rejected", None).await;
            return Ok(mutation);
        }
        let mut mutation = mutation;
        mutation.requires_deliberation = false;
        let (version, _) = self.store.current();
        mutation.base_version = version;
        let token = ProposalToken { mutation: mutation.clone(), base_version: version };
        match self.store.commit(token, 0.0) {
            Ok(_) => self.finalize_applied(mutation).await,
            Err(e) => self.finalize_rejected(mutation, e).await,
        }
    }

    /// Diff set helper exposed for operator tooling / tests that need to
    /// know which agents a hypothetical commit would notify.
    pub fn would_notify(&self, domain: DomainId) -> BTreeSet<DomainId> {
        Projector::diff_set(domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::options::{EvaluatorOptions, ScbConfig};
    use crate::evaluator::defaults::{
        IdentityBeliefReviser, NeutralContradictionEvaluator, NeutralDriftEvaluator,
    };
    use crate::mutation::{MutationTarget, MutationType};

    fn make_pipeline() -> MutationPipeline {
        let bus = Arc::new(CoherenceBus::new(ScbConfig::default()));
        let store = Arc::new(KnowledgeStore::in_memory().unwrap());
        let evaluators = Arc::new(EvaluatorPool::new(
            Arc::new(NeutralDriftEvaluator),
            Arc::new(NeutralContradictionEvaluator),
            Arc::new(IdentityBeliefReviser),
            Arc::new(HighUtility),
            EvaluatorOptions::default(),
        ));
        let projector = Arc::new(Projector::new());
        MutationPipeline::new(bus, store, evaluators, projector, Default::default(), 0.7)
    }

    struct HighUtility;
    #[async_trait::async_trait]
    impl crate::evaluator::UtilityEvaluator for HighUtility {
        async fn utility(
            &self,
            _tree: &crate::domain::KnowledgeTree,
            _mutation: &Mutation,
        ) -> Result<crate::evaluator::UtilityResult> {
            Ok(crate::evaluator::UtilityResult { score: 0.9, features: vec![] })
        }
    }

    fn add_insight(base_version: u64) -> Mutation {
        Mutation::new(
            MutationType::AddInsight,
            MutationTarget::parse("PAIN_POINTS.problemas_actuales").unwrap(),
            serde_json::json!("Context drift"),
            0.9,
            "ai_system",
            base_version,
        )
    }

    #[tokio::test]
    async fn s1_happy_path_submit_then_drain_applies_the_mutation() {
        let pipeline = make_pipeline();
        let mutation = add_insight(1);
        let ack = pipeline.submit(&mutation).await.unwrap();
        assert_eq!(ack.mutation_id, mutation.mutation_id);

        let applied = pipeline.drain("workers", 10).await.unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].status, MutationStatus::Applied);

        let validation_events = pipeline
            .bus
            .subscribe(Channel::SemanticValidation, "observer", 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(validation_events.len(), 1);

        let fragment_events = pipeline
            .bus
            .subscribe(Channel::FragmentUpdates, "observer", 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert!(!fragment_events.is_empty());
    }

    #[tokio::test]
    async fn s2_confidence_below_floor_is_rejected_with_no_fragment() {
        let pipeline = make_pipeline();
        let mutation = Mutation::new(
            MutationType::UpdateDomain,
            MutationTarget::Domain(DomainId::Organizacion),
            serde_json::json!({}),
            0.75,
            "ai_system",
            1,
        );
        pipeline.submit(&mutation).await.unwrap();
        let results = pipeline.drain("workers", 10).await.unwrap();
        assert_eq!(results[0].status, MutationStatus::Rejected);

        let fragments = pipeline
            .bus
            .subscribe(Channel::FragmentUpdates, "observer", 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert!(fragments.is_empty());
    }

    #[tokio::test]
    async fn duplicate_mutation_id_applies_exactly_once() {
        let pipeline = make_pipeline();
        let mutation = add_insight(1);
        pipeline.submit(&mutation).await.unwrap();
        pipeline.submit(&mutation).await.unwrap();

        let applied = pipeline.drain("workers", 10).await.unwrap();
        assert_eq!(applied.len(), 1);
    }
}
