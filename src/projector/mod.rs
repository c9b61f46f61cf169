/**
 * Fragment Projector (§4.G)
 *
 * DESIGN DECISION: a static table of `AgentKind -> BTreeSet<DomainId>`
 * projection specs, instead of a general query language over the tree
 * WHY: §4.G calls the spec "a declarative subset over DomainIds x field
 * predicates"; the eight known consumers in this bus each care about a
 * fixed, small set of domains (their own plus the ones they reason about
 * alongside it), so a static table is the simplest structure that satisfies
 * "declarative" without inventing a query DSL nothing else in the crate
 * needs. Dedup-by-content-hash is grounded on
 * `content_addressing.rs::calculate_sha256`.
 */

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::{DomainId, KnowledgeTree};
use crate::error::Result;

/// The known fragment consumers (§3 Fragment.agent_kind). One per
/// foundational domain: each agent reasons primarily about its own domain
/// plus the adjacent ones named in its projection spec below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    BuyerPersonas,
    PainPoints,
    Oferta,
    Organizacion,
    Mercado,
    Goals,
    Challenges,
    Constraints,
}

impl AgentKind {
    pub const ALL: [AgentKind; 8] = [
        AgentKind::BuyerPersonas,
        AgentKind::PainPoints,
        AgentKind::Oferta,
        AgentKind::Organizacion,
        AgentKind::Mercado,
        AgentKind::Goals,
        AgentKind::Challenges,
        AgentKind::Constraints,
    ];

    /// Each agent's declarative projection spec: which domains' fields it
    /// is handed whenever a commit touches one of them (§4.G step 2).
    fn projection_spec(&self) -> BTreeSet<DomainId> {
        match self {
            AgentKind::BuyerPersonas => [DomainId::BuyerPersonas, DomainId::PainPoints].into(),
            AgentKind::PainPoints => [DomainId::PainPoints].into(),
            AgentKind::Oferta => [DomainId::Oferta, DomainId::Mercado].into(),
            AgentKind::Organizacion => [DomainId::Organizacion].into(),
            AgentKind::Mercado => [DomainId::Mercado, DomainId::Oferta].into(),
            AgentKind::Goals => [DomainId::Goals, DomainId::Organizacion].into(),
            AgentKind::Challenges => [DomainId::Challenges, DomainId::PainPoints].into(),
            AgentKind::Constraints => [DomainId::Constraints, DomainId::Organizacion].into(),
        }
    }
}

/// Which stage of an agent's workflow this fragment was generated for (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Discovery,
    Planning,
    Execution,
    Optimization,
}

/// A per-agent projection of the tree, produced on a commit that touches
/// its projection spec (§3, §4.G).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    pub fragment_id: Uuid,
    pub agent_kind: AgentKind,
    pub phase: Phase,
    pub context_subset: serde_json::Value,
    pub coherence_score: f64,
    pub dependencies: Vec<DomainId>,
    pub generated_at: DateTime<Utc>,
    pub parent_commit_version: u64,
}

/// Computes and publishes per-agent fragments on every applied commit,
/// deduplicating unchanged content against the last fragment emitted for
/// that agent (§4.G steps 1-5).
pub struct Projector {
    specs: HashMap<AgentKind, BTreeSet<DomainId>>,
    last_emitted_hash: DashMap<AgentKind, String>,
}

impl Projector {
    pub fn new() -> Self {
        let specs = AgentKind::ALL.into_iter().map(|kind| (kind, kind.projection_spec())).collect();
        Self { specs, last_emitted_hash: DashMap::new() }
    }

    /// Compute the diff set of domains touched by `target` (§4.G step 1).
    /// A single mutation always touches exactly one domain; exposed as a
    /// set for symmetry with the multi-domain case a future mutation type
    /// might introduce.
    pub fn diff_set(domain: DomainId) -> BTreeSet<DomainId> {
        [domain].into()
    }

    /// Materialize and dedupe fragments for every agent whose projection
    /// spec intersects `diff` (§4.G steps 2-4). Returns one `Fragment` per
    /// agent whose content actually changed; an agent whose projected
    /// subset is byte-identical to what it was last handed is skipped.
    pub fn project(
        &self,
        tree: &KnowledgeTree,
        diff: &BTreeSet<DomainId>,
        phase: Phase,
    ) -> Result<Vec<Fragment>> {
        let mut fragments = Vec::new();
        for (agent_kind, spec) in &self.specs {
            if spec.is_disjoint(diff) {
                continue;
            }

            let subset = self.build_subset(tree, spec)?;
            let hash = content_hash(&subset)?;
            let unchanged = self
                .last_emitted_hash
                .get(agent_kind)
                .map(|existing| *existing == hash)
                .unwrap_or(false);
            if unchanged {
                continue;
            }
            self.last_emitted_hash.insert(*agent_kind, hash);

            let local_confidence: f64 = spec
                .iter()
                .filter_map(|id| tree.domains.get(id))
                .map(|d| d.confidence)
                .sum::<f64>()
                / spec.len().max(1) as f64;
            let coherence_score = (tree.coherence_score + local_confidence) / 2.0;

            fragments.push(Fragment {
                fragment_id: Uuid::new_v4(),
                agent_kind: *agent_kind,
                phase,
                context_subset: subset,
                coherence_score,
                dependencies: spec.iter().copied().collect(),
                generated_at: Utc::now(),
                parent_commit_version: tree.version,
            });
        }
        Ok(fragments)
    }

    fn build_subset(&self, tree: &KnowledgeTree, spec: &BTreeSet<DomainId>) -> Result<serde_json::Value> {
        let projected: std::collections::BTreeMap<_, _> = spec
            .iter()
            .filter_map(|id| tree.domains.get(id).map(|domain| (id.as_upper_snake(), domain)))
            .collect();
        Ok(serde_json::to_value(projected)?)
    }
}

impl Default for Projector {
    fn default() -> Self {
        Self::new()
    }
}

fn content_hash(value: &serde_json::Value) -> Result<String> {
    let bytes = serde_json::to_vec(value)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_insight_on_pain_points_fires_buyer_personas_and_pain_points_fragments() {
        let tree = KnowledgeTree::bootstrap().unwrap();
        let projector = Projector::new();
        let diff = Projector::diff_set(DomainId::PainPoints);

        let fragments = projector.project(&tree, &diff, Phase::Discovery).unwrap();
        let kinds: BTreeSet<AgentKind> = fragments.iter().map(|f| f.agent_kind).collect();

        assert!(kinds.contains(&AgentKind::BuyerPersonas));
        assert!(kinds.contains(&AgentKind::PainPoints));
        assert!(!kinds.contains(&AgentKind::Constraints));
    }

    #[test]
    fn unchanged_content_is_deduped_against_the_last_emission() {
        let tree = KnowledgeTree::bootstrap().unwrap();
        let projector = Projector::new();
        let diff = Projector::diff_set(DomainId::PainPoints);

        let first = projector.project(&tree, &diff, Phase::Discovery).unwrap();
        assert!(!first.is_empty());

        let second = projector.project(&tree, &diff, Phase::Discovery).unwrap();
        assert!(second.is_empty(), "identical tree content should be deduped");
    }

    #[test]
    fn changed_confidence_produces_a_fresh_fragment() {
        let mut tree = KnowledgeTree::bootstrap().unwrap();
        let projector = Projector::new();
        let diff = Projector::diff_set(DomainId::PainPoints);
        projector.project(&tree, &diff, Phase::Discovery).unwrap();

        tree.domains.get_mut(&DomainId::PainPoints).unwrap().confidence = 0.95;
        let second = projector.project(&tree, &diff, Phase::Discovery).unwrap();
        assert!(!second.is_empty());
    }

    #[test]
    fn unrelated_domain_agents_do_not_fire() {
        let tree = KnowledgeTree::bootstrap().unwrap();
        let projector = Projector::new();
        let diff = Projector::diff_set(DomainId::Constraints);
        let fragments = projector.project(&tree, &diff, Phase::Discovery).unwrap();
        let kinds: BTreeSet<AgentKind> = fragments.iter().map(|f| f.agent_kind).collect();
        assert_eq!(kinds, BTreeSet::from([AgentKind::Constraints]));
    }
}
