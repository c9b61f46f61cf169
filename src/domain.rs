/**
 * Knowledge Tree Data Model
 *
 * DESIGN DECISION: closed `DomainId` enum over the 8 foundational domains
 * WHY: the tree's shape is fixed by the domain (§3); an open-ended string key
 * would let callers reference domains that can never exist, pushing a
 * validation concern into every consumer instead of the type system
 *
 * PATTERN: enum-keyed record grounded on `domain_agent.rs`'s `Domain` enum,
 * generalized from "routing target for a query" to "node in a versioned tree"
 */

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Default `coherence.min_score` (§3 invariant 1, §6). Components that don't
/// have a `ScbConfig` in hand (tests, the WAL replay path) check invariants
/// against this rather than hand-rolling the literal.
pub const DEFAULT_MIN_COHERENCE: f64 = 0.7;

/// The 8 foundational domains every knowledge tree must contain (§3 invariant 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainId {
    BuyerPersonas,
    PainPoints,
    Oferta,
    Organizacion,
    Mercado,
    Goals,
    Challenges,
    Constraints,
}

impl DomainId {
    pub const ALL: [DomainId; 8] = [
        DomainId::BuyerPersonas,
        DomainId::PainPoints,
        DomainId::Oferta,
        DomainId::Organizacion,
        DomainId::Mercado,
        DomainId::Goals,
        DomainId::Challenges,
        DomainId::Constraints,
    ];

    /// Parse from the upper-snake names used in the spec's worked examples
    /// (`"PAIN_POINTS"`, `"ORGANIZACION"`, ...).
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_uppercase().as_str() {
            "BUYER_PERSONAS" => Ok(DomainId::BuyerPersonas),
            "PAIN_POINTS" => Ok(DomainId::PainPoints),
            "OFERTA" => Ok(DomainId::Oferta),
            "ORGANIZACION" => Ok(DomainId::Organizacion),
            "MERCADO" => Ok(DomainId::Mercado),
            "GOALS" => Ok(DomainId::Goals),
            "CHALLENGES" => Ok(DomainId::Challenges),
            "CONSTRAINTS" => Ok(DomainId::Constraints),
            other => Err(Error::UnknownDomain(other.to_string())),
        }
    }

    pub fn as_upper_snake(&self) -> &'static str {
        match self {
            DomainId::BuyerPersonas => "BUYER_PERSONAS",
            DomainId::PainPoints => "PAIN_POINTS",
            DomainId::Oferta => "OFERTA",
            DomainId::Organizacion => "ORGANIZACION",
            DomainId::Mercado => "MERCADO",
            DomainId::Goals => "GOALS",
            DomainId::Challenges => "CHALLENGES",
            DomainId::Constraints => "CONSTRAINTS",
        }
    }
}

/// `type` classification of a domain (§3). Independent of `DomainId`: several
/// domains may share a type, and the 8 foundational ids are always present
/// regardless of which type each currently carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainType {
    Foundational,
    ValueProposition,
    MarketContext,
    TargetAudience,
    GoalsMetrics,
    ChallengesProblems,
    AiDerived,
    ConstraintsCompliance,
}

/// `criticality` determines the minimum confidence a domain must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    High,
    Medium,
    Low,
}

impl Criticality {
    /// Confidence floor per §3 invariant 3 (0.8 / 0.6 / 0.4).
    pub fn floor(&self) -> f64 {
        match self {
            Criticality::High => 0.8,
            Criticality::Medium => 0.6,
            Criticality::Low => 0.4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Criticality::High => "high",
            Criticality::Medium => "medium",
            Criticality::Low => "low",
        }
    }
}

/// A single field inside a domain's `fields` map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub value: serde_json::Value,
    pub confidence: f64,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl Field {
    pub fn new(value: serde_json::Value, confidence: f64, source: impl Into<String>) -> Self {
        Self {
            value,
            confidence: confidence.clamp(0.0, 1.0),
            source: source.into(),
            timestamp: Utc::now(),
            tags: BTreeSet::new(),
        }
    }
}

/// A node of the knowledge tree, keyed by `DomainId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    #[serde(rename = "type")]
    pub domain_type: DomainType,
    pub criticality: Criticality,
    pub owner: String,
    pub dependencies: Vec<DomainId>,
    pub confidence: f64,
    pub tags: BTreeSet<String>,
    pub fields: BTreeMap<String, Field>,
}

impl Domain {
    pub fn new(domain_type: DomainType, criticality: Criticality, owner: impl Into<String>) -> Self {
        Self {
            domain_type,
            criticality,
            owner: owner.into(),
            dependencies: Vec::new(),
            confidence: criticality.floor(),
            tags: BTreeSet::new(),
            fields: BTreeMap::new(),
        }
    }
}

/// The top-level, versioned knowledge tree (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeTree {
    pub version: u64,
    pub domains: BTreeMap<DomainId, Domain>,
    pub last_updated: DateTime<Utc>,
    pub context_hash: String,
    pub coherence_score: f64,
}

impl KnowledgeTree {
    /// Canonical JSON bytes: sorted keys, no insignificant whitespace (§6).
    /// `BTreeMap` already guarantees sorted key order on serialization; using
    /// `serde_json::to_vec` (compact form) avoids a bespoke canonicalizer.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        #[derive(Serialize)]
        struct Canonical<'a> {
            version: u64,
            domains: &'a BTreeMap<DomainId, Domain>,
            last_updated: DateTime<Utc>,
        }
        let canonical = Canonical {
            version: self.version,
            domains: &self.domains,
            last_updated: self.last_updated,
        };
        Ok(serde_json::to_vec(&canonical)?)
    }

    /// SHA-256 digest over `canonical_bytes`, lowercase hex (§6).
    pub fn compute_context_hash(&self) -> Result<String> {
        let bytes = self.canonical_bytes()?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Average domain confidence, used by the coherence score formula.
    pub fn avg_domain_confidence(&self) -> f64 {
        if self.domains.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.domains.values().map(|d| d.confidence).sum();
        sum / self.domains.len() as f64
    }

    /// All 8 foundational domains present (§3 invariant 4).
    pub fn has_all_foundational_domains(&self) -> bool {
        DomainId::ALL.iter().all(|id| self.domains.contains_key(id))
    }

    /// Acyclic + every dependency resolves to an existing domain (§3 invariant 2).
    pub fn dependency_graph_resolved(&self) -> bool {
        for domain in self.domains.values() {
            for dep in &domain.dependencies {
                if !self.domains.contains_key(dep) {
                    return false;
                }
            }
        }
        !self.has_cycle()
    }

    /// Kahn's algorithm in-degree walk, grounded on the dependency graph's
    /// cycle-detection approach: zero in-degree nodes are peeled off one
    /// layer at a time; a cycle is any node never peeled.
    pub fn has_cycle(&self) -> bool {
        let mut in_degree: BTreeMap<DomainId, usize> =
            self.domains.keys().map(|id| (*id, 0)).collect();
        for domain in self.domains.values() {
            for dep in &domain.dependencies {
                if let Some(count) = in_degree.get_mut(dep) {
                    *count += 1;
                }
            }
        }

        let mut queue: Vec<DomainId> = in_degree
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0usize;

        while let Some(id) = queue.pop() {
            visited += 1;
            if let Some(domain) = self.domains.get(&id) {
                for dep in &domain.dependencies {
                    if let Some(count) = in_degree.get_mut(dep) {
                        *count -= 1;
                        if *count == 0 {
                            queue.push(*dep);
                        }
                    }
                }
            }
        }

        visited != self.domains.len()
    }

    /// Every domain's confidence meets its criticality floor (§3 invariant 3).
    pub fn all_confidence_floors_met(&self) -> bool {
        self.domains
            .values()
            .all(|d| d.confidence >= d.criticality.floor())
    }

    /// Recompute `context_hash` and `coherence_score` in place. Called once
    /// per commit, after the mutation has been applied to the working copy.
    pub fn recompute(&mut self, contradiction_density: f64) -> Result<()> {
        self.context_hash = self.compute_context_hash()?;
        self.coherence_score = self.compute_coherence_score(contradiction_density);
        Ok(())
    }

    /// Deterministic coherence score (§3, Open Question resolved):
    /// `0.5 * avg_domain_confidence + 0.3 * dependency_resolution_ratio + 0.2 * (1 - contradiction_density)`.
    pub fn compute_coherence_score(&self, contradiction_density: f64) -> f64 {
        let dependency_resolution_ratio = if self.dependency_graph_resolved() { 1.0 } else { 0.0 };
        let score = 0.5 * self.avg_domain_confidence()
            + 0.3 * dependency_resolution_ratio
            + 0.2 * (1.0 - contradiction_density.clamp(0.0, 1.0));
        score.clamp(0.0, 1.0)
    }

    /// Verify all five §3 invariants; returns the first violated one.
    pub fn check_invariants(&self, min_coherence_score: f64) -> Result<()> {
        if self.coherence_score < min_coherence_score {
            return Err(Error::InvariantViolation(format!(
                "coherence_score {:.3} below floor {:.3}",
                self.coherence_score, min_coherence_score
            )));
        }
        if !self.dependency_graph_resolved() {
            return Err(Error::InvariantViolation(
                "dependency graph is cyclic or unresolved".to_string(),
            ));
        }
        if !self.all_confidence_floors_met() {
            return Err(Error::InvariantViolation(
                "a domain's confidence is below its criticality floor".to_string(),
            ));
        }
        if !self.has_all_foundational_domains() {
            return Err(Error::InvariantViolation(
                "not all 8 foundational domains are present".to_string(),
            ));
        }
        let expected_hash = self.compute_context_hash()?;
        if self.context_hash != expected_hash {
            return Err(Error::InvariantViolation(
                "context_hash does not match canonical digest".to_string(),
            ));
        }
        Ok(())
    }

    /// The bootstrap tree referenced by §3/§8: all 8 foundational domains
    /// present at their criticality floor, version 1.
    pub fn bootstrap() -> Result<Self> {
        let mut domains = BTreeMap::new();
        domains.insert(
            DomainId::BuyerPersonas,
            Domain::new(DomainType::TargetAudience, Criticality::High, "system"),
        );
        domains.insert(
            DomainId::PainPoints,
            Domain::new(DomainType::ChallengesProblems, Criticality::High, "system"),
        );
        domains.insert(
            DomainId::Oferta,
            Domain::new(DomainType::ValueProposition, Criticality::High, "system"),
        );
        domains.insert(
            DomainId::Organizacion,
            Domain::new(DomainType::Foundational, Criticality::High, "system"),
        );
        domains.insert(
            DomainId::Mercado,
            Domain::new(DomainType::MarketContext, Criticality::Medium, "system"),
        );
        domains.insert(
            DomainId::Goals,
            Domain::new(DomainType::GoalsMetrics, Criticality::Medium, "system"),
        );
        domains.insert(
            DomainId::Challenges,
            Domain::new(DomainType::ChallengesProblems, Criticality::Medium, "system"),
        );
        domains.insert(
            DomainId::Constraints,
            Domain::new(DomainType::ConstraintsCompliance, Criticality::Low, "system"),
        );

        let mut tree = Self {
            version: 1,
            domains,
            last_updated: Utc::now(),
            context_hash: String::new(),
            coherence_score: 0.0,
        };
        tree.recompute(0.0)?;
        Ok(tree)
    }
}
