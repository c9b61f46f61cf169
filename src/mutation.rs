/**
 * Mutation type
 *
 * DESIGN DECISION: `target` is a typed enum distinguishing a whole-domain
 * target from a domain-field target, instead of a raw string the caller
 * must re-parse
 * WHY: every downstream component (validator, evaluators, pipeline) branches
 * on whether a mutation touches a domain or one of its fields; encoding that
 * in the type removes a whole class of string-parsing bugs
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::DomainId;

/// What a mutation targets: an entire domain, or a single field within one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MutationTarget {
    Domain(DomainId),
    Field { domain: DomainId, field: String },
}

impl MutationTarget {
    pub fn domain(&self) -> DomainId {
        match self {
            MutationTarget::Domain(id) => *id,
            MutationTarget::Field { domain, .. } => *domain,
        }
    }

    /// Parse `"DOMAIN"` or `"DOMAIN.field"`, matching the spec's worked
    /// examples (e.g. `"PAIN_POINTS.problemas_actuales"`).
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        match raw.split_once('.') {
            Some((domain, field)) => Ok(MutationTarget::Field {
                domain: DomainId::parse(domain)?,
                field: field.to_string(),
            }),
            None => Ok(MutationTarget::Domain(DomainId::parse(raw)?)),
        }
    }
}

/// The five mutation operations (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationType {
    AddInsight,
    UpdateField,
    RemoveField,
    AddDomain,
    UpdateDomain,
}

/// A mutation's position in its lifecycle (§3 Lifecycles).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    Pending,
    Validating,
    Approved,
    Rejected,
    Applied,
    RolledBack,
    /// Contradiction evaluator flagged the mutation but `requires_deliberation`
    /// was set, so it awaits an operator decision rather than auto-rejecting
    /// (§4.E step 2, §8 scenario S4). Not terminal: an operator `approve` or
    /// `discard` moves it to `applied`/`rejected`.
    Suspended,
}

impl MutationStatus {
    /// Terminal statuses never transition further (except `applied` → `rolled_back`,
    /// tracked separately by the invariant auditor).
    pub fn is_terminal(&self) -> bool {
        matches!(self, MutationStatus::Rejected | MutationStatus::Applied | MutationStatus::RolledBack)
    }
}

/// A proposed, atomic change to the knowledge tree (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    pub mutation_id: Uuid,
    pub mutation_type: MutationType,
    pub target: MutationTarget,
    pub new_value: serde_json::Value,
    pub previous_value: Option<serde_json::Value>,
    pub confidence: f64,
    #[serde(default)]
    pub requires_deliberation: bool,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub status: MutationStatus,
    /// Tree version this mutation was proposed against (optimistic concurrency, §4.C).
    pub base_version: u64,
}

impl Mutation {
    pub fn new(
        mutation_type: MutationType,
        target: MutationTarget,
        new_value: serde_json::Value,
        confidence: f64,
        source: impl Into<String>,
        base_version: u64,
    ) -> Self {
        Self {
            mutation_id: Uuid::new_v4(),
            mutation_type,
            target,
            new_value,
            previous_value: None,
            confidence: confidence.clamp(0.0, 1.0),
            requires_deliberation: false,
            source: source.into(),
            timestamp: Utc::now(),
            status: MutationStatus::Pending,
            base_version,
        }
    }

    /// Whether this mutation is on a domain flagged `high` criticality in
    /// the evaluator pool's utility floor rule (§4.E step 4): a mutation is
    /// treated as "critical" when it targets a `RemoveField`/`UpdateDomain`
    /// operation on a foundational domain, or carries `requires_deliberation`.
    pub fn is_critical(&self) -> bool {
        matches!(self.mutation_type, MutationType::RemoveField | MutationType::UpdateDomain)
            || self.requires_deliberation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutation_target_parses_domain_and_field_forms() {
        let domain_only = MutationTarget::parse("ORGANIZACION").unwrap();
        assert_eq!(domain_only, MutationTarget::Domain(DomainId::Organizacion));

        let with_field = MutationTarget::parse("PAIN_POINTS.problemas_actuales").unwrap();
        assert_eq!(
            with_field,
            MutationTarget::Field {
                domain: DomainId::PainPoints,
                field: "problemas_actuales".to_string(),
            }
        );
    }

    #[test]
    fn new_mutation_starts_pending_with_clamped_confidence() {
        let target = MutationTarget::Domain(DomainId::Goals);
        let mutation = Mutation::new(
            MutationType::AddInsight,
            target,
            serde_json::json!("value"),
            1.4,
            "ai_system",
            1,
        );
        assert_eq!(mutation.status, MutationStatus::Pending);
        assert_eq!(mutation.confidence, 1.0);
    }

    #[test]
    fn terminal_statuses_are_recognized() {
        assert!(MutationStatus::Applied.is_terminal());
        assert!(MutationStatus::Rejected.is_terminal());
        assert!(!MutationStatus::Pending.is_terminal());
    }
}
