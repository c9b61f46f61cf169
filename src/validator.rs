/**
 * Schema & Dependency Validator (§4.D)
 *
 * DESIGN DECISION: pure function over `(&KnowledgeTree, &Mutation)`, no
 * internal state
 * WHY: the validator must be safely callable twice for a revised mutation
 * (§4.E step 3, "revised form re-enters validation exactly once") without
 * any risk of stale state influencing the second pass; determinism also
 * makes it trivially unit-testable without mocking a store
 *
 * PATTERN: grounded on `sprint_parser`'s in-degree cycle check, applied here
 * to domain dependency graphs instead of sprint task graphs (see
 * `KnowledgeTree::has_cycle`)
 */

use crate::domain::{DomainId, KnowledgeTree};
use crate::error::{Error, Result};
use crate::mutation::{Mutation, MutationTarget, MutationType};

/// Validate a proposed mutation against the tree it was proposed over.
/// Returns `Ok(())` or the first structural/referential/confidence-floor
/// violation encountered, matching the validator's error vocabulary (§4.D).
pub fn validate(tree: &KnowledgeTree, mutation: &Mutation) -> Result<()> {
    validate_schema(mutation)?;
    validate_target_exists(tree, mutation)?;
    validate_not_forbidden_removal(tree, mutation)?;
    validate_no_duplicate_field(tree, mutation)?;
    validate_timestamp_is_utc(mutation)?;
    validate_confidence_floor(tree, mutation)?;
    validate_no_cycle_introduced(tree, mutation)?;
    Ok(())
}

fn validate_schema(mutation: &Mutation) -> Result<()> {
    if mutation.source.trim().is_empty() {
        return Err(Error::SchemaInvalid("source must be non-empty".to_string()));
    }
    if !(0.0..=1.0).contains(&mutation.confidence) {
        return Err(Error::SchemaInvalid(format!(
            "confidence {} outside [0,1]",
            mutation.confidence
        )));
    }
    match (&mutation.mutation_type, &mutation.target) {
        (MutationType::AddDomain, MutationTarget::Field { .. }) => Err(Error::SchemaInvalid(
            "AddDomain must target a whole domain, not a field".to_string(),
        )),
        (MutationType::UpdateField, MutationTarget::Domain(_)) => Err(Error::SchemaInvalid(format!(
            "{:?} must target a domain field",
            mutation.mutation_type
        ))),
        // RemoveField + Domain(_) is schema-valid (it models a whole-domain
        // removal); validate_not_forbidden_removal is the arm that rejects it,
        // since every DomainId is foundational and none may be removed.
        _ => Ok(()),
    }
}

fn validate_target_exists(tree: &KnowledgeTree, mutation: &Mutation) -> Result<()> {
    let domain_id = mutation.target.domain();
    if mutation.mutation_type == MutationType::AddDomain {
        return Ok(());
    }
    if !tree.domains.contains_key(&domain_id) {
        return Err(Error::UnknownDomain(domain_id.as_upper_snake().to_string()));
    }
    Ok(())
}

fn validate_not_forbidden_removal(tree: &KnowledgeTree, mutation: &Mutation) -> Result<()> {
    if mutation.mutation_type != MutationType::RemoveField {
        return Ok(());
    }
    let domain_id = mutation.target.domain();
    if DomainId::ALL.contains(&domain_id) && tree.domains.contains_key(&domain_id) {
        // Foundational domains themselves can never be removed; individual
        // non-essential fields on them may be, so only a domain-level
        // removal attempt (modeled here as RemoveField with no field name)
        // on a domain is forbidden outright.
        if matches!(mutation.target, MutationTarget::Domain(_)) {
            return Err(Error::ForbiddenRemoval(domain_id.as_upper_snake().to_string()));
        }
    }
    Ok(())
}

fn validate_no_duplicate_field(tree: &KnowledgeTree, mutation: &Mutation) -> Result<()> {
    if mutation.mutation_type != MutationType::AddInsight {
        return Ok(());
    }
    if let MutationTarget::Field { domain, field } = &mutation.target {
        if let Some(existing) = tree.domains.get(domain) {
            if existing.fields.contains_key(field) {
                return Err(Error::DuplicateFieldName(field.clone()));
            }
        }
    }
    Ok(())
}

fn validate_timestamp_is_utc(mutation: &Mutation) -> Result<()> {
    // chrono::DateTime<Utc> is UTC by construction; this guards against a
    // zero/default timestamp slipping through deserialization of untrusted
    // input where the offset field was tampered with to look UTC but isn't
    // meaningfully set.
    if mutation.timestamp.timestamp() == 0 {
        return Err(Error::TimestampNotUtc(mutation.timestamp.to_rfc3339()));
    }
    Ok(())
}

/// The criticality floor (§3 invariant 3) bounds a domain's own `confidence`,
/// not any individual field's — a field's `confidence` is an unbounded
/// [0,1] value (§3). Only a mutation that targets the domain itself (and so
/// can move `domain.confidence`) is checked against the floor.
fn validate_confidence_floor(tree: &KnowledgeTree, mutation: &Mutation) -> Result<()> {
    let MutationTarget::Domain(domain_id) = &mutation.target else {
        return Ok(());
    };
    let Some(domain) = tree.domains.get(domain_id) else {
        return Ok(());
    };
    let floor = domain.criticality.floor();
    if mutation.confidence < floor {
        return Err(Error::ConfidenceBelowFloor {
            confidence: mutation.confidence,
            floor,
            criticality: domain.criticality.as_str().to_string(),
        });
    }
    Ok(())
}

fn validate_no_cycle_introduced(tree: &KnowledgeTree, mutation: &Mutation) -> Result<()> {
    if mutation.mutation_type != MutationType::UpdateDomain {
        return Ok(());
    }
    let Some(new_deps) = mutation
        .new_value
        .get("dependencies")
        .and_then(|v| v.as_array())
    else {
        return Ok(());
    };

    let mut candidate = tree.clone();
    let domain_id = mutation.target.domain();
    let parsed: Result<Vec<DomainId>> = new_deps
        .iter()
        .map(|v| DomainId::parse(v.as_str().unwrap_or_default()))
        .collect();
    let parsed = parsed?;

    if let Some(domain) = candidate.domains.get_mut(&domain_id) {
        domain.dependencies = parsed;
    }

    if candidate.has_cycle() {
        return Err(Error::CyclicDependency(domain_id.as_upper_snake().to_string()));
    }
    Ok(())
}
