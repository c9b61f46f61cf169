/**
 * Knowledge Store (§4.C)
 *
 * DESIGN DECISION: a single `RwLock<KnowledgeTree>` behind a facade that
 * exposes `current`/`propose`/`commit`/`rollback`/`snapshot`/`restore`,
 * instead of the teacher's SQLite-backed `SyncedKnowledgeDatabase`
 * WHY: generalizes `shared_knowledge.rs`'s read/write-coordinator split
 * (`SyncedKnowledgeDatabase` + `AgentSyncCoordinator`) to the custom
 * WAL+snapshot binary format §6 mandates, replacing the embedded SQL engine
 * the teacher used for discovery records with framed binary files purpose
 * -built for one growing tree plus its commit log
 */

pub mod snapshot;
pub mod wal;

use std::path::PathBuf;
use std::sync::RwLock;

use tracing::{info, instrument};

use crate::config::options::StoreOptions;
use crate::domain::KnowledgeTree;
use crate::error::{Error, Result};
use crate::mutation::{Mutation, MutationStatus, MutationTarget, MutationType};
use crate::validator;

use snapshot::Snapshot;
use wal::{Wal, WalEntry};

/// A proposal accepted by `propose`, carrying the base version the caller
/// read the tree at (§4.C optimistic concurrency).
#[derive(Debug, Clone)]
pub struct ProposalToken {
    pub mutation: Mutation,
    pub base_version: u64,
}

/// Versioned tree + append-only mutation log, with snapshot/restore.
pub struct KnowledgeStore {
    tree: RwLock<KnowledgeTree>,
    wal: Wal,
    snapshot_dir: PathBuf,
    snapshot_every: u64,
    commits_since_snapshot: RwLock<u64>,
}

impl KnowledgeStore {
    /// Open (or initialize) a store rooted at `data_dir`, replaying any
    /// existing WAL on top of the latest snapshot (§4.I).
    pub fn open(data_dir: PathBuf, options: &StoreOptions) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)?;
        let snapshot_dir = data_dir.join("snapshots");
        std::fs::create_dir_all(&snapshot_dir)?;
        let wal = Wal::open(data_dir.join("wal.log"))?;

        let tree = match Snapshot::load_latest(&snapshot_dir)? {
            Some(snapshot) => {
                let mut tree = snapshot.tree;
                for entry in wal.replay_from(snapshot.wal_offset)? {
                    apply_entry_in_place(&mut tree, &entry)?;
                }
                tree
            }
            None => KnowledgeTree::bootstrap()?,
        };

        info!(version = tree.version, "knowledge store opened");
        Ok(Self {
            tree: RwLock::new(tree),
            wal,
            snapshot_dir,
            snapshot_every: options.snapshot_every,
            commits_since_snapshot: RwLock::new(0),
        })
    }

    /// In-memory store with no persistence, for tests and ephemeral runs.
    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            tree: RwLock::new(KnowledgeTree::bootstrap()?),
            wal: Wal::in_memory(),
            snapshot_dir: PathBuf::new(),
            snapshot_every: 256,
            commits_since_snapshot: RwLock::new(0),
        })
    }

    /// `current() → (version, tree)`.
    pub fn current(&self) -> (u64, KnowledgeTree) {
        let tree = self.tree.read().expect("knowledge tree lock poisoned");
        (tree.version, tree.clone())
    }

    /// `propose(mutation) → token`. Validates against the current tree
    /// (cheap pre-check; the evaluator pool and a second validator pass
    /// happen in the pipeline) and stamps the proposal's base version.
    pub fn propose(&self, mut mutation: Mutation) -> Result<ProposalToken> {
        let (version, tree) = self.current();
        validator::validate(&tree, &mutation)?;
        mutation.status = MutationStatus::Validating;
        mutation.base_version = version;
        Ok(ProposalToken { mutation, base_version: version })
    }

    /// `commit(token) → version'` or `Conflict`. Optimistic: aborts with
    /// `Conflict` if the tree moved since the proposal was read (§4.C).
    #[instrument(skip(self, token), fields(mutation_id = %token.mutation.mutation_id))]
    pub fn commit(&self, token: ProposalToken, contradiction_density: f64) -> Result<u64> {
        let mut tree = self.tree.write().expect("knowledge tree lock poisoned");
        if tree.version != token.base_version {
            return Err(Error::Conflict { base: token.base_version, current: tree.version });
        }

        let mut candidate = tree.clone();
        apply_mutation(&mut candidate, &token.mutation)?;
        candidate.version = tree.version + 1;
        candidate.last_updated = chrono::Utc::now();
        candidate.recompute(contradiction_density)?;
        candidate.check_invariants(crate::domain::DEFAULT_MIN_COHERENCE)?;

        let diff = serde_json::json!({
            "target": mutation_target_label(&token.mutation.target),
            "mutation_type": token.mutation.mutation_type,
        });
        let entry = WalEntry {
            version: candidate.version,
            offset: 0,
            mutation_json: serde_json::to_vec(&token.mutation)?,
            diff_json: serde_json::to_vec(&diff)?,
            commit_hash: candidate.context_hash.clone(),
        };
        self.wal.append(&entry)?;

        let new_version = candidate.version;
        *tree = candidate;
        drop(tree);

        let mut counter = self.commits_since_snapshot.write().expect("snapshot counter lock poisoned");
        *counter += 1;
        if *counter >= self.snapshot_every {
            *counter = 0;
            drop(counter);
            self.snapshot()?;
        }

        Ok(new_version)
    }

    /// Roll the tree back to a previously committed version by restoring the
    /// most recent snapshot at or before it and replaying the WAL up to
    /// (not including) the target's successor.
    pub fn rollback(&self, target_version: u64) -> Result<()> {
        let snapshot = Snapshot::load_latest(&self.snapshot_dir)?
            .ok_or_else(|| Error::StoreUnavailable("no snapshot available for rollback".to_string()))?;
        let mut tree = snapshot.tree;
        for entry in self.wal.replay_from(snapshot.wal_offset)? {
            if entry.version > target_version {
                break;
            }
            apply_entry_in_place(&mut tree, &entry)?;
        }
        let mut guard = self.tree.write().expect("knowledge tree lock poisoned");
        *guard = tree;
        Ok(())
    }

    /// Serialize the whole tree + WAL offset to a fresh snapshot file.
    pub fn snapshot(&self) -> Result<PathBuf> {
        let tree = self.tree.read().expect("knowledge tree lock poisoned").clone();
        let wal_offset = self.wal.tail_offset();
        Snapshot { tree, wal_offset }.write(&self.snapshot_dir)
    }

    /// Restore the tree from an explicit snapshot file (`store restore`, §6).
    pub fn restore(&self, path: &std::path::Path) -> Result<()> {
        let snapshot = Snapshot::load(path)?;
        let mut tree = self.tree.write().expect("knowledge tree lock poisoned");
        *tree = snapshot.tree;
        Ok(())
    }

    /// Background invariant audit (§4.F: "every snapshot, discovering
    /// drift"). Returns the violation, if any, so the pipeline can roll the
    /// tree back and emit a critical alert without re-deriving the check.
    pub fn audit_invariants(&self, min_coherence_score: f64) -> Result<()> {
        let tree = self.tree.read().expect("knowledge tree lock poisoned");
        tree.check_invariants(min_coherence_score)
    }
}

fn mutation_target_label(target: &MutationTarget) -> String {
    match target {
        MutationTarget::Domain(id) => id.as_upper_snake().to_string(),
        MutationTarget::Field { domain, field } => format!("{}.{}", domain.as_upper_snake(), field),
    }
}

/// Apply a mutation's effect to a working copy of the tree. This is the only
/// place mutation semantics are interpreted; validator and evaluators only
/// gate whether a mutation may reach this point.
fn apply_mutation(tree: &mut KnowledgeTree, mutation: &Mutation) -> Result<()> {
    match (&mutation.mutation_type, &mutation.target) {
        (MutationType::AddDomain, MutationTarget::Domain(id)) => {
            let domain_type: crate::domain::DomainType =
                serde_json::from_value(mutation.new_value.get("type").cloned().unwrap_or_default())
                    .unwrap_or(crate::domain::DomainType::AiDerived);
            let criticality: crate::domain::Criticality = serde_json::from_value(
                mutation.new_value.get("criticality").cloned().unwrap_or_default(),
            )
            .unwrap_or(crate::domain::Criticality::Low);
            let owner = mutation
                .new_value
                .get("owner")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string();
            tree.domains
                .entry(*id)
                .or_insert_with(|| crate::domain::Domain::new(domain_type, criticality, owner));
        }
        (MutationType::UpdateDomain, MutationTarget::Domain(id)) => {
            if let Some(domain) = tree.domains.get_mut(id) {
                if let Some(deps) = mutation.new_value.get("dependencies").and_then(|v| v.as_array()) {
                    let mut parsed = Vec::with_capacity(deps.len());
                    for dep in deps {
                        parsed.push(crate::domain::DomainId::parse(dep.as_str().unwrap_or_default())?);
                    }
                    domain.dependencies = parsed;
                }
                if let Some(owner) = mutation.new_value.get("owner").and_then(|v| v.as_str()) {
                    domain.owner = owner.to_string();
                }
                domain.confidence = mutation.confidence;
            }
        }
        (MutationType::AddInsight, MutationTarget::Field { domain, field }) => {
            if let Some(domain) = tree.domains.get_mut(domain) {
                domain.fields.insert(
                    field.clone(),
                    crate::domain::Field::new(
                        mutation.new_value.clone(),
                        mutation.confidence,
                        mutation.source.clone(),
                    ),
                );
            }
        }
        (MutationType::UpdateField, MutationTarget::Field { domain, field }) => {
            if let Some(domain) = tree.domains.get_mut(domain) {
                if let Some(existing) = domain.fields.get_mut(field) {
                    existing.value = mutation.new_value.clone();
                    existing.confidence = mutation.confidence;
                    existing.source = mutation.source.clone();
                    existing.timestamp = chrono::Utc::now();
                } else {
                    domain.fields.insert(
                        field.clone(),
                        crate::domain::Field::new(
                            mutation.new_value.clone(),
                            mutation.confidence,
                            mutation.source.clone(),
                        ),
                    );
                }
                domain.confidence = mutation.confidence.max(domain.confidence);
            }
        }
        (MutationType::RemoveField, MutationTarget::Field { domain, field }) => {
            if let Some(domain) = tree.domains.get_mut(domain) {
                domain.fields.remove(field);
            }
        }
        _ => return Err(Error::SchemaInvalid("mutation type/target combination not applicable".to_string())),
    }
    Ok(())
}

fn apply_entry_in_place(tree: &mut KnowledgeTree, entry: &WalEntry) -> Result<()> {
    let mutation: Mutation = serde_json::from_slice(&entry.mutation_json)?;
    apply_mutation(tree, &mutation)?;
    tree.version = entry.version;
    tree.context_hash = entry.commit_hash.clone();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::{Mutation, MutationTarget, MutationType};

    #[test]
    fn propose_and_commit_happy_path_advances_version() {
        let store = KnowledgeStore::in_memory().unwrap();
        let (version, _) = store.current();
        let mutation = Mutation::new(
            MutationType::AddInsight,
            MutationTarget::parse("PAIN_POINTS.problemas_actuales").unwrap(),
            serde_json::json!("Context drift"),
            0.9,
            "ai_system",
            version,
        );
        let token = store.propose(mutation).unwrap();
        let new_version = store.commit(token, 0.0).unwrap();
        assert_eq!(new_version, version + 1);
    }

    #[test]
    fn commit_with_stale_base_version_returns_conflict() {
        let store = KnowledgeStore::in_memory().unwrap();
        let (version, _) = store.current();
        let mutation1 = Mutation::new(
            MutationType::AddInsight,
            MutationTarget::parse("PAIN_POINTS.problemas_actuales").unwrap(),
            serde_json::json!("first"),
            0.9,
            "ai_system",
            version,
        );
        let token1 = store.propose(mutation1).unwrap();
        store.commit(token1, 0.0).unwrap();

        let mutation2 = Mutation::new(
            MutationType::AddInsight,
            MutationTarget::parse("PAIN_POINTS.otra_cosa").unwrap(),
            serde_json::json!("second"),
            0.9,
            "ai_system",
            version,
        );
        let mut token2 = store.propose(mutation2).unwrap();
        token2.base_version = version;
        let result = store.commit(token2, 0.0);
        assert!(matches!(result, Err(Error::Conflict { .. })));
    }

    #[test]
    fn snapshot_and_restore_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = KnowledgeStore::open(dir.path().to_path_buf(), &StoreOptions::default()).unwrap();
        let (version, _) = store.current();
        let mutation = Mutation::new(
            MutationType::AddInsight,
            MutationTarget::parse("GOALS.target_revenue").unwrap(),
            serde_json::json!(1_000_000),
            0.9,
            "ai_system",
            version,
        );
        let token = store.propose(mutation).unwrap();
        store.commit(token, 0.0).unwrap();

        let snapshot_path = store.snapshot().unwrap();
        let (_, before) = store.current();
        store.restore(&snapshot_path).unwrap();
        let (_, after) = store.current();
        assert_eq!(before, after);
    }
}
