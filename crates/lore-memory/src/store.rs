//! The per-persona memory store.
//!
//! Records live in memory behind a non-poisoning mutex and are persisted as
//! one JSON document. Insertion order is kept, so later records are more
//! recent; ties in ranking go to the more recent record.
//!
//! Collaborator calls (embedding, similarity search) never run with the lock
//! held: candidates are snapshotted, ranked, then the outcome is applied
//! under a second short lock.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::MemoryConfig;
use crate::error::{MemoryError, Result};
use crate::retrieval::RetrievalAdapter;
use crate::types::{InsertionPolicy, MemoryId, MemoryRecord, normalize_padded};

/// Version written into persisted store documents.
const STORE_VERSION: u32 = 1;

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// What [`MemoryStore::commit`] did to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// No record with that id exists.
    Missing,
    /// The record was offered but not used; nothing changed.
    Unused,
    /// Usage time recorded, policy unchanged.
    Touched,
    /// Usage time recorded and the policy moved to `Trigger`.
    Promoted,
    /// The record was one-shot and has been removed.
    Removed,
}

/// Counts for inspection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total: usize,
    pub pending_embeddings: usize,
    pub by_policy: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    records: Vec<MemoryRecord>,
    #[serde(default)]
    pending_embeddings: Vec<MemoryId>,
}

#[derive(Debug, Default)]
struct StoreState {
    records: Vec<MemoryRecord>,
    pending: Vec<MemoryId>,
}

impl StoreState {
    fn find(&self, id: MemoryId) -> Option<&MemoryRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    fn find_mut(&mut self, id: MemoryId) -> Option<&mut MemoryRecord> {
        self.records.iter_mut().find(|r| r.id == id)
    }

    fn remove(&mut self, id: MemoryId) -> bool {
        let before = self.records.len();
        self.records.retain(|r| r.id != id);
        self.pending.retain(|p| *p != id);
        self.records.len() != before
    }
}

/// Outcome of one natural selection round.
///
/// Selection does not touch wait counters. Once the turn that used the
/// selection has succeeded, pass `passed_over` to
/// [`MemoryStore::mark_passed_over`].
#[derive(Debug, Clone, Default)]
pub struct NaturalSelection {
    pub winner: Option<MemoryRecord>,
    /// Evaluated natural-class records that did not win.
    pub passed_over: Vec<MemoryId>,
}

/// A natural-class record captured for one selection round.
struct NaturalCandidate {
    id: MemoryId,
    position: usize,
    forced_turns: Option<u32>,
    keyword_hit: bool,
    embedding: Option<Vec<f32>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory Store
// ─────────────────────────────────────────────────────────────────────────────

/// Durable collection of one persona's memories.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    config: MemoryConfig,
    retrieval: Option<RetrievalAdapter>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            config,
            retrieval: None,
        }
    }

    /// Attach the embedding and similarity-search collaborators.
    pub fn with_retrieval(mut self, retrieval: RetrievalAdapter) -> Self {
        self.retrieval = Some(retrieval);
        self
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    fn active_retrieval(&self) -> Option<&RetrievalAdapter> {
        if self.config.retrieval_enabled {
            self.retrieval.as_ref()
        } else {
            None
        }
    }

    // ── Basic access ─────────────────────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().records.is_empty()
    }

    pub fn get(&self, id: MemoryId) -> Option<MemoryRecord> {
        self.state.lock().find(id).cloned()
    }

    /// Snapshot of all records, oldest first.
    pub fn records(&self) -> Vec<MemoryRecord> {
        self.state.lock().records.clone()
    }

    /// Number of records waiting for an embedding.
    pub fn pending_embeddings(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn stats(&self) -> StoreStats {
        let state = self.state.lock();
        let mut stats = StoreStats {
            total: state.records.len(),
            pending_embeddings: state.pending.len(),
            ..Default::default()
        };
        for record in &state.records {
            *stats
                .by_policy
                .entry(record.policy.as_str().to_string())
                .or_default() += 1;
            *stats
                .by_category
                .entry(record.category.to_string())
                .or_default() += 1;
        }
        stats
    }

    // ── Mutation ─────────────────────────────────────────────────────────────

    /// Insert a record unless an equivalent one exists.
    ///
    /// Returns `false` for duplicates. Records without an embedding are
    /// queued for [`embed_pending`](Self::embed_pending) when retrieval is
    /// enabled.
    pub fn memorize(&self, record: MemoryRecord) -> bool {
        let mut state = self.state.lock();
        if let Some(existing) = state.records.iter().find(|r| r.is_equivalent(&record)) {
            tracing::debug!(
                existing = %existing.id,
                category = %record.category,
                "Skipping duplicate memory"
            );
            return false;
        }

        if self.config.retrieval_enabled && !record.has_embedding() {
            state.pending.push(record.id);
        }
        tracing::debug!(
            id = %record.id,
            category = %record.category,
            policy = %record.policy,
            priority = record.priority,
            "Memorized record"
        );
        state.records.push(record);
        true
    }

    /// Remove a record. Returns whether it existed.
    pub fn forget(&self, id: MemoryId) -> bool {
        let removed = self.state.lock().remove(id);
        if removed {
            tracing::debug!(%id, "Forgot record");
        }
        removed
    }

    /// Change a record's policy. This is the only way into or out of
    /// `Disabled`.
    pub fn set_policy(&self, id: MemoryId, policy: InsertionPolicy) -> bool {
        let mut state = self.state.lock();
        match state.find_mut(id) {
            Some(record) => {
                tracing::debug!(%id, from = %record.policy, to = %policy, "Policy set");
                record.policy = policy;
                record.turns_unused = 0;
                true
            }
            None => false,
        }
    }

    /// Record the outcome of offering a record to a prompt.
    pub fn commit(&self, id: MemoryId, used: bool) -> CommitOutcome {
        let mut state = self.state.lock();
        let Some(record) = state.find_mut(id) else {
            return CommitOutcome::Missing;
        };
        if !used {
            return CommitOutcome::Unused;
        }

        record.last_triggered_at = Some(Utc::now());
        record.turns_unused = 0;

        let previous = record.policy;
        if previous == InsertionPolicy::Natural && record.priority == 0 {
            state.remove(id);
            tracing::debug!(%id, "One-shot memory used and removed");
            return CommitOutcome::Removed;
        }

        record.policy = previous.after_use();
        if record.policy != previous {
            tracing::debug!(%id, from = %previous, to = %record.policy, "Memory promoted");
            CommitOutcome::Promoted
        } else {
            CommitOutcome::Touched
        }
    }

    /// Remove stale, low-priority records of decayable categories.
    ///
    /// A record is stale when its last use (or creation, if never used) is
    /// older than the configured threshold. Returns the removed ids.
    pub fn decay_sweep(&self, now: DateTime<Utc>) -> Vec<MemoryId> {
        let decay = &self.config.decay;
        let threshold = now - decay.stale_after;

        let mut state = self.state.lock();
        let removed: Vec<MemoryId> = state
            .records
            .iter()
            .filter(|r| {
                decay.categories.contains(&r.category)
                    && r.priority <= decay.priority_floor
                    && r.last_activity() < threshold
            })
            .map(|r| r.id)
            .collect();

        for id in &removed {
            state.remove(*id);
        }

        if !removed.is_empty() {
            tracing::info!(
                removed = removed.len(),
                remaining = state.records.len(),
                "Decay sweep removed stale memories"
            );
        }
        removed
    }

    // ── Selection ────────────────────────────────────────────────────────────

    /// All `Trigger` records with a non-empty embedding.
    pub fn eligible_for_similarity_search(&self) -> Vec<MemoryRecord> {
        self.state
            .lock()
            .records
            .iter()
            .filter(|r| r.policy == InsertionPolicy::Trigger && r.has_embedding())
            .cloned()
            .collect()
    }

    /// Non-disabled records with a keyword occurring in `text`, most recent
    /// first.
    pub fn keyword_hits(&self, text: &str) -> Vec<MemoryRecord> {
        let padded = normalize_padded(text);
        self.state
            .lock()
            .records
            .iter()
            .rev()
            .filter(|r| !r.policy.is_disabled() && r.matches_keywords(&padded))
            .cloned()
            .collect()
    }

    /// Pick at most one natural-class record for this turn.
    ///
    /// A forced-natural record that has waited at least `forced_after_turns`
    /// rounds wins outright, longest wait first. Otherwise the nearest record
    /// within the natural cutoff wins; keyword hits count as distance zero.
    /// Every evaluated record that did not win is listed in
    /// [`NaturalSelection::passed_over`].
    pub async fn eligible_for_natural_insertion(&self, context_text: &str) -> Result<NaturalSelection> {
        let padded = normalize_padded(context_text);
        let candidates: Vec<NaturalCandidate> = {
            let state = self.state.lock();
            state
                .records
                .iter()
                .enumerate()
                .filter(|(_, r)| r.policy.is_natural())
                .map(|(position, r)| NaturalCandidate {
                    id: r.id,
                    position,
                    forced_turns: (r.policy == InsertionPolicy::NaturalForced)
                        .then_some(r.turns_unused),
                    keyword_hit: r.matches_keywords(&padded),
                    embedding: r.embedding.clone().filter(|e| !e.is_empty()),
                })
                .collect()
        };
        if candidates.is_empty() {
            return Ok(NaturalSelection::default());
        }

        let forced = candidates
            .iter()
            .filter(|c| {
                c.forced_turns
                    .is_some_and(|turns| turns >= self.config.forced_after_turns)
            })
            .max_by_key(|c| (c.forced_turns, Reverse(c.position)));

        let winner = match forced {
            Some(c) => {
                tracing::debug!(id = %c.id, waited = ?c.forced_turns, "Forced natural memory wins");
                Some(c.id)
            }
            None => self.nearest_natural(context_text, &candidates).await?,
        };

        let passed_over = candidates
            .iter()
            .map(|c| c.id)
            .filter(|id| Some(*id) != winner)
            .collect();
        let state = self.state.lock();
        Ok(NaturalSelection {
            winner: winner.and_then(|id| state.find(id).cloned()),
            passed_over,
        })
    }

    /// Advance the wait counter of records a completed turn passed over.
    pub fn mark_passed_over(&self, ids: &[MemoryId]) {
        let mut state = self.state.lock();
        for id in ids {
            if let Some(record) = state.find_mut(*id) {
                record.turns_unused = record.turns_unused.saturating_add(1);
            }
        }
    }

    async fn nearest_natural(
        &self,
        context_text: &str,
        candidates: &[NaturalCandidate],
    ) -> Result<Option<MemoryId>> {
        // (distance, position, id); smaller distance wins, then later position.
        let mut scored: Vec<(f32, usize, MemoryId)> = candidates
            .iter()
            .filter(|c| c.keyword_hit)
            .map(|c| (0.0, c.position, c.id))
            .collect();

        if let Some(retrieval) = self.active_retrieval()
            && !context_text.trim().is_empty()
        {
            let embedded: Vec<&NaturalCandidate> =
                candidates.iter().filter(|c| c.embedding.is_some()).collect();
            let corpus: Vec<Vec<f32>> = embedded
                .iter()
                .filter_map(|c| c.embedding.clone())
                .collect();
            let hits = retrieval
                .rank(context_text, &corpus, corpus.len(), self.config.natural_cutoff)
                .await?;
            for hit in hits {
                if let Some(c) = embedded.get(hit.index) {
                    scored.push((hit.distance, c.position, c.id));
                }
            }
        }

        Ok(scored
            .into_iter()
            .min_by(|a, b| a.0.total_cmp(&b.0).then(b.1.cmp(&a.1)))
            .map(|(_, _, id)| id))
    }

    /// Trigger-policy retrieval for the current input.
    ///
    /// Keyword hits come first (most recent first), followed by similarity
    /// hits within the recall cutoff. Duplicates are dropped and the result
    /// is capped at `limit`.
    pub async fn recall(&self, context_text: &str, limit: usize) -> Result<Vec<MemoryRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let padded = normalize_padded(context_text);

        let (mut ids, similarity_ids, corpus) = {
            let state = self.state.lock();
            let keyword_ids: Vec<MemoryId> = state
                .records
                .iter()
                .rev()
                .filter(|r| r.policy == InsertionPolicy::Trigger && r.matches_keywords(&padded))
                .map(|r| r.id)
                .collect();
            // Newest first so equal distances favour recent records.
            let (similarity_ids, corpus): (Vec<MemoryId>, Vec<Vec<f32>>) = state
                .records
                .iter()
                .rev()
                .filter(|r| r.policy == InsertionPolicy::Trigger && r.has_embedding())
                .filter_map(|r| r.embedding.clone().map(|e| (r.id, e)))
                .unzip();
            (keyword_ids, similarity_ids, corpus)
        };

        if let Some(retrieval) = self.active_retrieval()
            && !context_text.trim().is_empty()
        {
            let hits = retrieval
                .rank(context_text, &corpus, limit, self.config.recall_cutoff)
                .await?;
            for hit in hits {
                if let Some(id) = similarity_ids.get(hit.index)
                    && !ids.contains(id)
                {
                    ids.push(*id);
                }
            }
        }
        ids.truncate(limit);

        let state = self.state.lock();
        Ok(ids.into_iter().filter_map(|id| state.find(id).cloned()).collect())
    }

    // ── Embedding queue ──────────────────────────────────────────────────────

    /// Embed every queued record.
    ///
    /// Records that fail (or are not reached before cancellation) stay
    /// queued. Returns how many records received an embedding.
    pub async fn embed_pending(&self, cancel: &CancellationToken) -> Result<usize> {
        let Some(retrieval) = self.active_retrieval() else {
            return Ok(0);
        };

        let work: Vec<(MemoryId, String)> = {
            let state = self.state.lock();
            state
                .pending
                .iter()
                .filter_map(|id| state.find(*id).map(|r| (r.id, r.content.clone())))
                .collect()
        };

        let mut embedded = 0;
        for (id, content) in work {
            if cancel.is_cancelled() {
                return Err(MemoryError::Cancelled);
            }
            let embedding = tokio::select! {
                _ = cancel.cancelled() => return Err(MemoryError::Cancelled),
                result = retrieval.embed(&content) => result,
            };
            let embedding = match embedding {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(%id, error = %e, "Embedding failed, record stays queued");
                    return Err(e);
                }
            };

            let mut state = self.state.lock();
            state.pending.retain(|p| *p != id);
            if let Some(record) = state.find_mut(id) {
                record.embedding = Some(embedding);
                embedded += 1;
            }
        }

        // Ids whose records vanished have nothing left to embed.
        let mut state = self.state.lock();
        let StoreState { records, pending } = &mut *state;
        pending.retain(|id| records.iter().any(|r| r.id == *id));

        if embedded > 0 {
            tracing::debug!(embedded, "Embedded pending memories");
        }
        Ok(embedded)
    }

    // ── Persistence ──────────────────────────────────────────────────────────

    /// Load a store from disk. Missing or corrupt files yield an empty store.
    pub fn load(path: &Path, config: MemoryConfig) -> Self {
        let doc: StoreDocument = lore_types::load_json_or_default(path);
        if doc.version > STORE_VERSION {
            tracing::warn!(
                path = %path.display(),
                version = doc.version,
                supported = STORE_VERSION,
                "Memory file was written by a newer version"
            );
        }
        tracing::debug!(path = %path.display(), records = doc.records.len(), "Loaded memories");
        Self {
            state: Mutex::new(StoreState {
                records: doc.records,
                pending: doc.pending_embeddings,
            }),
            config,
            retrieval: None,
        }
    }

    /// Persist the store. A failed save is logged and returned; the
    /// in-memory state is unaffected.
    pub fn save(&self, path: &Path, backup: bool) -> Result<()> {
        let doc = {
            let state = self.state.lock();
            StoreDocument {
                version: STORE_VERSION,
                records: state.records.clone(),
                pending_embeddings: state.pending.clone(),
            }
        };
        lore_types::save_json(path, &doc, backup).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Failed to save memories");
            MemoryError::from(e)
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
