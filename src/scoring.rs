//! Candidate scoring and qualification.
//!
//! A candidate counts toward its position's `filtered_cv` while its score is
//! above zero. Counters move only when a score crosses that threshold, so
//! re-applying the same score is a no-op for the position.

use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::access::{self, Actor};
use crate::error::{DomainError, DomainResult, EntityKind};
use crate::models::Candidate;
use crate::store::{Store, StoreTx};

#[derive(Debug, Clone, Deserialize)]
pub struct ScoreUpdate {
    pub id: Uuid,
    pub score: f64,
    #[serde(default)]
    pub skills: String,
}

pub fn is_qualifying(score: f64) -> bool {
    score > 0.0
}

/// Change to a position's `filtered_cv` when one candidate's score moves
/// from `previous` to `next`.
pub fn filtered_delta(previous: f64, next: f64) -> i32 {
    match (is_qualifying(previous), is_qualifying(next)) {
        (false, true) => 1,
        (true, false) => -1,
        _ => 0,
    }
}

/// Applies every update in one transaction and returns the updated rows.
pub fn score_candidates(
    store: &dyn Store,
    actor: &Actor,
    updates: &[ScoreUpdate],
) -> DomainResult<Vec<Candidate>> {
    if let Some(update) = updates.iter().find(|update| !update.score.is_finite()) {
        return Err(DomainError::validation(format!(
            "score for candidate {} must be a finite number",
            update.id
        )));
    }

    let mut tx = store.begin()?;
    let scored = apply_scores(tx.as_mut(), actor, updates)?;
    tx.commit()?;
    Ok(scored)
}

pub fn apply_scores(
    tx: &mut dyn StoreTx,
    actor: &Actor,
    updates: &[ScoreUpdate],
) -> DomainResult<Vec<Candidate>> {
    let mut scored = Vec::with_capacity(updates.len());
    for update in updates {
        access::authorize_candidate(tx, actor, update.id)?;
        let mut candidate = tx
            .lock_candidate(update.id)?
            .ok_or(DomainError::NotFound(EntityKind::Candidate))?;

        let delta = filtered_delta(candidate.score, update.score);
        if delta != 0 {
            tx.adjust_position_counters(candidate.position_id, 0, delta)?;
        }
        debug!(
            candidate_id = %candidate.id,
            previous = candidate.score,
            next = update.score,
            delta,
            "candidate scored"
        );

        candidate.score = update.score;
        candidate.skills = update.skills.clone();
        tx.update_candidate(&candidate)?;
        scored.push(candidate);
    }
    Ok(scored)
}

/// Flips `is_qualified` on each candidate.
pub fn toggle_qualification(
    store: &dyn Store,
    actor: &Actor,
    ids: &[Uuid],
) -> DomainResult<Vec<Candidate>> {
    let mut tx = store.begin()?;
    let mut toggled = Vec::with_capacity(ids.len());
    for id in ids {
        access::authorize_candidate(tx.as_mut(), actor, *id)?;
        let mut candidate = tx
            .lock_candidate(*id)?
            .ok_or(DomainError::NotFound(EntityKind::Candidate))?;
        candidate.is_qualified = !candidate.is_qualified;
        tx.update_candidate(&candidate)?;
        toggled.push(candidate);
    }
    tx.commit()?;
    Ok(toggled)
}
