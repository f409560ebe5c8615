//! Hierarchical deletion.
//!
//! A subtree rooted at a company, department or position is removed inside
//! one transaction. Its company, department and position rows are locked
//! before the first résumé is touched. Every candidate's résumé object is
//! deleted before the candidate row, and rows go bottom-up (candidates,
//! positions, departments, company). Any failure abandons the transaction so no row of the subtree
//! disappears. Objects already removed from storage before the failure stay
//! removed; storage has no transactions to undo them.

use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::access::{self, Actor};
use crate::error::{DomainError, DomainResult, EntityKind};
use crate::models::Candidate;
use crate::scoring::is_qualifying;
use crate::storage::ObjectStorage;
use crate::store::{Store, StoreTx};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeRoot {
    Company(Uuid),
    Department(Uuid),
    Position(Uuid),
}

/// What a cascade removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CascadeReport {
    pub companies: usize,
    pub departments: usize,
    pub positions: usize,
    pub candidates: usize,
    pub artifacts: usize,
}

impl CascadeReport {
    pub fn rows(&self) -> usize {
        self.companies + self.departments + self.positions + self.candidates
    }
}

pub struct CascadeDeleter<'a> {
    store: &'a dyn Store,
    storage: &'a dyn ObjectStorage,
}

impl<'a> CascadeDeleter<'a> {
    pub fn new(store: &'a dyn Store, storage: &'a dyn ObjectStorage) -> Self {
        Self { store, storage }
    }

    pub async fn delete_subtree(
        &self,
        actor: &Actor,
        root: CascadeRoot,
    ) -> DomainResult<CascadeReport> {
        self.delete_subtrees(actor, &[root]).await
    }

    /// Removes several subtrees as one unit. All roots are authorized before
    /// anything is deleted, so one foreign root leaves every other root intact.
    pub async fn delete_subtrees(
        &self,
        actor: &Actor,
        roots: &[CascadeRoot],
    ) -> DomainResult<CascadeReport> {
        let mut tx = self.store.begin()?;
        for root in roots {
            authorize_root(tx.as_mut(), actor, *root)?;
        }

        let mut report = CascadeReport::default();
        let outcome = self.remove_roots(tx.as_mut(), roots, &mut report).await;
        finish(tx, outcome)?;

        info!(
            roots = roots.len(),
            companies = report.companies,
            departments = report.departments,
            positions = report.positions,
            candidates = report.candidates,
            artifacts = report.artifacts,
            "cascade delete committed"
        );
        Ok(report)
    }

    /// Removes individual candidates, keeping the counters of their
    /// positions in step.
    pub async fn delete_candidates(
        &self,
        actor: &Actor,
        ids: &[Uuid],
    ) -> DomainResult<CascadeReport> {
        let mut tx = self.store.begin()?;
        let mut candidates = Vec::with_capacity(ids.len());
        for id in ids {
            if candidates.iter().any(|c: &Candidate| c.id == *id) {
                continue;
            }
            candidates.push(access::authorize_candidate(tx.as_mut(), actor, *id)?);
        }

        let mut report = CascadeReport::default();
        let outcome = self
            .remove_detached_candidates(tx.as_mut(), &candidates, &mut report)
            .await;
        finish(tx, outcome)?;

        info!(
            candidates = report.candidates,
            artifacts = report.artifacts,
            "candidate delete committed"
        );
        Ok(report)
    }

    async fn remove_roots(
        &self,
        tx: &mut dyn StoreTx,
        roots: &[CascadeRoot],
        report: &mut CascadeReport,
    ) -> DomainResult<()> {
        let mut tree = LockedTree::default();
        for root in roots {
            tree.lock_root(tx, *root)?;
        }

        for position_id in &tree.positions {
            for candidate in tx.lock_candidates_of_position(*position_id)? {
                self.remove_candidate(tx, &candidate, report).await?;
            }
            tx.delete_position(*position_id)?;
            report.positions += 1;
        }
        for department_id in &tree.departments {
            tx.delete_department(*department_id)?;
            report.departments += 1;
        }
        for company_id in &tree.companies {
            tx.delete_company(*company_id)?;
            report.companies += 1;
        }
        Ok(())
    }

    async fn remove_detached_candidates(
        &self,
        tx: &mut dyn StoreTx,
        candidates: &[Candidate],
        report: &mut CascadeReport,
    ) -> DomainResult<()> {
        for candidate in candidates {
            let Some(current) = tx.lock_candidate(candidate.id)? else {
                return Err(DomainError::NotFound(EntityKind::Candidate));
            };
            self.remove_candidate(tx, &current, report).await?;
            let filtered_delta = if is_qualifying(current.score) { -1 } else { 0 };
            tx.adjust_position_counters(current.position_id, -1, filtered_delta)?;
        }
        Ok(())
    }

    async fn remove_candidate(
        &self,
        tx: &mut dyn StoreTx,
        candidate: &Candidate,
        report: &mut CascadeReport,
    ) -> DomainResult<()> {
        if !candidate.cv_file_key.is_empty() {
            if let Err(err) = self.storage.delete_object(&candidate.cv_file_key).await {
                warn!(
                    candidate_id = %candidate.id,
                    key = %candidate.cv_file_key,
                    error = %err,
                    "failed to delete résumé object"
                );
                return Err(DomainError::StorageFailure(format!(
                    "could not delete {}: {err:#}",
                    candidate.cv_file_key
                )));
            }
            report.artifacts += 1;
        }
        tx.delete_candidate(candidate.id)?;
        report.candidates += 1;
        Ok(())
    }
}

/// Every structural row of the subtrees being removed, locked before the
/// first résumé is touched. While the positions are locked no transaction
/// can add a candidate under them, so the candidates enumerated later are
/// the complete set.
#[derive(Default)]
struct LockedTree {
    companies: Vec<Uuid>,
    departments: Vec<Uuid>,
    positions: Vec<Uuid>,
}

impl LockedTree {
    fn lock_root(&mut self, tx: &mut dyn StoreTx, root: CascadeRoot) -> DomainResult<()> {
        match root {
            CascadeRoot::Company(id) => {
                if self.companies.contains(&id) {
                    return Ok(());
                }
                tx.lock_company(id)?
                    .ok_or(DomainError::NotFound(EntityKind::Company))?;
                for department in tx.lock_departments_of_company(id)? {
                    self.lock_department(tx, department.id)?;
                }
                self.companies.push(id);
            }
            CascadeRoot::Department(id) => {
                if self.departments.contains(&id) {
                    return Ok(());
                }
                tx.lock_department(id)?
                    .ok_or(DomainError::NotFound(EntityKind::Department))?;
                self.lock_department(tx, id)?;
            }
            CascadeRoot::Position(id) => {
                if self.positions.contains(&id) {
                    return Ok(());
                }
                tx.lock_position(id)?
                    .ok_or(DomainError::NotFound(EntityKind::Position))?;
                self.positions.push(id);
            }
        }
        Ok(())
    }

    fn lock_department(&mut self, tx: &mut dyn StoreTx, id: Uuid) -> DomainResult<()> {
        if self.departments.contains(&id) {
            return Ok(());
        }
        for position in tx.lock_positions_of_department(id)? {
            if !self.positions.contains(&position.id) {
                self.positions.push(position.id);
            }
        }
        self.departments.push(id);
        Ok(())
    }
}

fn authorize_root(tx: &mut dyn StoreTx, actor: &Actor, root: CascadeRoot) -> DomainResult<()> {
    match root {
        CascadeRoot::Company(id) => access::authorize_company(tx, actor, id).map(|_| ()),
        CascadeRoot::Department(id) => access::authorize_department(tx, actor, id).map(|_| ()),
        CascadeRoot::Position(id) => access::authorize_position(tx, actor, id).map(|_| ()),
    }
}

fn finish(tx: Box<dyn StoreTx>, outcome: DomainResult<()>) -> DomainResult<()> {
    match outcome {
        Ok(()) => tx.commit(),
        Err(err) => {
            if let Err(rollback_err) = tx.rollback() {
                error!(error = %rollback_err, "rollback after failed cascade also failed");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;

    use super::*;
    use crate::models::{NewCandidate, NewCompany, NewDepartment, NewPosition};
    use crate::store::MemoryStore;

    #[derive(Default)]
    struct RecordingStorage {
        deleted: Mutex<Vec<String>>,
        failing: Mutex<HashSet<String>>,
    }

    impl RecordingStorage {
        fn fail_on(&self, key: &str) {
            self.failing.lock().unwrap().insert(key.to_string());
        }

        fn heal(&self) {
            self.failing.lock().unwrap().clear();
        }

        fn deleted(&self) -> Vec<String> {
            self.deleted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ObjectStorage for RecordingStorage {
        async fn put_object(
            &self,
            key: &str,
            _bytes: Vec<u8>,
            _content_type: Option<String>,
        ) -> Result<String> {
            Ok(format!("memory://{key}"))
        }

        async fn delete_object(&self, key: &str) -> Result<()> {
            if self.failing.lock().unwrap().contains(key) {
                return Err(anyhow!("storage unavailable"));
            }
            self.deleted.lock().unwrap().push(key.to_string());
            Ok(())
        }
    }

    struct Seeded {
        company: Uuid,
        departments: Vec<Uuid>,
        positions: Vec<Uuid>,
        candidates: Vec<(Uuid, String)>,
    }

    /// One company with `n` departments, `m` positions each and `k`
    /// candidates per position.
    fn seed(store: &MemoryStore, name: &str, n: usize, m: usize, k: usize) -> Seeded {
        let mut tx = store.begin().unwrap();
        let company = tx
            .insert_company(NewCompany {
                id: Uuid::new_v4(),
                name: name.to_string(),
                address: "1 Main St".to_string(),
            })
            .unwrap();
        let mut seeded = Seeded {
            company: company.id,
            departments: Vec::new(),
            positions: Vec::new(),
            candidates: Vec::new(),
        };
        for d in 0..n {
            let department = tx
                .insert_department(NewDepartment {
                    id: Uuid::new_v4(),
                    company_id: company.id,
                    name: format!("Department {d}"),
                })
                .unwrap();
            seeded.departments.push(department.id);
            for p in 0..m {
                let position = tx
                    .insert_position(NewPosition {
                        id: Uuid::new_v4(),
                        department_id: department.id,
                        name: format!("Position {p}"),
                        education: "BSc".to_string(),
                        location: "Remote".to_string(),
                        min_work_exp: 1,
                        description: String::new(),
                        qualification: String::new(),
                    })
                    .unwrap();
                seeded.positions.push(position.id);
                for c in 0..k {
                    let key = format!("cv_files/{name}-{d}-{p}-{c}.pdf");
                    let candidate = tx
                        .insert_candidate(NewCandidate {
                            id: Uuid::new_v4(),
                            position_id: position.id,
                            name: format!("Candidate {c}"),
                            email: format!("c{c}@example.com"),
                            domicile: "Berlin".to_string(),
                            cv_file_key: key.clone(),
                            cv_file_url: format!("memory://{key}"),
                        })
                        .unwrap();
                    tx.adjust_position_counters(position.id, 1, 0).unwrap();
                    seeded.candidates.push((candidate.id, key));
                }
            }
        }
        tx.commit().unwrap();
        seeded
    }

    fn actor_for(company: Uuid) -> Actor {
        Actor {
            user_id: Uuid::new_v4(),
            company_id: Some(company),
        }
    }

    #[tokio::test]
    async fn company_cascade_removes_whole_subtree() {
        let store = MemoryStore::new();
        let storage = RecordingStorage::default();
        let seeded = seed(&store, "Initech", 2, 3, 2);
        let other = seed(&store, "Umbrella", 1, 1, 1);

        let deleter = CascadeDeleter::new(&store, &storage);
        let report = deleter
            .delete_subtree(&actor_for(seeded.company), CascadeRoot::Company(seeded.company))
            .await
            .unwrap();

        assert_eq!(report.rows(), 1 + 2 + 2 * 3 + 2 * 3 * 2);
        assert_eq!(report.artifacts, 12);
        assert_eq!(storage.deleted().len(), 12);

        let snapshot = store.snapshot();
        assert!(!snapshot.companies.contains_key(&seeded.company));
        assert!(snapshot.departments.keys().all(|id| !seeded.departments.contains(id)));
        assert!(snapshot.positions.keys().all(|id| !seeded.positions.contains(id)));
        assert!(snapshot
            .candidates
            .keys()
            .all(|id| seeded.candidates.iter().all(|(seeded_id, _)| seeded_id != id)));
        assert!(snapshot.companies.contains_key(&other.company));
        assert_eq!(snapshot.candidates.len(), 1);
    }

    #[tokio::test]
    async fn storage_failure_rolls_back_every_row() {
        let store = MemoryStore::new();
        let storage = RecordingStorage::default();
        let seeded = seed(&store, "Initech", 1, 2, 3);
        let before = store.snapshot();

        let (_, last_key) = seeded.candidates.last().unwrap();
        storage.fail_on(last_key);

        let deleter = CascadeDeleter::new(&store, &storage);
        let err = deleter
            .delete_subtree(
                &actor_for(seeded.company),
                CascadeRoot::Department(seeded.departments[0]),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::StorageFailure(_)));
        assert_eq!(store.snapshot(), before);
    }

    #[tokio::test]
    async fn retry_after_failure_sees_untouched_rows() {
        let store = MemoryStore::new();
        let storage = RecordingStorage::default();
        let seeded = seed(&store, "Initech", 1, 1, 2);
        let before = store.snapshot();
        storage.fail_on(&seeded.candidates[1].1);

        let deleter = CascadeDeleter::new(&store, &storage);
        let root = CascadeRoot::Position(seeded.positions[0]);
        let actor = actor_for(seeded.company);

        assert!(deleter.delete_subtree(&actor, root).await.is_err());
        assert_eq!(store.snapshot(), before);

        storage.heal();
        let report = deleter.delete_subtree(&actor, root).await.unwrap();
        assert_eq!(report.positions, 1);
        assert_eq!(report.candidates, 2);
        assert!(store.snapshot().positions.is_empty());
    }

    #[tokio::test]
    async fn foreign_root_aborts_before_any_deletion() {
        let store = MemoryStore::new();
        let storage = RecordingStorage::default();
        let mine = seed(&store, "Initech", 1, 2, 1);
        let theirs = seed(&store, "Umbrella", 1, 1, 1);
        let before = store.snapshot();

        let deleter = CascadeDeleter::new(&store, &storage);
        let err = deleter
            .delete_subtrees(
                &actor_for(mine.company),
                &[
                    CascadeRoot::Position(mine.positions[0]),
                    CascadeRoot::Position(theirs.positions[0]),
                ],
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::Denied(EntityKind::Position)));
        assert!(storage.deleted().is_empty());
        assert_eq!(store.snapshot(), before);
    }

    #[tokio::test]
    async fn overlapping_roots_are_removed_once() {
        let store = MemoryStore::new();
        let storage = RecordingStorage::default();
        let seeded = seed(&store, "Initech", 1, 2, 1);

        let deleter = CascadeDeleter::new(&store, &storage);
        let report = deleter
            .delete_subtrees(
                &actor_for(seeded.company),
                &[
                    CascadeRoot::Department(seeded.departments[0]),
                    CascadeRoot::Position(seeded.positions[1]),
                ],
            )
            .await
            .unwrap();

        assert_eq!(report.departments, 1);
        assert_eq!(report.positions, 2);
        assert_eq!(report.candidates, 2);
    }

    #[tokio::test]
    async fn child_root_listed_before_its_company_is_removed_once() {
        let store = MemoryStore::new();
        let storage = RecordingStorage::default();
        let seeded = seed(&store, "Initech", 2, 1, 1);

        let deleter = CascadeDeleter::new(&store, &storage);
        let report = deleter
            .delete_subtrees(
                &actor_for(seeded.company),
                &[
                    CascadeRoot::Position(seeded.positions[1]),
                    CascadeRoot::Company(seeded.company),
                    CascadeRoot::Department(seeded.departments[0]),
                ],
            )
            .await
            .unwrap();

        assert_eq!(report.companies, 1);
        assert_eq!(report.departments, 2);
        assert_eq!(report.positions, 2);
        assert_eq!(report.candidates, 2);
        assert_eq!(storage.deleted().len(), 2);
        assert!(store.snapshot().companies.is_empty());
    }

    #[tokio::test]
    async fn root_missing_at_lock_time_is_not_found() {
        let store = MemoryStore::new();
        let storage = RecordingStorage::default();
        let seeded = seed(&store, "Initech", 1, 1, 1);
        let actor = actor_for(seeded.company);

        let mut tx = store.begin().unwrap();
        let mut tree = LockedTree::default();
        tree.lock_root(tx.as_mut(), CascadeRoot::Position(seeded.positions[0]))
            .unwrap();
        let err = tree
            .lock_root(tx.as_mut(), CascadeRoot::Department(Uuid::new_v4()))
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(EntityKind::Department)));
        drop(tx);

        let deleter = CascadeDeleter::new(&store, &storage);
        let report = deleter
            .delete_subtree(&actor, CascadeRoot::Position(seeded.positions[0]))
            .await
            .unwrap();
        assert_eq!(report.positions, 1);
    }

    #[tokio::test]
    async fn deleting_candidates_updates_position_counters() {
        let store = MemoryStore::new();
        let storage = RecordingStorage::default();
        let seeded = seed(&store, "Initech", 1, 1, 3);
        let position_id = seeded.positions[0];

        {
            let mut tx = store.begin().unwrap();
            let mut scored = tx.candidate(seeded.candidates[0].0).unwrap().unwrap();
            scored.score = 7.0;
            tx.update_candidate(&scored).unwrap();
            tx.adjust_position_counters(position_id, 0, 1).unwrap();
            tx.commit().unwrap();
        }

        let deleter = CascadeDeleter::new(&store, &storage);
        let report = deleter
            .delete_candidates(
                &actor_for(seeded.company),
                &[seeded.candidates[0].0, seeded.candidates[1].0],
            )
            .await
            .unwrap();

        assert_eq!(report.candidates, 2);
        assert_eq!(
            storage.deleted(),
            vec![seeded.candidates[0].1.clone(), seeded.candidates[1].1.clone()]
        );

        let position = store.snapshot().positions[&position_id].clone();
        assert_eq!(position.uploaded_cv, 1);
        assert_eq!(position.filtered_cv, 0);
    }

    #[tokio::test]
    async fn candidate_without_stored_object_skips_storage() {
        let store = MemoryStore::new();
        let storage = RecordingStorage::default();
        let seeded = seed(&store, "Initech", 1, 1, 1);
        {
            let mut tx = store.begin().unwrap();
            let mut candidate = tx.candidate(seeded.candidates[0].0).unwrap().unwrap();
            candidate.cv_file_key.clear();
            tx.update_candidate(&candidate).unwrap();
            tx.commit().unwrap();
        }

        let deleter = CascadeDeleter::new(&store, &storage);
        let report = deleter
            .delete_subtree(
                &actor_for(seeded.company),
                CascadeRoot::Position(seeded.positions[0]),
            )
            .await
            .unwrap();

        assert_eq!(report.artifacts, 0);
        assert_eq!(report.candidates, 1);
        assert!(storage.deleted().is_empty());
    }
}
