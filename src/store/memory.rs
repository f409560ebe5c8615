//! In-process store used by the test suite and for local experiments.
//!
//! A transaction works on a private copy of every table. Commit publishes the
//! copy back; it fails with `TransactionFailure` when the transaction wrote
//! something and another transaction committed in the meantime.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{NaiveDateTime, Utc};
use uuid::Uuid;

use crate::error::{DomainError, DomainResult, EntityKind};
use crate::models::{
    Candidate, Company, Department, NewCandidate, NewCompany, NewDepartment, NewPosition,
    NewUser, Position, User,
};

use super::{CandidateFilter, Store, StoreTx};

/// Full copy of every table at one point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemorySnapshot {
    pub companies: BTreeMap<Uuid, Company>,
    pub departments: BTreeMap<Uuid, Department>,
    pub positions: BTreeMap<Uuid, Position>,
    pub candidates: BTreeMap<Uuid, Candidate>,
    pub users: BTreeMap<Uuid, User>,
}

#[derive(Default)]
struct Shared {
    version: u64,
    tables: MemorySnapshot,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the committed state.
    pub fn snapshot(&self) -> MemorySnapshot {
        match self.shared.lock() {
            Ok(guard) => guard.tables.clone(),
            Err(poisoned) => poisoned.into_inner().tables.clone(),
        }
    }

    fn lock(&self) -> DomainResult<MutexGuard<'_, Shared>> {
        self.shared
            .lock()
            .map_err(|_| DomainError::TransactionFailure("memory store poisoned".to_string()))
    }
}

impl Store for MemoryStore {
    fn begin(&self) -> DomainResult<Box<dyn StoreTx>> {
        let guard = self.lock()?;
        Ok(Box::new(MemoryTx {
            shared: self.shared.clone(),
            base_version: guard.version,
            tables: guard.tables.clone(),
            dirty: false,
        }))
    }
}

pub struct MemoryTx {
    shared: Arc<Mutex<Shared>>,
    base_version: u64,
    tables: MemorySnapshot,
    dirty: bool,
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

fn sorted<T: Clone, K: Ord>(rows: impl Iterator<Item = T>, key: impl Fn(&T) -> K) -> Vec<T> {
    let mut rows: Vec<T> = rows.collect();
    rows.sort_by_key(|row| key(row));
    rows
}

fn removed<T>(row: Option<T>, kind: EntityKind) -> DomainResult<()> {
    row.map(|_| ()).ok_or(DomainError::NotFound(kind))
}

impl MemoryTx {
    fn touch(&mut self) {
        self.dirty = true;
    }

    fn ensure_company_name_free(&self, name: &str, except: Option<Uuid>) -> DomainResult<()> {
        let taken = self
            .tables
            .companies
            .values()
            .any(|c| c.name == name && Some(c.id) != except);
        if taken {
            return Err(DomainError::conflict("companies_name_key"));
        }
        Ok(())
    }

    fn ensure_department_name_free(
        &self,
        company_id: Uuid,
        name: &str,
        except: Option<Uuid>,
    ) -> DomainResult<()> {
        let taken = self
            .tables
            .departments
            .values()
            .any(|d| d.company_id == company_id && d.name == name && Some(d.id) != except);
        if taken {
            return Err(DomainError::conflict("departments_company_name_key"));
        }
        Ok(())
    }

    fn ensure_position_name_free(
        &self,
        department_id: Uuid,
        name: &str,
        except: Option<Uuid>,
    ) -> DomainResult<()> {
        let taken = self
            .tables
            .positions
            .values()
            .any(|p| p.department_id == department_id && p.name == name && Some(p.id) != except);
        if taken {
            return Err(DomainError::conflict("positions_department_name_key"));
        }
        Ok(())
    }

    fn ensure_candidate_email_free(
        &self,
        position_id: Uuid,
        email: &str,
        except: Option<Uuid>,
    ) -> DomainResult<()> {
        let taken = self
            .tables
            .candidates
            .values()
            .any(|c| c.position_id == position_id && c.email == email && Some(c.id) != except);
        if taken {
            return Err(DomainError::conflict("candidates_position_email_key"));
        }
        Ok(())
    }

    fn ensure_user_email_free(&self, email: &str, except: Option<Uuid>) -> DomainResult<()> {
        let taken = self
            .tables
            .users
            .values()
            .any(|u| u.email == email && Some(u.id) != except);
        if taken {
            return Err(DomainError::conflict("users_email_key"));
        }
        Ok(())
    }

    fn position_company(&self, position: &Position) -> Option<Uuid> {
        self.tables
            .departments
            .get(&position.department_id)
            .map(|department| department.company_id)
    }
}

impl StoreTx for MemoryTx {
    fn company(&mut self, id: Uuid) -> DomainResult<Option<Company>> {
        Ok(self.tables.companies.get(&id).cloned())
    }

    fn lock_company(&mut self, id: Uuid) -> DomainResult<Option<Company>> {
        self.company(id)
    }

    fn company_by_name(&mut self, name: &str) -> DomainResult<Option<Company>> {
        Ok(self
            .tables
            .companies
            .values()
            .find(|c| c.name == name)
            .cloned())
    }

    fn list_companies(&mut self) -> DomainResult<Vec<Company>> {
        Ok(sorted(self.tables.companies.values().cloned(), |c| {
            (c.created_at, c.id)
        }))
    }

    fn insert_company(&mut self, company: NewCompany) -> DomainResult<Company> {
        self.ensure_company_name_free(&company.name, None)?;
        let row = Company {
            id: company.id,
            name: company.name,
            address: company.address,
            created_at: now(),
        };
        self.touch();
        self.tables.companies.insert(row.id, row.clone());
        Ok(row)
    }

    fn update_company(&mut self, company: &Company) -> DomainResult<()> {
        if !self.tables.companies.contains_key(&company.id) {
            return Err(DomainError::NotFound(EntityKind::Company));
        }
        self.ensure_company_name_free(&company.name, Some(company.id))?;
        self.touch();
        self.tables.companies.insert(company.id, company.clone());
        Ok(())
    }

    fn delete_company(&mut self, id: Uuid) -> DomainResult<()> {
        if self.tables.departments.values().any(|d| d.company_id == id) {
            return Err(DomainError::Database(
                "departments still reference company".to_string(),
            ));
        }
        removed(self.tables.companies.remove(&id), EntityKind::Company)?;
        self.touch();
        for user in self.tables.users.values_mut() {
            if user.company_id == Some(id) {
                user.company_id = None;
            }
        }
        Ok(())
    }

    fn department(&mut self, id: Uuid) -> DomainResult<Option<Department>> {
        Ok(self.tables.departments.get(&id).cloned())
    }

    fn lock_department(&mut self, id: Uuid) -> DomainResult<Option<Department>> {
        self.department(id)
    }

    fn department_by_name(
        &mut self,
        company_id: Uuid,
        name: &str,
    ) -> DomainResult<Option<Department>> {
        Ok(self
            .tables
            .departments
            .values()
            .find(|d| d.company_id == company_id && d.name == name)
            .cloned())
    }

    fn departments_of_company(&mut self, company_id: Uuid) -> DomainResult<Vec<Department>> {
        Ok(sorted(
            self.tables
                .departments
                .values()
                .filter(|d| d.company_id == company_id)
                .cloned(),
            |d| (d.created_at, d.id),
        ))
    }

    fn lock_departments_of_company(
        &mut self,
        company_id: Uuid,
    ) -> DomainResult<Vec<Department>> {
        self.departments_of_company(company_id)
    }

    fn insert_department(&mut self, department: NewDepartment) -> DomainResult<Department> {
        if !self.tables.companies.contains_key(&department.company_id) {
            return Err(DomainError::NotFound(EntityKind::Company));
        }
        self.ensure_department_name_free(department.company_id, &department.name, None)?;
        let row = Department {
            id: department.id,
            company_id: department.company_id,
            name: department.name,
            created_at: now(),
        };
        self.touch();
        self.tables.departments.insert(row.id, row.clone());
        Ok(row)
    }

    fn update_department(&mut self, department: &Department) -> DomainResult<()> {
        if !self.tables.departments.contains_key(&department.id) {
            return Err(DomainError::NotFound(EntityKind::Department));
        }
        self.ensure_department_name_free(
            department.company_id,
            &department.name,
            Some(department.id),
        )?;
        self.touch();
        self.tables
            .departments
            .insert(department.id, department.clone());
        Ok(())
    }

    fn delete_department(&mut self, id: Uuid) -> DomainResult<()> {
        if self.tables.positions.values().any(|p| p.department_id == id) {
            return Err(DomainError::Database(
                "positions still reference department".to_string(),
            ));
        }
        removed(self.tables.departments.remove(&id), EntityKind::Department)?;
        self.touch();
        Ok(())
    }

    fn position(&mut self, id: Uuid) -> DomainResult<Option<Position>> {
        Ok(self.tables.positions.get(&id).cloned())
    }

    fn lock_position(&mut self, id: Uuid) -> DomainResult<Option<Position>> {
        self.position(id)
    }

    fn position_by_name(
        &mut self,
        department_id: Uuid,
        name: &str,
    ) -> DomainResult<Option<Position>> {
        Ok(self
            .tables
            .positions
            .values()
            .find(|p| p.department_id == department_id && p.name == name)
            .cloned())
    }

    fn positions_of_department(&mut self, department_id: Uuid) -> DomainResult<Vec<Position>> {
        Ok(sorted(
            self.tables
                .positions
                .values()
                .filter(|p| p.department_id == department_id)
                .cloned(),
            |p| (p.created_at, p.id),
        ))
    }

    fn lock_positions_of_department(
        &mut self,
        department_id: Uuid,
    ) -> DomainResult<Vec<Position>> {
        self.positions_of_department(department_id)
    }

    fn positions_of_company(
        &mut self,
        company_id: Uuid,
        archived: Option<bool>,
    ) -> DomainResult<Vec<Position>> {
        let rows: Vec<Position> = self
            .tables
            .positions
            .values()
            .filter(|p| self.position_company(p) == Some(company_id))
            .filter(|p| archived.map_or(true, |flag| p.is_archive == flag))
            .cloned()
            .collect();
        Ok(sorted(rows.into_iter(), |p| (p.created_at, p.id)))
    }

    fn insert_position(&mut self, position: NewPosition) -> DomainResult<Position> {
        if !self.tables.departments.contains_key(&position.department_id) {
            return Err(DomainError::NotFound(EntityKind::Department));
        }
        self.ensure_position_name_free(position.department_id, &position.name, None)?;
        let row = Position {
            id: position.id,
            department_id: position.department_id,
            name: position.name,
            education: position.education,
            location: position.location,
            min_work_exp: position.min_work_exp,
            description: position.description,
            qualification: position.qualification,
            is_resolved: false,
            is_trash: false,
            is_archive: false,
            removed_at: None,
            qualified_candidates: String::new(),
            uploaded_cv: 0,
            filtered_cv: 0,
            created_at: now(),
        };
        self.touch();
        self.tables.positions.insert(row.id, row.clone());
        Ok(row)
    }

    fn update_position(&mut self, position: &Position) -> DomainResult<()> {
        if !self.tables.positions.contains_key(&position.id) {
            return Err(DomainError::NotFound(EntityKind::Position));
        }
        self.ensure_position_name_free(position.department_id, &position.name, Some(position.id))?;
        self.touch();
        if let Some(stored) = self.tables.positions.get_mut(&position.id) {
            let (uploaded_cv, filtered_cv) = (stored.uploaded_cv, stored.filtered_cv);
            *stored = Position {
                uploaded_cv,
                filtered_cv,
                ..position.clone()
            };
        }
        Ok(())
    }

    fn adjust_position_counters(
        &mut self,
        id: Uuid,
        uploaded_delta: i32,
        filtered_delta: i32,
    ) -> DomainResult<()> {
        let position = self
            .tables
            .positions
            .get_mut(&id)
            .ok_or(DomainError::NotFound(EntityKind::Position))?;
        position.uploaded_cv += uploaded_delta;
        position.filtered_cv += filtered_delta;
        self.dirty = true;
        Ok(())
    }

    fn delete_position(&mut self, id: Uuid) -> DomainResult<()> {
        if self.tables.candidates.values().any(|c| c.position_id == id) {
            return Err(DomainError::Database(
                "candidates still reference position".to_string(),
            ));
        }
        removed(self.tables.positions.remove(&id), EntityKind::Position)?;
        self.touch();
        Ok(())
    }

    fn candidate(&mut self, id: Uuid) -> DomainResult<Option<Candidate>> {
        Ok(self.tables.candidates.get(&id).cloned())
    }

    fn lock_candidate(&mut self, id: Uuid) -> DomainResult<Option<Candidate>> {
        self.candidate(id)
    }

    fn candidate_by_email(
        &mut self,
        position_id: Uuid,
        email: &str,
    ) -> DomainResult<Option<Candidate>> {
        Ok(self
            .tables
            .candidates
            .values()
            .find(|c| c.position_id == position_id && c.email == email)
            .cloned())
    }

    fn lock_candidates_of_position(
        &mut self,
        position_id: Uuid,
    ) -> DomainResult<Vec<Candidate>> {
        Ok(sorted(
            self.tables
                .candidates
                .values()
                .filter(|c| c.position_id == position_id)
                .cloned(),
            |c| (c.created_at, c.id),
        ))
    }

    fn search_candidates(&mut self, filter: &CandidateFilter) -> DomainResult<Vec<Candidate>> {
        let rows: Vec<Candidate> = self
            .tables
            .candidates
            .values()
            .filter(|candidate| {
                let Some(position) = self.tables.positions.get(&candidate.position_id) else {
                    return false;
                };
                self.position_company(position) == Some(filter.company_id)
                    && filter
                        .department_id
                        .map_or(true, |id| position.department_id == id)
                    && filter.position_id.map_or(true, |id| position.id == id)
                    && filter
                        .archived
                        .map_or(true, |flag| position.is_archive == flag)
            })
            .cloned()
            .collect();
        Ok(sorted(rows.into_iter(), |c| (c.created_at, c.id)))
    }

    fn insert_candidate(&mut self, candidate: NewCandidate) -> DomainResult<Candidate> {
        if !self.tables.positions.contains_key(&candidate.position_id) {
            return Err(DomainError::NotFound(EntityKind::Position));
        }
        self.ensure_candidate_email_free(candidate.position_id, &candidate.email, None)?;
        let row = Candidate {
            id: candidate.id,
            position_id: candidate.position_id,
            name: candidate.name,
            email: candidate.email,
            domicile: candidate.domicile,
            cv_file_key: candidate.cv_file_key,
            cv_file_url: candidate.cv_file_url,
            score: 0.0,
            skills: String::new(),
            is_qualified: false,
            created_at: now(),
        };
        self.touch();
        self.tables.candidates.insert(row.id, row.clone());
        Ok(row)
    }

    fn update_candidate(&mut self, candidate: &Candidate) -> DomainResult<()> {
        if !self.tables.candidates.contains_key(&candidate.id) {
            return Err(DomainError::NotFound(EntityKind::Candidate));
        }
        self.ensure_candidate_email_free(
            candidate.position_id,
            &candidate.email,
            Some(candidate.id),
        )?;
        self.touch();
        self.tables
            .candidates
            .insert(candidate.id, candidate.clone());
        Ok(())
    }

    fn delete_candidate(&mut self, id: Uuid) -> DomainResult<()> {
        removed(self.tables.candidates.remove(&id), EntityKind::Candidate)?;
        self.touch();
        Ok(())
    }

    fn user(&mut self, id: Uuid) -> DomainResult<Option<User>> {
        Ok(self.tables.users.get(&id).cloned())
    }

    fn user_by_email(&mut self, email: &str) -> DomainResult<Option<User>> {
        Ok(self
            .tables
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    fn users_of_company(&mut self, company_id: Uuid) -> DomainResult<Vec<User>> {
        Ok(sorted(
            self.tables
                .users
                .values()
                .filter(|u| u.company_id == Some(company_id))
                .cloned(),
            |u| (u.created_at, u.id),
        ))
    }

    fn insert_user(&mut self, user: NewUser) -> DomainResult<User> {
        if let Some(company_id) = user.company_id {
            if !self.tables.companies.contains_key(&company_id) {
                return Err(DomainError::NotFound(EntityKind::Company));
            }
        }
        self.ensure_user_email_free(&user.email, None)?;
        let timestamp = now();
        let row = User {
            id: user.id,
            company_id: user.company_id,
            name: user.name,
            email: user.email,
            password_hash: user.password_hash,
            phone: user.phone,
            created_at: timestamp,
            updated_at: timestamp,
        };
        self.touch();
        self.tables.users.insert(row.id, row.clone());
        Ok(row)
    }

    fn update_user(&mut self, user: &User) -> DomainResult<()> {
        if !self.tables.users.contains_key(&user.id) {
            return Err(DomainError::NotFound(EntityKind::User));
        }
        self.ensure_user_email_free(&user.email, Some(user.id))?;
        self.touch();
        self.tables.users.insert(user.id, user.clone());
        Ok(())
    }

    fn delete_user(&mut self, id: Uuid) -> DomainResult<()> {
        removed(self.tables.users.remove(&id), EntityKind::User)?;
        self.touch();
        Ok(())
    }

    fn commit(self: Box<Self>) -> DomainResult<()> {
        let MemoryTx {
            shared,
            base_version,
            tables,
            dirty,
        } = *self;
        if !dirty {
            return Ok(());
        }
        let mut guard = shared
            .lock()
            .map_err(|_| DomainError::TransactionFailure("memory store poisoned".to_string()))?;
        if guard.version != base_version {
            return Err(DomainError::TransactionFailure(
                "concurrent modification detected".to_string(),
            ));
        }
        guard.tables = tables;
        guard.version += 1;
        Ok(())
    }

    fn rollback(self: Box<Self>) -> DomainResult<()> {
        Ok(())
    }
}
