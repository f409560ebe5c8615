//! Persistence interface for the recruitment entities.
//!
//! Every read and write happens through a [`StoreTx`]. A transaction is
//! committed only by an explicit [`StoreTx::commit`]; dropping it without a
//! commit (early return, `?`, panic unwinding) rolls it back.

pub mod memory;
pub mod pg;

use uuid::Uuid;

use crate::error::DomainResult;
use crate::models::{
    Candidate, Company, Department, NewCandidate, NewCompany, NewDepartment, NewPosition,
    NewUser, Position, User,
};

pub use memory::{MemorySnapshot, MemoryStore};
pub use pg::PgStore;

pub trait Store: Send + Sync + 'static {
    fn begin(&self) -> DomainResult<Box<dyn StoreTx>>;
}

/// Narrows a candidate listing to one company and optionally to a
/// department, a position, or the archived state of the owning position.
#[derive(Debug, Clone, Default)]
pub struct CandidateFilter {
    pub company_id: Uuid,
    pub department_id: Option<Uuid>,
    pub position_id: Option<Uuid>,
    pub archived: Option<bool>,
}

impl CandidateFilter {
    pub fn for_company(company_id: Uuid) -> Self {
        Self {
            company_id,
            ..Default::default()
        }
    }
}

/// One open transaction. Lists are ordered by creation time, then id.
///
/// Plain reads take no row locks. The `lock_*` reads hold an exclusive lock
/// on every returned row until the transaction ends, which also keeps other
/// transactions from inserting children under those rows. `delete_*` fails
/// with `NotFound` when the row is already gone so a racing cascade cannot
/// count it twice.
pub trait StoreTx: Send {
    fn company(&mut self, id: Uuid) -> DomainResult<Option<Company>>;
    fn lock_company(&mut self, id: Uuid) -> DomainResult<Option<Company>>;
    fn company_by_name(&mut self, name: &str) -> DomainResult<Option<Company>>;
    fn list_companies(&mut self) -> DomainResult<Vec<Company>>;
    fn insert_company(&mut self, company: NewCompany) -> DomainResult<Company>;
    fn update_company(&mut self, company: &Company) -> DomainResult<()>;
    fn delete_company(&mut self, id: Uuid) -> DomainResult<()>;

    fn department(&mut self, id: Uuid) -> DomainResult<Option<Department>>;
    fn lock_department(&mut self, id: Uuid) -> DomainResult<Option<Department>>;
    fn department_by_name(
        &mut self,
        company_id: Uuid,
        name: &str,
    ) -> DomainResult<Option<Department>>;
    fn departments_of_company(&mut self, company_id: Uuid) -> DomainResult<Vec<Department>>;
    fn lock_departments_of_company(
        &mut self,
        company_id: Uuid,
    ) -> DomainResult<Vec<Department>>;
    fn insert_department(&mut self, department: NewDepartment) -> DomainResult<Department>;
    fn update_department(&mut self, department: &Department) -> DomainResult<()>;
    fn delete_department(&mut self, id: Uuid) -> DomainResult<()>;

    fn position(&mut self, id: Uuid) -> DomainResult<Option<Position>>;
    fn lock_position(&mut self, id: Uuid) -> DomainResult<Option<Position>>;
    fn position_by_name(
        &mut self,
        department_id: Uuid,
        name: &str,
    ) -> DomainResult<Option<Position>>;
    fn positions_of_department(&mut self, department_id: Uuid) -> DomainResult<Vec<Position>>;
    fn lock_positions_of_department(
        &mut self,
        department_id: Uuid,
    ) -> DomainResult<Vec<Position>>;
    fn positions_of_company(
        &mut self,
        company_id: Uuid,
        archived: Option<bool>,
    ) -> DomainResult<Vec<Position>>;
    fn insert_position(&mut self, position: NewPosition) -> DomainResult<Position>;
    fn update_position(&mut self, position: &Position) -> DomainResult<()>;
    /// Adds the deltas to `uploaded_cv` and `filtered_cv` in place.
    fn adjust_position_counters(
        &mut self,
        id: Uuid,
        uploaded_delta: i32,
        filtered_delta: i32,
    ) -> DomainResult<()>;
    fn delete_position(&mut self, id: Uuid) -> DomainResult<()>;

    fn candidate(&mut self, id: Uuid) -> DomainResult<Option<Candidate>>;
    /// Reads a candidate and holds its row lock until the transaction ends.
    fn lock_candidate(&mut self, id: Uuid) -> DomainResult<Option<Candidate>>;
    fn candidate_by_email(
        &mut self,
        position_id: Uuid,
        email: &str,
    ) -> DomainResult<Option<Candidate>>;
    fn lock_candidates_of_position(
        &mut self,
        position_id: Uuid,
    ) -> DomainResult<Vec<Candidate>>;
    fn search_candidates(&mut self, filter: &CandidateFilter) -> DomainResult<Vec<Candidate>>;
    fn insert_candidate(&mut self, candidate: NewCandidate) -> DomainResult<Candidate>;
    fn update_candidate(&mut self, candidate: &Candidate) -> DomainResult<()>;
    fn delete_candidate(&mut self, id: Uuid) -> DomainResult<()>;

    fn user(&mut self, id: Uuid) -> DomainResult<Option<User>>;
    fn user_by_email(&mut self, email: &str) -> DomainResult<Option<User>>;
    fn users_of_company(&mut self, company_id: Uuid) -> DomainResult<Vec<User>>;
    fn insert_user(&mut self, user: NewUser) -> DomainResult<User>;
    fn update_user(&mut self, user: &User) -> DomainResult<()>;
    fn delete_user(&mut self, id: Uuid) -> DomainResult<()>;

    fn commit(self: Box<Self>) -> DomainResult<()>;
    fn rollback(self: Box<Self>) -> DomainResult<()>;
}
