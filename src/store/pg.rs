use diesel::connection::{AnsiTransactionManager, TransactionManager};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, PooledConnection};
use tracing::warn;
use uuid::Uuid;

use crate::db::PgPool;
use crate::error::{DomainError, DomainResult, EntityKind};
use crate::models::{
    Candidate, Company, Department, NewCandidate, NewCompany, NewDepartment, NewPosition,
    NewUser, Position, User,
};
use crate::schema::{candidates, companies, departments, positions, users};

use super::{CandidateFilter, Store, StoreTx};

type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

/// Position columns a plain update may write. Counters only move through
/// `adjust_position_counters`.
#[derive(AsChangeset)]
#[diesel(table_name = positions)]
#[diesel(treat_none_as_null = true)]
struct PositionChanges<'a> {
    department_id: Uuid,
    name: &'a str,
    education: &'a str,
    location: &'a str,
    min_work_exp: i32,
    description: &'a str,
    qualification: &'a str,
    is_resolved: bool,
    is_trash: bool,
    is_archive: bool,
    removed_at: Option<chrono::NaiveDateTime>,
    qualified_candidates: &'a str,
}

impl<'a> From<&'a Position> for PositionChanges<'a> {
    fn from(position: &'a Position) -> Self {
        Self {
            department_id: position.department_id,
            name: &position.name,
            education: &position.education,
            location: &position.location,
            min_work_exp: position.min_work_exp,
            description: &position.description,
            qualification: &position.qualification,
            is_resolved: position.is_resolved,
            is_trash: position.is_trash,
            is_archive: position.is_archive,
            removed_at: position.removed_at,
            qualified_candidates: &position.qualified_candidates,
        }
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl Store for PgStore {
    fn begin(&self) -> DomainResult<Box<dyn StoreTx>> {
        let mut conn = self
            .pool
            .get()
            .map_err(|err| DomainError::Database(format!("database pool error: {err}")))?;
        AnsiTransactionManager::begin_transaction(&mut *conn)
            .map_err(|err| DomainError::TransactionFailure(err.to_string()))?;
        Ok(Box::new(PgTx {
            conn,
            finished: false,
        }))
    }
}

pub struct PgTx {
    conn: PgPooledConnection,
    finished: bool,
}

impl PgTx {
    fn conn(&mut self) -> &mut PgConnection {
        &mut self.conn
    }
}

impl Drop for PgTx {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(err) = AnsiTransactionManager::rollback_transaction(&mut *self.conn) {
            warn!(error = %err, "failed to roll back abandoned transaction");
        }
    }
}

fn expect_one(affected: usize, kind: EntityKind) -> DomainResult<()> {
    if affected == 0 {
        Err(DomainError::NotFound(kind))
    } else {
        Ok(())
    }
}

impl StoreTx for PgTx {
    fn company(&mut self, id: Uuid) -> DomainResult<Option<Company>> {
        Ok(companies::table
            .find(id)
            .first(self.conn())
            .optional()?)
    }

    fn lock_company(&mut self, id: Uuid) -> DomainResult<Option<Company>> {
        Ok(companies::table
            .find(id)
            .for_update()
            .first(self.conn())
            .optional()?)
    }

    fn company_by_name(&mut self, name: &str) -> DomainResult<Option<Company>> {
        Ok(companies::table
            .filter(companies::name.eq(name))
            .first(self.conn())
            .optional()?)
    }

    fn list_companies(&mut self) -> DomainResult<Vec<Company>> {
        Ok(companies::table
            .order((companies::created_at.asc(), companies::id.asc()))
            .load(self.conn())?)
    }

    fn insert_company(&mut self, company: NewCompany) -> DomainResult<Company> {
        Ok(diesel::insert_into(companies::table)
            .values(&company)
            .get_result(self.conn())?)
    }

    fn update_company(&mut self, company: &Company) -> DomainResult<()> {
        let affected = diesel::update(companies::table.find(company.id))
            .set(company)
            .execute(self.conn())?;
        expect_one(affected, EntityKind::Company)
    }

    fn delete_company(&mut self, id: Uuid) -> DomainResult<()> {
        let affected = diesel::delete(companies::table.find(id)).execute(self.conn())?;
        expect_one(affected, EntityKind::Company)
    }

    fn department(&mut self, id: Uuid) -> DomainResult<Option<Department>> {
        Ok(departments::table
            .find(id)
            .first(self.conn())
            .optional()?)
    }

    fn lock_department(&mut self, id: Uuid) -> DomainResult<Option<Department>> {
        Ok(departments::table
            .find(id)
            .for_update()
            .first(self.conn())
            .optional()?)
    }

    fn department_by_name(
        &mut self,
        company_id: Uuid,
        name: &str,
    ) -> DomainResult<Option<Department>> {
        Ok(departments::table
            .filter(departments::company_id.eq(company_id))
            .filter(departments::name.eq(name))
            .first(self.conn())
            .optional()?)
    }

    fn departments_of_company(&mut self, company_id: Uuid) -> DomainResult<Vec<Department>> {
        Ok(departments::table
            .filter(departments::company_id.eq(company_id))
            .order((departments::created_at.asc(), departments::id.asc()))
            .load(self.conn())?)
    }

    fn lock_departments_of_company(
        &mut self,
        company_id: Uuid,
    ) -> DomainResult<Vec<Department>> {
        Ok(departments::table
            .filter(departments::company_id.eq(company_id))
            .order((departments::created_at.asc(), departments::id.asc()))
            .for_update()
            .load(self.conn())?)
    }

    fn insert_department(&mut self, department: NewDepartment) -> DomainResult<Department> {
        Ok(diesel::insert_into(departments::table)
            .values(&department)
            .get_result(self.conn())?)
    }

    fn update_department(&mut self, department: &Department) -> DomainResult<()> {
        let affected = diesel::update(departments::table.find(department.id))
            .set(department)
            .execute(self.conn())?;
        expect_one(affected, EntityKind::Department)
    }

    fn delete_department(&mut self, id: Uuid) -> DomainResult<()> {
        let affected = diesel::delete(departments::table.find(id)).execute(self.conn())?;
        expect_one(affected, EntityKind::Department)
    }

    fn position(&mut self, id: Uuid) -> DomainResult<Option<Position>> {
        Ok(positions::table
            .find(id)
            .first(self.conn())
            .optional()?)
    }

    fn lock_position(&mut self, id: Uuid) -> DomainResult<Option<Position>> {
        Ok(positions::table
            .find(id)
            .for_update()
            .first(self.conn())
            .optional()?)
    }

    fn position_by_name(
        &mut self,
        department_id: Uuid,
        name: &str,
    ) -> DomainResult<Option<Position>> {
        Ok(positions::table
            .filter(positions::department_id.eq(department_id))
            .filter(positions::name.eq(name))
            .first(self.conn())
            .optional()?)
    }

    fn positions_of_department(&mut self, department_id: Uuid) -> DomainResult<Vec<Position>> {
        Ok(positions::table
            .filter(positions::department_id.eq(department_id))
            .order((positions::created_at.asc(), positions::id.asc()))
            .load(self.conn())?)
    }

    fn lock_positions_of_department(
        &mut self,
        department_id: Uuid,
    ) -> DomainResult<Vec<Position>> {
        Ok(positions::table
            .filter(positions::department_id.eq(department_id))
            .order((positions::created_at.asc(), positions::id.asc()))
            .for_update()
            .load(self.conn())?)
    }

    fn positions_of_company(
        &mut self,
        company_id: Uuid,
        archived: Option<bool>,
    ) -> DomainResult<Vec<Position>> {
        let mut query = positions::table
            .inner_join(departments::table)
            .filter(departments::company_id.eq(company_id))
            .select(positions::all_columns)
            .order((positions::created_at.asc(), positions::id.asc()))
            .into_boxed();

        if let Some(archived) = archived {
            query = query.filter(positions::is_archive.eq(archived));
        }

        Ok(query.load(self.conn())?)
    }

    fn insert_position(&mut self, position: NewPosition) -> DomainResult<Position> {
        Ok(diesel::insert_into(positions::table)
            .values(&position)
            .get_result(self.conn())?)
    }

    fn update_position(&mut self, position: &Position) -> DomainResult<()> {
        let affected = diesel::update(positions::table.find(position.id))
            .set(PositionChanges::from(position))
            .execute(self.conn())?;
        expect_one(affected, EntityKind::Position)
    }

    fn adjust_position_counters(
        &mut self,
        id: Uuid,
        uploaded_delta: i32,
        filtered_delta: i32,
    ) -> DomainResult<()> {
        let affected = diesel::update(positions::table.find(id))
            .set((
                positions::uploaded_cv.eq(positions::uploaded_cv + uploaded_delta),
                positions::filtered_cv.eq(positions::filtered_cv + filtered_delta),
            ))
            .execute(self.conn())?;
        expect_one(affected, EntityKind::Position)
    }

    fn delete_position(&mut self, id: Uuid) -> DomainResult<()> {
        let affected = diesel::delete(positions::table.find(id)).execute(self.conn())?;
        expect_one(affected, EntityKind::Position)
    }

    fn candidate(&mut self, id: Uuid) -> DomainResult<Option<Candidate>> {
        Ok(candidates::table
            .find(id)
            .first(self.conn())
            .optional()?)
    }

    fn lock_candidate(&mut self, id: Uuid) -> DomainResult<Option<Candidate>> {
        Ok(candidates::table
            .find(id)
            .for_update()
            .first(self.conn())
            .optional()?)
    }

    fn candidate_by_email(
        &mut self,
        position_id: Uuid,
        email: &str,
    ) -> DomainResult<Option<Candidate>> {
        Ok(candidates::table
            .filter(candidates::position_id.eq(position_id))
            .filter(candidates::email.eq(email))
            .first(self.conn())
            .optional()?)
    }

    fn lock_candidates_of_position(
        &mut self,
        position_id: Uuid,
    ) -> DomainResult<Vec<Candidate>> {
        Ok(candidates::table
            .filter(candidates::position_id.eq(position_id))
            .order((candidates::created_at.asc(), candidates::id.asc()))
            .for_update()
            .load(self.conn())?)
    }

    fn search_candidates(&mut self, filter: &CandidateFilter) -> DomainResult<Vec<Candidate>> {
        let mut query = candidates::table
            .inner_join(positions::table.inner_join(departments::table))
            .filter(departments::company_id.eq(filter.company_id))
            .select(candidates::all_columns)
            .order((candidates::created_at.asc(), candidates::id.asc()))
            .into_boxed();

        if let Some(department_id) = filter.department_id {
            query = query.filter(positions::department_id.eq(department_id));
        }
        if let Some(position_id) = filter.position_id {
            query = query.filter(candidates::position_id.eq(position_id));
        }
        if let Some(archived) = filter.archived {
            query = query.filter(positions::is_archive.eq(archived));
        }

        Ok(query.load(self.conn())?)
    }

    fn insert_candidate(&mut self, candidate: NewCandidate) -> DomainResult<Candidate> {
        Ok(diesel::insert_into(candidates::table)
            .values(&candidate)
            .get_result(self.conn())?)
    }

    fn update_candidate(&mut self, candidate: &Candidate) -> DomainResult<()> {
        let affected = diesel::update(candidates::table.find(candidate.id))
            .set(candidate)
            .execute(self.conn())?;
        expect_one(affected, EntityKind::Candidate)
    }

    fn delete_candidate(&mut self, id: Uuid) -> DomainResult<()> {
        let affected = diesel::delete(candidates::table.find(id)).execute(self.conn())?;
        expect_one(affected, EntityKind::Candidate)
    }

    fn user(&mut self, id: Uuid) -> DomainResult<Option<User>> {
        Ok(users::table.find(id).first(self.conn()).optional()?)
    }

    fn user_by_email(&mut self, email: &str) -> DomainResult<Option<User>> {
        Ok(users::table
            .filter(users::email.eq(email))
            .first(self.conn())
            .optional()?)
    }

    fn users_of_company(&mut self, company_id: Uuid) -> DomainResult<Vec<User>> {
        Ok(users::table
            .filter(users::company_id.eq(company_id))
            .order((users::created_at.asc(), users::id.asc()))
            .load(self.conn())?)
    }

    fn insert_user(&mut self, user: NewUser) -> DomainResult<User> {
        Ok(diesel::insert_into(users::table)
            .values(&user)
            .get_result(self.conn())?)
    }

    fn update_user(&mut self, user: &User) -> DomainResult<()> {
        let affected = diesel::update(users::table.find(user.id))
            .set(user)
            .execute(self.conn())?;
        expect_one(affected, EntityKind::User)
    }

    fn delete_user(&mut self, id: Uuid) -> DomainResult<()> {
        let affected = diesel::delete(users::table.find(id)).execute(self.conn())?;
        expect_one(affected, EntityKind::User)
    }

    fn commit(mut self: Box<Self>) -> DomainResult<()> {
        AnsiTransactionManager::commit_transaction(&mut *self.conn)
            .map_err(|err| DomainError::TransactionFailure(err.to_string()))?;
        self.finished = true;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> DomainResult<()> {
        self.finished = true;
        AnsiTransactionManager::rollback_transaction(&mut *self.conn)
            .map_err(|err| DomainError::TransactionFailure(err.to_string()))
    }
}
