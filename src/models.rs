use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, AsChangeset)]
#[diesel(table_name = companies)]
pub struct Company {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = companies)]
pub struct NewCompany {
    pub id: Uuid,
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Associations, AsChangeset)]
#[diesel(table_name = departments)]
#[diesel(belongs_to(Company))]
pub struct Department {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = departments)]
pub struct NewDepartment {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
}

/// A job opening. The three lifecycle flags are independent toggles and may
/// all be set at the same time.
#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Associations)]
#[diesel(table_name = positions)]
#[diesel(belongs_to(Department))]
pub struct Position {
    pub id: Uuid,
    pub department_id: Uuid,
    pub name: String,
    pub education: String,
    pub location: String,
    pub min_work_exp: i32,
    pub description: String,
    pub qualification: String,
    pub is_resolved: bool,
    pub is_trash: bool,
    pub is_archive: bool,
    pub removed_at: Option<NaiveDateTime>,
    pub qualified_candidates: String,
    /// Candidates currently attached to the position.
    pub uploaded_cv: i32,
    /// Candidates currently holding a score above zero.
    pub filtered_cv: i32,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = positions)]
pub struct NewPosition {
    pub id: Uuid,
    pub department_id: Uuid,
    pub name: String,
    pub education: String,
    pub location: String,
    pub min_work_exp: i32,
    pub description: String,
    pub qualification: String,
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Associations, AsChangeset)]
#[diesel(table_name = candidates)]
#[diesel(belongs_to(Position))]
pub struct Candidate {
    pub id: Uuid,
    pub position_id: Uuid,
    pub name: String,
    pub email: String,
    pub domicile: String,
    /// Object storage key of the résumé; empty when nothing was stored.
    pub cv_file_key: String,
    pub cv_file_url: String,
    pub score: f64,
    pub skills: String,
    pub is_qualified: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = candidates)]
pub struct NewCandidate {
    pub id: Uuid,
    pub position_id: Uuid,
    pub name: String,
    pub email: String,
    pub domicile: String,
    pub cv_file_key: String,
    pub cv_file_url: String,
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, AsChangeset)]
#[diesel(table_name = users)]
#[diesel(treat_none_as_null = true)]
pub struct User {
    pub id: Uuid,
    pub company_id: Option<Uuid>,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub phone: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub company_id: Option<Uuid>,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub phone: String,
}
