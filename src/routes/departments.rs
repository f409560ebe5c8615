use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    access::{actor_company, authorize_department},
    auth::AuthenticatedUser,
    cascade::{CascadeDeleter, CascadeReport, CascadeRoot},
    error::{AppResult, DomainError, EntityKind},
    models::{Department, NewDepartment},
    state::AppState,
};

use super::auth::required;
use super::format_timestamp;
use super::positions::PositionResponse;

#[derive(Serialize)]
pub struct DepartmentResponse {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub created_at: String,
    pub positions: Vec<PositionResponse>,
}

impl DepartmentResponse {
    fn new(department: Department, positions: Vec<PositionResponse>) -> Self {
        Self {
            id: department.id,
            company_id: department.company_id,
            name: department.name,
            created_at: format_timestamp(department.created_at),
            positions,
        }
    }
}

#[derive(Deserialize)]
pub struct DepartmentRequest {
    pub name: String,
}

pub async fn list_departments(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<DepartmentResponse>>> {
    let company_id = actor_company(&user.actor(), EntityKind::Department)?;
    let mut tx = state.tx()?;

    let departments = tx.departments_of_company(company_id)?;
    let mut response = Vec::with_capacity(departments.len());
    for department in departments {
        let positions = tx
            .positions_of_department(department.id)?
            .into_iter()
            .map(PositionResponse::from)
            .collect();
        response.push(DepartmentResponse::new(department, positions));
    }
    Ok(Json(response))
}

pub async fn create_department(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<DepartmentRequest>,
) -> AppResult<(StatusCode, Json<DepartmentResponse>)> {
    let name = required(&payload.name, "name")?;
    let company_id = actor_company(&user.actor(), EntityKind::Department)?;

    let mut tx = state.tx()?;
    if tx.company(company_id)?.is_none() {
        return Err(DomainError::NotFound(EntityKind::Company).into());
    }
    if tx.department_by_name(company_id, &name)?.is_some() {
        return Err(DomainError::conflict("department already exists").into());
    }
    let department = tx.insert_department(NewDepartment {
        id: Uuid::new_v4(),
        company_id,
        name,
    })?;
    tx.commit()?;

    info!(department_id = %department.id, company_id = %company_id, "department created");
    Ok((
        StatusCode::CREATED,
        Json(DepartmentResponse::new(department, Vec::new())),
    ))
}

pub async fn get_department(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(department_id): Path<Uuid>,
) -> AppResult<Json<DepartmentResponse>> {
    let mut tx = state.tx()?;
    let department = authorize_department(tx.as_mut(), &user.actor(), department_id)?;
    let positions = tx
        .positions_of_department(department.id)?
        .into_iter()
        .map(PositionResponse::from)
        .collect();
    Ok(Json(DepartmentResponse::new(department, positions)))
}

pub async fn update_department(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(department_id): Path<Uuid>,
    Json(payload): Json<DepartmentRequest>,
) -> AppResult<Json<DepartmentResponse>> {
    let name = required(&payload.name, "name")?;

    let mut tx = state.tx()?;
    let mut department = authorize_department(tx.as_mut(), &user.actor(), department_id)?;
    if name != department.name {
        if tx
            .department_by_name(department.company_id, &name)?
            .is_some()
        {
            return Err(DomainError::conflict("department already exists").into());
        }
        department.name = name;
        tx.update_department(&department)?;
    }
    let positions = tx
        .positions_of_department(department.id)?
        .into_iter()
        .map(PositionResponse::from)
        .collect();
    tx.commit()?;

    Ok(Json(DepartmentResponse::new(department, positions)))
}

pub async fn delete_department(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(department_id): Path<Uuid>,
) -> AppResult<Json<CascadeReport>> {
    let deleter = CascadeDeleter::new(state.store.as_ref(), state.storage.as_ref());
    let report = deleter
        .delete_subtree(&user.actor(), CascadeRoot::Department(department_id))
        .await?;
    Ok(Json(report))
}
