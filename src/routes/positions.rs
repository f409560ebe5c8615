use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    access::{actor_company, authorize_department, authorize_position, Actor},
    auth::AuthenticatedUser,
    cascade::{CascadeDeleter, CascadeReport, CascadeRoot},
    error::{AppError, AppResult, DomainError, DomainResult, EntityKind},
    models::{NewPosition, Position},
    state::AppState,
    store::StoreTx,
};

use super::auth::required;
use super::format_timestamp;

#[derive(Serialize)]
pub struct PositionResponse {
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
    pub removed_at: Option<String>,
    pub qualified_candidates: String,
    pub uploaded_cv: i32,
    pub filtered_cv: i32,
    pub created_at: String,
}

impl From<Position> for PositionResponse {
    fn from(position: Position) -> Self {
        Self {
            id: position.id,
            department_id: position.department_id,
            name: position.name,
            education: position.education,
            location: position.location,
            min_work_exp: position.min_work_exp,
            description: position.description,
            qualification: position.qualification,
            is_resolved: position.is_resolved,
            is_trash: position.is_trash,
            is_archive: position.is_archive,
            removed_at: position.removed_at.map(format_timestamp),
            qualified_candidates: position.qualified_candidates,
            uploaded_cv: position.uploaded_cv,
            filtered_cv: position.filtered_cv,
            created_at: format_timestamp(position.created_at),
        }
    }
}

#[derive(Deserialize)]
pub struct CreatePositionRequest {
    pub department_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub education: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub min_work_exp: i32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub qualification: String,
}

#[derive(Deserialize)]
pub struct UpdatePositionRequest {
    pub name: Option<String>,
    pub education: Option<String>,
    pub location: Option<String>,
    pub min_work_exp: Option<i32>,
    pub description: Option<String>,
    pub qualification: Option<String>,
}

#[derive(Deserialize)]
pub struct PositionIdsRequest {
    pub ids: Vec<Uuid>,
}

#[derive(Deserialize)]
pub struct QualifiedCandidatesRequest {
    pub qualified_candidates: String,
}

pub async fn list_positions(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<PositionResponse>>> {
    list_for_actor(&state, &user, None)
}

pub async fn list_archived_positions(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<PositionResponse>>> {
    list_for_actor(&state, &user, Some(true))
}

fn list_for_actor(
    state: &AppState,
    user: &AuthenticatedUser,
    archived: Option<bool>,
) -> AppResult<Json<Vec<PositionResponse>>> {
    let company_id = actor_company(&user.actor(), EntityKind::Position)?;
    let mut tx = state.tx()?;
    let positions = tx.positions_of_company(company_id, archived)?;
    Ok(Json(
        positions.into_iter().map(PositionResponse::from).collect(),
    ))
}

pub async fn create_position(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreatePositionRequest>,
) -> AppResult<(StatusCode, Json<PositionResponse>)> {
    let name = required(&payload.name, "name")?;
    validate_work_exp(payload.min_work_exp)?;

    let mut tx = state.tx()?;
    let department = authorize_department(tx.as_mut(), &user.actor(), payload.department_id)?;
    if tx.position_by_name(department.id, &name)?.is_some() {
        return Err(DomainError::conflict("position already exists in this department").into());
    }

    let position = tx.insert_position(NewPosition {
        id: Uuid::new_v4(),
        department_id: department.id,
        name,
        education: payload.education.trim().to_string(),
        location: payload.location.trim().to_string(),
        min_work_exp: payload.min_work_exp,
        description: payload.description,
        qualification: payload.qualification,
    })?;
    tx.commit()?;

    info!(position_id = %position.id, department_id = %department.id, "position created");
    Ok((StatusCode::CREATED, Json(PositionResponse::from(position))))
}

pub async fn get_position(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(position_id): Path<Uuid>,
) -> AppResult<Json<PositionResponse>> {
    let mut tx = state.tx()?;
    let position = authorize_position(tx.as_mut(), &user.actor(), position_id)?;
    Ok(Json(PositionResponse::from(position)))
}

pub async fn update_position(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(position_id): Path<Uuid>,
    Json(payload): Json<UpdatePositionRequest>,
) -> AppResult<Json<PositionResponse>> {
    let mut tx = state.tx()?;
    let mut position = lock_authorized_position(tx.as_mut(), &user.actor(), position_id)?;

    if let Some(name) = payload.name.as_deref() {
        let name = required(name, "name")?;
        if name != position.name {
            if tx.position_by_name(position.department_id, &name)?.is_some() {
                return Err(
                    DomainError::conflict("position already exists in this department").into(),
                );
            }
            position.name = name;
        }
    }
    if let Some(education) = payload.education {
        position.education = education.trim().to_string();
    }
    if let Some(location) = payload.location {
        position.location = location.trim().to_string();
    }
    if let Some(min_work_exp) = payload.min_work_exp {
        validate_work_exp(min_work_exp)?;
        position.min_work_exp = min_work_exp;
    }
    if let Some(description) = payload.description {
        position.description = description;
    }
    if let Some(qualification) = payload.qualification {
        position.qualification = qualification;
    }

    tx.update_position(&position)?;
    tx.commit()?;
    Ok(Json(PositionResponse::from(position)))
}

pub async fn delete_position(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(position_id): Path<Uuid>,
) -> AppResult<Json<CascadeReport>> {
    let deleter = CascadeDeleter::new(state.store.as_ref(), state.storage.as_ref());
    let report = deleter
        .delete_subtree(&user.actor(), CascadeRoot::Position(position_id))
        .await?;
    Ok(Json(report))
}

pub async fn bulk_delete_positions(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<PositionIdsRequest>,
) -> AppResult<Json<CascadeReport>> {
    if payload.ids.is_empty() {
        return Err(AppError::bad_request("ids must not be empty"));
    }

    let roots: Vec<CascadeRoot> = payload
        .ids
        .iter()
        .copied()
        .map(CascadeRoot::Position)
        .collect();
    let deleter = CascadeDeleter::new(state.store.as_ref(), state.storage.as_ref());
    let report = deleter.delete_subtrees(&user.actor(), &roots).await?;
    Ok(Json(report))
}

/// Flips `is_trash` on every listed position. Trashing stamps `removed_at`;
/// restoring clears it.
pub async fn bulk_trash_positions(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<PositionIdsRequest>,
) -> AppResult<Json<Vec<PositionResponse>>> {
    if payload.ids.is_empty() {
        return Err(AppError::bad_request("ids must not be empty"));
    }

    let actor = user.actor();
    let now = Utc::now().naive_utc();
    let mut tx = state.tx()?;
    let mut updated = Vec::with_capacity(payload.ids.len());
    for id in &payload.ids {
        let mut position = lock_authorized_position(tx.as_mut(), &actor, *id)?;
        position.is_trash = !position.is_trash;
        position.removed_at = position.is_trash.then_some(now);
        tx.update_position(&position)?;
        updated.push(PositionResponse::from(position));
    }
    tx.commit()?;

    info!(count = updated.len(), "positions trash state toggled");
    Ok(Json(updated))
}

pub async fn toggle_archive(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(position_id): Path<Uuid>,
) -> AppResult<Json<PositionResponse>> {
    modify_position(&state, &user, position_id, |position| {
        position.is_archive = !position.is_archive;
    })
}

pub async fn toggle_resolve(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(position_id): Path<Uuid>,
) -> AppResult<Json<PositionResponse>> {
    modify_position(&state, &user, position_id, |position| {
        position.is_resolved = !position.is_resolved;
    })
}

pub async fn set_qualified_candidates(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(position_id): Path<Uuid>,
    Json(payload): Json<QualifiedCandidatesRequest>,
) -> AppResult<Json<PositionResponse>> {
    modify_position(&state, &user, position_id, |position| {
        position.qualified_candidates = payload.qualified_candidates;
    })
}

fn modify_position(
    state: &AppState,
    user: &AuthenticatedUser,
    position_id: Uuid,
    apply: impl FnOnce(&mut Position),
) -> AppResult<Json<PositionResponse>> {
    let mut tx = state.tx()?;
    let mut position = lock_authorized_position(tx.as_mut(), &user.actor(), position_id)?;
    apply(&mut position);
    tx.update_position(&position)?;
    tx.commit()?;
    Ok(Json(PositionResponse::from(position)))
}

/// Authorizes, then re-reads the position under a row lock so concurrent
/// edits of the same position apply one after the other.
fn lock_authorized_position(
    tx: &mut dyn StoreTx,
    actor: &Actor,
    position_id: Uuid,
) -> DomainResult<Position> {
    authorize_position(tx, actor, position_id)?;
    tx.lock_position(position_id)?
        .ok_or(DomainError::NotFound(EntityKind::Position))
}

fn validate_work_exp(value: i32) -> AppResult<()> {
    if value < 0 {
        return Err(AppError::bad_request("min_work_exp must not be negative"));
    }
    Ok(())
}
