use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    access::{self, authorize_candidate, authorize_position, Actor},
    auth::AuthenticatedUser,
    cascade::{CascadeDeleter, CascadeReport},
    error::{AppError, AppResult, DomainError, DomainResult, EntityKind},
    models::{Candidate, NewCandidate},
    scoring::{self, ScoreUpdate},
    state::AppState,
    storage::cv_object_key,
    store::CandidateFilter,
};

use super::auth::{normalize_email, required};
use super::format_timestamp;

#[derive(Serialize)]
pub struct CandidateResponse {
    pub id: Uuid,
    pub position_id: Uuid,
    pub name: String,
    pub email: String,
    pub domicile: String,
    pub cv_file_url: String,
    pub score: f64,
    pub skills: String,
    pub is_qualified: bool,
    pub created_at: String,
}

impl From<Candidate> for CandidateResponse {
    fn from(candidate: Candidate) -> Self {
        Self {
            id: candidate.id,
            position_id: candidate.position_id,
            name: candidate.name,
            email: candidate.email,
            domicile: candidate.domicile,
            cv_file_url: candidate.cv_file_url,
            score: candidate.score,
            skills: candidate.skills,
            is_qualified: candidate.is_qualified,
            created_at: format_timestamp(candidate.created_at),
        }
    }
}

#[derive(Deserialize)]
pub struct UpdateCandidateRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub domicile: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct CandidateSearchRequest {
    pub department_id: Option<Uuid>,
    pub position_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct CandidateIdsRequest {
    pub ids: Vec<Uuid>,
}

struct UploadedFile {
    file_name: String,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct CandidateForm {
    name: Option<String>,
    email: Option<String>,
    domicile: Option<String>,
    position_id: Option<String>,
    cv_file: Option<UploadedFile>,
}

async fn read_candidate_form(multipart: &mut Multipart) -> AppResult<CandidateForm> {
    let mut form = CandidateForm::default();

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("cv_file") => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(|mime| mime.to_string());
                let data = field.bytes().await.map_err(|err| {
                    error!(error = %err, "failed to read résumé bytes");
                    AppError::bad_request(format!("failed to read cv_file: {err}"))
                })?;
                form.cv_file = Some(UploadedFile {
                    file_name,
                    content_type,
                    bytes: data.to_vec(),
                });
            }
            Some(text @ ("name" | "email" | "domicile" | "position_id")) => {
                let key = text.to_string();
                let value = field.text().await.map_err(|err| {
                    AppError::bad_request(format!("invalid {key} field: {err}"))
                })?;
                match key.as_str() {
                    "name" => form.name = Some(value),
                    "email" => form.email = Some(value),
                    "domicile" => form.domicile = Some(value),
                    _ => form.position_id = Some(value),
                }
            }
            _ => {}
        }
    }

    Ok(form)
}

/// Creates a candidate from a multipart form. Nothing is uploaded until the
/// request has passed validation, the access check and the duplicate check;
/// if the row cannot be written afterwards the uploaded résumé is removed.
pub async fn create_candidate(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<CandidateResponse>)> {
    let form = read_candidate_form(&mut multipart).await?;

    let name = required(form.name.as_deref().unwrap_or_default(), "name")?;
    let email = normalize_email(form.email.as_deref().unwrap_or_default())?;
    let domicile = form.domicile.unwrap_or_default().trim().to_string();
    let position_id = form
        .position_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::bad_request("position_id is required"))?;
    let position_id = Uuid::parse_str(position_id)
        .map_err(|_| AppError::bad_request("position_id must be a valid UUID"))?;
    let file = form
        .cv_file
        .ok_or_else(|| AppError::bad_request("cv_file field is required"))?;
    if file.bytes.is_empty() {
        return Err(AppError::bad_request("cv_file must not be empty"));
    }

    let actor = user.actor();
    {
        let mut tx = state.tx()?;
        authorize_position(tx.as_mut(), &actor, position_id)?;
        if tx.candidate_by_email(position_id, &email)?.is_some() {
            return Err(
                DomainError::conflict("candidate with this email already applied").into(),
            );
        }
    }

    let key = cv_object_key(&state.config.cv_key_prefix, &file.file_name);
    let content_type = file.content_type.or_else(|| {
        mime_guess::from_path(&file.file_name)
            .first_raw()
            .map(str::to_string)
    });
    let size_bytes = file.bytes.len();
    let cv_file_url = state
        .storage
        .put_object(&key, file.bytes, content_type)
        .await
        .map_err(|err| {
            error!(error = %err, key = %key, "résumé upload failed");
            DomainError::StorageFailure(format!("could not store résumé: {err:#}"))
        })?;

    let inserted = insert_candidate(
        &state,
        &actor,
        NewCandidate {
            id: Uuid::new_v4(),
            position_id,
            name,
            email,
            domicile,
            cv_file_key: key.clone(),
            cv_file_url,
        },
    );

    match inserted {
        Ok(candidate) => {
            info!(
                candidate_id = %candidate.id,
                position_id = %position_id,
                size_bytes,
                "candidate created"
            );
            Ok((StatusCode::CREATED, Json(CandidateResponse::from(candidate))))
        }
        Err(err) => {
            if let Err(cleanup_err) = state.storage.delete_object(&key).await {
                warn!(error = %cleanup_err, key = %key, "failed to remove orphaned résumé");
            }
            Err(err.into())
        }
    }
}

fn insert_candidate(
    state: &AppState,
    actor: &Actor,
    candidate: NewCandidate,
) -> DomainResult<Candidate> {
    let position_id = candidate.position_id;
    let mut tx = state.store.begin()?;
    authorize_position(tx.as_mut(), actor, position_id)?;
    let candidate = tx.insert_candidate(candidate)?;
    tx.adjust_position_counters(position_id, 1, 0)?;
    tx.commit()?;
    Ok(candidate)
}

pub async fn list_candidates(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<CandidateResponse>>> {
    let company_id = access::actor_company(&user.actor(), EntityKind::Candidate)?;
    let mut tx = state.tx()?;
    let candidates = tx.search_candidates(&CandidateFilter::for_company(company_id))?;
    Ok(Json(
        candidates.into_iter().map(CandidateResponse::from).collect(),
    ))
}

pub async fn search_candidates(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CandidateSearchRequest>,
) -> AppResult<Json<Vec<CandidateResponse>>> {
    search_for_actor(&state, &user, payload, false)
}

pub async fn search_archived_candidates(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CandidateSearchRequest>,
) -> AppResult<Json<Vec<CandidateResponse>>> {
    search_for_actor(&state, &user, payload, true)
}

fn search_for_actor(
    state: &AppState,
    user: &AuthenticatedUser,
    payload: CandidateSearchRequest,
    archived: bool,
) -> AppResult<Json<Vec<CandidateResponse>>> {
    let actor = user.actor();
    let company_id = access::actor_company(&actor, EntityKind::Candidate)?;
    let mut tx = state.tx()?;

    if let Some(department_id) = payload.department_id {
        access::authorize_department(tx.as_mut(), &actor, department_id)?;
    }
    if let Some(position_id) = payload.position_id {
        authorize_position(tx.as_mut(), &actor, position_id)?;
    }

    let candidates = tx.search_candidates(&CandidateFilter {
        company_id,
        department_id: payload.department_id,
        position_id: payload.position_id,
        archived: Some(archived),
    })?;
    Ok(Json(
        candidates.into_iter().map(CandidateResponse::from).collect(),
    ))
}

pub async fn get_candidate(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(candidate_id): Path<Uuid>,
) -> AppResult<Json<CandidateResponse>> {
    let mut tx = state.tx()?;
    let candidate = authorize_candidate(tx.as_mut(), &user.actor(), candidate_id)?;
    Ok(Json(CandidateResponse::from(candidate)))
}

pub async fn update_candidate(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(candidate_id): Path<Uuid>,
    Json(payload): Json<UpdateCandidateRequest>,
) -> AppResult<Json<CandidateResponse>> {
    let mut tx = state.tx()?;
    authorize_candidate(tx.as_mut(), &user.actor(), candidate_id)?;
    let mut candidate = tx
        .lock_candidate(candidate_id)?
        .ok_or(DomainError::NotFound(EntityKind::Candidate))?;

    if let Some(name) = payload.name.as_deref() {
        candidate.name = required(name, "name")?;
    }
    if let Some(email) = payload.email.as_deref() {
        let email = normalize_email(email)?;
        if email != candidate.email {
            if tx
                .candidate_by_email(candidate.position_id, &email)?
                .is_some()
            {
                return Err(DomainError::conflict(
                    "candidate with this email already applied",
                )
                .into());
            }
            candidate.email = email;
        }
    }
    if let Some(domicile) = payload.domicile.as_deref() {
        candidate.domicile = domicile.trim().to_string();
    }

    tx.update_candidate(&candidate)?;
    tx.commit()?;
    Ok(Json(CandidateResponse::from(candidate)))
}

pub async fn bulk_score(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(updates): Json<Vec<ScoreUpdate>>,
) -> AppResult<Json<Vec<CandidateResponse>>> {
    if updates.is_empty() {
        return Err(AppError::bad_request("at least one score is required"));
    }
    let scored = scoring::score_candidates(state.store.as_ref(), &user.actor(), &updates)?;
    info!(count = scored.len(), "candidates scored");
    Ok(Json(scored.into_iter().map(CandidateResponse::from).collect()))
}

pub async fn bulk_qualify(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CandidateIdsRequest>,
) -> AppResult<Json<Vec<CandidateResponse>>> {
    if payload.ids.is_empty() {
        return Err(AppError::bad_request("ids must not be empty"));
    }
    let toggled =
        scoring::toggle_qualification(state.store.as_ref(), &user.actor(), &payload.ids)?;
    Ok(Json(
        toggled.into_iter().map(CandidateResponse::from).collect(),
    ))
}

pub async fn bulk_delete(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CandidateIdsRequest>,
) -> AppResult<Json<CascadeReport>> {
    if payload.ids.is_empty() {
        return Err(AppError::bad_request("ids must not be empty"));
    }
    let deleter = CascadeDeleter::new(state.store.as_ref(), state.storage.as_ref());
    let report = deleter.delete_candidates(&user.actor(), &payload.ids).await?;
    Ok(Json(report))
}

pub async fn delete_candidate(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(candidate_id): Path<Uuid>,
) -> AppResult<Json<CascadeReport>> {
    let deleter = CascadeDeleter::new(state.store.as_ref(), state.storage.as_ref());
    let report = deleter
        .delete_candidates(&user.actor(), &[candidate_id])
        .await?;
    Ok(Json(report))
}
