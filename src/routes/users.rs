use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    access::actor_company,
    auth::{
        password::{self, MIN_PASSWORD_LENGTH},
        AuthenticatedUser,
    },
    error::{AppError, AppResult, DomainError, EntityKind},
    models::User,
    state::AppState,
};

use super::auth::{normalize_email, required};
use super::format_timestamp;

#[derive(Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub company_id: Option<Uuid>,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            company_id: user.company_id,
            name: user.name,
            email: user.email,
            phone: user.phone,
            created_at: format_timestamp(user.created_at),
            updated_at: format_timestamp(user.updated_at),
        }
    }
}

#[derive(Deserialize)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub password: String,
}

pub async fn list_users(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<UserResponse>>> {
    let company_id = actor_company(&user.actor(), EntityKind::Company)?;
    let mut tx = state.tx()?;
    let users = tx.users_of_company(company_id)?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

pub async fn get_me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<UserResponse>> {
    let mut tx = state.tx()?;
    let current = tx
        .user(user.user_id)?
        .ok_or(DomainError::NotFound(EntityKind::User))?;
    Ok(Json(UserResponse::from(current)))
}

pub async fn update_me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateUserRequest>,
) -> AppResult<Json<UserResponse>> {
    let mut tx = state.tx()?;
    let mut current = tx
        .user(user.user_id)?
        .ok_or(DomainError::NotFound(EntityKind::User))?;

    if let Some(name) = payload.name.as_deref() {
        current.name = required(name, "name")?;
    }
    if let Some(email) = payload.email.as_deref() {
        let email = normalize_email(email)?;
        if email != current.email {
            if tx.user_by_email(&email)?.is_some() {
                return Err(DomainError::conflict("email already in use").into());
            }
            current.email = email;
        }
    }
    if let Some(phone) = payload.phone.as_deref() {
        current.phone = phone.trim().to_string();
    }
    current.updated_at = Utc::now().naive_utc();

    tx.update_user(&current)?;
    tx.commit()?;
    Ok(Json(UserResponse::from(current)))
}

pub async fn change_password(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> AppResult<StatusCode> {
    if payload.password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AppError::bad_request(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }

    let mut tx = state.tx()?;
    let mut current = tx
        .user(user.user_id)?
        .ok_or(DomainError::NotFound(EntityKind::User))?;
    current.password_hash = password::hash_password(&payload.password)?;
    current.updated_at = Utc::now().naive_utc();
    tx.update_user(&current)?;
    tx.commit()?;

    info!(user_id = %user.user_id, "password changed");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    let mut tx = state.tx()?;
    tx.delete_user(user.user_id)?;
    tx.commit()?;

    info!(user_id = %user.user_id, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}
