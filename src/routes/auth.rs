use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::password::{self, MIN_PASSWORD_LENGTH},
    error::{AppError, AppResult, DomainError, EntityKind},
    models::{NewUser, User},
    state::AppState,
};

use super::users::UserResponse;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub phone: String,
    pub company_id: Uuid,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user_id: Uuid,
    pub company_id: Option<Uuid>,
}

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    let name = required(&payload.name, "name")?;
    let email = normalize_email(&payload.email)?;
    if payload.password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AppError::bad_request(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }

    let mut tx = state.tx()?;
    if tx.user_by_email(&email)?.is_some() {
        return Err(DomainError::conflict("user already exists").into());
    }
    if tx.company(payload.company_id)?.is_none() {
        return Err(DomainError::NotFound(EntityKind::Company).into());
    }

    let password_hash = password::hash_password(&payload.password)?;
    let user = tx.insert_user(NewUser {
        id: Uuid::new_v4(),
        company_id: Some(payload.company_id),
        name,
        email,
        password_hash,
        phone: payload.phone.trim().to_string(),
    })?;
    tx.commit()?;

    info!(user_id = %user.id, company_id = %payload.company_id, "user registered");
    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let email = payload.email.trim().to_lowercase();

    let user: User = {
        let mut tx = state.tx()?;
        tx.user_by_email(&email)?.ok_or_else(AppError::unauthorized)?
    };

    let valid = password::verify_password(&payload.password, &user.password_hash)
        .map_err(|_| AppError::unauthorized())?;
    if !valid {
        return Err(AppError::unauthorized());
    }

    let access_token = state.jwt.generate_token(user.id, user.company_id)?;

    Ok(Json(LoginResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: state.jwt.expires_in_seconds(),
        user_id: user.id,
        company_id: user.company_id,
    }))
}

pub(crate) fn required(value: &str, field: &str) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::bad_request(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn normalize_email(value: &str) -> AppResult<String> {
    let email = value.trim().to_lowercase();
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !valid {
        return Err(AppError::bad_request("email must be a valid address"));
    }
    Ok(email)
}
