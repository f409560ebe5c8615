use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    access::authorize_company,
    auth::AuthenticatedUser,
    cascade::{CascadeDeleter, CascadeReport, CascadeRoot},
    error::{AppResult, DomainError},
    models::{Company, NewCompany},
    state::AppState,
};

use super::auth::required;
use super::format_timestamp;

#[derive(Serialize)]
pub struct CompanyResponse {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub created_at: String,
}

impl From<Company> for CompanyResponse {
    fn from(company: Company) -> Self {
        Self {
            id: company.id,
            name: company.name,
            address: company.address,
            created_at: format_timestamp(company.created_at),
        }
    }
}

#[derive(Deserialize)]
pub struct CreateCompanyRequest {
    pub name: String,
    #[serde(default)]
    pub address: String,
}

#[derive(Deserialize)]
pub struct UpdateCompanyRequest {
    pub name: Option<String>,
    pub address: Option<String>,
}

pub async fn list_companies(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<CompanyResponse>>> {
    let mut tx = state.tx()?;
    let companies = tx.list_companies()?;
    Ok(Json(
        companies.into_iter().map(CompanyResponse::from).collect(),
    ))
}

pub async fn create_company(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Json(payload): Json<CreateCompanyRequest>,
) -> AppResult<(StatusCode, Json<CompanyResponse>)> {
    let name = required(&payload.name, "name")?;

    let mut tx = state.tx()?;
    if tx.company_by_name(&name)?.is_some() {
        return Err(DomainError::conflict("company already exists").into());
    }
    let company = tx.insert_company(NewCompany {
        id: Uuid::new_v4(),
        name,
        address: payload.address.trim().to_string(),
    })?;
    tx.commit()?;

    info!(company_id = %company.id, "company created");
    Ok((StatusCode::CREATED, Json(CompanyResponse::from(company))))
}

pub async fn get_company(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(company_id): Path<Uuid>,
) -> AppResult<Json<CompanyResponse>> {
    let mut tx = state.tx()?;
    let company = authorize_company(tx.as_mut(), &user.actor(), company_id)?;
    Ok(Json(CompanyResponse::from(company)))
}

pub async fn update_company(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(company_id): Path<Uuid>,
    Json(payload): Json<UpdateCompanyRequest>,
) -> AppResult<Json<CompanyResponse>> {
    let mut tx = state.tx()?;
    let mut company = authorize_company(tx.as_mut(), &user.actor(), company_id)?;

    if let Some(name) = payload.name.as_deref() {
        let name = required(name, "name")?;
        if name != company.name {
            if tx.company_by_name(&name)?.is_some() {
                return Err(DomainError::conflict("company already exists").into());
            }
            company.name = name;
        }
    }
    if let Some(address) = payload.address.as_deref() {
        company.address = address.trim().to_string();
    }

    tx.update_company(&company)?;
    tx.commit()?;
    Ok(Json(CompanyResponse::from(company)))
}

pub async fn delete_company(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(company_id): Path<Uuid>,
) -> AppResult<Json<CascadeReport>> {
    let deleter = CascadeDeleter::new(state.store.as_ref(), state.storage.as_ref());
    let report = deleter
        .delete_subtree(&user.actor(), CascadeRoot::Company(company_id))
        .await?;
    Ok(Json(report))
}
