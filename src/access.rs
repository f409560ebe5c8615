//! Tenant scoping.
//!
//! Every department, position and candidate belongs to exactly one company
//! through its parent references. An actor may touch an entity only when
//! that company is the actor's own. The chain is always resolved before the
//! tenant comparison, so a missing link reports `NotFound` rather than
//! `Denied`.

use uuid::Uuid;

use crate::error::{DomainError, DomainResult, EntityKind};
use crate::models::{Candidate, Company, Department, Position};
use crate::store::StoreTx;

/// The authenticated principal as far as scoping is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
    pub company_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Company(Uuid),
    Department(Uuid),
    Position(Uuid),
    Candidate(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allowed,
    Denied,
}

pub fn check(tx: &mut dyn StoreTx, actor: &Actor, target: Target) -> DomainResult<Access> {
    let outcome = match target {
        Target::Company(id) => authorize_company(tx, actor, id).map(|_| ()),
        Target::Department(id) => authorize_department(tx, actor, id).map(|_| ()),
        Target::Position(id) => authorize_position(tx, actor, id).map(|_| ()),
        Target::Candidate(id) => authorize_candidate(tx, actor, id).map(|_| ()),
    };

    match outcome {
        Ok(()) => Ok(Access::Allowed),
        Err(DomainError::Denied(_)) => Ok(Access::Denied),
        Err(err) => Err(err),
    }
}

/// The company the actor acts for, or `Denied` for actors without one.
pub fn actor_company(actor: &Actor, kind: EntityKind) -> DomainResult<Uuid> {
    actor.company_id.ok_or(DomainError::Denied(kind))
}

pub fn authorize_company(tx: &mut dyn StoreTx, actor: &Actor, id: Uuid) -> DomainResult<Company> {
    let company = load_company(tx, id)?;
    ensure_owner(actor, company.id, EntityKind::Company)?;
    Ok(company)
}

pub fn authorize_department(
    tx: &mut dyn StoreTx,
    actor: &Actor,
    id: Uuid,
) -> DomainResult<Department> {
    let department = load_department(tx, id)?;
    ensure_owner(actor, department.company_id, EntityKind::Department)?;
    Ok(department)
}

pub fn authorize_position(
    tx: &mut dyn StoreTx,
    actor: &Actor,
    id: Uuid,
) -> DomainResult<Position> {
    let position = load_position(tx, id)?;
    let department = load_department(tx, position.department_id)?;
    ensure_owner(actor, department.company_id, EntityKind::Position)?;
    Ok(position)
}

pub fn authorize_candidate(
    tx: &mut dyn StoreTx,
    actor: &Actor,
    id: Uuid,
) -> DomainResult<Candidate> {
    let candidate = load_candidate(tx, id)?;
    let position = load_position(tx, candidate.position_id)?;
    let department = load_department(tx, position.department_id)?;
    ensure_owner(actor, department.company_id, EntityKind::Candidate)?;
    Ok(candidate)
}

fn ensure_owner(actor: &Actor, owner: Uuid, kind: EntityKind) -> DomainResult<()> {
    if actor.company_id == Some(owner) {
        Ok(())
    } else {
        Err(DomainError::Denied(kind))
    }
}

fn load_company(tx: &mut dyn StoreTx, id: Uuid) -> DomainResult<Company> {
    tx.company(id)?
        .ok_or(DomainError::NotFound(EntityKind::Company))
}

fn load_department(tx: &mut dyn StoreTx, id: Uuid) -> DomainResult<Department> {
    tx.department(id)?
        .ok_or(DomainError::NotFound(EntityKind::Department))
}

fn load_position(tx: &mut dyn StoreTx, id: Uuid) -> DomainResult<Position> {
    tx.position(id)?
        .ok_or(DomainError::NotFound(EntityKind::Position))
}

fn load_candidate(tx: &mut dyn StoreTx, id: Uuid) -> DomainResult<Candidate> {
    tx.candidate(id)?
        .ok_or(DomainError::NotFound(EntityKind::Candidate))
}
