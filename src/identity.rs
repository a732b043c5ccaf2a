//! Identity registry — the local binding of the external identity provider.
//!
//! Credential verification and session lifecycle stay with the provider; the
//! core only needs a stable (id, role) per account so operations can be
//! authorized and display names snapshotted onto bookings. Every core
//! operation takes the resolved [`Identity`] as an explicit argument, never
//! as ambient state.

use std::str::FromStr;

use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::info;
use uuid::Uuid;

use crate::error::PortalError;
use crate::models::{Identity, Role};

/// Registers a new account with a fixed role. The role never changes after
/// creation.
pub fn register_identity(
    conn: &Connection,
    email: &str,
    display_name: &str,
    role: Role,
) -> Result<Identity, PortalError> {
    let email = email.trim();
    let display_name = display_name.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(PortalError::InvalidInput("email is required".into()));
    }
    if display_name.is_empty() {
        return Err(PortalError::InvalidInput("display name is required".into()));
    }

    let identity = Identity {
        id: Uuid::new_v4(),
        email: email.to_string(),
        display_name: display_name.to_string(),
        role,
        created_at: Utc::now(),
    };

    let inserted = conn.execute(
        "INSERT OR IGNORE INTO identities (id, email, display_name, role, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            identity.id.to_string(),
            identity.email,
            identity.display_name,
            identity.role.as_str(),
            crate::db::format_timestamp(&identity.created_at),
        ],
    )?;
    if inserted == 0 {
        return Err(PortalError::AlreadyExists);
    }

    info!(id = %identity.id, role = identity.role.as_str(), "Registered identity");
    Ok(identity)
}

/// Looks up an identity by id.
pub fn get_identity(conn: &Connection, id: &Uuid) -> Result<Identity, PortalError> {
    let mut stmt = conn.prepare(
        "SELECT id, email, display_name, role, created_at
         FROM identities WHERE id = ?1",
    )?;

    let result = stmt.query_row(params![id.to_string()], identity_from_row);

    match result {
        Ok(identity) => Ok(identity),
        Err(rusqlite::Error::QueryReturnedNoRows) => Err(PortalError::NotFound {
            entity: "Identity".into(),
            id: id.to_string(),
        }),
        Err(e) => Err(e.into()),
    }
}

/// Looks up an identity by email (how the provider resolves a login).
pub fn find_identity_by_email(
    conn: &Connection,
    email: &str,
) -> Result<Option<Identity>, PortalError> {
    let mut stmt = conn.prepare(
        "SELECT id, email, display_name, role, created_at
         FROM identities WHERE email = ?1",
    )?;

    match stmt.query_row(params![email], identity_from_row) {
        Ok(identity) => Ok(Some(identity)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn identity_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Identity> {
    let id: String = row.get(0)?;
    let role: String = row.get(3)?;
    let created_at: String = row.get(4)?;
    Ok(Identity {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        email: row.get(1)?,
        display_name: row.get(2)?,
        role: Role::from_str(&role).unwrap_or(Role::Patient),
        created_at: crate::db::parse_timestamp(&created_at),
    })
}

/// Requires the caller to be a doctor.
pub(crate) fn require_doctor(caller: &Identity) -> Result<(), PortalError> {
    if caller.is_doctor() {
        Ok(())
    } else {
        Err(PortalError::AuthError("caller must be a doctor".into()))
    }
}

/// Requires the caller to be a patient.
pub(crate) fn require_patient(caller: &Identity) -> Result<(), PortalError> {
    if caller.is_patient() {
        Ok(())
    } else {
        Err(PortalError::AuthError("caller must be a patient".into()))
    }
}
