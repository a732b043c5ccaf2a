//! Appointment state machine.
//!
//! The lifecycle is linear with no reverse or skip edges:
//! pending -> confirmed -> in_progress -> completed. The pending->confirmed
//! edge is the claim: a single conditional UPDATE keyed on
//! `status = 'pending'`, so of N concurrent claims on one appointment
//! exactly one writer wins and the rest observe the post-claim state. The
//! store never applies a last-write-wins merge.
//!
//! Re-issuing a stale transition (a retried claim or advance that already
//! happened) is rejected with `AlreadyClaimed`/`InvalidTransition`, never
//! reapplied. Callers treat these as benign.

use std::str::FromStr;

use chrono::Utc;
use rusqlite::{params, Connection, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{format_timestamp, parse_timestamp};
use crate::error::PortalError;
use crate::identity::require_doctor;
use crate::models::{Appointment, AppointmentStatus, Identity, Role};

pub(crate) const APPOINTMENT_COLUMNS: &str =
    "id, patient_id, patient_name, preferred_doctor_id, preferred_doctor_name,
     claimed_doctor_id, claimed_doctor_name, date, time, health_concern, status,
     created_at, updated_at";

pub(crate) fn appointment_from_row(row: &Row<'_>) -> rusqlite::Result<Appointment> {
    let id: String = row.get(0)?;
    let patient_id: String = row.get(1)?;
    let preferred_doctor_id: Option<String> = row.get(3)?;
    let claimed_doctor_id: Option<String> = row.get(5)?;
    let date: String = row.get(7)?;
    let status: String = row.get(10)?;
    let created_at: String = row.get(11)?;
    let updated_at: String = row.get(12)?;

    Ok(Appointment {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        patient_id: Uuid::parse_str(&patient_id).unwrap_or_default(),
        patient_name: row.get(2)?,
        preferred_doctor_id: preferred_doctor_id.and_then(|s| Uuid::parse_str(&s).ok()),
        preferred_doctor_name: row.get(4)?,
        claimed_doctor_id: claimed_doctor_id.and_then(|s| Uuid::parse_str(&s).ok()),
        claimed_doctor_name: row.get(6)?,
        date: chrono::NaiveDate::parse_from_str(&date, "%Y-%m-%d").unwrap_or_default(),
        time: row.get(8)?,
        health_concern: row.get(9)?,
        status: AppointmentStatus::from_str(&status).unwrap_or(AppointmentStatus::Pending),
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
    })
}

/// Fetches a single appointment.
pub fn get_appointment(conn: &Connection, id: &Uuid) -> Result<Appointment, PortalError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?1"
    ))?;

    match stmt.query_row(params![id.to_string()], appointment_from_row) {
        Ok(appt) => Ok(appt),
        Err(rusqlite::Error::QueryReturnedNoRows) => Err(PortalError::NotFound {
            entity: "Appointment".into(),
            id: id.to_string(),
        }),
        Err(e) => Err(e.into()),
    }
}

/// Claims a pending appointment for the calling doctor.
///
/// The write is a single conditional UPDATE keyed on `status = 'pending'`.
/// If the predicate no longer holds when the write lands (another doctor got
/// there first), the call fails with `AlreadyClaimed` and nothing changes.
/// The claimed doctor fields are set exactly once here and never change
/// afterwards.
pub fn claim(
    conn: &Connection,
    caller: &Identity,
    appointment_id: &Uuid,
) -> Result<Appointment, PortalError> {
    require_doctor(caller)?;

    let now = Utc::now();
    let changed = conn.execute(
        "UPDATE appointments
         SET status = 'confirmed', claimed_doctor_id = ?1, claimed_doctor_name = ?2, updated_at = ?3
         WHERE id = ?4 AND status = 'pending'",
        params![
            caller.id.to_string(),
            caller.display_name,
            format_timestamp(&now),
            appointment_id.to_string(),
        ],
    )?;

    if changed == 0 {
        // Missing record and lost race look the same to the UPDATE; a read
        // tells them apart.
        let current = get_appointment(conn, appointment_id)?;
        warn!(
            appointment = %appointment_id,
            doctor = %caller.id,
            status = current.status.as_str(),
            "Claim lost: appointment no longer pending"
        );
        return Err(PortalError::AlreadyClaimed);
    }

    info!(appointment = %appointment_id, doctor = %caller.id, "Appointment claimed");
    get_appointment(conn, appointment_id)
}

/// Advances a claimed appointment one step: confirmed -> in_progress or
/// in_progress -> completed. Only the claiming doctor may advance; only
/// `updated_at` changes besides the status.
pub fn advance(
    conn: &Connection,
    caller: &Identity,
    appointment_id: &Uuid,
) -> Result<Appointment, PortalError> {
    require_doctor(caller)?;

    let current = get_appointment(conn, appointment_id)?;
    debug!(
        appointment = %appointment_id,
        from = current.status.as_str(),
        "Validating advance"
    );

    if current.status == AppointmentStatus::Pending {
        return Err(PortalError::InvalidTransition {
            from: AppointmentStatus::Pending,
        });
    }
    if current.claimed_doctor_id != Some(caller.id) {
        return Err(PortalError::NotOwner);
    }
    let next = match current.status.next() {
        Some(next) => next,
        None => {
            return Err(PortalError::InvalidTransition {
                from: current.status,
            })
        }
    };

    // Keyed on the observed status so a concurrent advance loses cleanly
    // instead of skipping a state.
    let now = Utc::now();
    let changed = conn.execute(
        "UPDATE appointments
         SET status = ?1, updated_at = ?2
         WHERE id = ?3 AND status = ?4 AND claimed_doctor_id = ?5",
        params![
            next.as_str(),
            format_timestamp(&now),
            appointment_id.to_string(),
            current.status.as_str(),
            caller.id.to_string(),
        ],
    )?;

    if changed == 0 {
        let latest = get_appointment(conn, appointment_id)?;
        warn!(
            appointment = %appointment_id,
            from = latest.status.as_str(),
            "Advance lost: status moved concurrently"
        );
        return Err(PortalError::InvalidTransition {
            from: latest.status,
        });
    }

    info!(
        appointment = %appointment_id,
        from = current.status.as_str(),
        to = next.as_str(),
        "Appointment advanced"
    );
    get_appointment(conn, appointment_id)
}

/// Unclaimed appointments, oldest first: the queue doctors claim from.
pub fn pending_queue(conn: &Connection) -> Result<Vec<Appointment>, PortalError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments
         WHERE status = 'pending'
         ORDER BY created_at ASC, id ASC"
    ))?;

    let rows = stmt.query_map([], appointment_from_row)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(PortalError::from)
}

/// The caller's own appointments, newest first: bookings for a patient,
/// claimed appointments for a doctor.
pub fn appointments_for(
    conn: &Connection,
    identity: &Identity,
) -> Result<Vec<Appointment>, PortalError> {
    let filter_column = match identity.role {
        Role::Patient => "patient_id",
        Role::Doctor => "claimed_doctor_id",
    };
    let mut stmt = conn.prepare(&format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments
         WHERE {filter_column} = ?1
         ORDER BY created_at DESC, id DESC"
    ))?;

    let rows = stmt.query_map(params![identity.id.to_string()], appointment_from_row)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(PortalError::from)
}
