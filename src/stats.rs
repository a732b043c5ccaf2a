//! Read-side projections over the record set.
//!
//! Recomputed from the store on every call; nothing here mutates and
//! nothing is cached.

use std::str::FromStr;

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PortalError;
use crate::models::{AppointmentStatus, Identity, Role};

/// Per-status appointment counts for one patient or doctor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentStats {
    pub total: usize,
    pub pending: usize,
    pub confirmed: usize,
    pub in_progress: usize,
    pub completed: usize,
}

/// A doctor's aggregate rating. `count == 0` means not yet rated and the
/// average reads 0.0 by convention, not as a fault.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DoctorRating {
    pub average: f64,
    pub count: usize,
}

/// Counts the caller's appointments by status: bookings for a patient,
/// claimed appointments for a doctor.
pub fn appointment_stats(
    conn: &Connection,
    identity: &Identity,
) -> Result<AppointmentStats, PortalError> {
    let filter_column = match identity.role {
        Role::Patient => "patient_id",
        Role::Doctor => "claimed_doctor_id",
    };
    let mut stmt = conn.prepare(&format!(
        "SELECT status, COUNT(*) FROM appointments
         WHERE {filter_column} = ?1
         GROUP BY status"
    ))?;

    let rows = stmt.query_map(params![identity.id.to_string()], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;

    let mut stats = AppointmentStats::default();
    for row in rows {
        let (status, count) = row?;
        let count = count as usize;
        stats.total += count;
        match AppointmentStatus::from_str(&status)? {
            AppointmentStatus::Pending => stats.pending += count,
            AppointmentStatus::Confirmed => stats.confirmed += count,
            AppointmentStatus::InProgress => stats.in_progress += count,
            AppointmentStatus::Completed => stats.completed += count,
        }
    }
    Ok(stats)
}

/// Mean feedback rating for a doctor across all their completed visits.
pub fn doctor_rating(conn: &Connection, doctor_id: &Uuid) -> Result<DoctorRating, PortalError> {
    let (sum, count): (i64, i64) = conn.query_row(
        "SELECT COALESCE(SUM(rating), 0), COUNT(*) FROM feedback WHERE doctor_id = ?1",
        params![doctor_id.to_string()],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    if count == 0 {
        return Ok(DoctorRating::default());
    }
    Ok(DoctorRating {
        average: sum as f64 / count as f64,
        count: count as usize,
    })
}
