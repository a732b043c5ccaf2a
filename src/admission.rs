//! Booking admission control.
//!
//! Validates a booking request against the business constraints (required
//! fields, a non-past date, a fixed half-hour slot, the per-patient daily
//! cap) and creates the pending appointment. The cap check and the
//! insert run inside one IMMEDIATE transaction so two concurrent requests
//! cannot both observe a count of 1 and both get in.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, TransactionBehavior};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{DAILY_BOOKING_CAP, HEALTH_CONCERN_MAX_CHARS};
use crate::db::format_timestamp;
use crate::error::PortalError;
use crate::identity::{get_identity, require_patient};
use crate::lifecycle::get_appointment;
use crate::models::{Appointment, BookingRequest, Identity, Role};

/// The bookable half-hour slots, 09:00 through 17:00 inclusive.
pub const BOOKING_SLOTS: &[&str] = &[
    "09:00", "09:30", "10:00", "10:30", "11:00", "11:30", "12:00", "12:30", "13:00", "13:30",
    "14:00", "14:30", "15:00", "15:30", "16:00", "16:30", "17:00",
];

/// Books a new appointment for the calling patient. On success the record is
/// created in `pending` with the patient's display name snapshotted on it.
pub fn request_appointment(
    conn: &mut Connection,
    caller: &Identity,
    request: &BookingRequest,
) -> Result<Appointment, PortalError> {
    admit(conn, caller, request, Utc::now())
}

fn admit(
    conn: &mut Connection,
    caller: &Identity,
    request: &BookingRequest,
    now: DateTime<Utc>,
) -> Result<Appointment, PortalError> {
    require_patient(caller)?;

    let concern = request.health_concern.trim();
    if concern.is_empty() {
        return Err(PortalError::InvalidInput("health concern is required".into()));
    }
    if concern.chars().count() > HEALTH_CONCERN_MAX_CHARS {
        return Err(PortalError::InvalidInput(format!(
            "health concern exceeds {HEALTH_CONCERN_MAX_CHARS} characters"
        )));
    }

    if request.time.trim().is_empty() {
        return Err(PortalError::InvalidInput("time slot is required".into()));
    }

    if request.date < now.date_naive() {
        return Err(PortalError::InvalidDate);
    }

    if !BOOKING_SLOTS.contains(&request.time.as_str()) {
        return Err(PortalError::InvalidSlot(request.time.clone()));
    }

    // Non-binding hint; the name is snapshotted now and never refreshed.
    let preferred_doctor_name = match request.preferred_doctor_id {
        Some(doctor_id) => {
            let preferred = get_identity(conn, &doctor_id)?;
            if preferred.role != Role::Doctor {
                return Err(PortalError::InvalidInput(
                    "preferred doctor is not a doctor account".into(),
                ));
            }
            Some(preferred.display_name)
        }
        None => None,
    };

    let appointment = Appointment {
        id: Uuid::new_v4(),
        patient_id: caller.id,
        patient_name: caller.display_name.clone(),
        preferred_doctor_id: request.preferred_doctor_id,
        preferred_doctor_name,
        claimed_doctor_id: None,
        claimed_doctor_name: None,
        date: request.date,
        time: request.time.clone(),
        health_concern: concern.to_string(),
        status: crate::models::AppointmentStatus::Pending,
        created_at: now,
        updated_at: now,
    };

    // IMMEDIATE takes the write lock up front: the count and the insert are
    // one serialized unit, closing the check-then-insert gap on the cap.
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let today = count_bookings_on_day(&tx, &caller.id, now.date_naive())?;
    if today >= DAILY_BOOKING_CAP {
        warn!(
            patient = %caller.id,
            count = today,
            "Booking rejected: daily cap reached"
        );
        return Err(PortalError::DailyLimitExceeded);
    }

    tx.execute(
        "INSERT INTO appointments (id, patient_id, patient_name, preferred_doctor_id,
         preferred_doctor_name, date, time, health_concern, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', ?9, ?10)",
        params![
            appointment.id.to_string(),
            appointment.patient_id.to_string(),
            appointment.patient_name,
            appointment.preferred_doctor_id.map(|id| id.to_string()),
            appointment.preferred_doctor_name,
            appointment.date.to_string(),
            appointment.time,
            appointment.health_concern,
            format_timestamp(&appointment.created_at),
            format_timestamp(&appointment.updated_at),
        ],
    )?;
    tx.commit()?;

    info!(
        appointment = %appointment.id,
        patient = %caller.id,
        date = %appointment.date,
        slot = %appointment.time,
        "Appointment booked"
    );
    get_appointment(conn, &appointment.id)
}

fn count_bookings_on_day(
    conn: &Connection,
    patient_id: &Uuid,
    day: NaiveDate,
) -> Result<usize, PortalError> {
    // created_at is RFC 3339; its first ten characters are the calendar day.
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM appointments
         WHERE patient_id = ?1 AND substr(created_at, 1, 10) = ?2",
        params![patient_id.to_string(), day.to_string()],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{open_database, open_memory_database};
    use crate::identity::register_identity;
    use crate::models::AppointmentStatus;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn patient(conn: &Connection) -> Identity {
        register_identity(conn, "amira@example.test", "Amira Hassan", Role::Patient).unwrap()
    }

    fn request(date: NaiveDate, time: &str, concern: &str) -> BookingRequest {
        BookingRequest {
            preferred_doctor_id: None,
            date,
            time: time.into(),
            health_concern: concern.into(),
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        "2025-06-09T10:00:00Z".parse().unwrap()
    }

    fn booking_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 10).unwrap()
    }

    #[test]
    fn valid_booking_creates_pending_appointment() {
        let mut conn = open_memory_database().unwrap();
        let pat = patient(&conn);

        let appt = admit(
            &mut conn,
            &pat,
            &request(booking_date(), "09:00", "headache"),
            fixed_now(),
        )
        .unwrap();

        assert_eq!(appt.status, AppointmentStatus::Pending);
        assert_eq!(appt.patient_id, pat.id);
        assert_eq!(appt.patient_name, "Amira Hassan");
        assert!(appt.claimed_doctor_id.is_none());
        assert!(appt.claimed_doctor_name.is_none());
        assert_eq!(appt.created_at, appt.updated_at);
    }

    #[test]
    fn booking_today_is_allowed() {
        let mut conn = open_memory_database().unwrap();
        let pat = patient(&conn);
        let today = fixed_now().date_naive();

        let appt = admit(&mut conn, &pat, &request(today, "14:30", "follow-up"), fixed_now());
        assert!(appt.is_ok());
    }

    #[test]
    fn past_date_rejected() {
        let mut conn = open_memory_database().unwrap();
        let pat = patient(&conn);
        let yesterday = fixed_now().date_naive() - chrono::Days::new(1);

        let err = admit(&mut conn, &pat, &request(yesterday, "09:00", "x"), fixed_now())
            .unwrap_err();
        assert!(matches!(err, PortalError::InvalidDate));
    }

    #[test]
    fn off_grid_slot_rejected() {
        let mut conn = open_memory_database().unwrap();
        let pat = patient(&conn);

        for bad in ["08:30", "17:30", "09:15", "9:00"] {
            let err = admit(&mut conn, &pat, &request(booking_date(), bad, "x"), fixed_now())
                .unwrap_err();
            assert!(matches!(err, PortalError::InvalidSlot(_)), "slot {bad:?}");
        }
    }

    #[test]
    fn missing_slot_is_invalid_input() {
        let mut conn = open_memory_database().unwrap();
        let pat = patient(&conn);
        let err = admit(&mut conn, &pat, &request(booking_date(), "", "x"), fixed_now())
            .unwrap_err();
        assert!(matches!(err, PortalError::InvalidInput(_)));
    }

    #[test]
    fn slot_table_covers_nine_to_five() {
        assert_eq!(BOOKING_SLOTS.len(), 17);
        assert_eq!(BOOKING_SLOTS.first(), Some(&"09:00"));
        assert_eq!(BOOKING_SLOTS.last(), Some(&"17:00"));
    }

    #[test]
    fn empty_concern_rejected() {
        let mut conn = open_memory_database().unwrap();
        let pat = patient(&conn);
        let err = admit(&mut conn, &pat, &request(booking_date(), "09:00", "   "), fixed_now())
            .unwrap_err();
        assert!(matches!(err, PortalError::InvalidInput(_)));
    }

    #[test]
    fn oversized_concern_rejected() {
        let mut conn = open_memory_database().unwrap();
        let pat = patient(&conn);
        let long = "x".repeat(HEALTH_CONCERN_MAX_CHARS + 1);
        let err = admit(&mut conn, &pat, &request(booking_date(), "09:00", &long), fixed_now())
            .unwrap_err();
        assert!(matches!(err, PortalError::InvalidInput(_)));

        // Exactly at the limit is fine
        let at_limit = "x".repeat(HEALTH_CONCERN_MAX_CHARS);
        admit(&mut conn, &pat, &request(booking_date(), "09:30", &at_limit), fixed_now())
            .unwrap();
    }

    #[test]
    fn doctor_cannot_book() {
        let mut conn = open_memory_database().unwrap();
        let doc =
            register_identity(&conn, "chen@example.test", "Dr. Chen", Role::Doctor).unwrap();
        let err = admit(&mut conn, &doc, &request(booking_date(), "09:00", "x"), fixed_now())
            .unwrap_err();
        assert!(matches!(err, PortalError::AuthError(_)));
    }

    #[test]
    fn preferred_doctor_name_snapshotted() {
        let mut conn = open_memory_database().unwrap();
        let pat = patient(&conn);
        let doc =
            register_identity(&conn, "chen@example.test", "Dr. Chen", Role::Doctor).unwrap();

        let mut req = request(booking_date(), "09:00", "headache");
        req.preferred_doctor_id = Some(doc.id);
        let appt = admit(&mut conn, &pat, &req, fixed_now()).unwrap();

        assert_eq!(appt.preferred_doctor_id, Some(doc.id));
        assert_eq!(appt.preferred_doctor_name.as_deref(), Some("Dr. Chen"));
        // The hint is non-binding: the appointment is still unclaimed.
        assert!(appt.claimed_doctor_id.is_none());
    }

    #[test]
    fn preferred_doctor_must_be_a_doctor() {
        let mut conn = open_memory_database().unwrap();
        let pat = patient(&conn);
        let other =
            register_identity(&conn, "sam@example.test", "Sam Lee", Role::Patient).unwrap();

        let mut req = request(booking_date(), "09:00", "headache");
        req.preferred_doctor_id = Some(other.id);
        let err = admit(&mut conn, &pat, &req, fixed_now()).unwrap_err();
        assert!(matches!(err, PortalError::InvalidInput(_)));
    }

    #[test]
    fn unknown_preferred_doctor_is_not_found() {
        let mut conn = open_memory_database().unwrap();
        let pat = patient(&conn);
        let mut req = request(booking_date(), "09:00", "headache");
        req.preferred_doctor_id = Some(Uuid::new_v4());
        let err = admit(&mut conn, &pat, &req, fixed_now()).unwrap_err();
        assert!(matches!(err, PortalError::NotFound { .. }));
    }

    #[test]
    fn third_booking_on_same_day_hits_cap() {
        let mut conn = open_memory_database().unwrap();
        let pat = patient(&conn);

        admit(&mut conn, &pat, &request(booking_date(), "09:00", "a"), fixed_now()).unwrap();
        admit(&mut conn, &pat, &request(booking_date(), "09:30", "b"), fixed_now()).unwrap();
        let err = admit(&mut conn, &pat, &request(booking_date(), "10:00", "c"), fixed_now())
            .unwrap_err();
        assert!(matches!(err, PortalError::DailyLimitExceeded));
        assert!(!err.is_retryable());
    }

    #[test]
    fn cap_counts_creation_day_not_appointment_day() {
        let mut conn = open_memory_database().unwrap();
        let pat = patient(&conn);
        let later = booking_date() + chrono::Days::new(3);

        // Two bookings today for different appointment dates still fill the cap
        admit(&mut conn, &pat, &request(booking_date(), "09:00", "a"), fixed_now()).unwrap();
        admit(&mut conn, &pat, &request(later, "09:00", "b"), fixed_now()).unwrap();
        let err = admit(&mut conn, &pat, &request(later, "10:00", "c"), fixed_now())
            .unwrap_err();
        assert!(matches!(err, PortalError::DailyLimitExceeded));

        // A new calendar day resets the count
        let tomorrow = fixed_now() + chrono::Duration::days(1);
        admit(&mut conn, &pat, &request(later, "10:00", "c"), tomorrow).unwrap();
    }

    #[test]
    fn cap_is_per_patient() {
        let mut conn = open_memory_database().unwrap();
        let first = patient(&conn);
        let second =
            register_identity(&conn, "sam@example.test", "Sam Lee", Role::Patient).unwrap();

        admit(&mut conn, &first, &request(booking_date(), "09:00", "a"), fixed_now()).unwrap();
        admit(&mut conn, &first, &request(booking_date(), "09:30", "b"), fixed_now()).unwrap();

        // Another patient is unaffected
        admit(&mut conn, &second, &request(booking_date(), "09:00", "a"), fixed_now()).unwrap();
    }

    #[test]
    fn concurrent_bookings_cannot_breach_cap() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("medibook.db");

        let pat;
        {
            let conn = open_database(&path).unwrap();
            pat = patient(&conn);
        }

        let barrier = Arc::new(Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let path = path.clone();
                let barrier = Arc::clone(&barrier);
                let pat = pat.clone();
                thread::spawn(move || {
                    let mut conn = open_database(&path).unwrap();
                    let date = Utc::now().date_naive() + chrono::Days::new(1);
                    let req = BookingRequest {
                        preferred_doctor_id: None,
                        date,
                        time: BOOKING_SLOTS[i].into(),
                        health_concern: "concern".into(),
                    };
                    barrier.wait();
                    request_appointment(&mut conn, &pat, &req)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let admitted = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(admitted, DAILY_BOOKING_CAP);

        for rejected in results.iter().filter(|r| r.is_err()) {
            assert!(matches!(
                rejected.as_ref().unwrap_err(),
                PortalError::DailyLimitExceeded
            ));
        }
    }
}
