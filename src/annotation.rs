//! Clinical annotations on completed appointments.
//!
//! Prescriptions (doctor-authored) and feedback (patient-authored) are
//! single-shot creates: at most one prescription per appointment, at most
//! one feedback per (appointment, patient), and no update or delete path for
//! either. Both are audit artifacts and stay immutable after insert.

use chrono::Utc;
use rusqlite::{params, Connection, TransactionBehavior};
use tracing::info;
use uuid::Uuid;

use crate::config::COMMENT_MAX_CHARS;
use crate::db::{format_timestamp, parse_timestamp, DatabaseError};
use crate::error::PortalError;
use crate::identity::{require_doctor, require_patient};
use crate::lifecycle::get_appointment;
use crate::models::{AppointmentStatus, Feedback, Identity, Medicine, Prescription};

/// Attaches a prescription to a completed appointment. Only the claiming
/// doctor may prescribe, exactly once.
pub fn attach_prescription(
    conn: &mut Connection,
    caller: &Identity,
    appointment_id: &Uuid,
    medicines: &[Medicine],
) -> Result<Prescription, PortalError> {
    require_doctor(caller)?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let appointment = get_appointment(&tx, appointment_id)?;
    if appointment.status != AppointmentStatus::Completed {
        return Err(PortalError::NotCompleted);
    }
    if appointment.claimed_doctor_id != Some(caller.id) {
        return Err(PortalError::NotOwner);
    }

    let existing: i64 = tx.query_row(
        "SELECT COUNT(*) FROM prescriptions WHERE appointment_id = ?1",
        params![appointment_id.to_string()],
        |row| row.get(0),
    )?;
    if existing > 0 {
        return Err(PortalError::AlreadyExists);
    }

    if medicines.is_empty() {
        return Err(PortalError::InvalidMedicine("medicines list is empty".into()));
    }
    for medicine in medicines {
        if medicine.name.trim().is_empty()
            || medicine.dosage.trim().is_empty()
            || medicine.frequency.trim().is_empty()
        {
            return Err(PortalError::InvalidMedicine(
                "every medicine needs a name, dosage and frequency".into(),
            ));
        }
    }

    let prescription = Prescription {
        id: Uuid::new_v4(),
        appointment_id: *appointment_id,
        medicines: medicines.to_vec(),
        created_at: Utc::now(),
    };
    let medicines_json = serde_json::to_string(&prescription.medicines)
        .map_err(|e| DatabaseError::ConstraintViolation(format!("JSON serialization: {e}")))?;

    tx.execute(
        "INSERT INTO prescriptions (id, appointment_id, medicines, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            prescription.id.to_string(),
            prescription.appointment_id.to_string(),
            medicines_json,
            format_timestamp(&prescription.created_at),
        ],
    )?;
    tx.commit()?;

    info!(
        appointment = %appointment_id,
        doctor = %caller.id,
        medicines = prescription.medicines.len(),
        "Prescription attached"
    );
    Ok(prescription)
}

/// Attaches feedback to a completed appointment. Only the appointment's
/// patient may rate, exactly once per appointment.
pub fn attach_feedback(
    conn: &mut Connection,
    caller: &Identity,
    appointment_id: &Uuid,
    rating: u8,
    comment: Option<&str>,
) -> Result<Feedback, PortalError> {
    require_patient(caller)?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let appointment = get_appointment(&tx, appointment_id)?;
    if appointment.status != AppointmentStatus::Completed {
        return Err(PortalError::NotCompleted);
    }
    if appointment.patient_id != caller.id {
        return Err(PortalError::NotOwner);
    }

    if !(1..=5).contains(&rating) {
        return Err(PortalError::InvalidRating(rating));
    }
    let comment = comment.map(str::trim).filter(|c| !c.is_empty());
    if let Some(comment) = comment {
        let len = comment.chars().count();
        if len > COMMENT_MAX_CHARS {
            return Err(PortalError::CommentTooLong(len));
        }
    }

    let existing: i64 = tx.query_row(
        "SELECT COUNT(*) FROM feedback WHERE appointment_id = ?1 AND patient_id = ?2",
        params![appointment_id.to_string(), caller.id.to_string()],
        |row| row.get(0),
    )?;
    if existing > 0 {
        return Err(PortalError::AlreadyExists);
    }

    // A completed appointment always has a claimed doctor.
    let doctor_id = appointment.claimed_doctor_id.ok_or_else(|| {
        PortalError::StoreUnavailable(DatabaseError::ConstraintViolation(
            "completed appointment without claimed doctor".into(),
        ))
    })?;

    let feedback = Feedback {
        id: Uuid::new_v4(),
        appointment_id: *appointment_id,
        patient_id: caller.id,
        doctor_id,
        rating,
        comment: comment.map(str::to_string),
        created_at: Utc::now(),
    };

    tx.execute(
        "INSERT INTO feedback (id, appointment_id, patient_id, doctor_id, rating, comment, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            feedback.id.to_string(),
            feedback.appointment_id.to_string(),
            feedback.patient_id.to_string(),
            feedback.doctor_id.to_string(),
            feedback.rating,
            feedback.comment,
            format_timestamp(&feedback.created_at),
        ],
    )?;
    tx.commit()?;

    info!(
        appointment = %appointment_id,
        patient = %caller.id,
        rating = feedback.rating,
        "Feedback attached"
    );
    Ok(feedback)
}

/// The prescription for an appointment, if one has been attached.
pub fn prescription_for(
    conn: &Connection,
    appointment_id: &Uuid,
) -> Result<Option<Prescription>, PortalError> {
    let mut stmt = conn.prepare(
        "SELECT id, appointment_id, medicines, created_at
         FROM prescriptions WHERE appointment_id = ?1",
    )?;

    let result = stmt.query_row(params![appointment_id.to_string()], |row| {
        let id: String = row.get(0)?;
        let appointment_id: String = row.get(1)?;
        let medicines: String = row.get(2)?;
        let created_at: String = row.get(3)?;
        Ok((id, appointment_id, medicines, created_at))
    });

    match result {
        Ok((id, appointment_id, medicines, created_at)) => {
            let medicines: Vec<Medicine> = serde_json::from_str(&medicines).map_err(|e| {
                DatabaseError::ConstraintViolation(format!("corrupt medicines column: {e}"))
            })?;
            Ok(Some(Prescription {
                id: Uuid::parse_str(&id).unwrap_or_default(),
                appointment_id: Uuid::parse_str(&appointment_id).unwrap_or_default(),
                medicines,
                created_at: parse_timestamp(&created_at),
            }))
        }
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// All feedback left for a doctor, newest first.
pub fn feedback_for_doctor(
    conn: &Connection,
    doctor_id: &Uuid,
) -> Result<Vec<Feedback>, PortalError> {
    let mut stmt = conn.prepare(
        "SELECT id, appointment_id, patient_id, doctor_id, rating, comment, created_at
         FROM feedback WHERE doctor_id = ?1
         ORDER BY created_at DESC, id DESC",
    )?;

    let rows = stmt.query_map(params![doctor_id.to_string()], |row| {
        let id: String = row.get(0)?;
        let appointment_id: String = row.get(1)?;
        let patient_id: String = row.get(2)?;
        let doctor_id: String = row.get(3)?;
        let created_at: String = row.get(6)?;
        Ok(Feedback {
            id: Uuid::parse_str(&id).unwrap_or_default(),
            appointment_id: Uuid::parse_str(&appointment_id).unwrap_or_default(),
            patient_id: Uuid::parse_str(&patient_id).unwrap_or_default(),
            doctor_id: Uuid::parse_str(&doctor_id).unwrap_or_default(),
            rating: row.get(4)?,
            comment: row.get(5)?,
            created_at: parse_timestamp(&created_at),
        })
    })?;

    rows.collect::<Result<Vec<_>, _>>().map_err(PortalError::from)
}
