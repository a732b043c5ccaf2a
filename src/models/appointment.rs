use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::AppointmentStatus;

/// The central booking record.
///
/// `patient_name` and the doctor name fields are write-time snapshots of the
/// identity display names; they are never refreshed afterwards. The claimed
/// doctor fields are NULL exactly while `status` is pending, set once at
/// claim time, and never change again. The preferred doctor is a non-binding
/// hint from the patient at booking time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub preferred_doctor_id: Option<Uuid>,
    pub preferred_doctor_name: Option<String>,
    pub claimed_doctor_id: Option<Uuid>,
    pub claimed_doctor_name: Option<String>,
    pub date: NaiveDate,
    pub time: String,
    pub health_concern: String,
    pub status: AppointmentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to book a new appointment, validated by the admission controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRequest {
    pub preferred_doctor_id: Option<Uuid>,
    pub date: NaiveDate,
    pub time: String,
    pub health_concern: String,
}
