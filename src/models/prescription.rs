use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One medicine line on a prescription. All three fields are required
/// non-empty free text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Medicine {
    pub name: String,
    pub dosage: String,
    pub frequency: String,
}

/// Doctor-authored prescription, at most one per appointment. Append-only:
/// there is no update or delete path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prescription {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub medicines: Vec<Medicine>,
    pub created_at: DateTime<Utc>,
}
