//! Portal error taxonomy.
//!
//! Every core operation either fully applies its single-record mutation or
//! returns one of these and leaves the store unchanged. `StoreUnavailable`
//! is the only class a caller may retry unmodified; everything else is a
//! permanent rejection of that specific call.

use crate::db::DatabaseError;
use crate::models::AppointmentStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PortalError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Appointment date is in the past")]
    InvalidDate,

    #[error("Time is not a bookable half-hour slot: {0}")]
    InvalidSlot(String),

    #[error("Daily booking limit reached")]
    DailyLimitExceeded,

    #[error("Not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Appointment was already claimed by another doctor")]
    AlreadyClaimed,

    #[error("No valid transition from status '{from}'")]
    InvalidTransition { from: AppointmentStatus },

    #[error("Caller does not own this appointment")]
    NotOwner,

    #[error("Appointment is not completed")]
    NotCompleted,

    #[error("Record already exists")]
    AlreadyExists,

    #[error("Rating must be between 1 and 5, got {0}")]
    InvalidRating(u8),

    #[error("Comment too long: {0} characters")]
    CommentTooLong(usize),

    #[error("Invalid medicine entry: {0}")]
    InvalidMedicine(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[source] DatabaseError),

    #[error("Authorization failed: {0}")]
    AuthError(String),
}

impl PortalError {
    /// Whether a caller may retry the same call unmodified.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PortalError::StoreUnavailable(_))
    }
}

impl From<DatabaseError> for PortalError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound { entity_type, id } => PortalError::NotFound {
                entity: entity_type,
                id,
            },
            other => PortalError::StoreUnavailable(other),
        }
    }
}

impl From<rusqlite::Error> for PortalError {
    fn from(err: rusqlite::Error) -> Self {
        PortalError::StoreUnavailable(DatabaseError::Sqlite(err))
    }
}
