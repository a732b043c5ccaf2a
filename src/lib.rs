//! Medibook — the booking core of a patient/doctor appointment portal.
//!
//! A patient request enters the admission controller, which on success
//! creates a pending appointment. A doctor's claim and every later
//! transition go through the state machine; completed appointments become
//! eligible for prescriptions and feedback; the stats module projects
//! dashboards from the record set without mutating it.

pub mod admission; // Booking admission: field/date/slot checks + daily cap
pub mod annotation; // Prescriptions and feedback on completed appointments
pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod lifecycle; // Claim + linear status transitions
pub mod models;
pub mod stats; // Read-side projections

pub use error::PortalError;

use tracing_subscriber::EnvFilter;

/// Initialize tracing for embedding binaries. Library consumers that manage
/// their own subscriber should skip this.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);
}
