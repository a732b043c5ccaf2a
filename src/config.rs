/// Application-level constants
pub const APP_NAME: &str = "Medibook";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum appointments a patient may create per calendar day.
pub const DAILY_BOOKING_CAP: usize = 2;

/// Maximum length of the free-text health concern on a booking.
pub const HEALTH_CONCERN_MAX_CHARS: usize = 200;

/// Maximum length of a feedback comment.
pub const COMMENT_MAX_CHARS: usize = 150;

/// Default log filter when RUST_LOG is not set
pub fn default_log_filter() -> String {
    format!("{}=info", env!("CARGO_PKG_NAME"))
}
