// src/scheduling/mod.rs
//
// Appointment scheduling rules shared by the create, update and public
// booking paths. Everything in here is pure: callers load rows from the
// database and hand them in.

pub mod conflict;
pub mod patient_number;
pub mod status;

use thiserror::Error;
use uuid::Uuid;

pub use conflict::{Candidate, ConflictCheck, ExistingAppointment, check_conflict};
pub use patient_number::next_patient_number;
pub use status::{AppointmentStatus, can_delete, validate_status};

pub const DEFAULT_DURATION_MINUTES: i32 = 60;
pub const MIN_DURATION_MINUTES: i32 = 15;
pub const MAX_DURATION_MINUTES: i32 = 480;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulingError {
    /// Date or time text that could not be parsed at all.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Well-formed but out-of-range or not in an allowed set.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("appointment time conflicts with existing appointment {appointment_id}")]
    Conflict { appointment_id: Uuid },

    #[error("{0}")]
    InvalidState(&'static str),
}

/// Applies the default and checks the allowed range.
pub fn resolve_duration(duration_minutes: Option<i32>) -> Result<i32, SchedulingError> {
    let d = duration_minutes.unwrap_or(DEFAULT_DURATION_MINUTES);
    if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&d) {
        return Err(SchedulingError::Validation(format!(
            "duration_minutes must be between {MIN_DURATION_MINUTES} and {MAX_DURATION_MINUTES}"
        )));
    }
    Ok(d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_duration_defaults_to_an_hour() {
        assert_eq!(resolve_duration(None), Ok(60));
    }

    #[test]
    fn duration_bounds_are_inclusive() {
        assert_eq!(resolve_duration(Some(15)), Ok(15));
        assert_eq!(resolve_duration(Some(480)), Ok(480));
        assert!(matches!(
            resolve_duration(Some(14)),
            Err(SchedulingError::Validation(_))
        ));
        assert!(matches!(
            resolve_duration(Some(481)),
            Err(SchedulingError::Validation(_))
        ));
    }
}
