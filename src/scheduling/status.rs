// src/scheduling/status.rs

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::SchedulingError;

/// Booking state of an appointment. Stored as text in `appointments.status`.
///
/// Any status may follow any other through an update; the only rule enforced
/// on top of the enum is that completed appointments cannot be deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 5] = [
        AppointmentStatus::Scheduled,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Completed,
        AppointmentStatus::Cancelled,
        AppointmentStatus::NoShow,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        }
    }

    /// Cancelled slots free their interval.
    pub fn occupies_slot(self) -> bool {
        self != AppointmentStatus::Cancelled
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = SchedulingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AppointmentStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| {
                SchedulingError::Validation(format!(
                    "status must be one of scheduled, confirmed, completed, cancelled, no_show (got {s:?})"
                ))
            })
    }
}

pub fn validate_status(value: &str) -> Result<AppointmentStatus, SchedulingError> {
    value.parse()
}

pub fn can_delete(status: AppointmentStatus) -> bool {
    status != AppointmentStatus::Completed
}

pub fn ensure_deletable(status: AppointmentStatus) -> Result<(), SchedulingError> {
    if can_delete(status) {
        Ok(())
    } else {
        Err(SchedulingError::InvalidState("Cannot delete completed appointments"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_five_literals_validate() {
        for s in ["scheduled", "confirmed", "completed", "cancelled", "no_show"] {
            let st = validate_status(s).unwrap();
            assert_eq!(st.as_str(), s);
        }
    }

    #[test]
    fn unknown_or_differently_cased_values_are_rejected() {
        for s in ["", "Scheduled", "noshow", "no-show", "pending", " scheduled"] {
            assert!(
                matches!(validate_status(s), Err(SchedulingError::Validation(_))),
                "{s:?} should be rejected"
            );
        }
    }

    #[test]
    fn only_completed_blocks_delete() {
        assert!(!can_delete(AppointmentStatus::Completed));
        for st in AppointmentStatus::ALL {
            if st != AppointmentStatus::Completed {
                assert!(can_delete(st), "{st} should be deletable");
            }
        }
        assert_eq!(
            ensure_deletable(AppointmentStatus::Completed),
            Err(SchedulingError::InvalidState("Cannot delete completed appointments"))
        );
    }

    #[test]
    fn serde_uses_snake_case_literals() {
        let json = serde_json::to_string(&AppointmentStatus::NoShow).unwrap();
        assert_eq!(json, "\"no_show\"");
        let back: AppointmentStatus = serde_json::from_str("\"cancelled\"").unwrap();
        assert_eq!(back, AppointmentStatus::Cancelled);
    }

    #[test]
    fn only_cancelled_frees_the_slot() {
        assert!(!AppointmentStatus::Cancelled.occupies_slot());
        assert!(AppointmentStatus::NoShow.occupies_slot());
        assert!(AppointmentStatus::Completed.occupies_slot());
    }
}
