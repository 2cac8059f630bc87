// src/scheduling/conflict.rs

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use uuid::Uuid;

use super::{AppointmentStatus, DEFAULT_DURATION_MINUTES, SchedulingError, resolve_duration};

/// Half-open `[start, end)` range an appointment occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Interval {
    pub fn new(date: NaiveDate, time: NaiveTime, duration_minutes: i32) -> Self {
        let start = date.and_time(time);
        Self {
            start,
            end: start + Duration::minutes(i64::from(duration_minutes)),
        }
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && self.end > other.start
    }
}

/// A stored appointment as seen by the checker.
#[derive(Debug, Clone)]
pub struct ExistingAppointment {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    /// Legacy rows may lack a duration.
    pub duration_minutes: Option<i32>,
    pub status: AppointmentStatus,
}

impl ExistingAppointment {
    pub fn interval(&self) -> Interval {
        Interval::new(
            self.date,
            self.time,
            self.duration_minutes.unwrap_or(DEFAULT_DURATION_MINUTES),
        )
    }
}

/// The interval someone wants to book (or move an appointment to).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub clinic_id: Uuid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration_minutes: i32,
    pub exclude_appointment_id: Option<Uuid>,
}

impl Candidate {
    pub fn new(clinic_id: Uuid, date: NaiveDate, time: NaiveTime, duration_minutes: i32) -> Self {
        Self {
            clinic_id,
            date,
            time,
            duration_minutes,
            exclude_appointment_id: None,
        }
    }

    /// Parses raw request text. Malformed input fails here, before any
    /// comparison can run.
    pub fn parse(
        clinic_id: Uuid,
        date: &str,
        time: &str,
        duration_minutes: Option<i32>,
    ) -> Result<Self, SchedulingError> {
        let date = parse_date(date)?;
        let time = parse_time(time)?;
        let duration = resolve_duration(duration_minutes)?;
        Ok(Self::new(clinic_id, date, time, duration))
    }

    pub fn excluding(mut self, appointment_id: Uuid) -> Self {
        self.exclude_appointment_id = Some(appointment_id);
        self
    }

    pub fn interval(&self) -> Interval {
        Interval::new(self.date, self.time, self.duration_minutes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictCheck {
    Clear,
    Conflict { appointment_id: Uuid },
}

impl ConflictCheck {
    pub fn into_result(self) -> Result<(), SchedulingError> {
        match self {
            ConflictCheck::Clear => Ok(()),
            ConflictCheck::Conflict { appointment_id } => {
                Err(SchedulingError::Conflict { appointment_id })
            }
        }
    }
}

/// Returns the first existing appointment (in slice order) whose interval
/// overlaps the candidate. Cancelled rows, the excluded id and rows from
/// other clinics are skipped.
pub fn check_conflict(candidate: &Candidate, existing: &[ExistingAppointment]) -> ConflictCheck {
    let wanted = candidate.interval();

    existing
        .iter()
        .filter(|a| a.clinic_id == candidate.clinic_id)
        .filter(|a| a.status.occupies_slot())
        .filter(|a| Some(a.id) != candidate.exclude_appointment_id)
        .find(|a| wanted.overlaps(&a.interval()))
        .map_or(ConflictCheck::Clear, |a| ConflictCheck::Conflict {
            appointment_id: a.id,
        })
}

pub fn parse_date(s: &str) -> Result<NaiveDate, SchedulingError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| SchedulingError::InvalidInput(format!("date must be YYYY-MM-DD (got {s:?})")))
}

/// Accepts `H:MM`, `HH:MM` and `HH:MM:SS`.
pub fn parse_time(s: &str) -> Result<NaiveTime, SchedulingError> {
    let bad = || SchedulingError::InvalidInput(format!("time must be HH:MM (got {s:?})"));

    let parts: Vec<&str> = s.trim().split(':').collect();
    let (h, m, sec) = match parts.as_slice() {
        [h, m] => (*h, *m, "0"),
        [h, m, sec] if sec.len() == 2 => (*h, *m, *sec),
        _ => return Err(bad()),
    };
    if h.is_empty() || h.len() > 2 || m.len() != 2 {
        return Err(bad());
    }
    let all_digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(h) || !all_digits(m) || !all_digits(sec) {
        return Err(bad());
    }

    let h: u32 = h.parse().map_err(|_| bad())?;
    let m: u32 = m.parse().map_err(|_| bad())?;
    let sec: u32 = sec.parse().map_err(|_| bad())?;
    NaiveTime::from_hms_opt(h, m, sec).ok_or_else(bad)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clinic() -> Uuid {
        Uuid::from_u128(1)
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
    }

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn booked(id: u128, h: u32, m: u32, duration: Option<i32>, status: AppointmentStatus) -> ExistingAppointment {
        ExistingAppointment {
            id: Uuid::from_u128(id),
            clinic_id: clinic(),
            date: day(),
            time: at(h, m),
            duration_minutes: duration,
            status,
        }
    }

    #[test]
    fn own_interval_is_not_a_conflict_when_excluded() {
        let a = booked(10, 9, 0, Some(60), AppointmentStatus::Confirmed);
        let schedule = vec![
            booked(11, 7, 0, Some(60), AppointmentStatus::Scheduled),
            a.clone(),
            booked(12, 10, 0, Some(30), AppointmentStatus::Scheduled),
        ];
        let cand = Candidate::new(clinic(), a.date, a.time, 60).excluding(a.id);
        assert_eq!(check_conflict(&cand, &schedule), ConflictCheck::Clear);
    }

    #[test]
    fn touching_intervals_are_accepted() {
        let schedule = vec![booked(1, 9, 0, Some(60), AppointmentStatus::Scheduled)];

        let after = Candidate::new(clinic(), day(), at(10, 0), 30);
        assert_eq!(check_conflict(&after, &schedule), ConflictCheck::Clear);

        let before = Candidate::new(clinic(), day(), at(8, 0), 60);
        assert_eq!(check_conflict(&before, &schedule), ConflictCheck::Clear);
    }

    #[test]
    fn strict_overlap_is_rejected() {
        let schedule = vec![booked(7, 9, 0, Some(60), AppointmentStatus::Scheduled)];
        let cand = Candidate::new(clinic(), day(), at(9, 30), 30);
        assert_eq!(
            check_conflict(&cand, &schedule),
            ConflictCheck::Conflict {
                appointment_id: Uuid::from_u128(7)
            }
        );
    }

    #[test]
    fn enclosing_candidate_is_rejected() {
        let schedule = vec![booked(3, 10, 0, Some(15), AppointmentStatus::Confirmed)];
        let cand = Candidate::new(clinic(), day(), at(9, 0), 180);
        assert!(matches!(
            check_conflict(&cand, &schedule),
            ConflictCheck::Conflict { .. }
        ));
    }

    #[test]
    fn cancelled_appointments_do_not_block() {
        let schedule = vec![booked(1, 9, 0, Some(60), AppointmentStatus::Cancelled)];
        let cand = Candidate::new(clinic(), day(), at(9, 0), 60);
        assert_eq!(check_conflict(&cand, &schedule), ConflictCheck::Clear);
    }

    #[test]
    fn other_clinics_never_conflict() {
        let mut other = booked(1, 9, 0, Some(60), AppointmentStatus::Scheduled);
        other.clinic_id = Uuid::from_u128(2);
        let schedule = vec![other];

        let cand = Candidate::new(clinic(), day(), at(9, 0), 60);
        assert_eq!(check_conflict(&cand, &schedule), ConflictCheck::Clear);
    }

    #[test]
    fn missing_stored_duration_counts_as_sixty_minutes() {
        let schedule = vec![booked(5, 9, 0, None, AppointmentStatus::Scheduled)];

        let cand = Candidate::new(clinic(), day(), at(9, 30), 30);
        assert_eq!(
            check_conflict(&cand, &schedule),
            ConflictCheck::Conflict {
                appointment_id: Uuid::from_u128(5)
            }
        );

        let later = Candidate::new(clinic(), day(), at(10, 0), 30);
        assert_eq!(check_conflict(&later, &schedule), ConflictCheck::Clear);
    }

    #[test]
    fn first_overlap_in_input_order_is_reported() {
        let schedule = vec![
            booked(21, 9, 15, Some(30), AppointmentStatus::Scheduled),
            booked(20, 9, 0, Some(30), AppointmentStatus::Scheduled),
        ];
        let cand = Candidate::new(clinic(), day(), at(9, 0), 60);
        assert_eq!(
            check_conflict(&cand, &schedule),
            ConflictCheck::Conflict {
                appointment_id: Uuid::from_u128(21)
            }
        );
    }

    #[test]
    fn conflict_converts_to_error_with_colliding_id() {
        let id = Uuid::from_u128(99);
        assert_eq!(
            ConflictCheck::Conflict { appointment_id: id }.into_result(),
            Err(SchedulingError::Conflict { appointment_id: id })
        );
        assert_eq!(ConflictCheck::Clear.into_result(), Ok(()));
    }

    #[test]
    fn parse_rejects_malformed_input_before_comparing() {
        assert!(matches!(
            Candidate::parse(clinic(), "2025-02-30", "09:00", None),
            Err(SchedulingError::InvalidInput(_))
        ));
        assert!(matches!(
            Candidate::parse(clinic(), "2025-03-14", "9am", None),
            Err(SchedulingError::InvalidInput(_))
        ));
        assert!(matches!(
            Candidate::parse(clinic(), "2025-03-14", "09:00", Some(5)),
            Err(SchedulingError::Validation(_))
        ));

        let c = Candidate::parse(clinic(), "2025-03-14", "09:00", None).unwrap();
        assert_eq!(c.duration_minutes, 60);
        assert_eq!(c.time, at(9, 0));
    }

    #[test]
    fn time_formats() {
        assert_eq!(parse_time("9:05").unwrap(), at(9, 5));
        assert_eq!(parse_time("23:59").unwrap(), at(23, 59));
        assert_eq!(
            parse_time("14:30:00").unwrap(),
            NaiveTime::from_hms_opt(14, 30, 0).unwrap()
        );
        for bad in ["24:00", "12:60", "12:5", "123:00", "12", "12:00:0", "-1:00", "ab:cd", ""] {
            assert!(parse_time(bad).is_err(), "{bad:?} should fail");
        }
    }

    #[test]
    fn late_appointment_runs_past_midnight() {
        let late = Interval::new(day(), at(23, 30), 60);
        assert_eq!(late.end.date(), day().succ_opt().unwrap());
        assert_eq!(late.end.time(), at(0, 30));
    }
}
