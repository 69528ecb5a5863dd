use super::context::{RequestContext, UserId};
use super::money::Amount;
use crate::error::EngineError;
use chrono::{DateTime, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type SessionId = Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }

    /// Statuses that occupy the teacher's calendar slot.
    pub fn holds_slot(&self) -> bool {
        matches!(self, SessionStatus::Pending | SessionStatus::Confirmed)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

/// Session length, bookable in half-hour steps from 30 minutes to 3 hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct SessionDuration {
    half_hours: u8,
}

impl SessionDuration {
    pub const MAX_HALF_HOURS: u8 = 6;

    pub fn from_hours(hours: Decimal) -> Result<Self, EngineError> {
        let half_hours = hours * Decimal::TWO;
        let allowed = 1..=Self::MAX_HALF_HOURS;
        if half_hours.fract() == Decimal::ZERO
            && let Some(n) = half_hours.to_u8()
            && allowed.contains(&n)
        {
            Ok(Self { half_hours: n })
        } else {
            Err(EngineError::validation(format!(
                "Duration {hours}h is not one of 0.5, 1, 1.5, 2, 2.5, 3"
            )))
        }
    }

    pub fn hours(&self) -> Decimal {
        Decimal::from(self.half_hours) / Decimal::TWO
    }

    pub fn as_chrono(&self) -> Duration {
        Duration::minutes(30 * i64::from(self.half_hours))
    }
}

impl TryFrom<Decimal> for SessionDuration {
    type Error = EngineError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::from_hours(value)
    }
}

impl From<SessionDuration> for Decimal {
    fn from(duration: SessionDuration) -> Self {
        duration.hours()
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
pub enum RecurringFrequency {
    #[serde(rename = "weekly")]
    Weekly,
    #[serde(rename = "bi-weekly")]
    BiWeekly,
    #[serde(rename = "monthly")]
    Monthly,
}

impl RecurringFrequency {
    /// Date of the `n`-th occurrence after `first` (n = 0 is `first` itself).
    pub fn nth_date(&self, first: NaiveDate, n: u32) -> Option<NaiveDate> {
        match self {
            RecurringFrequency::Weekly => first.checked_add_signed(Duration::weeks(i64::from(n))),
            RecurringFrequency::BiWeekly => {
                first.checked_add_signed(Duration::weeks(2 * i64::from(n)))
            }
            RecurringFrequency::Monthly => first.checked_add_months(Months::new(n)),
        }
    }
}

/// A half-open time window `[start, start + duration)` in a teacher's calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration: SessionDuration,
}

impl Slot {
    pub fn new(
        date: NaiveDate,
        time: NaiveTime,
        duration: SessionDuration,
    ) -> Result<Self, EngineError> {
        if time.second() != 0 || time.nanosecond() != 0 || time.minute() % 30 != 0 {
            return Err(EngineError::validation(format!(
                "Start time {time} must be on a half-hour boundary"
            )));
        }
        Ok(Self {
            date,
            time,
            duration,
        })
    }

    pub fn start(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }

    pub fn end(&self) -> NaiveDateTime {
        self.start() + self.duration.as_chrono()
    }

    pub fn overlaps(&self, other: &Slot) -> bool {
        self.start() < other.end() && other.start() < self.end()
    }
}

/// Which side of a session the caller is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Student,
    Teacher,
}

/// A booked tutoring session.
///
/// `total_amount` is frozen at booking time from the teacher's rate and never
/// recomputed. `version` increases on every stored change and is the
/// compare-and-swap token used by session stores.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Session {
    pub id: SessionId,
    pub student_id: UserId,
    pub teacher_id: UserId,
    pub subject: String,
    pub topic: String,
    pub scheduled_date: NaiveDate,
    pub scheduled_time: NaiveTime,
    pub duration: SessionDuration,
    pub hourly_rate_snapshot: Amount,
    pub total_amount: Amount,
    pub status: SessionStatus,
    pub payment_status: PaymentStatus,
    pub recurring_frequency: Option<RecurringFrequency>,
    /// Shared by all occurrences created from one recurring booking.
    pub series_id: Option<Uuid>,
    pub meeting_link: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Session {
    pub fn slot(&self) -> Slot {
        Slot {
            date: self.scheduled_date,
            time: self.scheduled_time,
            duration: self.duration,
        }
    }

    pub fn party_of(&self, ctx: &RequestContext) -> Result<Party, EngineError> {
        if ctx.user_id == self.teacher_id {
            Ok(Party::Teacher)
        } else if ctx.user_id == self.student_id {
            Ok(Party::Student)
        } else {
            Err(EngineError::Forbidden(format!(
                "user is not a participant of session {}",
                self.id
            )))
        }
    }

    pub fn can_view(&self, ctx: &RequestContext) -> bool {
        ctx.is_admin() || self.party_of(ctx).is_ok()
    }

    /// Computes the session after moving to `target` on behalf of `ctx`.
    ///
    /// Cancelling a paid session flips `payment_status` to `Refunded`; the
    /// caller is responsible for the compensating ledger entry.
    pub fn transition(
        &self,
        ctx: &RequestContext,
        target: SessionStatus,
        now: DateTime<Utc>,
    ) -> Result<Session, EngineError> {
        use SessionStatus::*;

        let party = self.party_of(ctx)?;
        let teacher_only = match (self.status, target) {
            (Pending, Confirmed) | (Confirmed, InProgress) | (Confirmed, Completed) => true,
            (InProgress, Completed) => true,
            (Pending, Cancelled) | (Confirmed, Cancelled) | (InProgress, Cancelled) => false,
            (from, to) => {
                return Err(EngineError::State(format!(
                    "session {} cannot move from {from:?} to {to:?}",
                    self.id
                )));
            }
        };
        if teacher_only && party != Party::Teacher {
            return Err(EngineError::Forbidden(format!(
                "only the teacher can move a session to {target:?}"
            )));
        }

        let mut next = self.clone();
        next.status = target;
        if target == Cancelled && self.payment_status == PaymentStatus::Completed {
            next.payment_status = PaymentStatus::Refunded;
        }
        next.touch(now);
        Ok(next)
    }

    /// Records a settled payment. Acceptance is a separate axis, so `status`
    /// is left untouched.
    pub fn with_payment_completed(&self, now: DateTime<Utc>) -> Session {
        let mut next = self.clone();
        next.payment_status = if self.status == SessionStatus::Cancelled {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::Completed
        };
        next.touch(now);
        next
    }

    pub fn with_meeting_link(&self, link: String, now: DateTime<Utc>) -> Session {
        let mut next = self.clone();
        next.meeting_link = Some(link);
        next.touch(now);
        next
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn session(status: SessionStatus, payment_status: PaymentStatus) -> Session {
        let now = Utc::now();
        Session {
            id: Uuid::new_v4(),
            student_id: Uuid::new_v4(),
            teacher_id: Uuid::new_v4(),
            subject: "Math".to_string(),
            topic: "Limits".to_string(),
            scheduled_date: NaiveDate::from_ymd_opt(2026, 11, 2).unwrap(),
            scheduled_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            duration: SessionDuration::from_hours(dec!(1)).unwrap(),
            hourly_rate_snapshot: Amount::new(50_000).unwrap(),
            total_amount: Amount::new(50_000).unwrap(),
            status,
            payment_status,
            recurring_frequency: None,
            series_id: None,
            meeting_link: None,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    #[test]
    fn test_duration_validation() {
        for hours in [dec!(0.5), dec!(1), dec!(1.5), dec!(2), dec!(2.5), dec!(3)] {
            assert_eq!(SessionDuration::from_hours(hours).unwrap().hours(), hours);
        }
        for hours in [dec!(0), dec!(0.25), dec!(3.5), dec!(-1), dec!(1.2)] {
            assert!(SessionDuration::from_hours(hours).is_err(), "{hours}");
        }
    }

    #[test]
    fn test_slot_overlap() {
        let date = NaiveDate::from_ymd_opt(2026, 11, 2).unwrap();
        let at = |h, m, hours| {
            Slot::new(
                date,
                NaiveTime::from_hms_opt(h, m, 0).unwrap(),
                SessionDuration::from_hours(hours).unwrap(),
            )
            .unwrap()
        };
        assert!(at(10, 0, dec!(1.5)).overlaps(&at(11, 0, dec!(1))));
        assert!(!at(10, 0, dec!(1)).overlaps(&at(11, 0, dec!(1))));
        assert!(at(9, 30, dec!(3)).overlaps(&at(10, 0, dec!(0.5))));
    }

    #[test]
    fn test_slot_crossing_midnight_overlaps_next_day() {
        let late = Slot::new(
            NaiveDate::from_ymd_opt(2026, 11, 2).unwrap(),
            NaiveTime::from_hms_opt(23, 30, 0).unwrap(),
            SessionDuration::from_hours(dec!(1)).unwrap(),
        )
        .unwrap();
        let early = Slot::new(
            NaiveDate::from_ymd_opt(2026, 11, 3).unwrap(),
            NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
            SessionDuration::from_hours(dec!(0.5)).unwrap(),
        )
        .unwrap();
        assert!(late.overlaps(&early));
    }

    #[test]
    fn test_slot_rejects_odd_start_times() {
        let result = Slot::new(
            NaiveDate::from_ymd_opt(2026, 11, 2).unwrap(),
            NaiveTime::from_hms_opt(10, 15, 0).unwrap(),
            SessionDuration::from_hours(dec!(1)).unwrap(),
        );
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_teacher_accepts_pending_session() {
        let s = session(SessionStatus::Pending, PaymentStatus::Pending);
        let next = s
            .transition(
                &RequestContext::teacher(s.teacher_id),
                SessionStatus::Confirmed,
                Utc::now(),
            )
            .unwrap();
        assert_eq!(next.status, SessionStatus::Confirmed);
        assert_eq!(next.version, s.version + 1);
    }

    #[test]
    fn test_student_cannot_confirm() {
        let s = session(SessionStatus::Pending, PaymentStatus::Pending);
        let result = s.transition(
            &RequestContext::student(s.student_id),
            SessionStatus::Confirmed,
            Utc::now(),
        );
        assert!(matches!(result, Err(EngineError::Forbidden(_))));
    }

    #[test]
    fn test_terminal_states_reject_transitions() {
        for status in [SessionStatus::Completed, SessionStatus::Cancelled] {
            let s = session(status, PaymentStatus::Pending);
            let result = s.transition(
                &RequestContext::teacher(s.teacher_id),
                SessionStatus::Cancelled,
                Utc::now(),
            );
            assert!(matches!(result, Err(EngineError::State(_))));
        }
    }

    #[test]
    fn test_pending_cannot_skip_to_completed() {
        let s = session(SessionStatus::Pending, PaymentStatus::Completed);
        let result = s.transition(
            &RequestContext::teacher(s.teacher_id),
            SessionStatus::Completed,
            Utc::now(),
        );
        assert!(matches!(result, Err(EngineError::State(_))));
    }

    #[test]
    fn test_cancelling_paid_session_marks_refund() {
        let s = session(SessionStatus::Confirmed, PaymentStatus::Completed);
        let next = s
            .transition(
                &RequestContext::student(s.student_id),
                SessionStatus::Cancelled,
                Utc::now(),
            )
            .unwrap();
        assert_eq!(next.payment_status, PaymentStatus::Refunded);
    }

    #[test]
    fn test_outsider_is_forbidden() {
        let s = session(SessionStatus::Pending, PaymentStatus::Pending);
        let result = s.transition(
            &RequestContext::student(Uuid::new_v4()),
            SessionStatus::Cancelled,
            Utc::now(),
        );
        assert!(matches!(result, Err(EngineError::Forbidden(_))));
    }

    #[test]
    fn test_recurrence_dates() {
        let first = NaiveDate::from_ymd_opt(2026, 1, 31).unwrap();
        assert_eq!(
            RecurringFrequency::Weekly.nth_date(first, 1),
            NaiveDate::from_ymd_opt(2026, 2, 7)
        );
        assert_eq!(
            RecurringFrequency::BiWeekly.nth_date(first, 2),
            NaiveDate::from_ymd_opt(2026, 2, 28)
        );
        // Month-end clamps to the last day of the shorter month.
        assert_eq!(
            RecurringFrequency::Monthly.nth_date(first, 1),
            NaiveDate::from_ymd_opt(2026, 2, 28)
        );
    }

    #[test]
    fn test_frequency_serialization() {
        assert_eq!(
            serde_json::from_str::<RecurringFrequency>("\"bi-weekly\"").unwrap(),
            RecurringFrequency::BiWeekly
        );
    }
}
