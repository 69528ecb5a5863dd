use super::ledger::WalletLedger;
use super::settlement::SESSION_CAS_ATTEMPTS;
use crate::domain::context::{RequestContext, Role, UserId};
use crate::domain::events::DomainEvent;
use crate::domain::ports::{ClockRef, EventPublisherRef, SessionStoreRef, TeacherDirectoryRef};
use crate::domain::session::{
    PaymentStatus, RecurringFrequency, Session, SessionDuration, SessionId, SessionStatus, Slot,
};
use crate::error::{EngineError, Result};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// A student's booking request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub teacher_id: UserId,
    pub subject: String,
    #[serde(default)]
    pub topic: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration: SessionDuration,
    #[serde(default)]
    pub recurring: Option<RecurringFrequency>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookingOutcome {
    pub session: Session,
    /// Later occurrences of a recurring booking that were created.
    pub recurrences: Vec<Session>,
    /// Dates of occurrences skipped because the teacher was already booked.
    pub skipped: Vec<NaiveDate>,
}

/// Session Manager: booking, the session state machine and reminders.
pub struct SessionManager {
    sessions: SessionStoreRef,
    teachers: TeacherDirectoryRef,
    ledger: WalletLedger,
    events: EventPublisherRef,
    clock: ClockRef,
    recurring_occurrences: u32,
}

impl SessionManager {
    pub fn new(
        sessions: SessionStoreRef,
        teachers: TeacherDirectoryRef,
        ledger: WalletLedger,
        events: EventPublisherRef,
        clock: ClockRef,
        recurring_occurrences: u32,
    ) -> Self {
        Self {
            sessions,
            teachers,
            ledger,
            events,
            clock,
            recurring_occurrences,
        }
    }

    /// Books a session with the teacher's current rate frozen into its price.
    ///
    /// The first occurrence must get its slot or the booking fails with
    /// `Conflict`. Later occurrences of a recurring booking that collide with
    /// existing sessions are skipped and reported.
    pub async fn create_session(
        &self,
        ctx: &RequestContext,
        request: BookingRequest,
    ) -> Result<BookingOutcome> {
        ctx.require_role(Role::Student)?;
        if ctx.user_id == request.teacher_id {
            return Err(EngineError::validation("A teacher cannot book their own session"));
        }
        let subject = request.subject.trim().to_string();
        if subject.is_empty() {
            return Err(EngineError::validation("Subject is required"));
        }
        let slot = Slot::new(request.date, request.time, request.duration)?;

        let teacher = self
            .teachers
            .teacher(request.teacher_id)
            .await?
            .ok_or_else(|| EngineError::not_found("teacher", request.teacher_id))?;
        if !teacher.teaches(&subject) {
            return Err(EngineError::validation(format!(
                "{} does not teach {subject}",
                teacher.name
            )));
        }
        let total_amount = teacher.hourly_rate.scale(request.duration.hours())?;

        let now = self.clock.now();
        let series_id = request.recurring.map(|_| Uuid::new_v4());
        let template = Session {
            id: Uuid::new_v4(),
            student_id: ctx.user_id,
            teacher_id: teacher.user_id,
            subject,
            topic: request.topic.trim().to_string(),
            scheduled_date: slot.date,
            scheduled_time: slot.time,
            duration: slot.duration,
            hourly_rate_snapshot: teacher.hourly_rate,
            total_amount,
            status: SessionStatus::Pending,
            payment_status: PaymentStatus::Pending,
            recurring_frequency: request.recurring,
            series_id,
            meeting_link: None,
            created_at: now,
            updated_at: now,
            version: 1,
        };

        self.sessions.insert_if_slot_free(template.clone()).await?;
        self.booked(&template);

        let mut recurrences = Vec::new();
        let mut skipped = Vec::new();
        if let Some(frequency) = request.recurring {
            for n in 1..self.recurring_occurrences {
                let Some(date) = frequency.nth_date(slot.date, n) else {
                    break;
                };
                let sibling = Session {
                    id: Uuid::new_v4(),
                    scheduled_date: date,
                    ..template.clone()
                };
                match self.sessions.insert_if_slot_free(sibling.clone()).await {
                    Ok(()) => {
                        self.booked(&sibling);
                        recurrences.push(sibling);
                    }
                    Err(EngineError::Conflict(reason)) => {
                        tracing::warn!(
                            series_id = ?series_id,
                            %date,
                            %reason,
                            "recurring occurrence skipped"
                        );
                        skipped.push(date);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(BookingOutcome {
            session: template,
            recurrences,
            skipped,
        })
    }

    fn booked(&self, session: &Session) {
        tracing::info!(
            session_id = %session.id,
            teacher_id = %session.teacher_id,
            date = %session.scheduled_date,
            time = %session.scheduled_time,
            total_amount = %session.total_amount,
            "session booked"
        );
        self.events.publish(DomainEvent::SessionBooked {
            session_id: session.id,
            student_id: session.student_id,
            teacher_id: session.teacher_id,
            scheduled_date: session.scheduled_date,
            scheduled_time: session.scheduled_time,
        });
    }

    /// Applies `change` to the stored session with compare-and-swap, retrying
    /// when a concurrent writer got there first.
    async fn update<F>(&self, id: SessionId, change: F) -> Result<(Session, Session)>
    where
        F: Fn(&Session) -> Result<Session>,
    {
        for _ in 0..SESSION_CAS_ATTEMPTS {
            let current = self.load(id).await?;
            let next = change(&current)?;
            if self
                .sessions
                .compare_and_swap(current.version, next.clone())
                .await?
            {
                return Ok((current, next));
            }
            tracing::debug!(session_id = %id, "session changed concurrently, retrying");
        }
        Err(EngineError::Conflict(format!(
            "session {id} is being modified concurrently"
        )))
    }

    /// Moves a session along the state machine on behalf of `ctx`.
    ///
    /// Cancelling a paid session appends the compensating refund. If that
    /// append fails the cancellation stays recorded and the error is returned;
    /// the refund is idempotent and can be written again later.
    pub async fn transition(
        &self,
        ctx: &RequestContext,
        id: SessionId,
        target: SessionStatus,
    ) -> Result<Session> {
        let now = self.clock.now();
        let (before, after) = self
            .update(id, |s| s.transition(ctx, target, now))
            .await?;
        tracing::info!(
            session_id = %id,
            from = ?before.status,
            to = ?after.status,
            "session transitioned"
        );

        match target {
            SessionStatus::Confirmed => self.events.publish(DomainEvent::TeacherAccepted {
                session_id: after.id,
                student_id: after.student_id,
                teacher_id: after.teacher_id,
            }),
            SessionStatus::Cancelled => {
                let refunded = after.payment_status == PaymentStatus::Refunded;
                if refunded && let Err(e) = self.ledger.refund_session(&after).await {
                    tracing::error!(
                        session_id = %after.id,
                        error = %e,
                        "session cancelled as refunded but the refund was not written; \
                         rerun it with SettlementReconciler::refund_session"
                    );
                    return Err(e);
                }
                self.events.publish(DomainEvent::SessionCancelled {
                    session_id: after.id,
                    cancelled_by: ctx.user_id,
                    refunded,
                });
            }
            _ => {}
        }
        Ok(after)
    }

    /// Sets the video meeting link. Teacher only.
    pub async fn set_meeting_link(
        &self,
        ctx: &RequestContext,
        id: SessionId,
        link: &str,
    ) -> Result<Session> {
        let parsed = Url::parse(link.trim())
            .map_err(|e| EngineError::validation(format!("Invalid meeting link '{link}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(EngineError::validation(format!(
                "Meeting link '{link}' must be an http(s) URL"
            )));
        }
        let now = self.clock.now();
        let (_, after) = self
            .update(id, |s| {
                if ctx.user_id != s.teacher_id {
                    return Err(EngineError::Forbidden(
                        "only the teacher can set the meeting link".to_string(),
                    ));
                }
                if s.status.is_terminal() {
                    return Err(EngineError::State(format!(
                        "session {} is already {:?}",
                        s.id, s.status
                    )));
                }
                Ok(s.with_meeting_link(parsed.to_string(), now))
            })
            .await?;
        Ok(after)
    }

    /// Current state of a session, visible to its participants and admins.
    pub async fn session(&self, ctx: &RequestContext, id: SessionId) -> Result<Session> {
        let session = self.load(id).await?;
        if !session.can_view(ctx) {
            return Err(EngineError::Forbidden(format!(
                "user is not a participant of session {id}"
            )));
        }
        Ok(session)
    }

    /// Sessions the caller takes part in, by start time.
    pub async fn sessions_for(&self, ctx: &RequestContext) -> Result<Vec<Session>> {
        self.sessions.for_user(ctx.user_id).await
    }

    /// Emits a reminder for every confirmed session starting in `[from, to)`.
    pub async fn send_reminders(&self, from: NaiveDateTime, to: NaiveDateTime) -> Result<usize> {
        let mut sent = 0;
        for session in self.sessions.starting_between(from, to).await? {
            if session.status != SessionStatus::Confirmed {
                continue;
            }
            self.events.publish(DomainEvent::SessionReminder {
                session_id: session.id,
                student_id: session.student_id,
                teacher_id: session.teacher_id,
                scheduled_date: session.scheduled_date,
                scheduled_time: session.scheduled_time,
            });
            sent += 1;
        }
        tracing::debug!(%from, %to, sent, "session reminders emitted");
        Ok(sent)
    }

    async fn load(&self, id: SessionId) -> Result<Session> {
        self.sessions
            .get(id)
            .await?
            .ok_or_else(|| EngineError::not_found("session", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ledger::{
        Appended, EntryStatus, EntryType, LedgerBatch, LedgerEntry, WalletAccount, WalletId,
    };
    use crate::domain::money::{Amount, Balance, Currency};
    use crate::domain::ports::{LedgerStore, LedgerStoreRef, SessionStore};
    use crate::domain::teacher::TeacherProfile;
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::events::RecordingEventPublisher;
    use crate::infrastructure::in_memory::{
        InMemoryLedgerStore, InMemorySessionStore, InMemoryTeacherDirectory,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Refuses refund batches while `refunds_down` is set.
    #[derive(Clone, Default)]
    struct FlakyRefunds {
        inner: InMemoryLedgerStore,
        refunds_down: Arc<AtomicBool>,
    }

    #[async_trait]
    impl LedgerStore for FlakyRefunds {
        async fn open_wallet(
            &self,
            user_id: UserId,
            currency: &Currency,
            now: DateTime<Utc>,
        ) -> Result<WalletAccount> {
            self.inner.open_wallet(user_id, currency, now).await
        }

        async fn wallet(&self, id: WalletId) -> Result<Option<WalletAccount>> {
            self.inner.wallet(id).await
        }

        async fn wallet_for_user(&self, user_id: UserId) -> Result<Option<WalletAccount>> {
            self.inner.wallet_for_user(user_id).await
        }

        async fn all_wallets(&self) -> Result<Vec<WalletAccount>> {
            self.inner.all_wallets().await
        }

        async fn append(&self, batch: LedgerBatch, now: DateTime<Utc>) -> Result<Appended> {
            if batch.key.starts_with("refund:") && self.refunds_down.load(Ordering::SeqCst) {
                return Err(EngineError::Internal("ledger unavailable".into()));
            }
            self.inner.append(batch, now).await
        }

        async fn entries(&self, wallet_id: WalletId) -> Result<Vec<LedgerEntry>> {
            self.inner.entries(wallet_id).await
        }

        async fn batch(&self, key: &str) -> Result<Option<Vec<LedgerEntry>>> {
            self.inner.batch(key).await
        }

        async fn available(&self, wallet_id: WalletId) -> Result<Balance> {
            self.inner.available(wallet_id).await
        }

        async fn set_cached_balance(&self, wallet_id: WalletId, balance: Balance) -> Result<()> {
            self.inner.set_cached_balance(wallet_id, balance).await
        }
    }

    struct Fixture {
        manager: SessionManager,
        sessions: InMemorySessionStore,
        teachers: InMemoryTeacherDirectory,
        ledger: WalletLedger,
        events: RecordingEventPublisher,
        teacher: UserId,
        student: UserId,
    }

    async fn fixture() -> Fixture {
        fixture_with(Arc::new(InMemoryLedgerStore::new())).await
    }

    async fn fixture_with(store: LedgerStoreRef) -> Fixture {
        let clock = ManualClock::new(
            DateTime::parse_from_rfc3339("2026-11-01T09:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        );
        let sessions = InMemorySessionStore::new();
        let teachers = InMemoryTeacherDirectory::new();
        let events = RecordingEventPublisher::new();
        let ledger = WalletLedger::new(store, Arc::new(clock.clone()), Currency::pkr());
        let teacher = Uuid::new_v4();
        teachers
            .upsert(TeacherProfile {
                user_id: teacher,
                name: "Bilal".to_string(),
                hourly_rate: Amount::from_major(dec!(500)).unwrap(),
                subjects: vec!["Math".to_string()],
            })
            .await;
        let manager = SessionManager::new(
            Arc::new(sessions.clone()),
            Arc::new(teachers.clone()),
            ledger.clone(),
            Arc::new(events.clone()),
            Arc::new(clock),
            4,
        );
        Fixture {
            manager,
            sessions,
            teachers,
            ledger,
            events,
            teacher,
            student: Uuid::new_v4(),
        }
    }

    fn request(teacher_id: UserId, day: u32, hour: u32, hours: rust_decimal::Decimal) -> BookingRequest {
        BookingRequest {
            teacher_id,
            subject: "math".to_string(),
            topic: "Derivatives".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 11, day).unwrap(),
            time: NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
            duration: SessionDuration::from_hours(hours).unwrap(),
            recurring: None,
        }
    }

    #[tokio::test]
    async fn test_booking_freezes_price() {
        let f = fixture().await;
        let student = RequestContext::student(f.student);
        let outcome = f
            .manager
            .create_session(&student, request(f.teacher, 2, 10, dec!(1.5)))
            .await
            .unwrap();
        let session = outcome.session;
        assert_eq!(session.total_amount, Amount::from_major(dec!(750)).unwrap());
        assert_eq!(session.status, SessionStatus::Pending);
        assert_eq!(session.payment_status, PaymentStatus::Pending);

        f.teachers
            .set_hourly_rate(f.teacher, Amount::from_major(dec!(900)).unwrap())
            .await
            .unwrap();
        let stored = f.manager.session(&student, session.id).await.unwrap();
        assert_eq!(stored.total_amount, Amount::from_major(dec!(750)).unwrap());
        assert_eq!(f.events.names(), vec!["session_booked"]);
    }

    #[tokio::test]
    async fn test_booking_validation() {
        let f = fixture().await;
        let student = RequestContext::student(f.student);

        let mut other_subject = request(f.teacher, 2, 10, dec!(1));
        other_subject.subject = "Chemistry".to_string();
        assert!(matches!(
            f.manager.create_session(&student, other_subject).await,
            Err(EngineError::Validation(_))
        ));

        assert!(matches!(
            f.manager
                .create_session(&student, request(Uuid::new_v4(), 2, 10, dec!(1)))
                .await,
            Err(EngineError::NotFound(_))
        ));

        let mut odd_time = request(f.teacher, 2, 10, dec!(1));
        odd_time.time = NaiveTime::from_hms_opt(10, 20, 0).unwrap();
        assert!(matches!(
            f.manager.create_session(&student, odd_time).await,
            Err(EngineError::Validation(_))
        ));

        assert!(matches!(
            f.manager
                .create_session(
                    &RequestContext::teacher(f.teacher),
                    request(f.teacher, 2, 10, dec!(1))
                )
                .await,
            Err(EngineError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_overlapping_booking_conflicts() {
        let f = fixture().await;
        f.manager
            .create_session(&RequestContext::student(f.student), request(f.teacher, 2, 10, dec!(2)))
            .await
            .unwrap();
        let other = RequestContext::student(Uuid::new_v4());
        assert!(matches!(
            f.manager
                .create_session(&other, request(f.teacher, 2, 11, dec!(1)))
                .await,
            Err(EngineError::Conflict(_))
        ));
        assert!(
            f.manager
                .create_session(&other, request(f.teacher, 2, 12, dec!(1)))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_recurring_booking_skips_taken_dates() {
        let f = fixture().await;
        let other = RequestContext::student(Uuid::new_v4());
        f.manager
            .create_session(&other, request(f.teacher, 16, 10, dec!(1)))
            .await
            .unwrap();

        let mut weekly = request(f.teacher, 2, 10, dec!(1));
        weekly.recurring = Some(RecurringFrequency::Weekly);
        let outcome = f
            .manager
            .create_session(&RequestContext::student(f.student), weekly)
            .await
            .unwrap();

        let dates: Vec<u32> = outcome
            .recurrences
            .iter()
            .map(|s| chrono::Datelike::day(&s.scheduled_date))
            .collect();
        assert_eq!(dates, vec![9, 23]);
        assert_eq!(outcome.skipped, vec![NaiveDate::from_ymd_opt(2026, 11, 16).unwrap()]);
        assert!(
            outcome
                .recurrences
                .iter()
                .all(|s| s.series_id == outcome.session.series_id && s.series_id.is_some())
        );
    }

    #[tokio::test]
    async fn test_accept_and_complete() {
        let f = fixture().await;
        let session = f
            .manager
            .create_session(&RequestContext::student(f.student), request(f.teacher, 2, 10, dec!(1)))
            .await
            .unwrap()
            .session;
        let teacher = RequestContext::teacher(f.teacher);

        f.manager
            .transition(&teacher, session.id, SessionStatus::Confirmed)
            .await
            .unwrap();
        let done = f
            .manager
            .transition(&teacher, session.id, SessionStatus::Completed)
            .await
            .unwrap();
        assert_eq!(done.status, SessionStatus::Completed);
        assert!(matches!(
            f.manager
                .transition(&teacher, session.id, SessionStatus::Cancelled)
                .await,
            Err(EngineError::State(_))
        ));
        assert_eq!(
            f.events.names(),
            vec!["session_booked", "teacher_accepted"]
        );
    }

    #[tokio::test]
    async fn test_cancelling_paid_session_refunds_teacher() {
        let f = fixture().await;
        let session = f
            .manager
            .create_session(&RequestContext::student(f.student), request(f.teacher, 2, 10, dec!(1.5)))
            .await
            .unwrap()
            .session;

        // Settle the payment the way the reconciler would.
        let wallet = f.ledger.open_wallet(f.teacher).await.unwrap();
        f.ledger
            .append(LedgerBatch::settlement(
                "T1",
                LedgerEntry::new(
                    wallet.id,
                    EntryType::SessionPayment,
                    Balance::from(session.total_amount),
                    session.id,
                    EntryStatus::Completed,
                    session.created_at,
                ),
            ))
            .await
            .unwrap();
        let paid = session.with_payment_completed(session.created_at);
        assert!(
            f.sessions
                .compare_and_swap(session.version, paid)
                .await
                .unwrap()
        );

        let cancelled = f
            .manager
            .transition(&RequestContext::student(f.student), session.id, SessionStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(cancelled.payment_status, PaymentStatus::Refunded);

        let history = f
            .ledger
            .transactions(&RequestContext::teacher(f.teacher))
            .await
            .unwrap();
        let refunds: Vec<_> = history
            .iter()
            .filter(|e| e.r#type == EntryType::Refund)
            .collect();
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].amount, Balance::new(-75_000));
        assert_eq!(f.ledger.balance(wallet.id).await.unwrap(), Balance::ZERO);
        assert!(f.ledger.rebalance(wallet.id).await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_failed_refund_leaves_cancellation_for_repair() {
        let store = FlakyRefunds::default();
        let f = fixture_with(Arc::new(store.clone())).await;
        let session = f
            .manager
            .create_session(&RequestContext::student(f.student), request(f.teacher, 2, 10, dec!(1)))
            .await
            .unwrap()
            .session;
        let wallet = f.ledger.open_wallet(f.teacher).await.unwrap();
        f.ledger
            .append(LedgerBatch::settlement(
                "T1",
                LedgerEntry::new(
                    wallet.id,
                    EntryType::SessionPayment,
                    Balance::from(session.total_amount),
                    session.id,
                    EntryStatus::Completed,
                    session.created_at,
                ),
            ))
            .await
            .unwrap();
        let paid = session.with_payment_completed(session.created_at);
        assert!(f.sessions.compare_and_swap(session.version, paid).await.unwrap());

        store.refunds_down.store(true, Ordering::SeqCst);
        let result = f
            .manager
            .transition(&RequestContext::student(f.student), session.id, SessionStatus::Cancelled)
            .await;
        assert!(matches!(result, Err(EngineError::Internal(_))));

        let stored = f.sessions.get(session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Cancelled);
        assert_eq!(stored.payment_status, PaymentStatus::Refunded);
        assert_eq!(f.ledger.balance(wallet.id).await.unwrap(), Balance::new(50_000));
        assert!(!f.events.names().contains(&"session_cancelled"));

        // The refund is written once the ledger is back.
        store.refunds_down.store(false, Ordering::SeqCst);
        let repaired = f.ledger.refund_session(&stored).await.unwrap();
        assert!(!repaired.replayed);
        assert!(f.ledger.refund_session(&stored).await.unwrap().replayed);
        assert_eq!(f.ledger.balance(wallet.id).await.unwrap(), Balance::ZERO);
    }

    #[tokio::test]
    async fn test_meeting_link_and_access() {
        let f = fixture().await;
        let session = f
            .manager
            .create_session(&RequestContext::student(f.student), request(f.teacher, 2, 10, dec!(1)))
            .await
            .unwrap()
            .session;

        assert!(matches!(
            f.manager
                .set_meeting_link(&RequestContext::student(f.student), session.id, "https://meet.example/abc")
                .await,
            Err(EngineError::Forbidden(_))
        ));
        assert!(matches!(
            f.manager
                .set_meeting_link(&RequestContext::teacher(f.teacher), session.id, "not a url")
                .await,
            Err(EngineError::Validation(_))
        ));
        let updated = f
            .manager
            .set_meeting_link(&RequestContext::teacher(f.teacher), session.id, "https://meet.example/abc")
            .await
            .unwrap();
        assert_eq!(updated.meeting_link.as_deref(), Some("https://meet.example/abc"));

        assert!(matches!(
            f.manager
                .session(&RequestContext::student(Uuid::new_v4()), session.id)
                .await,
            Err(EngineError::Forbidden(_))
        ));
        assert!(
            f.manager
                .session(&RequestContext::admin(Uuid::new_v4()), session.id)
                .await
                .is_ok()
        );
        assert_eq!(
            f.manager
                .sessions_for(&RequestContext::teacher(f.teacher))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_reminders_only_for_confirmed_sessions() {
        let f = fixture().await;
        let student = RequestContext::student(f.student);
        let first = f
            .manager
            .create_session(&student, request(f.teacher, 2, 10, dec!(1)))
            .await
            .unwrap()
            .session;
        f.manager
            .create_session(&student, request(f.teacher, 2, 14, dec!(1)))
            .await
            .unwrap();
        f.manager
            .transition(&RequestContext::teacher(f.teacher), first.id, SessionStatus::Confirmed)
            .await
            .unwrap();

        let day = NaiveDate::from_ymd_opt(2026, 11, 2).unwrap();
        let sent = f
            .manager
            .send_reminders(
                day.and_hms_opt(0, 0, 0).unwrap(),
                day.and_hms_opt(23, 59, 0).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(sent, 1);
        assert_eq!(f.events.names().last(), Some(&"session_reminder"));
    }
}
