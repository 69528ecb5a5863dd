#![allow(dead_code)]

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use std::io::Write;
use std::sync::Arc;
use tutorpay::application::engine::{Engine, Stores};
use tutorpay::application::gateway::InitiateRequest;
use tutorpay::application::sessions::BookingRequest;
use tutorpay::config::EngineConfig;
use tutorpay::domain::context::{RequestContext, UserId};
use tutorpay::domain::money::Amount;
use tutorpay::domain::payment::{CustomerContact, PaymentIntent, PaymentPurpose, Provider};
use tutorpay::domain::session::{Session, SessionDuration};
use tutorpay::domain::teacher::TeacherProfile;
use tutorpay::infrastructure::clock::ManualClock;
use tutorpay::infrastructure::events::RecordingEventPublisher;
use tutorpay::infrastructure::in_memory::InMemoryTeacherDirectory;
use uuid::Uuid;

/// An in-memory engine with a hand-driven clock.
pub struct Harness {
    pub engine: Arc<Engine>,
    pub teachers: InMemoryTeacherDirectory,
    pub clock: ManualClock,
    pub events: RecordingEventPublisher,
}

pub fn start() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-11-01T09:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let teachers = InMemoryTeacherDirectory::new();
        let clock = ManualClock::new(start());
        let events = RecordingEventPublisher::new();
        let engine = Engine::new(
            &config,
            Stores::in_memory(),
            Arc::new(teachers.clone()),
            Arc::new(events.clone()),
            Arc::new(clock.clone()),
        );
        Self {
            engine: Arc::new(engine),
            teachers,
            clock,
            events,
        }
    }

    pub async fn teacher(&self, rate: Decimal) -> UserId {
        let user_id = Uuid::new_v4();
        self.teachers
            .upsert(TeacherProfile {
                user_id,
                name: "Bilal".to_string(),
                hourly_rate: Amount::from_major(rate).unwrap(),
                subjects: vec!["Math".to_string()],
            })
            .await;
        user_id
    }

    pub fn booking(teacher_id: UserId, day: u32, hour: u32, hours: Decimal) -> BookingRequest {
        BookingRequest {
            teacher_id,
            subject: "Math".to_string(),
            topic: String::new(),
            date: NaiveDate::from_ymd_opt(2026, 11, day).unwrap(),
            time: NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
            duration: SessionDuration::from_hours(hours).unwrap(),
            recurring: None,
        }
    }

    pub async fn book(&self, student: UserId, teacher: UserId, hours: Decimal) -> Session {
        self.engine
            .sessions()
            .create_session(
                &RequestContext::student(student),
                Self::booking(teacher, 2, 10, hours),
            )
            .await
            .unwrap()
            .session
    }

    pub async fn pay_session(&self, session: &Session, provider: Provider) -> PaymentIntent {
        self.engine
            .gateway()
            .initiate(
                &RequestContext::student(session.student_id),
                InitiateRequest {
                    purpose: PaymentPurpose::SessionPayment,
                    target_id: session.id,
                    provider,
                    amount: session.total_amount,
                    contact: contact(),
                },
            )
            .await
            .unwrap()
            .0
    }

    pub async fn deposit(&self, user: UserId, amount: Decimal, provider: Provider) -> PaymentIntent {
        let wallet = self.engine.ledger().open_wallet(user).await.unwrap();
        self.engine
            .gateway()
            .initiate(
                &RequestContext::student(user),
                InitiateRequest {
                    purpose: PaymentPurpose::WalletDeposit,
                    target_id: wallet.id,
                    provider,
                    amount: Amount::from_major(amount).unwrap(),
                    contact: contact(),
                },
            )
            .await
            .unwrap()
            .0
    }

    /// Delivers a signed callback for `intent` with `code`.
    pub async fn callback(
        &self,
        intent: &PaymentIntent,
        code: &str,
    ) -> tutorpay::error::Result<tutorpay::application::settlement::Settlement> {
        let callback = self
            .engine
            .gateway()
            .codec(intent.provider)
            .unwrap()
            .simulate_callback(intent, code, "REF-1")
            .unwrap();
        self.engine.settlement().reconcile(callback).await
    }

    /// Deposits and settles `amount` into `user`'s wallet.
    pub async fn fund(&self, user: UserId, amount: Decimal) {
        let intent = self.deposit(user, amount, Provider::JazzCash).await;
        self.callback(&intent, "000").await.unwrap();
    }
}

pub fn contact() -> CustomerContact {
    CustomerContact {
        email: "ayesha@example.com".to_string(),
        mobile: "03001234567".to_string(),
    }
}

/// Writes `lines` to a temporary script file.
pub fn script(lines: &[&str]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
    file
}
