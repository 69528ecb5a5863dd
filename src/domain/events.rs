use super::context::UserId;
use super::ledger::WalletId;
use super::money::Amount;
use super::payment::{IntentId, PaymentPurpose};
use super::session::SessionId;
use super::withdrawal::{WithdrawalId, WithdrawalStatus};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// Notifications emitted after a state change has been committed.
///
/// Consumers (notification delivery, analytics) are outside the engine and
/// receive events on a best-effort basis.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    SessionBooked {
        session_id: SessionId,
        student_id: UserId,
        teacher_id: UserId,
        scheduled_date: NaiveDate,
        scheduled_time: NaiveTime,
    },
    SessionReminder {
        session_id: SessionId,
        student_id: UserId,
        teacher_id: UserId,
        scheduled_date: NaiveDate,
        scheduled_time: NaiveTime,
    },
    TeacherAccepted {
        session_id: SessionId,
        student_id: UserId,
        teacher_id: UserId,
    },
    SessionCancelled {
        session_id: SessionId,
        cancelled_by: UserId,
        refunded: bool,
    },
    PaymentSettled {
        /// Absent when the session was paid from the student's wallet.
        intent_id: Option<IntentId>,
        purpose: PaymentPurpose,
        wallet_id: WalletId,
        amount: Amount,
    },
    PaymentFailed {
        intent_id: IntentId,
        purpose: PaymentPurpose,
        response_code: String,
    },
    WithdrawalResolved {
        withdrawal_id: WithdrawalId,
        wallet_id: WalletId,
        status: WithdrawalStatus,
    },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::SessionBooked { .. } => "session_booked",
            DomainEvent::SessionReminder { .. } => "session_reminder",
            DomainEvent::TeacherAccepted { .. } => "teacher_accepted",
            DomainEvent::SessionCancelled { .. } => "session_cancelled",
            DomainEvent::PaymentSettled { .. } => "payment_settled",
            DomainEvent::PaymentFailed { .. } => "payment_failed",
            DomainEvent::WithdrawalResolved { .. } => "withdrawal_resolved",
        }
    }
}
