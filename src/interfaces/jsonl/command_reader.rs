use crate::domain::payment::{PaymentPurpose, Provider};
use crate::domain::session::{RecurringFrequency, SessionStatus};
use crate::domain::withdrawal::NewBankAccount;
use crate::error::{EngineError, Result};
use chrono::{NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::BufRead;

/// One line of a replay script. Users are named, not numbered; records created
/// by the script (sessions, payments, accounts, withdrawals) are referred to by
/// the label they were given.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    RegisterTeacher {
        teacher: String,
        rate: Decimal,
        subjects: Vec<String>,
    },
    SetRate {
        teacher: String,
        rate: Decimal,
    },
    Book {
        label: String,
        student: String,
        teacher: String,
        subject: String,
        #[serde(default)]
        topic: String,
        date: NaiveDate,
        time: NaiveTime,
        duration: Decimal,
        #[serde(default)]
        recurring: Option<RecurringFrequency>,
    },
    Transition {
        session: String,
        actor: String,
        status: SessionStatus,
    },
    MeetingLink {
        session: String,
        actor: String,
        link: String,
    },
    Initiate {
        label: String,
        payer: String,
        purpose: PaymentPurpose,
        /// Session label; required for session payments.
        #[serde(default)]
        session: Option<String>,
        provider: Provider,
        amount: Decimal,
        email: String,
        mobile: String,
    },
    Redirected {
        payment: String,
    },
    Callback {
        payment: String,
        code: String,
        #[serde(default)]
        reference: Option<String>,
    },
    PayFromWallet {
        session: String,
        student: String,
    },
    AddBankAccount {
        label: String,
        user: String,
        #[serde(flatten)]
        account: NewBankAccount,
    },
    VerifyBankAccount {
        account: String,
    },
    Withdraw {
        label: String,
        user: String,
        account: String,
        amount: Decimal,
    },
    Approve {
        withdrawal: String,
    },
    Reject {
        withdrawal: String,
    },
    MarkPaid {
        withdrawal: String,
    },
    /// Moves the replay clock forward.
    Advance {
        minutes: i64,
    },
    Sweep,
}

/// Reads commands from a JSON-lines source.
///
/// Blank lines and lines starting with `#` are skipped. A line that does not
/// parse yields an error carrying its line number and reading continues.
pub struct CommandReader<R: BufRead> {
    source: R,
}

impl<R: BufRead> CommandReader<R> {
    pub fn new(source: R) -> Self {
        Self { source }
    }

    /// Lazily parses the script, one line at a time.
    pub fn commands(self) -> impl Iterator<Item = Result<Command>> {
        self.source
            .lines()
            .enumerate()
            .filter_map(|(index, line)| {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => return Some(Err(EngineError::from(e))),
                };
                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    return None;
                }
                Some(serde_json::from_str(trimmed).map_err(|e| {
                    EngineError::validation(format!("line {}: {e}", index + 1))
                }))
            })
    }
}
