use super::csv::wallet_writer::WalletRow;
use super::jsonl::command_reader::Command;
use crate::application::engine::Engine;
use crate::application::gateway::InitiateRequest;
use crate::application::sessions::BookingRequest;
use crate::application::withdrawals::WithdrawRequest;
use crate::domain::context::{RequestContext, UserId};
use crate::domain::money::Amount;
use crate::domain::payment::{CustomerContact, PaymentIntent, PaymentPurpose};
use crate::domain::ports::TeacherDirectory;
use crate::domain::session::{SessionDuration, SessionId};
use crate::domain::teacher::TeacherProfile;
use crate::domain::withdrawal::{BankAccountId, WithdrawalId};
use crate::error::{EngineError, Result};
use crate::infrastructure::clock::ManualClock;
use crate::infrastructure::in_memory::InMemoryTeacherDirectory;
use std::collections::HashMap;
use uuid::Uuid;

/// Stable id for a user named in a script, the same on every run.
pub fn user_id(name: &str) -> UserId {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("tutorpay:user:{name}").as_bytes())
}

/// Replays script commands against an engine.
///
/// Teachers are whoever was registered with `register_teacher`; every other
/// named user acts as a student. Administrative commands run as `admin`.
pub struct ReplayDriver {
    engine: Engine,
    teachers: InMemoryTeacherDirectory,
    clock: ManualClock,
    names: HashMap<UserId, String>,
    sessions: HashMap<String, SessionId>,
    payments: HashMap<String, PaymentIntent>,
    accounts: HashMap<String, BankAccountId>,
    withdrawals: HashMap<String, WithdrawalId>,
}

impl ReplayDriver {
    /// `teachers` and `clock` must be the instances `engine` was built with.
    pub fn new(engine: Engine, teachers: InMemoryTeacherDirectory, clock: ManualClock) -> Self {
        Self {
            engine,
            teachers,
            clock,
            names: HashMap::new(),
            sessions: HashMap::new(),
            payments: HashMap::new(),
            accounts: HashMap::new(),
            withdrawals: HashMap::new(),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    fn user(&mut self, name: &str) -> UserId {
        let id = user_id(name);
        self.names.entry(id).or_insert_with(|| name.to_string());
        id
    }

    async fn actor(&mut self, name: &str) -> Result<RequestContext> {
        let id = self.user(name);
        Ok(if self.teachers.teacher(id).await?.is_some() {
            RequestContext::teacher(id)
        } else {
            RequestContext::student(id)
        })
    }

    fn admin(&mut self) -> RequestContext {
        RequestContext::admin(self.user("admin"))
    }

    fn label<T: Copy>(map: &HashMap<String, T>, kind: &str, label: &str) -> Result<T> {
        map.get(label)
            .copied()
            .ok_or_else(|| EngineError::not_found(kind, label))
    }

    fn payment(&self, label: &str) -> Result<&PaymentIntent> {
        self.payments
            .get(label)
            .ok_or_else(|| EngineError::not_found("payment", label))
    }

    pub async fn run(&mut self, command: Command) -> Result<()> {
        match command {
            Command::RegisterTeacher {
                teacher,
                rate,
                subjects,
            } => {
                let user_id = self.user(&teacher);
                self.teachers
                    .upsert(TeacherProfile {
                        user_id,
                        name: teacher,
                        hourly_rate: Amount::from_major(rate)?,
                        subjects,
                    })
                    .await;
            }
            Command::SetRate { teacher, rate } => {
                let user_id = self.user(&teacher);
                self.teachers
                    .set_hourly_rate(user_id, Amount::from_major(rate)?)
                    .await?;
            }
            Command::Book {
                label,
                student,
                teacher,
                subject,
                topic,
                date,
                time,
                duration,
                recurring,
            } => {
                let ctx = RequestContext::student(self.user(&student));
                let teacher_id = self.user(&teacher);
                let outcome = self
                    .engine
                    .sessions()
                    .create_session(
                        &ctx,
                        BookingRequest {
                            teacher_id,
                            subject,
                            topic,
                            date,
                            time,
                            duration: SessionDuration::from_hours(duration)?,
                            recurring,
                        },
                    )
                    .await?;
                for (n, sibling) in outcome.recurrences.iter().enumerate() {
                    self.sessions.insert(format!("{label}#{}", n + 1), sibling.id);
                }
                self.sessions.insert(label, outcome.session.id);
            }
            Command::Transition {
                session,
                actor,
                status,
            } => {
                let id = Self::label(&self.sessions, "session", &session)?;
                let ctx = self.actor(&actor).await?;
                self.engine.sessions().transition(&ctx, id, status).await?;
            }
            Command::MeetingLink {
                session,
                actor,
                link,
            } => {
                let id = Self::label(&self.sessions, "session", &session)?;
                let ctx = self.actor(&actor).await?;
                self.engine
                    .sessions()
                    .set_meeting_link(&ctx, id, &link)
                    .await?;
            }
            Command::Initiate {
                label,
                payer,
                purpose,
                session,
                provider,
                amount,
                email,
                mobile,
            } => {
                let ctx = self.actor(&payer).await?;
                let target_id = match purpose {
                    PaymentPurpose::SessionPayment => {
                        let session = session.ok_or_else(|| {
                            EngineError::validation("A session payment needs a session label")
                        })?;
                        Self::label(&self.sessions, "session", &session)?
                    }
                    PaymentPurpose::WalletDeposit => {
                        self.engine.ledger().open_wallet(ctx.user_id).await?.id
                    }
                };
                let (intent, instruction) = self
                    .engine
                    .gateway()
                    .initiate(
                        &ctx,
                        InitiateRequest {
                            purpose,
                            target_id,
                            provider,
                            amount: Amount::from_major(amount)?,
                            contact: CustomerContact { email, mobile },
                        },
                    )
                    .await?;
                tracing::debug!(
                    payment = %label,
                    payment_url = %instruction.payment_url(),
                    "payment instruction built"
                );
                self.payments.insert(label, intent);
            }
            Command::Redirected { payment } => {
                let intent = self.payment(&payment)?.clone();
                let ctx = RequestContext::student(intent.payer_id);
                let updated = self
                    .engine
                    .gateway()
                    .mark_redirected(&ctx, intent.id)
                    .await?;
                self.payments.insert(payment, updated);
            }
            Command::Callback {
                payment,
                code,
                reference,
            } => {
                let intent = self.payment(&payment)?.clone();
                let reference = reference.unwrap_or_else(|| format!("REF-{payment}"));
                let callback = self
                    .engine
                    .gateway()
                    .codec(intent.provider)?
                    .simulate_callback(&intent, &code, &reference)?;
                let settlement = self.engine.settlement().reconcile(callback).await?;
                self.payments.insert(payment, settlement.intent);
            }
            Command::PayFromWallet { session, student } => {
                let id = Self::label(&self.sessions, "session", &session)?;
                let ctx = RequestContext::student(self.user(&student));
                self.engine.settlement().pay_from_wallet(&ctx, id).await?;
            }
            Command::AddBankAccount {
                label,
                user,
                account,
            } => {
                let ctx = self.actor(&user).await?;
                let account = self
                    .engine
                    .withdrawals()
                    .add_bank_account(&ctx, account)
                    .await?;
                self.accounts.insert(label, account.id);
            }
            Command::VerifyBankAccount { account } => {
                let id = Self::label(&self.accounts, "bank account", &account)?;
                let ctx = self.admin();
                self.engine
                    .withdrawals()
                    .verify_bank_account(&ctx, id)
                    .await?;
            }
            Command::Withdraw {
                label,
                user,
                account,
                amount,
            } => {
                let bank_account_id = Self::label(&self.accounts, "bank account", &account)?;
                let ctx = self.actor(&user).await?;
                let request = self
                    .engine
                    .withdrawals()
                    .request_withdrawal(
                        &ctx,
                        WithdrawRequest {
                            bank_account_id,
                            amount: Amount::from_major(amount)?,
                        },
                    )
                    .await?;
                self.withdrawals.insert(label, request.id);
            }
            Command::Approve { withdrawal } => {
                let id = Self::label(&self.withdrawals, "withdrawal", &withdrawal)?;
                let ctx = self.admin();
                self.engine.withdrawals().approve(&ctx, id).await?;
            }
            Command::Reject { withdrawal } => {
                let id = Self::label(&self.withdrawals, "withdrawal", &withdrawal)?;
                let ctx = self.admin();
                self.engine.withdrawals().reject(&ctx, id).await?;
            }
            Command::MarkPaid { withdrawal } => {
                let id = Self::label(&self.withdrawals, "withdrawal", &withdrawal)?;
                let ctx = self.admin();
                self.engine.withdrawals().mark_paid(&ctx, id).await?;
            }
            Command::Advance { minutes } => {
                self.clock.advance(chrono::Duration::minutes(minutes));
            }
            Command::Sweep => {
                self.engine.settlement().expire_stale_intents().await?;
            }
        }
        Ok(())
    }

    /// One report row per wallet, sorted by user name. Wallets of users this
    /// run never named are listed by id.
    pub async fn report(&self) -> Result<Vec<WalletRow>> {
        let mut rows: Vec<WalletRow> = self
            .engine
            .ledger()
            .report()
            .await?
            .iter()
            .map(|summary| {
                let name = self
                    .names
                    .get(&summary.wallet.user_id)
                    .cloned()
                    .unwrap_or_else(|| summary.wallet.user_id.to_string());
                WalletRow::new(name, summary)
            })
            .collect();
        rows.sort_by(|a, b| a.user.cmp(&b.user));
        Ok(rows)
    }
}
