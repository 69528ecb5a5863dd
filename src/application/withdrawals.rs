use super::ledger::WalletLedger;
use crate::config::WithdrawalPolicy;
use crate::domain::context::{RequestContext, Role};
use crate::domain::events::DomainEvent;
use crate::domain::ledger::{EntryStatus, EntryType, LedgerBatch, LedgerEntry};
use crate::domain::money::{Amount, Balance};
use crate::domain::ports::{
    BankAccountStoreRef, CasOutcome, ClockRef, EventPublisherRef, WithdrawalStoreRef,
};
use crate::domain::withdrawal::{
    BankAccount, BankAccountId, NewBankAccount, WithdrawalId, WithdrawalRequest, WithdrawalStatus,
};
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub bank_account_id: BankAccountId,
    pub amount: Amount,
}

/// Withdrawal Processor: bank accounts, holds and payout resolution.
pub struct WithdrawalProcessor {
    accounts: BankAccountStoreRef,
    withdrawals: WithdrawalStoreRef,
    ledger: WalletLedger,
    events: EventPublisherRef,
    clock: ClockRef,
    policy: WithdrawalPolicy,
}

impl WithdrawalProcessor {
    pub fn new(
        accounts: BankAccountStoreRef,
        withdrawals: WithdrawalStoreRef,
        ledger: WalletLedger,
        events: EventPublisherRef,
        clock: ClockRef,
        policy: WithdrawalPolicy,
    ) -> Self {
        Self {
            accounts,
            withdrawals,
            ledger,
            events,
            clock,
            policy,
        }
    }

    /// Registers a payout account for the caller. A user's first account is
    /// always primary.
    pub async fn add_bank_account(
        &self,
        ctx: &RequestContext,
        account: NewBankAccount,
    ) -> Result<BankAccount> {
        let mut account = account.into_account(ctx.user_id, self.clock.now())?;
        if self.accounts.for_user(ctx.user_id).await?.is_empty() {
            account.is_primary = true;
        }
        self.accounts.insert(account.clone()).await?;
        tracing::info!(
            bank_account_id = %account.id,
            account = %account.masked_number(),
            primary = account.is_primary,
            "bank account added"
        );
        Ok(account)
    }

    /// The caller's accounts, primary first.
    pub async fn bank_accounts(&self, ctx: &RequestContext) -> Result<Vec<BankAccount>> {
        self.accounts.for_user(ctx.user_id).await
    }

    pub async fn verify_bank_account(
        &self,
        ctx: &RequestContext,
        id: BankAccountId,
    ) -> Result<BankAccount> {
        ctx.require_role(Role::Admin)?;
        self.accounts
            .mark_verified(id)
            .await?
            .ok_or_else(|| EngineError::not_found("bank account", id))
    }

    /// Places a hold on the caller's wallet and records a pending request.
    ///
    /// The hold is checked against available funds inside the ledger's atomic
    /// unit, so concurrent requests cannot overdraw the same balance. If the
    /// request cannot be stored, the hold is released under the request's
    /// resolution key before the error is returned.
    pub async fn request_withdrawal(
        &self,
        ctx: &RequestContext,
        request: WithdrawRequest,
    ) -> Result<WithdrawalRequest> {
        let account = self
            .accounts
            .get(request.bank_account_id)
            .await?
            .ok_or_else(|| EngineError::not_found("bank account", request.bank_account_id))?;
        if account.user_id != ctx.user_id {
            return Err(EngineError::Forbidden(
                "bank account belongs to another user".to_string(),
            ));
        }
        if self.policy.require_verified_account && !account.is_verified {
            return Err(EngineError::validation(format!(
                "Bank account {} is not verified",
                account.masked_number()
            )));
        }
        if request.amount.minor() < self.policy.min_amount {
            return Err(EngineError::validation(format!(
                "Withdrawals start at {}",
                Balance::new(self.policy.min_amount)
            )));
        }

        let wallet = self.ledger.open_wallet(ctx.user_id).await?;
        let now = self.clock.now();
        let withdrawal = WithdrawalRequest {
            id: Uuid::new_v4(),
            wallet_id: wallet.id,
            bank_account_id: account.id,
            amount: request.amount,
            status: WithdrawalStatus::Pending,
            created_at: now,
            updated_at: now,
        };

        self.ledger
            .append(LedgerBatch::hold(
                withdrawal.id,
                LedgerEntry::new(
                    wallet.id,
                    EntryType::Hold,
                    -Balance::from(request.amount),
                    withdrawal.id,
                    EntryStatus::Pending,
                    now,
                ),
            ))
            .await?;
        if let Err(e) = self.withdrawals.insert(withdrawal.clone()).await {
            tracing::error!(
                withdrawal_id = %withdrawal.id,
                wallet_id = %wallet.id,
                error = %e,
                "withdrawal request not stored, releasing its hold"
            );
            self.ledger
                .append(LedgerBatch::withdrawal_resolution(
                    withdrawal.id,
                    vec![LedgerEntry::new(
                        wallet.id,
                        EntryType::HoldRelease,
                        Balance::from(request.amount),
                        withdrawal.id,
                        EntryStatus::Reversed,
                        self.clock.now(),
                    )],
                ))
                .await?;
            return Err(e);
        }

        tracing::info!(
            withdrawal_id = %withdrawal.id,
            wallet_id = %wallet.id,
            amount = %withdrawal.amount,
            "withdrawal requested"
        );
        Ok(withdrawal)
    }

    /// Debits the held funds. Admin only.
    pub async fn approve(&self, ctx: &RequestContext, id: WithdrawalId) -> Result<WithdrawalRequest> {
        ctx.require_role(Role::Admin)?;
        let request = self.load(id).await?;
        let now = self.clock.now();
        let amount = Balance::from(request.amount);
        let entries = vec![
            LedgerEntry::new(
                request.wallet_id,
                EntryType::Withdrawal,
                -amount,
                request.id,
                EntryStatus::Completed,
                now,
            ),
            LedgerEntry::new(
                request.wallet_id,
                EntryType::HoldRelease,
                amount,
                request.id,
                EntryStatus::Reversed,
                now,
            ),
        ];
        self.resolve(request, entries, WithdrawalStatus::Approved)
            .await
    }

    /// Releases the held funds back to the wallet. Admin only.
    pub async fn reject(&self, ctx: &RequestContext, id: WithdrawalId) -> Result<WithdrawalRequest> {
        ctx.require_role(Role::Admin)?;
        let request = self.load(id).await?;
        let entries = vec![LedgerEntry::new(
            request.wallet_id,
            EntryType::HoldRelease,
            Balance::from(request.amount),
            request.id,
            EntryStatus::Reversed,
            self.clock.now(),
        )];
        self.resolve(request, entries, WithdrawalStatus::Rejected)
            .await
    }

    /// Approval and rejection share one batch key. Whichever batch the ledger
    /// recorded decides the outcome, and the request status follows it.
    async fn resolve(
        &self,
        request: WithdrawalRequest,
        entries: Vec<LedgerEntry>,
        wanted: WithdrawalStatus,
    ) -> Result<WithdrawalRequest> {
        if request.status != WithdrawalStatus::Pending && request.status != wanted {
            return Err(EngineError::State(format!(
                "withdrawal {} is already {:?}",
                request.id, request.status
            )));
        }

        let appended = self
            .ledger
            .append(LedgerBatch::withdrawal_resolution(request.id, entries))
            .await?;
        let decided = if appended
            .entries
            .iter()
            .any(|e| e.r#type == EntryType::Withdrawal)
        {
            WithdrawalStatus::Approved
        } else {
            WithdrawalStatus::Rejected
        };

        let resolved = match self
            .withdrawals
            .transition(
                request.id,
                &[WithdrawalStatus::Pending],
                decided,
                self.clock.now(),
            )
            .await?
        {
            CasOutcome::Applied(resolved) => {
                tracing::info!(
                    withdrawal_id = %resolved.id,
                    status = ?resolved.status,
                    amount = %resolved.amount,
                    "withdrawal resolved"
                );
                self.events.publish(DomainEvent::WithdrawalResolved {
                    withdrawal_id: resolved.id,
                    wallet_id: resolved.wallet_id,
                    status: resolved.status,
                });
                resolved
            }
            CasOutcome::Rejected(current) => current,
        };

        if decided != wanted {
            return Err(EngineError::State(format!(
                "withdrawal {} was already {:?}",
                resolved.id, decided
            )));
        }
        Ok(resolved)
    }

    /// Records that the bank transfer went out. Admin only.
    pub async fn mark_paid(&self, ctx: &RequestContext, id: WithdrawalId) -> Result<WithdrawalRequest> {
        ctx.require_role(Role::Admin)?;
        match self
            .withdrawals
            .transition(
                id,
                &[WithdrawalStatus::Approved],
                WithdrawalStatus::Paid,
                self.clock.now(),
            )
            .await?
        {
            CasOutcome::Applied(paid) => {
                tracing::info!(withdrawal_id = %paid.id, "withdrawal paid out");
                self.events.publish(DomainEvent::WithdrawalResolved {
                    withdrawal_id: paid.id,
                    wallet_id: paid.wallet_id,
                    status: paid.status,
                });
                Ok(paid)
            }
            CasOutcome::Rejected(current) if current.status == WithdrawalStatus::Paid => Ok(current),
            CasOutcome::Rejected(current) => Err(EngineError::State(format!(
                "withdrawal {} is {:?}, not approved",
                current.id, current.status
            ))),
        }
    }

    /// The caller's withdrawal requests, oldest first.
    pub async fn withdrawals(&self, ctx: &RequestContext) -> Result<Vec<WithdrawalRequest>> {
        let wallet = self.ledger.open_wallet(ctx.user_id).await?;
        self.withdrawals.for_wallet(wallet.id).await
    }

    async fn load(&self, id: WithdrawalId) -> Result<WithdrawalRequest> {
        self.withdrawals
            .get(id)
            .await?
            .ok_or_else(|| EngineError::not_found("withdrawal", id))
    }
}
