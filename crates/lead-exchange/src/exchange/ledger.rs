//! Credit ledger: the append-only transaction log plus the derived balance
//! per account. Every balance mutation in the system flows through here or
//! through the purchase/refund critical sections, which write the same rows.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use super::domain::{
    next_transaction_id, AccountId, CreditTransaction, TransactionReason,
};
use super::events::{EventLog, ExchangeEvent};
use super::service::ExchangeConfig;
use super::store::ExchangeStore;
use super::ExchangeError;

pub(crate) struct CreditLedger {
    store: Arc<ExchangeStore>,
    events: Arc<EventLog>,
    config: ExchangeConfig,
}

impl CreditLedger {
    pub(crate) fn new(
        store: Arc<ExchangeStore>,
        events: Arc<EventLog>,
        config: ExchangeConfig,
    ) -> Self {
        Self {
            store,
            events,
            config,
        }
    }

    /// Record a credit grant coming in from the billing gateway. Payment has
    /// already been processed; the ledger only records the value.
    pub(crate) fn grant(
        &self,
        account_id: &AccountId,
        amount: i64,
        note: Option<String>,
    ) -> Result<CreditTransaction, ExchangeError> {
        if amount <= 0 {
            return Err(ExchangeError::InvalidRequest(
                "grant amount must be positive".to_string(),
            ));
        }

        let handle = self.store.account_row(account_id)?;
        let mut account = handle.lock_within(self.config.lock_timeout())?;
        let balance_after = account.credits_balance + amount;
        let transaction = CreditTransaction {
            id: next_transaction_id(),
            account_id: account.id.clone(),
            delta: amount,
            reason: TransactionReason::Grant,
            balance_after,
            lead_id: None,
            purchase_id: None,
            note,
            recorded_at: Utc::now(),
        };
        self.store.append_transaction(transaction.clone());
        account.credits_balance = balance_after;

        self.events.append(ExchangeEvent::CreditsGranted {
            account_id: account.id.clone(),
            amount,
            balance_after,
            at: transaction.recorded_at,
        });
        info!(account = %account.id, amount, balance = balance_after, "credits granted");
        Ok(transaction)
    }

    /// Write off unspent credits, e.g. at the end of a promotional window.
    /// Never drives the balance negative.
    pub(crate) fn expire(
        &self,
        account_id: &AccountId,
        amount: i64,
        note: Option<String>,
    ) -> Result<CreditTransaction, ExchangeError> {
        if amount <= 0 {
            return Err(ExchangeError::InvalidRequest(
                "expiry amount must be positive".to_string(),
            ));
        }

        let handle = self.store.account_row(account_id)?;
        let mut account = handle.lock_within(self.config.lock_timeout())?;
        if account.credits_balance < amount {
            return Err(ExchangeError::InsufficientFunds {
                balance: account.credits_balance,
                price: amount,
            });
        }

        let balance_after = account.credits_balance - amount;
        let transaction = CreditTransaction {
            id: next_transaction_id(),
            account_id: account.id.clone(),
            delta: -amount,
            reason: TransactionReason::Expiry,
            balance_after,
            lead_id: None,
            purchase_id: None,
            note,
            recorded_at: Utc::now(),
        };
        self.store.append_transaction(transaction.clone());
        account.credits_balance = balance_after;

        self.events.append(ExchangeEvent::CreditsExpired {
            account_id: account.id.clone(),
            amount,
            balance_after,
            at: transaction.recorded_at,
        });
        Ok(transaction)
    }

    /// Operator-side correction. Positive or negative, but the balance
    /// invariant still holds.
    pub(crate) fn adjust(
        &self,
        account_id: &AccountId,
        delta: i64,
        note: Option<String>,
    ) -> Result<CreditTransaction, ExchangeError> {
        if delta == 0 {
            return Err(ExchangeError::InvalidRequest(
                "adjustment delta must be non-zero".to_string(),
            ));
        }

        let handle = self.store.account_row(account_id)?;
        let mut account = handle.lock_within(self.config.lock_timeout())?;
        let balance_after = account.credits_balance + delta;
        if balance_after < 0 {
            return Err(ExchangeError::InsufficientFunds {
                balance: account.credits_balance,
                price: -delta,
            });
        }

        let transaction = CreditTransaction {
            id: next_transaction_id(),
            account_id: account.id.clone(),
            delta,
            reason: TransactionReason::Adjustment,
            balance_after,
            lead_id: None,
            purchase_id: None,
            note,
            recorded_at: Utc::now(),
        };
        self.store.append_transaction(transaction.clone());
        account.credits_balance = balance_after;
        Ok(transaction)
    }

    pub(crate) fn balance(&self, account_id: &AccountId) -> Result<i64, ExchangeError> {
        Ok(self.store.account(account_id)?.credits_balance)
    }

    /// Ledger history, newest first, optionally filtered by reason.
    pub(crate) fn history(
        &self,
        account_id: &AccountId,
        limit: usize,
        reason: Option<TransactionReason>,
    ) -> Result<Vec<CreditTransaction>, ExchangeError> {
        self.store.account(account_id)?;
        let mut rows = self.store.transactions_for(account_id);
        if let Some(reason) = reason {
            rows.retain(|row| row.reason == reason);
        }
        rows.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        rows.truncate(limit);
        Ok(rows)
    }

    /// Recompute the running sum and compare it to the stored balance.
    /// A mismatch is an integrity violation escalated to the caller, never
    /// silently repaired.
    pub(crate) fn verify(&self, account_id: &AccountId) -> Result<(), ExchangeError> {
        let account = self.store.account(account_id)?;
        let sum: i64 = self
            .store
            .transactions_for(account_id)
            .iter()
            .map(|row| row.delta)
            .sum();
        if sum != account.credits_balance {
            return Err(ExchangeError::IntegrityViolation(format!(
                "account {} balance {} does not match transaction sum {}",
                account_id, account.credits_balance, sum
            )));
        }
        if account.credits_balance < 0 {
            return Err(ExchangeError::IntegrityViolation(format!(
                "account {} balance {} is negative",
                account_id, account.credits_balance
            )));
        }
        Ok(())
    }
}
