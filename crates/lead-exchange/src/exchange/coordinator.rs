//! The purchase coordinator: the single atomic transition that moves a lead
//! from QUEUED to SOLD while debiting exactly one funding source.
//!
//! Locks are taken in the canonical order (lead, then account, then add-on)
//! with bounded acquisition. Every validation happens before the first
//! mutation; once mutation starts nothing can fail, so a partially debited
//! or partially assigned state is never observable.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};

use super::addons;
use super::domain::{
    next_purchase_id, next_transaction_id, AccountId, AddonUsage, CreditTransaction,
    FundingSource, LeadId, LeadPurchase, LeadStatus, PurchaseOutcome, TransactionReason,
};
use super::events::{EventLog, ExchangeEvent};
use super::service::ExchangeConfig;
use super::store::ExchangeStore;
use super::ExchangeError;

pub(crate) struct PurchaseCoordinator {
    store: Arc<ExchangeStore>,
    events: Arc<EventLog>,
    config: ExchangeConfig,
}

impl PurchaseCoordinator {
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

    /// Claim the lead for the account, debiting an add-on allowance when one
    /// is spendable and covers the price, otherwise the credit balance.
    pub(crate) fn purchase(
        &self,
        account_id: &AccountId,
        lead_id: &LeadId,
    ) -> Result<LeadPurchase, ExchangeError> {
        let timeout = self.config.lock_timeout();
        let now = Utc::now();

        let lead_handle = self.store.lead_row(lead_id)?;
        let mut lead = lead_handle.lock_within(timeout)?;

        // TTL is enforced lazily under the lock; the sweep may not have run.
        if lead.status == LeadStatus::Queued && now >= lead.expires_at {
            lead.status = LeadStatus::Expired;
            self.events.append(ExchangeEvent::LeadExpired {
                lead_id: lead.id.clone(),
                at: now,
            });
        }
        if lead.status != LeadStatus::Queued {
            return Err(ExchangeError::LeadUnavailable);
        }
        if self.store.lead_has_live_purchase(&lead.id) {
            let violation = format!(
                "lead {} is queued but already holds a live purchase",
                lead.id
            );
            error!(lead = %lead.id, "{violation}");
            return Err(ExchangeError::IntegrityViolation(violation));
        }

        let account_handle = self.store.account_row(account_id)?;
        let mut account = account_handle.lock_within(timeout)?;
        let price = lead.price;

        // Funding selection: the first spendable allowance that covers the
        // price wins over the credit balance.
        let addon_handles = self.store.addon_rows_for(account_id);
        let mut addon_choice = None;
        for handle in &addon_handles {
            let addon = handle.lock_within(timeout)?;
            if addons::is_spendable(&addon, now) && addon.remaining_units >= price {
                addon_choice = Some(addon);
                break;
            }
        }

        let purchase_id = next_purchase_id();
        let funding = match addon_choice {
            Some(mut addon) => {
                let threshold_event =
                    addons::apply_decrement(&mut addon, price, &self.config, now);
                self.store.append_usage(AddonUsage {
                    addon_id: addon.id.clone(),
                    purchase_id: purchase_id.clone(),
                    units: price,
                    remaining_after: addon.remaining_units,
                    used_at: now,
                });
                if let Some(event) = threshold_event {
                    self.events.append(event);
                }
                FundingSource::Addon {
                    addon_id: addon.id.clone(),
                }
            }
            None => {
                if account.credits_balance < price {
                    return Err(ExchangeError::InsufficientFunds {
                        balance: account.credits_balance,
                        price,
                    });
                }
                let balance_after = account.credits_balance - price;
                if balance_after < 0 {
                    let violation = format!(
                        "debit of {} would drive account {} balance negative",
                        price, account.id
                    );
                    error!(account = %account.id, "{violation}");
                    return Err(ExchangeError::IntegrityViolation(violation));
                }
                let transaction_id = next_transaction_id();
                self.store.append_transaction(CreditTransaction {
                    id: transaction_id.clone(),
                    account_id: account.id.clone(),
                    delta: -price,
                    reason: TransactionReason::Purchase,
                    balance_after,
                    lead_id: Some(lead.id.clone()),
                    purchase_id: Some(purchase_id.clone()),
                    note: Some(format!("lead purchase: {}", lead.title)),
                    recorded_at: now,
                });
                account.credits_balance = balance_after;
                account.lifetime_credits_spent += price;
                FundingSource::Credit { transaction_id }
            }
        };

        lead.status = LeadStatus::Sold;
        let purchase = LeadPurchase {
            id: purchase_id,
            account_id: account.id.clone(),
            lead_id: lead.id.clone(),
            amount: price,
            funding: funding.clone(),
            outcome: PurchaseOutcome::Active,
            revenue: None,
            purchased_at: now,
            outcome_at: None,
        };
        self.store.insert_purchase(purchase.clone());

        self.events.append(ExchangeEvent::LeadPurchased {
            purchase_id: purchase.id.clone(),
            lead_id: lead.id.clone(),
            account_id: account.id.clone(),
            amount: price,
            funding,
            at: now,
        });

        info!(
            purchase = %purchase.id,
            lead = %lead.id,
            account = %account.id,
            amount = price,
            "lead sold"
        );

        Ok(purchase)
    }

    /// Record a provider-reported outcome. CONTACTED can only follow ACTIVE;
    /// CONVERTED can follow either and fixes the reported revenue.
    pub(crate) fn record_outcome(
        &self,
        purchase_id: &super::domain::PurchaseId,
        outcome: PurchaseOutcome,
        revenue: Option<i64>,
    ) -> Result<LeadPurchase, ExchangeError> {
        let handle = self.store.purchase_row(purchase_id)?;
        let mut purchase = handle.lock_within(self.config.lock_timeout())?;

        let allowed = matches!(
            (purchase.outcome, outcome),
            (PurchaseOutcome::Active, PurchaseOutcome::Contacted)
                | (PurchaseOutcome::Active, PurchaseOutcome::Converted)
                | (PurchaseOutcome::Contacted, PurchaseOutcome::Converted)
        );
        if !allowed {
            return Err(ExchangeError::InvalidOutcomeTransition {
                from: purchase.outcome.label(),
                to: outcome.label(),
            });
        }

        let now = Utc::now();
        purchase.outcome = outcome;
        purchase.outcome_at = Some(now);
        if outcome == PurchaseOutcome::Converted {
            purchase.revenue = revenue;
        }

        self.events.append(ExchangeEvent::OutcomeRecorded {
            purchase_id: purchase.id.clone(),
            account_id: purchase.account_id.clone(),
            outcome,
            revenue: purchase.revenue,
            at: now,
        });

        Ok(purchase.clone())
    }
}
