//! Refund processing: reverses a completed purchase against the funding
//! source that paid for it, with a policy table deciding the lead's fate.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::addons;
use super::domain::{
    next_transaction_id, AddonUsage, CreditTransaction, FundingSource, LeadPurchase, LeadStatus,
    PurchaseId, PurchaseOutcome, TransactionReason,
};
use super::events::{EventLog, ExchangeEvent};
use super::service::ExchangeConfig;
use super::store::ExchangeStore;
use super::ExchangeError;

/// Why the provider wants the purchase reversed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RefundReason {
    BadContactInfo,
    ClientUnresponsive,
    Duplicate,
    ProviderError,
    Other,
}

impl RefundReason {
    pub const fn label(self) -> &'static str {
        match self {
            RefundReason::BadContactInfo => "bad_contact_info",
            RefundReason::ClientUnresponsive => "client_unresponsive",
            RefundReason::Duplicate => "duplicate",
            RefundReason::ProviderError => "provider_error",
            RefundReason::Other => "other",
        }
    }
}

/// What happens to the lead after the refund.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadDisposition {
    /// Lead returns to the queue with a fresh TTL and can be sold again.
    Reopen,
    /// Lead stays in its terminal state.
    Terminal,
}

/// Explicit reason-to-disposition table. Lead-quality reasons reopen the
/// lead; provider-side reasons leave it sold.
#[derive(Debug, Clone)]
pub struct RefundPolicy {
    table: BTreeMap<RefundReason, LeadDisposition>,
}

impl RefundPolicy {
    pub fn disposition(&self, reason: RefundReason) -> LeadDisposition {
        self.table
            .get(&reason)
            .copied()
            .unwrap_or(LeadDisposition::Terminal)
    }

    pub fn with_disposition(mut self, reason: RefundReason, disposition: LeadDisposition) -> Self {
        self.table.insert(reason, disposition);
        self
    }
}

impl Default for RefundPolicy {
    fn default() -> Self {
        let mut table = BTreeMap::new();
        table.insert(RefundReason::BadContactInfo, LeadDisposition::Reopen);
        table.insert(RefundReason::ClientUnresponsive, LeadDisposition::Reopen);
        table.insert(RefundReason::Duplicate, LeadDisposition::Reopen);
        table.insert(RefundReason::ProviderError, LeadDisposition::Terminal);
        table.insert(RefundReason::Other, LeadDisposition::Terminal);
        Self { table }
    }
}

/// Reverses purchases. The reversal magnitude always equals the original
/// debit, restoring the funding source to its pre-purchase value exactly.
pub(crate) struct RefundProcessor {
    store: Arc<ExchangeStore>,
    events: Arc<EventLog>,
    policy: RefundPolicy,
    config: ExchangeConfig,
}

impl RefundProcessor {
    pub(crate) fn new(
        store: Arc<ExchangeStore>,
        events: Arc<EventLog>,
        policy: RefundPolicy,
        config: ExchangeConfig,
    ) -> Self {
        Self {
            store,
            events,
            policy,
            config,
        }
    }

    pub(crate) fn refund(
        &self,
        purchase_id: &PurchaseId,
        reason: RefundReason,
    ) -> Result<LeadPurchase, ExchangeError> {
        let timeout = self.config.lock_timeout();
        let now = Utc::now();

        // Snapshot first to learn the rows involved, then take the locks in
        // the canonical order: lead, account, purchase, add-on.
        let purchase_handle = self.store.purchase_row(purchase_id)?;
        let snapshot = purchase_handle.snapshot();

        let lead_handle = self.store.lead_row(&snapshot.lead_id)?;
        let account_handle = self.store.account_row(&snapshot.account_id)?;

        let mut lead = lead_handle.lock_within(timeout)?;
        let mut account = account_handle.lock_within(timeout)?;
        let mut purchase = purchase_handle.lock_within(timeout)?;

        if !purchase.outcome.refundable() {
            return Err(ExchangeError::InvalidRefundState {
                outcome: purchase.outcome.label(),
            });
        }

        match purchase.funding.clone() {
            FundingSource::Credit { .. } => {
                let balance_after = account.credits_balance + purchase.amount;
                self.store.append_transaction(CreditTransaction {
                    id: next_transaction_id(),
                    account_id: account.id.clone(),
                    delta: purchase.amount,
                    reason: TransactionReason::Refund,
                    balance_after,
                    lead_id: Some(purchase.lead_id.clone()),
                    purchase_id: Some(purchase.id.clone()),
                    note: Some(format!("refund: {}", reason.label())),
                    recorded_at: now,
                });
                account.credits_balance = balance_after;
            }
            FundingSource::Addon { addon_id } => {
                let addon_handle = self.store.addon_row(&addon_id)?;
                let mut addon = addon_handle.lock_within(timeout)?;
                addon.remaining_units += purchase.amount;
                addons::restore_after_reversal(&mut addon, &self.config, now);
                self.store.append_usage(AddonUsage {
                    addon_id: addon.id.clone(),
                    purchase_id: purchase.id.clone(),
                    units: -purchase.amount,
                    remaining_after: addon.remaining_units,
                    used_at: now,
                });
            }
        }

        purchase.outcome = PurchaseOutcome::Refunded;
        purchase.outcome_at = Some(now);

        let disposition = self.policy.disposition(reason);
        if disposition == LeadDisposition::Reopen && lead.status == LeadStatus::Sold {
            lead.status = LeadStatus::Queued;
            lead.expires_at = now + ChronoDuration::hours(self.config.lead_ttl_hours);
        }

        self.events.append(ExchangeEvent::PurchaseRefunded {
            purchase_id: purchase.id.clone(),
            account_id: account.id.clone(),
            amount: purchase.amount,
            reason,
            disposition,
            at: now,
        });

        info!(
            purchase = %purchase.id,
            account = %account.id,
            amount = purchase.amount,
            reason = reason.label(),
            "purchase refunded"
        );

        Ok(purchase.clone())
    }
}
