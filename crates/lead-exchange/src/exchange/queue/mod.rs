//! The lead queue: the per-account ordered view of claimable leads and the
//! claim entry point. Listings are recomputed from current store state on
//! every read; nothing here caches or mutates lead rows except the expiry
//! sweep.

mod ordering;

pub use ordering::{QueueOrdering, TierThenAge};

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::debug;

use super::coordinator::PurchaseCoordinator;
use super::domain::{
    Account, AccountId, CompanyId, Lead, LeadId, LeadPurchase, LeadQueueEntry, PurchaseOutcome,
};
use super::events::{EventLog, ExchangeEvent};
use super::service::ExchangeConfig;
use super::store::ExchangeStore;
use super::ExchangeError;

/// Category/city/tier matching, supplied by the identity service in
/// production and injectable in tests.
pub trait EligibilityPolicy: Send + Sync {
    fn eligible(&self, account: &Account, lead: &Lead) -> bool;
}

/// Default matching rule: the account serves the lead's category in the
/// lead's city, and high-pressure leads are reserved for paying tiers.
pub struct StandardEligibility;

impl EligibilityPolicy for StandardEligibility {
    fn eligible(&self, account: &Account, lead: &Lead) -> bool {
        let category_match = account
            .categories
            .iter()
            .any(|category| category.eq_ignore_ascii_case(&lead.category));
        let city_match = account.city.eq_ignore_ascii_case(&lead.city);
        let tier_allows = match lead.urgency {
            super::domain::Urgency::High | super::domain::Urgency::Urgent => {
                account.tier.is_paying()
            }
            _ => true,
        };
        category_match && city_match && tier_allows
    }
}

/// Per-account claim funnel counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub claimable: usize,
    pub purchased: u64,
    pub converted: u64,
    /// Eligible leads that went to another provider.
    pub missed: u64,
}

pub(crate) struct LeadQueue {
    store: Arc<ExchangeStore>,
    events: Arc<EventLog>,
    coordinator: Arc<PurchaseCoordinator>,
    eligibility: Arc<dyn EligibilityPolicy>,
    ordering: Arc<dyn QueueOrdering>,
    config: ExchangeConfig,
}

impl LeadQueue {
    pub(crate) fn new(
        store: Arc<ExchangeStore>,
        events: Arc<EventLog>,
        coordinator: Arc<PurchaseCoordinator>,
        eligibility: Arc<dyn EligibilityPolicy>,
        ordering: Arc<dyn QueueOrdering>,
        config: ExchangeConfig,
    ) -> Self {
        Self {
            store,
            events,
            coordinator,
            eligibility,
            ordering,
            config,
        }
    }

    /// Ordered claimable leads for one account. Sold and expired leads drop
    /// out at read time without being touched.
    pub(crate) fn list_claimable(
        &self,
        account_id: &AccountId,
    ) -> Result<Vec<LeadQueueEntry>, ExchangeError> {
        let account = self.store.account(account_id)?;
        Ok(self.entries_for(&account))
    }

    /// The team view: claimable leads across every member account of a
    /// company, deduplicated so each lead appears once under its
    /// highest-priority member.
    pub(crate) fn list_claimable_for_company(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<LeadQueueEntry>, ExchangeError> {
        let members = self.store.accounts_in_company(company_id);
        if members.is_empty() {
            return Err(ExchangeError::CompanyNotFound(company_id.0.clone()));
        }

        let mut entries: Vec<LeadQueueEntry> = Vec::new();
        for member in &members {
            for entry in self.entries_for(member) {
                match entries.iter().position(|e| e.lead.id == entry.lead.id) {
                    Some(index) if entries[index].tier_priority < entry.tier_priority => {
                        entries[index] = entry;
                    }
                    Some(_) => {}
                    None => entries.push(entry),
                }
            }
        }
        entries.sort_by(|a, b| self.ordering.compare(a, b));
        Ok(entries)
    }

    /// The sole way out of the QUEUED state. Eligibility is checked here;
    /// the atomic funding-and-assignment work is the coordinator's.
    pub(crate) fn claim(
        &self,
        account_id: &AccountId,
        lead_id: &LeadId,
    ) -> Result<LeadPurchase, ExchangeError> {
        let account = self.store.account(account_id)?;
        let lead = self.store.lead(lead_id)?;
        if !self.eligibility.eligible(&account, &lead) {
            return Err(ExchangeError::InvalidRequest(format!(
                "account {} is not eligible for lead {}",
                account_id, lead_id
            )));
        }

        match self.coordinator.purchase(account_id, lead_id) {
            // One retry absorbs a lock-wait race; a second Busy goes to the
            // caller for backoff.
            Err(ExchangeError::Busy) => self.coordinator.purchase(account_id, lead_id),
            other => other,
        }
    }

    /// Mark QUEUED leads past their TTL as EXPIRED. A lead that was sold in
    /// the meantime is left alone: SOLD always wins over EXPIRED.
    pub(crate) fn expire_overdue(&self) -> Result<usize, ExchangeError> {
        let now = Utc::now();
        let mut expired = 0;
        for handle in self.store.lead_rows() {
            let mut lead = handle.lock_within(self.config.lock_timeout())?;
            if lead.status == super::domain::LeadStatus::Queued && now >= lead.expires_at {
                lead.status = super::domain::LeadStatus::Expired;
                self.events.append(ExchangeEvent::LeadExpired {
                    lead_id: lead.id.clone(),
                    at: now,
                });
                expired += 1;
            }
        }
        if expired > 0 {
            debug!(count = expired, "expired overdue leads");
        }
        Ok(expired)
    }

    pub(crate) fn stats(&self, account_id: &AccountId) -> Result<QueueStats, ExchangeError> {
        let account = self.store.account(account_id)?;
        let claimable = self.entries_for(&account).len();

        let purchases = self.store.purchases_for_account(account_id);
        let purchased = purchases.len() as u64;
        let converted = purchases
            .iter()
            .filter(|p| p.outcome == PurchaseOutcome::Converted)
            .count() as u64;

        let missed = self
            .store
            .leads_snapshot()
            .iter()
            .filter(|lead| {
                lead.status == super::domain::LeadStatus::Sold
                    && self.eligibility.eligible(&account, lead)
                    && self
                        .store
                        .purchases_for_lead(&lead.id)
                        .iter()
                        .any(|p| {
                            p.outcome != PurchaseOutcome::Refunded && p.account_id != *account_id
                        })
            })
            .count() as u64;

        Ok(QueueStats {
            claimable,
            purchased,
            converted,
            missed,
        })
    }

    fn entries_for(&self, account: &Account) -> Vec<LeadQueueEntry> {
        let now = Utc::now();
        let mut entries: Vec<LeadQueueEntry> = self
            .store
            .leads_snapshot()
            .into_iter()
            .filter(|lead| lead.claimable_at(now))
            .filter(|lead| self.eligibility.eligible(account, lead))
            .map(|lead| LeadQueueEntry {
                tier_priority: account.tier.priority(),
                account_id: account.id.clone(),
                lead,
            })
            .collect();
        entries.sort_by(|a, b| self.ordering.compare(a, b));
        entries
    }
}
