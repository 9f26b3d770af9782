//! Service facade composing the store, ledger, queue, coordinator, add-on
//! tracker, refund processor, and ROI aggregator behind one API. This is
//! what the HTTP router and the integration tests consume.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::info;

use super::addons::AddonTracker;
use super::coordinator::PurchaseCoordinator;
use super::domain::{
    next_account_id, next_lead_id, Account, AccountId, AddonId, AddonSubscription, AddonUsage,
    CompanyId, CreditTransaction, Lead, LeadId, LeadPurchase, LeadQueueEntry, LeadStatus,
    NewAccount, NewAddon, NewLead, ProviderRoi, PurchaseId, PurchaseOutcome, TransactionReason,
};
use super::events::{EventLog, EventPublisher, NoopPublisher};
use super::ledger::CreditLedger;
use super::queue::{
    EligibilityPolicy, LeadQueue, QueueOrdering, QueueStats, StandardEligibility, TierThenAge,
};
use super::refunds::{RefundPolicy, RefundProcessor, RefundReason};
use super::roi::{RoiAggregator, RoiPeriod};
use super::store::ExchangeStore;
use super::ExchangeError;

/// Tuning knobs for the exchange core. Loaded from the environment by the
/// service binary; defaults suit tests and local runs.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeConfig {
    /// Bound on row-lock acquisition before a writer fails with `Busy`.
    pub lock_timeout_ms: u64,
    /// Time-to-live applied to newly posted (and reopened) leads.
    pub lead_ttl_hours: i64,
    /// Fraction of an add-on's total units at or below which it counts as
    /// low-balance.
    pub low_balance_fraction: f64,
    /// Grace window after add-on validity lapses, before the hard cutoff.
    pub grace_days: i64,
    /// Fallback revenue per conversion when the provider reported none.
    pub expected_conversion_value: i64,
}

impl ExchangeConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 250,
            lead_ttl_hours: 72,
            low_balance_fraction: 0.2,
            grace_days: 7,
            expected_conversion_value: 0,
        }
    }
}

/// Builder for wiring non-default collaborators into the service.
pub struct ExchangeServiceBuilder {
    config: ExchangeConfig,
    eligibility: Arc<dyn EligibilityPolicy>,
    ordering: Arc<dyn QueueOrdering>,
    publisher: Arc<dyn EventPublisher>,
    refund_policy: RefundPolicy,
}

impl ExchangeServiceBuilder {
    pub fn new(config: ExchangeConfig) -> Self {
        Self {
            config,
            eligibility: Arc::new(StandardEligibility),
            ordering: Arc::new(TierThenAge),
            publisher: Arc::new(NoopPublisher),
            refund_policy: RefundPolicy::default(),
        }
    }

    pub fn eligibility(mut self, policy: Arc<dyn EligibilityPolicy>) -> Self {
        self.eligibility = policy;
        self
    }

    pub fn ordering(mut self, ordering: Arc<dyn QueueOrdering>) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn refund_policy(mut self, policy: RefundPolicy) -> Self {
        self.refund_policy = policy;
        self
    }

    pub fn build(self) -> LeadExchangeService {
        let store = Arc::new(ExchangeStore::new());
        let events = Arc::new(EventLog::new(self.publisher));
        let coordinator = Arc::new(PurchaseCoordinator::new(
            store.clone(),
            events.clone(),
            self.config.clone(),
        ));
        let queue = LeadQueue::new(
            store.clone(),
            events.clone(),
            coordinator.clone(),
            self.eligibility,
            self.ordering,
            self.config.clone(),
        );
        let ledger = CreditLedger::new(store.clone(), events.clone(), self.config.clone());
        let addons = AddonTracker::new(store.clone(), events.clone(), self.config.clone());
        let refunds = RefundProcessor::new(
            store.clone(),
            events.clone(),
            self.refund_policy,
            self.config.clone(),
        );
        let roi = RoiAggregator::new(store.clone(), self.config.clone());

        LeadExchangeService {
            store,
            events,
            coordinator,
            queue,
            ledger,
            addons,
            refunds,
            roi,
            config: self.config,
        }
    }
}

pub struct LeadExchangeService {
    store: Arc<ExchangeStore>,
    events: Arc<EventLog>,
    coordinator: Arc<PurchaseCoordinator>,
    queue: LeadQueue,
    ledger: CreditLedger,
    addons: AddonTracker,
    refunds: RefundProcessor,
    roi: RoiAggregator,
    config: ExchangeConfig,
}

impl LeadExchangeService {
    pub fn new(config: ExchangeConfig) -> Self {
        ExchangeServiceBuilder::new(config).build()
    }

    pub fn builder(config: ExchangeConfig) -> ExchangeServiceBuilder {
        ExchangeServiceBuilder::new(config)
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn store(&self) -> &ExchangeStore {
        &self.store
    }

    // --- intake ---

    pub fn register_account(&self, request: NewAccount) -> Result<Account, ExchangeError> {
        if request.categories.is_empty() {
            return Err(ExchangeError::InvalidRequest(
                "account must serve at least one category".to_string(),
            ));
        }
        let account = Account {
            id: next_account_id(),
            display_name: request.display_name,
            company_id: request.company_id,
            tier: request.tier,
            categories: request.categories,
            city: request.city,
            credits_balance: 0,
            lifetime_credits_spent: 0,
            registered_at: Utc::now(),
        };
        self.store.insert_account(account.clone());
        info!(account = %account.id, tier = account.tier.label(), "account registered");
        Ok(account)
    }

    pub fn post_lead(&self, request: NewLead) -> Result<Lead, ExchangeError> {
        if request.price <= 0 {
            return Err(ExchangeError::InvalidRequest(
                "lead price must be positive".to_string(),
            ));
        }
        if request.budget.min > request.budget.max {
            return Err(ExchangeError::InvalidRequest(
                "budget range is inverted".to_string(),
            ));
        }
        let now = Utc::now();
        let lead = Lead {
            id: next_lead_id(),
            title: request.title,
            category: request.category,
            city: request.city,
            budget: request.budget,
            urgency: request.urgency,
            price: request.price,
            status: LeadStatus::Queued,
            created_at: now,
            expires_at: now + ChronoDuration::hours(self.config.lead_ttl_hours),
        };
        self.store.insert_lead(lead.clone());
        info!(lead = %lead.id, price = lead.price, "lead queued");
        Ok(lead)
    }

    /// Client withdrew the job before it sold.
    pub fn withdraw_lead(&self, lead_id: &LeadId) -> Result<Lead, ExchangeError> {
        let handle = self.store.lead_row(lead_id)?;
        let mut lead = handle.lock_within(self.config.lock_timeout())?;
        if lead.status != LeadStatus::Queued {
            return Err(ExchangeError::LeadUnavailable);
        }
        lead.status = LeadStatus::Withdrawn;
        Ok(lead.clone())
    }

    // --- queue ---

    pub fn list_claimable(
        &self,
        account_id: &AccountId,
    ) -> Result<Vec<LeadQueueEntry>, ExchangeError> {
        self.queue.list_claimable(account_id)
    }

    pub fn list_claimable_for_company(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<LeadQueueEntry>, ExchangeError> {
        self.queue.list_claimable_for_company(company_id)
    }

    pub fn claim(
        &self,
        account_id: &AccountId,
        lead_id: &LeadId,
    ) -> Result<LeadPurchase, ExchangeError> {
        self.queue.claim(account_id, lead_id)
    }

    pub fn queue_stats(&self, account_id: &AccountId) -> Result<QueueStats, ExchangeError> {
        self.queue.stats(account_id)
    }

    pub fn expire_overdue_leads(&self) -> Result<usize, ExchangeError> {
        self.queue.expire_overdue()
    }

    // --- purchases ---

    pub fn refund(
        &self,
        purchase_id: &PurchaseId,
        reason: RefundReason,
    ) -> Result<LeadPurchase, ExchangeError> {
        self.refunds.refund(purchase_id, reason)
    }

    pub fn record_outcome(
        &self,
        purchase_id: &PurchaseId,
        outcome: PurchaseOutcome,
        revenue: Option<i64>,
    ) -> Result<LeadPurchase, ExchangeError> {
        self.coordinator.record_outcome(purchase_id, outcome, revenue)
    }

    pub fn purchase(&self, purchase_id: &PurchaseId) -> Result<LeadPurchase, ExchangeError> {
        self.store.purchase(purchase_id)
    }

    pub fn purchases_for_account(&self, account_id: &AccountId) -> Vec<LeadPurchase> {
        self.store.purchases_for_account(account_id)
    }

    // --- ledger ---

    pub fn grant_credits(
        &self,
        account_id: &AccountId,
        amount: i64,
        note: Option<String>,
    ) -> Result<CreditTransaction, ExchangeError> {
        self.ledger.grant(account_id, amount, note)
    }

    pub fn expire_credits(
        &self,
        account_id: &AccountId,
        amount: i64,
        note: Option<String>,
    ) -> Result<CreditTransaction, ExchangeError> {
        self.ledger.expire(account_id, amount, note)
    }

    pub fn adjust_credits(
        &self,
        account_id: &AccountId,
        delta: i64,
        note: Option<String>,
    ) -> Result<CreditTransaction, ExchangeError> {
        self.ledger.adjust(account_id, delta, note)
    }

    pub fn balance(&self, account_id: &AccountId) -> Result<i64, ExchangeError> {
        self.ledger.balance(account_id)
    }

    pub fn transactions(
        &self,
        account_id: &AccountId,
        limit: usize,
        reason: Option<TransactionReason>,
    ) -> Result<Vec<CreditTransaction>, ExchangeError> {
        self.ledger.history(account_id, limit, reason)
    }

    pub fn verify_account(&self, account_id: &AccountId) -> Result<(), ExchangeError> {
        self.ledger.verify(account_id)
    }

    pub fn account(&self, account_id: &AccountId) -> Result<Account, ExchangeError> {
        self.store.account(account_id)
    }

    // --- add-ons ---

    pub fn purchase_addon(
        &self,
        account_id: &AccountId,
        request: NewAddon,
    ) -> Result<AddonSubscription, ExchangeError> {
        self.addons.grant(account_id, request)
    }

    pub fn renew_addon(&self, addon_id: &AddonId) -> Result<AddonSubscription, ExchangeError> {
        self.addons.renew(addon_id)
    }

    pub fn cancel_addon(&self, addon_id: &AddonId) -> Result<AddonSubscription, ExchangeError> {
        self.addons.cancel(addon_id)
    }

    pub fn addon_status(
        &self,
        account_id: &AccountId,
    ) -> Result<Vec<AddonSubscription>, ExchangeError> {
        self.addons.account_status(account_id)
    }

    pub fn addon_usages(&self, addon_id: &AddonId) -> Result<Vec<AddonUsage>, ExchangeError> {
        self.addons.usages(addon_id)
    }

    // --- roi ---

    pub fn roi(
        &self,
        account_id: &AccountId,
        period: RoiPeriod,
    ) -> Result<ProviderRoi, ExchangeError> {
        self.roi.aggregate(account_id, period)
    }
}
