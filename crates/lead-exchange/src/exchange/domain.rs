use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for provider accounts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(pub String);

/// Identifier wrapper for parent companies (provider teams).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompanyId(pub String);

/// Identifier wrapper for leads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeadId(pub String);

/// Identifier wrapper for lead purchases.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PurchaseId(pub String);

/// Identifier wrapper for ledger transactions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub String);

/// Identifier wrapper for add-on subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddonId(pub String);

macro_rules! display_id {
    ($ty:ty) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

display_id!(AccountId);
display_id!(CompanyId);
display_id!(LeadId);
display_id!(PurchaseId);
display_id!(TransactionId);
display_id!(AddonId);

static ACCOUNT_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static LEAD_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static PURCHASE_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static TRANSACTION_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static ADDON_SEQUENCE: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_account_id() -> AccountId {
    let id = ACCOUNT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    AccountId(format!("acct-{id:06}"))
}

pub(crate) fn next_lead_id() -> LeadId {
    let id = LEAD_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    LeadId(format!("lead-{id:06}"))
}

pub(crate) fn next_purchase_id() -> PurchaseId {
    let id = PURCHASE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    PurchaseId(format!("pur-{id:06}"))
}

pub(crate) fn next_transaction_id() -> TransactionId {
    let id = TRANSACTION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    TransactionId(format!("txn-{id:06}"))
}

pub(crate) fn next_addon_id() -> AddonId {
    let id = ADDON_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    AddonId(format!("addon-{id:06}"))
}

/// Subscription tiers ordered by queue priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionTier {
    Trial,
    Basic,
    Premium,
    Pro,
}

impl SubscriptionTier {
    /// Higher value wins queue priority ties.
    pub const fn priority(self) -> u8 {
        match self {
            SubscriptionTier::Trial => 0,
            SubscriptionTier::Basic => 1,
            SubscriptionTier::Premium => 2,
            SubscriptionTier::Pro => 3,
        }
    }

    pub const fn is_paying(self) -> bool {
        !matches!(self, SubscriptionTier::Trial)
    }

    pub const fn label(self) -> &'static str {
        match self {
            SubscriptionTier::Trial => "trial",
            SubscriptionTier::Basic => "basic",
            SubscriptionTier::Premium => "premium",
            SubscriptionTier::Pro => "pro",
        }
    }
}

/// A provider account. The credit balance is denominated in the smallest
/// currency unit and is only ever mutated through ledger transactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub display_name: String,
    pub company_id: Option<CompanyId>,
    pub tier: SubscriptionTier,
    pub categories: Vec<String>,
    pub city: String,
    pub credits_balance: i64,
    pub lifetime_credits_spent: i64,
    pub registered_at: DateTime<Utc>,
}

/// Intake payload for registering a provider account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAccount {
    pub display_name: String,
    #[serde(default)]
    pub company_id: Option<CompanyId>,
    pub tier: SubscriptionTier,
    pub categories: Vec<String>,
    pub city: String,
}

/// Lead lifecycle. QUEUED transitions to SOLD exactly once; SOLD always wins
/// over EXPIRED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeadStatus {
    Queued,
    Sold,
    Expired,
    Withdrawn,
}

impl LeadStatus {
    pub const fn label(self) -> &'static str {
        match self {
            LeadStatus::Queued => "queued",
            LeadStatus::Sold => "sold",
            LeadStatus::Expired => "expired",
            LeadStatus::Withdrawn => "withdrawn",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Urgency {
    Low,
    Normal,
    High,
    Urgent,
}

/// Client-declared budget for the job, smallest currency unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetRange {
    pub min: i64,
    pub max: i64,
}

/// A client-submitted job eligible for exclusive sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub title: String,
    pub category: String,
    pub city: String,
    pub budget: BudgetRange,
    pub urgency: Urgency,
    /// Price in credits charged on purchase.
    pub price: i64,
    pub status: LeadStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lead {
    /// A lead is claimable while still queued and inside its TTL.
    pub fn claimable_at(&self, now: DateTime<Utc>) -> bool {
        self.status == LeadStatus::Queued && now < self.expires_at
    }
}

/// Intake payload for posting a lead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLead {
    pub title: String,
    pub category: String,
    pub city: String,
    pub budget: BudgetRange,
    pub urgency: Urgency,
    pub price: i64,
}

/// Read-time view binding a claimable lead to an eligible account.
/// Never persisted; recomputed on every listing.
#[derive(Debug, Clone, Serialize)]
pub struct LeadQueueEntry {
    pub lead: Lead,
    pub account_id: AccountId,
    pub tier_priority: u8,
}

/// Ledger row reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionReason {
    Purchase,
    Refund,
    Grant,
    Expiry,
    Adjustment,
}

impl TransactionReason {
    pub const fn label(self) -> &'static str {
        match self {
            TransactionReason::Purchase => "purchase",
            TransactionReason::Refund => "refund",
            TransactionReason::Grant => "grant",
            TransactionReason::Expiry => "expiry",
            TransactionReason::Adjustment => "adjustment",
        }
    }
}

/// Immutable ledger row. The running sum of deltas for an account equals its
/// current balance; `balance_after` snapshots that sum at write time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditTransaction {
    pub id: TransactionId,
    pub account_id: AccountId,
    pub delta: i64,
    pub reason: TransactionReason,
    pub balance_after: i64,
    pub lead_id: Option<LeadId>,
    pub purchase_id: Option<PurchaseId>,
    pub note: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// The funding source chosen for a purchase, recorded immutably so a refund
/// can reverse the correct side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum FundingSource {
    Credit { transaction_id: TransactionId },
    Addon { addon_id: AddonId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOutcome {
    Active,
    Contacted,
    Converted,
    Refunded,
}

impl PurchaseOutcome {
    pub const fn label(self) -> &'static str {
        match self {
            PurchaseOutcome::Active => "active",
            PurchaseOutcome::Contacted => "contacted",
            PurchaseOutcome::Converted => "converted",
            PurchaseOutcome::Refunded => "refunded",
        }
    }

    /// Refunds are only valid before the lead converted or was already
    /// refunded.
    pub const fn refundable(self) -> bool {
        matches!(self, PurchaseOutcome::Active | PurchaseOutcome::Contacted)
    }
}

/// Links an account, a lead, and the debit that paid for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadPurchase {
    pub id: PurchaseId,
    pub account_id: AccountId,
    pub lead_id: LeadId,
    pub amount: i64,
    pub funding: FundingSource,
    pub outcome: PurchaseOutcome,
    /// Revenue reported by the provider when marking the lead converted.
    pub revenue: Option<i64>,
    pub purchased_at: DateTime<Utc>,
    pub outcome_at: Option<DateTime<Utc>>,
}

/// Add-on subscription lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddonStatus {
    Active,
    LowBalance,
    Grace,
    Depleted,
    Expired,
    Cancelled,
}

impl AddonStatus {
    pub const fn label(self) -> &'static str {
        match self {
            AddonStatus::Active => "active",
            AddonStatus::LowBalance => "low_balance",
            AddonStatus::Grace => "grace",
            AddonStatus::Depleted => "depleted",
            AddonStatus::Expired => "expired",
            AddonStatus::Cancelled => "cancelled",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, AddonStatus::Expired | AddonStatus::Cancelled)
    }
}

/// A bulk pre-purchased allowance of lead credits with its own lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddonSubscription {
    pub id: AddonId,
    pub account_id: AccountId,
    pub display_name: String,
    pub total_units: i64,
    pub remaining_units: i64,
    pub status: AddonStatus,
    /// Validity span applied on purchase and on every renewal.
    pub valid_days: i64,
    pub valid_until: DateTime<Utc>,
    pub grace_until: DateTime<Utc>,
    pub purchased_at: DateTime<Utc>,
}

/// Intake payload for recording an add-on purchase (the billing gateway has
/// already collected payment).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAddon {
    pub display_name: String,
    pub units: i64,
    pub valid_days: i64,
}

/// One decrement against an add-on subscription, tied 1:1 to a purchase.
/// Reversals carry a negative unit count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddonUsage {
    pub addon_id: AddonId,
    pub purchase_id: PurchaseId,
    pub units: i64,
    pub remaining_after: i64,
    pub used_at: DateTime<Utc>,
}

/// Derived per-provider conversion aggregate. Read model only, never
/// authoritative for balances.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderRoi {
    pub account_id: AccountId,
    pub purchased: u64,
    pub contacted: u64,
    pub converted: u64,
    pub refunded: u64,
    pub credits_spent: i64,
    pub conversion_rate: f64,
    pub recorded_revenue: i64,
    pub estimated_revenue: i64,
    pub average_lead_value: f64,
}
