//! The exclusive lead exchange: credit ledger, lead queue, purchase
//! coordination, add-on allowances, refunds, and ROI aggregation.

pub mod addons;
pub mod coordinator;
pub mod domain;
pub mod events;
pub mod ledger;
pub mod queue;
pub mod refunds;
pub mod roi;
pub mod router;
pub mod service;
pub mod store;

use self::domain::{AccountId, AddonId, LeadId, PurchaseId};

/// Error taxonomy for every exchange operation. All variants except
/// `IntegrityViolation` are expected, recoverable outcomes returned
/// synchronously to the caller.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExchangeError {
    /// The lead was sold, expired, or withdrawn before the claim landed.
    /// Expected outcome for the losing side of a race.
    #[error("lead is no longer available")]
    LeadUnavailable,
    /// Neither an add-on allowance nor the credit balance covers the price.
    #[error("insufficient funds: balance {balance}, price {price}")]
    InsufficientFunds { balance: i64, price: i64 },
    /// Refund attempted on a purchase that is converted or already refunded.
    #[error("purchase in state '{outcome}' cannot be refunded")]
    InvalidRefundState { outcome: &'static str },
    /// Outcome update attempted against an incompatible current state.
    #[error("cannot move purchase outcome from '{from}' to '{to}'")]
    InvalidOutcomeTransition {
        from: &'static str,
        to: &'static str,
    },
    /// Row-lock acquisition timed out. Retryable with backoff.
    #[error("exchange busy, try again")]
    Busy,
    #[error("account {0} not found")]
    AccountNotFound(AccountId),
    #[error("company {0} has no member accounts")]
    CompanyNotFound(String),
    #[error("lead {0} not found")]
    LeadNotFound(LeadId),
    #[error("purchase {0} not found")]
    PurchaseNotFound(PurchaseId),
    #[error("add-on {0} not found")]
    AddonNotFound(AddonId),
    /// Rejected intake payload (non-positive amounts and the like).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// An invariant of the ledger or lead state machine was violated.
    /// The transaction is aborted and the incident escalated, never
    /// silently corrected.
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),
}

pub use self::events::{EventLog, EventPublisher, ExchangeEvent, NoopPublisher, PublishError};
pub use self::queue::{
    EligibilityPolicy, QueueOrdering, QueueStats, StandardEligibility, TierThenAge,
};
pub use self::refunds::{LeadDisposition, RefundPolicy, RefundReason};
pub use self::roi::RoiPeriod;
pub use self::router::exchange_router;
pub use self::service::{ExchangeConfig, ExchangeServiceBuilder, LeadExchangeService};
pub use self::store::ExchangeStore;
