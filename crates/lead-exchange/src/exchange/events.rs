use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use super::domain::{
    AccountId, AddonId, FundingSource, LeadId, PurchaseId, PurchaseOutcome,
};
use super::refunds::{LeadDisposition, RefundReason};

/// Every ledger-affecting transition, as a closed tagged union with a fixed
/// payload shape per kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExchangeEvent {
    LeadPurchased {
        purchase_id: PurchaseId,
        lead_id: LeadId,
        account_id: AccountId,
        amount: i64,
        funding: FundingSource,
        at: DateTime<Utc>,
    },
    PurchaseRefunded {
        purchase_id: PurchaseId,
        account_id: AccountId,
        amount: i64,
        reason: RefundReason,
        disposition: LeadDisposition,
        at: DateTime<Utc>,
    },
    OutcomeRecorded {
        purchase_id: PurchaseId,
        account_id: AccountId,
        outcome: PurchaseOutcome,
        revenue: Option<i64>,
        at: DateTime<Utc>,
    },
    CreditsGranted {
        account_id: AccountId,
        amount: i64,
        balance_after: i64,
        at: DateTime<Utc>,
    },
    CreditsExpired {
        account_id: AccountId,
        amount: i64,
        balance_after: i64,
        at: DateTime<Utc>,
    },
    AddonPurchased {
        addon_id: AddonId,
        account_id: AccountId,
        units: i64,
        at: DateTime<Utc>,
    },
    AddonRenewed {
        addon_id: AddonId,
        account_id: AccountId,
        units: i64,
        at: DateTime<Utc>,
    },
    AddonLowBalance {
        addon_id: AddonId,
        account_id: AccountId,
        remaining: i64,
        threshold: i64,
        at: DateTime<Utc>,
    },
    AddonDepleted {
        addon_id: AddonId,
        account_id: AccountId,
        at: DateTime<Utc>,
    },
    AddonGraceStarted {
        addon_id: AddonId,
        account_id: AccountId,
        grace_until: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    AddonExpired {
        addon_id: AddonId,
        account_id: AccountId,
        at: DateTime<Utc>,
    },
    AddonCancelled {
        addon_id: AddonId,
        account_id: AccountId,
        at: DateTime<Utc>,
    },
    LeadExpired {
        lead_id: LeadId,
        at: DateTime<Utc>,
    },
}

impl ExchangeEvent {
    pub const fn kind(&self) -> &'static str {
        match self {
            ExchangeEvent::LeadPurchased { .. } => "lead_purchased",
            ExchangeEvent::PurchaseRefunded { .. } => "purchase_refunded",
            ExchangeEvent::OutcomeRecorded { .. } => "outcome_recorded",
            ExchangeEvent::CreditsGranted { .. } => "credits_granted",
            ExchangeEvent::CreditsExpired { .. } => "credits_expired",
            ExchangeEvent::AddonPurchased { .. } => "addon_purchased",
            ExchangeEvent::AddonRenewed { .. } => "addon_renewed",
            ExchangeEvent::AddonLowBalance { .. } => "addon_low_balance",
            ExchangeEvent::AddonDepleted { .. } => "addon_depleted",
            ExchangeEvent::AddonGraceStarted { .. } => "addon_grace_started",
            ExchangeEvent::AddonExpired { .. } => "addon_expired",
            ExchangeEvent::AddonCancelled { .. } => "addon_cancelled",
            ExchangeEvent::LeadExpired { .. } => "lead_expired",
        }
    }

    pub fn account_id(&self) -> Option<&AccountId> {
        match self {
            ExchangeEvent::LeadPurchased { account_id, .. }
            | ExchangeEvent::PurchaseRefunded { account_id, .. }
            | ExchangeEvent::OutcomeRecorded { account_id, .. }
            | ExchangeEvent::CreditsGranted { account_id, .. }
            | ExchangeEvent::CreditsExpired { account_id, .. }
            | ExchangeEvent::AddonPurchased { account_id, .. }
            | ExchangeEvent::AddonRenewed { account_id, .. }
            | ExchangeEvent::AddonLowBalance { account_id, .. }
            | ExchangeEvent::AddonDepleted { account_id, .. }
            | ExchangeEvent::AddonGraceStarted { account_id, .. }
            | ExchangeEvent::AddonExpired { account_id, .. }
            | ExchangeEvent::AddonCancelled { account_id, .. } => Some(account_id),
            ExchangeEvent::LeadExpired { .. } => None,
        }
    }
}

/// Outbound hook for the notification collaborator. Delivery failure never
/// fails the originating transaction.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: &ExchangeEvent) -> Result<(), PublishError>;
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("event transport unavailable: {0}")]
    Transport(String),
}

/// Publisher used when no notification collaborator is wired in.
#[derive(Default)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, _event: &ExchangeEvent) -> Result<(), PublishError> {
        Ok(())
    }
}

/// Append-only, in-order record of every ledger-affecting transition.
pub struct EventLog {
    entries: Mutex<Vec<ExchangeEvent>>,
    publisher: Arc<dyn EventPublisher>,
}

impl EventLog {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            publisher,
        }
    }

    pub(crate) fn append(&self, event: ExchangeEvent) {
        if let Err(err) = self.publisher.publish(&event) {
            warn!(kind = event.kind(), %err, "event publish failed");
        }
        self.entries.lock().expect("event log mutex poisoned").push(event);
    }

    pub fn all(&self) -> Vec<ExchangeEvent> {
        self.entries.lock().expect("event log mutex poisoned").clone()
    }

    pub fn for_account(&self, account_id: &AccountId) -> Vec<ExchangeEvent> {
        self.entries
            .lock()
            .expect("event log mutex poisoned")
            .iter()
            .filter(|event| event.account_id() == Some(account_id))
            .cloned()
            .collect()
    }

    pub fn of_kind(&self, kind: &str) -> Vec<ExchangeEvent> {
        self.entries
            .lock()
            .expect("event log mutex poisoned")
            .iter()
            .filter(|event| event.kind() == kind)
            .cloned()
            .collect()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(Arc::new(NoopPublisher))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingPublisher;

    impl EventPublisher for FailingPublisher {
        fn publish(&self, _event: &ExchangeEvent) -> Result<(), PublishError> {
            Err(PublishError::Transport("offline".to_string()))
        }
    }

    fn sample_event() -> ExchangeEvent {
        ExchangeEvent::LeadExpired {
            lead_id: LeadId("lead-test-1".to_string()),
            at: Utc::now(),
        }
    }

    #[test]
    fn append_retains_order_and_filters_by_kind() {
        let log = EventLog::default();
        log.append(sample_event());
        log.append(ExchangeEvent::CreditsGranted {
            account_id: AccountId("acct-test-1".to_string()),
            amount: 50,
            balance_after: 50,
            at: Utc::now(),
        });

        assert_eq!(log.all().len(), 2);
        assert_eq!(log.of_kind("lead_expired").len(), 1);
        assert_eq!(
            log.for_account(&AccountId("acct-test-1".to_string())).len(),
            1
        );
    }

    #[test]
    fn publisher_failure_does_not_drop_the_entry() {
        let log = EventLog::new(Arc::new(FailingPublisher));
        log.append(sample_event());
        assert_eq!(log.all().len(), 1);
    }
}
