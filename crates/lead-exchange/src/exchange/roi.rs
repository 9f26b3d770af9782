//! Read-only ROI aggregation over purchase and outcome history. Recomputed
//! on demand; never a source of truth for balances.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::domain::{AccountId, ProviderRoi, PurchaseOutcome};
use super::service::ExchangeConfig;
use super::store::ExchangeStore;
use super::ExchangeError;

/// Optional reporting window, bounds applied to the purchase timestamp.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoiPeriod {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl RoiPeriod {
    fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| at >= from) && self.to.map_or(true, |to| at < to)
    }
}

pub(crate) struct RoiAggregator {
    store: Arc<ExchangeStore>,
    config: ExchangeConfig,
}

impl RoiAggregator {
    pub(crate) fn new(store: Arc<ExchangeStore>, config: ExchangeConfig) -> Self {
        Self { store, config }
    }

    pub(crate) fn aggregate(
        &self,
        account_id: &AccountId,
        period: RoiPeriod,
    ) -> Result<ProviderRoi, ExchangeError> {
        self.store.account(account_id)?;

        let purchases: Vec<_> = self
            .store
            .purchases_for_account(account_id)
            .into_iter()
            .filter(|purchase| period.contains(purchase.purchased_at))
            .collect();

        let purchased = purchases.len() as u64;
        let mut contacted = 0_u64;
        let mut converted = 0_u64;
        let mut refunded = 0_u64;
        let mut credits_spent = 0_i64;
        let mut recorded_revenue = 0_i64;
        let mut estimated_revenue = 0_i64;

        for purchase in &purchases {
            match purchase.outcome {
                PurchaseOutcome::Active => {}
                PurchaseOutcome::Contacted => contacted += 1,
                PurchaseOutcome::Converted => {
                    converted += 1;
                    let revenue = purchase
                        .revenue
                        .unwrap_or(self.config.expected_conversion_value);
                    recorded_revenue += purchase.revenue.unwrap_or(0);
                    estimated_revenue += revenue;
                }
                PurchaseOutcome::Refunded => refunded += 1,
            }
            if purchase.outcome != PurchaseOutcome::Refunded {
                credits_spent += purchase.amount;
            }
        }

        let settled = purchased.saturating_sub(refunded);
        let conversion_rate = if settled > 0 {
            converted as f64 / settled as f64
        } else {
            0.0
        };
        let average_lead_value = if converted > 0 {
            estimated_revenue as f64 / converted as f64
        } else {
            0.0
        };

        Ok(ProviderRoi {
            account_id: account_id.clone(),
            purchased,
            contacted,
            converted,
            refunded,
            credits_spent,
            conversion_rate,
            recorded_revenue,
            estimated_revenue,
            average_lead_value,
        })
    }
}
