//! Add-on subscription state machine.
//!
//! ACTIVE drops to LOW_BALANCE below the configured threshold and to
//! DEPLETED at zero; validity lapse routes through GRACE before the EXPIRED
//! hard cutoff. Threshold events fire once per downward crossing: the status
//! itself is the latch, and only a renewal or a refund reversal re-arms it.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::info;

use super::domain::{
    next_addon_id, AccountId, AddonId, AddonStatus, AddonSubscription, AddonUsage, NewAddon,
};
use super::events::{EventLog, ExchangeEvent};
use super::service::ExchangeConfig;
use super::store::ExchangeStore;
use super::ExchangeError;

/// Units at or below which an add-on counts as low-balance.
pub(crate) fn low_balance_threshold(total_units: i64, fraction: f64) -> i64 {
    (total_units as f64 * fraction).floor() as i64
}

/// Spendable means the allowance can fund a purchase right now: not lapsed,
/// not cancelled, and holding units.
pub(crate) fn is_spendable(addon: &AddonSubscription, now: DateTime<Utc>) -> bool {
    matches!(
        addon.status,
        AddonStatus::Active | AddonStatus::LowBalance
    ) && now < addon.valid_until
        && addon.remaining_units > 0
}

/// Decrement `units` and return the threshold event for the crossing, if this
/// decrement caused one. The caller has already validated spendability and
/// sufficient remaining units under the row lock.
pub(crate) fn apply_decrement(
    addon: &mut AddonSubscription,
    units: i64,
    config: &ExchangeConfig,
    now: DateTime<Utc>,
) -> Option<ExchangeEvent> {
    addon.remaining_units -= units;
    let threshold = low_balance_threshold(addon.total_units, config.low_balance_fraction);

    if addon.remaining_units == 0 && addon.status != AddonStatus::Depleted {
        addon.status = AddonStatus::Depleted;
        return Some(ExchangeEvent::AddonDepleted {
            addon_id: addon.id.clone(),
            account_id: addon.account_id.clone(),
            at: now,
        });
    }

    if addon.remaining_units > 0
        && addon.remaining_units <= threshold
        && addon.status == AddonStatus::Active
    {
        addon.status = AddonStatus::LowBalance;
        return Some(ExchangeEvent::AddonLowBalance {
            addon_id: addon.id.clone(),
            account_id: addon.account_id.clone(),
            remaining: addon.remaining_units,
            threshold,
            at: now,
        });
    }

    None
}

/// Recompute the balance-derived status after a refund put units back.
/// Lapsed and cancelled subscriptions keep their terminal state.
pub(crate) fn restore_after_reversal(
    addon: &mut AddonSubscription,
    config: &ExchangeConfig,
    now: DateTime<Utc>,
) {
    if addon.status.is_terminal() || addon.status == AddonStatus::Grace || now >= addon.valid_until
    {
        return;
    }
    let threshold = low_balance_threshold(addon.total_units, config.low_balance_fraction);
    addon.status = if addon.remaining_units > threshold {
        AddonStatus::Active
    } else if addon.remaining_units > 0 {
        AddonStatus::LowBalance
    } else {
        AddonStatus::Depleted
    };
}

/// Move a lapsed or depleted subscription along the GRACE/EXPIRED path,
/// returning the transition event when one fired.
pub(crate) fn refresh_lifecycle(
    addon: &mut AddonSubscription,
    now: DateTime<Utc>,
) -> Option<ExchangeEvent> {
    if addon.status.is_terminal() {
        return None;
    }

    if now >= addon.grace_until {
        addon.status = AddonStatus::Expired;
        return Some(ExchangeEvent::AddonExpired {
            addon_id: addon.id.clone(),
            account_id: addon.account_id.clone(),
            at: now,
        });
    }

    let lapsed = now >= addon.valid_until;
    let depleted = addon.status == AddonStatus::Depleted;
    if (lapsed || depleted) && addon.status != AddonStatus::Grace {
        addon.status = AddonStatus::Grace;
        return Some(ExchangeEvent::AddonGraceStarted {
            addon_id: addon.id.clone(),
            account_id: addon.account_id.clone(),
            grace_until: addon.grace_until,
            at: now,
        });
    }

    None
}

/// Owns add-on subscription lifecycle operations outside the purchase path.
pub(crate) struct AddonTracker {
    store: Arc<ExchangeStore>,
    events: Arc<EventLog>,
    config: ExchangeConfig,
}

impl AddonTracker {
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

    /// Record a bulk allowance the billing gateway already collected payment
    /// for.
    pub(crate) fn grant(
        &self,
        account_id: &AccountId,
        request: NewAddon,
    ) -> Result<AddonSubscription, ExchangeError> {
        if request.units <= 0 {
            return Err(ExchangeError::InvalidRequest(
                "add-on units must be positive".to_string(),
            ));
        }
        if request.valid_days <= 0 {
            return Err(ExchangeError::InvalidRequest(
                "add-on validity must be positive".to_string(),
            ));
        }
        // Existence check only; the new row is independent of the account row.
        self.store.account(account_id)?;

        let now = Utc::now();
        let valid_until = now + ChronoDuration::days(request.valid_days);
        let addon = AddonSubscription {
            id: next_addon_id(),
            account_id: account_id.clone(),
            display_name: request.display_name,
            total_units: request.units,
            remaining_units: request.units,
            status: AddonStatus::Active,
            valid_days: request.valid_days,
            valid_until,
            grace_until: valid_until + ChronoDuration::days(self.config.grace_days),
            purchased_at: now,
        };
        self.store.insert_addon(addon.clone());
        self.events.append(ExchangeEvent::AddonPurchased {
            addon_id: addon.id.clone(),
            account_id: account_id.clone(),
            units: addon.total_units,
            at: now,
        });
        info!(addon = %addon.id, account = %account_id, units = addon.total_units, "add-on recorded");
        Ok(addon)
    }

    /// Renewal resets remaining units to the full allowance and returns the
    /// subscription to ACTIVE.
    pub(crate) fn renew(&self, addon_id: &AddonId) -> Result<AddonSubscription, ExchangeError> {
        let handle = self.store.addon_row(addon_id)?;
        let mut addon = handle.lock_within(self.config.lock_timeout())?;
        if addon.status == AddonStatus::Cancelled {
            return Err(ExchangeError::InvalidRequest(
                "cancelled add-on cannot be renewed".to_string(),
            ));
        }

        let now = Utc::now();
        addon.remaining_units = addon.total_units;
        addon.status = AddonStatus::Active;
        addon.valid_until = now + ChronoDuration::days(addon.valid_days);
        addon.grace_until = addon.valid_until + ChronoDuration::days(self.config.grace_days);

        self.events.append(ExchangeEvent::AddonRenewed {
            addon_id: addon.id.clone(),
            account_id: addon.account_id.clone(),
            units: addon.total_units,
            at: now,
        });
        Ok(addon.clone())
    }

    pub(crate) fn cancel(&self, addon_id: &AddonId) -> Result<AddonSubscription, ExchangeError> {
        let handle = self.store.addon_row(addon_id)?;
        let mut addon = handle.lock_within(self.config.lock_timeout())?;
        if addon.status.is_terminal() {
            return Err(ExchangeError::InvalidRequest(
                "add-on is already terminal".to_string(),
            ));
        }

        let now = Utc::now();
        addon.status = AddonStatus::Cancelled;
        self.events.append(ExchangeEvent::AddonCancelled {
            addon_id: addon.id.clone(),
            account_id: addon.account_id.clone(),
            at: now,
        });
        Ok(addon.clone())
    }

    /// Current subscriptions for the account with lifecycle transitions
    /// applied (lapsed allowances move through GRACE toward EXPIRED here).
    pub(crate) fn account_status(
        &self,
        account_id: &AccountId,
    ) -> Result<Vec<AddonSubscription>, ExchangeError> {
        self.store.account(account_id)?;
        let now = Utc::now();
        let mut snapshots = Vec::new();
        for handle in self.store.addon_rows_for(account_id) {
            let mut addon = handle.lock_within(self.config.lock_timeout())?;
            if let Some(event) = refresh_lifecycle(&mut addon, now) {
                self.events.append(event);
            }
            snapshots.push(addon.clone());
        }
        Ok(snapshots)
    }

    pub(crate) fn usages(&self, addon_id: &AddonId) -> Result<Vec<AddonUsage>, ExchangeError> {
        self.store.addon(addon_id)?;
        Ok(self.store.usages_for(addon_id))
    }
}
