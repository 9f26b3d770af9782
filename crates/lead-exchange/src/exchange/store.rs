//! Row-locked transactional store.
//!
//! Each account, lead, purchase, and add-on row sits behind its own lock so
//! writers on different rows never cross-block. Financial decisions are only
//! made against state read under a row lock; plain reads clone a row snapshot
//! and may observe slightly stale but never inconsistent values.
//!
//! Lock order is fixed across every writer: lead, then account, then
//! purchase, then add-on. Acquisition is bounded; a writer that cannot get a
//! row within the timeout fails with `Busy` instead of blocking.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, TryLockError};
use std::time::{Duration, Instant};

use super::domain::{
    Account, AccountId, AddonId, AddonSubscription, AddonUsage, CompanyId, CreditTransaction,
    Lead, LeadId, LeadPurchase, PurchaseId, PurchaseOutcome,
};
use super::ExchangeError;

/// One lockable row. `lock_within` gives writers bounded acquisition;
/// `snapshot` gives readers a cheap consistent copy.
pub(crate) struct RowLock<T> {
    cell: Mutex<T>,
}

impl<T> RowLock<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            cell: Mutex::new(value),
        }
    }

    pub(crate) fn lock_within(
        &self,
        timeout: Duration,
    ) -> Result<MutexGuard<'_, T>, ExchangeError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.cell.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(_)) => {
                    return Err(ExchangeError::IntegrityViolation(
                        "poisoned row lock".to_string(),
                    ))
                }
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        return Err(ExchangeError::Busy);
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        }
    }
}

impl<T: Clone> RowLock<T> {
    pub(crate) fn snapshot(&self) -> T {
        self.cell.lock().expect("row lock poisoned").clone()
    }
}

/// The authoritative store for every entity of the exchange. Append-only
/// tables (transactions, usages) live behind plain mutexes; row tables map
/// ids to individually locked rows.
pub struct ExchangeStore {
    accounts: RwLock<HashMap<AccountId, Arc<RowLock<Account>>>>,
    leads: RwLock<HashMap<LeadId, Arc<RowLock<Lead>>>>,
    purchases: RwLock<HashMap<PurchaseId, Arc<RowLock<LeadPurchase>>>>,
    addons: RwLock<HashMap<AddonId, Arc<RowLock<AddonSubscription>>>>,
    addons_by_account: RwLock<HashMap<AccountId, Vec<AddonId>>>,
    transactions: Mutex<Vec<CreditTransaction>>,
    usages: Mutex<Vec<AddonUsage>>,
}

impl ExchangeStore {
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            leads: RwLock::new(HashMap::new()),
            purchases: RwLock::new(HashMap::new()),
            addons: RwLock::new(HashMap::new()),
            addons_by_account: RwLock::new(HashMap::new()),
            transactions: Mutex::new(Vec::new()),
            usages: Mutex::new(Vec::new()),
        }
    }

    // --- inserts ---

    pub(crate) fn insert_account(&self, account: Account) {
        self.accounts
            .write()
            .expect("accounts table poisoned")
            .insert(account.id.clone(), Arc::new(RowLock::new(account)));
    }

    pub(crate) fn insert_lead(&self, lead: Lead) {
        self.leads
            .write()
            .expect("leads table poisoned")
            .insert(lead.id.clone(), Arc::new(RowLock::new(lead)));
    }

    pub(crate) fn insert_purchase(&self, purchase: LeadPurchase) {
        self.purchases
            .write()
            .expect("purchases table poisoned")
            .insert(purchase.id.clone(), Arc::new(RowLock::new(purchase)));
    }

    pub(crate) fn insert_addon(&self, addon: AddonSubscription) {
        self.addons_by_account
            .write()
            .expect("addon index poisoned")
            .entry(addon.account_id.clone())
            .or_default()
            .push(addon.id.clone());
        self.addons
            .write()
            .expect("addons table poisoned")
            .insert(addon.id.clone(), Arc::new(RowLock::new(addon)));
    }

    pub(crate) fn append_transaction(&self, transaction: CreditTransaction) {
        self.transactions
            .lock()
            .expect("transaction log poisoned")
            .push(transaction);
    }

    pub(crate) fn append_usage(&self, usage: AddonUsage) {
        self.usages.lock().expect("usage log poisoned").push(usage);
    }

    // --- row handles (caller locks) ---

    pub(crate) fn account_row(
        &self,
        id: &AccountId,
    ) -> Result<Arc<RowLock<Account>>, ExchangeError> {
        self.accounts
            .read()
            .expect("accounts table poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| ExchangeError::AccountNotFound(id.clone()))
    }

    pub(crate) fn lead_row(&self, id: &LeadId) -> Result<Arc<RowLock<Lead>>, ExchangeError> {
        self.leads
            .read()
            .expect("leads table poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| ExchangeError::LeadNotFound(id.clone()))
    }

    pub(crate) fn purchase_row(
        &self,
        id: &PurchaseId,
    ) -> Result<Arc<RowLock<LeadPurchase>>, ExchangeError> {
        self.purchases
            .read()
            .expect("purchases table poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| ExchangeError::PurchaseNotFound(id.clone()))
    }

    pub(crate) fn addon_row(
        &self,
        id: &AddonId,
    ) -> Result<Arc<RowLock<AddonSubscription>>, ExchangeError> {
        self.addons
            .read()
            .expect("addons table poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| ExchangeError::AddonNotFound(id.clone()))
    }

    /// Row handles for every add-on owned by the account, oldest grant first.
    pub(crate) fn addon_rows_for(
        &self,
        account_id: &AccountId,
    ) -> Vec<Arc<RowLock<AddonSubscription>>> {
        let ids = self
            .addons_by_account
            .read()
            .expect("addon index poisoned")
            .get(account_id)
            .cloned()
            .unwrap_or_default();
        let table = self.addons.read().expect("addons table poisoned");
        ids.iter().filter_map(|id| table.get(id).cloned()).collect()
    }

    // --- snapshots ---

    pub fn account(&self, id: &AccountId) -> Result<Account, ExchangeError> {
        Ok(self.account_row(id)?.snapshot())
    }

    pub fn lead(&self, id: &LeadId) -> Result<Lead, ExchangeError> {
        Ok(self.lead_row(id)?.snapshot())
    }

    pub fn purchase(&self, id: &PurchaseId) -> Result<LeadPurchase, ExchangeError> {
        Ok(self.purchase_row(id)?.snapshot())
    }

    pub fn addon(&self, id: &AddonId) -> Result<AddonSubscription, ExchangeError> {
        Ok(self.addon_row(id)?.snapshot())
    }

    pub fn leads_snapshot(&self) -> Vec<Lead> {
        self.leads
            .read()
            .expect("leads table poisoned")
            .values()
            .map(|row| row.snapshot())
            .collect()
    }

    pub(crate) fn lead_rows(&self) -> Vec<Arc<RowLock<Lead>>> {
        self.leads
            .read()
            .expect("leads table poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn accounts_in_company(&self, company_id: &CompanyId) -> Vec<Account> {
        self.accounts
            .read()
            .expect("accounts table poisoned")
            .values()
            .map(|row| row.snapshot())
            .filter(|account| account.company_id.as_ref() == Some(company_id))
            .collect()
    }

    pub fn purchases_for_account(&self, account_id: &AccountId) -> Vec<LeadPurchase> {
        self.purchases
            .read()
            .expect("purchases table poisoned")
            .values()
            .map(|row| row.snapshot())
            .filter(|purchase| &purchase.account_id == account_id)
            .collect()
    }

    pub fn purchases_for_lead(&self, lead_id: &LeadId) -> Vec<LeadPurchase> {
        self.purchases
            .read()
            .expect("purchases table poisoned")
            .values()
            .map(|row| row.snapshot())
            .filter(|purchase| &purchase.lead_id == lead_id)
            .collect()
    }

    /// True when a non-refunded purchase already exists for the lead.
    /// A queued lead with such a purchase is a corrupted state.
    pub(crate) fn lead_has_live_purchase(&self, lead_id: &LeadId) -> bool {
        self.purchases_for_lead(lead_id)
            .iter()
            .any(|purchase| purchase.outcome != PurchaseOutcome::Refunded)
    }

    pub fn transactions_for(&self, account_id: &AccountId) -> Vec<CreditTransaction> {
        self.transactions
            .lock()
            .expect("transaction log poisoned")
            .iter()
            .filter(|transaction| &transaction.account_id == account_id)
            .cloned()
            .collect()
    }

    pub fn usages_for(&self, addon_id: &AddonId) -> Vec<AddonUsage> {
        self.usages
            .lock()
            .expect("usage log poisoned")
            .iter()
            .filter(|usage| &usage.addon_id == addon_id)
            .cloned()
            .collect()
    }

    pub fn addons_for_account(&self, account_id: &AccountId) -> Vec<AddonSubscription> {
        self.addon_rows_for(account_id)
            .iter()
            .map(|row| row.snapshot())
            .collect()
    }
}

impl Default for ExchangeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn lock_within_times_out_while_row_is_held() {
        let row = Arc::new(RowLock::new(0_u32));
        let contender = row.clone();
        let (hold_tx, hold_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();

        let holder = thread::spawn(move || {
            let _guard = contender.lock_within(Duration::from_millis(50)).unwrap();
            hold_tx.send(()).unwrap();
            done_rx.recv().unwrap();
        });

        hold_rx.recv().unwrap();
        let result = row.lock_within(Duration::from_millis(20));
        assert_eq!(result.err(), Some(ExchangeError::Busy));

        done_tx.send(()).unwrap();
        holder.join().unwrap();
        assert!(row.lock_within(Duration::from_millis(20)).is_ok());
    }

    #[test]
    fn missing_rows_surface_typed_not_found_errors() {
        let store = ExchangeStore::new();
        let missing = AccountId("acct-missing".to_string());
        assert!(matches!(
            store.account(&missing),
            Err(ExchangeError::AccountNotFound(_))
        ));
        assert!(matches!(
            store.lead(&LeadId("lead-missing".to_string())),
            Err(ExchangeError::LeadNotFound(_))
        ));
    }
}
