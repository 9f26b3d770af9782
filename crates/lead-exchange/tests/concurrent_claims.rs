//! Concurrency properties: exclusivity under racing claims and ledger
//! consistency when one account races against its own balance.

use std::sync::Arc;
use std::thread;

use lead_exchange::exchange::domain::{
    BudgetRange, NewAccount, NewLead, PurchaseOutcome, SubscriptionTier, Urgency,
};
use lead_exchange::exchange::{ExchangeConfig, ExchangeError, LeadExchangeService};

fn service() -> Arc<LeadExchangeService> {
    Arc::new(LeadExchangeService::new(ExchangeConfig::default()))
}

fn provider(service: &LeadExchangeService, name: &str) -> lead_exchange::exchange::domain::Account {
    service
        .register_account(NewAccount {
            display_name: name.to_string(),
            company_id: None,
            tier: SubscriptionTier::Basic,
            categories: vec!["renovation".to_string()],
            city: "Zagreb".to_string(),
        })
        .expect("account registers")
}

fn lead(service: &LeadExchangeService, price: i64) -> lead_exchange::exchange::domain::Lead {
    service
        .post_lead(NewLead {
            title: "Roof repair".to_string(),
            category: "renovation".to_string(),
            city: "Zagreb".to_string(),
            budget: BudgetRange {
                min: 1_000,
                max: 4_000,
            },
            urgency: Urgency::Normal,
            price,
        })
        .expect("lead posts")
}

#[test]
fn racing_claims_on_one_lead_produce_exactly_one_sale() {
    let service = service();
    let contested = lead(&service, 30);

    let accounts: Vec<_> = (0..8)
        .map(|i| {
            let account = provider(&service, &format!("Contender {i}"));
            service
                .grant_credits(&account.id, 100, None)
                .expect("grant succeeds");
            account
        })
        .collect();

    let handles: Vec<_> = accounts
        .iter()
        .map(|account| {
            let service = service.clone();
            let account_id = account.id.clone();
            let lead_id = contested.id.clone();
            thread::spawn(move || service.claim(&account_id, &lead_id))
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("claim thread completes"))
        .collect();

    let winners = results.iter().filter(|result| result.is_ok()).count();
    assert_eq!(winners, 1, "exactly one claim may win");
    for result in &results {
        if let Err(err) = result {
            assert_eq!(err, &ExchangeError::LeadUnavailable);
        }
    }

    let live: Vec<_> = service
        .store()
        .purchases_for_lead(&contested.id)
        .into_iter()
        .filter(|purchase| purchase.outcome != PurchaseOutcome::Refunded)
        .collect();
    assert_eq!(live.len(), 1);

    let winner_id = &live[0].account_id;
    for account in &accounts {
        let expected = if &account.id == winner_id { 70 } else { 100 };
        assert_eq!(service.balance(&account.id).unwrap(), expected);
        service.verify_account(&account.id).expect("ledger adds up");
    }
}

#[test]
fn two_funded_rivals_settle_at_seventy_and_one_hundred() {
    let service = service();
    let contested = lead(&service, 30);
    let b = provider(&service, "Provider B");
    let c = provider(&service, "Provider C");
    service.grant_credits(&b.id, 100, None).expect("grant");
    service.grant_credits(&c.id, 100, None).expect("grant");

    let handles: Vec<_> = [b.id.clone(), c.id.clone()]
        .into_iter()
        .map(|account_id| {
            let service = service.clone();
            let lead_id = contested.id.clone();
            thread::spawn(move || (account_id.clone(), service.claim(&account_id, &lead_id)))
        })
        .collect();

    let mut balances = Vec::new();
    for handle in handles {
        let (account_id, result) = handle.join().expect("claim thread completes");
        match result {
            Ok(purchase) => assert_eq!(purchase.account_id, account_id),
            Err(err) => assert_eq!(err, ExchangeError::LeadUnavailable),
        }
        balances.push(service.balance(&account_id).unwrap());
    }

    balances.sort_unstable();
    assert_eq!(balances, vec![70, 100]);
}

#[test]
fn one_account_cannot_outspend_its_balance_concurrently() {
    let service = service();
    let account = provider(&service, "Solo Provider");
    service.grant_credits(&account.id, 30, None).expect("grant");
    let first = lead(&service, 30);
    let second = lead(&service, 30);

    let handles: Vec<_> = [first.id.clone(), second.id.clone()]
        .into_iter()
        .map(|lead_id| {
            let service = service.clone();
            let account_id = account.id.clone();
            thread::spawn(move || service.claim(&account_id, &lead_id))
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("claim thread completes"))
        .collect();

    let wins = results.iter().filter(|result| result.is_ok()).count();
    assert_eq!(wins, 1, "only one lead fits the balance");
    for result in &results {
        if let Err(err) = result {
            assert!(matches!(err, ExchangeError::InsufficientFunds { .. }));
        }
    }

    assert_eq!(service.balance(&account.id).unwrap(), 0);
    service.verify_account(&account.id).expect("ledger adds up");
}
