//! End-to-end scenarios for the claim and purchase path, driven through the
//! public service facade: funding, queue visibility, eligibility, and lead
//! lifecycle.

mod common {
    use lead_exchange::exchange::domain::{
        Account, BudgetRange, Lead, NewAccount, NewLead, SubscriptionTier, Urgency,
    };
    use lead_exchange::exchange::{ExchangeConfig, LeadExchangeService};

    pub(super) fn service() -> LeadExchangeService {
        LeadExchangeService::new(ExchangeConfig::default())
    }

    pub(super) fn provider(service: &LeadExchangeService, tier: SubscriptionTier) -> Account {
        service
            .register_account(NewAccount {
                display_name: "Horizon Renovations".to_string(),
                company_id: None,
                tier,
                categories: vec!["renovation".to_string()],
                city: "Zagreb".to_string(),
            })
            .expect("account registers")
    }

    pub(super) fn lead(service: &LeadExchangeService, price: i64) -> Lead {
        lead_in(service, price, "Zagreb", Urgency::Normal)
    }

    pub(super) fn lead_in(
        service: &LeadExchangeService,
        price: i64,
        city: &str,
        urgency: Urgency,
    ) -> Lead {
        service
            .post_lead(NewLead {
                title: "Bathroom renovation".to_string(),
                category: "renovation".to_string(),
                city: city.to_string(),
                budget: BudgetRange {
                    min: 2_000,
                    max: 8_000,
                },
                urgency,
                price,
            })
            .expect("lead posts")
    }
}

mod funding {
    use super::common::*;
    use lead_exchange::exchange::domain::{
        FundingSource, LeadStatus, PurchaseOutcome, SubscriptionTier, TransactionReason,
    };
    use lead_exchange::exchange::ExchangeError;

    #[test]
    fn purchase_debits_credits_and_sells_the_lead() {
        let service = service();
        let account = provider(&service, SubscriptionTier::Basic);
        service
            .grant_credits(&account.id, 100, None)
            .expect("grant succeeds");
        let lead = lead(&service, 30);

        let purchase = service.claim(&account.id, &lead.id).expect("claim succeeds");

        assert_eq!(purchase.amount, 30);
        assert_eq!(purchase.outcome, PurchaseOutcome::Active);
        assert!(matches!(purchase.funding, FundingSource::Credit { .. }));
        assert_eq!(service.balance(&account.id).unwrap(), 70);
        assert_eq!(service.store().lead(&lead.id).unwrap().status, LeadStatus::Sold);

        let debits = service
            .transactions(&account.id, 10, Some(TransactionReason::Purchase))
            .expect("history reads");
        assert_eq!(debits.len(), 1);
        assert_eq!(debits[0].delta, -30);
        assert_eq!(debits[0].balance_after, 70);
        assert_eq!(debits[0].purchase_id.as_ref(), Some(&purchase.id));

        service.verify_account(&account.id).expect("ledger adds up");
    }

    #[test]
    fn insufficient_balance_rejects_without_mutation() {
        let service = service();
        let account = provider(&service, SubscriptionTier::Basic);
        service.grant_credits(&account.id, 10, None).expect("grant");
        let lead = lead(&service, 30);

        let result = service.claim(&account.id, &lead.id);
        assert_eq!(
            result.err(),
            Some(ExchangeError::InsufficientFunds {
                balance: 10,
                price: 30
            })
        );
        assert_eq!(service.balance(&account.id).unwrap(), 10);
        assert_eq!(
            service.store().lead(&lead.id).unwrap().status,
            LeadStatus::Queued
        );
        service.verify_account(&account.id).expect("ledger adds up");
    }

    #[test]
    fn a_sold_lead_cannot_be_sold_again() {
        let service = service();
        let first = provider(&service, SubscriptionTier::Basic);
        let second = provider(&service, SubscriptionTier::Premium);
        service.grant_credits(&first.id, 100, None).expect("grant");
        service.grant_credits(&second.id, 100, None).expect("grant");
        let lead = lead(&service, 30);

        service.claim(&first.id, &lead.id).expect("first claim wins");
        let result = service.claim(&second.id, &lead.id);

        assert_eq!(result.err(), Some(ExchangeError::LeadUnavailable));
        assert_eq!(service.balance(&second.id).unwrap(), 100);
        assert_eq!(service.store().purchases_for_lead(&lead.id).len(), 1);
    }

    #[test]
    fn lifetime_spend_tracks_credit_purchases() {
        let service = service();
        let account = provider(&service, SubscriptionTier::Pro);
        service.grant_credits(&account.id, 100, None).expect("grant");
        let first = lead(&service, 30);
        let second = lead(&service, 20);

        service.claim(&account.id, &first.id).expect("first claim");
        service.claim(&account.id, &second.id).expect("second claim");

        let snapshot = service.account(&account.id).expect("account reads");
        assert_eq!(snapshot.lifetime_credits_spent, 50);
        assert_eq!(snapshot.credits_balance, 50);
    }
}

mod queue_visibility {
    use super::common::*;
    use lead_exchange::exchange::domain::{NewAccount, SubscriptionTier, Urgency};
    use lead_exchange::exchange::domain::CompanyId;
    use lead_exchange::exchange::ExchangeError;

    #[test]
    fn claimable_listing_is_filtered_and_oldest_first() {
        let service = service();
        let account = provider(&service, SubscriptionTier::Basic);
        service.grant_credits(&account.id, 100, None).expect("grant");

        let oldest = lead(&service, 30);
        let newer = lead(&service, 25);
        let elsewhere = lead_in(&service, 10, "Split", Urgency::Normal);

        let entries = service.list_claimable(&account.id).expect("listing");
        let ids: Vec<_> = entries.iter().map(|e| e.lead.id.clone()).collect();
        assert_eq!(ids, vec![oldest.id.clone(), newer.id.clone()]);
        assert!(!ids.contains(&elsewhere.id));

        // A sold lead drops out without being touched.
        service.claim(&account.id, &oldest.id).expect("claim");
        let entries = service.list_claimable(&account.id).expect("listing");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].lead.id, newer.id);
    }

    #[test]
    fn urgent_leads_are_reserved_for_paying_tiers() {
        let service = service();
        let trial = provider(&service, SubscriptionTier::Trial);
        let paying = provider(&service, SubscriptionTier::Basic);
        let urgent = lead_in(&service, 30, "Zagreb", Urgency::Urgent);

        let trial_view = service.list_claimable(&trial.id).expect("listing");
        assert!(trial_view.iter().all(|e| e.lead.id != urgent.id));

        let paying_view = service.list_claimable(&paying.id).expect("listing");
        assert!(paying_view.iter().any(|e| e.lead.id == urgent.id));
    }

    #[test]
    fn withdrawn_leads_leave_the_queue() {
        let service = service();
        let account = provider(&service, SubscriptionTier::Basic);
        service.grant_credits(&account.id, 100, None).expect("grant");
        let lead = lead(&service, 30);

        service.withdraw_lead(&lead.id).expect("withdraw");
        assert!(service.list_claimable(&account.id).expect("listing").is_empty());
        assert_eq!(
            service.claim(&account.id, &lead.id).err(),
            Some(ExchangeError::LeadUnavailable)
        );
    }

    #[test]
    fn company_view_merges_members_under_highest_tier() {
        let service = service();
        let company = CompanyId("co-handyman".to_string());
        for (name, tier) in [
            ("Crew Basic", SubscriptionTier::Basic),
            ("Crew Premium", SubscriptionTier::Premium),
        ] {
            service
                .register_account(NewAccount {
                    display_name: name.to_string(),
                    company_id: Some(company.clone()),
                    tier,
                    categories: vec!["renovation".to_string()],
                    city: "Zagreb".to_string(),
                })
                .expect("member registers");
        }
        let posted = lead(&service, 30);

        let entries = service
            .list_claimable_for_company(&company)
            .expect("company listing");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].lead.id, posted.id);
        assert_eq!(entries[0].tier_priority, SubscriptionTier::Premium.priority());

        let missing = service.list_claimable_for_company(&CompanyId("co-none".to_string()));
        assert!(matches!(missing, Err(ExchangeError::CompanyNotFound(_))));
    }
}

mod expiry {
    use super::common::*;
    use lead_exchange::exchange::domain::{LeadStatus, SubscriptionTier};
    use lead_exchange::exchange::{ExchangeConfig, ExchangeError, LeadExchangeService};

    fn zero_ttl_service() -> LeadExchangeService {
        LeadExchangeService::new(ExchangeConfig {
            lead_ttl_hours: 0,
            ..ExchangeConfig::default()
        })
    }

    #[test]
    fn overdue_leads_expire_lazily_on_claim() {
        let service = zero_ttl_service();
        let account = provider(&service, SubscriptionTier::Basic);
        service.grant_credits(&account.id, 100, None).expect("grant");
        let lead = lead(&service, 30);

        assert!(service.list_claimable(&account.id).expect("listing").is_empty());
        assert_eq!(
            service.claim(&account.id, &lead.id).err(),
            Some(ExchangeError::LeadUnavailable)
        );
        assert_eq!(
            service.store().lead(&lead.id).unwrap().status,
            LeadStatus::Expired
        );
        assert_eq!(service.events().of_kind("lead_expired").len(), 1);
    }

    #[test]
    fn sweep_expires_only_overdue_queued_leads() {
        let service = zero_ttl_service();
        let _ = lead(&service, 30);
        let _ = lead(&service, 20);

        let expired = service.expire_overdue_leads().expect("sweep runs");
        assert_eq!(expired, 2);
        assert_eq!(service.events().of_kind("lead_expired").len(), 2);

        // Re-running the sweep is a no-op.
        assert_eq!(service.expire_overdue_leads().expect("sweep runs"), 0);
    }

    #[test]
    fn queue_stats_count_the_funnel() {
        let service = service();
        let winner = provider(&service, SubscriptionTier::Basic);
        let rival = provider(&service, SubscriptionTier::Basic);
        service.grant_credits(&winner.id, 100, None).expect("grant");
        let sold = lead(&service, 30);
        let open = lead(&service, 25);

        service.claim(&winner.id, &sold.id).expect("claim");

        let stats = service.queue_stats(&rival.id).expect("stats");
        assert_eq!(stats.claimable, 1);
        assert_eq!(stats.purchased, 0);
        assert_eq!(stats.missed, 1);

        let stats = service.queue_stats(&winner.id).expect("stats");
        assert_eq!(stats.purchased, 1);
        assert_eq!(stats.missed, 0);
        assert_eq!(stats.claimable, 1);
        let _ = open;
    }
}
