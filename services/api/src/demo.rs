use clap::Args;
use lead_exchange::config::AppConfig;
use lead_exchange::error::AppError;
use lead_exchange::exchange::domain::{
    BudgetRange, NewAccount, NewAddon, NewLead, PurchaseOutcome, SubscriptionTier, Urgency,
};
use lead_exchange::exchange::{RefundReason, RoiPeriod};
use lead_exchange::telemetry;

use crate::infra::build_service;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Number of leads to post before the walkthrough starts
    #[arg(long, default_value_t = 3)]
    pub(crate) leads: u8,
    /// Skip the refund portion of the walkthrough
    #[arg(long)]
    pub(crate) skip_refund: bool,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry).ok();
    let service = build_service(&config);

    println!("Lead exchange walkthrough");

    let premium = service.register_account(NewAccount {
        display_name: "Adria Interiors".to_string(),
        company_id: None,
        tier: SubscriptionTier::Premium,
        categories: vec!["renovation".to_string()],
        city: "Zagreb".to_string(),
    })?;
    let basic = service.register_account(NewAccount {
        display_name: "City Handyman".to_string(),
        company_id: None,
        tier: SubscriptionTier::Basic,
        categories: vec!["renovation".to_string()],
        city: "Zagreb".to_string(),
    })?;
    service.grant_credits(&basic.id, 120, Some("demo top-up".to_string()))?;
    let addon = service.purchase_addon(
        &premium.id,
        NewAddon {
            display_name: "Starter lead pack".to_string(),
            units: 10,
            valid_days: 30,
        },
    )?;
    println!(
        "  registered {} (premium, add-on {} with {} units) and {} (basic, 120 credits)",
        premium.display_name, addon.id, addon.total_units, basic.display_name
    );

    let mut leads = Vec::new();
    for index in 0..args.leads.max(2) {
        let lead = service.post_lead(NewLead {
            title: format!("Apartment refresh #{}", index + 1),
            category: "renovation".to_string(),
            city: "Zagreb".to_string(),
            budget: BudgetRange {
                min: 1_500,
                max: 6_000,
            },
            urgency: Urgency::Normal,
            price: 30,
        })?;
        leads.push(lead);
    }

    let claimable = service.list_claimable(&premium.id)?;
    println!("  {} leads claimable for {}", claimable.len(), premium.display_name);

    let addon_purchase = service.claim(&premium.id, &leads[0].id)?;
    println!(
        "  {} claimed {} funded by the add-on ({} units left)",
        premium.display_name,
        leads[0].title,
        service.addon_status(&premium.id)?[0].remaining_units
    );
    let credit_purchase = service.claim(&basic.id, &leads[1].id)?;
    println!(
        "  {} claimed {} for {} credits (balance {})",
        basic.display_name,
        leads[1].title,
        credit_purchase.amount,
        service.balance(&basic.id)?
    );

    // A losing rival sees the lead as gone, not an error.
    if let Err(err) = service.claim(&basic.id, &leads[0].id) {
        println!("  rival claim on a sold lead: {err}");
    }

    service.record_outcome(&addon_purchase.id, PurchaseOutcome::Converted, Some(4_200))?;
    println!("  {} converted the lead at 4200 revenue", premium.display_name);

    if !args.skip_refund {
        service.record_outcome(&credit_purchase.id, PurchaseOutcome::Contacted, None)?;
        service.refund(&credit_purchase.id, RefundReason::BadContactInfo)?;
        println!(
            "  {} refunded {} credits, lead reopened, balance {}",
            basic.display_name,
            credit_purchase.amount,
            service.balance(&basic.id)?
        );
    }

    let roi = service.roi(&premium.id, RoiPeriod::default())?;
    println!(
        "  ROI for {}: purchased {}, converted {}, conversion rate {:.0}%, revenue {}",
        premium.display_name,
        roi.purchased,
        roi.converted,
        roi.conversion_rate * 100.0,
        roi.estimated_revenue
    );

    service.verify_account(&premium.id)?;
    service.verify_account(&basic.id)?;
    println!("  ledger verified for both accounts");

    let kinds: Vec<_> = service
        .events()
        .all()
        .iter()
        .map(|event| event.kind())
        .collect();
    println!("  event log: {}", kinds.join(", "));

    Ok(())
}
