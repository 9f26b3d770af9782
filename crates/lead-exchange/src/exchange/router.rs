//! HTTP surface for the exchange, consumed by the provider-facing and admin
//! UIs. Handlers translate typed domain errors into status codes; claim
//! races surface to losers as a plain conflict.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use super::domain::{
    AccountId, AddonId, AddonSubscription, CompanyId, CreditTransaction, LeadId, LeadPurchase,
    LeadQueueEntry, NewAccount, NewAddon, NewLead, PurchaseId, PurchaseOutcome,
    TransactionReason,
};
use super::refunds::RefundReason;
use super::roi::RoiPeriod;
use super::service::LeadExchangeService;
use super::ExchangeError;

/// Router builder exposing the exchange operations under `/api/v1/exchange`.
pub fn exchange_router(service: Arc<LeadExchangeService>) -> Router {
    Router::new()
        .route("/api/v1/exchange/accounts", post(register_account_handler))
        .route("/api/v1/exchange/leads", post(post_lead_handler))
        .route(
            "/api/v1/exchange/accounts/:account_id/claimable",
            get(claimable_handler),
        )
        .route(
            "/api/v1/exchange/companies/:company_id/claimable",
            get(company_claimable_handler),
        )
        .route(
            "/api/v1/exchange/accounts/:account_id/purchases",
            post(purchase_handler),
        )
        .route(
            "/api/v1/exchange/purchases/:purchase_id/refund",
            post(refund_handler),
        )
        .route(
            "/api/v1/exchange/purchases/:purchase_id/outcome",
            post(outcome_handler),
        )
        .route(
            "/api/v1/exchange/accounts/:account_id/roi",
            get(roi_handler),
        )
        .route(
            "/api/v1/exchange/accounts/:account_id/addon",
            get(addon_status_handler),
        )
        .route(
            "/api/v1/exchange/accounts/:account_id/addons",
            post(purchase_addon_handler),
        )
        .route(
            "/api/v1/exchange/addons/:addon_id/renewal",
            post(renew_addon_handler),
        )
        .route(
            "/api/v1/exchange/addons/:addon_id",
            delete(cancel_addon_handler),
        )
        .route(
            "/api/v1/exchange/accounts/:account_id/credits/grants",
            post(grant_credits_handler),
        )
        .route(
            "/api/v1/exchange/accounts/:account_id/transactions",
            get(transactions_handler),
        )
        .route(
            "/api/v1/exchange/accounts/:account_id/stats",
            get(queue_stats_handler),
        )
        .with_state(service)
}

fn error_response(err: ExchangeError) -> Response {
    let status = match &err {
        ExchangeError::LeadUnavailable => StatusCode::CONFLICT,
        ExchangeError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
        ExchangeError::InvalidRefundState { .. }
        | ExchangeError::InvalidOutcomeTransition { .. }
        | ExchangeError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ExchangeError::Busy => StatusCode::SERVICE_UNAVAILABLE,
        ExchangeError::AccountNotFound(_)
        | ExchangeError::CompanyNotFound(_)
        | ExchangeError::LeadNotFound(_)
        | ExchangeError::PurchaseNotFound(_)
        | ExchangeError::AddonNotFound(_) => StatusCode::NOT_FOUND,
        ExchangeError::IntegrityViolation(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(%err, "exchange integrity failure");
    }

    let payload = match &err {
        // Carry the balance so the UI can prompt a top-up.
        ExchangeError::InsufficientFunds { balance, price } => json!({
            "error": err.to_string(),
            "balance": balance,
            "price": price,
        }),
        _ => json!({ "error": err.to_string() }),
    };
    (status, Json(payload)).into_response()
}

/// Sanitized purchase representation returned by every purchase-affecting
/// endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseView {
    pub purchase_id: PurchaseId,
    pub account_id: AccountId,
    pub lead_id: LeadId,
    pub amount: i64,
    pub funding: &'static str,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revenue: Option<i64>,
    pub purchased_at: DateTime<Utc>,
}

impl From<LeadPurchase> for PurchaseView {
    fn from(purchase: LeadPurchase) -> Self {
        Self {
            funding: match purchase.funding {
                super::domain::FundingSource::Credit { .. } => "credit",
                super::domain::FundingSource::Addon { .. } => "addon",
            },
            outcome: purchase.outcome.label(),
            purchase_id: purchase.id,
            account_id: purchase.account_id,
            lead_id: purchase.lead_id,
            amount: purchase.amount,
            revenue: purchase.revenue,
            purchased_at: purchase.purchased_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueEntryView {
    pub lead_id: LeadId,
    pub title: String,
    pub category: String,
    pub city: String,
    pub price: i64,
    pub urgency: super::domain::Urgency,
    pub budget: super::domain::BudgetRange,
    pub posted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub tier_priority: u8,
}

impl From<LeadQueueEntry> for QueueEntryView {
    fn from(entry: LeadQueueEntry) -> Self {
        Self {
            lead_id: entry.lead.id,
            title: entry.lead.title,
            category: entry.lead.category,
            city: entry.lead.city,
            price: entry.lead.price,
            urgency: entry.lead.urgency,
            budget: entry.lead.budget,
            posted_at: entry.lead.created_at,
            expires_at: entry.lead.expires_at,
            tier_priority: entry.tier_priority,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AddonStatusView {
    pub addon_id: AddonId,
    pub display_name: String,
    pub status: &'static str,
    pub remaining_units: i64,
    pub total_units: i64,
    pub valid_until: DateTime<Utc>,
    pub grace_until: DateTime<Utc>,
}

impl From<AddonSubscription> for AddonStatusView {
    fn from(addon: AddonSubscription) -> Self {
        Self {
            addon_id: addon.id,
            display_name: addon.display_name,
            status: addon.status.label(),
            remaining_units: addon.remaining_units,
            total_units: addon.total_units,
            valid_until: addon.valid_until,
            grace_until: addon.grace_until,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionView {
    pub transaction_id: super::domain::TransactionId,
    pub delta: i64,
    pub reason: &'static str,
    pub balance_after: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_id: Option<LeadId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchase_id: Option<PurchaseId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl From<CreditTransaction> for TransactionView {
    fn from(transaction: CreditTransaction) -> Self {
        Self {
            reason: transaction.reason.label(),
            transaction_id: transaction.id,
            delta: transaction.delta,
            balance_after: transaction.balance_after,
            lead_id: transaction.lead_id,
            purchase_id: transaction.purchase_id,
            note: transaction.note,
            recorded_at: transaction.recorded_at,
        }
    }
}

async fn register_account_handler(
    State(service): State<Arc<LeadExchangeService>>,
    Json(request): Json<NewAccount>,
) -> Response {
    match service.register_account(request) {
        Ok(account) => (StatusCode::CREATED, Json(account)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn post_lead_handler(
    State(service): State<Arc<LeadExchangeService>>,
    Json(request): Json<NewLead>,
) -> Response {
    match service.post_lead(request) {
        Ok(lead) => (StatusCode::CREATED, Json(lead)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn claimable_handler(
    State(service): State<Arc<LeadExchangeService>>,
    Path(account_id): Path<String>,
) -> Response {
    match service.list_claimable(&AccountId(account_id)) {
        Ok(entries) => {
            let views: Vec<QueueEntryView> = entries.into_iter().map(Into::into).collect();
            (StatusCode::OK, Json(views)).into_response()
        }
        Err(err) => error_response(err),
    }
}

async fn company_claimable_handler(
    State(service): State<Arc<LeadExchangeService>>,
    Path(company_id): Path<String>,
) -> Response {
    match service.list_claimable_for_company(&CompanyId(company_id)) {
        Ok(entries) => {
            let views: Vec<QueueEntryView> = entries.into_iter().map(Into::into).collect();
            (StatusCode::OK, Json(views)).into_response()
        }
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
struct PurchaseRequest {
    lead_id: LeadId,
}

async fn purchase_handler(
    State(service): State<Arc<LeadExchangeService>>,
    Path(account_id): Path<String>,
    Json(request): Json<PurchaseRequest>,
) -> Response {
    match service.claim(&AccountId(account_id), &request.lead_id) {
        Ok(purchase) => {
            (StatusCode::CREATED, Json(PurchaseView::from(purchase))).into_response()
        }
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
struct RefundRequest {
    reason: RefundReason,
}

async fn refund_handler(
    State(service): State<Arc<LeadExchangeService>>,
    Path(purchase_id): Path<String>,
    Json(request): Json<RefundRequest>,
) -> Response {
    match service.refund(&PurchaseId(purchase_id), request.reason) {
        Ok(purchase) => (StatusCode::OK, Json(PurchaseView::from(purchase))).into_response(),
        Err(err) => error_response(err),
    }
}

/// Only provider-reportable outcomes are accepted here; refunds go through
/// the refund endpoint.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ReportableOutcome {
    Contacted,
    Converted,
}

#[derive(Debug, Deserialize)]
struct OutcomeRequest {
    outcome: ReportableOutcome,
    #[serde(default)]
    revenue: Option<i64>,
}

async fn outcome_handler(
    State(service): State<Arc<LeadExchangeService>>,
    Path(purchase_id): Path<String>,
    Json(request): Json<OutcomeRequest>,
) -> Response {
    let outcome = match request.outcome {
        ReportableOutcome::Contacted => PurchaseOutcome::Contacted,
        ReportableOutcome::Converted => PurchaseOutcome::Converted,
    };
    match service.record_outcome(&PurchaseId(purchase_id), outcome, request.revenue) {
        Ok(purchase) => (StatusCode::OK, Json(PurchaseView::from(purchase))).into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
struct RoiQuery {
    #[serde(default)]
    from: Option<DateTime<Utc>>,
    #[serde(default)]
    to: Option<DateTime<Utc>>,
}

async fn roi_handler(
    State(service): State<Arc<LeadExchangeService>>,
    Path(account_id): Path<String>,
    Query(query): Query<RoiQuery>,
) -> Response {
    let period = RoiPeriod {
        from: query.from,
        to: query.to,
    };
    match service.roi(&AccountId(account_id), period) {
        Ok(roi) => (StatusCode::OK, Json(roi)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn addon_status_handler(
    State(service): State<Arc<LeadExchangeService>>,
    Path(account_id): Path<String>,
) -> Response {
    match service.addon_status(&AccountId(account_id)) {
        Ok(addons) => {
            let views: Vec<AddonStatusView> = addons.into_iter().map(Into::into).collect();
            (StatusCode::OK, Json(views)).into_response()
        }
        Err(err) => error_response(err),
    }
}

async fn purchase_addon_handler(
    State(service): State<Arc<LeadExchangeService>>,
    Path(account_id): Path<String>,
    Json(request): Json<NewAddon>,
) -> Response {
    match service.purchase_addon(&AccountId(account_id), request) {
        Ok(addon) => {
            (StatusCode::CREATED, Json(AddonStatusView::from(addon))).into_response()
        }
        Err(err) => error_response(err),
    }
}

async fn renew_addon_handler(
    State(service): State<Arc<LeadExchangeService>>,
    Path(addon_id): Path<String>,
) -> Response {
    match service.renew_addon(&AddonId(addon_id)) {
        Ok(addon) => (StatusCode::OK, Json(AddonStatusView::from(addon))).into_response(),
        Err(err) => error_response(err),
    }
}

async fn cancel_addon_handler(
    State(service): State<Arc<LeadExchangeService>>,
    Path(addon_id): Path<String>,
) -> Response {
    match service.cancel_addon(&AddonId(addon_id)) {
        Ok(addon) => (StatusCode::OK, Json(AddonStatusView::from(addon))).into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
struct GrantRequest {
    amount: i64,
    #[serde(default)]
    note: Option<String>,
}

async fn grant_credits_handler(
    State(service): State<Arc<LeadExchangeService>>,
    Path(account_id): Path<String>,
    Json(request): Json<GrantRequest>,
) -> Response {
    match service.grant_credits(&AccountId(account_id), request.amount, request.note) {
        Ok(transaction) => {
            (StatusCode::CREATED, Json(TransactionView::from(transaction))).into_response()
        }
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
struct TransactionsQuery {
    #[serde(default = "default_transaction_limit")]
    limit: usize,
    #[serde(default)]
    reason: Option<TransactionReason>,
}

fn default_transaction_limit() -> usize {
    50
}

async fn transactions_handler(
    State(service): State<Arc<LeadExchangeService>>,
    Path(account_id): Path<String>,
    Query(query): Query<TransactionsQuery>,
) -> Response {
    match service.transactions(&AccountId(account_id), query.limit, query.reason) {
        Ok(transactions) => {
            let views: Vec<TransactionView> =
                transactions.into_iter().map(Into::into).collect();
            (StatusCode::OK, Json(views)).into_response()
        }
        Err(err) => error_response(err),
    }
}

async fn queue_stats_handler(
    State(service): State<Arc<LeadExchangeService>>,
    Path(account_id): Path<String>,
) -> Response {
    match service.queue_stats(&AccountId(account_id)) {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(err) => error_response(err),
    }
}
