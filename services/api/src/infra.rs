use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use lead_exchange::config::AppConfig;
use lead_exchange::exchange::{
    EventPublisher, ExchangeEvent, LeadExchangeService, PublishError,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Stand-in for the notification service: every ledger-affecting event is
/// logged where a delivery adapter would consume it.
#[derive(Default)]
pub(crate) struct TracingEventPublisher;

impl EventPublisher for TracingEventPublisher {
    fn publish(&self, event: &ExchangeEvent) -> Result<(), PublishError> {
        match event.account_id() {
            Some(account_id) => info!(kind = event.kind(), account = %account_id, "exchange event"),
            None => info!(kind = event.kind(), "exchange event"),
        }
        Ok(())
    }
}

pub(crate) fn build_service(config: &AppConfig) -> Arc<LeadExchangeService> {
    Arc::new(
        LeadExchangeService::builder(config.exchange.clone())
            .publisher(Arc::new(TracingEventPublisher))
            .build(),
    )
}
