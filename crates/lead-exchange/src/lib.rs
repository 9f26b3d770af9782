//! Exclusive lead distribution and credit ledger core for the services
//! marketplace: the lead queue, the atomic purchase coordinator, the credit
//! and add-on funding sources, refunds, and the derived ROI read model.

pub mod config;
pub mod error;
pub mod exchange;
pub mod telemetry;
