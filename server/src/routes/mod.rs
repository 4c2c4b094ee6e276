use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, Config, SecurityHeadersLayer};
use crate::handlers::{
    create_purchase, get_purchase, get_ticket_type, health_check, list_purchases,
};
use crate::ledger::InventoryLedger;
use crate::purchases::PurchaseService;

pub fn create_routes<L: InventoryLedger + 'static>(
    service: PurchaseService<L>,
    config: &Config,
) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/purchases",
            get(list_purchases::<L>).post(create_purchase::<L>),
        )
        .route("/purchases/:id", get(get_purchase::<L>))
        .route("/ticket-types/:id", get(get_ticket_type::<L>))
        .with_state(Arc::new(service))
        .layer(SecurityHeadersLayer::for_environment(config.is_production))
        .layer(create_cors_layer(&config.cors_allowed_origins))
        .layer(TraceLayer::new_for_http())
}
