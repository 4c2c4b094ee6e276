use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::ledger::InventoryLedger;
use crate::models::PurchaseRequest;
use crate::purchases::PurchaseService;
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

pub type SharedService<L> = Arc<PurchaseService<L>>;

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
}

pub async fn health_check() -> Response {
    let payload = HealthPayload {
        status: "ok",
        service: "eventify-api",
    };

    success(payload, "Health check successful")
}

pub async fn create_purchase<L: InventoryLedger + 'static>(
    State(service): State<SharedService<L>>,
    user: AuthUser,
    payload: Result<Json<PurchaseRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = payload.map_err(|e| AppError::ValidationError(e.body_text()))?;

    let purchase = service
        .purchase(&user, request.ticket_type_id, request.quantity)
        .await?;

    Ok(created(purchase, "Purchase completed"))
}

pub async fn list_purchases<L: InventoryLedger + 'static>(
    State(service): State<SharedService<L>>,
    user: AuthUser,
) -> Result<Response, AppError> {
    let purchases = service.list_purchases(&user).await?;
    let message = format!("Found {} purchase(s)", purchases.len());
    Ok(success(purchases, message))
}

pub async fn get_purchase<L: InventoryLedger + 'static>(
    State(service): State<SharedService<L>>,
    user: AuthUser,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Response, AppError> {
    let Path(id) = id.map_err(|e| AppError::ValidationError(e.body_text()))?;
    let purchase = service.get_purchase(&user, id).await?;
    Ok(success(purchase, "Purchase found"))
}

pub async fn get_ticket_type<L: InventoryLedger + 'static>(
    State(service): State<SharedService<L>>,
    _user: AuthUser,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Response, AppError> {
    let Path(id) = id.map_err(|e| AppError::ValidationError(e.body_text()))?;
    let ticket_type = service.get_ticket_type(id).await?;
    Ok(success(ticket_type, "Ticket type found"))
}
