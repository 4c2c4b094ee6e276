use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A completed ticket purchase. Records are write-once: nothing in the crate
/// updates or deletes them after the purchase transaction commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Purchase {
    pub id: Uuid,
    pub user_id: Uuid,
    pub ticket_type_id: Uuid,
    pub quantity: i32,
    pub total_price: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Values the purchase transaction hands to storage. Storage assigns `id`
/// and `created_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPurchase {
    pub user_id: Uuid,
    pub ticket_type_id: Uuid,
    pub quantity: i32,
    pub total_price: Decimal,
}

/// Body of `POST /purchases`.
///
/// `quantity` is signed and wide; range checks happen in the purchase service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub ticket_type_id: Uuid,
    pub quantity: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurchaseFilter {
    pub user_id: Option<Uuid>,
}

impl PurchaseFilter {
    pub fn all() -> Self {
        Self { user_id: None }
    }

    pub fn for_user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
        }
    }

    pub fn matches(&self, purchase: &Purchase) -> bool {
        self.user_id.map_or(true, |id| purchase.user_id == id)
    }
}
