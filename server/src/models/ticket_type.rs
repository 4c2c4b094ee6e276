use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A purchasable kind of ticket for an event.
///
/// `capacity` is the number of tickets still available, not the original
/// allotment. It only ever decreases, and only through a committed purchase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TicketType {
    pub id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub capacity: i32,
}

impl TicketType {
    pub fn new(event_id: Uuid, name: impl Into<String>, price: Decimal, capacity: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id,
            name: name.into(),
            price,
            capacity,
        }
    }
}
