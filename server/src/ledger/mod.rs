//! Inventory ledger: the authoritative store of each ticket type's remaining
//! capacity, plus the purchase records written alongside it.
//!
//! Capacity is only changed inside a [`LedgerTransaction`]. A transaction
//! takes an exclusive lock on a single ticket-type row with
//! [`LedgerTransaction::lock_and_read`], and [`LedgerTransaction::write`]
//! consumes the [`LockedTicketType`] token that call returns, so a capacity
//! write without a prior lock in the same transaction does not type-check.
//!
//! Dropping a transaction without calling [`LedgerTransaction::commit`] rolls
//! it back and releases every lock it holds.

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{NewPurchase, Purchase, PurchaseFilter, TicketType};
use crate::purchases::PurchaseResult;

pub mod memory;
pub mod postgres;

pub use memory::{InMemoryInventoryLedger, InMemoryTransaction};
pub use postgres::{PgInventoryLedger, PgLedgerTransaction};

#[async_trait]
pub trait InventoryLedger: Send + Sync {
    type Transaction: LedgerTransaction;

    /// Open a transaction. Lock waits inside it are bounded by the ledger's
    /// lock timeout.
    async fn begin(&self) -> PurchaseResult<Self::Transaction>;

    /// Unlocked read of a ticket type.
    async fn ticket_type(&self, id: Uuid) -> PurchaseResult<Option<TicketType>>;

    /// Committed purchases matching `filter`, newest first.
    async fn purchases(&self, filter: PurchaseFilter) -> PurchaseResult<Vec<Purchase>>;

    async fn purchase(&self, id: Uuid) -> PurchaseResult<Option<Purchase>>;
}

#[async_trait]
pub trait LedgerTransaction: Send {
    /// Take the exclusive row lock on a ticket type and read its current
    /// state. Fails with `NotFound` for unknown ids and `TryAgain` when the
    /// lock cannot be acquired in time.
    async fn lock_and_read(&mut self, ticket_type_id: Uuid) -> PurchaseResult<LockedTicketType>;

    /// Persist a new remaining capacity for a row locked by this transaction.
    async fn write(&mut self, locked: LockedTicketType, new_capacity: i32) -> PurchaseResult<()>;

    async fn insert_purchase(&mut self, purchase: NewPurchase) -> PurchaseResult<Purchase>;

    async fn commit(self) -> PurchaseResult<()>;
}

/// Proof that a ticket-type row is locked by the current transaction.
///
/// Only ledger implementations can construct one.
#[derive(Debug)]
pub struct LockedTicketType {
    ticket_type: TicketType,
}

impl LockedTicketType {
    pub(crate) fn new(ticket_type: TicketType) -> Self {
        Self { ticket_type }
    }

    pub fn id(&self) -> Uuid {
        self.ticket_type.id
    }

    pub fn price(&self) -> Decimal {
        self.ticket_type.price
    }

    pub fn capacity(&self) -> i32 {
        self.ticket_type.capacity
    }
}
