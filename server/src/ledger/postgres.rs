use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

use super::{InventoryLedger, LedgerTransaction, LockedTicketType};
use crate::models::{NewPurchase, Purchase, PurchaseFilter, TicketType};
use crate::purchases::{PurchaseError, PurchaseResult};

const PURCHASE_COLUMNS: &str = "id, user_id, ticket_type_id, quantity, total_price, created_at";

/// Ledger backed by the `ticket_types` and `purchases` tables.
///
/// Row locks come from `SELECT ... FOR UPDATE` inside an explicit
/// transaction; `lock_timeout` is set per transaction so a blocked attempt
/// fails with SQLSTATE 55P03 instead of waiting indefinitely.
#[derive(Debug, Clone)]
pub struct PgInventoryLedger {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgInventoryLedger {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }
}

#[async_trait]
impl InventoryLedger for PgInventoryLedger {
    type Transaction = PgLedgerTransaction;

    async fn begin(&self) -> PurchaseResult<PgLedgerTransaction> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis().max(1)))
            .execute(&mut *tx)
            .await?;

        Ok(PgLedgerTransaction {
            tx,
            locked: HashSet::new(),
        })
    }

    async fn ticket_type(&self, id: Uuid) -> PurchaseResult<Option<TicketType>> {
        let ticket_type = sqlx::query_as::<_, TicketType>(
            "SELECT id, event_id, name, price, capacity FROM ticket_types WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(ticket_type)
    }

    async fn purchases(&self, filter: PurchaseFilter) -> PurchaseResult<Vec<Purchase>> {
        let purchases = sqlx::query_as::<_, Purchase>(&format!(
            "SELECT {PURCHASE_COLUMNS} FROM purchases \
             WHERE ($1::uuid IS NULL OR user_id = $1) \
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(filter.user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(purchases)
    }

    async fn purchase(&self, id: Uuid) -> PurchaseResult<Option<Purchase>> {
        let purchase = sqlx::query_as::<_, Purchase>(&format!(
            "SELECT {PURCHASE_COLUMNS} FROM purchases WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(purchase)
    }
}

/// Open database transaction. Dropping it without commit returns the
/// connection to the pool with a rollback, which also releases row locks.
pub struct PgLedgerTransaction {
    tx: Transaction<'static, Postgres>,
    locked: HashSet<Uuid>,
}

#[async_trait]
impl LedgerTransaction for PgLedgerTransaction {
    async fn lock_and_read(&mut self, ticket_type_id: Uuid) -> PurchaseResult<LockedTicketType> {
        let ticket_type = sqlx::query_as::<_, TicketType>(
            "SELECT id, event_id, name, price, capacity FROM ticket_types WHERE id = $1 FOR UPDATE",
        )
        .bind(ticket_type_id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(PurchaseError::NotFound(ticket_type_id))?;

        self.locked.insert(ticket_type_id);
        Ok(LockedTicketType::new(ticket_type))
    }

    async fn write(&mut self, locked: LockedTicketType, new_capacity: i32) -> PurchaseResult<()> {
        let id = locked.id();
        if !self.locked.contains(&id) {
            return Err(PurchaseError::Internal(format!(
                "ticket type {id} is not locked by this transaction"
            )));
        }
        if new_capacity < 0 {
            return Err(PurchaseError::Internal(format!(
                "refusing to store negative capacity {new_capacity} for ticket type {id}"
            )));
        }

        let result = sqlx::query("UPDATE ticket_types SET capacity = $2 WHERE id = $1")
            .bind(id)
            .bind(new_capacity)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() != 1 {
            return Err(PurchaseError::Internal(format!(
                "capacity update for ticket type {id} touched {} rows",
                result.rows_affected()
            )));
        }

        Ok(())
    }

    async fn insert_purchase(&mut self, purchase: NewPurchase) -> PurchaseResult<Purchase> {
        let record = sqlx::query_as::<_, Purchase>(&format!(
            "INSERT INTO purchases (id, user_id, ticket_type_id, quantity, total_price) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {PURCHASE_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(purchase.user_id)
        .bind(purchase.ticket_type_id)
        .bind(purchase.quantity)
        .bind(purchase.total_price)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(record)
    }

    async fn commit(self) -> PurchaseResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
