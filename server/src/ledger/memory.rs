use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use super::{InventoryLedger, LedgerTransaction, LockedTicketType};
use crate::models::{NewPurchase, Purchase, PurchaseFilter, TicketType};
use crate::purchases::{PurchaseError, PurchaseResult};

type Row = Arc<Mutex<TicketType>>;

/// In-memory ledger for development and tests.
///
/// Every ticket type sits behind its own async mutex, which plays the role of
/// the row lock: transactions on different ticket types never contend.
/// Unlocked reads of a ticket type wait for an in-flight transaction on that
/// row to finish.
#[derive(Debug, Clone)]
pub struct InMemoryInventoryLedger {
    ticket_types: Arc<RwLock<HashMap<Uuid, Row>>>,
    purchases: Arc<RwLock<Vec<Purchase>>>,
    lock_timeout: Duration,
}

impl InMemoryInventoryLedger {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            ticket_types: Arc::new(RwLock::new(HashMap::new())),
            purchases: Arc::new(RwLock::new(Vec::new())),
            lock_timeout,
        }
    }

    /// Register a ticket type, as the event-management side would.
    pub async fn insert_ticket_type(&self, ticket_type: TicketType) {
        let mut ticket_types = self.ticket_types.write().await;
        ticket_types.insert(ticket_type.id, Arc::new(Mutex::new(ticket_type)));
    }

    async fn row(&self, id: Uuid) -> Option<Row> {
        self.ticket_types.read().await.get(&id).cloned()
    }
}

impl Default for InMemoryInventoryLedger {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl InventoryLedger for InMemoryInventoryLedger {
    type Transaction = InMemoryTransaction;

    async fn begin(&self) -> PurchaseResult<InMemoryTransaction> {
        Ok(InMemoryTransaction {
            ledger: self.clone(),
            locked: HashMap::new(),
            staged_capacity: HashMap::new(),
            staged_purchases: Vec::new(),
        })
    }

    async fn ticket_type(&self, id: Uuid) -> PurchaseResult<Option<TicketType>> {
        match self.row(id).await {
            Some(row) => {
                let guard = row.lock().await;
                Ok(Some(TicketType::clone(&guard)))
            }
            None => Ok(None),
        }
    }

    async fn purchases(&self, filter: PurchaseFilter) -> PurchaseResult<Vec<Purchase>> {
        let purchases = self.purchases.read().await;

        let mut result: Vec<Purchase> = purchases
            .iter()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();

        result.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(result)
    }

    async fn purchase(&self, id: Uuid) -> PurchaseResult<Option<Purchase>> {
        let purchases = self.purchases.read().await;
        Ok(purchases.iter().find(|p| p.id == id).cloned())
    }
}

/// Staged changes plus the row guards taken so far. Nothing reaches the
/// shared state until [`LedgerTransaction::commit`].
pub struct InMemoryTransaction {
    ledger: InMemoryInventoryLedger,
    locked: HashMap<Uuid, OwnedMutexGuard<TicketType>>,
    staged_capacity: HashMap<Uuid, i32>,
    staged_purchases: Vec<Purchase>,
}

impl InMemoryTransaction {
    fn snapshot(&self, id: Uuid) -> Option<TicketType> {
        let guard = self.locked.get(&id)?;
        let mut ticket_type = TicketType::clone(guard);
        if let Some(capacity) = self.staged_capacity.get(&id) {
            ticket_type.capacity = *capacity;
        }
        Some(ticket_type)
    }
}

#[async_trait]
impl LedgerTransaction for InMemoryTransaction {
    async fn lock_and_read(&mut self, ticket_type_id: Uuid) -> PurchaseResult<LockedTicketType> {
        if let Some(ticket_type) = self.snapshot(ticket_type_id) {
            return Ok(LockedTicketType::new(ticket_type));
        }

        let row = self
            .ledger
            .row(ticket_type_id)
            .await
            .ok_or(PurchaseError::NotFound(ticket_type_id))?;

        let guard = tokio::time::timeout(self.ledger.lock_timeout, row.lock_owned())
            .await
            .map_err(|_| PurchaseError::TryAgain("lock wait timed out".to_string()))?;

        let ticket_type = TicketType::clone(&guard);
        self.locked.insert(ticket_type_id, guard);
        Ok(LockedTicketType::new(ticket_type))
    }

    async fn write(&mut self, locked: LockedTicketType, new_capacity: i32) -> PurchaseResult<()> {
        let id = locked.id();
        if !self.locked.contains_key(&id) {
            return Err(PurchaseError::Internal(format!(
                "ticket type {id} is not locked by this transaction"
            )));
        }
        if new_capacity < 0 {
            return Err(PurchaseError::Internal(format!(
                "refusing to store negative capacity {new_capacity} for ticket type {id}"
            )));
        }

        self.staged_capacity.insert(id, new_capacity);
        Ok(())
    }

    async fn insert_purchase(&mut self, purchase: NewPurchase) -> PurchaseResult<Purchase> {
        if self.ledger.row(purchase.ticket_type_id).await.is_none() {
            return Err(PurchaseError::NotFound(purchase.ticket_type_id));
        }

        let record = Purchase {
            id: Uuid::new_v4(),
            user_id: purchase.user_id,
            ticket_type_id: purchase.ticket_type_id,
            quantity: purchase.quantity,
            total_price: purchase.total_price,
            created_at: Utc::now(),
        };

        self.staged_purchases.push(record.clone());
        Ok(record)
    }

    async fn commit(mut self) -> PurchaseResult<()> {
        // Every await happens before the first staged change is applied, so
        // a commit dropped mid-way leaves the shared state untouched.
        let mut purchases = self.ledger.purchases.write().await;

        for (id, capacity) in self.staged_capacity.drain() {
            if let Some(guard) = self.locked.get_mut(&id) {
                guard.capacity = capacity;
            }
        }
        purchases.append(&mut self.staged_purchases);
        drop(purchases);

        // Row guards are released when `self` drops here.
        Ok(())
    }
}
