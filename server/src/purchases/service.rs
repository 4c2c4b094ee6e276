use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::ledger::{InventoryLedger, LedgerTransaction};
use crate::models::{NewPurchase, Purchase, PurchaseFilter, TicketType};
use crate::purchases::error::{PurchaseError, PurchaseResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurchaseSettings {
    /// Upper bound on one attempt, from opening the transaction to commit.
    pub attempt_timeout: Duration,
    /// Attempts made when storage reports transient contention. At least 1.
    pub max_attempts: u32,
    /// Base delay between attempts, multiplied by the attempt number.
    pub retry_backoff: Duration,
}

impl Default for PurchaseSettings {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(5),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(50),
        }
    }
}

/// Purchase transactor plus the read operations over purchases.
pub struct PurchaseService<L: InventoryLedger> {
    ledger: Arc<L>,
    settings: PurchaseSettings,
}

impl<L: InventoryLedger> Clone for PurchaseService<L> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
            settings: self.settings,
        }
    }
}

impl<L: InventoryLedger> PurchaseService<L> {
    pub fn new(ledger: L, settings: PurchaseSettings) -> Self {
        Self {
            ledger: Arc::new(ledger),
            settings,
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Buy `quantity` tickets of one ticket type for `user`.
    ///
    /// Either the capacity decrement and the purchase record are both
    /// committed, or neither is. Transient contention is retried up to
    /// `max_attempts` times before `TryAgain` is returned.
    pub async fn purchase(
        &self,
        user: &AuthUser,
        ticket_type_id: Uuid,
        quantity: i64,
    ) -> PurchaseResult<Purchase> {
        let quantity = validate_quantity(quantity)?;
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.attempt_purchase(user.id, ticket_type_id, quantity).await {
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    warn!(
                        user_id = %user.id,
                        ticket_type_id = %ticket_type_id,
                        attempt,
                        error = %err,
                        "Purchase attempt hit contention, retrying"
                    );
                    tokio::time::sleep(self.settings.retry_backoff * attempt).await;
                    attempt += 1;
                }
                Ok(purchase) => {
                    info!(
                        purchase_id = %purchase.id,
                        user_id = %purchase.user_id,
                        ticket_type_id = %purchase.ticket_type_id,
                        quantity = purchase.quantity,
                        total_price = %purchase.total_price,
                        attempt,
                        "Purchase committed"
                    );
                    return Ok(purchase);
                }
                Err(err) => {
                    debug!(
                        user_id = %user.id,
                        ticket_type_id = %ticket_type_id,
                        attempt,
                        error = %err,
                        "Purchase rejected"
                    );
                    return Err(err);
                }
            }
        }
    }

    /// One attempt. Everything up to the commit runs under the attempt
    /// deadline; if it passes, the staged transaction is dropped and rolls
    /// back. The commit itself is not cut short, and a failed commit is not
    /// retried because its outcome is unknown.
    async fn attempt_purchase(
        &self,
        user_id: Uuid,
        ticket_type_id: Uuid,
        quantity: i32,
    ) -> PurchaseResult<Purchase> {
        let stage = self.stage_purchase(user_id, ticket_type_id, quantity);

        let (tx, purchase) = match tokio::time::timeout(self.settings.attempt_timeout, stage).await
        {
            Ok(staged) => staged?,
            Err(_) => {
                return Err(PurchaseError::TryAgain(
                    "purchase did not complete in time".to_string(),
                ))
            }
        };

        tx.commit().await.map_err(|err| {
            error!(
                purchase_id = %purchase.id,
                ticket_type_id = %ticket_type_id,
                error = %err,
                "Purchase commit failed, outcome unknown"
            );
            PurchaseError::Internal(format!("commit of purchase {} failed: {}", purchase.id, err))
        })?;

        Ok(purchase)
    }

    /// Lock, check, price and write inside a fresh transaction, returning it
    /// uncommitted.
    async fn stage_purchase(
        &self,
        user_id: Uuid,
        ticket_type_id: Uuid,
        quantity: i32,
    ) -> PurchaseResult<(L::Transaction, Purchase)> {
        let mut tx = self.ledger.begin().await?;

        let locked = tx.lock_and_read(ticket_type_id).await?;
        let available = locked.capacity();
        if quantity > available {
            return Err(PurchaseError::InsufficientInventory {
                requested: quantity,
                available,
            });
        }

        let total_price = total_price(locked.price(), quantity)?;
        tx.write(locked, available - quantity).await?;

        let purchase = tx
            .insert_purchase(NewPurchase {
                user_id,
                ticket_type_id,
                quantity,
                total_price,
            })
            .await?;

        Ok((tx, purchase))
    }

    /// Purchases visible to `user`, newest first.
    pub async fn list_purchases(&self, user: &AuthUser) -> PurchaseResult<Vec<Purchase>> {
        let filter = if user.can_view_all_purchases() {
            PurchaseFilter::all()
        } else {
            PurchaseFilter::for_user(user.id)
        };

        self.ledger.purchases(filter).await
    }

    /// A single purchase. Purchases the caller may not see are reported as
    /// missing.
    pub async fn get_purchase(&self, user: &AuthUser, id: Uuid) -> PurchaseResult<Purchase> {
        match self.ledger.purchase(id).await? {
            Some(purchase) if user.can_view_purchase_of(purchase.user_id) => Ok(purchase),
            _ => Err(PurchaseError::PurchaseNotFound(id)),
        }
    }

    pub async fn get_ticket_type(&self, id: Uuid) -> PurchaseResult<TicketType> {
        self.ledger
            .ticket_type(id)
            .await?
            .ok_or(PurchaseError::NotFound(id))
    }
}

fn validate_quantity(quantity: i64) -> PurchaseResult<i32> {
    if quantity <= 0 {
        return Err(PurchaseError::InvalidInput(
            "Quantity must be greater than zero".to_string(),
        ));
    }

    i32::try_from(quantity)
        .map_err(|_| PurchaseError::InvalidInput(format!("Quantity {quantity} is too large")))
}

/// Largest total the `purchases.total_price` column (`NUMERIC(12, 2)`) holds.
const MAX_TOTAL_PRICE: Decimal = Decimal::from_parts(3_567_587_327, 232, 0, false, 2);

fn total_price(unit_price: Decimal, quantity: i32) -> PurchaseResult<Decimal> {
    unit_price
        .checked_mul(Decimal::from(quantity))
        .filter(|total| *total <= MAX_TOTAL_PRICE)
        .ok_or_else(|| PurchaseError::InvalidInput("Total price is out of range".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryInventoryLedger;
    use std::str::FromStr;

    fn settings() -> PurchaseSettings {
        PurchaseSettings {
            attempt_timeout: Duration::from_secs(5),
            max_attempts: 1,
            retry_backoff: Duration::from_millis(10),
        }
    }

    async fn service_with(
        price: &str,
        capacity: i32,
        lock_timeout: Duration,
        settings: PurchaseSettings,
    ) -> (PurchaseService<InMemoryInventoryLedger>, TicketType) {
        let ledger = InMemoryInventoryLedger::new(lock_timeout);
        let ticket_type = TicketType::new(
            Uuid::new_v4(),
            "General Admission",
            Decimal::from_str(price).unwrap(),
            capacity,
        );
        ledger.insert_ticket_type(ticket_type.clone()).await;
        (PurchaseService::new(ledger, settings), ticket_type)
    }

    async fn capacity_of(service: &PurchaseService<InMemoryInventoryLedger>, id: Uuid) -> i32 {
        service.get_ticket_type(id).await.unwrap().capacity
    }

    #[tokio::test]
    async fn test_purchase_decrements_capacity_and_prices_exactly() {
        let (service, ticket_type) =
            service_with("25.00", 10, Duration::from_secs(1), settings()).await;
        let user = AuthUser::customer(Uuid::new_v4());

        let purchase = service.purchase(&user, ticket_type.id, 4).await.unwrap();

        assert_eq!(purchase.quantity, 4);
        assert_eq!(purchase.total_price, Decimal::from_str("100.00").unwrap());
        assert_eq!(purchase.user_id, user.id);
        assert_eq!(purchase.ticket_type_id, ticket_type.id);
        assert_eq!(capacity_of(&service, ticket_type.id).await, 6);
    }

    #[tokio::test]
    async fn test_decimal_price_has_no_rounding_drift() {
        let (service, ticket_type) =
            service_with("19.99", 10, Duration::from_secs(1), settings()).await;
        let user = AuthUser::customer(Uuid::new_v4());

        let purchase = service.purchase(&user, ticket_type.id, 3).await.unwrap();
        assert_eq!(purchase.total_price, Decimal::from_str("59.97").unwrap());
        assert_eq!(purchase.total_price.to_string(), "59.97");
    }

    #[tokio::test]
    async fn test_non_positive_quantity_is_invalid_input() {
        let (service, ticket_type) =
            service_with("10.00", 5, Duration::from_secs(1), settings()).await;
        let user = AuthUser::customer(Uuid::new_v4());

        for quantity in [0, -1] {
            let result = service.purchase(&user, ticket_type.id, quantity).await;
            assert!(matches!(result, Err(PurchaseError::InvalidInput(_))));
        }

        let result = service
            .purchase(&user, ticket_type.id, i64::from(i32::MAX) + 1)
            .await;
        assert!(matches!(result, Err(PurchaseError::InvalidInput(_))));

        assert_eq!(capacity_of(&service, ticket_type.id).await, 5);
        assert!(service.list_purchases(&user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_ticket_type_is_not_found() {
        let (service, ticket_type) =
            service_with("10.00", 5, Duration::from_secs(1), settings()).await;
        let user = AuthUser::customer(Uuid::new_v4());
        let missing = Uuid::new_v4();

        let result = service.purchase(&user, missing, 1).await;
        assert!(matches!(result, Err(PurchaseError::NotFound(id)) if id == missing));
        assert_eq!(capacity_of(&service, ticket_type.id).await, 5);
    }

    #[tokio::test]
    async fn test_insufficient_inventory_leaves_no_trace() {
        let (service, ticket_type) =
            service_with("10.00", 2, Duration::from_secs(1), settings()).await;
        let user = AuthUser::customer(Uuid::new_v4());

        let result = service.purchase(&user, ticket_type.id, 3).await;
        assert!(matches!(
            result,
            Err(PurchaseError::InsufficientInventory {
                requested: 3,
                available: 2
            })
        ));
        assert_eq!(capacity_of(&service, ticket_type.id).await, 2);
        assert!(service.list_purchases(&user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exact_remaining_capacity_can_be_bought() {
        let (service, ticket_type) =
            service_with("10.00", 3, Duration::from_secs(1), settings()).await;
        let user = AuthUser::customer(Uuid::new_v4());

        service.purchase(&user, ticket_type.id, 3).await.unwrap();
        assert_eq!(capacity_of(&service, ticket_type.id).await, 0);

        let result = service.purchase(&user, ticket_type.id, 1).await;
        assert!(matches!(
            result,
            Err(PurchaseError::InsufficientInventory { available: 0, .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_two_concurrent_threes_against_five() {
        let (service, ticket_type) =
            service_with("10.00", 5, Duration::from_secs(2), settings()).await;
        let ticket_type_id = ticket_type.id;

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let service = service.clone();
                let user = AuthUser::customer(Uuid::new_v4());
                tokio::spawn(async move { service.purchase(&user, ticket_type_id, 3).await })
            })
            .collect();

        let mut succeeded = 0;
        let mut insufficient = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(PurchaseError::InsufficientInventory { .. }) => insufficient += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(succeeded, 1);
        assert_eq!(insufficient, 1);
        assert_eq!(capacity_of(&service, ticket_type.id).await, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_no_oversell_under_heavy_concurrency() {
        let capacity = 50;
        let (service, ticket_type) =
            service_with("12.50", capacity, Duration::from_secs(10), settings()).await;
        let ticket_type_id = ticket_type.id;

        let handles: Vec<_> = (0..200)
            .map(|i| {
                let service = service.clone();
                let user = AuthUser::customer(Uuid::new_v4());
                let quantity = (i % 4) + 1;
                tokio::spawn(async move { service.purchase(&user, ticket_type_id, quantity).await })
            })
            .collect();

        let mut sold = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(purchase) => sold += purchase.quantity,
                Err(PurchaseError::InsufficientInventory { .. }) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        let remaining = capacity_of(&service, ticket_type.id).await;
        assert!(sold <= capacity);
        assert_eq!(remaining, capacity - sold);

        let staff = AuthUser::staff(Uuid::new_v4());
        let recorded: i32 = service
            .list_purchases(&staff)
            .await
            .unwrap()
            .iter()
            .map(|p| p.quantity)
            .sum();
        assert_eq!(recorded, sold);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_lock_on_one_ticket_type_does_not_block_another() {
        let (service, blocked) =
            service_with("10.00", 5, Duration::from_secs(5), settings()).await;
        let free = TicketType::new(blocked.event_id, "VIP", Decimal::new(5000, 2), 5);
        service.ledger().insert_ticket_type(free.clone()).await;

        let mut holder = service.ledger().begin().await.unwrap();
        let _locked = holder.lock_and_read(blocked.id).await.unwrap();

        let waiting = {
            let service = service.clone();
            let user = AuthUser::customer(Uuid::new_v4());
            let blocked_id = blocked.id;
            tokio::spawn(async move { service.purchase(&user, blocked_id, 1).await })
        };

        let user = AuthUser::customer(Uuid::new_v4());
        let purchase = tokio::time::timeout(
            Duration::from_millis(500),
            service.purchase(&user, free.id, 2),
        )
        .await
        .expect("purchase on an unlocked ticket type should not wait")
        .unwrap();
        assert_eq!(purchase.total_price, Decimal::from_str("100.00").unwrap());
        assert!(!waiting.is_finished());

        drop(holder);
        let purchase = waiting.await.unwrap().unwrap();
        assert_eq!(purchase.ticket_type_id, blocked.id);
        assert_eq!(capacity_of(&service, blocked.id).await, 4);
    }

    #[tokio::test]
    async fn test_lock_timeout_is_try_again_and_changes_nothing() {
        let (service, ticket_type) =
            service_with("10.00", 5, Duration::from_millis(50), settings()).await;

        let mut holder = service.ledger().begin().await.unwrap();
        let _locked = holder.lock_and_read(ticket_type.id).await.unwrap();

        let user = AuthUser::customer(Uuid::new_v4());
        let result = service.purchase(&user, ticket_type.id, 1).await;
        assert!(matches!(result, Err(PurchaseError::TryAgain(_))));

        drop(holder);
        assert_eq!(capacity_of(&service, ticket_type.id).await, 5);
        assert!(service.list_purchases(&user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_attempt_deadline_rolls_back() {
        let settings = PurchaseSettings {
            attempt_timeout: Duration::from_millis(50),
            ..settings()
        };
        let (service, ticket_type) =
            service_with("10.00", 5, Duration::from_secs(10), settings).await;

        let mut holder = service.ledger().begin().await.unwrap();
        let _locked = holder.lock_and_read(ticket_type.id).await.unwrap();

        let user = AuthUser::customer(Uuid::new_v4());
        let result = service.purchase(&user, ticket_type.id, 1).await;
        assert!(matches!(result, Err(PurchaseError::TryAgain(_))));

        drop(holder);
        assert_eq!(capacity_of(&service, ticket_type.id).await, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_transient_contention_is_retried() {
        let settings = PurchaseSettings {
            attempt_timeout: Duration::from_secs(5),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(50),
        };
        let (service, ticket_type) =
            service_with("10.00", 5, Duration::from_millis(200), settings).await;

        let mut holder = service.ledger().begin().await.unwrap();
        let _locked = holder.lock_and_read(ticket_type.id).await.unwrap();
        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            drop(holder);
        });

        let user = AuthUser::customer(Uuid::new_v4());
        let purchase = service.purchase(&user, ticket_type.id, 2).await.unwrap();
        release.await.unwrap();

        assert_eq!(purchase.quantity, 2);
        assert_eq!(capacity_of(&service, ticket_type.id).await, 3);
    }

    #[tokio::test]
    async fn test_listing_respects_staff_capability() {
        let (service, ticket_type) =
            service_with("10.00", 10, Duration::from_secs(1), settings()).await;
        let alice = AuthUser::customer(Uuid::new_v4());
        let bob = AuthUser::customer(Uuid::new_v4());
        let staff = AuthUser::staff(Uuid::new_v4());

        let first = service.purchase(&alice, ticket_type.id, 1).await.unwrap();
        let second = service.purchase(&alice, ticket_type.id, 2).await.unwrap();
        let bobs = service.purchase(&bob, ticket_type.id, 1).await.unwrap();

        let mine = service.list_purchases(&alice).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|p| p.user_id == alice.id));
        assert!(mine[0].created_at >= mine[1].created_at);

        assert_eq!(service.list_purchases(&staff).await.unwrap().len(), 3);

        assert_eq!(service.get_purchase(&alice, first.id).await.unwrap(), first);
        assert_eq!(service.get_purchase(&staff, second.id).await.unwrap(), second);
        assert!(matches!(
            service.get_purchase(&alice, bobs.id).await,
            Err(PurchaseError::PurchaseNotFound(_))
        ));
    }

    /// Wraps the in-memory ledger with a commit that is slow, or that
    /// applies its changes and then reports a failure, as a dropped
    /// connection after `COMMIT` would.
    struct UnreliableCommitLedger {
        inner: InMemoryInventoryLedger,
        commit_delay: Duration,
        fail_after_commit: bool,
    }

    struct UnreliableCommitTransaction {
        inner: crate::ledger::InMemoryTransaction,
        commit_delay: Duration,
        fail_after_commit: bool,
    }

    #[async_trait::async_trait]
    impl InventoryLedger for UnreliableCommitLedger {
        type Transaction = UnreliableCommitTransaction;

        async fn begin(&self) -> PurchaseResult<UnreliableCommitTransaction> {
            Ok(UnreliableCommitTransaction {
                inner: self.inner.begin().await?,
                commit_delay: self.commit_delay,
                fail_after_commit: self.fail_after_commit,
            })
        }

        async fn ticket_type(&self, id: Uuid) -> PurchaseResult<Option<TicketType>> {
            self.inner.ticket_type(id).await
        }

        async fn purchases(&self, filter: PurchaseFilter) -> PurchaseResult<Vec<Purchase>> {
            self.inner.purchases(filter).await
        }

        async fn purchase(&self, id: Uuid) -> PurchaseResult<Option<Purchase>> {
            self.inner.purchase(id).await
        }
    }

    #[async_trait::async_trait]
    impl LedgerTransaction for UnreliableCommitTransaction {
        async fn lock_and_read(
            &mut self,
            ticket_type_id: Uuid,
        ) -> PurchaseResult<crate::ledger::LockedTicketType> {
            self.inner.lock_and_read(ticket_type_id).await
        }

        async fn write(
            &mut self,
            locked: crate::ledger::LockedTicketType,
            new_capacity: i32,
        ) -> PurchaseResult<()> {
            self.inner.write(locked, new_capacity).await
        }

        async fn insert_purchase(&mut self, purchase: NewPurchase) -> PurchaseResult<Purchase> {
            self.inner.insert_purchase(purchase).await
        }

        async fn commit(self) -> PurchaseResult<()> {
            tokio::time::sleep(self.commit_delay).await;
            self.inner.commit().await?;
            if self.fail_after_commit {
                return Err(PurchaseError::TryAgain("connection reset".to_string()));
            }
            Ok(())
        }
    }

    async fn unreliable_service(
        commit_delay: Duration,
        fail_after_commit: bool,
    ) -> (PurchaseService<UnreliableCommitLedger>, TicketType) {
        let inner = InMemoryInventoryLedger::new(Duration::from_secs(1));
        let ticket_type = TicketType::new(Uuid::new_v4(), "General", Decimal::new(1000, 2), 5);
        inner.insert_ticket_type(ticket_type.clone()).await;

        let ledger = UnreliableCommitLedger {
            inner,
            commit_delay,
            fail_after_commit,
        };
        let settings = PurchaseSettings {
            attempt_timeout: Duration::from_millis(50),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(10),
        };
        (PurchaseService::new(ledger, settings), ticket_type)
    }

    #[tokio::test]
    async fn test_slow_commit_is_not_cut_short_or_repeated() {
        let (service, ticket_type) = unreliable_service(Duration::from_millis(150), false).await;
        let user = AuthUser::customer(Uuid::new_v4());

        let purchase = service.purchase(&user, ticket_type.id, 2).await.unwrap();

        let stored = service.get_ticket_type(ticket_type.id).await.unwrap();
        assert_eq!(stored.capacity, 3);
        assert_eq!(service.list_purchases(&user).await.unwrap(), vec![purchase]);
    }

    #[tokio::test]
    async fn test_failed_commit_is_not_retried() {
        let (service, ticket_type) = unreliable_service(Duration::ZERO, true).await;
        let user = AuthUser::customer(Uuid::new_v4());

        let result = service.purchase(&user, ticket_type.id, 2).await;
        assert!(matches!(result, Err(PurchaseError::Internal(_))));

        let stored = service.get_ticket_type(ticket_type.id).await.unwrap();
        assert_eq!(stored.capacity, 3);
        assert_eq!(service.list_purchases(&user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_total_beyond_stored_precision_is_rejected() {
        let (service, ticket_type) =
            service_with("99999999.99", 1000, Duration::from_secs(1), settings()).await;
        let user = AuthUser::customer(Uuid::new_v4());

        let purchase = service.purchase(&user, ticket_type.id, 100).await.unwrap();
        assert_eq!(purchase.total_price, Decimal::from_str("9999999999.00").unwrap());

        let result = service.purchase(&user, ticket_type.id, 101).await;
        assert!(matches!(result, Err(PurchaseError::InvalidInput(_))));
        assert_eq!(capacity_of(&service, ticket_type.id).await, 900);
    }

    #[test]
    fn test_total_price_overflow_is_rejected() {
        assert!(total_price(Decimal::MAX, 2).is_err());
        assert_eq!(MAX_TOTAL_PRICE, Decimal::from_str("9999999999.99").unwrap());
        assert_eq!(
            total_price(Decimal::from_str("0.10").unwrap(), 3).unwrap(),
            Decimal::from_str("0.30").unwrap()
        );
    }
}
