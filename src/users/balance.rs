//! Balance ledger
//!
//! Debit clamps at zero and never refuses on its own. Purchase flows must
//! check `balance >= amount` first, under the same user lock.

use rust_decimal::Decimal;
use std::sync::Arc;

use crate::error::{ShopError, ShopResult};
use crate::locks::KeyedLocks;
use crate::store::LedgerStore;

#[derive(Clone)]
pub struct BalanceLedger {
    store: Arc<LedgerStore>,
    locks: Arc<KeyedLocks<u64>>,
}

fn ensure_positive(amount: Decimal) -> ShopResult<()> {
    if amount <= Decimal::ZERO {
        return Err(ShopError::InvalidAmount(amount));
    }
    Ok(())
}

impl BalanceLedger {
    pub fn new(store: Arc<LedgerStore>, locks: Arc<KeyedLocks<u64>>) -> Self {
        Self { store, locks }
    }

    /// Per-user locks shared with the coordinator
    pub fn locks(&self) -> &Arc<KeyedLocks<u64>> {
        &self.locks
    }

    /// Add `amount` to the user's balance, returning the new balance
    pub async fn credit(&self, user_id: u64, amount: Decimal) -> ShopResult<Decimal> {
        ensure_positive(amount)?;
        let _guard = self.locks.lock(&user_id).await;
        self.credit_locked(user_id, amount).await
    }

    /// Subtract `amount`, flooring at zero
    pub async fn debit(&self, user_id: u64, amount: Decimal) -> ShopResult<Decimal> {
        ensure_positive(amount)?;
        let _guard = self.locks.lock(&user_id).await;
        self.debit_locked(user_id, amount).await
    }

    pub async fn query(&self, user_id: u64) -> ShopResult<Decimal> {
        self.store
            .users
            .view(|users| users.iter().find(|u| u.id == user_id).map(|u| u.balance))
            .await?
            .ok_or_else(|| ShopError::not_found(format!("User #{}", user_id)))
    }

    /// Caller already holds the user lock
    pub(crate) async fn credit_locked(&self, user_id: u64, amount: Decimal) -> ShopResult<Decimal> {
        ensure_positive(amount)?;
        let balance = self
            .store
            .users
            .update(move |users| {
                let user = users
                    .iter_mut()
                    .find(|u| u.id == user_id)
                    .ok_or_else(|| ShopError::not_found(format!("User #{}", user_id)))?;
                user.balance += amount;
                Ok(user.balance)
            })
            .await?;
        tracing::info!(user_id, amount = %amount, balance = %balance, "Balance credited");
        Ok(balance)
    }

    /// Caller already holds the user lock
    pub(crate) async fn debit_locked(&self, user_id: u64, amount: Decimal) -> ShopResult<Decimal> {
        ensure_positive(amount)?;
        let balance = self
            .store
            .users
            .update(move |users| {
                let user = users
                    .iter_mut()
                    .find(|u| u.id == user_id)
                    .ok_or_else(|| ShopError::not_found(format!("User #{}", user_id)))?;
                user.balance = (user.balance - amount).max(Decimal::ZERO);
                Ok(user.balance)
            })
            .await?;
        tracing::info!(user_id, amount = %amount, balance = %balance, "Balance debited");
        Ok(balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::{Role, User};

    async fn ledger_with_user(balance: Decimal) -> BalanceLedger {
        let (store, _) = LedgerStore::in_memory();
        store
            .users
            .update(move |users| {
                let mut user = User::new(1, "alice".into(), "x".into(), Role::User);
                user.balance = balance;
                users.push(user);
                Ok(())
            })
            .await
            .unwrap();
        BalanceLedger::new(store, Arc::new(KeyedLocks::new()))
    }

    #[tokio::test]
    async fn test_credit_adds_exact_amount() {
        let ledger = ledger_with_user(Decimal::ZERO).await;
        let balance = ledger.credit(1, Decimal::new(2500, 2)).await.unwrap();
        assert_eq!(balance, Decimal::new(2500, 2));
        assert_eq!(ledger.query(1).await.unwrap(), Decimal::new(2500, 2));
    }

    #[tokio::test]
    async fn test_non_positive_amounts_rejected() {
        let ledger = ledger_with_user(Decimal::TEN).await;
        assert!(matches!(
            ledger.credit(1, Decimal::ZERO).await,
            Err(ShopError::InvalidAmount(_))
        ));
        assert!(matches!(
            ledger.debit(1, Decimal::new(-5, 0)).await,
            Err(ShopError::InvalidAmount(_))
        ));
        assert_eq!(ledger.query(1).await.unwrap(), Decimal::TEN);
    }

    #[tokio::test]
    async fn test_debit_clamps_at_zero() {
        let ledger = ledger_with_user(Decimal::new(300, 2)).await;
        let balance = ledger.debit(1, Decimal::new(1000, 2)).await.unwrap();
        assert_eq!(balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let ledger = ledger_with_user(Decimal::ZERO).await;
        assert!(matches!(
            ledger.credit(42, Decimal::ONE).await,
            Err(ShopError::NotFound(_))
        ));
        assert!(matches!(ledger.query(42).await, Err(ShopError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_concurrent_debits_never_go_negative() {
        let ledger = ledger_with_user(Decimal::new(500, 2)).await;
        let mut handles = Vec::new();
        for _ in 0..20 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.debit(1, Decimal::new(100, 2)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(ledger.query(1).await.unwrap(), Decimal::ZERO);
    }
}
