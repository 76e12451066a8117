//! Transaction coordinator
//!
//! Orchestrates multi-ledger operations as all-or-nothing units and checks
//! the caller's capability exactly once per operation.

mod admin;
mod model;
mod purchase;
mod reports;
mod resets;
mod topup;

pub use model::*;

use std::sync::Arc;
use std::time::Duration;

use crate::auth::password::DEFAULT_COST;
use crate::catalog::Catalog;
use crate::config::Config;
use crate::events::EventBus;
use crate::locks::KeyedLocks;
use crate::promo::PromoEngine;
use crate::receipt::{OcrEngine, ReceiptClassifier};
use crate::stock::StockLedger;
use crate::store::LedgerStore;
use crate::topup::{SpamGate, SpamPolicy};
use crate::users::{BalanceLedger, UserDirectory};

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub ocr_timeout: Duration,
    pub receipt_hash_capacity: usize,
    pub password_hash_cost: u32,
    pub spam_policy: SpamPolicy,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            ocr_timeout: Duration::from_secs(20),
            receipt_hash_capacity: 10_000,
            password_hash_cost: DEFAULT_COST,
            spam_policy: SpamPolicy::default(),
        }
    }
}

impl CoordinatorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ocr_timeout: config.ocr_timeout,
            receipt_hash_capacity: config.receipt_hash_capacity,
            ..Self::default()
        }
    }
}

#[derive(Clone)]
pub struct TransactionCoordinator {
    store: Arc<LedgerStore>,
    catalog: Arc<Catalog>,
    users: UserDirectory,
    balances: BalanceLedger,
    stock: StockLedger,
    promos: PromoEngine,
    classifier: ReceiptClassifier,
    spam_gate: SpamGate,
    events: EventBus,
}

impl TransactionCoordinator {
    pub fn new(
        store: Arc<LedgerStore>,
        catalog: Arc<Catalog>,
        ocr: Arc<dyn OcrEngine>,
        events: EventBus,
        settings: CoordinatorSettings,
    ) -> Self {
        let users = UserDirectory::new(store.clone()).with_hash_cost(settings.password_hash_cost);
        let balances = BalanceLedger::new(store.clone(), Arc::new(KeyedLocks::new()));
        let stock = StockLedger::new(store.clone(), Arc::new(KeyedLocks::new()));
        let promos = PromoEngine::new(store.clone(), Arc::new(KeyedLocks::new()));
        let classifier = ReceiptClassifier::new(
            store.clone(),
            ocr,
            settings.ocr_timeout,
            settings.receipt_hash_capacity,
        );

        Self {
            store,
            catalog,
            users,
            balances,
            stock,
            promos,
            classifier,
            spam_gate: SpamGate::new(settings.spam_policy),
            events,
        }
    }

    pub fn store(&self) -> &Arc<LedgerStore> {
        &self.store
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn users(&self) -> &UserDirectory {
        &self.users
    }

    pub fn balances(&self) -> &BalanceLedger {
        &self.balances
    }

    pub fn stock(&self) -> &StockLedger {
        &self.stock
    }

    pub fn promos(&self) -> &PromoEngine {
        &self.promos
    }

    pub fn spam_gate(&self) -> &SpamGate {
        &self.spam_gate
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Drop lock entries nobody is using. Returns how many were removed.
    pub async fn evict_idle_locks(&self) -> usize {
        self.balances.locks().evict_idle().await
            + self.stock.locks().evict_idle().await
            + self.promos.locks().evict_idle().await
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::auth::password::MIN_COST;
    use crate::receipt::NoopOcr;
    use crate::store::MemoryBackend;
    use crate::users::{Actor, Role};
    use rust_decimal::Decimal;

    pub struct Harness {
        pub shop: TransactionCoordinator,
        pub backend: Arc<MemoryBackend>,
        pub admin: Actor,
    }

    pub async fn harness_with_ocr(ocr: Arc<dyn OcrEngine>) -> Harness {
        let (store, backend) = LedgerStore::in_memory();
        let shop = TransactionCoordinator::new(
            store,
            Arc::new(Catalog::builtin()),
            ocr,
            EventBus::default(),
            CoordinatorSettings {
                password_hash_cost: MIN_COST,
                ocr_timeout: Duration::from_millis(200),
                ..CoordinatorSettings::default()
            },
        );
        let admin = shop
            .users()
            .create_user("root", "rootpass", Role::Admin)
            .await
            .unwrap()
            .actor();
        Harness {
            shop,
            backend,
            admin,
        }
    }

    pub async fn harness() -> Harness {
        harness_with_ocr(Arc::new(NoopOcr)).await
    }

    impl Harness {
        pub async fn customer(&self, name: &str, balance: Decimal) -> Actor {
            let user = self
                .shop
                .users()
                .create_user(name, "secret", Role::User)
                .await
                .unwrap();
            if balance > Decimal::ZERO {
                self.shop.balances().credit(user.id, balance).await.unwrap();
            }
            user.actor()
        }
    }
}
