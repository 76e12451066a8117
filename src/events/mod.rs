//! Outbound notifications
//!
//! The core publishes structured events; rendering messages for humans is
//! left to whoever subscribes.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::receipt::{Classification, ReceiptHashRecord};
use crate::stock::BucketKey;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShopEvent {
    PurchaseCompleted {
        purchase_id: u64,
        user_id: u64,
        bucket: BucketKey,
        final_price: Decimal,
        promo_code: Option<String>,
    },
    TopupSubmitted {
        topup_id: u64,
        user_id: u64,
        method: String,
        classification: Classification,
    },
    TopupApproved {
        topup_id: u64,
        user_id: u64,
        amount: Decimal,
        new_balance: Decimal,
    },
    TopupRejected {
        topup_id: u64,
        user_id: u64,
        reason: Option<String>,
    },
    ReceiptFlagged {
        topup_id: u64,
        user_id: u64,
        classification: Classification,
        found_keywords: Vec<String>,
        duplicate_of: Option<ReceiptHashRecord>,
    },
    KeyResetRequested {
        reset_id: u64,
        user_id: u64,
        /// Set when the key was bought by the requester
        bucket: Option<BucketKey>,
    },
}

impl ShopEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ShopEvent::PurchaseCompleted { .. } => "purchase_completed",
            ShopEvent::TopupSubmitted { .. } => "topup_submitted",
            ShopEvent::TopupApproved { .. } => "topup_approved",
            ShopEvent::TopupRejected { .. } => "topup_rejected",
            ShopEvent::ReceiptFlagged { .. } => "receipt_flagged",
            ShopEvent::KeyResetRequested { .. } => "key_reset_requested",
        }
    }

    pub fn user_id(&self) -> u64 {
        match self {
            ShopEvent::PurchaseCompleted { user_id, .. }
            | ShopEvent::TopupSubmitted { user_id, .. }
            | ShopEvent::TopupApproved { user_id, .. }
            | ShopEvent::TopupRejected { user_id, .. }
            | ShopEvent::ReceiptFlagged { user_id, .. }
            | ShopEvent::KeyResetRequested { user_id, .. } => *user_id,
        }
    }
}

/// Fan-out channel for `ShopEvent`s
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ShopEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishing with nobody listening is fine
    pub fn publish(&self, event: ShopEvent) {
        let kind = event.kind();
        match self.tx.send(event) {
            Ok(receivers) => tracing::debug!(event = kind, receivers, "Event published"),
            Err(_) => tracing::debug!(event = kind, "Event dropped, no subscribers"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShopEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
