//! Chat conversation state
//!
//! Each linked chat account walks an explicit state machine. Inputs that
//! have no transition from the current state are rejected instead of being
//! silently ignored.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{ShopError, ShopResult};
use crate::stock::BucketKey;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum PurchaseStep {
    /// Choosing a product inside `category`
    Selecting { category: String },
    Confirming {
        bucket: BucketKey,
        promo: Option<String>,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum TopupStep {
    ChoosingMethod,
    AwaitingProof { method: String },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(tag = "flow", rename_all = "snake_case")]
pub enum ChatFlow {
    #[default]
    Idle,
    Purchasing(PurchaseStep),
    ToppingUp(TopupStep),
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatInput {
    StartPurchase { category: String },
    SelectBucket { bucket: BucketKey },
    EnterPromo { code: String },
    ConfirmPurchase,
    StartTopup,
    ChooseMethod { method: String },
    ProofSubmitted,
    Cancel,
}

impl ChatInput {
    fn name(&self) -> &'static str {
        match self {
            ChatInput::StartPurchase { .. } => "start_purchase",
            ChatInput::SelectBucket { .. } => "select_bucket",
            ChatInput::EnterPromo { .. } => "enter_promo",
            ChatInput::ConfirmPurchase => "confirm_purchase",
            ChatInput::StartTopup => "start_topup",
            ChatInput::ChooseMethod { .. } => "choose_method",
            ChatInput::ProofSubmitted => "proof_submitted",
            ChatInput::Cancel => "cancel",
        }
    }
}

impl ChatFlow {
    pub fn name(&self) -> &'static str {
        match self {
            ChatFlow::Idle => "idle",
            ChatFlow::Purchasing(PurchaseStep::Selecting { .. }) => "purchasing/selecting",
            ChatFlow::Purchasing(PurchaseStep::Confirming { .. }) => "purchasing/confirming",
            ChatFlow::ToppingUp(TopupStep::ChoosingMethod) => "topping_up/choosing_method",
            ChatFlow::ToppingUp(TopupStep::AwaitingProof { .. }) => "topping_up/awaiting_proof",
        }
    }

    /// Next state for `input`, or `Validation` when no transition exists.
    ///
    /// Confirming a purchase and submitting a proof both return to `Idle`;
    /// the caller performs the actual coordinator operation.
    pub fn apply(self, input: ChatInput) -> ShopResult<ChatFlow> {
        use ChatFlow::*;

        let next = match (self, input) {
            (_, ChatInput::Cancel) => Idle,

            (Idle, ChatInput::StartPurchase { category }) => {
                Purchasing(PurchaseStep::Selecting { category })
            }
            (Idle, ChatInput::StartTopup) => ToppingUp(TopupStep::ChoosingMethod),

            (Purchasing(PurchaseStep::Selecting { category }), ChatInput::SelectBucket { bucket })
                if bucket.category == category =>
            {
                Purchasing(PurchaseStep::Confirming {
                    bucket,
                    promo: None,
                })
            }
            (Purchasing(PurchaseStep::Confirming { bucket, .. }), ChatInput::EnterPromo { code }) => {
                let code = code.trim().to_uppercase();
                Purchasing(PurchaseStep::Confirming {
                    bucket,
                    promo: (!code.is_empty()).then_some(code),
                })
            }
            (Purchasing(PurchaseStep::Confirming { .. }), ChatInput::ConfirmPurchase) => Idle,

            (ToppingUp(TopupStep::ChoosingMethod), ChatInput::ChooseMethod { method }) => {
                ToppingUp(TopupStep::AwaitingProof { method })
            }
            (ToppingUp(TopupStep::AwaitingProof { .. }), ChatInput::ProofSubmitted) => Idle,

            (state, input) => {
                return Err(ShopError::validation(format!(
                    "Unexpected '{}' while {}",
                    input.name(),
                    state.name()
                )))
            }
        };
        Ok(next)
    }
}

/// Per-account flows, keyed by external chat account id
#[derive(Clone, Default)]
pub struct SessionRegistry {
    flows: Arc<RwLock<HashMap<i64, ChatFlow>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn current(&self, external_id: i64) -> ChatFlow {
        self.flows
            .read()
            .await
            .get(&external_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Apply `input` to the account's flow. A rejected input leaves the
    /// flow unchanged.
    pub async fn advance(&self, external_id: i64, input: ChatInput) -> ShopResult<ChatFlow> {
        let mut flows = self.flows.write().await;
        let current = flows.get(&external_id).cloned().unwrap_or_default();
        let next = current.apply(input)?;
        if next == ChatFlow::Idle {
            flows.remove(&external_id);
        } else {
            flows.insert(external_id, next.clone());
        }
        Ok(next)
    }

    pub async fn reset(&self, external_id: i64) {
        self.flows.write().await.remove(&external_id);
    }

    /// Accounts currently in the middle of a flow
    pub async fn active(&self) -> usize {
        self.flows.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn week() -> BucketKey {
        BucketKey::new("Android", "Flourite", "7days")
    }

    #[test]
    fn test_purchase_flow_happy_path() {
        let flow = ChatFlow::Idle
            .apply(ChatInput::StartPurchase {
                category: "Android".into(),
            })
            .unwrap()
            .apply(ChatInput::SelectBucket { bucket: week() })
            .unwrap()
            .apply(ChatInput::EnterPromo { code: " save10 ".into() })
            .unwrap();
        assert_eq!(
            flow,
            ChatFlow::Purchasing(PurchaseStep::Confirming {
                bucket: week(),
                promo: Some("SAVE10".into())
            })
        );
        assert_eq!(flow.apply(ChatInput::ConfirmPurchase).unwrap(), ChatFlow::Idle);
    }

    #[test]
    fn test_bucket_from_other_category_is_rejected() {
        let flow = ChatFlow::Purchasing(PurchaseStep::Selecting {
            category: "iOS".into(),
        });
        assert!(matches!(
            flow.apply(ChatInput::SelectBucket { bucket: week() }),
            Err(ShopError::Validation(_))
        ));
    }

    #[test]
    fn test_undefined_transitions_are_errors() {
        assert!(ChatFlow::Idle.apply(ChatInput::ConfirmPurchase).is_err());
        assert!(ChatFlow::Idle.apply(ChatInput::ProofSubmitted).is_err());
        assert!(ChatFlow::ToppingUp(TopupStep::ChoosingMethod)
            .apply(ChatInput::StartPurchase {
                category: "Android".into()
            })
            .is_err());
    }

    #[test]
    fn test_cancel_always_returns_to_idle() {
        let flow = ChatFlow::ToppingUp(TopupStep::AwaitingProof {
            method: "ZELLE".into(),
        });
        assert_eq!(flow.apply(ChatInput::Cancel).unwrap(), ChatFlow::Idle);
    }

    #[test]
    fn test_inputs_deserialize_from_tagged_json() {
        let input: ChatInput = serde_json::from_str(
            r#"{"type":"select_bucket","bucket":{"category":"Android","product":"Flourite","duration":"1day"}}"#,
        )
        .unwrap();
        assert_eq!(
            input,
            ChatInput::SelectBucket {
                bucket: BucketKey::new("Android", "Flourite", "1day")
            }
        );
        let cancel: ChatInput = serde_json::from_str(r#"{"type":"cancel"}"#).unwrap();
        assert_eq!(cancel, ChatInput::Cancel);
    }

    #[tokio::test]
    async fn test_registry_keeps_state_on_rejected_input() {
        let registry = SessionRegistry::new();
        registry.advance(42, ChatInput::StartTopup).await.unwrap();

        assert!(registry.advance(42, ChatInput::ProofSubmitted).await.is_err());
        assert_eq!(
            registry.current(42).await,
            ChatFlow::ToppingUp(TopupStep::ChoosingMethod)
        );

        registry
            .advance(42, ChatInput::ChooseMethod { method: "PAYPAL".into() })
            .await
            .unwrap();
        registry.advance(42, ChatInput::ProofSubmitted).await.unwrap();
        assert_eq!(registry.current(42).await, ChatFlow::Idle);
        assert_eq!(registry.active().await, 0);
    }
}
