//! Top-up submission and review
//!
//! PENDING -> APPROVED (exactly one credit) or PENDING -> REJECTED. A second
//! decision on the same request is refused with `AlreadyProcessed`.

use rust_decimal::Decimal;

use crate::coordinator::{TopupDecisionOutcome, TransactionCoordinator};
use crate::error::{ShopError, ShopResult};
use crate::events::ShopEvent;
use crate::receipt::hash_image;
use crate::topup::{TopupDecision, TopupReceipt, TopupRequest, TopupStats, TopupStatus};
use crate::users::{Actor, Capability};

impl TransactionCoordinator {
    /// Open a top-up request from a payment proof image
    pub async fn submit_topup(
        &self,
        actor: Actor,
        method: &str,
        image: &[u8],
        proof_ref: Option<String>,
    ) -> ShopResult<TopupReceipt> {
        actor.require(Capability::SubmitTopup)?;
        let user_id = actor.user_id;

        let method = self
            .catalog
            .payment_method(method)
            .map(|m| m.key.clone())
            .ok_or_else(|| ShopError::validation(format!("Unknown payment method '{}'", method)))?;
        if image.is_empty() {
            return Err(ShopError::validation("Payment proof image is empty"));
        }

        if let Err(rejection) = self.spam_gate.check(user_id).await {
            tracing::warn!(
                user_id,
                reason = rejection.reason(),
                retry_after_secs = rejection.retry_after_secs(),
                "Top-up rejected by spam gate"
            );
            return Err(ShopError::RateLimited(rejection));
        }

        let proof_ref = proof_ref
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| format!("sha256:{}", hash_image(image)));

        let request = self
            .store
            .topups
            .update(move |book| Ok(book.open(user_id, method, proof_ref)))
            .await?;

        let analysis = self.classifier.analyze(image, user_id, request.id).await?;
        let classification = analysis.classification;
        let flagged = classification
            .is_flagged()
            .then(|| (analysis.found_keywords.clone(), analysis.duplicate_of.clone()));

        let topup_id = request.id;
        self.store
            .topups
            .update(move |book| book.attach_analysis(topup_id, analysis))
            .await?;

        tracing::info!(
            topup_id,
            user_id,
            method = %request.method,
            classification = %classification,
            "Top-up submitted"
        );

        self.events.publish(ShopEvent::TopupSubmitted {
            topup_id,
            user_id,
            method: request.method.clone(),
            classification,
        });
        if let Some((found_keywords, duplicate_of)) = flagged {
            self.events.publish(ShopEvent::ReceiptFlagged {
                topup_id,
                user_id,
                classification,
                found_keywords,
                duplicate_of,
            });
        }

        Ok(TopupReceipt {
            topup_id,
            classification,
            user_message: classification.user_message().to_string(),
        })
    }

    /// Apply an admin verdict to a PENDING request
    pub async fn decide_topup(
        &self,
        actor: Actor,
        topup_id: u64,
        decision: TopupDecision,
    ) -> ShopResult<TopupDecisionOutcome> {
        actor.require(Capability::ReviewTopups)?;
        if let TopupDecision::Approve { amount } = &decision {
            if *amount <= Decimal::ZERO {
                return Err(ShopError::InvalidAmount(*amount));
            }
        }

        let user_id = self
            .store
            .topups
            .view(|book| book.get(topup_id).map(|r| r.user_id))
            .await?
            .ok_or_else(|| ShopError::not_found(format!("Top-up #{}", topup_id)))?;

        let _user_guard = self.balances.locks().lock(&user_id).await;
        // A request whose owner is gone cannot be credited
        self.balances.query(user_id).await?;

        let admin_id = actor.user_id;
        let verdict = decision.clone();
        let request = self
            .store
            .topups
            .update(move |book| book.decide(topup_id, &verdict, admin_id))
            .await?;

        match decision {
            TopupDecision::Approve { amount } => {
                let new_balance = match self.balances.credit_locked(user_id, amount).await {
                    Ok(balance) => balance,
                    Err(err) => {
                        tracing::error!(
                            topup_id,
                            user_id,
                            amount = %amount,
                            error = %err,
                            "Top-up marked approved but credit failed, manual reconciliation required"
                        );
                        return Err(ShopError::Reconciliation(format!(
                            "top-up #{} approved without credit: {}",
                            topup_id, err
                        )));
                    }
                };

                tracing::info!(topup_id, user_id, admin_id, amount = %amount, "Top-up approved");
                self.events.publish(ShopEvent::TopupApproved {
                    topup_id,
                    user_id,
                    amount,
                    new_balance,
                });
                Ok(TopupDecisionOutcome {
                    request,
                    new_balance: Some(new_balance),
                })
            }
            TopupDecision::Reject { reason } => {
                tracing::info!(topup_id, user_id, admin_id, reason = ?reason, "Top-up rejected");
                self.events.publish(ShopEvent::TopupRejected {
                    topup_id,
                    user_id,
                    reason,
                });
                Ok(TopupDecisionOutcome {
                    request,
                    new_balance: None,
                })
            }
        }
    }

    pub async fn approve_topup(
        &self,
        actor: Actor,
        topup_id: u64,
        amount: Decimal,
    ) -> ShopResult<TopupDecisionOutcome> {
        self.decide_topup(actor, topup_id, TopupDecision::Approve { amount })
            .await
    }

    pub async fn reject_topup(
        &self,
        actor: Actor,
        topup_id: u64,
        reason: Option<String>,
    ) -> ShopResult<TopupDecisionOutcome> {
        self.decide_topup(actor, topup_id, TopupDecision::Reject { reason })
            .await
    }

    /// All requests, newest first, optionally filtered by status
    pub async fn list_topups(
        &self,
        actor: Actor,
        status: Option<TopupStatus>,
    ) -> ShopResult<Vec<TopupRequest>> {
        actor.require(Capability::ReviewTopups)?;
        self.store
            .topups
            .view(|book| {
                let mut requests: Vec<TopupRequest> = book
                    .requests
                    .iter()
                    .filter(|r| status.map_or(true, |s| r.status == s))
                    .cloned()
                    .collect();
                requests.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at).then(b.id.cmp(&a.id)));
                requests
            })
            .await
    }

    /// Review queue, oldest first
    pub async fn pending_topups(&self, actor: Actor) -> ShopResult<Vec<TopupRequest>> {
        actor.require(Capability::ReviewTopups)?;
        self.store
            .topups
            .view(|book| {
                let mut pending: Vec<TopupRequest> = book
                    .requests
                    .iter()
                    .filter(|r| r.status == TopupStatus::Pending)
                    .cloned()
                    .collect();
                pending.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at).then(a.id.cmp(&b.id)));
                pending
            })
            .await
    }

    pub async fn topup_stats(&self, actor: Actor) -> ShopResult<TopupStats> {
        actor.require(Capability::ReviewTopups)?;
        self.store.topups.view(|book| book.stats()).await
    }

    /// A user's own requests, or anyone's for reviewers
    pub async fn user_topups(&self, actor: Actor, user_id: u64) -> ShopResult<Vec<TopupRequest>> {
        if actor.user_id != user_id {
            actor.require(Capability::ReviewTopups)?;
        }
        self.store
            .topups
            .view(|book| {
                book.requests
                    .iter()
                    .filter(|r| r.user_id == user_id)
                    .rev()
                    .cloned()
                    .collect()
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::test_support::{harness, harness_with_ocr};
    use crate::receipt::{Classification, OcrEngine};
    use crate::topup::SpamRejection;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct FixedOcr(&'static str);

    #[async_trait]
    impl OcrEngine for FixedOcr {
        async fn extract_text(&self, _image: &[u8]) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn test_submit_then_approve_credits_once() {
        let h = harness().await;
        let user = h.customer("payer", Decimal::ZERO).await;
        let mut events = h.shop.events().subscribe();

        let receipt = h
            .shop
            .submit_topup(user, "paypal", b"receipt-1", None)
            .await
            .unwrap();
        assert_eq!(receipt.classification, Classification::Normal);
        assert_eq!(events.recv().await.unwrap().kind(), "topup_submitted");

        let outcome = h
            .shop
            .approve_topup(h.admin, receipt.topup_id, Decimal::new(2500, 2))
            .await
            .unwrap();
        assert_eq!(outcome.request.status, TopupStatus::Approved);
        assert_eq!(outcome.request.processed_by, Some(h.admin.user_id));
        assert_eq!(outcome.new_balance, Some(Decimal::new(2500, 2)));
        assert_eq!(events.recv().await.unwrap().kind(), "topup_approved");

        let err = h
            .shop
            .approve_topup(h.admin, receipt.topup_id, Decimal::new(2500, 2))
            .await
            .unwrap_err();
        assert!(matches!(err, ShopError::AlreadyProcessed { .. }));
        assert_eq!(
            h.shop.balances().query(user.user_id).await.unwrap(),
            Decimal::new(2500, 2)
        );

        let stats = h.shop.topup_stats(h.admin).await.unwrap();
        assert_eq!(stats.approved_count, 1);
        assert_eq!(stats.total_credited, Decimal::new(2500, 2));
        assert_eq!(stats.by_method["PAYPAL"].count, 1);
    }

    #[tokio::test]
    async fn test_concurrent_approvals_credit_exactly_once() {
        let h = harness().await;
        let user = h.customer("payer", Decimal::ZERO).await;
        let receipt = h.shop.submit_topup(user, "ZELLE", b"img", None).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let shop = h.shop.clone();
            let admin = h.admin;
            handles.push(tokio::spawn(async move {
                shop.approve_topup(admin, receipt.topup_id, Decimal::TEN).await
            }));
        }
        let mut approved = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => approved += 1,
                Err(ShopError::AlreadyProcessed { .. }) => {}
                Err(other) => panic!("unexpected error {:?}", other),
            }
        }
        assert_eq!(approved, 1);
        assert_eq!(h.shop.balances().query(user.user_id).await.unwrap(), Decimal::TEN);
    }

    #[tokio::test]
    async fn test_reject_then_approve_is_already_processed() {
        let h = harness().await;
        let user = h.customer("payer", Decimal::ZERO).await;
        let receipt = h.shop.submit_topup(user, "BINANCE", b"img", None).await.unwrap();

        let outcome = h
            .shop
            .reject_topup(h.admin, receipt.topup_id, Some("blurry".into()))
            .await
            .unwrap();
        assert_eq!(outcome.request.status, TopupStatus::Rejected);
        assert_eq!(outcome.request.rejection_reason.as_deref(), Some("blurry"));
        assert!(outcome.new_balance.is_none());

        let err = h
            .shop
            .approve_topup(h.admin, receipt.topup_id, Decimal::ONE)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ShopError::AlreadyProcessed {
                topup_id: receipt.topup_id,
                status: TopupStatus::Rejected
            }
        );
    }

    #[tokio::test]
    async fn test_non_positive_approval_amount() {
        let h = harness().await;
        let user = h.customer("payer", Decimal::ZERO).await;
        let receipt = h.shop.submit_topup(user, "ZELLE", b"img", None).await.unwrap();
        let err = h
            .shop
            .approve_topup(h.admin, receipt.topup_id, Decimal::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err, ShopError::InvalidAmount(Decimal::ZERO));
        assert_eq!(h.shop.pending_topups(h.admin).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_customers_cannot_review() {
        let h = harness().await;
        let user = h.customer("payer", Decimal::ZERO).await;
        let receipt = h.shop.submit_topup(user, "ZELLE", b"img", None).await.unwrap();
        assert!(matches!(
            h.shop.approve_topup(user, receipt.topup_id, Decimal::TEN).await,
            Err(ShopError::Forbidden(_))
        ));
        assert!(matches!(
            h.shop.list_topups(user, None).await,
            Err(ShopError::Forbidden(_))
        ));
        assert_eq!(h.shop.user_topups(user, user.user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_spam_gate_cooldown() {
        let h = harness().await;
        let user = h.customer("payer", Decimal::ZERO).await;
        h.shop.submit_topup(user, "ZELLE", b"one", None).await.unwrap();

        let err = h.shop.submit_topup(user, "ZELLE", b"two", None).await.unwrap_err();
        assert!(matches!(
            err,
            ShopError::RateLimited(SpamRejection::Cooldown { .. })
        ));
        // rejected attempts create no request
        assert_eq!(h.shop.user_topups(user, user.user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_method_and_empty_image() {
        let h = harness().await;
        let user = h.customer("payer", Decimal::ZERO).await;
        assert!(matches!(
            h.shop.submit_topup(user, "CASH", b"img", None).await,
            Err(ShopError::Validation(_))
        ));
        assert!(matches!(
            h.shop.submit_topup(user, "ZELLE", b"", None).await,
            Err(ShopError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_receipt_is_fraud_and_flagged() {
        let h = harness().await;
        let first = h.customer("first", Decimal::ZERO).await;
        let second = h.customer("second", Decimal::ZERO).await;
        let mut events = h.shop.events().subscribe();

        let original = h.shop.submit_topup(first, "ZELLE", b"same", None).await.unwrap();
        let copy = h.shop.submit_topup(second, "ZELLE", b"same", None).await.unwrap();
        assert_eq!(copy.classification, Classification::Fraud);

        let mut flagged = None;
        while let Ok(event) = events.try_recv() {
            if let ShopEvent::ReceiptFlagged { duplicate_of, .. } = event {
                flagged = duplicate_of;
            }
        }
        let first_seen = flagged.unwrap();
        assert_eq!(first_seen.topup_id, original.topup_id);
        assert_eq!(first_seen.user_id, first.user_id);

        let requests = h.shop.list_topups(h.admin, Some(TopupStatus::Pending)).await.unwrap();
        assert_eq!(requests[0].id, copy.topup_id);
        assert_eq!(requests[0].classification(), Some(Classification::Fraud));
        assert!(requests[0].proof_ref.starts_with("sha256:"));
    }

    #[tokio::test]
    async fn test_keyword_hits_classify_receipt() {
        let h = harness_with_ocr(Arc::new(FixedOcr("Payment declined and refunded"))).await;
        let user = h.customer("payer", Decimal::ZERO).await;
        let receipt = h
            .shop
            .submit_topup(user, "MEXICO_OXXO", b"img", Some("file-123".into()))
            .await
            .unwrap();
        assert_eq!(receipt.classification, Classification::Fraud);
        assert_eq!(receipt.user_message, Classification::Fraud.user_message());

        let pending = h.shop.pending_topups(h.admin).await.unwrap();
        assert_eq!(pending[0].proof_ref, "file-123");
    }

    #[tokio::test]
    async fn test_pending_queue_is_fifo() {
        let h = harness().await;
        let a = h.customer("alpha", Decimal::ZERO).await;
        let b = h.customer("bravo", Decimal::ZERO).await;
        let first = h.shop.submit_topup(a, "ZELLE", b"a", None).await.unwrap();
        let second = h.shop.submit_topup(b, "ZELLE", b"b", None).await.unwrap();

        let pending = h.shop.pending_topups(h.admin).await.unwrap();
        let ids: Vec<u64> = pending.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![first.topup_id, second.topup_id]);

        let newest_first = h.shop.list_topups(h.admin, None).await.unwrap();
        assert_eq!(newest_first[0].id, second.topup_id);
    }
}
