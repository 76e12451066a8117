//! Receipt classifier: hash, duplicate lookup, OCR and lexicon match

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::error::ShopResult;
use crate::receipt::{
    classify, match_keywords, OcrEngine, ReceiptAnalysis, ReceiptHashRecord, OCR_EXCERPT_CHARS,
};
use crate::store::LedgerStore;

/// Hex-encoded SHA-256 of the raw image bytes
pub fn hash_image(image: &[u8]) -> String {
    hex::encode(Sha256::digest(image))
}

#[derive(Clone)]
pub struct ReceiptClassifier {
    store: Arc<LedgerStore>,
    ocr: Arc<dyn OcrEngine>,
    ocr_timeout: Duration,
    ring_capacity: usize,
}

impl ReceiptClassifier {
    pub fn new(
        store: Arc<LedgerStore>,
        ocr: Arc<dyn OcrEngine>,
        ocr_timeout: Duration,
        ring_capacity: usize,
    ) -> Self {
        Self {
            store,
            ocr,
            ocr_timeout,
            ring_capacity,
        }
    }

    /// Analyse one payment proof.
    ///
    /// Touches no ledger besides the hash ring, so it can run alongside
    /// purchases. OCR failure degrades to empty text.
    pub async fn analyze(
        &self,
        image: &[u8],
        submitter_id: u64,
        topup_id: u64,
    ) -> ShopResult<ReceiptAnalysis> {
        let hash = hash_image(image);

        let record = ReceiptHashRecord {
            hash: hash.clone(),
            user_id: submitter_id,
            topup_id,
            timestamp: Utc::now(),
        };
        let capacity = self.ring_capacity;
        let duplicate_of = self
            .store
            .receipt_hashes
            .update(move |ring| Ok(ring.observe(record, capacity)))
            .await?;

        let text = self.extract_text(image, topup_id).await;
        let found_keywords = match_keywords(&text);
        let is_duplicate = duplicate_of.is_some();
        let classification = classify(is_duplicate, found_keywords.len());

        if classification.is_flagged() {
            tracing::warn!(
                topup_id,
                user_id = submitter_id,
                classification = %classification,
                keywords = ?found_keywords,
                duplicate_of = ?duplicate_of.as_ref().map(|r| r.topup_id),
                "Receipt flagged"
            );
        } else {
            tracing::debug!(topup_id, user_id = submitter_id, "Receipt classified normal");
        }

        Ok(ReceiptAnalysis {
            hash,
            classification,
            found_keywords,
            is_duplicate,
            duplicate_of,
            ocr_excerpt: text.chars().take(OCR_EXCERPT_CHARS).collect(),
            analyzed_at: Utc::now(),
        })
    }

    async fn extract_text(&self, image: &[u8], topup_id: u64) -> String {
        match tokio::time::timeout(self.ocr_timeout, self.ocr.extract_text(image)).await {
            Ok(Ok(text)) => text,
            Ok(Err(err)) => {
                tracing::warn!(topup_id, error = %err, "OCR failed, classifying without text");
                String::new()
            }
            Err(_) => {
                tracing::warn!(
                    topup_id,
                    timeout_secs = self.ocr_timeout.as_secs(),
                    "OCR timed out, classifying without text"
                );
                String::new()
            }
        }
    }
}
