//! Top-up request models and the review state machine

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ShopError, ShopResult};
use crate::receipt::{Classification, ReceiptAnalysis};

/// PENDING until an admin decides; terminal afterwards
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TopupStatus {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for TopupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TopupStatus::Pending => "pending",
            TopupStatus::Approved => "approved",
            TopupStatus::Rejected => "rejected",
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TopupRequest {
    pub id: u64,
    pub user_id: u64,
    pub method: String,
    /// Opaque handle to the uploaded proof image
    pub proof_ref: String,
    pub status: TopupStatus,
    /// Set only on approval
    pub amount: Option<Decimal>,
    pub submitted_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub processed_by: Option<u64>,
    pub analysis: Option<ReceiptAnalysis>,
    pub rejection_reason: Option<String>,
}

impl TopupRequest {
    pub fn classification(&self) -> Option<Classification> {
        self.analysis.as_ref().map(|a| a.classification)
    }
}

/// Credit applied by an approved top-up
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TopupCredit {
    pub topup_id: u64,
    pub user_id: u64,
    pub amount: Decimal,
    pub method: String,
    pub approved_by: u64,
    pub credited_at: DateTime<Utc>,
}

/// Admin verdict on a pending request
#[derive(Debug, Clone, PartialEq)]
pub enum TopupDecision {
    Approve { amount: Decimal },
    Reject { reason: Option<String> },
}

/// Persisted `topups` collection
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct TopupBook {
    #[serde(default)]
    pub requests: Vec<TopupRequest>,
    #[serde(default)]
    pub history: Vec<TopupCredit>,
}

impl TopupBook {
    pub fn get(&self, topup_id: u64) -> Option<&TopupRequest> {
        self.requests.iter().find(|r| r.id == topup_id)
    }

    /// Create a PENDING request with the next id
    pub fn open(&mut self, user_id: u64, method: String, proof_ref: String) -> TopupRequest {
        let id = self.requests.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        let request = TopupRequest {
            id,
            user_id,
            method,
            proof_ref,
            status: TopupStatus::Pending,
            amount: None,
            submitted_at: Utc::now(),
            processed_at: None,
            processed_by: None,
            analysis: None,
            rejection_reason: None,
        };
        self.requests.push(request.clone());
        request
    }

    pub fn attach_analysis(&mut self, topup_id: u64, analysis: ReceiptAnalysis) -> ShopResult<()> {
        let request = self
            .requests
            .iter_mut()
            .find(|r| r.id == topup_id)
            .ok_or_else(|| ShopError::not_found(format!("Top-up #{}", topup_id)))?;
        request.analysis = Some(analysis);
        Ok(())
    }

    /// Move a PENDING request to its terminal state.
    ///
    /// Approval also appends to the credit history. Any non-PENDING request
    /// yields `AlreadyProcessed`.
    pub fn decide(
        &mut self,
        topup_id: u64,
        decision: &TopupDecision,
        admin_id: u64,
    ) -> ShopResult<TopupRequest> {
        let request = self
            .requests
            .iter_mut()
            .find(|r| r.id == topup_id)
            .ok_or_else(|| ShopError::not_found(format!("Top-up #{}", topup_id)))?;

        if request.status != TopupStatus::Pending {
            return Err(ShopError::AlreadyProcessed {
                topup_id,
                status: request.status,
            });
        }

        let now = Utc::now();
        match decision {
            TopupDecision::Approve { amount } => {
                if *amount <= Decimal::ZERO {
                    return Err(ShopError::InvalidAmount(*amount));
                }
                request.status = TopupStatus::Approved;
                request.amount = Some(*amount);
            }
            TopupDecision::Reject { reason } => {
                request.status = TopupStatus::Rejected;
                request.rejection_reason = reason.clone();
            }
        }
        request.processed_at = Some(now);
        request.processed_by = Some(admin_id);
        let decided = request.clone();

        if let TopupDecision::Approve { amount } = decision {
            self.history.push(TopupCredit {
                topup_id,
                user_id: decided.user_id,
                amount: *amount,
                method: decided.method.clone(),
                approved_by: admin_id,
                credited_at: now,
            });
        }

        Ok(decided)
    }

    pub fn stats(&self) -> TopupStats {
        let mut stats = TopupStats::default();
        for request in &self.requests {
            match request.status {
                TopupStatus::Pending => stats.pending_count += 1,
                TopupStatus::Approved => stats.approved_count += 1,
                TopupStatus::Rejected => stats.rejected_count += 1,
            }
        }
        for credit in &self.history {
            stats.total_credited += credit.amount;
            let entry = stats.by_method.entry(credit.method.clone()).or_default();
            entry.count += 1;
            entry.amount += credit.amount;
        }
        stats
    }
}

#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct MethodTotal {
    pub count: usize,
    pub amount: Decimal,
}

#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct TopupStats {
    pub approved_count: usize,
    pub rejected_count: usize,
    pub pending_count: usize,
    pub total_credited: Decimal,
    pub by_method: BTreeMap<String, MethodTotal>,
}

// ============================================================================
// Request/Response DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SubmitTopupRequest {
    pub method: String,
    /// Base64-encoded proof image
    pub image: String,
    pub proof_ref: Option<String>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct TopupReceipt {
    pub topup_id: u64,
    pub classification: Classification,
    pub user_message: String,
}

#[derive(Debug, Deserialize)]
pub struct ApproveTopupRequest {
    pub amount: Decimal,
}

#[derive(Debug, Deserialize, Default)]
pub struct RejectTopupRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct TopupListQuery {
    pub status: Option<TopupStatus>,
}
