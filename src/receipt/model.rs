//! Receipt analysis models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Terms that make a payment proof look unreliable
pub const SUSPICIOUS_KEYWORDS: &[&str] = &[
    "canceled",
    "cancelled",
    "failed",
    "declined",
    "refunded",
    "reversal",
    "error",
    "chargeback",
    "invalid",
    "review",
    "cancelado",
    "reembolsado",
    "rechazado",
    "pendiente",
    "pending",
    "rejected",
    "fraud",
    "suspicious",
    "dispute",
    "disputed",
    "reversed",
    "void",
    "voided",
];

/// Characters of OCR text kept on the analysis for reviewers
pub const OCR_EXCERPT_CHARS: usize = 500;

/// Advisory label for a payment proof. Never approves or rejects anything.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Classification {
    Normal,
    Suspicious,
    Fraud,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Normal => "NORMAL",
            Classification::Suspicious => "SUSPICIOUS",
            Classification::Fraud => "FRAUD",
        }
    }

    /// Fixed acknowledgement returned to the submitter
    pub fn user_message(&self) -> &'static str {
        match self {
            Classification::Normal => "Receipt received. Sent for manual verification.",
            Classification::Suspicious => {
                "We received your receipt but it shows unusual details. It will be reviewed manually."
            }
            Classification::Fraud => {
                "Your receipt shows inconsistencies. It will go through mandatory review."
            }
        }
    }

    pub fn is_flagged(&self) -> bool {
        !matches!(self, Classification::Normal)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Duplicates are fraud; otherwise two or more keyword hits are fraud and
/// one is suspicious.
pub fn classify(is_duplicate: bool, keyword_matches: usize) -> Classification {
    if is_duplicate || keyword_matches >= 2 {
        Classification::Fraud
    } else if keyword_matches == 1 {
        Classification::Suspicious
    } else {
        Classification::Normal
    }
}

/// Lexicon terms contained in `text`, case-insensitively
pub fn match_keywords(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let lower = text.to_lowercase();
    SUSPICIOUS_KEYWORDS
        .iter()
        .filter(|keyword| lower.contains(*keyword))
        .map(|keyword| keyword.to_string())
        .collect()
}

/// First sighting of a receipt image
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ReceiptHashRecord {
    pub hash: String,
    pub user_id: u64,
    pub topup_id: u64,
    pub timestamp: DateTime<Utc>,
}

/// Bounded, append-only record of seen receipt hashes (oldest evicted first)
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct HashRing(VecDeque<ReceiptHashRecord>);

impl HashRing {
    pub fn find(&self, hash: &str) -> Option<&ReceiptHashRecord> {
        self.0.iter().find(|r| r.hash == hash)
    }

    /// Look up `record.hash`; register it only if unseen.
    ///
    /// Returns the first-seen record when the hash is a duplicate. Existing
    /// metadata is never overwritten.
    pub fn observe(&mut self, record: ReceiptHashRecord, capacity: usize) -> Option<ReceiptHashRecord> {
        if let Some(existing) = self.find(&record.hash) {
            return Some(existing.clone());
        }
        self.0.push_back(record);
        while self.0.len() > capacity.max(1) {
            self.0.pop_front();
        }
        None
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Result of analysing one payment proof
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ReceiptAnalysis {
    pub hash: String,
    pub classification: Classification,
    pub found_keywords: Vec<String>,
    pub is_duplicate: bool,
    pub duplicate_of: Option<ReceiptHashRecord>,
    pub ocr_excerpt: String,
    pub analyzed_at: DateTime<Utc>,
}
