//! Key reset requests
//!
//! Customers ask for a dispensed key to be reset on the vendor side. The shop
//! only records the request; staff read the log and act on it.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ShopError, ShopResult};
use crate::stock::BucketKey;

pub const MAX_KEY_LEN: usize = 64;
pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 200;
/// Window counted as "recent" in `ResetStats`
pub const RECENT_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ResetEntry {
    pub id: u64,
    pub user_id: u64,
    pub username: String,
    pub key: String,
    /// Bucket the requester bought the key from, if they did
    pub bucket: Option<BucketKey>,
    pub requested_at: DateTime<Utc>,
}

/// Persisted `reset_log` collection
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ResetLog {
    #[serde(default)]
    pub entries: Vec<ResetEntry>,
}

/// Trimmed key, or a validation error
pub fn normalize_reset_key(key: &str) -> ShopResult<String> {
    let key = key.trim();
    if key.is_empty() || key.chars().count() > MAX_KEY_LEN {
        return Err(ShopError::validation(format!(
            "Key must be between 1 and {} characters",
            MAX_KEY_LEN
        )));
    }
    Ok(key.to_string())
}

impl ResetLog {
    /// Append an entry with the next id
    pub fn record(
        &mut self,
        user_id: u64,
        username: String,
        key: String,
        bucket: Option<BucketKey>,
        now: DateTime<Utc>,
    ) -> ResetEntry {
        let id = self.entries.iter().map(|e| e.id).max().unwrap_or(0) + 1;
        let entry = ResetEntry {
            id,
            user_id,
            username,
            key,
            bucket,
            requested_at: now,
        };
        self.entries.push(entry.clone());
        entry
    }

    /// Newest first, optionally filtered by a case-insensitive username fragment
    pub fn page(&self, query: &ResetListQuery) -> ResetPage {
        let needle = query
            .username
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_lowercase);

        let mut matching: Vec<&ResetEntry> = self
            .entries
            .iter()
            .filter(|e| {
                needle
                    .as_ref()
                    .map_or(true, |n| e.username.to_lowercase().contains(n.as_str()))
            })
            .collect();
        matching.sort_by(|a, b| b.requested_at.cmp(&a.requested_at).then(b.id.cmp(&a.id)));

        let page = query.page.unwrap_or(1).max(1);
        let limit = query
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        let total = matching.len();
        let entries = matching
            .into_iter()
            .skip((page - 1).saturating_mul(limit))
            .take(limit)
            .cloned()
            .collect();

        ResetPage {
            entries,
            page,
            limit,
            total,
            pages: total.div_ceil(limit),
        }
    }

    pub fn stats(&self, now: DateTime<Utc>) -> ResetStats {
        let since = now - Duration::days(RECENT_WINDOW_DAYS);
        let mut stats = ResetStats {
            total: self.entries.len(),
            ..ResetStats::default()
        };
        for entry in &self.entries {
            let product = entry
                .bucket
                .as_ref()
                .map_or("Unknown", |b| b.product.as_str());
            *stats.by_product.entry(product.to_string()).or_default() += 1;
            if entry.requested_at > since {
                stats.recent_count += 1;
            }
        }
        stats
    }
}

#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct ResetStats {
    pub total: usize,
    pub by_product: BTreeMap<String, usize>,
    pub recent_count: usize,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ResetPage {
    pub entries: Vec<ResetEntry>,
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub pages: usize,
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct KeyResetRequest {
    pub key: String,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ResetListQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
    pub username: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_with(names: &[&str]) -> ResetLog {
        let mut log = ResetLog::default();
        let start = Utc::now() - Duration::minutes(names.len() as i64);
        for (i, name) in names.iter().enumerate() {
            log.record(
                i as u64 + 1,
                name.to_string(),
                format!("KEY{}", i),
                None,
                start + Duration::minutes(i as i64),
            );
        }
        log
    }

    #[test]
    fn test_ids_follow_the_highest_existing_id() {
        let mut log = ResetLog::default();
        let now = Utc::now();
        assert_eq!(log.record(1, "a".into(), "K1".into(), None, now).id, 1);
        log.entries[0].id = 7;
        assert_eq!(log.record(1, "a".into(), "K2".into(), None, now).id, 8);
    }

    #[test]
    fn test_key_is_trimmed_and_bounded() {
        assert_eq!(normalize_reset_key("  ABCD1234 ").unwrap(), "ABCD1234");
        assert!(matches!(normalize_reset_key("   "), Err(ShopError::Validation(_))));
        assert!(matches!(
            normalize_reset_key(&"X".repeat(MAX_KEY_LEN + 1)),
            Err(ShopError::Validation(_))
        ));
    }

    #[test]
    fn test_page_filters_sorts_and_paginates() {
        let log = log_with(&["alice", "bob", "Alice2", "carol", "malice"]);

        let page = log.page(&ResetListQuery {
            username: Some("ALICE".into()),
            limit: Some(2),
            ..ResetListQuery::default()
        });
        assert_eq!(page.total, 3);
        assert_eq!(page.pages, 2);
        let names: Vec<&str> = page.entries.iter().map(|e| e.username.as_str()).collect();
        assert_eq!(names, vec!["malice", "Alice2"]);

        let second = log.page(&ResetListQuery {
            username: Some("alice".into()),
            limit: Some(2),
            page: Some(2),
        });
        assert_eq!(second.entries.len(), 1);
        assert_eq!(second.entries[0].username, "alice");

        let past_end = log.page(&ResetListQuery {
            page: Some(9),
            ..ResetListQuery::default()
        });
        assert!(past_end.entries.is_empty());
        assert_eq!(past_end.total, 5);
        assert_eq!(past_end.limit, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_stats_group_by_product_and_count_recent() {
        let mut log = ResetLog::default();
        let now = Utc::now();
        let flourite = BucketKey::new("Android", "Flourite", "30days");
        log.record(1, "a".into(), "K1".into(), Some(flourite.clone()), now);
        log.record(1, "a".into(), "K2".into(), Some(flourite), now - Duration::days(30));
        log.record(2, "b".into(), "K3".into(), None, now);

        let stats = log.stats(now);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_product["Flourite"], 2);
        assert_eq!(stats.by_product["Unknown"], 1);
        assert_eq!(stats.recent_count, 2);
    }
}
