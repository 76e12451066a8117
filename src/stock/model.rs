//! Stock models: bucket keys, the nested stock book and DTOs

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use validator::Validate;

/// (category, product, duration) partition of key inventory
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey {
    pub category: String,
    pub product: String,
    pub duration: String,
}

impl BucketKey {
    pub fn new(
        category: impl Into<String>,
        product: impl Into<String>,
        duration: impl Into<String>,
    ) -> Self {
        Self {
            category: category.into(),
            product: product.into(),
            duration: duration.into(),
        }
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.category, self.product, self.duration)
    }
}

type Durations<T> = BTreeMap<String, T>;
type Products<T> = BTreeMap<String, Durations<T>>;

/// Persisted stock layout: category -> product -> duration -> FIFO queue
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct StockBook(BTreeMap<String, Products<VecDeque<String>>>);

/// Count per bucket, same nesting as the book
pub type StockCounts = BTreeMap<String, Products<usize>>;

impl StockBook {
    pub fn bucket(&self, key: &BucketKey) -> Option<&VecDeque<String>> {
        self.0
            .get(&key.category)?
            .get(&key.product)?
            .get(&key.duration)
    }

    pub fn bucket_mut(&mut self, key: &BucketKey) -> Option<&mut VecDeque<String>> {
        self.0
            .get_mut(&key.category)?
            .get_mut(&key.product)?
            .get_mut(&key.duration)
    }

    /// Bucket for `key`, created empty if absent
    pub fn bucket_entry(&mut self, key: &BucketKey) -> &mut VecDeque<String> {
        self.0
            .entry(key.category.clone())
            .or_default()
            .entry(key.product.clone())
            .or_default()
            .entry(key.duration.clone())
            .or_default()
    }

    pub fn count(&self, key: &BucketKey) -> usize {
        self.bucket(key).map(|b| b.len()).unwrap_or(0)
    }

    /// Durations stocked for a product
    pub fn durations(&self, category: &str, product: &str) -> Vec<String> {
        self.0
            .get(category)
            .and_then(|products| products.get(product))
            .map(|durations| durations.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn counts(&self) -> StockCounts {
        self.0
            .iter()
            .map(|(category, products)| {
                let products = products
                    .iter()
                    .map(|(product, durations)| {
                        let durations = durations
                            .iter()
                            .map(|(duration, keys)| (duration.clone(), keys.len()))
                            .collect();
                        (product.clone(), durations)
                    })
                    .collect();
                (category.clone(), products)
            })
            .collect()
    }

    pub fn total(&self) -> usize {
        self.0
            .values()
            .flat_map(|products| products.values())
            .flat_map(|durations| durations.values())
            .map(|keys| keys.len())
            .sum()
    }
}

// ============================================================================
// Request/Response DTOs
// ============================================================================

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct AddKeysOutcome {
    pub added: usize,
    /// Keys dropped because the bucket already held them
    pub duplicates: usize,
    pub total: usize,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct RemoveOutcome {
    pub removed: usize,
    pub remaining: usize,
}

#[derive(Debug, Serialize)]
pub struct StockSummary {
    pub stock: StockCounts,
    pub total_keys: usize,
}

#[derive(Debug, Deserialize, Validate)]
pub struct GenerateStockRequest {
    #[validate(length(min = 1))]
    pub category: String,
    #[validate(length(min = 1))]
    pub product: String,
    #[validate(length(min = 1))]
    pub duration: String,
    #[validate(range(min = 1, max = 1000))]
    pub count: usize,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ImportKeysRequest {
    #[validate(length(min = 1))]
    pub category: String,
    #[validate(length(min = 1))]
    pub product: String,
    #[validate(length(min = 1))]
    pub duration: String,
    #[validate(length(min = 1))]
    pub keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RemoveStockRequest {
    pub category: String,
    pub product: String,
    pub duration: String,
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct ClearStockRequest {
    pub category: String,
    pub product: String,
    /// Absent or "all" clears every duration of the product
    pub duration: Option<String>,
}
