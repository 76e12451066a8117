//! Product/price catalog and accepted payment methods

use anyhow::Context;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{ShopError, ShopResult};
use crate::stock::{BucketKey, KeyFormat};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Product {
    pub category: String,
    pub product: String,
    #[serde(default)]
    pub key_format: KeyFormat,
    /// duration -> list price
    pub durations: BTreeMap<String, Decimal>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PaymentMethod {
    pub key: String,
    pub title: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Catalog {
    pub products: Vec<Product>,
    pub payment_methods: Vec<PaymentMethod>,
}

impl Catalog {
    /// Read a JSON catalog from disk
    pub async fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read catalog {}", path.display()))?;
        let catalog: Catalog = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid catalog {}", path.display()))?;
        if catalog.products.is_empty() {
            anyhow::bail!("Catalog {} lists no products", path.display());
        }
        Ok(catalog)
    }

    /// Product line shipped with the shop
    pub fn builtin() -> Self {
        fn prices() -> BTreeMap<String, Decimal> {
            [
                ("1day", Decimal::new(300, 2)),
                ("7days", Decimal::new(1000, 2)),
                ("30days", Decimal::new(2000, 2)),
            ]
            .into_iter()
            .map(|(d, p)| (d.to_string(), p))
            .collect()
        }

        let product = |category: &str, product: &str, key_format| Product {
            category: category.to_string(),
            product: product.to_string(),
            key_format,
            durations: prices(),
        };

        let method = |key: &str, title: &str| PaymentMethod {
            key: key.to_string(),
            title: title.to_string(),
        };

        Self {
            products: vec![
                product("Android", "Flourite", KeyFormat::Alnum16),
                product("Android", "DRIP MOBILE", KeyFormat::Numeric10),
                product("iOS", "BRMODS", KeyFormat::Segmented),
            ],
            payment_methods: vec![
                method("ZELLE", "Zelle (USA)"),
                method("PAYPAL", "PayPal Global"),
                method("MEXICO_TRANSFER", "Mexico - Bank transfer"),
                method("MEXICO_OXXO", "Mexico - OXXO"),
                method("REVOLUT", "Revolut"),
                method("ECUADOR", "Ecuador - Pichincha"),
                method("ARGENTINA", "Argentina - Uala"),
                method("BINANCE", "Binance"),
            ],
        }
    }

    pub fn product(&self, category: &str, product: &str) -> Option<&Product> {
        self.products
            .iter()
            .find(|p| p.category.eq_ignore_ascii_case(category) && p.product.eq_ignore_ascii_case(product))
    }

    /// Canonical bucket for user-supplied names, validated against the catalog
    pub fn resolve(&self, category: &str, product: &str, duration: &str) -> ShopResult<BucketKey> {
        let entry = self.product(category, product).ok_or_else(|| {
            ShopError::validation(format!("Unknown product '{} / {}'", category, product))
        })?;
        if !entry.durations.contains_key(duration) {
            let valid: Vec<&str> = entry.durations.keys().map(String::as_str).collect();
            return Err(ShopError::validation(format!(
                "Invalid duration '{}'. Valid: {}",
                duration,
                valid.join(", ")
            )));
        }
        Ok(BucketKey::new(&entry.category, &entry.product, duration))
    }

    pub fn price(&self, bucket: &BucketKey) -> ShopResult<Decimal> {
        self.product(&bucket.category, &bucket.product)
            .and_then(|p| p.durations.get(&bucket.duration))
            .copied()
            .ok_or_else(|| ShopError::validation(format!("No price for {}", bucket)))
    }

    pub fn key_format(&self, category: &str, product: &str) -> KeyFormat {
        self.product(category, product)
            .map(|p| p.key_format)
            .unwrap_or_default()
    }

    pub fn payment_method(&self, key: &str) -> Option<&PaymentMethod> {
        self.payment_methods
            .iter()
            .find(|m| m.key.eq_ignore_ascii_case(key))
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_canonicalizes_names() {
        let catalog = Catalog::builtin();
        let bucket = catalog.resolve("android", "flourite", "7days").unwrap();
        assert_eq!(bucket, BucketKey::new("Android", "Flourite", "7days"));
        assert_eq!(catalog.price(&bucket).unwrap(), Decimal::new(1000, 2));
    }

    #[test]
    fn test_unknown_product_or_duration() {
        let catalog = Catalog::builtin();
        assert!(matches!(
            catalog.resolve("Android", "Nope", "7days"),
            Err(ShopError::Validation(_))
        ));
        assert!(matches!(
            catalog.resolve("Android", "Flourite", "2years"),
            Err(ShopError::Validation(_))
        ));
    }

    #[test]
    fn test_payment_methods_case_insensitive() {
        let catalog = Catalog::builtin();
        assert_eq!(catalog.payment_method("paypal").unwrap().key, "PAYPAL");
        assert!(catalog.payment_method("CASH").is_none());
    }

    #[test]
    fn test_catalog_json_shape() {
        let json = r#"{
            "products": [{"category": "PC", "product": "Hg", "key_format": "hex10",
                          "durations": {"1day": "1.50"}}],
            "payment_methods": [{"key": "BINANCE", "title": "Binance"}]
        }"#;
        let catalog: Catalog = serde_json::from_str(json).unwrap();
        assert_eq!(catalog.key_format("PC", "Hg"), KeyFormat::Hex10);
        assert_eq!(
            catalog.price(&BucketKey::new("PC", "Hg", "1day")).unwrap(),
            Decimal::new(150, 2)
        );
    }

    #[tokio::test]
    async fn test_load_missing_file_is_error() {
        assert!(Catalog::load("/nonexistent/catalog.json").await.is_err());
    }
}
