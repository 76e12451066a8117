//! License key generation

use rand::distributions::Uniform;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{ShopError, ShopResult};

const ALNUM_UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const ALNUM_LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const DIGITS: &[u8] = b"0123456789";
const HEX_UPPER: &[u8] = b"0123456789ABCDEF";

/// Shape of the keys a product dispenses
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeyFormat {
    /// 16 uppercase alphanumerics
    #[default]
    Alnum16,
    /// 10 digits
    Numeric10,
    /// 10 uppercase hex digits
    Hex10,
    /// `PPP-xxxxxxxx-xxxx` with a product prefix
    Segmented,
}

fn sample<R: Rng>(rng: &mut R, alphabet: &[u8], len: usize) -> String {
    let dist = Uniform::from(0..alphabet.len());
    (0..len)
        .map(|_| alphabet[rng.sample(dist)] as char)
        .collect()
}

/// Three-letter uppercase prefix taken from the product name
fn prefix_for(product: &str) -> String {
    let mut prefix: String = product
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(3)
        .map(|c| c.to_ascii_uppercase())
        .collect();
    while prefix.len() < 3 {
        prefix.push('X');
    }
    prefix
}

pub fn generate_key<R: Rng>(rng: &mut R, format: KeyFormat, product: &str) -> String {
    match format {
        KeyFormat::Alnum16 => sample(rng, ALNUM_UPPER, 16),
        KeyFormat::Numeric10 => sample(rng, DIGITS, 10),
        KeyFormat::Hex10 => sample(rng, HEX_UPPER, 10),
        KeyFormat::Segmented => format!(
            "{}-{}-{}",
            prefix_for(product),
            sample(rng, ALNUM_LOWER, 8),
            sample(rng, ALNUM_LOWER, 4)
        ),
    }
}

/// Generate `count` keys that collide neither with `existing` nor each other.
///
/// Regeneration is bounded; a keyspace too crowded to satisfy the request
/// yields `Conflict`.
pub fn generate_unique_keys(
    format: KeyFormat,
    product: &str,
    count: usize,
    existing: &HashSet<String>,
) -> ShopResult<Vec<String>> {
    let mut rng = rand::thread_rng();
    collect_unique(count, existing, || generate_key(&mut rng, format, product))
}

fn collect_unique(
    count: usize,
    existing: &HashSet<String>,
    mut next_key: impl FnMut() -> String,
) -> ShopResult<Vec<String>> {
    let mut seen: HashSet<String> = HashSet::with_capacity(count);
    let mut keys = Vec::with_capacity(count);
    let max_attempts = count.saturating_mul(10).saturating_add(100);
    let mut attempts = 0;

    while keys.len() < count {
        if attempts >= max_attempts {
            return Err(ShopError::Conflict(format!(
                "Could only generate {} of {} unique keys",
                keys.len(),
                count
            )));
        }
        attempts += 1;

        let key = next_key();
        if existing.contains(&key) || !seen.insert(key.clone()) {
            tracing::debug!("Generated key collided, regenerating");
            continue;
        }
        keys.push(key);
    }

    Ok(keys)
}
