//! Key inventory: buckets, dispensing and generation

mod keygen;
mod ledger;
mod model;

pub use keygen::{generate_key, generate_unique_keys, KeyFormat};
pub use ledger::StockLedger;
pub use model::*;
