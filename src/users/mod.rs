//! Users, roles, capabilities and balances

mod balance;
mod model;
mod service;

pub use balance::BalanceLedger;
pub use model::*;
pub use service::UserDirectory;
