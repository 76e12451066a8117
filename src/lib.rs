//! Key shop backend library
//!
//! Transactional core for a license-key shop: stock, balances, promo codes,
//! top-up review with receipt screening, and the HTTP veneer around them.

pub mod auth;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod events;
pub mod handlers;
pub mod locks;
pub mod maintenance;
pub mod middleware;
pub mod promo;
pub mod receipt;
pub mod resets;
pub mod routes;
pub mod session;
pub mod state;
pub mod stock;
pub mod store;
pub mod topup;
pub mod users;
pub mod websocket;
