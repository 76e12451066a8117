//! Balance top-ups: requests, review state machine and submission gate

mod model;
mod spam_gate;

pub use model::*;
pub use spam_gate::{SpamGate, SpamPolicy, SpamRejection, SpamStats};
