//! Retry policy: classify failures and decide whether to try again.

mod classify;
mod policy;

pub use classify::{classify, classify_dest_io};
pub use policy::{RetryDecision, RetryPolicy};
