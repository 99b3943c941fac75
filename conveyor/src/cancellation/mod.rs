//! Cooperative cancellation for pipeline runs.
//!
//! Only the source polls the token; downstream stages stop when their
//! inbound queues close.

mod token;

pub use token::CancellationToken;
