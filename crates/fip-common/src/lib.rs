//! Common building blocks for the floating IP controller: errors, retry,
//! label selectors, lease locking and logging

#![deny(missing_docs)]

pub mod error;
pub mod leader_election;
pub mod retry;
pub mod selector;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
