//! Request policies applied by the stateless transports.

pub mod retry;

pub use retry::{RetryConfig, RetryPolicy};
