//! Shared plumbing for the Junction gateway: the error taxonomy, the retry
//! policy, and logging initialization.

pub mod error;
pub mod logging;
pub mod retry;

pub use error::{GatewayError, Result};
pub use retry::RetryPolicy;
