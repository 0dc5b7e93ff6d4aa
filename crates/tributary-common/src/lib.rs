//! Tributary Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the Tributary sync jobs.
//!
//! # Overview
//!
//! - **Error Handling**: the common error and result types
//! - **Fingerprints**: content hashes used to detect changed records
//! - **Logging**: tracing subscriber setup shared by every binary
//! - **Types**: cursor positions persisted between runs
//!
//! # Example
//!
//! ```no_run
//! use tributary_common::fingerprint::Fingerprint;
//!
//! let fp = Fingerprint::of_fields(["42", "ada@example.com", "t"]);
//! println!("record fingerprint: {}", fp);
//! ```

pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{CommonError, Result};
pub use fingerprint::Fingerprint;
pub use types::{ObjectCursor, RunCursor};
