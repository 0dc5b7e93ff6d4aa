//! Loading transformed rows into the warehouse
//!
//! Both paths stage a CSV file in the bucket first and then run a single
//! transactional script, so a failed statement leaves the target exactly as
//! it was.

pub mod sql;
pub mod swap;
pub mod upsert;

pub use sql::QualifiedName;
pub use swap::SwapLoader;
pub use upsert::UpsertLoader;
