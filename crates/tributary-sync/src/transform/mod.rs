//! Normalisation of fetched payloads into warehouse or push shapes

pub mod classify;
pub mod dbt;
pub mod events;
pub mod join;
pub mod profiles;
pub mod table;
pub mod timestamps;

pub use table::{rows_to_csv, CanonicalRow, Table};
pub use timestamps::LocalizedTimestamp;
