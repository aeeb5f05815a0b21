pub mod database;
pub mod error;

pub use database::{quote_identifier, Database, RawWriter, TypedRow, RESERVED_TABLES};
pub use error::{Result, StoreError};
