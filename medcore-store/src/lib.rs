pub mod error;
pub mod filter;
pub mod sqlite_store;

pub use error::{Result, StoreError};
pub use filter::{Page, UserFilter, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
pub use sqlite_store::{CatalogEntry, SqliteStore, Verification};
