pub mod cache;
pub mod store;

pub use cache::{CacheError, SnapshotCache, DEFAULT_CACHE_FILE};
pub use store::{ensure_select, MemberStore, QueryRow, StoreError};
