pub mod cache_layer;
pub mod error;
pub mod l1_cache;
pub mod l2_store;

pub use cache_layer::{CacheLayer, CacheStats, DEFAULT_L1_CAPACITY};
pub use error::CacheError;
