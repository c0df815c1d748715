pub mod cached_data;
pub mod pod_list_cache;

pub use cached_data::CachedData;
pub use pod_list_cache::{CacheStats, PodListCache};
