pub mod memory;
pub mod persistent;

pub use memory::{CacheMetrics, MemoryCache};
pub use persistent::{CachedPayload, HistoricalIntelligence, PersistentCache, StoredNewsItem};
