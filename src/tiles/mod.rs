pub mod cache;
pub mod loader;
pub mod source;

// Re-exports for convenience
pub use cache::{cache_for, CacheMode, DiskTileCache, MemoryTileCache, PurgingDiskCache, TileCache};
pub use loader::{FetchRequest, FetchStatsSnapshot, RetryPolicy, TileFetcher, TileSource};
pub use source::{Provider, ProviderKind, ProviderRegistry};
