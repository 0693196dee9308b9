use async_trait::async_trait;
use image::{imageops, Rgb, RgbImage};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::cache::TileCache;
use super::source::Provider;
use crate::core::config::FetchConfig;
use crate::core::constants::{BLANK_TILE_RGB, FAILED_TILE_RGB, TILE_SIZE};
use crate::core::geo::TileKey;
use crate::{MapError, Result};

/// One network request issued by the tile source
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub url: String,
    /// The tile being fetched; `None` for whole static images
    pub tile: Option<TileKey>,
}

/// Anything that can turn a request into encoded image bytes.
///
/// Failures are reported as errors; retrying and placeholder substitution
/// happen in [`TileSource`].
#[async_trait]
pub trait TileFetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>>;
}

/// Fetches over HTTP with reqwest
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpTileFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

#[cfg(feature = "http")]
impl HttpTileFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self {
            client,
            timeout: config.request_timeout(),
        })
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl TileFetcher for HttpTileFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(&request.url)
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MapError::Fetch(format!(
                "HTTP {} for {}",
                response.status(),
                request.url
            )));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

/// Bounded retry with linearly growing backoff.
///
/// Attempt `n` (0-based) that fails waits `base + step * n` before the next
/// one; the last failure is returned without waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            step: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Policy for a provider's retry count under the fetch backoff settings
    pub fn for_provider(provider: &Provider, config: &FetchConfig) -> Self {
        Self {
            max_attempts: provider.retries + 1,
            base_delay: Duration::from_millis(config.backoff_base_ms),
            step: Duration::from_millis(config.backoff_step_ms),
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay + self.step * attempt
    }

    /// Runs `op` until it succeeds or the attempts are used up
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt + 1 >= attempts => return Err(e),
                Err(e) => {
                    log::debug!("{} failed on attempt {}: {}", label, attempt + 1, e);
                    tokio::time::sleep(self.delay_for(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Out-of-band counters for one provider's tile fetches
#[derive(Debug, Default)]
pub struct FetchStats {
    cache_hits: AtomicUsize,
    downloaded: AtomicUsize,
    failed: AtomicUsize,
    blank_tiles: AtomicUsize,
}

/// Point-in-time copy of [`FetchStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStatsSnapshot {
    pub cache_hits: usize,
    pub downloaded: usize,
    pub failed: usize,
    pub blank_tiles: usize,
}

impl fmt::Display for FetchStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "downloaded={} cache_hits={} failed={} blank={}",
            self.downloaded, self.cache_hits, self.failed, self.blank_tiles
        )
    }
}

impl FetchStats {
    pub fn snapshot(&self) -> FetchStatsSnapshot {
        FetchStatsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            downloaded: self.downloaded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            blank_tiles: self.blank_tiles.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.cache_hits.store(0, Ordering::Relaxed);
        self.downloaded.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.blank_tiles.store(0, Ordering::Relaxed);
    }
}

/// Flat tile of the given color
pub fn placeholder_tile(rgb: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(TILE_SIZE, TILE_SIZE, Rgb(rgb))
}

/// Resolves tiles for the stitcher: wraps x, short-circuits off-world rows,
/// consults the cache, fetches with retries and never fails.
pub struct TileSource {
    fetcher: Arc<dyn TileFetcher>,
    cache: Arc<dyn TileCache>,
    config: FetchConfig,
    stats: FetchStats,
    /// Rotates subdomains across requests
    counter: AtomicUsize,
}

impl TileSource {
    pub fn new(fetcher: Arc<dyn TileFetcher>, cache: Arc<dyn TileCache>, config: FetchConfig) -> Self {
        Self {
            fetcher,
            cache,
            config,
            stats: FetchStats::default(),
            counter: AtomicUsize::new(0),
        }
    }

    /// Tile source fetching over HTTP
    #[cfg(feature = "http")]
    pub fn http(cache: Arc<dyn TileCache>, config: FetchConfig) -> Result<Self> {
        let fetcher = HttpTileFetcher::new(&config)?;
        Ok(Self::new(Arc::new(fetcher), cache, config))
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<dyn TileCache> {
        &self.cache
    }

    pub fn stats(&self) -> FetchStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Returns the 256x256 RGB tile at raw indices `(x, y)`.
    ///
    /// Off-world rows give the blank placeholder without touching the
    /// fetcher; exhausted retries give the failure placeholder.
    pub async fn tile(&self, provider: &Provider, zoom: u8, x: i64, y: i64) -> RgbImage {
        let ext = provider.normalized_ext();
        let Some(key) = TileKey::wrapped(&provider.id, &ext, zoom, x, y) else {
            self.stats.blank_tiles.fetch_add(1, Ordering::Relaxed);
            return placeholder_tile(BLANK_TILE_RGB);
        };

        if let Some(bytes) = self.cache.get(&key) {
            match decode_tile(&bytes) {
                Ok(tile) => {
                    self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                    return tile;
                }
                Err(e) => log::warn!("discarding unreadable cached tile {}: {}", key, e),
            }
        }

        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let request = match provider.tile_url(&key, counter) {
            Ok(url) => FetchRequest {
                url,
                tile: Some(key.clone()),
            },
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                log::warn!("tile fetch failed: {} -> {}", key, e);
                return placeholder_tile(FAILED_TILE_RGB);
            }
        };

        let policy = RetryPolicy::for_provider(provider, &self.config);
        let label = key.to_string();
        let fetcher = &self.fetcher;
        let request = &request;
        let result = policy
            .run(&label, move |_| async move {
                let bytes = fetcher.fetch(request).await?;
                let tile = decode_tile(&bytes)?;
                Ok((bytes, tile))
            })
            .await;

        match result {
            Ok((bytes, tile)) => {
                if let Err(e) = self.cache.put(key.clone(), bytes) {
                    log::warn!("could not cache tile {}: {}", key, e);
                }
                self.stats.downloaded.fetch_add(1, Ordering::Relaxed);
                if provider.delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(provider.delay_ms)).await;
                }
                tile
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                log::warn!("tile fetch failed: {} -> {}", key, e);
                placeholder_tile(FAILED_TILE_RGB)
            }
        }
    }

    /// Fetches a whole pre-rendered image with the provider's retry policy.
    ///
    /// Unlike tiles there is no placeholder: a failure is returned.
    pub async fn fetch_image(&self, provider: &Provider, url: String) -> Result<RgbImage> {
        let request = &FetchRequest { url, tile: None };
        let fetcher = &self.fetcher;
        let policy = RetryPolicy::for_provider(provider, &self.config);
        policy
            .run(&provider.id, move |_| async move {
                let bytes = fetcher.fetch(request).await?;
                Ok(image::load_from_memory(&bytes)?.to_rgb8())
            })
            .await
    }
}

/// Decodes tile bytes to RGB, scaling anything that is not 256x256
pub fn decode_tile(bytes: &[u8]) -> Result<RgbImage> {
    let tile = image::load_from_memory(bytes)?.to_rgb8();
    if tile.dimensions() == (TILE_SIZE, TILE_SIZE) {
        return Ok(tile);
    }
    if tile.width() == 0 || tile.height() == 0 {
        return Err(MapError::Fetch("empty tile image".into()));
    }

    log::debug!(
        "rescaling {}x{} tile to {}",
        tile.width(),
        tile.height(),
        TILE_SIZE
    );
    Ok(imageops::resize(
        &tile,
        TILE_SIZE,
        TILE_SIZE,
        imageops::FilterType::Triangle,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiles::cache::MemoryTileCache;
    use image::ImageOutputFormat;
    use std::io::Cursor;
    use std::sync::Mutex;

    fn png_bytes(color: [u8; 3], size: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(size, size, Rgb(color));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageOutputFormat::Png).unwrap();
        out.into_inner()
    }

    /// Fails the first `failures` calls, then serves a solid tile
    struct FlakyFetcher {
        failures: usize,
        calls: Mutex<Vec<FetchRequest>>,
    }

    impl FlakyFetcher {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<FetchRequest> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TileFetcher for FlakyFetcher {
        async fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(request.clone());
            if calls.len() <= self.failures {
                return Err(MapError::Fetch("HTTP 503".into()));
            }
            Ok(png_bytes([10, 20, 30], TILE_SIZE))
        }
    }

    fn provider() -> Provider {
        Provider::xyz("mock", "mock://{z}/{x}/{y}")
            .with_delay_ms(0)
            .with_retries(2)
    }

    fn source(fetcher: Arc<FlakyFetcher>) -> TileSource {
        TileSource::new(
            fetcher,
            Arc::new(MemoryTileCache::new(64)),
            FetchConfig::for_testing(),
        )
    }

    #[tokio::test]
    async fn test_off_world_rows_never_reach_the_fetcher() {
        let fetcher = Arc::new(FlakyFetcher::new(0));
        let source = source(fetcher.clone());

        let above = source.tile(&provider(), 2, 1, -1).await;
        let below = source.tile(&provider(), 2, 1, 4).await;

        assert_eq!(above, placeholder_tile(BLANK_TILE_RGB));
        assert_eq!(below, placeholder_tile(BLANK_TILE_RGB));
        assert!(fetcher.calls().is_empty());
        assert_eq!(source.stats().blank_tiles, 2);
    }

    #[tokio::test]
    async fn test_x_wraps_around_the_world() {
        let fetcher = Arc::new(FlakyFetcher::new(0));
        let source = source(fetcher.clone());

        let wrapped = source.tile(&provider(), 3, 8 + 5, 2).await;
        let direct = source.tile(&provider(), 3, 5, 2).await;

        assert_eq!(wrapped, direct);
        let calls = fetcher.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].url, "mock://3/5/2");
        assert_eq!(source.stats().cache_hits, 1);
        assert_eq!(source.stats().downloaded, 1);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let fetcher = Arc::new(FlakyFetcher::new(2));
        let source = source(fetcher.clone());

        let tile = source.tile(&provider(), 4, 3, 3).await;

        assert_eq!(tile.get_pixel(0, 0), &Rgb([10, 20, 30]));
        assert_eq!(fetcher.calls().len(), 3);
        assert_eq!(source.stats().failed, 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_give_placeholder() {
        let fetcher = Arc::new(FlakyFetcher::new(usize::MAX));
        let source = source(fetcher.clone());

        let tile = source.tile(&provider(), 4, 3, 3).await;

        assert_eq!(tile, placeholder_tile(FAILED_TILE_RGB));
        assert_eq!(fetcher.calls().len(), 3);
        let stats = source.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.downloaded, 0);

        source.reset_stats();
        assert_eq!(source.stats(), FetchStatsSnapshot::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_policy_backs_off_linearly() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            step: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));

        let start = tokio::time::Instant::now();
        let result: Result<()> = policy
            .run("always failing", |_| async { Err(MapError::Fetch("nope".into())) })
            .await;

        assert!(result.is_err());
        // Two waits between three attempts, none after the last
        assert_eq!(start.elapsed(), Duration::from_millis(1500));
    }

    #[test]
    fn test_decode_tile_rescales_retina_tiles() {
        let tile = decode_tile(&png_bytes([1, 2, 3], 512)).unwrap();
        assert_eq!(tile.dimensions(), (TILE_SIZE, TILE_SIZE));
        assert_eq!(tile.get_pixel(100, 100), &Rgb([1, 2, 3]));

        assert!(decode_tile(b"not an image").is_err());
    }
}
