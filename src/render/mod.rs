//! Render pipeline: stitch or fetch a provider's image for a plan, crop it,
//! draw overlays and hand it to the sinks.

pub mod overlay;
pub mod stitch;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::core::config::RenderConfig;
use crate::core::plan::ViewPlan;
use crate::output::{self, ImageSink, PngSink, Rgb565HeaderSink};
use crate::tiles::cache::cache_for;
use crate::tiles::loader::{FetchStatsSnapshot, TileFetcher, TileSource};
use crate::tiles::source::{Provider, ProviderRegistry};
use crate::{MapError, Result};

use overlay::OverlayRenderer;
use stitch::{stitch, RenderedMap};

/// Files written for one provider
#[derive(Debug, Clone)]
pub struct ProviderOutput {
    pub provider: String,
    /// `(sink kind, path)` pairs, e.g. `("PNG", ".../map.png")`
    pub files: Vec<(&'static str, PathBuf)>,
    pub stats: FetchStatsSnapshot,
}

#[derive(Debug, Clone)]
pub struct ProviderFailure {
    pub provider: String,
    pub error: String,
}

/// Outcome of [`MapRenderer::render_all`]
#[derive(Debug, Clone)]
pub struct RenderReport {
    /// Shared by every output; firmware needs it to place live positions
    pub plan: ViewPlan,
    pub outputs: Vec<ProviderOutput>,
    pub failures: Vec<ProviderFailure>,
}

impl RenderReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn firmware_snippet(&self) -> String {
        output::firmware_snippet(&self.plan)
    }
}

/// Drives renders for one run; owns the tile source and the overlay style
pub struct MapRenderer {
    source: TileSource,
    overlays: OverlayRenderer,
    api_key: Option<String>,
}

impl MapRenderer {
    pub fn new(source: TileSource, overlays: OverlayRenderer) -> Self {
        Self {
            source,
            overlays,
            api_key: None,
        }
    }

    /// Key substituted into `{key}` of static-image providers
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Renderer fetching over HTTP with the configured cache and overlays
    #[cfg(feature = "http")]
    pub fn from_config(config: &RenderConfig) -> Result<Self> {
        let cache = cache_for(&config.cache)?;
        let source = TileSource::http(cache, config.fetch.clone())?;
        Ok(Self::new(source, overlays_for(config)).with_api_key(config.google_maps_key.clone()))
    }

    /// Renderer using `fetcher` instead of the network
    pub fn with_fetcher(config: &RenderConfig, fetcher: Arc<dyn TileFetcher>) -> Result<Self> {
        let cache = cache_for(&config.cache)?;
        let source = TileSource::new(fetcher, cache, config.fetch.clone());
        Ok(Self::new(source, overlays_for(config)).with_api_key(config.google_maps_key.clone()))
    }

    pub fn source(&self) -> &TileSource {
        &self.source
    }

    /// Produces `provider`'s map for `plan`, overlays included.
    ///
    /// Tile providers never fail on individual tiles; static-image
    /// providers fail when their single image cannot be fetched.
    pub async fn render_provider(&self, provider: &Provider, plan: &ViewPlan) -> Result<RenderedMap> {
        let mut map = if provider.is_static() {
            let url = provider.static_url(
                &plan.center(),
                plan.zoom(),
                plan.size(),
                self.api_key.as_deref(),
            )?;
            log::info!("[{}] fetching static image at zoom {}", provider.id, plan.zoom());
            let image = self.source.fetch_image(provider, url).await?;
            RenderedMap::new(image, plan)?
        } else {
            stitch(plan, &self.source, provider).await?.crop(plan)?
        };

        self.overlays.apply(map.image_mut(), plan);
        Ok(map)
    }

    /// Plans once, then renders every selected provider into
    /// `<out_dir>/<provider id>/`.
    ///
    /// A failing provider is reported and the others still render. The
    /// cache is finished once all providers are done.
    pub async fn render_all(&self, config: &RenderConfig) -> Result<RenderReport> {
        config.validate()?;

        let mut registry = ProviderRegistry::builtin();
        for provider in &config.custom_providers {
            registry.register(provider.clone())?;
        }
        let mut providers = registry.select(&config.providers, config.only_no_labels)?;
        if config.providers.is_empty() && self.api_key.is_none() {
            providers.retain(|p| !p.is_static());
        }
        if providers.is_empty() {
            return Err(MapError::InvalidParameter("no providers selected".into()));
        }

        let plan = ViewPlan::new(config.center, config.radius_km, config.width, config.height)?;

        output::ensure_safe_path(&config.out_dir)?;
        fs::create_dir_all(&config.out_dir)?;

        let mut outputs = Vec::with_capacity(providers.len());
        let mut failures = Vec::new();
        for provider in &providers {
            match self.render_to_dir(provider, &plan, config).await {
                Ok(out) => outputs.push(out),
                Err(e) => {
                    log::error!("[{}] render failed: {}", provider.id, e);
                    failures.push(ProviderFailure {
                        provider: provider.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        self.source.cache().finish()?;
        log::info!(
            "rendered {}/{} providers",
            outputs.len(),
            providers.len()
        );

        Ok(RenderReport {
            plan,
            outputs,
            failures,
        })
    }

    async fn render_to_dir(
        &self,
        provider: &Provider,
        plan: &ViewPlan,
        config: &RenderConfig,
    ) -> Result<ProviderOutput> {
        let dir = config.out_dir.join(&provider.id);
        log::info!("--- provider '{}' ---", provider.id);
        log::info!("output folder: {}", dir.display());
        output::prepare_output_dir(&dir, config.wipe_provider_dirs)?;

        self.source.reset_stats();
        let map = self.render_provider(provider, plan).await?;

        let mut sinks: Vec<Box<dyn ImageSink>> =
            vec![Box::new(PngSink::new(dir.join(&config.export.png_name)))];
        if config.export.rgb565_header {
            sinks.push(Box::new(Rgb565HeaderSink::new(
                dir.join(&config.export.header_name),
            )));
        }

        let files = sinks
            .iter()
            .map(|sink| sink.write(&map, plan).map(|path| (sink.kind(), path)))
            .collect::<Result<Vec<_>>>()?;

        let stats = self.source.stats();
        log::info!("summary '{}': {}", provider.id, stats);

        Ok(ProviderOutput {
            provider: provider.id.clone(),
            files,
            stats,
        })
    }
}

fn overlays_for(config: &RenderConfig) -> OverlayRenderer {
    OverlayRenderer::new(config.rings.clone(), config.markers.clone())
}
