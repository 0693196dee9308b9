//! Configuration of a render request
//!
//! Every section has defaults matching the stock 480x320 display build, so a
//! config file only needs to name what it changes. The CLI layers its flags
//! on top of whatever the file provides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::constants::USER_AGENT;
use crate::core::geo::LatLng;
use crate::render::overlay::{MarkerStyle, RingStyle};
use crate::tiles::cache::CacheMode;
use crate::tiles::source::Provider;
use crate::{MapError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub center: LatLng,
    pub radius_km: f64,
    pub width: u32,
    pub height: u32,
    pub out_dir: PathBuf,
    /// Provider ids to render; empty renders every registered provider
    pub providers: Vec<String>,
    pub only_no_labels: bool,
    /// Delete a provider's output folder first if it already has files
    pub wipe_provider_dirs: bool,
    /// Extra providers appended to the built-in registry
    pub custom_providers: Vec<Provider>,
    /// Key substituted into `{key}` of static-image providers
    pub google_maps_key: Option<String>,
    pub cache: CacheConfig,
    pub fetch: FetchConfig,
    pub rings: RingStyle,
    pub markers: MarkerStyle,
    pub export: ExportConfig,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            center: LatLng::new(46.4717185, 6.4767709),
            radius_km: 80.0,
            width: 480,
            height: 320,
            out_dir: PathBuf::from("out_maps"),
            providers: Vec::new(),
            only_no_labels: false,
            wipe_provider_dirs: true,
            custom_providers: Vec::new(),
            google_maps_key: None,
            cache: CacheConfig::default(),
            fetch: FetchConfig::default(),
            rings: RingStyle::default(),
            markers: MarkerStyle::default(),
            export: ExportConfig::default(),
        }
    }
}

impl RenderConfig {
    /// Reads a JSON config file; missing fields keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RenderConfig = serde_json::from_str(&content)?;
        log::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Rejects parameters no render could succeed with
    pub fn validate(&self) -> Result<()> {
        if !self.center.is_valid() {
            return Err(MapError::InvalidCoordinates(self.center.to_string()));
        }
        if !self.radius_km.is_finite() || self.radius_km <= 0.0 {
            return Err(MapError::InvalidParameter(format!(
                "radius_km must be positive, got {}",
                self.radius_km
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(MapError::InvalidParameter(format!(
                "output size must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if self.rings.enabled && self.rings.step_km == 0 {
            return Err(MapError::InvalidParameter("ring step must be positive".into()));
        }
        if self.fetch.max_concurrent == 0 {
            return Err(MapError::InvalidParameter(
                "fetch.max_concurrent must be at least 1".into(),
            ));
        }
        for provider in &self.custom_providers {
            provider.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub mode: CacheMode,
    /// Root directory of the persistent modes
    pub root: PathBuf,
    /// Tile capacity of the in-memory mode
    pub memory_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            mode: CacheMode::Ephemeral,
            root: PathBuf::from("tile_cache"),
            memory_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Tiles fetched at the same time for one render
    pub max_concurrent: usize,
    /// First retry waits this long
    pub backoff_base_ms: u64,
    /// Each further retry waits this much longer
    pub backoff_step_ms: u64,
    pub request_timeout_secs: u64,
    /// Log progress every N tiles
    pub progress_every: usize,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            backoff_base_ms: 500,
            backoff_step_ms: 500,
            request_timeout_secs: 30,
            progress_every: 8,
            user_agent: USER_AGENT.to_string(),
        }
    }
}

/// Unified configuration presets for FetchConfig
impl FetchConfig {
    /// One request at a time, for providers with strict usage policies
    pub fn polite() -> Self {
        Self {
            max_concurrent: 1,
            ..Self::default()
        }
    }

    pub fn for_testing() -> Self {
        Self {
            max_concurrent: 4,
            backoff_base_ms: 0,
            backoff_step_ms: 0,
            request_timeout_secs: 5,
            progress_every: 1,
            user_agent: USER_AGENT.to_string(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub png_name: String,
    pub rgb565_header: bool,
    pub header_name: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            png_name: "map.png".to_string(),
            rgb565_header: true,
            header_name: "background565.h".to_string(),
        }
    }
}
