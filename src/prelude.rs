//! Prelude module for common rastermap types and traits
//!
//! This module re-exports the most commonly used types, traits, and functions
//! for easy importing with `use rastermap::prelude::*;`

pub use crate::core::{
    config::{CacheConfig, ExportConfig, FetchConfig, RenderConfig},
    geo::{choose_zoom, meters_per_pixel, to_global_pixel, to_lat_lng, LatLng, Point, TileKey},
    plan::{TileRange, ViewPlan},
};

pub use crate::tiles::{
    cache::{CacheMode, DiskTileCache, MemoryTileCache, PurgingDiskCache, TileCache},
    loader::{FetchRequest, FetchStatsSnapshot, RetryPolicy, TileFetcher, TileSource},
    source::{Provider, ProviderKind, ProviderRegistry},
};

#[cfg(feature = "http")]
pub use crate::tiles::loader::HttpTileFetcher;

pub use crate::render::{
    overlay::{MapMarker, MarkerStyle, OverlayRenderer, RingStyle},
    stitch::{Canvas, RenderedMap},
    MapRenderer, ProviderFailure, ProviderOutput, RenderReport,
};

pub use crate::output::{firmware_snippet, ImageSink, PngSink, Rgb565HeaderSink};

pub use crate::{MapError, Result};
