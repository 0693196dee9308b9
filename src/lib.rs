//! # rastermap
//!
//! Bakes a geographic area into a fixed-size raster for small embedded
//! displays.
//!
//! The crate plans a Web Mercator view around a center point, fetches the
//! XYZ tiles that cover it, stitches and crops them to the exact output
//! window, optionally draws range rings and markers, and hands the result
//! to image sinks (PNG, packed RGB565 header for firmware).

pub mod core;
pub mod output;
pub mod prelude;
pub mod render;
pub mod tiles;
pub use crate::core::constants;

// Re-export public API
pub use core::{
    config::RenderConfig,
    geo::{LatLng, Point, TileKey},
    plan::ViewPlan,
};

pub use tiles::{
    cache::{CacheMode, TileCache},
    loader::{FetchRequest, FetchStats, FetchStatsSnapshot, RetryPolicy, TileFetcher, TileSource},
    source::{Provider, ProviderKind, ProviderRegistry},
};

pub use render::{
    overlay::{MapMarker, MarkerStyle, RingStyle},
    stitch::{Canvas, RenderedMap},
    MapRenderer, ProviderFailure, ProviderOutput, RenderReport,
};

pub use output::{
    firmware_snippet,
    rgb565::{encode_rgb565, rgb565},
    sink::{ImageSink, PngSink, Rgb565HeaderSink},
};

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, MapError>;

/// Common error types
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid zoom level: {0}")]
    InvalidZoom(String),

    #[error("Invalid coordinates: {0}")]
    InvalidCoordinates(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Geometry error: {0}")]
    Geometry(String),

    #[error("Size mismatch: expected {expected:?}, got {actual:?}")]
    SizeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("Refusing to use unsafe path: '{0}'")]
    UnsafePath(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Fetch error: {0}")]
    Fetch(String),
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for MapError {
    fn from(err: reqwest::Error) -> Self {
        MapError::Network(err.to_string())
    }
}

/// Error type alias for convenience
pub type Error = MapError;
