use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;

use crate::core::constants::{EARTH_RADIUS, MAX_LATITUDE, MAX_ZOOM, TILE_SIZE};
use crate::{MapError, Result};

/// Represents a geographical coordinate with latitude and longitude in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    /// Creates a new LatLng coordinate
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Validates that the coordinates are finite and within valid ranges
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && self.lat >= -90.0
            && self.lat <= 90.0
            && self.lng >= -180.0
            && self.lng <= 180.0
    }

    /// Clamps latitude to the range Web Mercator can represent
    pub fn clamp_lat(lat: f64) -> f64 {
        lat.clamp(-MAX_LATITUDE, MAX_LATITUDE)
    }
}

impl Default for LatLng {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

impl fmt::Display for LatLng {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat, self.lng)
    }
}

/// A point in the global pixel plane at some zoom, or a screen offset
/// derived from it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn subtract(&self, other: &Point) -> Point {
        Point::new(self.x - other.x, self.y - other.y)
    }
}

impl Default for Point {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// Identifies one cacheable tile of one provider.
///
/// `x` is always stored wrapped into `[0, 2^zoom)`. Rows outside the
/// world never become keys; they resolve to a blank placeholder before
/// any lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileKey {
    pub provider: String,
    /// File extension the provider serves, used for cache file names
    pub ext: String,
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileKey {
    /// Builds a key from raw tile indices, wrapping `x` around the world.
    ///
    /// Returns `None` when `y` is off-world at this zoom.
    pub fn wrapped(provider: &str, ext: &str, z: u8, x: i64, y: i64) -> Option<Self> {
        let n = tiles_per_side(z);
        if !(0..n).contains(&y) {
            return None;
        }

        Some(Self {
            provider: provider.to_string(),
            ext: ext.to_string(),
            z,
            x: x.rem_euclid(n) as u32,
            y: y as u32,
        })
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} z{} x{} y{}", self.provider, self.z, self.x, self.y)
    }
}

/// Number of tiles along one side of the world at `zoom`.
pub fn tiles_per_side(zoom: u8) -> i64 {
    1_i64 << zoom
}

/// Side length of the world raster in pixels at `zoom`.
pub fn world_size(zoom: u8) -> f64 {
    TILE_SIZE as f64 * 2_f64.powi(zoom as i32)
}

/// Projects a geographic coordinate into the global pixel plane.
///
/// Latitude is clamped to the Mercator limit first. Longitude is not
/// wrapped, so points past the antimeridian keep a continuous x.
pub fn to_global_pixel(lat: f64, lng: f64, zoom: u8) -> Point {
    let lat_rad = LatLng::clamp_lat(lat).to_radians();
    let size = world_size(zoom);

    let x = (lng + 180.0) / 360.0 * size;
    let y = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0 * size;

    Point::new(x, y)
}

/// Inverse of [`to_global_pixel`], exact up to floating-point precision.
pub fn to_lat_lng(pixel: Point, zoom: u8) -> LatLng {
    let size = world_size(zoom);
    let lng = pixel.x / size * 360.0 - 180.0;
    let lat = (PI * (1.0 - 2.0 * pixel.y / size)).sinh().atan().to_degrees();

    LatLng::new(lat, lng)
}

/// Ground resolution at `lat` in meters per pixel.
pub fn meters_per_pixel(lat: f64, zoom: u8) -> f64 {
    lat.to_radians().cos() * 2.0 * PI * EARTH_RADIUS / world_size(zoom)
}

/// Real-valued zoom at which `width_px` pixels span `width_m` meters at `lat`.
pub fn fractional_zoom(lat: f64, width_px: u32, width_m: f64) -> f64 {
    let target_mpp = width_m / width_px as f64;
    let ratio = lat.to_radians().cos() * 2.0 * PI * EARTH_RADIUS / (TILE_SIZE as f64 * target_mpp);
    ratio.log2()
}

/// Picks the integer zoom whose resolution best matches `width_m / width_px`.
///
/// The fractional solution is rounded half to even, so 8.5 becomes 8 and
/// 9.5 becomes 10.
pub fn choose_zoom(lat: f64, width_px: u32, width_m: f64) -> Result<u8> {
    if width_px == 0 {
        return Err(MapError::InvalidParameter("output width must be positive".into()));
    }
    if !width_m.is_finite() || width_m <= 0.0 {
        return Err(MapError::InvalidParameter(format!(
            "ground width must be positive, got {width_m} m"
        )));
    }
    if !lat.is_finite() || lat.abs() > 90.0 {
        return Err(MapError::InvalidCoordinates(format!("latitude {lat}")));
    }

    let z = fractional_zoom(LatLng::clamp_lat(lat), width_px, width_m).round_ties_even();
    if !z.is_finite() || z < 0.0 {
        return Err(MapError::InvalidZoom(format!(
            "{width_m} m over {width_px} px needs zoom {z}, below 0"
        )));
    }
    if z > MAX_ZOOM as f64 {
        return Err(MapError::InvalidZoom(format!(
            "{width_m} m over {width_px} px needs zoom {z}, above {MAX_ZOOM}"
        )));
    }

    Ok(z as u8)
}
