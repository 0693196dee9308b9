//! View planning: turns a center, a ground radius and an output size into
//! the zoom, pixel origin, tile range and crop offsets of one render.

use serde::{Deserialize, Serialize};

use crate::core::constants::TILE_SIZE;
use crate::core::geo::{self, LatLng, Point};
use crate::{MapError, Result};

/// Inclusive range of tile indices covering the output window.
///
/// Indices are raw: `x` may lie outside `[0, 2^zoom)` near the
/// antimeridian and `y` may be off-world near the poles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRange {
    pub x0: i64,
    pub y0: i64,
    pub x1: i64,
    pub y1: i64,
}

impl TileRange {
    pub fn tiles_x(&self) -> u32 {
        (self.x1 - self.x0 + 1) as u32
    }

    pub fn tiles_y(&self) -> u32 {
        (self.y1 - self.y0 + 1) as u32
    }

    pub fn len(&self) -> usize {
        self.tiles_x() as usize * self.tiles_y() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row-major iteration: top to bottom, then left to right.
    pub fn iter(&self) -> impl Iterator<Item = (i64, i64)> {
        let (x0, x1) = (self.x0, self.x1);
        (self.y0..=self.y1).flat_map(move |ty| (x0..=x1).map(move |tx| (tx, ty)))
    }
}

/// Geometric parameters of one render request.
///
/// Computed once by [`ViewPlan::new`] and read-only afterwards; the
/// stitcher and the overlays both derive screen positions from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewPlan {
    center: LatLng,
    radius_km: f64,
    zoom: u8,
    px0: f64,
    py0: f64,
    width: u32,
    height: u32,
    tiles: TileRange,
    crop_left: u32,
    crop_top: u32,
    top_left: LatLng,
    bottom_right: LatLng,
}

impl ViewPlan {
    /// Plans a `width` x `height` window centered on `center` whose width
    /// spans `2 * radius_km` on the ground.
    pub fn new(center: LatLng, radius_km: f64, width: u32, height: u32) -> Result<Self> {
        if !center.is_valid() {
            return Err(MapError::InvalidCoordinates(center.to_string()));
        }
        if !radius_km.is_finite() || radius_km <= 0.0 {
            return Err(MapError::InvalidParameter(format!(
                "radius must be positive, got {radius_km} km"
            )));
        }
        if width == 0 || height == 0 {
            return Err(MapError::InvalidParameter(format!(
                "output size must be positive, got {width}x{height}"
            )));
        }

        let width_m = 2.0 * radius_km * 1000.0;
        let zoom = geo::choose_zoom(center.lat, width, width_m)?;

        let center_px = geo::to_global_pixel(center.lat, center.lng, zoom);
        let px0 = center_px.x - width as f64 / 2.0;
        let py0 = center_px.y - height as f64 / 2.0;
        let px1 = px0 + width as f64;
        let py1 = py0 + height as f64;

        let top_left = geo::to_lat_lng(Point::new(px0, py0), zoom);
        let bottom_right = geo::to_lat_lng(Point::new(px1, py1), zoom);

        // The crop lands on whole pixels, so the tile range is derived from
        // the rounded origin. This keeps the crop inside the first tile even
        // when rounding carries the origin across a tile edge.
        let origin_x = px0.round_ties_even() as i64;
        let origin_y = py0.round_ties_even() as i64;
        let tile = TILE_SIZE as i64;

        let tiles = TileRange {
            x0: origin_x.div_euclid(tile),
            y0: origin_y.div_euclid(tile),
            x1: (origin_x + width as i64 - 1).div_euclid(tile),
            y1: (origin_y + height as i64 - 1).div_euclid(tile),
        };

        let crop_left = origin_x - tiles.x0 * tile;
        let crop_top = origin_y - tiles.y0 * tile;
        if !(0..tile).contains(&crop_left) || !(0..tile).contains(&crop_top) {
            return Err(MapError::Geometry(format!(
                "crop offset ({crop_left}, {crop_top}) outside the first tile"
            )));
        }

        let plan = Self {
            center,
            radius_km,
            zoom,
            px0,
            py0,
            width,
            height,
            tiles,
            crop_left: crop_left as u32,
            crop_top: crop_top as u32,
            top_left,
            bottom_right,
        };

        log::info!(
            "planned {}x{} around {} radius {} km => zoom {}",
            width,
            height,
            center,
            radius_km,
            zoom
        );
        log::info!(
            "tiles x {}..={} y {}..={} ({} x {} = {}), crop ({}, {})",
            tiles.x0,
            tiles.x1,
            tiles.y0,
            tiles.y1,
            tiles.tiles_x(),
            tiles.tiles_y(),
            tiles.len(),
            plan.crop_left,
            plan.crop_top
        );
        log::info!("top-left {} bottom-right {}", top_left, bottom_right);

        Ok(plan)
    }

    pub fn center(&self) -> LatLng {
        self.center
    }

    pub fn radius_km(&self) -> f64 {
        self.radius_km
    }

    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    /// Global pixel of the top-left corner of the output window
    pub fn origin(&self) -> Point {
        Point::new(self.px0, self.py0)
    }

    pub fn px0(&self) -> f64 {
        self.px0
    }

    pub fn py0(&self) -> f64 {
        self.py0
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn tiles(&self) -> TileRange {
        self.tiles
    }

    /// Size of the stitched canvas, in whole tiles
    pub fn canvas_size(&self) -> (u32, u32) {
        (
            self.tiles.tiles_x() * TILE_SIZE,
            self.tiles.tiles_y() * TILE_SIZE,
        )
    }

    pub fn crop_left(&self) -> u32 {
        self.crop_left
    }

    pub fn crop_top(&self) -> u32 {
        self.crop_top
    }

    /// Geographic position of the top-left output pixel (informational)
    pub fn top_left(&self) -> LatLng {
        self.top_left
    }

    /// Geographic position of the bottom-right output corner (informational)
    pub fn bottom_right(&self) -> LatLng {
        self.bottom_right
    }

    /// Pixel offset of tile `(tx, ty)` inside the stitched canvas
    pub fn tile_offset(&self, tx: i64, ty: i64) -> (i64, i64) {
        let tile = TILE_SIZE as i64;
        ((tx - self.tiles.x0) * tile, (ty - self.tiles.y0) * tile)
    }

    /// Position of `point` on the output image, in pixels
    pub fn screen_position(&self, point: &LatLng) -> Point {
        geo::to_global_pixel(point.lat, point.lng, self.zoom).subtract(&self.origin())
    }

    /// Ground resolution at the plan's center
    pub fn meters_per_pixel(&self) -> f64 {
        geo::meters_per_pixel(self.center.lat, self.zoom)
    }
}
