use futures::stream::{self, StreamExt};
use image::{imageops, Rgb, RgbImage};

use crate::core::constants::{BLANK_TILE_RGB, TILE_SIZE};
use crate::core::plan::ViewPlan;
use crate::tiles::loader::TileSource;
use crate::tiles::source::Provider;
use crate::{MapError, Result};

/// Whole-tile pixel buffer covering a plan's tile range.
///
/// Owned by one stitch and consumed by [`Canvas::crop`].
#[derive(Debug, Clone)]
pub struct Canvas {
    image: RgbImage,
}

impl Canvas {
    pub fn for_plan(plan: &ViewPlan) -> Self {
        let (w, h) = plan.canvas_size();
        Self {
            image: RgbImage::from_pixel(w, h, Rgb(BLANK_TILE_RGB)),
        }
    }

    pub fn size(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Places tile `(tx, ty)` at its fixed offset; paste order does not
    /// matter because tiles never overlap.
    pub fn paste(&mut self, plan: &ViewPlan, tx: i64, ty: i64, tile: &RgbImage) {
        let (x, y) = plan.tile_offset(tx, ty);
        imageops::replace(&mut self.image, tile, x, y);
    }

    /// Cuts the exact output window out of the canvas
    pub fn crop(self, plan: &ViewPlan) -> Result<RenderedMap> {
        let (cw, ch) = self.size();
        if cw < plan.crop_left() + plan.width() || ch < plan.crop_top() + plan.height() {
            return Err(MapError::SizeMismatch {
                expected: (plan.crop_left() + plan.width(), plan.crop_top() + plan.height()),
                actual: (cw, ch),
            });
        }

        let cropped = imageops::crop_imm(
            &self.image,
            plan.crop_left(),
            plan.crop_top(),
            plan.width(),
            plan.height(),
        )
        .to_image();
        RenderedMap::new(cropped, plan)
    }
}

/// Final image of exactly the planned output size
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMap {
    image: RgbImage,
}

impl RenderedMap {
    /// Wraps `image`, rejecting anything not sized like the plan's output
    pub fn new(image: RgbImage, plan: &ViewPlan) -> Result<Self> {
        if image.dimensions() != plan.size() {
            return Err(MapError::SizeMismatch {
                expected: plan.size(),
                actual: image.dimensions(),
            });
        }
        Ok(Self { image })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn size(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }
}

/// Fetches every tile of the plan and pastes it into a new canvas.
///
/// Up to `max_concurrent` tiles are in flight at once; completion order
/// does not affect the result.
pub async fn stitch(plan: &ViewPlan, source: &TileSource, provider: &Provider) -> Result<Canvas> {
    let mut canvas = Canvas::for_plan(plan);
    let range = plan.tiles();
    let total = range.len();
    let zoom = plan.zoom();
    let config = source.config();
    let every = config.progress_every.max(1);

    log::info!(
        "[{}] fetching {} tiles at zoom {} ({} at a time)",
        provider.id,
        total,
        zoom,
        config.max_concurrent
    );

    let mut tiles = stream::iter(range.iter())
        .map(|(tx, ty)| async move { (tx, ty, source.tile(provider, zoom, tx, ty).await) })
        .buffer_unordered(config.max_concurrent.max(1));

    let mut done = 0;
    while let Some((tx, ty, tile)) = tiles.next().await {
        if tile.dimensions() != (TILE_SIZE, TILE_SIZE) {
            return Err(MapError::SizeMismatch {
                expected: (TILE_SIZE, TILE_SIZE),
                actual: tile.dimensions(),
            });
        }
        canvas.paste(plan, tx, ty, &tile);

        done += 1;
        if done % every == 0 || done == total {
            let stats = source.stats();
            log::info!(
                "[{}] {}/{} ({:.0}%) dl={} cache={} fail={}",
                provider.id,
                done,
                total,
                done as f64 * 100.0 / total as f64,
                stats.downloaded,
                stats.cache_hits,
                stats.failed
            );
        }
    }

    Ok(canvas)
}
