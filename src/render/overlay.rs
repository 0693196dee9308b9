//! Range rings and point markers drawn over a cropped map.
//!
//! Shapes are drawn into a transparent RGBA layer and alpha-composited onto
//! the map afterwards, so pixels outside the drawn shapes keep their value.

use image::{Rgb, RgbImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut, draw_text_mut};
use rusttype::{Font, Scale};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::constants::{MARKER_MARGIN_PX, RING_CENTER_DOT_RADIUS};
use crate::core::geo::{LatLng, Point};
use crate::core::plan::ViewPlan;
use crate::{MapError, Result};

static BUNDLED_FONT: &[u8] = include_bytes!("../../assets/DejaVuSansMono.ttf");

/// Concentric distance rings around the plan's center
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingStyle {
    pub enabled: bool,
    pub step_km: u32,
    /// Largest ring drawn, inclusive when it is a multiple of the step
    pub max_km: u32,
    pub color: [u8; 4],
    /// Outline thickness in pixels, growing inwards
    pub width: u32,
    pub center_dot: bool,
}

impl Default for RingStyle {
    fn default() -> Self {
        Self {
            enabled: false,
            step_km: 10,
            max_km: 200,
            color: [0, 255, 0, 140],
            width: 1,
            center_dot: true,
        }
    }
}

impl RingStyle {
    /// Ring distances: `step, 2*step, ...` up to `max_km`
    pub fn radii_km(&self) -> Vec<u32> {
        if self.step_km == 0 {
            return Vec::new();
        }
        (self.step_km..=self.max_km)
            .step_by(self.step_km as usize)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapMarker {
    pub label: String,
    pub lat: f64,
    pub lon: f64,
}

impl MapMarker {
    pub fn new(label: &str, lat: f64, lon: f64) -> Self {
        Self {
            label: label.to_string(),
            lat,
            lon,
        }
    }

    pub fn position(&self) -> LatLng {
        LatLng::new(self.lat, self.lon)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerStyle {
    pub enabled: bool,
    pub markers: Vec<MapMarker>,
    pub color: [u8; 4],
    pub radius: u32,
    pub labels: bool,
    pub crosshair: bool,
    /// TrueType font for labels, replacing the bundled one
    pub label_font: Option<PathBuf>,
    pub label_scale: f32,
}

impl Default for MarkerStyle {
    fn default() -> Self {
        Self {
            enabled: false,
            markers: vec![
                MapMarker::new("Bern", 46.94809, 7.44744),
                MapMarker::new("Geneva", 46.204391, 6.143158),
            ],
            color: [255, 0, 0, 220],
            radius: 4,
            labels: true,
            crosshair: true,
            label_font: None,
            label_scale: 12.0,
        }
    }
}

/// Radius in pixels of a ring `km` away from the plan's center
pub fn ring_radius_px(plan: &ViewPlan, km: f64) -> f64 {
    km * 1000.0 / plan.meters_per_pixel()
}

/// Whether a screen position is close enough to the frame to be drawn
pub fn marker_visible(pos: &Point, size: (u32, u32)) -> bool {
    let (w, h) = (size.0 as f64, size.1 as f64);
    (-MARKER_MARGIN_PX..=w + MARKER_MARGIN_PX).contains(&pos.x)
        && (-MARKER_MARGIN_PX..=h + MARKER_MARGIN_PX).contains(&pos.y)
}

/// Label font compiled into the crate
pub fn bundled_font() -> Result<Font<'static>> {
    Font::try_from_bytes(BUNDLED_FONT)
        .ok_or_else(|| MapError::InvalidParameter("bundled label font is unusable".into()))
}

pub fn load_font(path: &Path) -> Result<Font<'static>> {
    let bytes = std::fs::read(path)?;
    Font::try_from_vec(bytes).ok_or_else(|| {
        MapError::InvalidParameter(format!("'{}' is not a usable font", path.display()))
    })
}

/// Transparent drawing layer the size of the map
struct OverlayLayer {
    layer: RgbaImage,
}

impl OverlayLayer {
    fn for_image(image: &RgbImage) -> Self {
        Self {
            layer: RgbaImage::new(image.width(), image.height()),
        }
    }

    /// Source-over composite; fully transparent pixels are left alone
    /// Fills the pixels whose distance to `center` rounds into
    /// `(radius - width, radius]`
    fn draw_annulus(&mut self, center: (i32, i32), radius: i32, width: i32, color: Rgba<u8>) {
        let outer = radius as f64 + 0.5;
        let inner = (radius - width) as f64 + 0.5;
        let (w, h) = (self.layer.width() as i32, self.layer.height() as i32);

        for y in (center.1 - radius).max(0)..=(center.1 + radius).min(h - 1) {
            for x in (center.0 - radius).max(0)..=(center.0 + radius).min(w - 1) {
                let (dx, dy) = ((x - center.0) as f64, (y - center.1) as f64);
                let d = (dx * dx + dy * dy).sqrt();
                if d >= inner && d < outer {
                    self.layer.put_pixel(x as u32, y as u32, color);
                }
            }
        }
    }

    fn composite_onto(&self, image: &mut RgbImage) {
        for (x, y, over) in self.layer.enumerate_pixels() {
            let alpha = over[3] as u32;
            if alpha == 0 {
                continue;
            }
            let base = image.get_pixel_mut(x, y);
            let blend = |o: u8, b: u8| ((o as u32 * alpha + b as u32 * (255 - alpha) + 127) / 255) as u8;
            *base = Rgb([
                blend(over[0], base[0]),
                blend(over[1], base[1]),
                blend(over[2], base[2]),
            ]);
        }
    }
}

/// Draws the range rings; returns how many rings were drawn
pub fn draw_range_rings(image: &mut RgbImage, plan: &ViewPlan, style: &RingStyle) -> usize {
    let mut overlay = OverlayLayer::for_image(image);
    let color = Rgba(style.color);
    let center = plan.screen_position(&plan.center());
    let (cx, cy) = (center.x.round() as i32, center.y.round() as i32);

    let radii = style.radii_km();
    for km in &radii {
        let r = ring_radius_px(plan, *km as f64).round() as i32;
        if r > 0 {
            overlay.draw_annulus((cx, cy), r, style.width.max(1) as i32, color);
        }
    }

    if style.center_dot {
        draw_filled_circle_mut(&mut overlay.layer, (cx, cy), RING_CENTER_DOT_RADIUS, color);
    }

    overlay.composite_onto(image);
    log::debug!("drew {} range rings around ({}, {})", radii.len(), cx, cy);
    radii.len()
}

/// Draws dot, crosshair and label for each marker near the frame.
///
/// Returns the number of markers drawn; fully off-screen ones are skipped.
pub fn draw_markers(
    image: &mut RgbImage,
    plan: &ViewPlan,
    style: &MarkerStyle,
    font: Option<&Font<'_>>,
) -> usize {
    let mut overlay = OverlayLayer::for_image(image);
    let color = Rgba(style.color);
    let size = image.dimensions();
    let radius = style.radius as i32;
    let mut drawn = 0;

    for marker in &style.markers {
        let pos = plan.screen_position(&marker.position());
        if !marker_visible(&pos, size) {
            log::debug!("marker '{}' off-screen at ({:.1}, {:.1})", marker.label, pos.x, pos.y);
            continue;
        }

        let (x, y) = (pos.x.round() as i32, pos.y.round() as i32);
        draw_filled_circle_mut(&mut overlay.layer, (x, y), radius, color);

        if style.crosshair {
            let arm = (radius + 3) as f32;
            let (fx, fy) = (x as f32, y as f32);
            draw_line_segment_mut(&mut overlay.layer, (fx - arm, fy), (fx + arm, fy), color);
            draw_line_segment_mut(&mut overlay.layer, (fx, fy - arm), (fx, fy + arm), color);
        }

        if let (true, Some(font)) = (style.labels, font) {
            // Up and to the right so the label never covers the dot
            draw_text_mut(
                &mut overlay.layer,
                color,
                x + radius + 4,
                y - radius - 2 - style.label_scale as i32 / 2,
                Scale::uniform(style.label_scale),
                font,
                &marker.label,
            );
        }

        log::debug!("marker '{}' at ({}, {})", marker.label, x, y);
        drawn += 1;
    }

    overlay.composite_onto(image);
    drawn
}

/// Applies the enabled overlays with one loaded label font
pub struct OverlayRenderer {
    rings: RingStyle,
    markers: MarkerStyle,
    font: Option<Font<'static>>,
}

impl OverlayRenderer {
    pub fn new(rings: RingStyle, markers: MarkerStyle) -> Self {
        let font = if markers.enabled && markers.labels {
            let loaded = match &markers.label_font {
                Some(path) => load_font(path).or_else(|e| {
                    log::warn!("using bundled label font: {}", e);
                    bundled_font()
                }),
                None => bundled_font(),
            };
            match loaded {
                Ok(font) => Some(font),
                Err(e) => {
                    log::warn!("marker labels disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Self {
            rings,
            markers,
            font,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.rings.enabled && !self.markers.enabled
    }

    pub fn apply(&self, image: &mut RgbImage, plan: &ViewPlan) {
        if self.rings.enabled {
            draw_range_rings(image, plan, &self.rings);
        }
        if self.markers.enabled {
            let drawn = draw_markers(image, plan, &self.markers, self.font.as_ref());
            log::info!("drew {}/{} markers", drawn, self.markers.markers.len());
        }
    }
}
