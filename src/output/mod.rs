//! Persisting finished maps: PNG files, RGB565 headers and the geometry
//! constants firmware needs to place live positions on the image.

pub mod rgb565;
pub mod sink;

pub use rgb565::{encode_rgb565, rgb565, rgb565_header};
pub use sink::{ensure_safe_path, prepare_output_dir, ImageSink, PngSink, Rgb565HeaderSink};

use std::fmt::Write;

use crate::core::geo;
use crate::core::plan::ViewPlan;

/// Constants to paste into the firmware's config header, followed by a
/// check that the plan's center lands in the middle of the frame.
pub fn firmware_snippet(plan: &ViewPlan) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "// ===================== Map geometry (must match the baked map) ====================="
    );
    let _ = writeln!(out, "static const int    MAP_ZOOM = {};", plan.zoom());
    let _ = writeln!(out, "static const double MAP_PX0  = {};", plan.px0());
    let _ = writeln!(out, "static const double MAP_PY0  = {};", plan.py0());

    let center = plan.center();
    let home = geo::to_global_pixel(center.lat, center.lng, plan.zoom());
    let screen = plan.screen_position(&center);
    let _ = writeln!(out);
    let _ = writeln!(out, "// SANITY CHECK");
    let _ = writeln!(out, "// Home global px,py: ({:.3}, {:.3})", home.x, home.y);
    let _ = writeln!(
        out,
        "// Home screen x,y: ({:.3}, {:.3})  (expected ~ ({}, {}))",
        screen.x,
        screen.y,
        plan.width() / 2,
        plan.height() / 2
    );
    out
}
