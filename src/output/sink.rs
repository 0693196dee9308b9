use std::fs;
use std::path::{Component, Path, PathBuf};

use super::rgb565::rgb565_header;
use crate::core::plan::ViewPlan;
use crate::render::stitch::RenderedMap;
use crate::{MapError, Result};

/// Destination for a finished map
pub trait ImageSink: Send + Sync {
    /// Persists `map`; returns the path written
    fn write(&self, map: &RenderedMap, plan: &ViewPlan) -> Result<PathBuf>;

    /// Short label for logs and reports
    fn kind(&self) -> &'static str;
}

/// Lossless PNG file
#[derive(Debug, Clone)]
pub struct PngSink {
    path: PathBuf,
}

impl PngSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ImageSink for PngSink {
    fn write(&self, map: &RenderedMap, plan: &ViewPlan) -> Result<PathBuf> {
        check_size(map, plan)?;
        map.image()
            .save_with_format(&self.path, image::ImageFormat::Png)?;
        log::info!("saved PNG: {}", self.path.display());
        Ok(self.path.clone())
    }

    fn kind(&self) -> &'static str {
        "PNG"
    }
}

/// C header with the map packed as RGB565
#[derive(Debug, Clone)]
pub struct Rgb565HeaderSink {
    path: PathBuf,
}

impl Rgb565HeaderSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ImageSink for Rgb565HeaderSink {
    fn write(&self, map: &RenderedMap, plan: &ViewPlan) -> Result<PathBuf> {
        check_size(map, plan)?;
        fs::write(&self.path, rgb565_header(map.image()))?;
        log::info!("wrote {}", self.path.display());
        Ok(self.path.clone())
    }

    fn kind(&self) -> &'static str {
        "HDR"
    }
}

fn check_size(map: &RenderedMap, plan: &ViewPlan) -> Result<()> {
    if map.size() != plan.size() {
        return Err(MapError::SizeMismatch {
            expected: plan.size(),
            actual: map.size(),
        });
    }
    Ok(())
}

/// Lexically normalizes `path`, resolving `.` and `..` without touching
/// the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut out: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    out.iter().collect()
}

/// Rejects output targets that would wipe the working directory, its
/// parent or the filesystem root
pub fn ensure_safe_path(path: &Path) -> Result<()> {
    let norm = normalize(path);
    let unsafe_target = norm.as_os_str().is_empty()
        || norm == Path::new("/")
        || norm == Path::new("..");
    if unsafe_target {
        return Err(MapError::UnsafePath(path.display().to_string()));
    }
    Ok(())
}

/// Creates `dir`; when `wipe` is set a non-empty directory is deleted and
/// recreated first.
pub fn prepare_output_dir(dir: &Path, wipe: bool) -> Result<()> {
    ensure_safe_path(dir)?;

    if !dir.exists() {
        fs::create_dir_all(dir)?;
        return Ok(());
    }

    let has_content = fs::read_dir(dir)?.next().is_some();
    if has_content && wipe {
        log::info!("folder not empty, deleting: {}", dir.display());
        fs::remove_dir_all(dir)?;
        fs::create_dir_all(dir)?;
        log::info!("folder recreated: {}", dir.display());
    }
    Ok(())
}
