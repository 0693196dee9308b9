use anyhow::{bail, Context};
use clap::Parser;
use rastermap::core::config::FetchConfig;
use rastermap::{CacheMode, LatLng, MapRenderer, ProviderRegistry, RenderConfig};
use std::path::PathBuf;

/// Bakes map tiles into fixed-size images and RGB565 headers for small
/// displays
#[derive(Parser, Debug)]
#[command(name = "rastermap-app", version)]
struct Args {
    /// JSON config file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Center latitude in degrees
    #[arg(long, allow_hyphen_values = true)]
    lat: Option<f64>,

    /// Center longitude in degrees
    #[arg(long, allow_hyphen_values = true)]
    lon: Option<f64>,

    /// Half the ground width covered by the image
    #[arg(long)]
    radius_km: Option<f64>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    #[arg(short, long)]
    out_dir: Option<PathBuf>,

    /// Provider id to render; repeat for several (default: all)
    #[arg(short, long = "provider")]
    providers: Vec<String>,

    /// Draw range rings every N km
    #[arg(long, value_name = "STEP_KM")]
    rings: Option<u32>,

    /// Outermost range ring
    #[arg(long)]
    rings_max_km: Option<u32>,

    /// Draw the configured markers
    #[arg(long)]
    markers: bool,

    /// TrueType font for marker labels
    #[arg(long)]
    label_font: Option<PathBuf>,

    /// Tile cache: ephemeral, persistent or purge
    #[arg(long)]
    cache: Option<CacheMode>,

    /// Skip the RGB565 header
    #[arg(long)]
    no_header: bool,

    /// Only render providers without map labels
    #[arg(long)]
    only_no_labels: bool,

    /// Tiles fetched at the same time
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// Fetch one tile at a time
    #[arg(long, conflicts_with = "jobs")]
    polite: bool,

    /// List provider ids and exit
    #[arg(long)]
    list_providers: bool,

    /// Print the effective config as JSON and exit
    #[arg(long)]
    dump_config: bool,

    /// Verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    /// Loads the config file if given and layers the flags on top
    fn to_config(&self) -> anyhow::Result<RenderConfig> {
        let mut config = match &self.config {
            Some(path) => RenderConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => RenderConfig::default(),
        };

        if self.lat.is_some() || self.lon.is_some() {
            config.center = LatLng::new(
                self.lat.unwrap_or(config.center.lat),
                self.lon.unwrap_or(config.center.lng),
            );
        }
        if let Some(radius) = self.radius_km {
            config.radius_km = radius;
        }
        if let Some(width) = self.width {
            config.width = width;
        }
        if let Some(height) = self.height {
            config.height = height;
        }
        if let Some(dir) = &self.out_dir {
            config.out_dir = dir.clone();
        }
        if !self.providers.is_empty() {
            config.providers = self.providers.clone();
        }
        if let Some(step) = self.rings {
            config.rings.enabled = true;
            config.rings.step_km = step;
        }
        if let Some(max) = self.rings_max_km {
            config.rings.max_km = max;
        }
        if self.markers {
            config.markers.enabled = true;
        }
        if let Some(font) = &self.label_font {
            config.markers.label_font = Some(font.clone());
        }
        if let Some(mode) = self.cache {
            config.cache.mode = mode;
        }
        if self.no_header {
            config.export.rgb565_header = false;
        }
        if self.only_no_labels {
            config.only_no_labels = true;
        }
        if let Some(jobs) = self.jobs {
            config.fetch.max_concurrent = jobs;
        }
        if self.polite {
            config.fetch.max_concurrent = FetchConfig::polite().max_concurrent;
        }
        if config.google_maps_key.is_none() {
            config.google_maps_key = std::env::var("GOOGLE_MAPS_KEY").ok().filter(|k| !k.is_empty());
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if args.list_providers {
        for provider in ProviderRegistry::builtin().iter() {
            let kind = if provider.is_static() { "static" } else { "tiles" };
            let labels = if provider.no_labels { "no labels" } else { "labels" };
            println!(
                "{:<28} {:<7} {:<5} {}",
                provider.id,
                kind,
                provider.normalized_ext(),
                labels
            );
        }
        return Ok(());
    }

    let config = args.to_config()?;
    if args.dump_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }
    config.validate().context("invalid render request")?;

    let renderer = MapRenderer::from_config(&config).context("failed to set up renderer")?;
    let report = renderer.render_all(&config).await.context("render failed")?;

    println!("\nGenerated outputs:");
    for output in &report.outputs {
        println!(" - {}", output.provider);
        for (kind, path) in &output.files {
            println!("    {:<4}: {}", kind, path.display());
        }
        log::debug!("[{}] {}", output.provider, output.stats);
    }
    for failure in &report.failures {
        log::error!("{} failed: {}", failure.provider, failure.error);
    }
    log::info!(
        "{} rendered, {} failed",
        report.outputs.len(),
        report.failures.len()
    );

    println!("\nPaste this into your firmware config header:\n");
    println!("{}", report.firmware_snippet());

    if report.outputs.is_empty() {
        bail!("no provider rendered successfully");
    }
    Ok(())
}
