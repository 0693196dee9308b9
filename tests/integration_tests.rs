use async_trait::async_trait;
use image::{ImageOutputFormat, Rgb, RgbImage};
use rastermap::prelude::*;
use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, Mutex};

const CENTER: LatLng = LatLng {
    lat: 46.4717185,
    lng: 6.4767709,
};

/// Serves solid tiles colored after their indices and records every request
struct MockFetcher {
    requests: Mutex<Vec<FetchRequest>>,
    static_size: (u32, u32),
}

impl MockFetcher {
    fn new() -> Arc<Self> {
        Self::with_static_size((480, 320))
    }

    fn with_static_size(size: (u32, u32)) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            static_size: size,
        })
    }

    fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().unwrap().clone()
    }
}

fn tile_color(x: u32, y: u32, z: u8) -> Rgb<u8> {
    Rgb([(x % 251) as u8, (y % 251) as u8, z])
}

fn png(img: &RgbImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageOutputFormat::Png).unwrap();
    out.into_inner()
}

#[async_trait]
impl TileFetcher for MockFetcher {
    async fn fetch(&self, request: &FetchRequest) -> rastermap::Result<Vec<u8>> {
        self.requests.lock().unwrap().push(request.clone());
        let img = match &request.tile {
            Some(key) => RgbImage::from_pixel(256, 256, tile_color(key.x, key.y, key.z)),
            None => RgbImage::from_pixel(self.static_size.0, self.static_size.1, Rgb([9, 9, 9])),
        };
        Ok(png(&img))
    }
}

fn mock_tiles() -> Provider {
    Provider::xyz("mock_tiles", "mock://{z}/{x}/{y}").with_delay_ms(0)
}

fn mock_static() -> Provider {
    Provider::static_image("mock_static", "mock://static/{lat}/{lon}/{zoom}/{width}x{height}")
        .with_delay_ms(0)
}

fn test_config(dir: &Path) -> RenderConfig {
    RenderConfig {
        out_dir: dir.join("maps"),
        providers: vec!["mock_tiles".to_string()],
        custom_providers: vec![mock_tiles(), mock_static()],
        fetch: FetchConfig::for_testing(),
        cache: CacheConfig {
            mode: CacheMode::Ephemeral,
            root: dir.join("cache"),
            memory_capacity: 256,
        },
        ..RenderConfig::default()
    }
}

#[tokio::test]
async fn test_reference_render_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let fetcher = MockFetcher::new();
    let renderer = MapRenderer::with_fetcher(&config, fetcher.clone()).unwrap();

    let report = renderer.render_all(&config).await.unwrap();
    assert!(report.is_success());

    let plan = &report.plan;
    assert_eq!(plan.zoom(), 8);
    let home = plan.screen_position(&CENTER);
    assert!((home.x - 240.0).abs() <= 1.0);
    assert!((home.y - 160.0).abs() <= 1.0);

    assert_eq!(fetcher.requests().len(), 9);
    let output = &report.outputs[0];
    assert_eq!(output.stats.downloaded, 9);
    assert_eq!(output.stats.failed, 0);

    let png_path = dir.path().join("maps/mock_tiles/map.png");
    let header_path = dir.path().join("maps/mock_tiles/background565.h");
    assert_eq!(output.files[0], ("PNG", png_path.clone()));
    assert_eq!(output.files[1], ("HDR", header_path.clone()));

    let map = image::open(&png_path).unwrap().to_rgb8();
    assert_eq!(map.dimensions(), (480, 320));
    // The frame's top-left lies in tile (131, 89) and its center in (132, 90)
    assert_eq!(map.get_pixel(0, 0), &tile_color(131, 89, 8));
    assert_eq!(map.get_pixel(240, 160), &tile_color(132, 90, 8));
    assert_eq!(map.get_pixel(479, 319), &tile_color(133, 91, 8));

    let header = std::fs::read_to_string(header_path).unwrap();
    assert!(header.contains("static const uint16_t bg565[153600] PROGMEM = {"));

    let snippet = report.firmware_snippet();
    assert!(snippet.contains("MAP_ZOOM = 8;"));
}

#[tokio::test]
async fn test_off_world_rows_render_blank_without_fetching() {
    let dir = tempfile::tempdir().unwrap();
    let config = RenderConfig {
        center: LatLng::new(84.9, 0.0),
        radius_km: 2500.0,
        ..test_config(dir.path())
    };
    let fetcher = MockFetcher::new();
    let renderer = MapRenderer::with_fetcher(&config, fetcher.clone()).unwrap();

    let report = renderer.render_all(&config).await.unwrap();
    assert_eq!(report.plan.zoom(), 0);
    assert!(report.plan.tiles().y0 < 0);

    let requests = fetcher.requests();
    assert!(!requests.is_empty());
    for request in requests {
        let key = request.tile.unwrap();
        assert_eq!((key.z, key.x, key.y), (0, 0, 0));
    }
    let stats = report.outputs[0].stats;
    assert_eq!(stats.blank_tiles, report.plan.tiles().tiles_x() as usize);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn test_antimeridian_wraps_tile_columns() {
    let dir = tempfile::tempdir().unwrap();
    let config = RenderConfig {
        center: LatLng::new(-17.7, 179.99),
        radius_km: 40.0,
        ..test_config(dir.path())
    };
    let fetcher = MockFetcher::new();
    let renderer = MapRenderer::with_fetcher(&config, fetcher.clone()).unwrap();

    let report = renderer.render_all(&config).await.unwrap();
    let plan = &report.plan;
    let side = 1u32 << plan.zoom();
    assert!(plan.tiles().x1 >= side as i64);

    let requested: Vec<u32> = fetcher
        .requests()
        .into_iter()
        .map(|r| r.tile.unwrap().x)
        .collect();
    assert!(requested.iter().all(|x| *x < side));
    assert!(requested.contains(&0));
}

#[tokio::test]
async fn test_persistent_cache_serves_second_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.cache.mode = CacheMode::Persistent;

    let first = MockFetcher::new();
    MapRenderer::with_fetcher(&config, first.clone())
        .unwrap()
        .render_all(&config)
        .await
        .unwrap();
    assert_eq!(first.requests().len(), 9);
    assert!(dir.path().join("cache/mock_tiles/8_131_89.png").is_file());

    let second = MockFetcher::new();
    let report = MapRenderer::with_fetcher(&config, second.clone())
        .unwrap()
        .render_all(&config)
        .await
        .unwrap();
    assert!(second.requests().is_empty());
    assert_eq!(report.outputs[0].stats.cache_hits, 9);
    assert_eq!(report.outputs[0].stats.downloaded, 0);
}

#[tokio::test]
async fn test_purge_cache_is_removed_after_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.cache.mode = CacheMode::Purge;

    let renderer = MapRenderer::with_fetcher(&config, MockFetcher::new()).unwrap();
    renderer.render_all(&config).await.unwrap();
    assert!(!dir.path().join("cache").exists());
}

#[tokio::test]
async fn test_static_provider_uses_plan_zoom_and_size() {
    let dir = tempfile::tempdir().unwrap();
    let config = RenderConfig {
        providers: vec!["mock_static".to_string()],
        ..test_config(dir.path())
    };
    let fetcher = MockFetcher::new();
    let renderer = MapRenderer::with_fetcher(&config, fetcher.clone()).unwrap();

    let report = renderer.render_all(&config).await.unwrap();
    assert!(report.is_success());

    let requests = fetcher.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].tile.is_none());
    assert!(requests[0].url.ends_with("/8/480x320"));

    let map = image::open(dir.path().join("maps/mock_static/map.png"))
        .unwrap()
        .to_rgb8();
    assert_eq!(map.get_pixel(10, 10), &Rgb([9, 9, 9]));
}

#[tokio::test]
async fn test_failing_provider_does_not_stop_the_others() {
    let dir = tempfile::tempdir().unwrap();
    let config = RenderConfig {
        providers: vec!["mock_static".to_string(), "mock_tiles".to_string()],
        ..test_config(dir.path())
    };
    // Wrong size from the static provider is fatal for that provider only
    let renderer =
        MapRenderer::with_fetcher(&config, MockFetcher::with_static_size((100, 100))).unwrap();

    let report = renderer.render_all(&config).await.unwrap();
    assert!(!report.is_success());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].provider, "mock_static");
    assert!(report.failures[0].error.contains("Size mismatch"));
    assert_eq!(report.outputs.len(), 1);
    assert_eq!(report.outputs[0].provider, "mock_tiles");
}

#[tokio::test]
async fn test_center_marker_is_drawn_on_output() {
    let dir = tempfile::tempdir().unwrap();
    let config = RenderConfig {
        markers: MarkerStyle {
            enabled: true,
            markers: vec![MapMarker::new("home", CENTER.lat, CENTER.lng)],
            labels: false,
            ..MarkerStyle::default()
        },
        ..test_config(dir.path())
    };
    let renderer = MapRenderer::with_fetcher(&config, MockFetcher::new()).unwrap();
    renderer.render_all(&config).await.unwrap();

    let map = image::open(dir.path().join("maps/mock_tiles/map.png"))
        .unwrap()
        .to_rgb8();
    assert_ne!(map.get_pixel(240, 160), &tile_color(132, 90, 8));
    assert_eq!(map.get_pixel(0, 0), &tile_color(131, 89, 8));
}

#[tokio::test]
async fn test_unknown_provider_and_unsafe_output_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let renderer =
        MapRenderer::with_fetcher(&test_config(dir.path()), MockFetcher::new()).unwrap();

    let unknown = RenderConfig {
        providers: vec!["nope".to_string()],
        ..test_config(dir.path())
    };
    assert!(matches!(
        renderer.render_all(&unknown).await,
        Err(MapError::UnknownProvider(_))
    ));

    let unsafe_out = RenderConfig {
        out_dir: "./".into(),
        ..test_config(dir.path())
    };
    assert!(matches!(
        renderer.render_all(&unsafe_out).await,
        Err(MapError::UnsafePath(_))
    ));
}

#[tokio::test]
async fn test_provider_id_cannot_escape_output_dir() {
    let dir = tempfile::tempdir().unwrap();
    let precious = dir.path().join("precious");
    std::fs::create_dir_all(&precious).unwrap();
    std::fs::write(precious.join("thesis.txt"), "keep me").unwrap();

    for id in [precious.to_string_lossy().into_owned(), "../precious".to_string()] {
        let config = RenderConfig {
            providers: vec![id.clone()],
            custom_providers: vec![Provider::xyz(&id, "mock://{z}/{x}/{y}").with_delay_ms(0)],
            ..test_config(dir.path())
        };
        let fetcher = MockFetcher::new();
        let renderer = MapRenderer::with_fetcher(&config, fetcher.clone()).unwrap();

        assert!(matches!(
            renderer.render_all(&config).await,
            Err(MapError::UnsafePath(_))
        ));
        assert!(fetcher.requests().is_empty());
    }

    assert!(precious.join("thesis.txt").is_file());
    assert!(!precious.join("map.png").exists());
}
