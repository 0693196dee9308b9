//! Core constants of the spherical Web Mercator tiling scheme and the
//! defaults the baking tool ships with.
//! Keeping them in a single place makes it easier to tweak engine-wide magic numbers.

/// Default square tile size in pixels.
pub const TILE_SIZE: u32 = 256;

/// WGS84 equatorial radius in meters, used as the sphere radius.
pub const EARTH_RADIUS: f64 = 6378137.0;

/// Latitude limit of Web Mercator; beyond it the projection diverges.
pub const MAX_LATITUDE: f64 = 85.05112878;

/// Highest zoom the planner will produce.
pub const MAX_ZOOM: u8 = 24;

/// Markers whose screen position lies further than this outside the
/// image are skipped.
pub const MARKER_MARGIN_PX: f64 = 20.0;

/// Fill color of tiles above or below the world (off-world rows).
pub const BLANK_TILE_RGB: [u8; 3] = [240, 240, 240];

/// Fill color of tiles that could not be fetched.
pub const FAILED_TILE_RGB: [u8; 3] = [230, 230, 230];

/// User-Agent sent to tile servers.
pub const USER_AGENT: &str = "rastermap/0.1 (embedded static map baking)";

/// Radius of the dot drawn at the center of the range rings.
pub const RING_CENTER_DOT_RADIUS: i32 = 2;

/// Pixel values per line in the generated RGB565 header.
pub const HEADER_VALUES_PER_LINE: usize = 12;
