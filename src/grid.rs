//! Hex grid over H3 plus the great-circle helpers the core needs.
//!
//! Tiles are H3 cells at a fixed resolution (~10 km edge). The cell id is
//! the only tile identity the rest of the crate sees; centers, corners and
//! radii are derived on demand.

use geo::{HaversineBearing, HaversineDestination, HaversineDistance, Point};
use h3o::{CellIndex, LatLng, Resolution};

/// Fixed grid resolution. Resolution 5 cells average a ~9.85 km edge.
pub const TILE_RESOLUTION: Resolution = Resolution::Five;

/// Fallback query radius when a cache entry predates the radius field, km.
pub const DEFAULT_QUERY_RADIUS_KM: f64 = 9.8;

const CACHE_KEY_PREFIX: &str = "wd_h3_";

/// Opaque tile identifier at the fixed resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey(CellIndex);

impl TileKey {
    /// Tile containing a position. Out-of-range coordinates are clamped,
    /// never rejected.
    pub fn for_position(lat: f64, lon: f64) -> Self {
        let lat = clamp_lat(lat);
        let lon = normalize_lon(lon);
        let ll = LatLng::new(lat, lon).expect("clamped coordinates are finite");
        Self(ll.to_cell(TILE_RESOLUTION))
    }

    /// Center of the tile as (lat, lon) degrees.
    pub fn center(&self) -> (f64, f64) {
        let ll = LatLng::from(self.0);
        (ll.lat(), ll.lng())
    }

    /// The 6 adjacent tiles (5 around pentagons).
    pub fn neighbors(&self) -> Vec<TileKey> {
        self.0
            .grid_disk::<Vec<_>>(1)
            .into_iter()
            .filter(|c| *c != self.0)
            .map(TileKey)
            .collect()
    }

    /// All tiles within `k` rings, origin included.
    pub fn disk(&self, k: u32) -> Vec<TileKey> {
        self.0.grid_disk::<Vec<_>>(k).into_iter().map(TileKey).collect()
    }

    /// Boundary vertices as (lat, lon) degrees.
    pub fn corners(&self) -> Vec<(f64, f64)> {
        self.0
            .boundary()
            .iter()
            .map(|v| (v.lat(), v.lng()))
            .collect()
    }

    /// Circumscribed radius: the distance from the center to the farthest
    /// boundary vertex, floored at [`DEFAULT_QUERY_RADIUS_KM`]. This is the
    /// exact radius used for the SPARQL query that fills the tile's cache
    /// entry.
    pub fn circumscribed_radius_km(&self) -> f64 {
        let (lat, lon) = self.center();
        self.corners()
            .iter()
            .map(|(vlat, vlon)| haversine_km(lat, lon, *vlat, *vlon))
            .fold(DEFAULT_QUERY_RADIUS_KM, f64::max)
    }

    /// Stable persistent cache key: `wd_h3_<cell>`.
    pub fn cache_key(&self) -> String {
        format!("{CACHE_KEY_PREFIX}{}", self.0)
    }

    /// Parse a cache key back into a tile. Returns None for foreign keys.
    pub fn from_cache_key(key: &str) -> Option<Self> {
        let cell = key.strip_prefix(CACHE_KEY_PREFIX)?;
        cell.parse::<CellIndex>().ok().map(TileKey)
    }
}

impl std::fmt::Display for TileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Great-circle distance in km.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let a = Point::new(lon1, lat1);
    let b = Point::new(lon2, lat2);
    a.haversine_distance(&b) / 1000.0
}

/// Initial great-circle bearing in degrees, normalized to [0, 360).
/// Safe across the antimeridian: Δlon is handled on the sphere, not by
/// naive subtraction.
pub fn initial_bearing_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let a = Point::new(lon1, lat1);
    let b = Point::new(lon2, lat2);
    a.haversine_bearing(b).rem_euclid(360.0)
}

/// Absolute deviation between a heading and a bearing, wrap-aware, ≤ 180.
pub fn heading_deviation_deg(heading: f64, bearing: f64) -> f64 {
    let d = (bearing - heading).rem_euclid(360.0);
    if d > 180.0 {
        360.0 - d
    } else {
        d
    }
}

/// Point reached by travelling `distance_m` along `bearing_deg`.
pub fn project_position(lat: f64, lon: f64, bearing_deg: f64, distance_m: f64) -> (f64, f64) {
    let p = Point::new(lon, lat).haversine_destination(bearing_deg, distance_m);
    (p.y(), p.x())
}

/// Clamp latitude to the usable band, |lat| ≤ 89.
pub fn clamp_lat(lat: f64) -> f64 {
    lat.clamp(-89.0, 89.0)
}

/// Normalize longitude to [-180, 180).
pub fn normalize_lon(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}
