//! Candidate tile ranking and the recent-tiles set.
//!
//! The ranking is pure: identical telemetry and recent-tile inputs produce
//! an identical candidate list. The ticker worker feeds the best candidate
//! to the fetch pipeline, one tile per tick.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use parking_lot::RwLock;

use crate::config::AreaConfig;
use crate::grid::{haversine_km, heading_deviation_deg, initial_bearing_deg, TileKey};
use crate::telemetry::Telemetry;

/// Half-angle of the forward cone; tiles beyond it are not scheduled.
pub const FORWARD_CONE_HALF_ANGLE_DEG: f64 = 60.0;

/// Tiles closer than this are admitted regardless of heading, km.
pub const NEAR_FIELD_KM: f64 = 5.0;

const REDUNDANCY_BASE_PENALTY_KM: f64 = 5.0;

/// A ranked tile candidate, transient per tick.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub tile: TileKey,
    pub center_lat: f64,
    pub center_lon: f64,
    pub distance_km: f64,
    pub cost: f64,
}

/// Heading weight for the cost function: 0.1 up to 100 kt, scaling
/// linearly through 0.5 at 200 kt to 0.9 at 300 kt.
fn heading_weight(ground_speed_kts: f64) -> f64 {
    (0.1 + 0.004 * (ground_speed_kts - 100.0)).clamp(0.1, 0.9)
}

/// Rank the tiles around the aircraft, cheapest first.
///
/// Expansion stops once a whole ring of tiles lies beyond
/// `max_dist_km + one tile edge`. When airborne, tiles farther than
/// [`NEAR_FIELD_KM`] outside the 120° forward cone are rejected; the home
/// tile and the near field are always admitted.
pub fn candidates(
    telemetry: &Telemetry,
    recent: &HashSet<TileKey>,
    area: &AreaConfig,
) -> Vec<Candidate> {
    let home = TileKey::for_position(telemetry.lat, telemetry.lon);
    let edge_km = home.circumscribed_radius_km();
    let limit_km = area.max_dist_km + edge_km;
    let weight = heading_weight(telemetry.ground_speed_kts);

    let mut visited: HashSet<TileKey> = HashSet::new();
    let mut out: Vec<Candidate> = Vec::new();

    let mut k = 0u32;
    loop {
        let ring: Vec<TileKey> = home
            .disk(k)
            .into_iter()
            .filter(|t| visited.insert(*t))
            .collect();
        if ring.is_empty() {
            break;
        }

        let mut ring_reaches = false;
        for tile in ring {
            let (center_lat, center_lon) = tile.center();
            // The aircraft is inside the home tile: distance 0 by definition
            let distance_km = if tile == home {
                0.0
            } else {
                haversine_km(telemetry.lat, telemetry.lon, center_lat, center_lon)
            };
            if distance_km > limit_km {
                continue;
            }
            ring_reaches = true;

            // Bearing is undefined on top of the tile center
            let deviation = if distance_km > f64::EPSILON {
                let bearing =
                    initial_bearing_deg(telemetry.lat, telemetry.lon, center_lat, center_lon);
                heading_deviation_deg(telemetry.heading_deg, bearing)
            } else {
                0.0
            };

            let outside_cone = telemetry.is_airborne()
                && distance_km > NEAR_FIELD_KM
                && tile != home
                && deviation > FORWARD_CONE_HALF_ANGLE_DEG;
            if outside_cone {
                continue;
            }

            let redundant = recent.contains(&tile)
                || tile.neighbors().iter().any(|n| recent.contains(n));
            let redundancy_penalty = if redundant {
                distance_km + REDUNDANCY_BASE_PENALTY_KM
            } else {
                0.0
            };

            let cost = distance_km + redundancy_penalty + deviation * weight;
            out.push(Candidate {
                tile,
                center_lat,
                center_lon,
                distance_km,
                cost,
            });
        }

        if !ring_reaches && k > 0 {
            break;
        }
        k += 1;
    }

    // Cell id as tie-break keeps identical inputs fully deterministic
    out.sort_by(|a, b| {
        a.cost
            .partial_cmp(&b.cost)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.tile.cmp(&b.tile))
    });
    out
}

/// Tile keys checked during this process lifetime.
///
/// Written by the ticker after a fetch, pruned by the eviction controller;
/// a reader/writer lock covers both.
#[derive(Default)]
pub struct RecentTiles {
    inner: RwLock<HashMap<TileKey, Instant>>,
}

impl RecentTiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, tile: TileKey) {
        self.inner.write().insert(tile, Instant::now());
    }

    pub fn contains(&self, tile: &TileKey) -> bool {
        self.inner.read().contains_key(tile)
    }

    /// Copy of the current key set for the pure ranking call.
    pub fn snapshot(&self) -> HashSet<TileKey> {
        self.inner.read().keys().copied().collect()
    }

    /// Drop entries whose tile center lies beyond `threshold_km`, making
    /// them eligible for re-fetch. Idempotent.
    pub fn retain_within(&self, lat: f64, lon: f64, threshold_km: f64) -> usize {
        let mut inner = self.inner.write();
        let before = inner.len();
        inner.retain(|tile, _| {
            let (clat, clon) = tile.center();
            haversine_km(lat, lon, clat, clon) <= threshold_km
        });
        before - inner.len()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
