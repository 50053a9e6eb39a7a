//! Dimension rescue: promoting physically dominant uncategorized entities.
//!
//! An entity the taxonomy does not know can still be narration-worthy when
//! it towers over everything around it. Rescue promotes an uncategorized
//! article when one of its dimensions strictly exceeds both the local
//! context (tile maxima raised by neighborhood medians) and an absolute
//! floor.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::config::RescueConfig;
use crate::grid::{haversine_km, TileKey};
use crate::model::Article;

/// Synthetic categories assigned by rescue, by triggering dimension.
pub const CATEGORY_AREA: &str = "area";
pub const CATEGORY_HEIGHT: &str = "height";
pub const CATEGORY_LENGTH: &str = "length";

const MULTIPLIER_CAP: f64 = 4.0;

/// Per-tile maxima of the three rescue dimensions. Zero means absent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TileDimensionStats {
    pub max_height: f64,
    pub max_length: f64,
    pub max_area: f64,
}

/// Maxima over all non-ignored articles in a tile.
pub fn tile_stats(articles: &[Article]) -> TileDimensionStats {
    tile_stats_excluding(articles, "")
}

/// Maxima over all non-ignored articles except `skip_qid`.
///
/// Rescue evaluates each candidate against the rest of its tile, so the
/// candidate's own dimensions must not raise the bar it has to clear.
pub fn tile_stats_excluding(articles: &[Article], skip_qid: &str) -> TileDimensionStats {
    let mut stats = TileDimensionStats::default();
    for article in articles {
        if article.ignored || article.qid == skip_qid {
            continue;
        }
        let Some(dims) = article.dimensions else {
            continue;
        };
        if let Some(h) = dims.height {
            stats.max_height = stats.max_height.max(h);
        }
        if let Some(l) = dims.length {
            stats.max_length = stats.max_length.max(l);
        }
        if let Some(a) = dims.area {
            stats.max_area = stats.max_area.max(a);
        }
    }
    stats
}

/// Result of a successful rescue.
#[derive(Debug, Clone, PartialEq)]
pub struct RescueOutcome {
    pub category: &'static str,
    /// ≥ 1.0, how far past the floor the triggering dimension reaches.
    pub multiplier: f64,
}

/// Rescue predicate.
///
/// A dimension triggers when it strictly exceeds both the effective local
/// maximum (tile max excluding the candidate, raised to the neighborhood
/// median when that is larger) and the configured absolute floor. Triggering
/// dimensions are considered in the order area, height, length.
pub fn evaluate(
    article: &Article,
    tile_max: &TileDimensionStats,
    medians: &TileDimensionStats,
    cfg: &RescueConfig,
) -> Option<RescueOutcome> {
    let dims = article.dimensions?;

    let checks = [
        (
            dims.area,
            tile_max.max_area.max(medians.max_area),
            cfg.min_area,
            CATEGORY_AREA,
        ),
        (
            dims.height,
            tile_max.max_height.max(medians.max_height),
            cfg.min_height,
            CATEGORY_HEIGHT,
        ),
        (
            dims.length,
            tile_max.max_length.max(medians.max_length),
            cfg.min_length,
            CATEGORY_LENGTH,
        ),
    ];

    for (value, local_max, floor, category) in checks {
        let Some(v) = value else { continue };
        if v > local_max && v > floor {
            return Some(RescueOutcome {
                category,
                multiplier: (v / floor).clamp(1.0, MULTIPLIER_CAP),
            });
        }
    }
    None
}

/// Dimension maxima of recently processed tiles, for the neighborhood
/// median lookup. Shared between pipeline runs.
#[derive(Default)]
pub struct DimensionHistory {
    inner: RwLock<HashMap<TileKey, TileDimensionStats>>,
}

impl DimensionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, tile: TileKey, stats: TileDimensionStats) {
        self.inner.write().insert(tile, stats);
    }

    /// Per-dimension medians over the recorded tiles within `radius_km` of
    /// `center`, excluding `center` itself (its maxima are the other arm of
    /// the rescue predicate). Tiles without a positive value for a
    /// dimension do not dilute that dimension's median.
    pub fn neighborhood_medians(&self, center: TileKey, radius_km: f64) -> TileDimensionStats {
        let (lat, lon) = center.center();
        let inner = self.inner.read();
        let mut heights = Vec::new();
        let mut lengths = Vec::new();
        let mut areas = Vec::new();

        for (tile, stats) in inner.iter() {
            if *tile == center {
                continue;
            }
            let (clat, clon) = tile.center();
            if haversine_km(lat, lon, clat, clon) > radius_km {
                continue;
            }
            if stats.max_height > 0.0 {
                heights.push(stats.max_height);
            }
            if stats.max_length > 0.0 {
                lengths.push(stats.max_length);
            }
            if stats.max_area > 0.0 {
                areas.push(stats.max_area);
            }
        }

        TileDimensionStats {
            max_height: median(&mut heights),
            max_length: median(&mut lengths),
            max_area: median(&mut areas),
        }
    }

    /// Drop stats for tiles beyond `threshold_km`. Idempotent.
    pub fn retain_within(&self, lat: f64, lon: f64, threshold_km: f64) {
        self.inner.write().retain(|tile, _| {
            let (clat, clon) = tile.center();
            haversine_km(lat, lon, clat, clon) <= threshold_km
        });
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        (values[mid - 1] + values[mid]) / 2.0
    }
}
