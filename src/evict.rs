//! Eviction and interest reprocessing.
//!
//! Eviction bounds process memory and the recent-tiles set as the aircraft
//! moves on; reprocessing replays cached tiles through the pipeline with
//! fresh classifier and rescue settings after the user's interests change.

use std::sync::Arc;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::error::DiscoveryResult;
use crate::grid::{haversine_km, TileKey};
use crate::pipeline::{CancelToken, TileFetcher};
use crate::registry::PoiRegistry;
use crate::rescue::DimensionHistory;
use crate::scheduler::RecentTiles;
use crate::store::{GeodataStore, Store};

pub struct EvictionController {
    recent: Arc<RecentTiles>,
    history: Arc<DimensionHistory>,
    registry: Arc<PoiRegistry>,
    store: Arc<dyn Store>,
    fetcher: Arc<TileFetcher>,
    /// Dedicated small pool so a reprocess sweep cannot starve the ticker.
    pool: rayon::ThreadPool,
}

impl EvictionController {
    pub fn new(
        recent: Arc<RecentTiles>,
        history: Arc<DimensionHistory>,
        registry: Arc<PoiRegistry>,
        store: Arc<dyn Store>,
        fetcher: Arc<TileFetcher>,
    ) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(3)
            .thread_name(|idx| format!("reprocess-{idx}"))
            .build()
            .expect("failed to create reprocess pool");
        Self {
            recent,
            history,
            registry,
            store,
            fetcher,
            pool,
        }
    }

    /// Drop recent-tile entries (and their dimension stats) beyond
    /// `threshold_km`, making those tiles eligible for re-fetch.
    /// Idempotent; a threshold of 0 reopens everything.
    pub fn evict_far_tiles(&self, lat: f64, lon: f64, threshold_km: f64) -> usize {
        let dropped = self.recent.retain_within(lat, lon, threshold_km);
        self.history.retain_within(lat, lon, threshold_km);
        if dropped > 0 {
            info!("evicted {dropped} far tiles (threshold {threshold_km} km)");
        }
        dropped
    }

    /// Remove POIs beyond `threshold_km` from the registry and the store.
    pub fn evict_far_pois(&self, lat: f64, lon: f64, threshold_km: f64) -> DiscoveryResult<usize> {
        let far: Vec<String> = self
            .registry
            .all()
            .into_iter()
            .filter(|poi| haversine_km(lat, lon, poi.lat, poi.lon) > threshold_km)
            .map(|poi| poi.wikidata_id)
            .collect();
        if far.is_empty() {
            return Ok(0);
        }
        self.registry.evict(&far)?;
        info!("evicted {} far POIs (threshold {threshold_km} km)", far.len());
        Ok(far.len())
    }

    /// Replay every cached tile within `radius_km` through the pipeline
    /// with `force = true`. Per-tile failures are logged and skipped;
    /// cancellation stops the sweep between tiles.
    pub fn reprocess_near_tiles(
        &self,
        lat: f64,
        lon: f64,
        radius_km: f64,
        cancel: &CancelToken,
    ) -> DiscoveryResult<usize> {
        let keys: Vec<String> = self
            .store
            .tile_keys()?
            .into_iter()
            .filter(|key| match TileKey::from_cache_key(key) {
                Some(tile) => {
                    let (clat, clon) = tile.center();
                    haversine_km(lat, lon, clat, clon) <= radius_km
                }
                None => false,
            })
            .collect();

        info!("reprocessing {} cached tiles within {radius_km} km", keys.len());

        let fetcher = Arc::clone(&self.fetcher);
        let replayed = self.pool.install(|| {
            keys.par_iter()
                .filter(|key| {
                    if cancel.is_cancelled() {
                        return false;
                    }
                    match fetcher.reprocess_cached(key, cancel) {
                        Ok(Some(_)) => true,
                        Ok(None) => false,
                        Err(err) => {
                            warn!("reprocess of {key} failed: {err}");
                            false
                        }
                    }
                })
                .count()
        });

        Ok(replayed)
    }
}
