//! Durable-state contracts and the in-memory reference implementation.
//!
//! The core never talks to a database directly; everything durable goes
//! through these traits. [`MemoryStore`] backs the tests and embedders
//! that bring no database of their own.

use std::collections::HashMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::DiscoveryResult;
use crate::model::{Poi, SeenEntity};

/// Fallback radius for cache entries that predate the radius field, meters.
pub const DEFAULT_QUERY_RADIUS_M: u32 = 9_800;

/// One cached tile response: the raw payload plus the exact query that
/// produced it. Key collisions overwrite.
#[derive(Debug, Clone)]
pub struct GeodataCacheEntry {
    /// `wd_h3_<cell>` cache key.
    pub key: String,
    /// Raw SPARQL response body.
    pub payload: Bytes,
    /// Radius used in the producing query; None for legacy entries.
    pub query_radius_m: Option<u32>,
    pub tile_lat: f64,
    pub tile_lon: f64,
    pub fetched_at: DateTime<Utc>,
}

impl GeodataCacheEntry {
    /// Stored radius, falling back to [`DEFAULT_QUERY_RADIUS_M`].
    pub fn radius_m(&self) -> u32 {
        self.query_radius_m.unwrap_or(DEFAULT_QUERY_RADIUS_M)
    }

    pub fn radius_km(&self) -> f64 {
        f64::from(self.radius_m()) / 1000.0
    }
}

/// Persistent raw-payload cache, keyed by tile cache key.
pub trait GeodataStore: Send + Sync {
    fn get_tile(&self, key: &str) -> DiscoveryResult<Option<GeodataCacheEntry>>;
    fn put_tile(&self, entry: GeodataCacheEntry) -> DiscoveryResult<()>;
    fn tile_keys(&self) -> DiscoveryResult<Vec<String>>;
    fn remove_tile(&self, key: &str) -> DiscoveryResult<()>;
}

/// Persistent seen-entity markers.
pub trait SeenStore: Send + Sync {
    /// Markers for the given qids; absent qids are simply missing from the map.
    fn seen_batch(&self, qids: &[String]) -> DiscoveryResult<HashMap<String, SeenEntity>>;
    fn put_seen(&self, entity: SeenEntity) -> DiscoveryResult<()>;
    fn remove_seen(&self, qids: &[String]) -> DiscoveryResult<()>;
}

/// Persistent POI records (the registry's write-through target).
pub trait PoiStore: Send + Sync {
    fn upsert_poi(&self, poi: &Poi) -> DiscoveryResult<()>;
    fn remove_pois(&self, qids: &[String]) -> DiscoveryResult<()>;
    fn load_pois(&self) -> DiscoveryResult<Vec<Poi>>;
}

/// Everything the core needs from the durable store.
pub trait Store: GeodataStore + SeenStore + PoiStore {}

impl<T: GeodataStore + SeenStore + PoiStore> Store for T {}

/// In-memory store. State lives for the process lifetime only.
#[derive(Default)]
pub struct MemoryStore {
    tiles: RwLock<HashMap<String, GeodataCacheEntry>>,
    seen: RwLock<HashMap<String, SeenEntity>>,
    pois: RwLock<HashMap<String, Poi>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GeodataStore for MemoryStore {
    fn get_tile(&self, key: &str) -> DiscoveryResult<Option<GeodataCacheEntry>> {
        Ok(self.tiles.read().get(key).cloned())
    }

    fn put_tile(&self, entry: GeodataCacheEntry) -> DiscoveryResult<()> {
        self.tiles.write().insert(entry.key.clone(), entry);
        Ok(())
    }

    fn tile_keys(&self) -> DiscoveryResult<Vec<String>> {
        let mut keys: Vec<String> = self.tiles.read().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn remove_tile(&self, key: &str) -> DiscoveryResult<()> {
        self.tiles.write().remove(key);
        Ok(())
    }
}

impl SeenStore for MemoryStore {
    fn seen_batch(&self, qids: &[String]) -> DiscoveryResult<HashMap<String, SeenEntity>> {
        let seen = self.seen.read();
        Ok(qids
            .iter()
            .filter_map(|qid| seen.get(qid).map(|e| (qid.clone(), e.clone())))
            .collect())
    }

    fn put_seen(&self, entity: SeenEntity) -> DiscoveryResult<()> {
        self.seen.write().insert(entity.qid.clone(), entity);
        Ok(())
    }

    fn remove_seen(&self, qids: &[String]) -> DiscoveryResult<()> {
        let mut seen = self.seen.write();
        for qid in qids {
            seen.remove(qid);
        }
        Ok(())
    }
}

impl PoiStore for MemoryStore {
    fn upsert_poi(&self, poi: &Poi) -> DiscoveryResult<()> {
        self.pois
            .write()
            .insert(poi.wikidata_id.clone(), poi.clone());
        Ok(())
    }

    fn remove_pois(&self, qids: &[String]) -> DiscoveryResult<()> {
        let mut pois = self.pois.write();
        for qid in qids {
            pois.remove(qid);
        }
        Ok(())
    }

    fn load_pois(&self) -> DiscoveryResult<Vec<Poi>> {
        Ok(self.pois.read().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SeenReason;

    fn entry(key: &str, radius: Option<u32>) -> GeodataCacheEntry {
        GeodataCacheEntry {
            key: key.into(),
            payload: Bytes::from_static(b"{}"),
            query_radius_m: radius,
            tile_lat: 52.5,
            tile_lon: 13.4,
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn test_tile_roundtrip_and_overwrite() {
        let store = MemoryStore::new();
        store.put_tile(entry("wd_h3_abc", Some(10_000))).unwrap();
        store.put_tile(entry("wd_h3_abc", Some(11_000))).unwrap();

        let got = store.get_tile("wd_h3_abc").unwrap().unwrap();
        assert_eq!(got.radius_m(), 11_000);
        assert_eq!(store.tile_keys().unwrap(), vec!["wd_h3_abc".to_string()]);

        store.remove_tile("wd_h3_abc").unwrap();
        assert!(store.get_tile("wd_h3_abc").unwrap().is_none());
    }

    #[test]
    fn test_missing_radius_falls_back() {
        let e = entry("wd_h3_abc", None);
        assert_eq!(e.radius_m(), DEFAULT_QUERY_RADIUS_M);
        assert!((e.radius_km() - 9.8).abs() < 1e-9);
    }

    #[test]
    fn test_seen_batch_returns_only_known() {
        let store = MemoryStore::new();
        store
            .put_seen(SeenEntity::new("Q1", vec!["Q5".into()], SeenReason::Ignored))
            .unwrap();

        let got = store
            .seen_batch(&["Q1".to_string(), "Q2".to_string()])
            .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got["Q1"].reason, SeenReason::Ignored);

        store.remove_seen(&["Q1".to_string()]).unwrap();
        assert!(store.seen_batch(&["Q1".to_string()]).unwrap().is_empty());
    }
}
