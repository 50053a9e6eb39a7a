//! The authoritative in-memory view of tracked POIs.
//!
//! Live records sit in a concurrent map; durable state goes through the
//! injected [`PoiStore`]. Scores change only through [`PoiRegistry::set_score`]
//! and stay in memory; the durable record is refreshed on the next upsert.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::DiscoveryResult;
use crate::model::Poi;
use crate::store::PoiStore;

/// Seeds a score when a POI enters live tracking, before the first
/// scheduled scoring pass reaches it.
pub type ScoringCallback = Box<dyn Fn(&Poi) -> f64 + Send + Sync>;

pub struct PoiRegistry {
    pois: DashMap<String, Poi>,
    store: Arc<dyn PoiStore>,
    scoring: RwLock<Option<ScoringCallback>>,
}

impl PoiRegistry {
    pub fn new(store: Arc<dyn PoiStore>) -> Self {
        Self {
            pois: DashMap::new(),
            store,
            scoring: RwLock::new(None),
        }
    }

    /// Registry pre-populated with the store's persisted POIs.
    pub fn with_persisted(store: Arc<dyn PoiStore>) -> DiscoveryResult<Self> {
        let registry = Self::new(Arc::clone(&store));
        for poi in store.load_pois()? {
            registry.pois.insert(poi.wikidata_id.clone(), poi);
        }
        Ok(registry)
    }

    /// Install the callback that seeds scores on upsert/track.
    pub fn set_scoring_callback(&self, callback: ScoringCallback) {
        *self.scoring.write() = Some(callback);
    }

    /// Insert or update a POI. `created_at`, `lat` and `lon` are immutable
    /// after first insert; badges are additive; the live score survives
    /// the update. Nothing enters the live map unless the store accepted
    /// the write, so a failed upsert is retried by a later fetch.
    pub fn upsert(&self, mut poi: Poi) -> DiscoveryResult<()> {
        if let Some(existing) = self.pois.get(&poi.wikidata_id) {
            poi.created_at = existing.created_at;
            poi.lat = existing.lat;
            poi.lon = existing.lon;
            poi.score = existing.score;
            poi.last_scored_at = existing.last_scored_at;
            if poi.last_narrated_at.is_none() {
                poi.last_narrated_at = existing.last_narrated_at;
            }
            for badge in &existing.badges {
                if !poi.badges.contains(badge) {
                    poi.badges.push(badge.clone());
                }
            }
        }

        if let Some(callback) = self.scoring.read().as_ref() {
            poi.score = callback(&poi);
            poi.last_scored_at = Some(Utc::now());
        }

        self.store.upsert_poi(&poi)?;
        self.pois.insert(poi.wikidata_id.clone(), poi);
        Ok(())
    }

    /// Re-assert a known POI into live tracking without rewriting its
    /// persistent record. Used when a tile response returns an entity the
    /// registry already owns.
    pub fn track(&self, poi: &Poi) {
        if !self.pois.contains_key(&poi.wikidata_id) {
            let mut poi = poi.clone();
            if let Some(callback) = self.scoring.read().as_ref() {
                poi.score = callback(&poi);
                poi.last_scored_at = Some(Utc::now());
            }
            self.pois.insert(poi.wikidata_id.clone(), poi);
        }
    }

    /// Live POIs for the given qids.
    pub fn get_batch(&self, qids: &[String]) -> HashMap<String, Poi> {
        qids.iter()
            .filter_map(|qid| self.pois.get(qid).map(|p| (qid.clone(), p.clone())))
            .collect()
    }

    /// Copy-on-read snapshot of every live POI.
    pub fn all(&self) -> Vec<Poi> {
        self.pois.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Score update from the scorer; the only mutation path for scores.
    pub fn set_score(&self, qid: &str, score: f64) {
        if let Some(mut entry) = self.pois.get_mut(qid) {
            entry.score = score;
            entry.last_scored_at = Some(Utc::now());
        }
    }

    /// Record a narration, starting the freshness cooldown.
    pub fn mark_narrated(&self, qid: &str) {
        if let Some(mut entry) = self.pois.get_mut(qid) {
            entry.last_narrated_at = Some(Utc::now());
        }
    }

    /// Drop POIs from live tracking and the durable store.
    pub fn evict(&self, qids: &[String]) -> DiscoveryResult<()> {
        self.store.remove_pois(qids)?;
        for qid in qids {
            if self.pois.remove(qid).is_some() {
                debug!("evicted POI {qid}");
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.pois.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pois.is_empty()
    }
}
