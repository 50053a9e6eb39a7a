//! The tile fetch pipeline: from a scheduled candidate to upserted POIs.
//!
//! One run per tile at a time, guarded by an in-flight lease. The raw
//! SPARQL payload is cached verbatim so cache replays and interest
//! reprocessing go through exactly the same path as a live fetch.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::classify::{Classification, Classifier, InstanceCache};
use crate::config::DiscoveryConfig;
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::grid::TileKey;
use crate::hydrate::{self, CountryResolver};
use crate::merge;
use crate::model::{Article, SeenEntity, SeenReason};
use crate::registry::PoiRegistry;
use crate::rescue::{self, DimensionHistory, TileDimensionStats};
use crate::scheduler::{Candidate, RecentTiles};
use crate::store::{GeodataCacheEntry, GeodataStore, SeenStore, Store};
use crate::wikidata::{self, KnowledgeGraph};

/// Cooperative cancellation flag shared between workers and pipelines.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Cancellation plus the run deadline, checked between pipeline steps.
struct RunContext {
    cancel: CancelToken,
    deadline: Instant,
}

impl RunContext {
    fn new(cancel: &CancelToken, deadline: Duration) -> Self {
        Self {
            cancel: cancel.clone(),
            deadline: Instant::now() + deadline,
        }
    }

    fn check(&self, stage: &str) -> DiscoveryResult<()> {
        if self.cancel.is_cancelled() {
            return Err(DiscoveryError::Cancelled(stage.to_string()));
        }
        if Instant::now() > self.deadline {
            return Err(DiscoveryError::Cancelled(format!("deadline hit at {stage}")));
        }
        Ok(())
    }
}

/// What a `fetch_tile` call did.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Another pipeline holds this tile's lease.
    AlreadyRunning,
    /// The tile failed recently and is still cooling down.
    CoolingDown,
    Processed(ProcessOutcome),
}

/// Per-run pipeline counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessOutcome {
    /// Articles parsed from the payload after qid dedup.
    pub parsed: usize,
    /// POIs upserted into the registry.
    pub promoted: usize,
    /// Articles promoted by dimension rescue.
    pub rescued: usize,
}

pub struct TileFetcher {
    cfg: DiscoveryConfig,
    graph: Arc<dyn KnowledgeGraph>,
    store: Arc<dyn Store>,
    registry: Arc<PoiRegistry>,
    classifier: Arc<dyn Classifier>,
    countries: Arc<dyn CountryResolver>,
    recent: Arc<RecentTiles>,
    history: Arc<DimensionHistory>,
    instance_cache: InstanceCache,
    /// Tiles with a pipeline currently running.
    in_flight: Mutex<HashSet<TileKey>>,
    /// Tiles that hit a network failure, with the failure time.
    cooldowns: Mutex<HashMap<TileKey, Instant>>,
}

/// Removes the tile from the in-flight set on every exit path, including
/// cancellation and panics.
struct TileLease<'a> {
    fetcher: &'a TileFetcher,
    tile: TileKey,
}

impl Drop for TileLease<'_> {
    fn drop(&mut self) {
        self.fetcher.in_flight.lock().remove(&self.tile);
    }
}

impl TileFetcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: DiscoveryConfig,
        graph: Arc<dyn KnowledgeGraph>,
        store: Arc<dyn Store>,
        registry: Arc<PoiRegistry>,
        classifier: Arc<dyn Classifier>,
        countries: Arc<dyn CountryResolver>,
        recent: Arc<RecentTiles>,
        history: Arc<DimensionHistory>,
    ) -> Self {
        Self {
            cfg,
            graph,
            store,
            registry,
            classifier,
            countries,
            recent,
            history,
            instance_cache: InstanceCache::default(),
            in_flight: Mutex::new(HashSet::new()),
            cooldowns: Mutex::new(HashMap::new()),
        }
    }

    fn try_lease(&self, tile: TileKey) -> Option<TileLease<'_>> {
        if self.in_flight.lock().insert(tile) {
            Some(TileLease {
                fetcher: self,
                tile,
            })
        } else {
            None
        }
    }

    fn cooling_down(&self, tile: &TileKey) -> bool {
        let window = Duration::from_secs(self.cfg.pipeline.network_cooldown_secs);
        let mut cooldowns = self.cooldowns.lock();
        match cooldowns.get(tile) {
            Some(failed_at) if failed_at.elapsed() < window => true,
            Some(_) => {
                cooldowns.remove(tile);
                false
            }
            None => false,
        }
    }

    /// Fetch one tile: cache replay or a single SPARQL query, then the full
    /// processing chain. At most one concurrent run per tile key.
    pub fn fetch_tile(
        &self,
        candidate: &Candidate,
        cancel: &CancelToken,
    ) -> DiscoveryResult<FetchOutcome> {
        let tile = candidate.tile;
        let Some(_lease) = self.try_lease(tile) else {
            return Ok(FetchOutcome::AlreadyRunning);
        };
        if self.cooling_down(&tile) {
            return Ok(FetchOutcome::CoolingDown);
        }

        let ctx = RunContext::new(cancel, Duration::from_secs(self.cfg.pipeline.deadline_secs));
        ctx.check("fetch")?;

        let key = tile.cache_key();
        let (lat, lon) = tile.center();
        let payload = match self.store.get_tile(&key)? {
            Some(entry) => {
                debug!("cache hit for {key} (radius {:.1} km)", entry.radius_km());
                entry.payload
            }
            None => {
                let radius_km = tile.circumscribed_radius_km();
                let payload = match self.graph.query_area(
                    lat,
                    lon,
                    radius_km,
                    self.cfg.area.max_articles,
                ) {
                    Ok(payload) => payload,
                    Err(err) => {
                        if matches!(err, DiscoveryError::Network(_)) {
                            self.cooldowns.lock().insert(tile, Instant::now());
                        }
                        return Err(err);
                    }
                };
                // A cancelled fetch discards its results without caching
                ctx.check("cache write")?;
                self.store.put_tile(GeodataCacheEntry {
                    key: key.clone(),
                    payload: payload.clone(),
                    query_radius_m: Some((radius_km * 1000.0).round() as u32),
                    tile_lat: lat,
                    tile_lon: lon,
                    fetched_at: Utc::now(),
                })?;
                payload
            }
        };

        self.recent.insert(tile);

        let medians = self
            .history
            .neighborhood_medians(tile, self.cfg.rescue.promote_by_dimension.radius_km);
        match self.process_payload(&ctx, &payload, lat, lon, false, &medians) {
            Ok(outcome) => {
                info!(
                    "tile {tile}: {} parsed, {} promoted, {} rescued",
                    outcome.parsed, outcome.promoted, outcome.rescued
                );
                Ok(FetchOutcome::Processed(outcome))
            }
            Err(DiscoveryError::Parse(err)) => {
                warn!("payload for {key} unparseable, treating as empty: {err}");
                Ok(FetchOutcome::Processed(ProcessOutcome::default()))
            }
            Err(err) => Err(err),
        }
    }

    /// Run the processing chain over a raw payload. With `force`, seen
    /// markers are revoked and existing POIs re-evaluated instead of
    /// short-circuited; used by the reprocess controller.
    pub fn process_tile_data(
        &self,
        cancel: &CancelToken,
        payload: &[u8],
        center_lat: f64,
        center_lon: f64,
        force: bool,
        medians: &TileDimensionStats,
    ) -> DiscoveryResult<ProcessOutcome> {
        let ctx = RunContext::new(cancel, Duration::from_secs(self.cfg.pipeline.deadline_secs));
        self.process_payload(&ctx, payload, center_lat, center_lon, force, medians)
    }

    /// Replay a cached tile with `force = true`. Returns None when the key
    /// is unknown or the tile's lease is held.
    pub fn reprocess_cached(
        &self,
        key: &str,
        cancel: &CancelToken,
    ) -> DiscoveryResult<Option<ProcessOutcome>> {
        let Some(tile) = TileKey::from_cache_key(key) else {
            return Ok(None);
        };
        let Some(entry) = self.store.get_tile(key)? else {
            return Ok(None);
        };
        let Some(_lease) = self.try_lease(tile) else {
            return Ok(None);
        };

        let ctx = RunContext::new(cancel, Duration::from_secs(self.cfg.pipeline.deadline_secs));
        let medians = self
            .history
            .neighborhood_medians(tile, self.cfg.rescue.promote_by_dimension.radius_km);
        match self.process_payload(
            &ctx,
            &entry.payload,
            entry.tile_lat,
            entry.tile_lon,
            true,
            &medians,
        ) {
            Ok(outcome) => Ok(Some(outcome)),
            Err(DiscoveryError::Parse(err)) => {
                warn!("cached payload for {key} unparseable: {err}");
                Ok(Some(ProcessOutcome::default()))
            }
            Err(err) => Err(err),
        }
    }

    fn mark_seen(&self, qid: &str, instances: Vec<String>, reason: SeenReason) {
        debug!("marking {qid} seen ({reason:?})");
        if let Err(err) = self
            .store
            .put_seen(SeenEntity::new(qid, instances, reason))
        {
            warn!("failed to persist seen marker for {qid}: {err}");
        }
    }

    fn process_payload(
        &self,
        ctx: &RunContext,
        payload: &[u8],
        center_lat: f64,
        center_lon: f64,
        force: bool,
        medians: &TileDimensionStats,
    ) -> DiscoveryResult<ProcessOutcome> {
        let tile = TileKey::for_position(center_lat, center_lon);
        let mut articles = wikidata::parse_area_response(payload)?;
        let mut outcome = ProcessOutcome {
            parsed: articles.len(),
            ..Default::default()
        };
        if articles.is_empty() {
            self.history.record(tile, TileDimensionStats::default());
            return Ok(outcome);
        }
        let all_qids: Vec<String> = articles.iter().map(|a| a.qid.clone()).collect();

        // Step 4: entities the registry already owns stay tracked and leave
        // the pipeline; a forced run re-evaluates them instead.
        ctx.check("registry filter")?;
        let existing = self.registry.get_batch(&all_qids);
        if !force {
            for poi in existing.values() {
                self.registry.track(poi);
            }
            articles.retain(|a| !existing.contains_key(&a.qid));
        }

        // Step 5: seen filter, or marker revocation on a forced run
        ctx.check("seen filter")?;
        if force {
            self.store.remove_seen(&all_qids)?;
        } else {
            let remaining: Vec<String> = articles.iter().map(|a| a.qid.clone()).collect();
            let seen = self.store.seen_batch(&remaining)?;
            articles.retain(|a| !seen.contains_key(&a.qid));
        }

        // Step 6: classification. Instance ids come from the seen-cache
        // first so revoked entities keep their recorded taxonomy.
        ctx.check("classify")?;
        let to_classify: Vec<(String, Vec<String>)> = articles
            .iter()
            .filter(|a| a.category.is_none() && !a.ignored)
            .map(|a| {
                let instances = self
                    .instance_cache
                    .get(&a.qid)
                    .unwrap_or_else(|| a.instances.clone());
                (a.qid.clone(), instances)
            })
            .collect();
        let classified = self.classifier.classify_batch(&to_classify);
        for article in articles.iter_mut() {
            match classified.get(&article.qid) {
                Some(Classification::Category(category)) => {
                    article.category = Some(category.clone());
                }
                Some(Classification::Ignored { instances }) => {
                    article.ignored = true;
                    self.instance_cache.record(&article.qid, instances);
                    self.mark_seen(&article.qid, instances.clone(), SeenReason::Ignored);
                }
                None => {}
            }
        }

        // Step 7: sitelink minimums and dimension rescue
        ctx.check("rescue")?;
        self.history.record(tile, rescue::tile_stats(&articles));
        let snapshot = articles.clone();
        let mut survivors: Vec<Article> = Vec::new();
        for mut article in articles {
            if article.ignored {
                continue;
            }
            if let Some(category) = article.category.clone() {
                let sitelinks_min = self
                    .cfg
                    .taxonomy
                    .category(&category)
                    .map(|c| c.sitelinks_min)
                    .unwrap_or(0);
                if article.sitelinks < sitelinks_min {
                    debug!(
                        "{}: {} sitelinks below {category} minimum {sitelinks_min}",
                        article.qid, article.sitelinks
                    );
                    self.mark_seen(&article.qid, article.instances.clone(), SeenReason::Rejected);
                    continue;
                }
                survivors.push(article);
            } else {
                let tile_max = rescue::tile_stats_excluding(&snapshot, &article.qid);
                match rescue::evaluate(&article, &tile_max, medians, &self.cfg.rescue.promote_by_dimension) {
                    Some(rescued) => {
                        article.category = Some(rescued.category.to_string());
                        article.dimension_multiplier = rescued.multiplier;
                        outcome.rescued += 1;
                        survivors.push(article);
                    }
                    None => {
                        self.mark_seen(
                            &article.qid,
                            article.instances.clone(),
                            SeenReason::Rejected,
                        );
                    }
                }
            }
        }

        // Step 8: spatial merge
        ctx.check("merge")?;
        let merged = merge::merge_articles(survivors, &self.cfg);
        for loser in &merged.merged {
            self.mark_seen(&loser.qid, loser.instances.clone(), SeenReason::Merged);
        }
        let mut survivors = merged.accepted;

        // Step 9: hydration. A failed batch drops without seen markers so
        // every entity is retried on the next run.
        ctx.check("hydrate")?;
        let local_langs = hydrate::local_languages(&tile, self.countries.as_ref());
        let target = self.cfg.target_language_primary();
        let allowed = hydrate::allowed_languages(&local_langs, &target);
        let qids: Vec<String> = survivors.iter().map(|a| a.qid.clone()).collect();
        let entities = if qids.is_empty() {
            HashMap::new()
        } else {
            self.graph.fetch_entities(&qids, &allowed)?
        };
        survivors.retain_mut(|article| match entities.get(&article.qid) {
            Some(info) => {
                hydrate::apply_entity(article, info, &allowed, &target);
                true
            }
            None => {
                debug!("{} absent from hydration response", article.qid);
                false
            }
        });

        // Step 10: article lengths, URL choice, upsert
        ctx.check("enrich")?;
        let mut titles_by_lang: HashMap<String, Vec<String>> = HashMap::new();
        for article in &survivors {
            for (lang, title) in hydrate::candidate_titles(article) {
                let titles = titles_by_lang.entry(lang).or_default();
                if !titles.contains(&title) {
                    titles.push(title);
                }
            }
        }
        let mut lengths: HashMap<String, HashMap<String, u64>> = HashMap::new();
        for (lang, titles) in &titles_by_lang {
            lengths.insert(lang.clone(), self.graph.article_lengths(lang, titles)?);
        }

        let mut survived: HashSet<String> = HashSet::new();
        for article in &survivors {
            let choice = hydrate::choose_url(article, &lengths, &self.cfg);
            match hydrate::build_poi(article, &local_langs, &self.cfg, choice) {
                Some(poi) => match self.registry.upsert(poi) {
                    Ok(()) => {
                        outcome.promoted += 1;
                        survived.insert(article.qid.clone());
                    }
                    // Not seen-marked: the next fetch retries the upsert
                    Err(err) => warn!("upsert failed for {}: {err}", article.qid),
                },
                None => {
                    self.mark_seen(&article.qid, article.instances.clone(), SeenReason::Rejected)
                }
            }
        }

        // A forced run evicts previously tracked POIs that no longer make
        // the cut under the current configuration.
        if force && !existing.is_empty() {
            let gone: Vec<String> = existing
                .keys()
                .filter(|qid| !survived.contains(*qid))
                .cloned()
                .collect();
            if !gone.is_empty() {
                info!("reprocess evicts {} stale POIs", gone.len());
                self.registry.evict(&gone)?;
            }
        }

        Ok(outcome)
    }
}
