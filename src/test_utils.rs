//! Shared fixtures for pipeline-level tests. Test-only.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::config::DiscoveryConfig;
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::hydrate::CountryResolver;
use crate::wikidata::{EntityInfo, KnowledgeGraph};

/// One SPARQL binding for [`area_payload`].
pub(crate) fn binding(
    qid: &str,
    lat: f64,
    lon: f64,
    sitelinks: u32,
    instances: &[&str],
) -> Value {
    let mut b = json!({
        "item": {"value": format!("http://www.wikidata.org/entity/{qid}")},
        "lat": {"value": lat.to_string()},
        "lon": {"value": lon.to_string()},
        "sitelinks": {"value": sitelinks.to_string()},
    });
    if !instances.is_empty() {
        let joined = instances
            .iter()
            .map(|i| format!("http://www.wikidata.org/entity/{i}"))
            .collect::<Vec<_>>()
            .join(",");
        b["instances"] = json!({"value": joined});
    }
    b
}

/// Attach a dimension field to a binding.
pub(crate) fn with_dim(mut binding: Value, field: &str, value: f64) -> Value {
    binding[field] = json!({"value": value.to_string()});
    binding
}

/// A full SPARQL response body from bindings.
pub(crate) fn area_payload(bindings: Vec<Value>) -> Bytes {
    Bytes::from(
        json!({"results": {"bindings": bindings}})
            .to_string()
            .into_bytes(),
    )
}

pub(crate) fn entity(label: &str, sitelinks: &[(&str, &str)]) -> EntityInfo {
    EntityInfo {
        label: Some(label.to_string()),
        sitelinks: sitelinks
            .iter()
            .map(|(lang, title)| (lang.to_string(), title.to_string()))
            .collect(),
    }
}

/// Programmable in-memory knowledge graph.
#[derive(Default)]
pub(crate) struct StubGraph {
    pub area: Mutex<Bytes>,
    pub entities: Mutex<HashMap<String, EntityInfo>>,
    /// lang → title → raw length.
    pub lengths: Mutex<HashMap<String, HashMap<String, u64>>>,
    pub area_calls: AtomicUsize,
    pub entity_calls: AtomicUsize,
    pub fail_area: AtomicBool,
    pub fail_entities: AtomicBool,
    /// Simulated latency of the area query, for lease tests.
    pub area_delay: Mutex<Duration>,
}

impl StubGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_area(&self, payload: Bytes) {
        *self.area.lock() = payload;
    }

    pub fn add_entity(&self, qid: &str, info: EntityInfo) {
        self.entities.lock().insert(qid.to_string(), info);
    }

    pub fn set_length(&self, lang: &str, title: &str, length: u64) {
        self.lengths
            .lock()
            .entry(lang.to_string())
            .or_default()
            .insert(title.to_string(), length);
    }
}

impl KnowledgeGraph for StubGraph {
    fn query_area(
        &self,
        _lat: f64,
        _lon: f64,
        _radius_km: f64,
        _limit: u32,
    ) -> DiscoveryResult<Bytes> {
        self.area_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.area_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if self.fail_area.load(Ordering::SeqCst) {
            return Err(DiscoveryError::Network("stub outage".to_string()));
        }
        Ok(self.area.lock().clone())
    }

    fn fetch_entities(
        &self,
        qids: &[String],
        _allowed_langs: &BTreeSet<String>,
    ) -> DiscoveryResult<HashMap<String, EntityInfo>> {
        self.entity_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_entities.load(Ordering::SeqCst) {
            return Err(DiscoveryError::Network("stub outage".to_string()));
        }
        let entities = self.entities.lock();
        Ok(qids
            .iter()
            .filter_map(|qid| entities.get(qid).map(|e| (qid.clone(), e.clone())))
            .collect())
    }

    fn article_lengths(
        &self,
        lang: &str,
        titles: &[String],
    ) -> DiscoveryResult<HashMap<String, u64>> {
        let lengths = self.lengths.lock();
        let by_title = lengths.get(lang).cloned().unwrap_or_default();
        Ok(titles
            .iter()
            .filter_map(|t| by_title.get(t).map(|len| (t.clone(), *len)))
            .collect())
    }
}

/// Resolver returning the same languages everywhere.
pub(crate) struct FixedCountries(pub Vec<String>);

impl CountryResolver for FixedCountries {
    fn languages_at(&self, _lat: f64, _lon: f64) -> Vec<String> {
        self.0.clone()
    }
}

/// The taxonomy used by pipeline tests.
pub(crate) fn test_config() -> DiscoveryConfig {
    DiscoveryConfig::from_yaml(
        r#"
target_language: "de"
categories:
  city:
    size: XL
    group: Settlements
    sitelinks_min: 15
    icon: city.svg
  neighborhood:
    size: S
    group: Settlements
    sitelinks_min: 5
  aerodrome:
    size: L
    group: Aerodromes
    sitelinks_min: 3
    icon: aerodrome.svg
instances:
  Q515: city
  Q123705: neighborhood
  Q1248784: aerodrome
ignored_instances:
  - Q4167410
languages:
  de:
    density: 1.2
    avg_word_len: 6.3
  nl:
    density: 1.1
    avg_word_len: 5.8
"#,
    )
    .expect("test config parses")
}
