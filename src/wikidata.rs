//! Knowledge-graph access: SPARQL area queries, entity hydration batches,
//! and encyclopedia article lengths.
//!
//! The [`KnowledgeGraph`] trait is the seam the pipeline talks through;
//! [`WikidataClient`] is the production implementation over blocking
//! reqwest with retries handled inside the request layer.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::model::{Article, Dimensions};

/// External batch calls never exceed this many ids per request.
pub const BATCH_CHUNK: usize = 50;

const SPARQL_ENDPOINT: &str = "https://query.wikidata.org/sparql";
const WIKIDATA_API: &str = "https://www.wikidata.org/w/api.php";
const USER_AGENT: &str = concat!("PhileasGo/", env!("CARGO_PKG_VERSION"));
const MAX_ATTEMPTS: u32 = 3;

/// `<x>wiki` sites that are not language editions.
const NON_LANGUAGE_SITES: [&str; 5] = ["commons", "species", "meta", "sources", "data"];

/// Hydrated label and sitelinks of one entity.
#[derive(Debug, Clone, Default)]
pub struct EntityInfo {
    pub label: Option<String>,
    /// Language code → sitelink title (from `<lang>wiki` sites only).
    pub sitelinks: BTreeMap<String, String>,
}

/// The knowledge-graph capability set the pipeline depends on.
pub trait KnowledgeGraph: Send + Sync {
    /// Run the area query and return the raw response body. The body is
    /// cached verbatim so replays go through the same parser.
    fn query_area(&self, lat: f64, lon: f64, radius_km: f64, limit: u32)
        -> DiscoveryResult<Bytes>;

    /// Labels and sitelinks for a batch of qids, restricted to the allowed
    /// languages. Absent entities are missing from the map, not errors.
    fn fetch_entities(
        &self,
        qids: &[String],
        allowed_langs: &BTreeSet<String>,
    ) -> DiscoveryResult<HashMap<String, EntityInfo>>;

    /// Raw article byte lengths for titles on one language edition.
    fn article_lengths(&self, lang: &str, titles: &[String])
        -> DiscoveryResult<HashMap<String, u64>>;
}

/// Production client against the public Wikidata / Wikipedia endpoints.
pub struct WikidataClient {
    http: reqwest::blocking::Client,
}

impl WikidataClient {
    pub fn new(cfg: &PipelineConfig) -> DiscoveryResult<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(cfg.call_timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| DiscoveryError::Network(e.to_string()))?;
        Ok(Self { http })
    }

    /// GET with exponential backoff on transport errors and 5xx.
    fn get_with_backoff(&self, url: &str, query: &[(&str, String)]) -> DiscoveryResult<Bytes> {
        let mut delay = Duration::from_millis(500);
        let mut last_err = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            let result = self.http.get(url).query(query).send();
            match result {
                Ok(resp) if resp.status().is_success() => {
                    return resp
                        .bytes()
                        .map_err(|e| DiscoveryError::Network(e.to_string()));
                }
                Ok(resp) if resp.status().is_server_error() => {
                    last_err = format!("{url} returned {}", resp.status());
                }
                Ok(resp) => {
                    // Client errors are not retried
                    return Err(DiscoveryError::Network(format!(
                        "{url} returned {}",
                        resp.status()
                    )));
                }
                Err(e) => last_err = e.to_string(),
            }

            if attempt < MAX_ATTEMPTS {
                warn!("request to {url} failed (attempt {attempt}): {last_err}");
                thread::sleep(delay);
                delay *= 2;
            }
        }

        Err(DiscoveryError::Network(last_err))
    }
}

impl KnowledgeGraph for WikidataClient {
    fn query_area(
        &self,
        lat: f64,
        lon: f64,
        radius_km: f64,
        limit: u32,
    ) -> DiscoveryResult<Bytes> {
        let query = build_area_query(lat, lon, radius_km, limit);
        self.get_with_backoff(
            SPARQL_ENDPOINT,
            &[("query", query), ("format", "json".to_string())],
        )
    }

    fn fetch_entities(
        &self,
        qids: &[String],
        allowed_langs: &BTreeSet<String>,
    ) -> DiscoveryResult<HashMap<String, EntityInfo>> {
        let sitefilter = allowed_langs
            .iter()
            .map(|lang| format!("{lang}wiki"))
            .collect::<Vec<_>>()
            .join("|");

        let mut out = HashMap::new();
        for chunk in qids.chunks(BATCH_CHUNK) {
            let mut params = vec![
                ("action", "wbgetentities".to_string()),
                ("format", "json".to_string()),
                ("props", "labels|sitelinks".to_string()),
                ("ids", chunk.join("|")),
            ];
            if !sitefilter.is_empty() {
                params.push(("sitefilter", sitefilter.clone()));
            }
            let body = self.get_with_backoff(WIKIDATA_API, &params)?;
            out.extend(parse_entities_response(&body)?);
        }
        Ok(out)
    }

    fn article_lengths(
        &self,
        lang: &str,
        titles: &[String],
    ) -> DiscoveryResult<HashMap<String, u64>> {
        let url = format!("https://{lang}.wikipedia.org/w/api.php");
        let mut out = HashMap::new();
        for chunk in titles.chunks(BATCH_CHUNK) {
            let params = vec![
                ("action", "query".to_string()),
                ("format", "json".to_string()),
                ("prop", "info".to_string()),
                ("titles", chunk.join("|")),
            ];
            let body = self.get_with_backoff(&url, &params)?;
            out.extend(parse_lengths_response(&body)?);
        }
        Ok(out)
    }
}

/// SPARQL text of the cheap area query: everything with a coordinate inside
/// the radius, its sitelink count, P31 group, and optional dimensions,
/// most-linked first.
pub fn build_area_query(lat: f64, lon: f64, radius_km: f64, limit: u32) -> String {
    format!(
        r#"SELECT ?item ?lat ?lon ?sitelinks
  (GROUP_CONCAT(DISTINCT ?instance_of; separator=",") AS ?instances)
  (SAMPLE(?areaV) AS ?area) (SAMPLE(?heightV) AS ?height)
  (SAMPLE(?lengthV) AS ?length) (SAMPLE(?widthV) AS ?width)
WHERE {{
  SERVICE wikibase:around {{
    ?item wdt:P625 ?location .
    bd:serviceParam wikibase:center "Point({lon} {lat})"^^geo:wktLiteral .
    bd:serviceParam wikibase:radius "{radius_km}" .
  }}
  ?item wikibase:sitelinks ?sitelinks .
  ?item wdt:P31 ?instance_of .
  OPTIONAL {{ ?item wdt:P2046 ?areaV . }}
  OPTIONAL {{ ?item wdt:P2048 ?heightV . }}
  OPTIONAL {{ ?item wdt:P2043 ?lengthV . }}
  OPTIONAL {{ ?item wdt:P2049 ?widthV . }}
  BIND(geof:latitude(?location) AS ?lat)
  BIND(geof:longitude(?location) AS ?lon)
}}
GROUP BY ?item ?lat ?lon ?sitelinks
ORDER BY DESC(?sitelinks)
LIMIT {limit}"#
    )
}

fn binding_value<'a>(binding: &'a Value, field: &str) -> Option<&'a str> {
    binding.get(field)?.get("value")?.as_str()
}

fn binding_f64(binding: &Value, field: &str) -> Option<f64> {
    binding_value(binding, field)?.parse().ok()
}

/// Trailing id of an entity URI (`.../entity/Q64` → `Q64`).
fn entity_id(uri: &str) -> Option<&str> {
    let id = uri.rsplit('/').next()?;
    id.starts_with('Q').then_some(id)
}

/// Parse a raw area-query payload into articles.
///
/// Bindings are deduplicated by qid (first wins; the query orders by
/// sitelinks descending). Invalid bindings are dropped, never fatal:
/// only an unreadable root payload is an error.
pub fn parse_area_response(payload: &[u8]) -> DiscoveryResult<Vec<Article>> {
    let root: Value =
        serde_json::from_slice(payload).map_err(|e| DiscoveryError::Parse(e.to_string()))?;
    let bindings = root
        .pointer("/results/bindings")
        .and_then(Value::as_array)
        .ok_or_else(|| DiscoveryError::Parse("missing results.bindings".to_string()))?;

    let mut seen_qids: HashSet<String> = HashSet::new();
    let mut articles = Vec::new();

    for binding in bindings {
        let Some(qid) = binding_value(binding, "item").and_then(entity_id) else {
            debug!("dropping binding without a usable entity id");
            continue;
        };
        let (Some(lat), Some(lon)) = (binding_f64(binding, "lat"), binding_f64(binding, "lon"))
        else {
            debug!("dropping {qid}: missing coordinates");
            continue;
        };
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            debug!("dropping {qid}: coordinates out of range");
            continue;
        }
        if !seen_qids.insert(qid.to_string()) {
            continue;
        }

        let sitelinks = binding_value(binding, "sitelinks")
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0);

        let mut article = Article::new(qid, lat, lon, sitelinks);
        article.instances = binding_value(binding, "instances")
            .map(|joined| {
                joined
                    .split(',')
                    .filter_map(entity_id)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let positive = |v: Option<f64>| v.filter(|x| *x > 0.0);
        let height = positive(binding_f64(binding, "height"));
        let area = positive(binding_f64(binding, "area"));
        // The longer of P2043 length and P2049 width counts as length
        let length = match (
            positive(binding_f64(binding, "length")),
            positive(binding_f64(binding, "width")),
        ) {
            (Some(l), Some(w)) => Some(l.max(w)),
            (l, w) => l.or(w),
        };
        let dims = Dimensions {
            height,
            length,
            area,
        };
        if !dims.is_empty() {
            article.dimensions = Some(dims);
        }

        articles.push(article);
    }

    Ok(articles)
}

/// Parse a `wbgetentities` response. Missing entities are skipped.
pub fn parse_entities_response(payload: &[u8]) -> DiscoveryResult<HashMap<String, EntityInfo>> {
    let root: Value =
        serde_json::from_slice(payload).map_err(|e| DiscoveryError::Parse(e.to_string()))?;
    let entities = root
        .get("entities")
        .and_then(Value::as_object)
        .ok_or_else(|| DiscoveryError::Parse("missing entities".to_string()))?;

    let mut out = HashMap::new();
    for (qid, entity) in entities {
        if entity.get("missing").is_some() {
            debug!("entity {qid} absent from batch response");
            continue;
        }

        let mut info = EntityInfo::default();
        if let Some(labels) = entity.get("labels").and_then(Value::as_object) {
            info.label = labels
                .get("en")
                .or_else(|| labels.values().next())
                .and_then(|l| l.get("value"))
                .and_then(Value::as_str)
                .map(str::to_string);
        }
        if let Some(sitelinks) = entity.get("sitelinks").and_then(Value::as_object) {
            for (site, link) in sitelinks {
                // Only plain `<lang>wiki` sites carry encyclopedia titles
                let Some(lang) = site.strip_suffix("wiki") else {
                    continue;
                };
                if lang.is_empty() || lang.contains('_') || NON_LANGUAGE_SITES.contains(&lang) {
                    continue;
                }
                if let Some(title) = link.get("title").and_then(Value::as_str) {
                    info.sitelinks
                        .insert(lang.to_string(), title.to_string());
                }
            }
        }
        out.insert(qid.clone(), info);
    }
    Ok(out)
}

/// Parse a Wikipedia `prop=info` response into title → byte length,
/// mapping normalized titles back to the requested ones.
pub fn parse_lengths_response(payload: &[u8]) -> DiscoveryResult<HashMap<String, u64>> {
    let root: Value =
        serde_json::from_slice(payload).map_err(|e| DiscoveryError::Parse(e.to_string()))?;

    // normalized: [{from: requested, to: canonical}]
    let mut denormalize: HashMap<String, String> = HashMap::new();
    if let Some(entries) = root.pointer("/query/normalized").and_then(Value::as_array) {
        for entry in entries {
            if let (Some(from), Some(to)) = (
                entry.get("from").and_then(Value::as_str),
                entry.get("to").and_then(Value::as_str),
            ) {
                denormalize.insert(to.to_string(), from.to_string());
            }
        }
    }

    let mut out = HashMap::new();
    if let Some(pages) = root.pointer("/query/pages").and_then(Value::as_object) {
        for page in pages.values() {
            if page.get("missing").is_some() {
                continue;
            }
            let (Some(title), Some(length)) = (
                page.get("title").and_then(Value::as_str),
                page.get("length").and_then(Value::as_u64),
            ) else {
                continue;
            };
            let requested = denormalize
                .get(title)
                .cloned()
                .unwrap_or_else(|| title.to_string());
            out.insert(requested, length);
        }
    }
    Ok(out)
}
