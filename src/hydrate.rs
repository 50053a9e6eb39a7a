//! Title hydration, language selection, and POI construction.
//!
//! Hydration is deliberately narrow: only languages spoken around the tile
//! (plus English and the user's language) are fetched, and the final
//! article URL is picked by density-adjusted length so a rich local
//! article beats a stub in English.

use std::collections::{BTreeSet, HashMap};

use chrono::Utc;

use crate::config::DiscoveryConfig;
use crate::grid::TileKey;
use crate::merge::category_size_group;
use crate::model::{Article, Poi};
use crate::wikidata::EntityInfo;

/// Icon for categories the taxonomy has no icon for (rescued categories
/// among them).
pub const FALLBACK_ICON: &str = "poi.svg";

/// External geocoder seam: primary language codes spoken at a position.
pub trait CountryResolver: Send + Sync {
    fn languages_at(&self, lat: f64, lon: f64) -> Vec<String>;
}

/// Resolver for tests and offline runs: no local languages anywhere.
pub struct NoCountryResolver;

impl CountryResolver for NoCountryResolver {
    fn languages_at(&self, _lat: f64, _lon: f64) -> Vec<String> {
        Vec::new()
    }
}

/// Local languages around a tile, resolver order, deduplicated: the tile
/// center first, then its 6 corners.
pub fn local_languages(tile: &TileKey, resolver: &dyn CountryResolver) -> Vec<String> {
    let mut langs: Vec<String> = Vec::new();
    let (clat, clon) = tile.center();
    let mut points = vec![(clat, clon)];
    points.extend(tile.corners());

    for (lat, lon) in points {
        for lang in resolver.languages_at(lat, lon) {
            let lang = lang.to_ascii_lowercase();
            if !lang.is_empty() && !langs.contains(&lang) {
                langs.push(lang);
            }
        }
    }
    langs
}

/// The allowed-language set: local languages ∪ {en} ∪ the user's primary
/// subtag.
pub fn allowed_languages(local: &[String], target_primary: &str) -> BTreeSet<String> {
    let mut allowed: BTreeSet<String> = local.iter().cloned().collect();
    allowed.insert("en".to_string());
    if !target_primary.is_empty() {
        allowed.insert(target_primary.to_string());
    }
    allowed
}

/// Fold a hydration response into an article: label, English title, allowed
/// local titles, user-language title.
pub fn apply_entity(
    article: &mut Article,
    info: &EntityInfo,
    allowed: &BTreeSet<String>,
    target_primary: &str,
) {
    article.label = info.label.clone();
    article.title_en = info.sitelinks.get("en").cloned();
    article.title_user = info.sitelinks.get(target_primary).cloned();
    article.local_titles = info
        .sitelinks
        .iter()
        .filter(|(lang, _)| lang.as_str() != "en" && allowed.contains(lang.as_str()))
        .map(|(lang, title)| (lang.clone(), title.clone()))
        .collect();
}

/// All (lang, title) pairs worth fetching a length for.
pub fn candidate_titles(article: &Article) -> Vec<(String, String)> {
    let mut titles: Vec<(String, String)> = article
        .local_titles
        .iter()
        .map(|(lang, title)| (lang.clone(), title.clone()))
        .collect();
    if let Some(en) = &article.title_en {
        titles.push(("en".to_string(), en.clone()));
    }
    titles
}

/// The chosen encyclopedia article for a POI.
#[derive(Debug, Clone, PartialEq)]
pub struct UrlChoice {
    pub lang: String,
    pub title: String,
    /// English-equivalent length after density adjustment.
    pub adjusted_len: u64,
}

/// Pick the best article by adjusted length; local languages win ties
/// against English. Returns None when the article has no titles at all.
pub fn choose_url(
    article: &Article,
    lengths: &HashMap<String, HashMap<String, u64>>,
    cfg: &DiscoveryConfig,
) -> Option<UrlChoice> {
    let mut best: Option<UrlChoice> = None;

    for (lang, title) in candidate_titles(article) {
        let raw = lengths
            .get(&lang)
            .and_then(|by_title| by_title.get(&title))
            .copied()
            .unwrap_or(0);
        let adjusted = (raw as f64 * cfg.language(&lang).density).round() as u64;

        let better = match &best {
            None => true,
            Some(current) => {
                adjusted > current.adjusted_len
                    || (adjusted == current.adjusted_len
                        && current.lang == "en"
                        && lang != "en")
            }
        };
        if better {
            best = Some(UrlChoice {
                lang,
                title,
                adjusted_len: adjusted,
            });
        }
    }

    best
}

/// Wikipedia URL for a title (spaces become underscores).
pub fn wikipedia_url(lang: &str, title: &str) -> String {
    format!("https://{lang}.wikipedia.org/wiki/{}", title.replace(' ', "_"))
}

/// Construct the POI for a fully hydrated article. `local_langs` is the
/// resolver-ordered language list used to pick `name_local`. Returns None
/// when no title survived hydration.
pub fn build_poi(
    article: &Article,
    local_langs: &[String],
    cfg: &DiscoveryConfig,
    choice: Option<UrlChoice>,
) -> Option<Poi> {
    let choice = choice?;

    let category = article.category.clone().unwrap_or_default();
    let (size, group) = category_size_group(cfg, &category);
    let icon = cfg
        .taxonomy
        .category(&category)
        .map(|c| c.icon.clone())
        .filter(|icon| !icon.is_empty())
        .unwrap_or_else(|| FALLBACK_ICON.to_string());

    let name_local = local_langs
        .iter()
        .find_map(|lang| article.local_titles.get(lang))
        .or_else(|| article.local_titles.values().next())
        .cloned();

    Some(Poi {
        wikidata_id: article.qid.clone(),
        source: "wikidata".to_string(),
        category,
        size,
        group,
        lat: article.lat,
        lon: article.lon,
        sitelinks: article.sitelinks,
        name_local,
        name_en: article.title_en.clone().or_else(|| article.label.clone()),
        name_user: article.title_user.clone(),
        wp_url: Some(wikipedia_url(&choice.lang, &choice.title)),
        wp_article_length: choice.adjusted_len,
        icon,
        created_at: Utc::now(),
        last_scored_at: None,
        last_narrated_at: None,
        score: 0.0,
        dimension_multiplier: article.dimension_multiplier,
        badges: Vec::new(),
    })
}
