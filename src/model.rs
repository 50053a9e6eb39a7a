//! Core data model: raw ingestion articles, promoted POIs, seen markers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SizeClass;

/// Physical dimensions of an entity, meters / square meters.
///
/// Each dimension is present-and-positive or absent; the parser drops
/// non-positive values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub height: Option<f64>,
    pub length: Option<f64>,
    pub area: Option<f64>,
}

impl Dimensions {
    pub fn is_empty(&self) -> bool {
        self.height.is_none() && self.length.is_none() && self.area.is_none()
    }
}

/// A raw entity parsed from one tile response. Articles live for a single
/// pipeline run; survivors are promoted into [`Poi`]s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    /// Wikidata id, unique within a tile response.
    pub qid: String,
    pub lat: f64,
    pub lon: f64,
    pub sitelinks: u32,
    /// `instance_of` (P31) taxonomy ids.
    pub instances: Vec<String>,
    pub dimensions: Option<Dimensions>,
    /// Language code → sitelink title, restricted to the allowed set
    /// during hydration.
    pub local_titles: BTreeMap<String, String>,
    pub title_en: Option<String>,
    pub title_user: Option<String>,
    pub label: Option<String>,
    pub category: Option<String>,
    pub ignored: bool,
    /// ≥ 1.0; raised by dimension rescue.
    pub dimension_multiplier: f64,
}

impl Article {
    pub fn new(qid: impl Into<String>, lat: f64, lon: f64, sitelinks: u32) -> Self {
        Self {
            qid: qid.into(),
            lat,
            lon,
            sitelinks,
            instances: Vec::new(),
            dimensions: None,
            local_titles: BTreeMap::new(),
            title_en: None,
            title_user: None,
            label: None,
            category: None,
            ignored: false,
            dimension_multiplier: 1.0,
        }
    }

    /// Whether the article still has no category after classification.
    pub fn is_uncategorized(&self) -> bool {
        !self.ignored && self.category.is_none()
    }
}

/// A tracked point of interest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poi {
    /// Primary key, unique globally.
    pub wikidata_id: String,
    pub source: String,
    pub category: String,
    pub size: SizeClass,
    pub group: String,
    pub lat: f64,
    pub lon: f64,
    pub sitelinks: u32,
    pub name_local: Option<String>,
    pub name_en: Option<String>,
    pub name_user: Option<String>,
    pub wp_url: Option<String>,
    /// English-equivalent article length after density adjustment.
    pub wp_article_length: u64,
    pub icon: String,
    pub created_at: DateTime<Utc>,
    pub last_scored_at: Option<DateTime<Utc>>,
    pub last_narrated_at: Option<DateTime<Utc>>,
    pub score: f64,
    pub dimension_multiplier: f64,
    pub badges: Vec<String>,
}

impl Poi {
    /// First non-empty of (name_user, name_local, name_en, wikidata_id).
    pub fn display_name(&self) -> &str {
        [&self.name_user, &self.name_local, &self.name_en]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|s| !s.is_empty())
            .unwrap_or(&self.wikidata_id)
    }
}

/// Why an entity was set aside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeenReason {
    /// The classifier matched an ignore rule.
    Ignored,
    /// Lost a spatial merge against a better-known neighbor.
    Merged,
    /// Failed a filter (sitelink minimum, dimension rescue, construction).
    Rejected,
}

/// Marker for an entity that failed a filter. One tagged marker type, not
/// three tables; revoked only by an explicit reprocess.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeenEntity {
    pub qid: String,
    pub instance_ids: Vec<String>,
    pub reason: SeenReason,
}

impl SeenEntity {
    pub fn new(qid: impl Into<String>, instance_ids: Vec<String>, reason: SeenReason) -> Self {
        Self {
            qid: qid.into(),
            instance_ids,
            reason,
        }
    }
}
