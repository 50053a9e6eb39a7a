//! Configuration surface consumed by the discovery core.
//!
//! Loading is the embedder's job; everything here deserializes from YAML
//! and carries workable defaults so tests and embedders without a config
//! file get a functional core.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{DiscoveryError, DiscoveryResult};

/// Coarse physical size class of a category, used to pick merge distances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SizeClass {
    #[serde(rename = "XS")]
    Xs,
    #[serde(rename = "S")]
    S,
    #[serde(rename = "M")]
    M,
    #[serde(rename = "L")]
    L,
    #[serde(rename = "XL")]
    Xl,
    #[serde(rename = "XXL")]
    Xxl,
}

impl SizeClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            SizeClass::Xs => "XS",
            SizeClass::S => "S",
            SizeClass::M => "M",
            SizeClass::L => "L",
            SizeClass::Xl => "XL",
            SizeClass::Xxl => "XXL",
        }
    }
}

/// Per-category settings from the taxonomy file.
#[derive(Debug, Clone, Deserialize)]
pub struct CategoryConfig {
    pub size: SizeClass,
    pub group: String,
    #[serde(default)]
    pub sitelinks_min: u32,
    #[serde(default)]
    pub icon: String,
}

/// Candidate-area settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AreaConfig {
    /// How far out from the aircraft tiles are considered, in km.
    pub max_dist_km: f64,
    /// SPARQL result limit per tile query.
    pub max_articles: u32,
}

impl Default for AreaConfig {
    fn default() -> Self {
        Self {
            max_dist_km: 50.0,
            max_articles: 100,
        }
    }
}

/// Dimension-rescue thresholds.
///
/// An uncategorized article is promoted only when one of its dimensions
/// clears both the local context and these absolute floors.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RescueConfig {
    /// Absolute floor for height, meters.
    pub min_height: f64,
    /// Absolute floor for length, meters.
    pub min_length: f64,
    /// Absolute floor for area, square meters.
    pub min_area: f64,
    /// Radius for the neighborhood-median lookup, km.
    pub radius_km: f64,
}

impl Default for RescueConfig {
    fn default() -> Self {
        Self {
            min_height: 300.0,
            min_length: 1000.0,
            min_area: 1_000_000.0,
            radius_km: 20.0,
        }
    }
}

/// The `rescue:` config section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RescueSection {
    pub promote_by_dimension: RescueConfig,
}

/// Per-language reading statistics.
///
/// `density` converts a raw article length into an English-equivalent
/// length; `avg_word_len` estimates word counts from byte counts.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LanguageConfig {
    pub density: f64,
    pub avg_word_len: f64,
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            density: 1.0,
            avg_word_len: 5.0,
        }
    }
}

/// Scoring knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Cooldown after a narration before a POI regains full score, seconds.
    pub narration_cooldown_secs: u64,
    /// Minimum aircraft displacement that forces a rescore, meters.
    pub rescore_distance_m: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            narration_cooldown_secs: 900,
            rescore_distance_m: 100.0,
        }
    }
}

/// Pipeline timing knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Per-call deadline for external requests, seconds.
    pub call_timeout_secs: u64,
    /// Total deadline for one tile run, seconds.
    pub deadline_secs: u64,
    /// Cooldown before retrying a tile after a network failure, seconds.
    pub network_cooldown_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 30,
            deadline_secs: 60,
            network_cooldown_secs: 30,
        }
    }
}

/// Classifier taxonomy: categories plus the instance-of rule tables.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TaxonomyConfig {
    /// Category name → settings.
    pub categories: BTreeMap<String, CategoryConfig>,
    /// `instance_of` qid → category name.
    pub instances: BTreeMap<String, String>,
    /// `instance_of` qids that mark an entity as not narration-worthy.
    pub ignored_instances: BTreeSet<String>,
}

impl TaxonomyConfig {
    pub fn category(&self, name: &str) -> Option<&CategoryConfig> {
        self.categories.get(name)
    }
}

/// Full configuration surface of the discovery core.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub area: AreaConfig,
    pub rescue: RescueSection,
    /// Categories and instance rules live at the document root
    /// (`categories:`, `instances:`, `ignored_instances:`).
    #[serde(flatten)]
    pub taxonomy: TaxonomyConfig,
    /// Size class → merge distance in meters.
    pub merge_distance: BTreeMap<SizeClass, f64>,
    /// Language code → reading statistics.
    pub languages: BTreeMap<String, LanguageConfig>,
    /// BCP-47 tag of the user's language; only the primary subtag is used.
    pub target_language: String,
    pub scoring: ScoringConfig,
    pub pipeline: PipelineConfig,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            area: AreaConfig::default(),
            rescue: RescueSection::default(),
            taxonomy: TaxonomyConfig::default(),
            merge_distance: default_merge_distances(),
            languages: BTreeMap::new(),
            target_language: "en".to_string(),
            scoring: ScoringConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

fn default_merge_distances() -> BTreeMap<SizeClass, f64> {
    BTreeMap::from([
        (SizeClass::Xs, 150.0),
        (SizeClass::S, 300.0),
        (SizeClass::M, 600.0),
        (SizeClass::L, 1200.0),
        (SizeClass::Xl, 2500.0),
        (SizeClass::Xxl, 5000.0),
    ])
}

impl DiscoveryConfig {
    /// Parse a YAML config document.
    pub fn from_yaml(yaml: &str) -> DiscoveryResult<Self> {
        serde_yaml::from_str(yaml).map_err(|e| DiscoveryError::Parse(e.to_string()))
    }

    /// Primary subtag of the target language (`pt-BR` → `pt`).
    pub fn target_language_primary(&self) -> String {
        primary_subtag(&self.target_language)
    }

    /// Merge distance in meters for a size class. Sizes absent from the
    /// config fall back to the defaults.
    pub fn merge_distance_m(&self, size: SizeClass) -> f64 {
        self.merge_distance
            .get(&size)
            .copied()
            .unwrap_or_else(|| default_merge_distances()[&size])
    }

    /// Reading statistics for a language, falling back to neutral values
    /// for languages the config does not know.
    pub fn language(&self, code: &str) -> LanguageConfig {
        self.languages
            .get(code)
            .copied()
            .unwrap_or_default()
    }
}

/// Lowercased primary subtag of a BCP-47 tag.
pub fn primary_subtag(tag: &str) -> String {
    tag.split(['-', '_'])
        .next()
        .unwrap_or(tag)
        .to_ascii_lowercase()
}
