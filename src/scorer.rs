//! Geometric relevance scoring of tracked POIs.
//!
//! The score leads the aircraft: distance is measured from the predicted
//! position, and when airborne the forward cone biases the ranking toward
//! the trajectory, mirroring the scheduler's cone.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::{ScoringConfig, SizeClass};
use crate::grid::{haversine_km, heading_deviation_deg, initial_bearing_deg};
use crate::model::Poi;
use crate::registry::PoiRegistry;
use crate::telemetry::Telemetry;

/// External line-of-sight seam; absence means everything is visible.
pub trait VisibilityChecker: Send + Sync {
    fn is_visible(&self, telemetry: &Telemetry, lat: f64, lon: f64) -> bool;
}

/// Distance at which the geometric base score halves, km.
const HALF_SCORE_DISTANCE_KM: f64 = 10.0;

/// Full forward-cone weight inside this deviation.
const CONE_FULL_DEG: f64 = 30.0;

/// Cone weight left at 180° deviation.
const CONE_TAIL_WEIGHT: f64 = 0.2;

/// Article lengths are scaled against this before the log.
const ARTICLE_LENGTH_SCALE: f64 = 10_000.0;

/// Relative importance of a size class.
fn size_weight(size: SizeClass) -> f64 {
    match size {
        SizeClass::Xs => 0.6,
        SizeClass::S => 0.8,
        SizeClass::M => 1.0,
        SizeClass::L => 1.2,
        SizeClass::Xl => 1.5,
        SizeClass::Xxl => 1.8,
    }
}

/// Forward-cone factor: 1.0 within ±30°, decaying linearly to
/// [`CONE_TAIL_WEIGHT`] at 180°.
fn cone_factor(deviation_deg: f64) -> f64 {
    if deviation_deg <= CONE_FULL_DEG {
        1.0
    } else {
        let t = (deviation_deg - CONE_FULL_DEG) / (180.0 - CONE_FULL_DEG);
        1.0 - t * (1.0 - CONE_TAIL_WEIGHT)
    }
}

/// Freshness factor: 0 right after a narration, recovering linearly over
/// the cooldown.
fn freshness_factor(
    last_narrated_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    cooldown_secs: u64,
) -> f64 {
    let Some(narrated) = last_narrated_at else {
        return 1.0;
    };
    if cooldown_secs == 0 {
        return 1.0;
    }
    let elapsed = (now - narrated).num_seconds().max(0) as f64;
    (elapsed / cooldown_secs as f64).min(1.0)
}

/// Score one POI against the current telemetry.
pub fn score_poi(
    poi: &Poi,
    telemetry: &Telemetry,
    cfg: &ScoringConfig,
    visibility: Option<&dyn VisibilityChecker>,
    now: DateTime<Utc>,
) -> f64 {
    let (pred_lat, pred_lon) = telemetry.predicted_position();
    let dist_km = haversine_km(pred_lat, pred_lon, poi.lat, poi.lon);

    let article_factor = 1.0 + (1.0 + poi.wp_article_length as f64 / ARTICLE_LENGTH_SCALE).ln();
    let falloff = 1.0 + (dist_km / HALF_SCORE_DISTANCE_KM).powi(2);
    let mut score =
        size_weight(poi.size) * poi.dimension_multiplier * article_factor / falloff;

    if let Some(checker) = visibility {
        if !checker.is_visible(telemetry, poi.lat, poi.lon) {
            return 0.0;
        }
    }

    score *= freshness_factor(poi.last_narrated_at, now, cfg.narration_cooldown_secs);

    if telemetry.is_airborne() {
        let bearing = initial_bearing_deg(telemetry.lat, telemetry.lon, poi.lat, poi.lon);
        let deviation = heading_deviation_deg(telemetry.heading_deg, bearing);
        score *= cone_factor(deviation);
    }

    score.max(0.0)
}

/// Scores the whole registry and publishes a ranked view.
pub struct Scorer {
    registry: Arc<PoiRegistry>,
    cfg: ScoringConfig,
    visibility: Option<Arc<dyn VisibilityChecker>>,
}

impl Scorer {
    pub fn new(
        registry: Arc<PoiRegistry>,
        cfg: ScoringConfig,
        visibility: Option<Arc<dyn VisibilityChecker>>,
    ) -> Self {
        Self {
            registry,
            cfg,
            visibility,
        }
    }

    /// Score every tracked POI, persist the scores, and return the POIs
    /// ranked best-first.
    pub fn score_all(&self, telemetry: &Telemetry) -> Vec<Poi> {
        let now = Utc::now();
        let mut pois = self.registry.all();
        for poi in &mut pois {
            let score = score_poi(
                poi,
                telemetry,
                &self.cfg,
                self.visibility.as_deref(),
                now,
            );
            self.registry.set_score(&poi.wikidata_id, score);
            poi.score = score;
        }

        pois.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.wikidata_id.cmp(&b.wikidata_id))
        });
        pois
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::telemetry::FlightStage;
    use chrono::Duration;

    fn telemetry(heading: f64, airborne: bool) -> Telemetry {
        Telemetry::new(
            52.52,
            13.405,
            8000.0,
            7000.0,
            heading,
            0.0,
            0.0,
            !airborne,
            FlightStage::Cruise,
        )
    }

    fn poi_at(qid: &str, lat: f64, lon: f64) -> Poi {
        Poi {
            wikidata_id: qid.into(),
            source: "wikidata".into(),
            category: "city".into(),
            size: SizeClass::M,
            group: "Settlements".into(),
            lat,
            lon,
            sitelinks: 50,
            name_local: None,
            name_en: None,
            name_user: None,
            wp_url: None,
            wp_article_length: 10_000,
            icon: String::new(),
            created_at: Utc::now(),
            last_scored_at: None,
            last_narrated_at: None,
            score: 0.0,
            dimension_multiplier: 1.0,
            badges: Vec::new(),
        }
    }

    fn cfg() -> ScoringConfig {
        ScoringConfig::default()
    }

    struct NothingVisible;

    impl VisibilityChecker for NothingVisible {
        fn is_visible(&self, _t: &Telemetry, _lat: f64, _lon: f64) -> bool {
            false
        }
    }

    #[test]
    fn test_closer_scores_higher() {
        let t = telemetry(90.0, false);
        let near = score_poi(&poi_at("Q1", 52.53, 13.42), &t, &cfg(), None, Utc::now());
        let far = score_poi(&poi_at("Q2", 52.9, 13.9), &t, &cfg(), None, Utc::now());
        assert!(near > far);
        assert!(far > 0.0);
    }

    #[test]
    fn test_dimension_multiplier_raises_score() {
        let t = telemetry(90.0, false);
        let plain = poi_at("Q1", 52.53, 13.42);
        let mut boosted = poi_at("Q2", 52.53, 13.42);
        boosted.dimension_multiplier = 2.0;

        let a = score_poi(&plain, &t, &cfg(), None, Utc::now());
        let b = score_poi(&boosted, &t, &cfg(), None, Utc::now());
        assert!((b / a - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_hidden_poi_scores_zero() {
        let t = telemetry(90.0, true);
        let checker = NothingVisible;
        let score = score_poi(
            &poi_at("Q1", 52.53, 13.42),
            &t,
            &cfg(),
            Some(&checker),
            Utc::now(),
        );
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_freshness_cooldown() {
        let t = telemetry(90.0, false);
        let now = Utc::now();
        let mut poi = poi_at("Q1", 52.53, 13.42);

        poi.last_narrated_at = Some(now);
        assert_eq!(score_poi(&poi, &t, &cfg(), None, now), 0.0);

        // Half the cooldown restores half the score
        poi.last_narrated_at = Some(now - Duration::seconds(450));
        let half = score_poi(&poi, &t, &cfg(), None, now);
        poi.last_narrated_at = None;
        let full = score_poi(&poi, &t, &cfg(), None, now);
        assert!((half / full - 0.5).abs() < 1e-6);

        // Past the cooldown the factor is gone
        poi.last_narrated_at = Some(now - Duration::seconds(1000));
        let recovered = score_poi(&poi, &t, &cfg(), None, now);
        assert!((recovered - full).abs() < 1e-9);
    }

    #[test]
    fn test_forward_cone_only_when_airborne() {
        // POI due east of the aircraft
        let poi = poi_at("Q1", 52.52, 13.55);

        let toward = score_poi(&poi, &telemetry(90.0, true), &cfg(), None, Utc::now());
        let away = score_poi(&poi, &telemetry(270.0, true), &cfg(), None, Utc::now());
        assert!(toward > away);
        assert!((away / toward - CONE_TAIL_WEIGHT).abs() < 0.05);

        // On the ground heading is irrelevant
        let a = score_poi(&poi, &telemetry(90.0, false), &cfg(), None, Utc::now());
        let b = score_poi(&poi, &telemetry(270.0, false), &cfg(), None, Utc::now());
        assert!((a - b).abs() < 1e-9);
    }

    #[test]
    fn test_cone_factor_shape() {
        assert_eq!(cone_factor(0.0), 1.0);
        assert_eq!(cone_factor(30.0), 1.0);
        assert!((cone_factor(180.0) - CONE_TAIL_WEIGHT).abs() < 1e-9);
        let mid = cone_factor(105.0);
        assert!(mid < 1.0 && mid > CONE_TAIL_WEIGHT);
    }

    #[test]
    fn test_score_all_ranks_and_persists() {
        let registry = Arc::new(PoiRegistry::new(Arc::new(MemoryStore::new())));
        registry.upsert(poi_at("Q1", 52.53, 13.42)).unwrap();
        registry.upsert(poi_at("Q2", 52.9, 13.9)).unwrap();

        let scorer = Scorer::new(Arc::clone(&registry), cfg(), None);
        let ranked = scorer.score_all(&telemetry(90.0, false));

        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].wikidata_id, "Q1");
        assert!(ranked[0].score > ranked[1].score);

        let live = registry.get_batch(&["Q1".to_string()])["Q1"].clone();
        assert_eq!(live.score, ranked[0].score);
        assert!(live.last_scored_at.is_some());
    }
}
