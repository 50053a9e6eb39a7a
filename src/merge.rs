//! Spatial deduplication of classified articles.
//!
//! Before hydration spends network calls on titles, near-duplicate
//! entities (a city and its districts, a lake and its bays) collapse onto
//! the best-known representative. Candidates in different category groups
//! never merge, no matter how close.

use crate::config::{DiscoveryConfig, SizeClass};
use crate::grid::haversine_km;
use crate::model::Article;
use crate::rescue;

/// Size and group for a category, covering the synthetic rescue categories
/// that are not in the taxonomy.
pub fn category_size_group(cfg: &DiscoveryConfig, category: &str) -> (SizeClass, String) {
    if let Some(cat) = cfg.taxonomy.category(category) {
        return (cat.size, cat.group.clone());
    }
    match category {
        rescue::CATEGORY_AREA | rescue::CATEGORY_HEIGHT | rescue::CATEGORY_LENGTH => {
            (SizeClass::L, "Rescued".to_string())
        }
        _ => (SizeClass::M, String::new()),
    }
}

/// Outcome of a merge pass.
#[derive(Debug, Default)]
pub struct MergeResult {
    pub accepted: Vec<Article>,
    pub merged: Vec<Article>,
}

/// Greedy spatial merge.
///
/// Candidates are visited by (sitelinks desc, qid asc); a later candidate
/// loses when it lies within `max(radius_a, radius_b)` of an already
/// accepted one in the same group. Running the merge on its own accepted
/// output is a no-op.
pub fn merge_articles(mut articles: Vec<Article>, cfg: &DiscoveryConfig) -> MergeResult {
    articles.sort_by(|a, b| {
        b.sitelinks
            .cmp(&a.sitelinks)
            .then_with(|| a.qid.cmp(&b.qid))
    });

    let mut result = MergeResult::default();
    // (lat, lon, radius_m, group) of each accepted candidate
    let mut accepted_meta: Vec<(f64, f64, f64, String)> = Vec::new();

    for article in articles {
        let category = article.category.as_deref().unwrap_or_default();
        let (size, group) = category_size_group(cfg, category);
        let radius_m = cfg.merge_distance_m(size);

        let absorbed = accepted_meta.iter().any(|(lat, lon, other_radius, other_group)| {
            if *other_group != group {
                return false;
            }
            let distance_m = haversine_km(article.lat, article.lon, *lat, *lon) * 1000.0;
            distance_m <= radius_m.max(*other_radius)
        });

        if absorbed {
            result.merged.push(article);
        } else {
            accepted_meta.push((article.lat, article.lon, radius_m, group));
            result.accepted.push(article);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(qid: &str, lat: f64, lon: f64, sitelinks: u32, category: &str) -> Article {
        let mut a = Article::new(qid, lat, lon, sitelinks);
        a.category = Some(category.to_string());
        a
    }

    fn cfg() -> DiscoveryConfig {
        DiscoveryConfig::from_yaml(
            r#"
categories:
  city:
    size: XL
    group: Settlements
  neighborhood:
    size: S
    group: Settlements
  aerodrome:
    size: L
    group: Aerodromes
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_cross_group_colocation_survives() {
        let result = merge_articles(
            vec![
                article("Q64", 52.52, 13.405, 300, "city"),
                article("Q160556", 52.52, 13.405, 40, "aerodrome"),
            ],
            &cfg(),
        );
        assert_eq!(result.accepted.len(), 2);
        assert!(result.merged.is_empty());
    }

    #[test]
    fn test_same_group_absorbs_smaller_neighbor() {
        // ~800 m north of the city center
        let result = merge_articles(
            vec![
                article("Q64", 52.52, 13.405, 300, "city"),
                article("Q700", 52.5272, 13.405, 12, "neighborhood"),
                article("Q160556", 52.52, 13.405, 40, "aerodrome"),
            ],
            &cfg(),
        );
        assert_eq!(result.accepted.len(), 2);
        assert_eq!(result.merged.len(), 1);
        assert_eq!(result.merged[0].qid, "Q700");
    }

    #[test]
    fn test_merge_is_idempotent() {
        let first = merge_articles(
            vec![
                article("Q64", 52.52, 13.405, 300, "city"),
                article("Q700", 52.5272, 13.405, 12, "neighborhood"),
                article("Q701", 52.9, 13.405, 8, "neighborhood"),
            ],
            &cfg(),
        );
        let accepted: Vec<String> = first.accepted.iter().map(|a| a.qid.clone()).collect();

        let second = merge_articles(first.accepted, &cfg());
        assert!(second.merged.is_empty());
        let again: Vec<String> = second.accepted.iter().map(|a| a.qid.clone()).collect();
        assert_eq!(accepted, again);
    }

    #[test]
    fn test_better_known_candidate_wins() {
        // Two colocated neighborhoods: the one with more sitelinks survives
        let result = merge_articles(
            vec![
                article("Q2", 52.52, 13.405, 5, "neighborhood"),
                article("Q1", 52.52, 13.405, 50, "neighborhood"),
            ],
            &cfg(),
        );
        assert_eq!(result.accepted.len(), 1);
        assert_eq!(result.accepted[0].qid, "Q1");
        assert_eq!(result.merged[0].qid, "Q2");
    }

    #[test]
    fn test_qid_breaks_sitelink_ties() {
        let result = merge_articles(
            vec![
                article("Q9", 52.52, 13.405, 10, "neighborhood"),
                article("Q1", 52.52, 13.405, 10, "neighborhood"),
            ],
            &cfg(),
        );
        assert_eq!(result.accepted[0].qid, "Q1");
    }

    #[test]
    fn test_rescued_categories_share_a_group() {
        let mut tall = Article::new("Q1", 52.52, 13.405, 10);
        tall.category = Some(rescue::CATEGORY_HEIGHT.to_string());
        let mut wide = Article::new("Q2", 52.52, 13.405, 5);
        wide.category = Some(rescue::CATEGORY_AREA.to_string());

        let result = merge_articles(vec![tall, wide], &cfg());
        assert_eq!(result.accepted.len(), 1);
        assert_eq!(result.accepted[0].qid, "Q1");
    }

    #[test]
    fn test_distant_same_group_survives() {
        // ~42 km apart, far beyond the XL radius
        let result = merge_articles(
            vec![
                article("Q64", 52.52, 13.405, 300, "city"),
                article("Q1055", 52.9, 13.405, 250, "city"),
            ],
            &cfg(),
        );
        assert_eq!(result.accepted.len(), 2);
    }
}
