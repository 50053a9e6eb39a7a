//! Entity classification against the configured taxonomy.
//!
//! The classifier is a capability set behind a trait so richer variants
//! (an LLM-assisted classifier lives in the narration service) can slot in
//! without touching the pipeline. The core ships the static YAML-driven
//! taxonomy classifier.

use std::collections::HashMap;

use moka::sync::Cache;

use crate::config::TaxonomyConfig;
use crate::error::{DiscoveryError, DiscoveryResult};

/// Outcome of classifying one entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// Matched a category rule.
    Category(String),
    /// Matched an ignore rule; the instances are recorded on the seen
    /// marker so a reprocess can reconsider them.
    Ignored { instances: Vec<String> },
}

/// Classifier capability set.
///
/// Entities whose instances match no rule are absent from the batch result:
/// uncategorized, and eligible for dimension rescue.
pub trait Classifier: Send + Sync {
    fn classify(&self, qid: &str, instances: &[String]) -> Option<Classification>;

    fn classify_batch(
        &self,
        entities: &[(String, Vec<String>)],
    ) -> HashMap<String, Classification> {
        entities
            .iter()
            .filter_map(|(qid, instances)| {
                self.classify(qid, instances).map(|c| (qid.clone(), c))
            })
            .collect()
    }

    fn taxonomy(&self) -> &TaxonomyConfig;
}

/// Static taxonomy classifier driven by the YAML rule tables.
pub struct StaticClassifier {
    taxonomy: TaxonomyConfig,
}

impl StaticClassifier {
    pub fn new(taxonomy: TaxonomyConfig) -> Self {
        Self { taxonomy }
    }

    pub fn from_yaml(yaml: &str) -> DiscoveryResult<Self> {
        let taxonomy: TaxonomyConfig =
            serde_yaml::from_str(yaml).map_err(|e| DiscoveryError::Parse(e.to_string()))?;
        Ok(Self::new(taxonomy))
    }
}

impl Classifier for StaticClassifier {
    fn classify(&self, _qid: &str, instances: &[String]) -> Option<Classification> {
        // Ignore rules beat category rules across the whole instance list
        if instances
            .iter()
            .any(|i| self.taxonomy.ignored_instances.contains(i))
        {
            return Some(Classification::Ignored {
                instances: instances.to_vec(),
            });
        }
        instances
            .iter()
            .find_map(|i| self.taxonomy.instances.get(i))
            .map(|category| Classification::Category(category.clone()))
    }

    fn taxonomy(&self) -> &TaxonomyConfig {
        &self.taxonomy
    }
}

/// Bounded cache of instance ids from previously seen entities.
///
/// The pipeline consults it before an article's own instance list so a
/// reprocess can reclassify entities whose instances were recorded on an
/// earlier pass.
pub struct InstanceCache {
    inner: Cache<String, Vec<String>>,
}

impl InstanceCache {
    pub fn new(max_entries: u64) -> Self {
        Self {
            inner: Cache::new(max_entries),
        }
    }

    pub fn record(&self, qid: &str, instances: &[String]) {
        if !instances.is_empty() {
            self.inner.insert(qid.to_string(), instances.to_vec());
        }
    }

    pub fn get(&self, qid: &str) -> Option<Vec<String>> {
        self.inner.get(qid)
    }
}

impl Default for InstanceCache {
    fn default() -> Self {
        Self::new(100_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};

    fn classifier() -> StaticClassifier {
        StaticClassifier::new(TaxonomyConfig {
            categories: BTreeMap::new(),
            instances: BTreeMap::from([
                ("Q515".to_string(), "city".to_string()),
                ("Q8502".to_string(), "mountain".to_string()),
            ]),
            ignored_instances: BTreeSet::from(["Q4167410".to_string()]),
        })
    }

    #[test]
    fn test_category_match() {
        let c = classifier();
        assert_eq!(
            c.classify("Q64", &["Q515".to_string()]),
            Some(Classification::Category("city".to_string()))
        );
    }

    #[test]
    fn test_first_category_rule_wins() {
        let c = classifier();
        let instances = vec!["Q8502".to_string(), "Q515".to_string()];
        assert_eq!(
            c.classify("Q1", &instances),
            Some(Classification::Category("mountain".to_string()))
        );
    }

    #[test]
    fn test_ignore_beats_category() {
        let c = classifier();
        let instances = vec!["Q515".to_string(), "Q4167410".to_string()];
        match c.classify("Q1", &instances) {
            Some(Classification::Ignored { instances: recorded }) => {
                assert_eq!(recorded, instances);
            }
            other => panic!("expected ignored, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_is_uncategorized() {
        let c = classifier();
        assert_eq!(c.classify("Q1", &["Q999999".to_string()]), None);
        assert_eq!(c.classify("Q1", &[]), None);
    }

    #[test]
    fn test_classify_batch_skips_unknown() {
        let c = classifier();
        let entities = vec![
            ("Q64".to_string(), vec!["Q515".to_string()]),
            ("Q1".to_string(), vec!["Q999999".to_string()]),
        ];
        let result = c.classify_batch(&entities);
        assert_eq!(result.len(), 1);
        assert!(result.contains_key("Q64"));
    }

    #[test]
    fn test_from_yaml() {
        let c = StaticClassifier::from_yaml(
            r#"
categories:
  city:
    size: XL
    group: Settlements
instances:
  Q515: city
ignored_instances:
  - Q4167410
"#,
        )
        .unwrap();
        assert_eq!(
            c.classify("Q64", &["Q515".to_string()]),
            Some(Classification::Category("city".to_string()))
        );
        assert!(c.taxonomy().category("city").is_some());
    }

    #[test]
    fn test_instance_cache_roundtrip() {
        let cache = InstanceCache::new(10);
        cache.record("Q1", &["Q515".to_string()]);
        cache.record("Q2", &[]);
        assert_eq!(cache.get("Q1"), Some(vec!["Q515".to_string()]));
        assert_eq!(cache.get("Q2"), None);
    }
}
