//! PhileasGo POI Discovery and Scheduling Core.
//!
//! Given a live aircraft position, this crate turns the surroundings into
//! a stream of ranked, deduplicated, narration-ready points of interest:
//! - Hex-tile scheduling over H3 with a forward-cone bias toward the
//!   aircraft's trajectory
//! - A tile fetch pipeline against the Wikidata knowledge graph, backed by
//!   a persistent raw-payload cache
//! - Classification, dimension rescue, spatial merging, and language-aware
//!   title hydration
//! - A POI registry scored geometrically at 5 Hz
//! - Distance eviction and interest reprocessing over cached tiles
//!
//! The HTTP API, simulator client, narrator, terrain raster, geocoder, and
//! the durable store are external collaborators injected through the
//! [`KnowledgeGraph`], [`CountryResolver`], [`VisibilityChecker`], and
//! [`Store`] traits.

mod classify;
mod config;
mod error;
mod evict;
mod grid;
mod hydrate;
mod merge;
mod model;
mod pipeline;
mod registry;
mod rescue;
mod runtime;
mod scheduler;
mod scorer;
mod store;
mod telemetry;
#[cfg(test)]
pub(crate) mod test_utils;
mod wikidata;

pub use classify::{Classification, Classifier, InstanceCache, StaticClassifier};
pub use config::{
    primary_subtag, AreaConfig, CategoryConfig, DiscoveryConfig, LanguageConfig, PipelineConfig,
    RescueConfig, ScoringConfig, SizeClass, TaxonomyConfig,
};
pub use error::{DiscoveryError, DiscoveryResult};
pub use evict::EvictionController;
pub use grid::{TileKey, DEFAULT_QUERY_RADIUS_KM, TILE_RESOLUTION};
pub use hydrate::{CountryResolver, NoCountryResolver};
pub use model::{Article, Dimensions, Poi, SeenEntity, SeenReason};
pub use pipeline::{CancelToken, FetchOutcome, ProcessOutcome, TileFetcher};
pub use registry::{PoiRegistry, ScoringCallback};
pub use rescue::DimensionHistory;
pub use runtime::{
    DiscoveryWorker, RankedCallback, ScoringWorker, TelemetryCell, SCORE_INTERVAL, TICK_INTERVAL,
};
pub use scheduler::{candidates, Candidate, RecentTiles};
pub use scorer::{Scorer, VisibilityChecker};
pub use store::{
    GeodataCacheEntry, GeodataStore, MemoryStore, PoiStore, SeenStore, Store,
    DEFAULT_QUERY_RADIUS_M,
};
pub use telemetry::{FlightStage, Telemetry};
pub use wikidata::{EntityInfo, KnowledgeGraph, WikidataClient};
