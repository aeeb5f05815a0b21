pub mod clusterer;
pub mod detector;
pub mod error;
pub mod inferrer;
pub mod ranker;

pub use clusterer::{
    cosine_similarity, ClusterCandidate, ClusterReport, ClusterSummary, EntityCluster,
    SimilarityClusterer, DEFAULT_MIN_CLUSTER_MEMBERS, DEFAULT_SIMILARITY_THRESHOLD,
};
pub use detector::{
    calculate_property_consistency, calculate_relationship_density, detect_patterns,
    DensityStats, PatternDetector, TypeStatistics,
};
pub use error::{AnalysisError, Result};
pub use inferrer::{
    generate_validation_rules, infer_data_type, infer_optional_properties,
    infer_required_properties, SchemaInferrer, OPTIONAL_THRESHOLD, REQUIRED_THRESHOLD,
    SAMPLE_LIMIT,
};
pub use ranker::{
    analyze_candidates, apply_thresholds, average_consistency, build_candidates,
    calculate_score, rank_candidates, RankingCriteria,
};
