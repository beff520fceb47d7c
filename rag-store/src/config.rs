//! Runtime and collection configuration.

use std::str::FromStr;

use crate::errors::RagError;

/// Distance function used for the vector space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DistanceKind {
    /// Cosine distance (recommended for most embeddings).
    Cosine,
    /// Dot product (useful for normalized vectors).
    Dot,
    /// Euclidean distance (L2).
    Euclid,
}

impl DistanceKind {
    /// Converts a Qdrant similarity score into a distance (lower = closer).
    ///
    /// Qdrant reports cosine/dot as similarity and euclid as distance.
    pub fn score_to_distance(self, score: f32) -> f32 {
        match self {
            DistanceKind::Cosine => 1.0 - score,
            DistanceKind::Dot => -score,
            DistanceKind::Euclid => score,
        }
    }
}

impl FromStr for DistanceKind {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(DistanceKind::Cosine),
            "dot" => Ok(DistanceKind::Dot),
            "euclid" | "l2" => Ok(DistanceKind::Euclid),
            other => Err(RagError::Config(format!("unknown distance: {other}"))),
        }
    }
}

/// Configuration for retrieval and maintenance over one Qdrant collection.
#[derive(Clone, Debug)]
pub struct RagConfig {
    /// Qdrant gRPC endpoint, e.g. `http://localhost:6334`.
    pub qdrant_url: String,
    /// Optional API key for Qdrant Cloud.
    pub qdrant_api_key: Option<String>,
    /// Target collection name.
    pub collection: String,
    /// Distance function (Cosine by default).
    pub distance: DistanceKind,
    /// Exact search flag (false = HNSW ANN).
    pub exact_search: bool,
    /// Max points pulled from the text-match filter before local BM25 scoring.
    pub lexical_scan_limit: usize,
    /// Page size for scroll requests.
    pub scroll_page: u32,
}

impl RagConfig {
    /// Creates a sane default config for a given collection name and Qdrant endpoint.
    pub fn new_default(url: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            qdrant_url: url.into(),
            qdrant_api_key: None,
            collection: collection.into(),
            distance: DistanceKind::Cosine,
            exact_search: false,
            lexical_scan_limit: 2000,
            scroll_page: 256,
        }
    }

    /// Reads the config from environment.
    ///
    /// - `QDRANT_URL` (default `http://localhost:6334`)
    /// - `QDRANT_API_KEY`
    /// - `QDRANT_COLLECTION` (default `chunks`)
    /// - `QDRANT_DISTANCE` (default `cosine`)
    /// - `QDRANT_EXACT` (default `false`)
    /// - `LEXICAL_SCAN_LIMIT` (default `2000`)
    /// - `QDRANT_SCROLL_PAGE` (default `256`)
    pub fn from_env() -> Result<Self, RagError> {
        let mut cfg = Self::new_default(
            env_or("QDRANT_URL", "http://localhost:6334"),
            env_or("QDRANT_COLLECTION", "chunks"),
        );
        cfg.qdrant_api_key = std::env::var("QDRANT_API_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty());
        cfg.distance = env_or("QDRANT_DISTANCE", "cosine").parse()?;
        cfg.exact_search = parse_env("QDRANT_EXACT", false)?;
        cfg.lexical_scan_limit = parse_env("LEXICAL_SCAN_LIMIT", 2000)?;
        cfg.scroll_page = parse_env("QDRANT_SCROLL_PAGE", 256)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates config values.
    pub fn validate(&self) -> Result<(), RagError> {
        if self.qdrant_url.trim().is_empty() {
            return Err(RagError::Config("qdrant_url is empty".into()));
        }
        if self.collection.trim().is_empty() {
            return Err(RagError::Config("collection is empty".into()));
        }
        if self.scroll_page == 0 {
            return Err(RagError::Config("scroll_page must be > 0".into()));
        }
        if self.lexical_scan_limit == 0 {
            return Err(RagError::Config("lexical_scan_limit must be > 0".into()));
        }
        Ok(())
    }
}

fn env_or(key: &str, dflt: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| dflt.to_string())
}

fn parse_env<T: FromStr>(key: &str, dflt: T) -> Result<T, RagError> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse::<T>()
            .map_err(|_| RagError::Config(format!("{key}: cannot parse {v:?}"))),
        _ => Ok(dflt),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_becomes_distance() {
        assert!((DistanceKind::Cosine.score_to_distance(0.8) - 0.2).abs() < 1e-6);
        assert_eq!(DistanceKind::Euclid.score_to_distance(3.0), 3.0);
        assert_eq!(DistanceKind::Dot.score_to_distance(2.0), -2.0);
    }

    #[test]
    fn distance_parses_case_insensitively() {
        assert_eq!("Cosine".parse::<DistanceKind>().unwrap(), DistanceKind::Cosine);
        assert_eq!("l2".parse::<DistanceKind>().unwrap(), DistanceKind::Euclid);
        assert!("manhattan".parse::<DistanceKind>().is_err());
    }

    #[test]
    fn validate_rejects_empty_collection() {
        let cfg = RagConfig::new_default("http://localhost:6334", " ");
        assert!(cfg.validate().is_err());
        assert!(RagConfig::new_default("http://localhost:6334", "chunks").validate().is_ok());
    }
}
