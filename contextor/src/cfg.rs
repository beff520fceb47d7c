//! Runtime configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::error::ContextorError;

/// How the vector and lexical lists are merged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FusionMode {
    /// Reciprocal Rank Fusion over both lists.
    Rrf,
    /// Vector order restricted to ids that also matched lexically.
    Intersect,
}

impl FromStr for FusionMode {
    type Err = ContextorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rrf" => Ok(FusionMode::Rrf),
            "intersect" | "filter" | "off" | "disabled" => Ok(FusionMode::Intersect),
            other => Err(ContextorError::Config(format!(
                "FUSION_MODE must be 'rrf' or 'intersect', got '{other}'"
            ))),
        }
    }
}

/// Blend weights of the confidence components.
///
/// The weights are tunables validated against gold-set runs, not constants;
/// they are normalized by their sum when scoring.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConfidenceWeights {
    pub agreement: f32,
    pub strength: f32,
    pub proximity: f32,
    pub margin: f32,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            agreement: 0.35,
            strength: 0.2,
            proximity: 0.35,
            margin: 0.1,
        }
    }
}

impl ConfidenceWeights {
    pub fn sum(&self) -> f32 {
        self.agreement + self.strength + self.proximity + self.margin
    }
}

/// Config bag for the engine. All fields have defaults via [`Default`].
#[derive(Clone, Debug)]
pub struct ContextorConfig {
    // fusion
    pub fusion_mode: FusionMode,
    pub rrf_k: u32,
    pub vec_candidates: usize,
    pub ft_candidates: usize,

    // reranker
    pub rerank_enabled: bool,
    pub rerank_model_id: String,
    pub rerank_top_n: usize,
    pub rerank_timeout: Duration,
    pub rerank_max_concurrency: usize,

    // selection
    pub default_top_k: usize,
    pub low_evidence_threshold: f32,
    pub min_evidence_pool: usize,
    pub weights: ConfidenceWeights,

    // per-stage timeouts
    pub embed_timeout: Duration,
    pub vector_timeout: Duration,
    pub lexical_timeout: Duration,
    pub generation_timeout: Duration,

    // prompt / passages
    pub max_ctx_chars: usize,
    pub snippet_chars: usize,
    pub snippet_lines: usize,
}

impl Default for ContextorConfig {
    fn default() -> Self {
        Self {
            fusion_mode: FusionMode::Rrf,
            rrf_k: 60,
            vec_candidates: 100,
            ft_candidates: 100,

            rerank_enabled: false,
            rerank_model_id: "cross-encoder/ms-marco-MiniLM-L-6-v2".into(),
            rerank_top_n: 30,
            rerank_timeout: Duration::from_millis(2500),
            rerank_max_concurrency: 2,

            default_top_k: 8,
            low_evidence_threshold: 0.6,
            min_evidence_pool: 2,
            weights: ConfidenceWeights::default(),

            embed_timeout: Duration::from_millis(5000),
            vector_timeout: Duration::from_millis(3000),
            lexical_timeout: Duration::from_millis(1500),
            generation_timeout: Duration::from_secs(120),

            max_ctx_chars: 8500,
            snippet_chars: 280,
            snippet_lines: 4,
        }
    }
}

impl ContextorConfig {
    /// Build from environment variables with defaults.
    ///
    /// # Errors
    /// Returns [`ContextorError::Config`] when a variable is set but malformed
    /// or out of range.
    ///
    /// # Example
    /// ```
    /// # use contextor::cfg::ContextorConfig;
    /// let cfg = ContextorConfig::from_env().unwrap();
    /// assert!(cfg.rrf_k >= 1);
    /// ```
    pub fn from_env() -> Result<Self, ContextorError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from an arbitrary key lookup. Used by [`Self::from_env`] and tests.
    pub fn from_lookup<F>(get: F) -> Result<Self, ContextorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let p = Parser { get: &get };

        let cfg = Self {
            fusion_mode: p.parse("FUSION_MODE", d.fusion_mode)?,
            rrf_k: p.parse("HYBRID_RRF_K", d.rrf_k)?,
            vec_candidates: p.parse("HYBRID_VEC_CANDIDATES", d.vec_candidates)?,
            ft_candidates: p.parse("HYBRID_FT_CANDIDATES", d.ft_candidates)?,

            rerank_enabled: p.flag("RERANK_ENABLED", d.rerank_enabled)?,
            rerank_model_id: p.string("RERANK_MODEL_ID", &d.rerank_model_id),
            rerank_top_n: p.parse("RERANK_TOP_N", d.rerank_top_n)?,
            rerank_timeout: p.millis("RERANK_TIMEOUT_MS", d.rerank_timeout)?,
            rerank_max_concurrency: p.parse("RERANK_MAX_CONCURRENCY", d.rerank_max_concurrency)?,

            default_top_k: p.parse("RAG_TOP_K", d.default_top_k)?,
            low_evidence_threshold: p.parse("LOW_EVIDENCE_THRESHOLD", d.low_evidence_threshold)?,
            min_evidence_pool: p.parse("MIN_EVIDENCE_POOL", d.min_evidence_pool)?,
            weights: ConfidenceWeights {
                agreement: p.parse("CONFIDENCE_W_AGREEMENT", d.weights.agreement)?,
                strength: p.parse("CONFIDENCE_W_STRENGTH", d.weights.strength)?,
                proximity: p.parse("CONFIDENCE_W_PROXIMITY", d.weights.proximity)?,
                margin: p.parse("CONFIDENCE_W_MARGIN", d.weights.margin)?,
            },

            embed_timeout: p.millis("EMBED_TIMEOUT_MS", d.embed_timeout)?,
            vector_timeout: p.millis("VECTOR_TIMEOUT_MS", d.vector_timeout)?,
            lexical_timeout: p.millis("LEXICAL_TIMEOUT_MS", d.lexical_timeout)?,
            generation_timeout: Duration::from_secs(
                p.parse("GENERATION_TIMEOUT_SECS", d.generation_timeout.as_secs())?,
            ),

            max_ctx_chars: p.parse("MAX_CTX_CHARS", d.max_ctx_chars)?,
            snippet_chars: p.parse("SNIPPET_MAX_CHARS", d.snippet_chars)?,
            snippet_lines: p.parse("SNIPPET_MAX_LINES", d.snippet_lines)?,
        };

        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks ranges that would make the pipeline meaningless.
    pub fn validate(&self) -> Result<(), ContextorError> {
        let bad = |msg: String| Err(ContextorError::Config(msg));

        if self.rrf_k == 0 {
            return bad("HYBRID_RRF_K must be >= 1".into());
        }
        if self.vec_candidates == 0 {
            return bad("HYBRID_VEC_CANDIDATES must be >= 1".into());
        }
        if self.default_top_k == 0 {
            return bad("RAG_TOP_K must be >= 1".into());
        }
        if self.rerank_enabled && (self.rerank_top_n == 0 || self.rerank_max_concurrency == 0) {
            return bad("RERANK_TOP_N and RERANK_MAX_CONCURRENCY must be >= 1".into());
        }
        if !(0.0..=1.0).contains(&self.low_evidence_threshold) {
            return bad(format!(
                "LOW_EVIDENCE_THRESHOLD must be in [0, 1], got {}",
                self.low_evidence_threshold
            ));
        }
        let w = &self.weights;
        if [w.agreement, w.strength, w.proximity, w.margin]
            .iter()
            .any(|x| !x.is_finite() || *x < 0.0)
            || w.sum() <= 0.0
        {
            return bad("confidence weights must be non-negative with a positive sum".into());
        }
        Ok(())
    }
}

struct Parser<'a, F: Fn(&str) -> Option<String>> {
    get: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Parser<'_, F> {
    fn raw(&self, k: &str) -> Option<String> {
        (self.get)(k)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, k: &str, dflt: &str) -> String {
        self.raw(k).unwrap_or_else(|| dflt.to_string())
    }

    fn parse<T: FromStr>(&self, k: &str, dflt: T) -> Result<T, ContextorError> {
        match self.raw(k) {
            None => Ok(dflt),
            Some(v) => v
                .parse()
                .map_err(|_| ContextorError::Config(format!("{k}: cannot parse '{v}'"))),
        }
    }

    fn flag(&self, k: &str, dflt: bool) -> Result<bool, ContextorError> {
        match self.raw(k).map(|v| v.to_ascii_lowercase()) {
            None => Ok(dflt),
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
            Some(v) => Err(ContextorError::Config(format!("{k}: expected a boolean, got '{v}'"))),
        }
    }

    fn millis(&self, k: &str, dflt: Duration) -> Result<Duration, ContextorError> {
        let ms: u64 = self.parse(k, dflt.as_millis() as u64)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<ContextorConfig, ContextorError> {
        let m: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ContextorConfig::from_lookup(|k| m.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = from_pairs(&[]).unwrap();
        assert_eq!(cfg.fusion_mode, FusionMode::Rrf);
        assert_eq!(cfg.rrf_k, 60);
        assert_eq!(cfg.vec_candidates, 100);
        assert_eq!(cfg.ft_candidates, 100);
        assert!(!cfg.rerank_enabled);
        assert_eq!(cfg.rerank_top_n, 30);
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = from_pairs(&[
            ("FUSION_MODE", "intersect"),
            ("HYBRID_RRF_K", "10"),
            ("RERANK_ENABLED", "yes"),
            ("RERANK_TIMEOUT_MS", "750"),
            ("LOW_EVIDENCE_THRESHOLD", "0.42"),
        ])
        .unwrap();
        assert_eq!(cfg.fusion_mode, FusionMode::Intersect);
        assert_eq!(cfg.rrf_k, 10);
        assert!(cfg.rerank_enabled);
        assert_eq!(cfg.rerank_timeout, Duration::from_millis(750));
        assert!((cfg.low_evidence_threshold - 0.42).abs() < f32::EPSILON);
    }

    #[test]
    fn malformed_values_are_config_errors() {
        assert!(matches!(
            from_pairs(&[("HYBRID_RRF_K", "sixty")]),
            Err(ContextorError::Config(_))
        ));
        assert!(from_pairs(&[("FUSION_MODE", "weighted")]).is_err());
        assert!(from_pairs(&[("RERANK_ENABLED", "maybe")]).is_err());
        assert!(from_pairs(&[("HYBRID_RRF_K", "0")]).is_err());
        assert!(from_pairs(&[("LOW_EVIDENCE_THRESHOLD", "1.5")]).is_err());
        assert!(from_pairs(&[("CONFIDENCE_W_MARGIN", "-1")]).is_err());
    }
}
