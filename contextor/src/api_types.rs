//! Public API types re-used by external crates (the HTTP/CLI layer, the ops loop).

use futures::stream::BoxStream;
use rag_store::{ChunkRow, RagFilter};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Retrieval mode of one request. A keyword switches the lexical path on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetrievalMode {
    PureVector,
    Hybrid { keyword: String },
}

impl RetrievalMode {
    /// Blank or missing keywords select [`RetrievalMode::PureVector`].
    pub fn from_keyword(keyword: Option<&str>) -> Self {
        match keyword.map(str::trim) {
            Some(k) if !k.is_empty() => RetrievalMode::Hybrid {
                keyword: k.to_string(),
            },
            _ => RetrievalMode::PureVector,
        }
    }

    pub fn keyword(&self) -> Option<&str> {
        match self {
            RetrievalMode::PureVector => None,
            RetrievalMode::Hybrid { keyword } => Some(keyword),
        }
    }
}

/// Who issued a request. Gold-set replays are logged but kept out of the SLO.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    #[default]
    Live,
    Gold,
}

/// Immutable request input.
///
/// `top_k == 0` means: "use `RAG_TOP_K` from config".
///
/// # Example
/// ```
/// use contextor::Query;
/// let q = Query::new("What is the liability cap?")
///     .with_keyword(Some("liability"))
///     .with_top_k(5);
/// assert_eq!(q.mode.keyword(), Some("liability"));
/// ```
#[derive(Clone, Debug)]
pub struct Query {
    pub text: String,
    pub mode: RetrievalMode,
    pub filter: RagFilter,
    pub top_k: usize,
    pub template: Option<String>,
    pub origin: Origin,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            mode: RetrievalMode::PureVector,
            filter: RagFilter::default(),
            top_k: 0,
            template: None,
            origin: Origin::Live,
        }
    }

    pub fn with_keyword(mut self, keyword: Option<&str>) -> Self {
        self.mode = RetrievalMode::from_keyword(keyword);
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_category(mut self, category: Option<&str>) -> Self {
        self.filter.category = category.map(str::to_string);
        self
    }

    pub fn with_template(mut self, template: Option<&str>) -> Self {
        self.template = template.map(str::to_string);
        self
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }
}

/// Position (1-based) and distance of a chunk in the vector list.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VectorSignal {
    pub rank: usize,
    pub distance: f32,
}

/// Position (1-based) and BM25 score of a chunk in the lexical list.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LexicalSignal {
    pub rank: usize,
    pub bm25: f32,
}

/// Ranking signals carried by a candidate. At least one is always present.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Signals {
    Vector(VectorSignal),
    Lexical(LexicalSignal),
    Both(VectorSignal, LexicalSignal),
}

impl Signals {
    pub fn vector(&self) -> Option<&VectorSignal> {
        match self {
            Signals::Vector(v) | Signals::Both(v, _) => Some(v),
            Signals::Lexical(_) => None,
        }
    }

    pub fn lexical(&self) -> Option<&LexicalSignal> {
        match self {
            Signals::Lexical(l) | Signals::Both(_, l) => Some(l),
            Signals::Vector(_) => None,
        }
    }

    /// Merges the signal of another list into this one.
    pub fn with_lexical(self, l: LexicalSignal) -> Self {
        match self {
            Signals::Vector(v) | Signals::Both(v, _) => Signals::Both(v, l),
            Signals::Lexical(_) => Signals::Lexical(l),
        }
    }
}

/// One retrievable chunk with the signals that surfaced it.
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateChunk {
    pub row: ChunkRow,
    pub signals: Signals,
}

impl CandidateChunk {
    pub fn id(&self) -> &str {
        &self.row.chunk_id
    }
}

/// Candidate plus its fused score (higher = more relevant).
#[derive(Clone, Debug, PartialEq)]
pub struct FusedCandidate {
    pub chunk: CandidateChunk,
    pub fused_score: f64,
}

/// Fused candidate after the (optional) cross-encoder pass.
///
/// `rerank_score` is `None` whenever the candidate was not scored: reranker
/// disabled, candidate beyond the scored prefix, or fallback after failure.
#[derive(Clone, Debug, PartialEq)]
pub struct RerankedCandidate {
    pub fused: FusedCandidate,
    pub rerank_score: Option<f32>,
}

impl From<FusedCandidate> for RerankedCandidate {
    fn from(fused: FusedCandidate) -> Self {
        Self {
            fused,
            rerank_score: None,
        }
    }
}

/// Externally visible projection of a selected candidate.
///
/// `marker` is the `n` of the `[Evidence #n]` tag used in prompts and answers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvidencePassage {
    pub marker: usize,
    pub id: String,
    pub doc_id: String,
    pub ord: i64,
    pub page: Option<i64>,
    pub text: String,
    pub snippet: Option<String>,
    pub category: Option<String>,
    /// Vector distance (lower = closer) when the vector list surfaced it.
    pub distance: Option<f32>,
    pub fused_score: f64,
    pub rerank_score: Option<f32>,
}

/// Ordered sections of a templated answer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerSections {
    pub executive_summary: String,
    pub risk_checklist: String,
    pub response_draft: String,
}

/// Batch answer with its supporting evidence.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnswerResult {
    /// Full answer text as produced (including the hedge caveat, if any).
    pub text: String,
    /// Executive summary when sectioned, otherwise the first paragraph.
    pub summary: String,
    pub sections: Option<AnswerSections>,
    /// `true` when a template was requested but could not be applied.
    pub template_fallback: bool,
    /// Passages cited by the text, in evidence order.
    pub evidence: Vec<EvidencePassage>,
    pub confidence: f32,
    pub low_evidence: bool,
    pub eval_id: Uuid,
}

/// Out-of-band metadata of a streamed answer, known before the first fragment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnswerMeta {
    pub evidence: Vec<EvidencePassage>,
    pub confidence: f32,
    pub low_evidence: bool,
    pub eval_id: Uuid,
}

/// Streamed answer: metadata plus an ordered fragment stream.
///
/// Fragments never split an `[Evidence #n]` marker. Dropping the stream
/// cancels generation.
pub struct AnswerStream {
    pub meta: AnswerMeta,
    pub fragments: BoxStream<'static, String>,
}

impl std::fmt::Debug for AnswerStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnswerStream")
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_keyword_is_pure_vector() {
        assert_eq!(RetrievalMode::from_keyword(None), RetrievalMode::PureVector);
        assert_eq!(
            RetrievalMode::from_keyword(Some("   ")),
            RetrievalMode::PureVector
        );
        assert_eq!(
            RetrievalMode::from_keyword(Some(" cap ")).keyword(),
            Some("cap")
        );
    }

    #[test]
    fn merging_lexical_signal_keeps_vector_rank() {
        let v = VectorSignal {
            rank: 2,
            distance: 0.1,
        };
        let l = LexicalSignal { rank: 1, bm25: 3.0 };
        let s = Signals::Vector(v).with_lexical(l);
        assert_eq!(s, Signals::Both(v, l));
        assert_eq!(s.vector().map(|v| v.rank), Some(2));
        assert_eq!(s.lexical().map(|l| l.rank), Some(1));
    }
}
