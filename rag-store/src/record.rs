//! Core data models used by the library.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Qdrant point identifier.
///
/// Ordering is numeric for `Num`, lexical for `Uuid`, and every `Num`
/// sorts before every `Uuid`; compaction keeps the lowest key of a group.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PointKey {
    Num(u64),
    Uuid(String),
}

impl std::fmt::Display for PointKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PointKey::Num(n) => write!(f, "{n}"),
            PointKey::Uuid(u) => f.write_str(u),
        }
    }
}

/// One retrievable chunk as stored in the collection payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkRow {
    /// Stable chunk identifier (`chunk_id` payload field, or the point id).
    pub chunk_id: String,
    pub doc_id: String,
    /// Position of the chunk inside its document.
    pub ord: i64,
    pub page: Option<i64>,
    pub text: String,
    pub category: Option<String>,
}

impl ChunkRow {
    /// Maps a JSON payload to a row. Missing `chunk_id` falls back to the point id.
    ///
    /// Returns `None` for points without `doc_id` or `text`.
    pub fn from_payload(key: &PointKey, payload: &Value) -> Option<Self> {
        let text = payload.get("text")?.as_str()?.to_string();
        let doc_id = match payload.get("doc_id")? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let chunk_id = payload
            .get("chunk_id")
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .unwrap_or_else(|| key.to_string());

        Some(Self {
            chunk_id,
            doc_id,
            ord: payload.get("ord").and_then(Value::as_i64).unwrap_or(0),
            page: payload.get("page").and_then(Value::as_i64),
            text,
            category: payload
                .get("category")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

/// Vector-search hit; `distance` is lower-is-closer.
#[derive(Clone, Debug, PartialEq)]
pub struct VectorHit {
    pub row: ChunkRow,
    pub distance: f32,
}

/// Lexical hit with its BM25 score (higher = better).
#[derive(Clone, Debug, PartialEq)]
pub struct LexicalHit {
    pub row: ChunkRow,
    pub bm25: f32,
}

/// Point as seen by maintenance scans.
#[derive(Clone, Debug)]
pub struct StoredPoint {
    pub key: PointKey,
    /// `None` when the payload lacks the fields every chunk must carry.
    pub row: Option<ChunkRow>,
}

/// Retrieval filter; all set fields must match.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RagFilter {
    /// Exact match on the chunk's document category.
    pub category: Option<String>,
}

impl RagFilter {
    pub fn is_empty(&self) -> bool {
        self.category.is_none()
    }
}

/// Clamps a text to at most `max_chars` bytes and `max_lines` lines.
///
/// Cuts only at line boundaries unless the first line alone is too long, in
/// which case it is cut at the last char boundary that fits. Appends `…`
/// when anything was dropped and `add_ellipsis` is set.
pub fn clamp_snippet(s: &str, max_chars: usize, max_lines: usize, add_ellipsis: bool) -> String {
    if s.is_empty() || max_chars == 0 || max_lines == 0 {
        return String::new();
    }

    let mut out = String::new();
    let mut truncated = false;

    for (i, line) in s.lines().enumerate() {
        if i >= max_lines {
            truncated = true;
            break;
        }
        let need = line.len() + usize::from(i > 0);
        if out.len() + need > max_chars {
            truncated = true;
            if i == 0 {
                let mut cut = max_chars.min(line.len());
                while !line.is_char_boundary(cut) {
                    cut -= 1;
                }
                out.push_str(&line[..cut]);
            }
            break;
        }
        if i > 0 {
            out.push('\n');
        }
        out.push_str(line);
    }

    if truncated && add_ellipsis {
        out.push('…');
    }
    out
}
