//! Filter conversion to Qdrant `Filter`.

use crate::record::RagFilter;
use qdrant_client::qdrant::{Condition, Filter};
use tracing::debug;

/// Payload field holding the chunk text.
pub const TEXT_FIELD: &str = "text";
/// Payload field holding the document category.
pub const CATEGORY_FIELD: &str = "category";

fn filter_conditions(f: &RagFilter) -> Vec<Condition> {
    let mut must = Vec::new();
    if let Some(cat) = &f.category {
        must.push(Condition::matches(CATEGORY_FIELD, cat.clone()));
    }
    must
}

/// Converts [`RagFilter`] to a Qdrant [`Filter`]; `None` when nothing is set.
pub fn to_qdrant_filter(f: &RagFilter) -> Option<Filter> {
    let must = filter_conditions(f);
    debug!(conditions = must.len(), "filters::to_qdrant_filter");
    if must.is_empty() {
        None
    } else {
        Some(Filter::must(must))
    }
}

/// Full-text match on the chunk text combined with the retrieval filter.
///
/// With a `text` full-text index Qdrant matches all tokens; without it the
/// condition degrades to a substring match.
pub fn text_match_filter(keyword: &str, f: &RagFilter) -> Filter {
    let mut must = filter_conditions(f);
    must.push(Condition::matches_text(TEXT_FIELD, keyword.trim()));
    debug!(conditions = must.len(), "filters::text_match_filter");
    Filter::must(must)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_is_none() {
        assert!(to_qdrant_filter(&RagFilter::default()).is_none());
    }

    #[test]
    fn category_and_text_are_both_required() {
        let f = RagFilter {
            category: Some("policy".into()),
        };
        assert_eq!(to_qdrant_filter(&f).unwrap().must.len(), 1);
        let t = text_match_filter(" retention ", &f);
        assert_eq!(t.must.len(), 2);
        assert!(t.should.is_empty());
    }
}
