//! Thin adapter around `qdrant-client` to isolate API usage.
//!
//! This facade concentrates all Qdrant interactions behind a minimal API,
//! hiding away the verbose builder pattern and keeping the rest of the
//! crate decoupled from `qdrant-client`.

use std::collections::HashMap;

use crate::config::{DistanceKind, RagConfig};
use crate::errors::RagError;
use crate::record::PointKey;

use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    CreateFieldIndexCollectionBuilder, DeletePointsBuilder, FieldType, Filter, PointId,
    PointsIdsList, ScrollPointsBuilder, SearchParamsBuilder, SearchPointsBuilder,
    Value as QValue, point_id::PointIdOptions, vectors_config,
};
use tracing::{debug, info};

/// A facade over the Qdrant client.
///
/// This struct encapsulates:
/// - The underlying Qdrant client.
/// - The target collection name.
/// - The distance function used in the vector space.
pub struct QdrantFacade {
    client: Qdrant,
    collection: String,
    distance: DistanceKind,
}

impl QdrantFacade {
    /// Creates a new facade from the given configuration.
    pub fn new(cfg: &RagConfig) -> Result<Self, RagError> {
        cfg.validate()?;

        let mut builder = Qdrant::from_url(&cfg.qdrant_url);
        if let Some(key) = &cfg.qdrant_api_key {
            builder = builder.api_key(key.clone());
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            collection: cfg.collection.clone(),
            distance: cfg.distance,
        })
    }

    pub fn distance(&self) -> DistanceKind {
        self.distance
    }

    /// Vector size configured on the collection.
    ///
    /// For named vectors the size is returned only when exactly one is defined.
    pub async fn vector_size(&self) -> Result<Option<u64>, RagError> {
        let info = self.client.collection_info(&self.collection).await?;
        let cfg = info
            .result
            .and_then(|r| r.config)
            .and_then(|c| c.params)
            .and_then(|p| p.vectors_config)
            .and_then(|v| v.config);

        Ok(match cfg {
            Some(vectors_config::Config::Params(p)) => Some(p.size),
            Some(vectors_config::Config::ParamsMap(m)) if m.map.len() == 1 => {
                m.map.values().next().map(|p| p.size)
            }
            _ => None,
        })
    }

    /// Names of payload fields that already carry an index.
    pub async fn indexed_fields(&self) -> Result<Vec<String>, RagError> {
        let info = self.client.collection_info(&self.collection).await?;
        Ok(info
            .result
            .map(|r| r.payload_schema.into_keys().collect())
            .unwrap_or_default())
    }

    /// Creates a payload index and waits for it to be applied.
    pub async fn create_field_index(&self, field: &str, kind: FieldType) -> Result<(), RagError> {
        info!(collection = %self.collection, field, ?kind, "creating payload index");
        self.client
            .create_field_index(
                CreateFieldIndexCollectionBuilder::new(&self.collection, field, kind).wait(true),
            )
            .await?;
        Ok(())
    }

    /// Similarity search; returns `(point, score, payload)` sorted by Qdrant score.
    pub async fn search(
        &self,
        vector: Vec<f32>,
        limit: u64,
        filter: Option<Filter>,
        exact: bool,
    ) -> Result<Vec<(PointKey, f32, serde_json::Value)>, RagError> {
        debug!(collection = %self.collection, limit, exact, "search");

        let mut builder =
            SearchPointsBuilder::new(&self.collection, vector, limit).with_payload(true);
        if let Some(f) = filter {
            builder = builder.filter(f);
        }
        if exact {
            builder = builder.params(SearchParamsBuilder::default().exact(true));
        }

        let res = self.client.search_points(builder).await?;

        let out = res
            .result
            .into_iter()
            .filter_map(|r| {
                let key = point_key(r.id)?;
                Some((key, r.score, qpayload_to_json(r.payload)))
            })
            .collect::<Vec<_>>();

        debug!(hits = out.len(), "search completed");
        Ok(out)
    }

    /// Scrolls points matching `filter` until `max_points` or the end of the collection.
    pub async fn scroll(
        &self,
        filter: Option<Filter>,
        page: u32,
        max_points: Option<usize>,
    ) -> Result<Vec<(PointKey, serde_json::Value)>, RagError> {
        let mut out = Vec::new();
        let mut offset: Option<PointId> = None;

        loop {
            let remaining = max_points.map(|m| m.saturating_sub(out.len()));
            if remaining == Some(0) {
                break;
            }
            let limit = remaining.map_or(page, |r| page.min(r as u32));

            let mut builder = ScrollPointsBuilder::new(&self.collection)
                .limit(limit)
                .with_payload(true)
                .with_vectors(false);
            if let Some(f) = filter.clone() {
                builder = builder.filter(f);
            }
            if let Some(o) = offset.take() {
                builder = builder.offset(o);
            }

            let res = self.client.scroll(builder).await?;
            for p in res.result {
                if let Some(key) = point_key(p.id) {
                    out.push((key, qpayload_to_json(p.payload)));
                }
            }

            match res.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        debug!(collection = %self.collection, points = out.len(), "scroll completed");
        Ok(out)
    }

    /// Deletes points by id; returns how many ids were submitted.
    pub async fn delete_points(&self, keys: &[PointKey]) -> Result<usize, RagError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let ids = keys.iter().map(to_point_id).collect::<Vec<_>>();
        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(PointsIdsList { ids })
                    .wait(true),
            )
            .await?;
        info!(collection = %self.collection, deleted = keys.len(), "points deleted");
        Ok(keys.len())
    }
}

fn point_key(id: Option<PointId>) -> Option<PointKey> {
    match id?.point_id_options? {
        PointIdOptions::Num(n) => Some(PointKey::Num(n)),
        PointIdOptions::Uuid(u) => Some(PointKey::Uuid(u)),
    }
}

fn to_point_id(key: &PointKey) -> PointId {
    let opts = match key {
        PointKey::Num(n) => PointIdOptions::Num(*n),
        PointKey::Uuid(u) => PointIdOptions::Uuid(u.clone()),
    };
    PointId {
        point_id_options: Some(opts),
    }
}

/// Converts a Qdrant payload (`HashMap<String, qdrant::Value>`) into JSON.
///
/// Unsupported nested objects/arrays are mapped to `Null`.
fn qpayload_to_json(mut p: HashMap<String, QValue>) -> serde_json::Value {
    use qdrant_client::qdrant::value::Kind as K;
    let mut m = serde_json::Map::new();
    for (k, v) in p.drain() {
        let j = match v.kind {
            Some(K::StringValue(s)) => serde_json::Value::String(s),
            Some(K::IntegerValue(i)) => serde_json::Value::Number(i.into()),
            Some(K::DoubleValue(f)) => serde_json::json!(f),
            Some(K::BoolValue(b)) => serde_json::Value::Bool(b),
            _ => serde_json::Value::Null,
        };
        m.insert(k, j);
    }
    serde_json::Value::Object(m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdrant_client::qdrant::value::Kind;

    #[test]
    fn point_ids_round_trip_through_keys() {
        for key in [PointKey::Num(17), PointKey::Uuid("5c56c793-69f3-4fbf-87e6-c4bf54c28c26".into())] {
            assert_eq!(point_key(Some(to_point_id(&key))), Some(key));
        }
        assert_eq!(point_key(None), None);
    }

    #[test]
    fn payload_scalars_convert() {
        let mut p = HashMap::new();
        p.insert(
            "text".to_string(),
            QValue {
                kind: Some(Kind::StringValue("hello".into())),
            },
        );
        p.insert(
            "ord".to_string(),
            QValue {
                kind: Some(Kind::IntegerValue(3)),
            },
        );
        let j = qpayload_to_json(p);
        assert_eq!(j["text"], "hello");
        assert_eq!(j["ord"], 3);
    }
}
