//! Qdrant vector database storage implementation.
//!
//! Connects to a Qdrant server over gRPC. Chunk ids are hashed into stable
//! numeric point ids; the original id and the chunk text travel in the
//! payload next to the metadata, whose keys are prefixed with `meta_`.

use super::store::{validate_batch, validate_vector, IndexError, Result, VectorIndex};
use super::types::{MetadataFilter, RetrievalResult, VectorRecord};
use anyhow::Context;
use async_trait::async_trait;
use qdrant_client::{
    Payload, Qdrant,
    qdrant::{
        Condition, CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder, Distance,
        Filter, PointStruct, SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
    },
};
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tracing::{debug, info};

const ID_FIELD: &str = "id";
const CONTENT_FIELD: &str = "content";
const METADATA_PREFIX: &str = "meta_";

fn metadata_field(key: &str) -> String {
    format!("{}{}", METADATA_PREFIX, key)
}

/// Qdrant-backed vector index.
///
/// The client is built and the collection created on first use, once,
/// then shared by every call.
pub struct QdrantIndex {
    url: String,
    collection_name: String,
    dimensions: usize,
    client: OnceCell<Qdrant>,
}

impl QdrantIndex {
    pub fn new(url: String, collection_name: String, dimensions: usize) -> Self {
        Self {
            url,
            collection_name,
            dimensions,
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> Result<&Qdrant> {
        self.client
            .get_or_try_init(|| async {
                info!(url = %self.url, collection = %self.collection_name, "Connecting to Qdrant");
                let client = Qdrant::from_url(&self.url)
                    .build()
                    .context("Failed to connect to Qdrant server")?;
                self.ensure_collection(&client).await?;
                Ok::<_, IndexError>(client)
            })
            .await
    }

    async fn ensure_collection(&self, client: &Qdrant) -> Result<()> {
        let exists = client
            .collection_exists(&self.collection_name)
            .await
            .context("Failed to check collection")?;

        if !exists {
            client
                .create_collection(
                    CreateCollectionBuilder::new(&self.collection_name).vectors_config(
                        VectorParamsBuilder::new(self.dimensions as u64, Distance::Cosine),
                    ),
                )
                .await
                .context("Failed to create collection")?;
            debug!(collection = %self.collection_name, "Created Qdrant collection");
        }

        Ok(())
    }
}

/// Stable numeric point id derived from a chunk id.
fn point_id(chunk_id: &str) -> u64 {
    let digest = Sha256::digest(chunk_id.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

fn to_qdrant_filter(filter: &MetadataFilter) -> Filter {
    Filter::must(filter.conditions().map(|(k, values)| match values {
        [value] => Condition::matches(metadata_field(k), value.clone()),
        _ => Condition::matches(metadata_field(k), values.to_vec()),
    }))
}

fn payload_fields(record: &VectorRecord) -> serde_json::Map<String, serde_json::Value> {
    let mut map = serde_json::Map::new();
    map.insert(ID_FIELD.to_string(), serde_json::Value::String(record.id.clone()));
    map.insert(CONTENT_FIELD.to_string(), serde_json::Value::String(record.content.clone()));
    for (k, v) in &record.metadata {
        map.insert(metadata_field(k), serde_json::Value::String(v.clone()));
    }
    map
}

fn to_payload(record: &VectorRecord) -> Result<Payload> {
    let payload = Payload::try_from(serde_json::Value::Object(payload_fields(record)))
        .context("Failed to build payload")?;
    Ok(payload)
}

/// Rebuilds a record (without its vector) from string payload fields.
fn from_payload_fields<'a>(fields: impl IntoIterator<Item = (&'a str, &'a str)>) -> VectorRecord {
    let mut record = VectorRecord::new(String::new(), String::new(), Vec::new());
    for (k, v) in fields {
        if let Some(key) = k.strip_prefix(METADATA_PREFIX) {
            record.metadata.insert(key.to_string(), v.to_string());
        } else if k == ID_FIELD {
            record.id = v.to_string();
        } else if k == CONTENT_FIELD {
            record.content = v.to_string();
        }
    }
    record
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()> {
        validate_batch(&records, self.dimensions)?;
        let client = self.client().await?;

        let count = records.len();
        let points = records
            .into_iter()
            .map(|record| {
                let payload = to_payload(&record)?;
                Ok(PointStruct::new(point_id(&record.id), record.values, payload))
            })
            .collect::<Result<Vec<_>>>()?;

        client
            .upsert_points(UpsertPointsBuilder::new(&self.collection_name, points).wait(true))
            .await
            .context("Failed to upsert points")?;

        debug!(count, collection = %self.collection_name, "Upserted points");
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<RetrievalResult>> {
        validate_vector("query", vector, self.dimensions)?;
        if top_k == 0 || filter.matches_nothing() {
            return Ok(Vec::new());
        }
        let client = self.client().await?;

        let mut search = SearchPointsBuilder::new(&self.collection_name, vector.to_vec(), top_k as u64)
            .with_payload(true);
        if !filter.is_empty() {
            search = search.filter(to_qdrant_filter(filter));
        }

        let response = client
            .search_points(search)
            .await
            .context("Failed to search points")?;

        let results = response
            .result
            .into_iter()
            .map(|point| {
                let record = from_payload_fields(
                    point
                        .payload
                        .iter()
                        .filter_map(|(k, v)| v.as_str().map(|s| (k.as_str(), &s[..]))),
                );
                RetrievalResult::from_record(&record, point.score)
            })
            .collect();

        Ok(results)
    }

    async fn delete_by_filter(&self, filter: &MetadataFilter) -> Result<()> {
        if filter.is_empty() {
            return Err(IndexError::EmptyFilter);
        }
        if filter.matches_nothing() {
            return Ok(());
        }
        let client = self.client().await?;

        client
            .delete_points(
                DeletePointsBuilder::new(&self.collection_name)
                    .points(to_qdrant_filter(filter))
                    .wait(true),
            )
            .await
            .context("Failed to delete points")?;

        Ok(())
    }

    async fn count(&self, filter: &MetadataFilter) -> Result<usize> {
        if filter.matches_nothing() {
            return Ok(0);
        }
        let client = self.client().await?;

        let mut request = CountPointsBuilder::new(&self.collection_name).exact(true);
        if !filter.is_empty() {
            request = request.filter(to_qdrant_filter(filter));
        }

        let response = client.count(request).await.context("Failed to count points")?;
        Ok(response.result.map(|r| r.count as usize).unwrap_or(0))
    }
}
