use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Metadata keys written on every indexed chunk.
pub mod keys {
    pub const USER_ID: &str = "user_id";
    pub const DOCUMENT_ID: &str = "document_id";
    pub const CHUNK_INDEX: &str = "chunk_index";
    pub const CONTENT_TYPE: &str = "content_type";
    pub const SOURCE: &str = "source";
    pub const DOCUMENT_TITLE: &str = "document_title";
    pub const DOCUMENT_CATEGORY: &str = "document_category";
    pub const DOCUMENT_FILE_TYPE: &str = "document_file_type";
    pub const UPLOAD_TIME: &str = "upload_time";

    /// Value of [`CONTENT_TYPE`] for document chunks.
    pub const DOCUMENT_CHUNK: &str = "document_chunk";
}

/// External identifier of a chunk: `documentID#index`.
pub fn chunk_id(document_id: &str, index: usize) -> String {
    format!("{}#{}", document_id, index)
}

/// A segment of a document, the unit of embedding and retrieval.
///
/// A chunk only becomes a [`VectorRecord`] once its embedding exists, so
/// a chunk whose embedding failed can never reach the index.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChunk {
    pub document_id: String,
    pub owner_id: String,
    pub index: usize,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub metadata: HashMap<String, String>,
}

impl DocumentChunk {
    pub fn new(
        document_id: impl Into<String>,
        owner_id: impl Into<String>,
        index: usize,
        content: impl Into<String>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            owner_id: owner_id.into(),
            index,
            content: content.into(),
            embedding: None,
            metadata: HashMap::new(),
        }
    }

    pub fn id(&self) -> String {
        chunk_id(&self.document_id, self.index)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The record to upsert, or `None` if the chunk has not been embedded.
    pub fn to_record(&self) -> Option<VectorRecord> {
        let values = self.embedding.clone()?;
        let mut record = VectorRecord::new(self.id(), self.content.clone(), values);
        record.metadata = self.metadata.clone();
        record.metadata.insert(keys::USER_ID.to_string(), self.owner_id.clone());
        record.metadata.insert(keys::DOCUMENT_ID.to_string(), self.document_id.clone());
        record.metadata.insert(keys::CHUNK_INDEX.to_string(), self.index.to_string());
        record.metadata.insert(keys::CONTENT_TYPE.to_string(), keys::DOCUMENT_CHUNK.to_string());
        Some(record)
    }
}

/// A vector as stored in the index, with the chunk text and its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub content: String,
    pub metadata: HashMap<String, String>,
}

impl VectorRecord {
    pub fn new(id: impl Into<String>, content: impl Into<String>, values: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            values,
            content: content.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Conditions on metadata, all of which must hold. Each condition accepts
/// one or more values for its key.
///
/// Backends translate this into their native filter language. Retrieval
/// that originates from a user always starts from [`for_owner`](Self::for_owner).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFilter {
    conditions: BTreeMap<String, Vec<String>>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_owner(user_id: impl Into<String>) -> Self {
        Self::new().with(keys::USER_ID, user_id)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions.insert(key.into(), vec![value.into()]);
        self
    }

    /// Requires `key` to equal any of `values`. An empty `values` matches nothing.
    pub fn with_any<I, V>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let mut values: Vec<String> = values.into_iter().map(Into::into).collect();
        values.sort();
        values.dedup();
        self.conditions.insert(key.into(), values);
        self
    }

    pub fn with_document(self, document_id: impl Into<String>) -> Self {
        self.with(keys::DOCUMENT_ID, document_id)
    }

    pub fn with_documents<I, V>(self, document_ids: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.with_any(keys::DOCUMENT_ID, document_ids)
    }

    pub fn with_category(self, category: impl Into<String>) -> Self {
        self.with(keys::DOCUMENT_CATEGORY, category)
    }

    /// Adds every condition of `other`; on a shared key `other` wins.
    pub fn merge(mut self, other: &MetadataFilter) -> Self {
        for (k, v) in &other.conditions {
            self.conditions.insert(k.clone(), v.clone());
        }
        self
    }

    pub fn owner(&self) -> Option<&str> {
        self.get(keys::USER_ID)
    }

    /// The value required for `key`, when exactly one is.
    pub fn get(&self, key: &str) -> Option<&str> {
        match self.conditions.get(key).map(Vec::as_slice) {
            Some([value]) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// True when some condition has no acceptable value.
    pub fn matches_nothing(&self) -> bool {
        self.conditions.values().any(Vec::is_empty)
    }

    pub fn conditions(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.conditions.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn matches(&self, metadata: &HashMap<String, String>) -> bool {
        self.conditions
            .iter()
            .all(|(k, values)| metadata.get(k).is_some_and(|m| values.contains(m)))
    }
}

/// One hit from a similarity query. Higher scores are more relevant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub chunk_id: String,
    pub score: f32,
    pub document_id: String,
    pub snippet: String,
    pub metadata: HashMap<String, String>,
}

impl RetrievalResult {
    pub fn from_record(record: &VectorRecord, score: f32) -> Self {
        Self {
            chunk_id: record.id.clone(),
            score,
            document_id: record
                .metadata
                .get(keys::DOCUMENT_ID)
                .cloned()
                .unwrap_or_default(),
            snippet: record.content.clone(),
            metadata: record.metadata.clone(),
        }
    }
}
