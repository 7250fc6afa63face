use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

/// Processing attempts allowed before a failed document stays failed.
pub const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// An uploaded document as tracked by the storage collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub owner_id: String,
    pub file_name: String,
    /// Format declared at upload (`pdf`, `txt`, `md`, ...).
    pub format: String,
    pub category: Option<String>,
    pub title: Option<String>,
    pub byte_len: usize,
    pub uploaded_at: Option<String>,
    pub status: DocumentStatus,
    pub chunk_count: usize,
    pub error: Option<String>,
    pub processing_attempts: u32,
}

impl Document {
    pub fn new(
        id: impl Into<String>,
        owner_id: impl Into<String>,
        file_name: impl Into<String>,
        format: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            file_name: file_name.into(),
            format: format.into(),
            category: None,
            title: None,
            byte_len: 0,
            uploaded_at: None,
            status: DocumentStatus::Pending,
            chunk_count: 0,
            error: None,
            processing_attempts: 0,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_uploaded_at(mut self, uploaded_at: impl Into<String>) -> Self {
        self.uploaded_at = Some(uploaded_at.into());
        self
    }

    pub fn mark_processing(&mut self) {
        self.status = DocumentStatus::Processing;
        self.processing_attempts += 1;
        self.error = None;
    }

    pub fn mark_completed(&mut self, chunk_count: usize) {
        self.status = DocumentStatus::Completed;
        self.chunk_count = chunk_count;
        self.error = None;
    }

    pub fn mark_failed(&mut self, message: impl Into<String>) {
        self.status = DocumentStatus::Failed;
        self.chunk_count = 0;
        self.error = Some(message.into());
    }

    /// A failed document may be processed again until it has used up
    /// [`MAX_ATTEMPTS`].
    pub fn can_retry(&self) -> bool {
        self.status == DocumentStatus::Failed && self.processing_attempts < MAX_ATTEMPTS
    }

    /// Title used in chunk metadata, falling back to the file name.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.file_name)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Document store error: {0}")]
    Backend(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Storage collaborator holding document records and their raw bytes.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, document_id: &str) -> Result<Document>;

    async fn fetch_bytes(&self, document_id: &str) -> Result<Vec<u8>>;

    /// Persists status, chunk count and error detail.
    async fn save(&self, document: &Document) -> Result<()>;
}

/// In-process document store for tests and the CLI.
#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<HashMap<String, (Document, Vec<u8>)>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a document with its bytes, setting `byte_len`.
    pub async fn insert(&self, mut document: Document, bytes: Vec<u8>) {
        document.byte_len = bytes.len();
        self.documents
            .write()
            .await
            .insert(document.id.clone(), (document, bytes));
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, document_id: &str) -> Result<Document> {
        self.documents
            .read()
            .await
            .get(document_id)
            .map(|(doc, _)| doc.clone())
            .ok_or_else(|| StoreError::NotFound(document_id.to_string()))
    }

    async fn fetch_bytes(&self, document_id: &str) -> Result<Vec<u8>> {
        self.documents
            .read()
            .await
            .get(document_id)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| StoreError::NotFound(document_id.to_string()))
    }

    async fn save(&self, document: &Document) -> Result<()> {
        let mut documents = self.documents.write().await;
        let entry = documents
            .get_mut(&document.id)
            .ok_or_else(|| StoreError::NotFound(document.id.clone()))?;
        entry.0 = document.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        let mut doc = Document::new("d1", "u1", "labs.pdf", "pdf");
        assert_eq!(doc.status, DocumentStatus::Pending);

        doc.mark_processing();
        assert_eq!(doc.status, DocumentStatus::Processing);
        assert_eq!(doc.processing_attempts, 1);

        doc.mark_failed("the PDF could not be opened");
        assert_eq!(doc.status, DocumentStatus::Failed);
        assert!(doc.can_retry());

        doc.mark_processing();
        assert!(doc.error.is_none());
        doc.mark_completed(7);
        assert_eq!(doc.chunk_count, 7);
        assert!(!doc.can_retry());
    }

    #[test]
    fn test_retry_limit() {
        let mut doc = Document::new("d1", "u1", "labs.pdf", "pdf");
        for _ in 0..MAX_ATTEMPTS {
            doc.mark_processing();
            doc.mark_failed("boom");
        }
        assert!(!doc.can_retry());
    }

    #[test]
    fn test_display_title_falls_back_to_file_name() {
        let doc = Document::new("d1", "u1", "labs.pdf", "pdf");
        assert_eq!(doc.display_title(), "labs.pdf");
        assert_eq!(doc.with_title("Annual labs").display_title(), "Annual labs");
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&DocumentStatus::Processing).unwrap(), "\"processing\"");
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryDocumentStore::new();
        store
            .insert(Document::new("d1", "u1", "notes.txt", "txt"), b"hello".to_vec())
            .await;

        let mut doc = store.get("d1").await.unwrap();
        assert_eq!(doc.byte_len, 5);
        assert_eq!(store.fetch_bytes("d1").await.unwrap(), b"hello");

        doc.mark_completed(1);
        store.save(&doc).await.unwrap();
        assert_eq!(store.get("d1").await.unwrap().status, DocumentStatus::Completed);

        assert!(matches!(store.get("missing").await, Err(StoreError::NotFound(_))));
        let ghost = Document::new("ghost", "u1", "x.txt", "txt");
        assert!(store.save(&ghost).await.is_err());
    }
}
