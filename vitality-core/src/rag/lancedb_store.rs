//! LanceDB vector database storage implementation.
//!
//! Embedded, on-disk storage. Owner, document, category and content type
//! are real columns so filters run inside LanceDB; the remaining metadata
//! is kept as a JSON string.

use super::store::{validate_batch, validate_vector, IndexError, Result, VectorIndex};
use super::types::{keys, MetadataFilter, RetrievalResult, VectorRecord};
use anyhow::Context;
use arrow_array::{
    array::{ArrayRef, FixedSizeListArray, Float32Array, StringArray},
    Array, RecordBatch, RecordBatchIterator,
};
use async_trait::async_trait;
use futures::stream::TryStreamExt;
use lancedb::arrow::arrow_schema::{DataType, Field, Schema};
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, DistanceType, Table};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Metadata keys stored as their own columns and usable in filters.
const FILTER_COLUMNS: [&str; 4] = [
    keys::USER_ID,
    keys::DOCUMENT_ID,
    keys::DOCUMENT_CATEGORY,
    keys::CONTENT_TYPE,
];

/// LanceDB-based vector index for embedded deployment.
pub struct LanceDbIndex {
    path: String,
    table_name: String,
    dimensions: usize,
    table: OnceCell<Table>,
}

impl LanceDbIndex {
    pub fn new(path: String, table_name: String, dimensions: usize) -> Self {
        Self {
            path,
            table_name,
            dimensions,
            table: OnceCell::new(),
        }
    }

    fn create_schema(dimensions: usize) -> Arc<Schema> {
        let mut fields = vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("content", DataType::Utf8, false),
            Field::new("metadata", DataType::Utf8, false),
        ];
        for column in FILTER_COLUMNS {
            fields.push(Field::new(column, DataType::Utf8, true));
        }
        fields.push(Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                dimensions as i32,
            ),
            false,
        ));
        Arc::new(Schema::new(fields))
    }

    async fn table(&self) -> Result<&Table> {
        self.table
            .get_or_try_init(|| async {
                info!(path = %self.path, table = %self.table_name, "Opening LanceDB");
                let conn = connect(&self.path)
                    .execute()
                    .await
                    .context("Failed to connect to LanceDB")?;

                let table_names = conn
                    .table_names()
                    .execute()
                    .await
                    .context("Failed to list LanceDB tables")?;

                let table = if table_names.contains(&self.table_name) {
                    conn.open_table(&self.table_name)
                        .execute()
                        .await
                        .context("Failed to open LanceDB table")?
                } else {
                    conn.create_empty_table(&self.table_name, Self::create_schema(self.dimensions))
                        .execute()
                        .await
                        .context("Failed to create LanceDB table")?
                };
                Ok::<_, IndexError>(table)
            })
            .await
    }

    fn to_batch(&self, records: &[VectorRecord]) -> Result<RecordBatch> {
        let schema = Self::create_schema(self.dimensions);

        let ids = StringArray::from_iter_values(records.iter().map(|r| r.id.as_str()));
        let contents = StringArray::from_iter_values(records.iter().map(|r| r.content.as_str()));
        let metadata = records
            .iter()
            .map(|r| serde_json::to_string(&r.metadata))
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to encode metadata")?;
        let metadata = StringArray::from_iter_values(metadata);

        let mut columns: Vec<ArrayRef> = vec![Arc::new(ids), Arc::new(contents), Arc::new(metadata)];
        for column in FILTER_COLUMNS {
            let values: StringArray = records
                .iter()
                .map(|r| r.metadata.get(column).map(String::as_str))
                .collect();
            columns.push(Arc::new(values));
        }

        let flat: Vec<f32> = records.iter().flat_map(|r| r.values.iter().copied()).collect();
        let vectors = FixedSizeListArray::try_new(
            Arc::new(Field::new("item", DataType::Float32, true)),
            self.dimensions as i32,
            Arc::new(Float32Array::from(flat)),
            None,
        )
        .context("Failed to build vector column")?;
        columns.push(Arc::new(vectors));

        let batch = RecordBatch::try_new(schema, columns).context("Failed to create record batch")?;
        Ok(batch)
    }
}

/// SQL predicate for a metadata filter, or `None` when the filter is empty.
fn filter_expr(filter: &MetadataFilter) -> Result<Option<String>> {
    let mut clauses = Vec::new();
    for (key, values) in filter.conditions() {
        if !FILTER_COLUMNS.contains(&key) {
            return Err(IndexError::Backend(anyhow::anyhow!(
                "LanceDB index cannot filter on '{}'",
                key
            )));
        }
        let quoted: Vec<String> = values
            .iter()
            .map(|v| format!("'{}'", v.replace('\'', "''")))
            .collect();
        clauses.push(match quoted.as_slice() {
            [] => "false".to_string(),
            [value] => format!("{} = {}", key, value),
            _ => format!("{} IN ({})", key, quoted.join(", ")),
        });
    }
    Ok((!clauses.is_empty()).then(|| clauses.join(" AND ")))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    let column = batch
        .column_by_name(name)
        .with_context(|| format!("Missing '{}' column", name))?;
    let array = column
        .as_any()
        .downcast_ref::<StringArray>()
        .with_context(|| format!("Failed to cast '{}' to StringArray", name))?;
    Ok(array)
}

#[async_trait]
impl VectorIndex for LanceDbIndex {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()> {
        validate_batch(&records, self.dimensions)?;
        let batch = self.to_batch(&records)?;
        let table = self.table().await?;

        let schema = batch.schema();
        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);

        let mut merge = table.merge_insert(&["id"]);
        merge.when_matched_update_all(None).when_not_matched_insert_all();
        merge
            .execute(Box::new(reader))
            .await
            .context("Failed to upsert into LanceDB")?;

        debug!(count = records.len(), table = %self.table_name, "Upserted rows");
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<RetrievalResult>> {
        validate_vector("query", vector, self.dimensions)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let predicate = filter_expr(filter)?;
        let table = self.table().await?;

        let mut query = table
            .query()
            .nearest_to(vector)
            .context("Failed to build vector query")?
            .distance_type(DistanceType::Cosine)
            .limit(top_k);
        if let Some(predicate) = predicate {
            query = query.only_if(predicate);
        }

        let batches: Vec<RecordBatch> = query
            .execute()
            .await
            .context("Failed to execute LanceDB query")?
            .try_collect()
            .await
            .context("Failed to collect query results")?;

        let mut results = Vec::new();
        for batch in batches {
            let ids = string_column(&batch, "id")?;
            let contents = string_column(&batch, "content")?;
            let metadata = string_column(&batch, "metadata")?;
            let distances = batch
                .column_by_name("_distance")
                .context("Missing '_distance' column")?
                .as_any()
                .downcast_ref::<Float32Array>()
                .context("Failed to cast '_distance' to Float32Array")?;

            for i in 0..batch.num_rows() {
                let metadata: HashMap<String, String> = if metadata.is_null(i) {
                    HashMap::new()
                } else {
                    serde_json::from_str(metadata.value(i)).context("Corrupt metadata column")?
                };
                let record = VectorRecord {
                    id: ids.value(i).to_string(),
                    values: Vec::new(),
                    content: contents.value(i).to_string(),
                    metadata,
                };
                // cosine distance is 1 - similarity
                results.push(RetrievalResult::from_record(&record, 1.0 - distances.value(i)));
            }
        }

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        results.truncate(top_k);
        Ok(results)
    }

    async fn delete_by_filter(&self, filter: &MetadataFilter) -> Result<()> {
        let predicate = filter_expr(filter)?.ok_or(IndexError::EmptyFilter)?;
        let table = self.table().await?;

        table
            .delete(&predicate)
            .await
            .context("Failed to delete rows")?;
        Ok(())
    }

    async fn count(&self, filter: &MetadataFilter) -> Result<usize> {
        let predicate = filter_expr(filter)?;
        let table = self.table().await?;

        let count = table
            .count_rows(predicate)
            .await
            .context("Failed to count rows")?;
        Ok(count)
    }
}
