//! Document store operations over the `documents` table.

use crate::document::{Document, DocumentStore, Fields};
use crate::error::{Error, Result};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use serde_json::Value;
use uuid::Uuid;

fn parse_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).map_err(|_| Error::NotFound(format!("document id {id:?}")))
}

fn count_op(collection: &str, operation: &'static str) {
    metrics::document_operations().add(
        1,
        &[
            KeyValue::new("collection", collection.to_string()),
            KeyValue::new("operation", operation),
        ],
    );
}

impl DocumentStore for super::Db {
    async fn query_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
        limit: usize,
    ) -> Result<Vec<Document>> {
        let rows: Vec<(Uuid, Value)> = sqlx::query_as(
            "SELECT id, fields FROM documents
             WHERE collection = $1 AND fields -> $2 = $3
             ORDER BY created_at
             LIMIT $4",
        )
        .bind(collection)
        .bind(field)
        .bind(value)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        count_op(collection, "query");

        rows.into_iter()
            .map(|(id, fields)| match fields {
                Value::Object(fields) => Ok(Document {
                    id: id.to_string(),
                    fields,
                }),
                other => Err(Error::Document(format!(
                    "document {id} holds non-object fields: {other}"
                ))),
            })
            .collect()
    }

    async fn update_by_id(&self, collection: &str, id: &str, fields: &Fields) -> Result<()> {
        let rows_affected = sqlx::query(
            "UPDATE documents SET fields = fields || $1, updated_at = now()
             WHERE collection = $2 AND id = $3",
        )
        .bind(Value::Object(fields.clone()))
        .bind(collection)
        .bind(parse_id(id)?)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(Error::NotFound(format!("document {collection}/{id}")));
        }
        count_op(collection, "update");
        Ok(())
    }

    async fn insert(&self, collection: &str, fields: &Fields) -> Result<String> {
        let row: (Uuid,) = sqlx::query_as(
            "INSERT INTO documents (id, collection, fields) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(collection)
        .bind(Value::Object(fields.clone()))
        .fetch_one(&self.pool)
        .await?;
        count_op(collection, "insert");
        Ok(row.0.to_string())
    }
}
