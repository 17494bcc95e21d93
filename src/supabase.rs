//! Supabase (PostgREST) store for extraction records.

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use tracing::{debug, info};

use crate::config::SupabaseSettings;
use crate::schema::ExtractionRecord;
use crate::store::ExtractionStore;

/// Writes one row per extraction into a PostgREST table.
#[derive(Clone)]
pub struct SupabaseStore {
    client: Client,
    base_url: String,
    service_role_key: String,
    table: String,
}

impl SupabaseStore {
    pub fn new(client: Client, settings: &SupabaseSettings) -> Self {
        Self {
            client,
            base_url: settings.url.clone(),
            service_role_key: settings.service_role_key.clone(),
            table: settings.table.clone(),
        }
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }
}

#[async_trait::async_trait]
impl ExtractionStore for SupabaseStore {
    fn name(&self) -> &str {
        "supabase"
    }

    async fn record(&self, record: &ExtractionRecord) -> Result<()> {
        debug!("Inserting extraction record: {}", record.id);

        let resp = self
            .client
            .post(self.table_url())
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
            .header("Content-Type", "application/json")
            .header("Prefer", "return=minimal")
            .json(record)
            .send()
            .await
            .context("Failed to send extraction record to Supabase")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Failed to insert extraction {}: {} - {}",
                record.id,
                status,
                text
            ));
        }

        info!("Recorded extraction {} in {}", record.id, self.table);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ExtractionRequest, ExtractionResult, RequestSource};
    use axum::{
        extract::State,
        http::{HeaderMap, StatusCode},
        routing::post,
        Json, Router,
    };
    use std::sync::{Arc, Mutex};

    type Rows = Arc<Mutex<Vec<serde_json::Value>>>;

    async fn insert(
        State(rows): State<Rows>,
        headers: HeaderMap,
        Json(row): Json<serde_json::Value>,
    ) -> StatusCode {
        if headers.get("apikey").and_then(|h| h.to_str().ok()) != Some("service-key") {
            return StatusCode::UNAUTHORIZED;
        }
        if row["requester_id"] == 500 {
            return StatusCode::CONFLICT;
        }
        rows.lock().unwrap().push(row);
        StatusCode::CREATED
    }

    async fn spawn_postgrest() -> (String, Rows) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let rows: Rows = Arc::default();
        let app = Router::new()
            .route("/rest/v1/ocr_extractions", post(insert))
            .with_state(rows.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (base, rows)
    }

    fn record(requester_id: i64) -> ExtractionRecord {
        let request = ExtractionRequest::new(
            "11222333000181".to_string(),
            requester_id,
            Some(9),
            RequestSource::DocumentType(2),
        )
        .with_page_count(2);
        let result = ExtractionResult {
            extraction_id: request.id,
            payload: serde_json::json!({ "content": "ok" }),
        };
        ExtractionRecord::new(&request, &result, "azure_document_intelligence", "h".to_string())
    }

    fn store(base: &str) -> SupabaseStore {
        SupabaseStore::new(
            Client::new(),
            &SupabaseSettings {
                url: base.to_string(),
                service_role_key: "service-key".to_string(),
                table: "ocr_extractions".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_inserts_row() {
        let (base, rows) = spawn_postgrest().await;
        let record = record(7);
        store(&base).record(&record).await.unwrap();

        let rows = rows.lock().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], record.id.to_string());
        assert_eq!(rows[0]["organization_tax_id"], "11222333000181");
        assert_eq!(rows[0]["page_count"], 2);
        assert_eq!(rows[0]["result"], r#"{"content":"ok"}"#);
    }

    #[tokio::test]
    async fn test_rejected_insert_is_an_error() {
        let (base, rows) = spawn_postgrest().await;
        assert!(store(&base).record(&record(500)).await.is_err());
        assert!(rows.lock().unwrap().is_empty());
    }
}
