//! Azure Document Intelligence provider (REST API).
//!
//! Analysis is a long-running operation on Azure's side: the submit call
//! answers 202 with an `Operation-Location` URL, which is what we use as the
//! job id and poll until it reports `succeeded` or `failed`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{JobProvider, JobRequest};
use crate::config::AzureSettings;
use crate::error::ProviderError;
use crate::schema::{JobHandle, JobStatus};

const API_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

pub struct AzureDocumentProvider {
    client: Client,
    endpoint: String,
    api_key: String,
    default_model: String,
    api_version: String,
}

impl AzureDocumentProvider {
    pub fn new(client: Client, settings: &AzureSettings) -> Self {
        Self {
            client,
            endpoint: settings.endpoint.clone(),
            api_key: settings.api_key.clone(),
            default_model: settings.default_model.clone(),
            api_version: settings.api_version.clone(),
        }
    }

    fn analyze_url(&self, model_id: &str) -> String {
        format!(
            "{}/documentintelligence/documentModels/{}:analyze?api-version={}",
            self.endpoint, model_id, self.api_version
        )
    }

    async fn get_operation(&self, handle: &JobHandle) -> Result<AnalyzeOperation, ProviderError> {
        let resp = self
            .client
            .get(&handle.job_id)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("Document Intelligence poll failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let detail = format!("Document Intelligence poll error ({}): {}", status, text);
            return Err(if status.is_server_error() {
                ProviderError::Unavailable(detail)
            } else {
                ProviderError::Other(anyhow::anyhow!(detail))
            });
        }

        resp.json::<AnalyzeOperation>()
            .await
            .map_err(|e| ProviderError::Other(anyhow::anyhow!("Failed to parse analyze operation: {}", e)))
    }
}

// ── Document Intelligence request/response types ────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeRequest {
    base64_source: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeOperation {
    status: String,
    #[serde(default)]
    error: Option<OperationError>,
    #[serde(default)]
    analyze_result: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl AnalyzeOperation {
    fn job_status(&self) -> JobStatus {
        match self.status.as_str() {
            "succeeded" => JobStatus::Succeeded,
            "failed" | "canceled" => JobStatus::Failed {
                message: self.error.as_ref().and_then(|e| {
                    e.message.clone().or_else(|| e.code.clone())
                }),
            },
            "notStarted" | "running" => JobStatus::Pending,
            other => {
                warn!("Unknown Document Intelligence status: {}", other);
                JobStatus::Pending
            }
        }
    }
}

/// Model ids are short identifiers; anything else would end up in the URL path.
fn is_valid_model_id(model_id: &str) -> bool {
    !model_id.is_empty()
        && model_id.len() <= 64
        && model_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '~' | '-'))
}

// ── Provider implementation ─────────────────────────────────────────────────

#[async_trait::async_trait]
impl JobProvider for AzureDocumentProvider {
    fn name(&self) -> &str {
        "azure_document_intelligence"
    }

    async fn submit(&self, job: &JobRequest<'_>) -> Result<JobHandle, ProviderError> {
        let model_id = job.model_id.unwrap_or(&self.default_model);
        if !is_valid_model_id(model_id) {
            return Err(ProviderError::SubmissionRejected(format!(
                "invalid model id: {:?}",
                model_id
            )));
        }

        info!(
            "AzureDocumentProvider: submitting {} ({} bytes) to model {}",
            job.document.filename,
            job.document.data.len(),
            model_id
        );

        let body = AnalyzeRequest {
            base64_source: BASE64.encode(&job.document.data),
        };

        let resp = self
            .client
            .post(self.analyze_url(model_id))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("Document Intelligence submit failed: {}", e)))?;

        // Read the header before the body consumes the response.
        let operation_location = resp
            .headers()
            .get("operation-location")
            .and_then(|h| h.to_str().ok())
            .map(str::to_string);

        let status = resp.status();
        if status != StatusCode::ACCEPTED && !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let detail = format!("Document Intelligence error ({}): {}", status, text);
            return Err(if status.is_client_error() {
                ProviderError::SubmissionRejected(detail)
            } else {
                ProviderError::Unavailable(detail)
            });
        }

        let job_id = operation_location.ok_or_else(|| {
            ProviderError::SubmissionRejected(
                "Document Intelligence accepted the request without an Operation-Location".to_string(),
            )
        })?;
        debug!("AzureDocumentProvider: operation at {}", job_id);

        Ok(JobHandle {
            job_id,
            extraction_id: job.extraction_id,
        })
    }

    async fn status(&self, handle: &JobHandle) -> Result<JobStatus, ProviderError> {
        let operation = self.get_operation(handle).await?;
        debug!("AzureDocumentProvider: {} is {}", handle.job_id, operation.status);
        Ok(operation.job_status())
    }

    async fn fetch(&self, handle: &JobHandle) -> Result<serde_json::Value, ProviderError> {
        let operation = self.get_operation(handle).await?;
        match (operation.job_status(), operation.analyze_result) {
            (JobStatus::Succeeded, Some(result)) if !result.is_null() => Ok(result),
            _ => Err(ProviderError::ResultUnavailable(handle.job_id.clone())),
        }
    }
}
