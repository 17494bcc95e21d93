//! Request, job and result types shared by the extraction pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Validated metadata for one extraction call.
///
/// Built by the validator, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRequest {
    pub id: Uuid,
    /// CNPJ, digits only.
    pub organization_tax_id: String,
    pub requester_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<i64>,
    pub source: RequestSource,
    pub page_count: u32,
}

/// What the caller told us about the document: either its classification
/// in the caller's system or which pipeline produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestSource {
    DocumentType(i64),
    ProviderTag(String),
}

impl ExtractionRequest {
    pub fn new(
        organization_tax_id: String,
        requester_id: i64,
        plan_id: Option<i64>,
        source: RequestSource,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_tax_id,
            requester_id,
            plan_id,
            source,
            page_count: 0,
        }
    }

    /// Set the page count once the document has been inspected.
    pub fn with_page_count(mut self, page_count: u32) -> Self {
        self.page_count = page_count;
        self
    }

    pub fn document_type_id(&self) -> Option<i64> {
        match self.source {
            RequestSource::DocumentType(id) => Some(id),
            RequestSource::ProviderTag(_) => None,
        }
    }

    pub fn provider_tag(&self) -> Option<&str> {
        match &self.source {
            RequestSource::ProviderTag(tag) => Some(tag),
            RequestSource::DocumentType(_) => None,
        }
    }
}

/// An uploaded document on its way to a provider.
#[derive(Debug, Clone)]
pub struct UploadedDocument {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl UploadedDocument {
    /// SHA-256 of the raw bytes, hex encoded.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.data);
        format!("{:x}", hasher.finalize())
    }

    pub fn is_pdf(&self) -> bool {
        self.content_type.as_deref() == Some("application/pdf")
            || self.filename.to_lowercase().ends_with(".pdf")
            || self.data.starts_with(b"%PDF-")
    }
}

/// Provider-side job identifier, tied to the request that started it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: String,
    pub extraction_id: Uuid,
}

/// One observation of a provider job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Succeeded,
    Failed { message: Option<String> },
}

/// Structured output of a finished job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionResult {
    pub extraction_id: Uuid,
    pub payload: serde_json::Value,
}

impl ExtractionResult {
    pub fn serialized_payload(&self) -> String {
        self.payload.to_string()
    }
}

/// Row written by the result recorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub id: Uuid,
    pub organization_tax_id: String,
    pub requester_id: i64,
    pub plan_id: Option<i64>,
    pub document_type_id: Option<i64>,
    pub provider_tag: Option<String>,
    pub page_count: u32,
    pub provider: String,
    pub content_hash: String,
    pub result: String,
    pub recorded_at: DateTime<Utc>,
}

impl ExtractionRecord {
    pub fn new(
        request: &ExtractionRequest,
        result: &ExtractionResult,
        provider: &str,
        content_hash: String,
    ) -> Self {
        Self {
            id: result.extraction_id,
            organization_tax_id: request.organization_tax_id.clone(),
            requester_id: request.requester_id,
            plan_id: request.plan_id,
            document_type_id: request.document_type_id(),
            provider_tag: request.provider_tag().map(str::to_string),
            page_count: request.page_count,
            provider: provider.to_string(),
            content_hash,
            result: result.serialized_payload(),
            recorded_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_copies_request_metadata() {
        let request = ExtractionRequest::new(
            "11222333000181".to_string(),
            7,
            Some(3),
            RequestSource::DocumentType(12),
        )
        .with_page_count(4);
        let result = ExtractionResult {
            extraction_id: request.id,
            payload: serde_json::json!({"text": "hello"}),
        };

        let record = ExtractionRecord::new(&request, &result, "azure", "abc".to_string());
        assert_eq!(record.id, request.id);
        assert_eq!(record.requester_id, 7);
        assert_eq!(record.plan_id, Some(3));
        assert_eq!(record.document_type_id, Some(12));
        assert_eq!(record.provider_tag, None);
        assert_eq!(record.page_count, 4);
        assert_eq!(record.result, r#"{"text":"hello"}"#);
    }

    #[test]
    fn test_pdf_detection() {
        let doc = UploadedDocument {
            filename: "scan.bin".to_string(),
            content_type: None,
            data: b"%PDF-1.7\n".to_vec(),
        };
        assert!(doc.is_pdf());

        let doc = UploadedDocument {
            filename: "scan.PNG".to_string(),
            content_type: Some("image/png".to_string()),
            data: vec![0x89, b'P', b'N', b'G'],
        };
        assert!(!doc.is_pdf());
    }
}
