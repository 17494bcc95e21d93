//! AWS Textract provider.
//!
//! Synchronous analysis sends the bytes inline. Asynchronous jobs need the
//! document in S3, so uploads are staged under [`STAGING_PREFIX`] and deleted
//! once the job is finished.

use anyhow::anyhow;
use aws_config::BehaviorVersion;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_textract::error::{DisplayErrorContext, SdkError};
use aws_sdk_textract::primitives::Blob;
use aws_sdk_textract::types::{
    Block, BlockType, Document, DocumentLocation, FeatureType, RelationshipType, S3Object,
};
use serde::Serialize;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::{DocumentAnalyzer, JobProvider, JobRequest};
use crate::config::TextractSettings;
use crate::error::ProviderError;
use crate::schema::{JobHandle, JobStatus, UploadedDocument};

const STAGING_PREFIX: &str = "ocr-gateway/staging";
const JOB_TAG: &str = "ocr-gateway";
/// Largest page of blocks `GetDocumentAnalysis` hands out.
const MAX_RESULTS: i32 = 1000;

/// Load AWS configuration using the standard credential and region chain.
pub async fn load_aws_config() -> aws_config::SdkConfig {
    aws_config::load_defaults(BehaviorVersion::v2025_01_17()).await
}

pub struct TextractProvider {
    textract: aws_sdk_textract::Client,
    s3: aws_sdk_s3::Client,
    bucket: Option<String>,
}

impl TextractProvider {
    pub async fn new(settings: &TextractSettings) -> Self {
        let config = load_aws_config().await;
        info!(
            "Textract client initialized (region: {:?}, staging bucket: {:?})",
            config.region(),
            settings.s3_bucket
        );
        Self::with_clients(
            aws_sdk_textract::Client::new(&config),
            aws_sdk_s3::Client::new(&config),
            settings.s3_bucket.clone(),
        )
    }

    pub fn with_clients(
        textract: aws_sdk_textract::Client,
        s3: aws_sdk_s3::Client,
        bucket: Option<String>,
    ) -> Self {
        Self {
            textract,
            s3,
            bucket,
        }
    }

    /// Whether asynchronous jobs can be staged.
    pub fn supports_jobs(&self) -> bool {
        self.bucket.is_some()
    }

    /// Best-effort removal of a staged upload.
    async fn delete_staged(&self, bucket: &str, key: &str) {
        match self.s3.delete_object().bucket(bucket).key(key).send().await {
            Ok(_) => debug!("Deleted staged object s3://{}/{}", bucket, key),
            Err(e) => warn!(
                "Failed to delete staged object s3://{}/{}: {}",
                bucket,
                key,
                DisplayErrorContext(&e)
            ),
        }
    }

    fn bucket(&self) -> Result<&str, ProviderError> {
        self.bucket.as_deref().ok_or_else(|| {
            ProviderError::Unavailable("TEXTRACT_S3_BUCKET is not configured".to_string())
        })
    }
}

fn staging_key(extraction_id: Uuid) -> String {
    format!("{}/{}", STAGING_PREFIX, extraction_id)
}

/// Turn an SDK error into a provider error. Service errors on submission
/// mean the provider looked at the document and refused it.
fn sdk_error<E, R>(context: &str, err: SdkError<E, R>, on_submit: bool) -> ProviderError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let detail = format!("{}: {}", context, DisplayErrorContext(&err));
    match err {
        SdkError::ServiceError(_) if on_submit => ProviderError::SubmissionRejected(detail),
        SdkError::ServiceError(_) => ProviderError::Other(anyhow!(detail)),
        _ => ProviderError::Unavailable(detail),
    }
}

// ── Output types ────────────────────────────────────────────────────────────

/// JSON shape returned to callers for Textract results.
#[derive(Debug, Serialize)]
struct TextractDocument {
    pages: u32,
    /// LINE blocks joined with newlines, in reading order.
    text: String,
    blocks: Vec<BlockSummary>,
}

#[derive(Debug, Serialize)]
struct BlockSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    block_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    page: Option<i32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    entity_types: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    children: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    values: Vec<String>,
}

impl From<&Block> for BlockSummary {
    fn from(block: &Block) -> Self {
        let related = |kind: RelationshipType| -> Vec<String> {
            block
                .relationships()
                .iter()
                .filter(|r| r.r#type() == Some(&kind))
                .flat_map(|r| r.ids().iter().cloned())
                .collect()
        };

        Self {
            id: block.id().map(str::to_string),
            block_type: block.block_type().map(|t| t.as_str().to_string()),
            text: block.text().map(str::to_string),
            confidence: block.confidence(),
            page: block.page(),
            entity_types: block
                .entity_types()
                .iter()
                .map(|t| t.as_str().to_string())
                .collect(),
            children: related(RelationshipType::Child),
            values: related(RelationshipType::Value),
        }
    }
}

fn document_json(blocks: &[Block], pages: Option<i32>) -> Result<serde_json::Value, ProviderError> {
    let text = blocks
        .iter()
        .filter(|b| b.block_type() == Some(&BlockType::Line))
        .filter_map(|b| b.text())
        .collect::<Vec<_>>()
        .join("\n");

    let pages = pages
        .map(|p| p.max(0) as u32)
        .unwrap_or_else(|| blocks.iter().filter_map(|b| b.page()).max().unwrap_or(1).max(1) as u32);

    let document = TextractDocument {
        pages,
        text,
        blocks: blocks.iter().map(BlockSummary::from).collect(),
    };
    serde_json::to_value(document)
        .map_err(|e| ProviderError::Other(anyhow!("Failed to serialize Textract result: {}", e)))
}

// ── Provider implementations ────────────────────────────────────────────────

#[async_trait::async_trait]
impl DocumentAnalyzer for TextractProvider {
    fn name(&self) -> &str {
        "aws_textract"
    }

    async fn analyze(
        &self,
        document: &UploadedDocument,
    ) -> Result<serde_json::Value, ProviderError> {
        info!(
            "TextractProvider: analyzing {} ({} bytes)",
            document.filename,
            document.data.len()
        );

        let output = self
            .textract
            .analyze_document()
            .document(Document::builder().bytes(Blob::new(document.data.clone())).build())
            .feature_types(FeatureType::Forms)
            .feature_types(FeatureType::Tables)
            .send()
            .await
            .map_err(|e| sdk_error("Textract AnalyzeDocument", e, true))?;

        trace!("AnalyzeDocument response: {output:#?}");
        let pages = output.document_metadata().and_then(|m| m.pages());
        document_json(output.blocks(), pages)
    }
}

#[async_trait::async_trait]
impl JobProvider for TextractProvider {
    fn name(&self) -> &str {
        "aws_textract_async"
    }

    async fn submit(&self, job: &JobRequest<'_>) -> Result<JobHandle, ProviderError> {
        let bucket = self.bucket()?;
        let key = staging_key(job.extraction_id);

        info!(
            "TextractProvider: staging {} ({} bytes) at s3://{}/{}",
            job.document.filename,
            job.document.data.len(),
            bucket,
            key
        );

        let mut put = self
            .s3
            .put_object()
            .bucket(bucket)
            .key(&key)
            .body(ByteStream::from(job.document.data.clone()));
        if let Some(content_type) = &job.document.content_type {
            put = put.content_type(content_type);
        }
        put.send()
            .await
            .map_err(|e| sdk_error("S3 PutObject", e, false))?;

        let location = DocumentLocation::builder()
            .s3_object(S3Object::builder().bucket(bucket).name(&key).build())
            .build();

        let started = self
            .textract
            .start_document_analysis()
            .document_location(location)
            .feature_types(FeatureType::Forms)
            .feature_types(FeatureType::Tables)
            .client_request_token(job.extraction_id.simple().to_string())
            .job_tag(JOB_TAG)
            .send()
            .await
            .map_err(|e| sdk_error("Textract StartDocumentAnalysis", e, true))
            .and_then(|output| {
                output.job_id().map(str::to_string).ok_or_else(|| {
                    ProviderError::SubmissionRejected("Textract returned no job id".to_string())
                })
            });

        // No job means no release later; the staged copy goes now.
        let job_id = match started {
            Ok(job_id) => job_id,
            Err(e) => {
                self.delete_staged(bucket, &key).await;
                return Err(e);
            }
        };
        info!("TextractProvider: started job {}", job_id);

        Ok(JobHandle {
            job_id,
            extraction_id: job.extraction_id,
        })
    }

    async fn status(&self, handle: &JobHandle) -> Result<JobStatus, ProviderError> {
        use aws_sdk_textract::types::JobStatus as TextractStatus;

        let output = self
            .textract
            .get_document_analysis()
            .job_id(&handle.job_id)
            .max_results(1)
            .send()
            .await
            .map_err(|e| sdk_error("Textract GetDocumentAnalysis", e, false))?;

        let status = match output.job_status() {
            Some(TextractStatus::Succeeded) => JobStatus::Succeeded,
            Some(TextractStatus::Failed) => JobStatus::Failed {
                message: output.status_message().map(str::to_string),
            },
            Some(TextractStatus::PartialSuccess) => JobStatus::Failed {
                message: Some(
                    output
                        .status_message()
                        .unwrap_or("job only partially succeeded")
                        .to_string(),
                ),
            },
            Some(TextractStatus::InProgress) | None => JobStatus::Pending,
            Some(other) => {
                warn!("Unknown Textract job status: {}", other.as_str());
                JobStatus::Pending
            }
        };
        debug!("TextractProvider: job {} is {:?}", handle.job_id, status);
        Ok(status)
    }

    async fn fetch(&self, handle: &JobHandle) -> Result<serde_json::Value, ProviderError> {
        use aws_sdk_textract::types::JobStatus as TextractStatus;

        let mut blocks = Vec::new();
        let mut pages = None;
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .textract
                .get_document_analysis()
                .job_id(&handle.job_id)
                .max_results(MAX_RESULTS)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| sdk_error("Textract GetDocumentAnalysis", e, false))?;

            if output.job_status() != Some(&TextractStatus::Succeeded) {
                return Err(ProviderError::ResultUnavailable(handle.job_id.clone()));
            }

            if pages.is_none() {
                pages = output.document_metadata().and_then(|m| m.pages());
            }
            blocks.extend(output.blocks().iter().cloned());

            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        if blocks.is_empty() {
            return Err(ProviderError::ResultUnavailable(handle.job_id.clone()));
        }

        debug!(
            "TextractProvider: fetched {} blocks for job {}",
            blocks.len(),
            handle.job_id
        );
        document_json(&blocks, pages)
    }

    async fn release(&self, handle: &JobHandle) {
        let Ok(bucket) = self.bucket() else {
            return;
        };
        self.delete_staged(bucket, &staging_key(handle.extraction_id))
            .await;
    }
}
