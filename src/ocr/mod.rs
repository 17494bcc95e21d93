//! OCR provider abstraction.
//!
//! Two shapes of remote call are supported: a one-shot [`DocumentAnalyzer`]
//! and a job-based [`JobProvider`] that is submitted, polled and fetched.
//! Both the Document Intelligence and Textract backends plug in here.

pub mod azure;
pub mod textract;

use uuid::Uuid;

use crate::error::ProviderError;
use crate::schema::{JobHandle, JobStatus, UploadedDocument};

/// What gets handed to a job provider on submission.
#[derive(Debug, Clone, Copy)]
pub struct JobRequest<'a> {
    pub extraction_id: Uuid,
    pub document: &'a UploadedDocument,
    /// Custom model to run. `None` means the provider's default.
    pub model_id: Option<&'a str>,
}

/// Provider that answers in a single call.
#[async_trait::async_trait]
pub trait DocumentAnalyzer: Send + Sync {
    fn name(&self) -> &str;
    async fn analyze(&self, document: &UploadedDocument)
        -> Result<serde_json::Value, ProviderError>;
}

/// Provider that runs documents as asynchronous jobs.
#[async_trait::async_trait]
pub trait JobProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Start a job. One outbound call (plus any staging the provider needs).
    async fn submit(&self, job: &JobRequest<'_>) -> Result<JobHandle, ProviderError>;

    /// Query the current state of a job.
    async fn status(&self, handle: &JobHandle) -> Result<JobStatus, ProviderError>;

    /// Retrieve the full result of a job that reported success.
    async fn fetch(&self, handle: &JobHandle) -> Result<serde_json::Value, ProviderError>;

    /// Drop anything staged for the job. Called once the job is finished,
    /// whatever the outcome. Errors are logged by the implementation.
    async fn release(&self, _handle: &JobHandle) {}
}
