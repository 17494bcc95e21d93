//! The effectful half of a request: submit, wait, fetch, record.

use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::PollPolicy;
use crate::error::{ApiError, ProviderError, ValidationError};
use crate::ocr::{JobProvider, JobRequest};
use crate::pdf;
use crate::poller::{poll_until_terminal, JobOutcome};
use crate::schema::{
    ExtractionRecord, ExtractionRequest, ExtractionResult, JobHandle, UploadedDocument,
};
use crate::store::ExtractionStore;

/// Count pages off the async runtime. Unreadable PDFs are the caller's fault.
pub async fn count_pages(document: &UploadedDocument) -> Result<u32, ValidationError> {
    let document = document.clone();
    let filename = document.filename.clone();
    tokio::task::spawn_blocking(move || pdf::count_pages(&document))
        .await
        .map_err(|e| {
            tracing::error!("Page counting task failed for {}: {}", filename, e);
            ValidationError::UnreadableDocument
        })?
        .map_err(|e| {
            tracing::warn!("Could not count pages: {:#}", e);
            ValidationError::UnreadableDocument
        })
}

/// Run one document through a job provider and return its result.
///
/// The fetcher is only called after the poller observed success. Whatever
/// happens after submission, the provider gets a chance to release staged
/// data, including when the caller stops awaiting this future.
#[instrument(level = "debug", skip_all, fields(provider = provider.name(), extraction_id = %extraction_id))]
pub async fn run_job(
    provider: Arc<dyn JobProvider>,
    extraction_id: Uuid,
    document: &UploadedDocument,
    model_id: Option<&str>,
    policy: PollPolicy,
) -> Result<ExtractionResult, ProviderError> {
    let handle = provider
        .submit(&JobRequest {
            extraction_id,
            document,
            model_id,
        })
        .await?;

    let guard = ReleaseGuard::new(provider.clone(), handle.clone());
    let result = finish_job(provider.as_ref(), &handle, policy).await;
    guard.disarm();
    provider.release(&handle).await;
    result
}

/// Releases a submitted job on a background task if dropped while armed.
struct ReleaseGuard {
    provider: Option<Arc<dyn JobProvider>>,
    handle: JobHandle,
}

impl ReleaseGuard {
    fn new(provider: Arc<dyn JobProvider>, handle: JobHandle) -> Self {
        Self {
            provider: Some(provider),
            handle,
        }
    }

    fn disarm(mut self) {
        self.provider = None;
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        let Some(provider) = self.provider.take() else {
            return;
        };
        let handle = self.handle.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                warn!("Job {} abandoned before completion; releasing", handle.job_id);
                runtime.spawn(async move {
                    provider.release(&handle).await;
                });
            }
            Err(_) => warn!("Job {} abandoned with no runtime to release it", handle.job_id),
        }
    }
}

async fn finish_job(
    provider: &dyn JobProvider,
    handle: &JobHandle,
    policy: PollPolicy,
) -> Result<ExtractionResult, ProviderError> {
    match poll_until_terminal(provider, handle, policy).await? {
        JobOutcome::Succeeded => {
            let payload = provider.fetch(handle).await?;
            Ok(ExtractionResult {
                extraction_id: handle.extraction_id,
                payload,
            })
        }
        JobOutcome::Failed { message } => Err(ProviderError::JobFailed {
            job_id: handle.job_id.clone(),
            message,
        }),
    }
}

/// Run a validated request end to end and record the result.
///
/// A failed write is reported as a persistence error; the extracted data is
/// not returned in that case.
pub async fn extract_and_record(
    provider: Arc<dyn JobProvider>,
    store: &dyn ExtractionStore,
    request: &ExtractionRequest,
    document: &UploadedDocument,
    model_id: Option<&str>,
    policy: PollPolicy,
) -> Result<ExtractionResult, ApiError> {
    let provider_name = provider.name().to_string();
    let result = run_job(provider, request.id, document, model_id, policy).await?;

    let record = ExtractionRecord::new(request, &result, &provider_name, document.content_hash());
    store
        .record(&record)
        .await
        .map_err(|source| ApiError::Persistence {
            extraction_id: request.id,
            source,
        })?;

    info!(
        "Extraction {} recorded in {} ({} pages, requester {})",
        request.id,
        store.name(),
        request.page_count,
        request.requester_id
    );
    Ok(result)
}
