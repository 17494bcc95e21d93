//! Request validation.
//!
//! Pure functions from raw form fields to validated requests. Checks run in a
//! fixed order and stop at the first failure:
//! secret, CNPJ, user id, file, required fields, numeric ids.

use crate::cnpj::normalize_cnpj;
use crate::error::ValidationError;
use crate::form::RawUpload;
use crate::schema::{ExtractionRequest, RequestSource, UploadedDocument};

/// Provider tag stamped on requests coming through the asynchronous endpoint.
pub const ASYNC_PROVIDER_TAG: &str = "aws-async";

/// A validated request for a custom Document Intelligence model.
#[derive(Debug, Clone)]
pub struct ModelUpload {
    pub request: ExtractionRequest,
    pub document: UploadedDocument,
    pub model_id: String,
}

/// A validated request for the asynchronous Textract endpoint.
#[derive(Debug, Clone)]
pub struct AsyncUpload {
    pub request: ExtractionRequest,
    pub document: UploadedDocument,
}

/// Validate an upload that only needs a file.
pub fn validate_file_only(
    raw: RawUpload,
    max_bytes: usize,
) -> Result<UploadedDocument, ValidationError> {
    check_file(raw.file, max_bytes)
}

/// Validate the `upload` endpoint's fields.
pub fn validate_model_upload(
    raw: RawUpload,
    expected_secret: &str,
    max_bytes: usize,
) -> Result<ModelUpload, ValidationError> {
    check_secret(raw.secret.as_deref(), expected_secret)?;
    let tax_id = check_tax_id(raw.cnpj.as_deref())?;
    let requester_id = check_requester(raw.usuario_id.as_deref())?;
    let document = check_file(raw.file, max_bytes)?;

    let (Some(model_id), Some(convenio_id), Some(tipo_guia_id)) = (
        non_empty(raw.model_id),
        non_empty(raw.convenio_id),
        non_empty(raw.tipo_guia_id),
    ) else {
        return Err(ValidationError::MissingField);
    };

    let (Some(plan_id), Some(document_type_id)) = (parse_int(&convenio_id), parse_int(&tipo_guia_id))
    else {
        return Err(ValidationError::InvalidField);
    };

    Ok(ModelUpload {
        request: ExtractionRequest::new(
            tax_id,
            requester_id,
            Some(plan_id),
            RequestSource::DocumentType(document_type_id),
        ),
        document,
        model_id: model_id.trim().to_string(),
    })
}

/// Validate the `ocr-2-async` endpoint's fields.
pub fn validate_async_upload(
    raw: RawUpload,
    expected_secret: &str,
    max_bytes: usize,
) -> Result<AsyncUpload, ValidationError> {
    check_secret(raw.secret.as_deref(), expected_secret)?;
    let tax_id = check_tax_id(raw.cnpj.as_deref())?;
    let requester_id = check_requester(raw.usuario_id.as_deref())?;
    let document = check_file(raw.file, max_bytes)?;

    Ok(AsyncUpload {
        request: ExtractionRequest::new(
            tax_id,
            requester_id,
            None,
            RequestSource::ProviderTag(ASYNC_PROVIDER_TAG.to_string()),
        ),
        document,
    })
}

fn check_secret(provided: Option<&str>, expected: &str) -> Result<(), ValidationError> {
    match provided {
        Some(provided) if !expected.is_empty() && constant_time_eq(provided, expected) => Ok(()),
        _ => Err(ValidationError::InvalidCredentials),
    }
}

fn check_tax_id(cnpj: Option<&str>) -> Result<String, ValidationError> {
    cnpj.and_then(normalize_cnpj)
        .ok_or(ValidationError::InvalidTaxId)
}

fn check_requester(usuario_id: Option<&str>) -> Result<i64, ValidationError> {
    usuario_id
        .and_then(parse_int)
        .ok_or(ValidationError::InvalidRequester)
}

fn check_file(
    file: Option<UploadedDocument>,
    max_bytes: usize,
) -> Result<UploadedDocument, ValidationError> {
    match file {
        Some(doc) if doc.data.is_empty() => Err(ValidationError::MissingFile),
        Some(doc) if doc.data.len() > max_bytes => {
            Err(ValidationError::FileTooLarge { limit: max_bytes })
        }
        Some(doc) => Ok(doc),
        None => Err(ValidationError::MissingFile),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Integers are 32-bit on the caller's side; surrounding whitespace is allowed.
fn parse_int(value: &str) -> Option<i64> {
    value.trim().parse::<i32>().ok().map(i64::from)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
