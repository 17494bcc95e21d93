//! Multipart form collection.

use axum::{
    extract::{multipart::MultipartError, Multipart},
    http::StatusCode,
};
use tracing::{debug, warn};

use crate::error::ValidationError;
use crate::schema::UploadedDocument;

/// Raw, unvalidated multipart fields. Unknown fields are ignored.
#[derive(Debug, Default, Clone)]
pub struct RawUpload {
    pub file: Option<UploadedDocument>,
    pub secret: Option<String>,
    pub cnpj: Option<String>,
    pub usuario_id: Option<String>,
    pub convenio_id: Option<String>,
    pub tipo_guia_id: Option<String>,
    pub model_id: Option<String>,
}

impl RawUpload {
    /// Drain a multipart body into a `RawUpload`.
    ///
    /// The whole body is read before any field is validated, so a broken
    /// body is reported as such even when its secret is also wrong. No
    /// provider is called in either case.
    pub async fn read(mut multipart: Multipart, max_bytes: usize) -> Result<Self, ValidationError> {
        let mut raw = RawUpload::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| multipart_error(e, max_bytes))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            if name == "file" {
                let filename = field.file_name().unwrap_or("document").to_string();
                let content_type = field.content_type().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| multipart_error(e, max_bytes))?
                    .to_vec();
                debug!("Received file field: {} ({} bytes)", filename, data.len());
                raw.file = Some(UploadedDocument {
                    filename,
                    content_type,
                    data,
                });
                continue;
            }

            let value = field
                .text()
                .await
                .map_err(|e| multipart_error(e, max_bytes))?;

            match name.as_str() {
                "secret" => raw.secret = Some(value),
                "CNPJ" | "cnpj" => raw.cnpj = Some(value),
                "usuarioId" => raw.usuario_id = Some(value),
                "convenioId" => raw.convenio_id = Some(value),
                "tipoGuiaId" => raw.tipo_guia_id = Some(value),
                "modelId" => raw.model_id = Some(value),
                other => debug!("Ignoring unknown form field: {}", other),
            }
        }

        Ok(raw)
    }
}

/// Bodies cut off by the upload limit are too large, not malformed.
fn multipart_error(err: MultipartError, max_bytes: usize) -> ValidationError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ValidationError::FileTooLarge { limit: max_bytes };
    }
    warn!("Unreadable multipart body: {}", err);
    ValidationError::MalformedRequest
}
