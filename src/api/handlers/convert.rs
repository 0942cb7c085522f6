use crate::AppState;
use crate::api::error::AppError;
use crate::models::{FileError, UploadDescriptor};
use crate::services::cleanup::CleanupGuard;
use crate::services::pipeline::ConversionPipeline;
use crate::utils::validation::ValidationError;
use axum::{
    body::Body,
    extract::{Multipart, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::BytesMut;
use futures::Stream;
use serde::Serialize;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use utoipa::ToSchema;

pub const CONVERSION_ERRORS_HEADER: &str = "x-conversion-errors";

/// Longest single message carried in `X-Conversion-Errors`
const MAX_HEADER_MESSAGE_CHARS: usize = 300;

/// Multipart body accepted by the conversion endpoints
#[derive(Serialize, ToSchema)]
pub struct ConvertUpload {
    /// One or more binary file parts, all under the field name `files`
    pub files: Vec<String>,
}

/// Archive body that owns the request's cleanup guard. The working files go
/// away once the body is dropped, i.e. after the last chunk was sent or the
/// client disconnected.
struct GuardedStream<S> {
    inner: S,
    _cleanup: CleanupGuard,
}

impl<S> Stream for GuardedStream<S>
where
    S: Stream + Unpin,
{
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> AppError {
    let err_msg = e.to_string();
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE || err_msg.contains("length limit exceeded") {
        AppError::PayloadTooLarge("Request body exceeds the maximum allowed limit".to_string())
    } else {
        AppError::BadRequest(err_msg)
    }
}

/// Drain every file field (`files`, or `file`) into an upload descriptor.
/// Text fields are ignored. A field stops being read as soon as it grows past
/// `max_file_size`, so an oversized part is never held in memory whole.
async fn read_uploads(
    mut multipart: Multipart,
    max_file_size: usize,
) -> Result<Vec<UploadDescriptor>, AppError> {
    let mut uploads = Vec::new();

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default();
        if name != "files" && name != "file" {
            continue;
        }
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content_type = field.content_type().map(str::to_string);

        let mut data = BytesMut::new();
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            if data.len() + chunk.len() > max_file_size {
                let err = ValidationError::FileTooLarge {
                    filename,
                    max_mb: (max_file_size / (1024 * 1024)) as u64,
                };
                return Err(AppError::BadRequest(err.to_string()));
            }
            data.extend_from_slice(&chunk);
        }

        uploads.push(UploadDescriptor::from_bytes(filename, content_type, data.freeze()));
    }

    if uploads.is_empty() {
        return Err(AppError::BadRequest("No files provided".to_string()));
    }
    Ok(uploads)
}

/// Header-safe rendition of the per-file failures
pub fn conversion_errors_header(errors: &[FileError]) -> String {
    errors
        .iter()
        .map(|e| {
            e.to_string()
                .chars()
                .map(|c| if c.is_control() { ' ' } else { c })
                .take(MAX_HEADER_MESSAGE_CHARS)
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("; ")
}

async fn convert_batch(
    state: &AppState,
    pipeline: &ConversionPipeline,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let uploads = read_uploads(multipart, state.config.max_file_size).await?;
    let kind = pipeline.kind();
    tracing::info!("[{}] Received {} file(s)", kind, uploads.len());

    let outcome = pipeline.run(uploads, &state.config.work_dir).await?;

    let file = File::open(&outcome.archive_path).await.map_err(|e| {
        AppError::Internal(format!(
            "failed to open archive {}: {}",
            outcome.archive_path.display(),
            e
        ))
    })?;
    let length = file
        .metadata()
        .await
        .map_err(|e| AppError::Internal(format!("failed to stat archive: {}", e)))?
        .len();

    let body = Body::from_stream(GuardedStream {
        inner: ReaderStream::new(file),
        _cleanup: outcome.cleanup,
    });

    let mut response = (
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_LENGTH, length.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", kind.download_name()),
            ),
        ],
        body,
    )
        .into_response();

    if !outcome.errors.is_empty() {
        let summary = conversion_errors_header(&outcome.errors);
        match HeaderValue::from_bytes(summary.as_bytes()) {
            Ok(value) => {
                response.headers_mut().insert(CONVERSION_ERRORS_HEADER, value);
            }
            Err(e) => tracing::warn!("[{}] Dropping unencodable error header: {}", kind, e),
        }
    }

    Ok(response)
}

#[utoipa::path(
    post,
    path = "/docx-to-pdf/",
    request_body(content = ConvertUpload, content_type = "multipart/form-data", description = "DOCX/DOC files"),
    responses(
        (status = 200, description = "ZIP with one folder of PDFs per document"),
        (status = 400, description = "Too many files, wrong type or oversized file"),
        (status = 500, description = "No document could be converted")
    ),
    tag = "convert"
)]
pub async fn docx_to_pdf(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, AppError> {
    convert_batch(&state, &state.docx_pipeline, multipart).await
}

#[utoipa::path(
    post,
    path = "/pdf-to-jpg/",
    request_body(content = ConvertUpload, content_type = "multipart/form-data", description = "PDF files"),
    responses(
        (status = 200, description = "ZIP with one folder of page images per PDF"),
        (status = 400, description = "Too many files, wrong type or oversized file"),
        (status = 500, description = "No PDF could be converted")
    ),
    tag = "convert"
)]
pub async fn pdf_to_jpg(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, AppError> {
    convert_batch(&state, &state.pdf_pipeline, multipart).await
}
