use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::pin::Pin;
use tokio::io::AsyncRead;

/// The two conversions the service offers. Each one carries its own
/// upload policy and download name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionKind {
    DocxToPdf,
    PdfToJpg,
}

impl ConversionKind {
    pub fn allowed_content_types(&self) -> &'static [&'static str] {
        match self {
            ConversionKind::DocxToPdf => &[
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                "application/msword",
            ],
            ConversionKind::PdfToJpg => &["application/pdf"],
        }
    }

    /// Lowercase extensions without the leading dot
    pub fn allowed_extensions(&self) -> &'static [&'static str] {
        match self {
            ConversionKind::DocxToPdf => &["docx", "doc"],
            ConversionKind::PdfToJpg => &["pdf"],
        }
    }

    /// Filename offered to the client for the archive
    pub fn download_name(&self) -> &'static str {
        match self {
            ConversionKind::DocxToPdf => "converted_docs.zip",
            ConversionKind::PdfToJpg => "converted_images.zip",
        }
    }

    /// Plural noun used in batch-level messages ("No PDFs were ...")
    pub fn source_label(&self) -> &'static str {
        match self {
            ConversionKind::DocxToPdf => "DOCXs",
            ConversionKind::PdfToJpg => "PDFs",
        }
    }
}

impl fmt::Display for ConversionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionKind::DocxToPdf => write!(f, "docx-to-pdf"),
            ConversionKind::PdfToJpg => write!(f, "pdf-to-jpg"),
        }
    }
}

/// One uploaded file as handed to the pipeline. The reader is drained once
/// by the staging store.
pub struct UploadDescriptor {
    pub filename: String,
    pub content_type: Option<String>,
    /// Byte size when known up front
    pub size: Option<u64>,
    pub reader: Pin<Box<dyn AsyncRead + Send>>,
}

impl UploadDescriptor {
    pub fn new(
        filename: impl Into<String>,
        content_type: Option<String>,
        size: Option<u64>,
        reader: Pin<Box<dyn AsyncRead + Send>>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type,
            size,
            reader,
        }
    }

    /// Build a descriptor over an in-memory body; the size is known.
    pub fn from_bytes(
        filename: impl Into<String>,
        content_type: Option<String>,
        data: Bytes,
    ) -> Self {
        let size = data.len() as u64;
        Self::new(
            filename,
            content_type,
            Some(size),
            Box::pin(std::io::Cursor::new(data)),
        )
    }
}

impl fmt::Debug for UploadDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadDescriptor")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// An upload persisted to the request's input directory.
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub path: PathBuf,
    /// Name as sent by the client, used in error messages
    pub original_name: String,
    /// Folder name its outputs are grouped under, unique within the request
    pub stem: String,
}

/// Per-input directory holding the converted artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFolder {
    pub path: PathBuf,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStage {
    Save,
    Convert,
}

/// A failure confined to one file of the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileError {
    pub filename: String,
    pub stage: FileStage,
    pub message: String,
}

impl FileError {
    pub fn save(filename: impl Into<String>, message: impl fmt::Display) -> Self {
        Self {
            filename: filename.into(),
            stage: FileStage::Save,
            message: message.to_string(),
        }
    }

    pub fn convert(filename: impl Into<String>, message: impl fmt::Display) -> Self {
        Self {
            filename: filename.into(),
            stage: FileStage::Convert,
            message: message.to_string(),
        }
    }
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.stage {
            FileStage::Save => "save",
            FileStage::Convert => "convert",
        };
        write!(f, "Failed to {} {}: {}", verb, self.filename, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_error_display_names_the_file() {
        let err = FileError::convert("bad.docx", "source file could not be loaded");
        assert_eq!(
            err.to_string(),
            "Failed to convert bad.docx: source file could not be loaded"
        );

        let err = FileError::save("a.pdf", "disk full");
        assert_eq!(err.to_string(), "Failed to save a.pdf: disk full");
    }

    #[test]
    fn test_kind_policies() {
        assert!(ConversionKind::DocxToPdf.allowed_extensions().contains(&"doc"));
        assert_eq!(ConversionKind::PdfToJpg.allowed_content_types(), &["application/pdf"]);
        assert_eq!(ConversionKind::PdfToJpg.download_name(), "converted_images.zip");
        assert_eq!(ConversionKind::DocxToPdf.to_string(), "docx-to-pdf");
    }

    #[test]
    fn test_from_bytes_reports_size() {
        let upload = UploadDescriptor::from_bytes("a.pdf", None, Bytes::from_static(b"%PDF-1.4"));
        assert_eq!(upload.size, Some(8));
    }
}
