use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Multipart framing overhead allowed on top of the per-file payload cap.
const MULTIPART_OVERHEAD: usize = 10 * 1024 * 1024;

/// Runtime configuration for the conversion endpoints
#[derive(Debug, Clone)]
pub struct ConversionConfig {
    /// Maximum number of files per request (default: 50)
    pub max_files: usize,

    /// Maximum size of a single file in bytes (default: 20 MB)
    pub max_file_size: usize,

    /// Root under which every request gets its own working directory
    pub work_dir: PathBuf,

    /// LibreOffice executable used for DOCX/DOC -> PDF (default: "soffice")
    pub soffice_path: String,

    /// Poppler renderer used for PDF -> JPG (default: "pdftocairo")
    pub pdf_renderer_path: String,

    /// Render resolution for PDF pages (default: 200)
    pub jpeg_dpi: u32,

    /// Upper bound for a single external conversion (default: 120s)
    pub conversion_timeout_secs: u64,

    /// Files converted in parallel within one request (default: 2)
    pub max_concurrent_conversions: usize,

    /// Allowed CORS Origins (comma separated)
    pub allowed_origins: Vec<String>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            max_files: 50,
            max_file_size: 20 * 1024 * 1024, // 20 MB
            work_dir: PathBuf::from("temp_processing"),
            soffice_path: "soffice".to_string(),
            pdf_renderer_path: "pdftocairo".to_string(),
            jpeg_dpi: 200,
            conversion_timeout_secs: 120,
            max_concurrent_conversions: 2,
            allowed_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

impl ConversionConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            max_files: env::var("MAX_FILES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_files),

            max_file_size: env::var("MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_file_size),

            work_dir: env::var("WORK_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(default.work_dir),

            soffice_path: env::var("SOFFICE_PATH").unwrap_or(default.soffice_path),

            pdf_renderer_path: env::var("PDF_RENDERER_PATH")
                .unwrap_or(default.pdf_renderer_path),

            jpeg_dpi: env::var("JPEG_DPI")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|dpi| *dpi > 0)
                .unwrap_or(default.jpeg_dpi),

            conversion_timeout_secs: env::var("CONVERSION_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(default.conversion_timeout_secs),

            max_concurrent_conversions: env::var("MAX_CONCURRENT_CONVERSIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(default.max_concurrent_conversions),

            allowed_origins: env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(default.allowed_origins),
        }
    }

    pub fn conversion_timeout(&self) -> Duration {
        Duration::from_secs(self.conversion_timeout_secs)
    }

    /// Request body cap for a full batch, including multipart framing
    pub fn body_limit(&self) -> usize {
        self.max_files
            .saturating_mul(self.max_file_size)
            .saturating_add(MULTIPART_OVERHEAD)
    }
}
