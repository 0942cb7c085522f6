use crate::config::ConversionConfig;
use crate::models::{ConversionKind, OutputFolder, StagedFile};
use std::path::Path;
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

pub mod libreoffice;
pub mod pdf_render;

pub use libreoffice::LibreOfficeConverter;
pub use pdf_render::PdfPageRenderer;

/// Longest diagnostic kept from a converter's stderr
const MAX_DIAGNOSTIC_LEN: usize = 2000;

#[derive(Error, Debug)]
pub enum ConverterError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} failed ({status}): {diagnostic}")]
    Failed {
        program: String,
        status: String,
        diagnostic: String,
    },

    #[error("conversion timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("{0}")]
    NoOutput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An external tool that turns one staged input into artifacts inside an
/// existing output directory.
#[async_trait::async_trait]
pub trait DocumentConverter: Send + Sync {
    fn kind(&self) -> ConversionKind;

    async fn convert(&self, input: &Path, output_dir: &Path) -> Result<(), ConverterError>;

    /// Check if the underlying tool is installed and runnable
    async fn health_check(&self) -> bool;
}

/// Factory function to create the converter backing a conversion kind
pub fn create_converter(
    kind: ConversionKind,
    config: &ConversionConfig,
) -> Arc<dyn DocumentConverter> {
    match kind {
        ConversionKind::DocxToPdf => {
            Arc::new(LibreOfficeConverter::new(config.soffice_path.clone()))
        }
        ConversionKind::PdfToJpg => Arc::new(PdfPageRenderer::new(
            config.pdf_renderer_path.clone(),
            config.jpeg_dpi,
        )),
    }
}

/// Create the output folder for `staged` under `output_root` and run the
/// converter into it, bounded by `timeout`. The folder exists even when the
/// conversion fails.
pub async fn convert_one(
    converter: &dyn DocumentConverter,
    staged: &StagedFile,
    output_root: &Path,
    timeout: Duration,
) -> Result<OutputFolder, ConverterError> {
    let folder = OutputFolder {
        path: output_root.join(&staged.stem),
        name: staged.stem.clone(),
    };
    tokio::fs::create_dir_all(&folder.path).await?;

    match tokio::time::timeout(timeout, converter.convert(&staged.path, &folder.path)).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(ConverterError::Timeout {
                secs: timeout.as_secs(),
            });
        }
    }

    Ok(folder)
}

fn diagnostic(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let text = if stderr.trim().is_empty() {
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    } else {
        stderr.trim().to_string()
    };

    if text.len() > MAX_DIAGNOSTIC_LEN {
        let mut end = MAX_DIAGNOSTIC_LEN;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text[..end].to_string()
    } else {
        text
    }
}

/// Run a prepared command to completion. The child is killed if the returned
/// future is dropped, which is how timeouts stop a hung converter.
pub(crate) async fn run_command(
    mut command: Command,
    program: &str,
) -> Result<Output, ConverterError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = command
        .output()
        .await
        .map_err(|source| ConverterError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if !output.status.success() {
        let diagnostic = diagnostic(&output);
        tracing::debug!("{} failed: {}", program, diagnostic);
        return Err(ConverterError::Failed {
            program: program.to_string(),
            status: output.status.to_string(),
            diagnostic,
        });
    }

    Ok(output)
}

/// Probe a tool with its version flag
pub(crate) async fn probe(program: &str, version_flag: &str) -> bool {
    let mut command = Command::new(program);
    command.arg(version_flag);
    matches!(
        tokio::time::timeout(Duration::from_secs(10), run_command(command, program)).await,
        Ok(Ok(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CopyConverter;

    #[async_trait::async_trait]
    impl DocumentConverter for CopyConverter {
        fn kind(&self) -> ConversionKind {
            ConversionKind::DocxToPdf
        }

        async fn convert(&self, input: &Path, output_dir: &Path) -> Result<(), ConverterError> {
            tokio::fs::copy(input, output_dir.join("out.pdf")).await?;
            Ok(())
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    struct HangingConverter;

    #[async_trait::async_trait]
    impl DocumentConverter for HangingConverter {
        fn kind(&self) -> ConversionKind {
            ConversionKind::PdfToJpg
        }

        async fn convert(&self, _input: &Path, _output_dir: &Path) -> Result<(), ConverterError> {
            std::future::pending::<()>().await;
            Ok(())
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    fn staged(dir: &Path, stem: &str) -> StagedFile {
        let path = dir.join(format!("deadbeef_{}.docx", stem));
        std::fs::write(&path, b"document").unwrap();
        StagedFile {
            path,
            original_name: format!("{}.docx", stem),
            stem: stem.to_string(),
        }
    }

    #[tokio::test]
    async fn test_convert_one_creates_folder_named_after_stem() {
        let dir = tempfile::tempdir().unwrap();
        let input = staged(dir.path(), "letter");
        let output_root = dir.path().join("output");

        let folder = convert_one(&CopyConverter, &input, &output_root, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(folder.name, "letter");
        assert_eq!(folder.path, output_root.join("letter"));
        assert_eq!(std::fs::read(folder.path.join("out.pdf")).unwrap(), b"document");
    }

    #[tokio::test]
    async fn test_convert_one_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let input = staged(dir.path(), "slow");
        let output_root = dir.path().join("output");

        let err = convert_one(
            &HangingConverter,
            &input,
            &output_root,
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ConverterError::Timeout { .. }));
        // Folder creation precedes the invocation
        assert!(output_root.join("slow").is_dir());
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let command = Command::new("definitely-not-an-installed-converter");
        let err = run_command(command, "definitely-not-an-installed-converter")
            .await
            .unwrap_err();
        assert!(matches!(err, ConverterError::Spawn { .. }));
        assert!(!probe("definitely-not-an-installed-converter", "--version").await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_carries_stderr() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("echo 'source file could not be loaded' >&2; exit 1");
        let err = run_command(command, "sh").await.unwrap_err();
        match err {
            ConverterError::Failed { diagnostic, .. } => {
                assert_eq!(diagnostic, "source file could not be loaded")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_factory_matches_kind() {
        let config = ConversionConfig::default();
        for kind in [ConversionKind::DocxToPdf, ConversionKind::PdfToJpg] {
            assert_eq!(create_converter(kind, &config).kind(), kind);
        }
    }
}
