use super::{ConverterError, DocumentConverter, probe, run_command};
use crate::models::ConversionKind;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// DOCX/DOC -> PDF through a headless LibreOffice (`soffice`).
///
/// Every run gets a throw-away user profile: two `soffice` processes sharing
/// one profile block on its lock, and conversions may run side by side.
pub struct LibreOfficeConverter {
    program: String,
}

impl LibreOfficeConverter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn profile_arg(profile_dir: &Path) -> String {
        format!("-env:UserInstallation=file://{}", profile_dir.display())
    }

    /// `soffice` names its PDF after the input stem
    fn produced_pdf(input: &Path, output_dir: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        output_dir.join(format!("{}.pdf", stem))
    }

    /// The artifact is named after its folder so the archive reads
    /// `report/report.pdf` rather than carrying the staging prefix.
    fn artifact_pdf(output_dir: &Path) -> Option<PathBuf> {
        let folder_name = output_dir.file_name()?.to_string_lossy().into_owned();
        Some(output_dir.join(format!("{}.pdf", folder_name)))
    }
}

#[async_trait::async_trait]
impl DocumentConverter for LibreOfficeConverter {
    fn kind(&self) -> ConversionKind {
        ConversionKind::DocxToPdf
    }

    async fn convert(&self, input: &Path, output_dir: &Path) -> Result<(), ConverterError> {
        let profile = tempfile::Builder::new().prefix("lo-profile-").tempdir()?;

        let mut command = Command::new(&self.program);
        command
            .arg(Self::profile_arg(profile.path()))
            .arg("--headless")
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(output_dir)
            .arg(input);

        run_command(command, &self.program).await?;

        // soffice exits 0 even when it could not load the document
        let produced = Self::produced_pdf(input, output_dir);
        if !tokio::fs::try_exists(&produced).await.unwrap_or(false) {
            return Err(ConverterError::NoOutput(
                "LibreOffice conversion failed: no PDF was produced".to_string(),
            ));
        }

        if let Some(target) = Self::artifact_pdf(output_dir) {
            if target != produced {
                tokio::fs::rename(&produced, &target).await?;
            }
        }

        Ok(())
    }

    async fn health_check(&self) -> bool {
        probe(&self.program, "--version").await
    }
}
