use super::{ConverterError, DocumentConverter, probe, run_command};
use crate::models::ConversionKind;
use std::path::Path;
use tokio::process::Command;

/// Prefix handed to the renderer; it appends `-<page>.jpg`
const RENDER_PREFIX: &str = "page";

/// PDF -> one JPEG per page through poppler's `pdftocairo`.
///
/// A render failure on any page fails the whole input; pages are not
/// salvaged individually.
pub struct PdfPageRenderer {
    program: String,
    dpi: u32,
}

impl PdfPageRenderer {
    pub fn new(program: impl Into<String>, dpi: u32) -> Self {
        Self {
            program: program.into(),
            dpi,
        }
    }
}

/// Page number of a renderer output such as `page-7.jpg` or `page-007.jpg`
fn rendered_page_number(file_name: &str) -> Option<u32> {
    file_name
        .strip_prefix(RENDER_PREFIX)?
        .strip_prefix('-')?
        .strip_suffix(".jpg")?
        .parse()
        .ok()
}

/// Final 1-based artifact name
pub fn page_file_name(page: u32) -> String {
    format!("page_{}.jpg", page)
}

/// Rename the renderer's zero-padded outputs to `page_<n>.jpg`.
/// Returns the number of pages found.
async fn normalize_page_names(output_dir: &Path) -> Result<usize, ConverterError> {
    let mut pages = Vec::new();
    let mut entries = tokio::fs::read_dir(output_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if let Some(page) = name.to_str().and_then(rendered_page_number) {
            pages.push((page, entry.path()));
        }
    }

    pages.sort_by_key(|(page, _)| *page);
    for (page, path) in &pages {
        tokio::fs::rename(path, output_dir.join(page_file_name(*page))).await?;
    }
    Ok(pages.len())
}

#[async_trait::async_trait]
impl DocumentConverter for PdfPageRenderer {
    fn kind(&self) -> ConversionKind {
        ConversionKind::PdfToJpg
    }

    async fn convert(&self, input: &Path, output_dir: &Path) -> Result<(), ConverterError> {
        let mut command = Command::new(&self.program);
        command
            .arg("-jpeg")
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg(input)
            .arg(output_dir.join(RENDER_PREFIX));

        run_command(command, &self.program).await?;

        let pages = normalize_page_names(output_dir).await?;
        if pages == 0 {
            return Err(ConverterError::NoOutput(
                "no pages were rendered".to_string(),
            ));
        }

        tracing::debug!("Rendered {} page(s) from {}", pages, input.display());
        Ok(())
    }

    async fn health_check(&self) -> bool {
        probe(&self.program, "-v").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rendered_page_number() {
        assert_eq!(rendered_page_number("page-1.jpg"), Some(1));
        assert_eq!(rendered_page_number("page-012.jpg"), Some(12));
        assert_eq!(rendered_page_number("page_1.jpg"), None);
        assert_eq!(rendered_page_number("page-1.png"), None);
        assert_eq!(rendered_page_number("cover-1.jpg"), None);
    }

    #[tokio::test]
    async fn test_normalize_page_names() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["page-01.jpg", "page-02.jpg", "page-10.jpg", "notes.txt"] {
            std::fs::write(dir.path().join(name), name).unwrap();
        }

        let pages = normalize_page_names(dir.path()).await.unwrap();
        assert_eq!(pages, 3);

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec!["notes.txt", "page_1.jpg", "page_10.jpg", "page_2.jpg"]
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("page_10.jpg")).unwrap(),
            "page-10.jpg"
        );
    }

    #[tokio::test]
    async fn test_missing_renderer_fails() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.pdf");
        std::fs::write(&input, b"%PDF-1.4").unwrap();

        let renderer = PdfPageRenderer::new("no-such-pdftocairo", 150);
        let err = renderer.convert(&input, dir.path()).await.unwrap_err();
        assert!(matches!(err, ConverterError::Spawn { .. }));
    }
}
