use crate::models::OutputFolder;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use zip::CompressionMethod;
use zip::write::{FileOptions, ZipWriter};

/// Fixed archive name inside the request directory
pub const ARCHIVE_NAME: &str = "converted.zip";

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("I/O error while packaging {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Direct child files of a folder, sorted by name
fn folder_files(folder: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(folder).map_err(io_err(folder))? {
        let entry = entry.map_err(io_err(folder))?;
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Bundle every output folder into `destination/converted.zip`, one level
/// deep: `<folder name>/<artifact>`. Blocking; call from a blocking task.
pub fn pack_output_folders(
    folders: &[OutputFolder],
    destination: &Path,
) -> Result<PathBuf, ArchiveError> {
    let archive_path = destination.join(ARCHIVE_NAME);
    let file = File::create(&archive_path).map_err(io_err(&archive_path))?;

    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);

    for folder in folders {
        for path in folder_files(&folder.path)? {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                tracing::warn!("Skipping non UTF-8 artifact name: {}", path.display());
                continue;
            };
            zip.start_file(format!("{}/{}", folder.name, file_name), options)?;
            let mut source = File::open(&path).map_err(io_err(&path))?;
            std::io::copy(&mut source, &mut zip).map_err(io_err(&path))?;
        }
    }

    let mut writer = zip.finish()?;
    writer.flush().map_err(io_err(&archive_path))?;

    tracing::debug!(
        "Packaged {} folder(s) into {}",
        folders.len(),
        archive_path.display()
    );
    Ok(archive_path)
}
