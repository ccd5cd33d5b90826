//! Downloads an evaluation's results archive and locates the results folder in it.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::{Client, StatusCode};
use walkdir::WalkDir;

use crate::errors::FetchError;

pub const ARCHIVE_FILE_NAME: &str = "downloaded_results.zip";
pub const RESULTS_DIR_NAME: &str = "results";
const DOWNLOAD_TIMEOUT_SECS: u64 = 600;

pub struct ArchiveFetcher {
    client: Client,
    eval_ms_url: String,
    work_dir: PathBuf,
}

impl ArchiveFetcher {
    pub fn new(eval_ms_url: &str, work_dir: &Path) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            eval_ms_url: eval_ms_url.trim_end_matches('/').to_string(),
            work_dir: work_dir.to_path_buf(),
        })
    }

    pub fn archive_path(&self) -> PathBuf {
        self.work_dir.join(ARCHIVE_FILE_NAME)
    }

    /// Folder the archive is extracted into, named after the archive.
    pub fn extract_dir(&self) -> PathBuf {
        let archive = self.archive_path();
        let stem = archive
            .file_stem()
            .map(|stem| stem.to_os_string())
            .unwrap_or_default();
        self.work_dir.join(stem)
    }

    /// Guard that removes the downloaded archive and its extraction when dropped.
    pub fn workspace(&self) -> ArchiveWorkspace {
        ArchiveWorkspace {
            archive: self.archive_path(),
            extracted: self.extract_dir(),
        }
    }

    /// Downloads the results archive for `evaluation_id`.
    ///
    /// Returns `Ok(None)` without touching the disk when the service does not
    /// answer 200.
    pub async fn download(&self, evaluation_id: &str) -> Result<Option<PathBuf>, FetchError> {
        let url = format!(
            "{}/evaluations/{}/download-results",
            self.eval_ms_url,
            urlencoding::encode(evaluation_id)
        );
        let response = self
            .client
            .get(&url)
            .header("accept", "application/json")
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            tracing::error!(
                "Failed to download ZIP file. Status code: {}",
                response.status().as_u16()
            );
            return Ok(None);
        }

        let bytes = response.bytes().await?;
        let archive = self.archive_path();
        tokio::fs::write(&archive, &bytes)
            .await
            .map_err(|source| FetchError::Io {
                path: archive.clone(),
                source,
            })?;
        tracing::info!("ZIP file downloaded successfully: {}", archive.display());
        Ok(Some(archive))
    }

    /// Downloads, extracts and returns the `results` folder of an evaluation.
    ///
    /// Every failure is logged and reported as `None`.
    pub async fn fetch(&self, evaluation_id: &str) -> Option<PathBuf> {
        let archive = match self.download(evaluation_id).await {
            Ok(Some(archive)) => archive,
            Ok(None) => return None,
            Err(e) => {
                tracing::error!("An error occurred when attempting to download the results: {}", e);
                return None;
            }
        };

        let work_dir = self.work_dir.clone();
        let extracted = tokio::task::spawn_blocking(move || unzip_file(&archive, &work_dir))
            .await
            .map_err(|e| FetchError::Task(e.to_string()))
            .and_then(|result| result);
        match extracted {
            Ok(folder) => find_results_folder(&folder),
            Err(e) => {
                tracing::error!("Failed to unpack results for {}: {}", evaluation_id, e);
                None
            }
        }
    }
}

/// Extracts `zip_path` into `<extract_to>/<archive stem>` and returns that folder.
pub fn unzip_file(zip_path: &Path, extract_to: &Path) -> Result<PathBuf, FetchError> {
    let stem = zip_path
        .file_stem()
        .map(|stem| stem.to_os_string())
        .unwrap_or_default();
    let folder = extract_to.join(stem);
    fs::create_dir_all(&folder).map_err(|source| FetchError::Io {
        path: folder.clone(),
        source,
    })?;

    let file = File::open(zip_path).map_err(|source| FetchError::Io {
        path: zip_path.to_path_buf(),
        source,
    })?;
    let mut archive = zip::ZipArchive::new(file)?;
    archive.extract(&folder)?;

    tracing::info!("Extracted {} to {}", zip_path.display(), folder.display());
    Ok(folder)
}

/// First directory named `results` under `start`, checking each directory's
/// children before descending further.
pub fn find_results_folder(start: &Path) -> Option<PathBuf> {
    let found = WalkDir::new(start)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.path().join(RESULTS_DIR_NAME))
        .find(|candidate| candidate.is_dir());

    match &found {
        Some(path) => tracing::info!("Found 'results' folder at: {}", path.display()),
        None => tracing::info!("No 'results' folder found."),
    }
    found
}

/// Removes the archive and the extracted folder if they exist.
pub fn clean_up(archive: &Path, extracted: &Path) {
    if archive.exists() {
        match fs::remove_file(archive) {
            Ok(()) => tracing::info!("Deleted ZIP file: {}", archive.display()),
            Err(e) => tracing::warn!("Could not delete {}: {}", archive.display(), e),
        }
    }
    if extracted.exists() {
        match fs::remove_dir_all(extracted) {
            Ok(()) => tracing::info!("Deleted extracted directory: {}", extracted.display()),
            Err(e) => tracing::warn!("Could not delete {}: {}", extracted.display(), e),
        }
    }
}

/// Scoped ownership of the downloaded files; cleans up on every exit path.
#[derive(Debug)]
pub struct ArchiveWorkspace {
    archive: PathBuf,
    extracted: PathBuf,
}

impl Drop for ArchiveWorkspace {
    fn drop(&mut self) {
        clean_up(&self.archive, &self.extracted);
    }
}
