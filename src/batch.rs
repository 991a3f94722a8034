//! Batch grading: render, score and identify every submission under a root.
//!
//! A run is all-or-nothing. The first failing submission aborts the batch and
//! no results are returned. The browser is closed before `run_with` returns,
//! whether the batch succeeded or not.

use crate::capture;
use crate::raster::{self, Raster};
use crate::score::{self, ScoreOptions};
use crate::{Browser, Error, Result, Session, Viewport};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Per-submission identity file.
pub const USER_FILE: &str = "user.json";

/// Grading results keyed by submitter email.
pub type ResultsMapping = BTreeMap<String, ResultEntry>;

/// Inputs for one grading run
#[derive(Debug, Clone)]
pub struct GraderConfig {
    /// Prefix prepended verbatim to each entry name to form a submission path
    pub base_directory: PathBuf,
    /// Directory whose entries name the submissions
    pub submissions_root: PathBuf,
    /// Reference PNG every page is compared against
    pub reference_image: PathBuf,
    /// Viewport pages are rendered at
    pub viewport: Viewport,
    pub score: ScoreOptions,
}

impl GraderConfig {
    pub fn new(
        base_directory: impl Into<PathBuf>,
        submissions_root: impl Into<PathBuf>,
        reference_image: impl Into<PathBuf>,
    ) -> Self {
        Self {
            base_directory: base_directory.into(),
            submissions_root: submissions_root.into(),
            reference_image: reference_image.into(),
            viewport: Viewport::default(),
            score: ScoreOptions::default(),
        }
    }
}

/// Contents of `user.json`. Extra fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

/// A submission directory and who submitted it.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionRecord {
    pub directory: PathBuf,
    pub identity: Identity,
}

/// One line of the output mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEntry {
    pub name: String,
    /// Absent when the capture was skipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_percentage: Option<f64>,
}

/// `<base><entry>`; the base is a plain prefix, not a parent directory.
pub fn submission_path(base: &Path, entry: &str) -> PathBuf {
    let mut joined = OsString::from(base.as_os_str());
    joined.push(entry);
    PathBuf::from(joined)
}

/// Names of the entries under `root`, sorted.
pub async fn list_submissions(root: &Path) -> Result<Vec<String>> {
    let fs_err = |e: std::io::Error| Error::FilesystemError(format!("{}: {}", root.display(), e));

    let mut dir = tokio::fs::read_dir(root).await.map_err(fs_err)?;
    let mut names = Vec::new();
    while let Some(entry) = dir.next_entry().await.map_err(fs_err)? {
        let name = entry.file_name().into_string().map_err(|raw| {
            Error::FilesystemError(format!("non UTF-8 entry {:?} in {}", raw, root.display()))
        })?;
        names.push(name);
    }
    names.sort();
    Ok(names)
}

/// Read `dir/user.json`.
pub async fn read_identity(dir: &Path) -> Result<SubmissionRecord> {
    let path = dir.join(USER_FILE);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| Error::FilesystemError(format!("{}: {}", path.display(), e)))?;
    let identity: Identity = serde_json::from_slice(&bytes)
        .map_err(|e| Error::ParseError(format!("{}: {}", path.display(), e)))?;
    Ok(SubmissionRecord {
        directory: dir.to_path_buf(),
        identity,
    })
}

/// Capture, score and identify a single submission.
pub async fn grade_submission(
    browser: &Browser,
    reference: &Raster,
    dir: &Path,
    config: &GraderConfig,
) -> Result<(SubmissionRecord, Option<f64>)> {
    let diff_percentage = match capture::capture(browser, dir, config.viewport).await? {
        Some(rendered) => Some(score::score(reference, &rendered, dir, &config.score).await?),
        None => None,
    };
    let record = read_identity(dir).await?;
    Ok((record, diff_percentage))
}

/// Grade every submission with a browser session built by `factory`.
pub async fn run_with<S, F>(config: &GraderConfig, factory: F) -> Result<ResultsMapping>
where
    S: Session + 'static,
    F: FnOnce() -> Result<S> + Send + 'static,
{
    debug!(
        "base={} directories={} reference={}",
        config.base_directory.display(),
        config.submissions_root.display(),
        config.reference_image.display()
    );

    let reference = raster::load(&config.reference_image).await?;
    let browser = Browser::launch(factory).await?;

    let graded = grade_all(&browser, &reference, config).await;
    match (graded, browser.close().await) {
        (Ok(results), closed) => closed.map(|()| results),
        (Err(e), Err(close_err)) => {
            warn!("failed to close the browser after an aborted batch: {}", close_err);
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
    }
}

async fn grade_all(browser: &Browser, reference: &Raster, config: &GraderConfig) -> Result<ResultsMapping> {
    let mut results = ResultsMapping::new();
    for entry in list_submissions(&config.submissions_root).await? {
        let dir = submission_path(&config.base_directory, &entry);
        let (record, diff_percentage) = grade_submission(browser, reference, &dir, config).await?;

        let Identity { name, email } = record.identity;
        let entry = ResultEntry { name, diff_percentage };
        if let Some(previous) = results.insert(email.clone(), entry) {
            warn!(
                "{} appears more than once (previously {:?}); {} overwrites it",
                email,
                previous.name,
                record.directory.display()
            );
        }
    }
    Ok(results)
}

/// Grade every submission in headless Chrome.
#[cfg(feature = "cdp")]
pub async fn run(config: &GraderConfig, browser: crate::BrowserConfig) -> Result<ResultsMapping> {
    run_with(config, move || crate::cdp::CdpSession::launch(browser)).await
}
