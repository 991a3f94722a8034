//! Screenshot capture of a submission's `index.html`.

use crate::raster::{self, Raster};
use crate::{Browser, Error, Result, Viewport};
use log::info;
use std::path::Path;
use url::Url;

/// Page rendered for each submission.
pub const INDEX_FILE: &str = "index.html";
/// Full-page screenshot written next to each submission.
pub const RENDERED_FILE: &str = "rendered.png";

/// Build the `file://` URL for `dir/index.html`, failing when it does not exist.
pub fn index_url(dir: &Path) -> Result<Url> {
    let index = dir.join(INDEX_FILE);
    if !index.is_file() {
        return Err(Error::NavigationError(format!(
            "{} does not exist",
            index.display()
        )));
    }
    let absolute = std::fs::canonicalize(&index)
        .map_err(|e| Error::FilesystemError(format!("{}: {}", index.display(), e)))?;
    Url::from_file_path(&absolute).map_err(|_| {
        Error::NavigationError(format!("cannot express {} as a file URL", absolute.display()))
    })
}

/// Render `dir/index.html` in a fresh page, save the full-page screenshot as
/// `dir/rendered.png` and return it decoded.
///
/// An empty `dir` is skipped and yields `None`.
pub async fn capture(browser: &Browser, dir: &Path, viewport: Viewport) -> Result<Option<Raster>> {
    if dir.as_os_str().is_empty() {
        return Ok(None);
    }
    info!("Grading: {}", dir.display());

    let url = index_url(dir)?;
    let rendered_path = dir.join(RENDERED_FILE);

    let page = browser.new_page().await?;
    let shot = async {
        page.set_viewport(viewport).await?;
        page.goto(url.as_str()).await?;
        page.screenshot(Some(rendered_path.as_path()), true).await
    }
    .await;
    page.close().await?;
    shot?;

    raster::load(&rendered_path).await.map(Some)
}
