//! pagegrade
//!
//! Grades a batch of HTML submissions: each submission's `index.html` is
//! rendered in a headless browser, the full-page screenshot is compared with
//! a reference image, and the mismatch percentage is reported per submitter.
//!
//! # Features
//!
//! - **CDP Backend** (default): renders pages in headless Chrome via the
//!   Chrome DevTools Protocol
//! - **Pluggable sessions**: the grader drives any [`Session`] implementation,
//!   which keeps the batch logic testable without a browser
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "cdp")]
//! # async fn grade() -> pagegrade::Result<()> {
//! use pagegrade::{BrowserConfig, GraderConfig};
//!
//! let config = GraderConfig::new("/srv/submissions/", "/srv/submissions", "/srv/reference.png");
//! let results = pagegrade::batch::run(&config, BrowserConfig::default()).await?;
//! println!("{}", serde_json::to_string(&results).unwrap());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

pub mod error;
pub use error::{Error, Result};

pub mod pixelmatch;
pub mod raster;
pub mod score;

// Async-friendly browser facade (worker-thread backed)
pub mod async_api;
pub use async_api::{Browser, Page};

pub mod capture;

pub mod batch;
pub use batch::{GraderConfig, Identity, ResultEntry, ResultsMapping, SubmissionRecord};

#[cfg(feature = "cdp")]
pub mod cdp;

pub use raster::Raster;
pub use score::{DimensionPolicy, ScoreOptions};

/// Viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1366,
            height: 768,
        }
    }
}

/// Configuration for launching the headless browser
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Window size the browser is launched with
    pub viewport: Viewport,
    /// Navigation timeout in milliseconds
    pub timeout_ms: u64,
    /// Explicit Chrome/Chromium executable; auto-detected when `None`
    pub chrome_path: Option<PathBuf>,
    /// Whether to keep Chrome's sandbox enabled
    pub sandbox: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            timeout_ms: 30000,
            chrome_path: None,
            sandbox: true,
        }
    }
}

/// A browser session able to open short-lived page contexts.
///
/// Sessions are driven from a single worker thread (see [`Browser`]) and so
/// need not be `Send`.
pub trait Session {
    type Page: PageContext;

    /// Open a new page context
    fn new_page(&mut self) -> Result<Self::Page>;

    /// Shut the browser down
    fn close(self) -> Result<()>;
}

/// A single page (tab) inside a [`Session`].
pub trait PageContext {
    /// Fix the page's viewport size
    fn set_viewport(&mut self, viewport: Viewport) -> Result<()>;

    /// Navigate to `url` and wait for the page to load
    fn goto(&mut self, url: &str) -> Result<()>;

    /// Capture the page as PNG bytes. `full_page` extends the capture to the
    /// whole scrollable document instead of the viewport.
    fn screenshot(&mut self, full_page: bool) -> Result<Vec<u8>>;

    /// Close the page context
    fn close(self) -> Result<()>;
}
