//! A browser stand-in that "renders" an `index.html` as a solid swatch.
//!
//! The page colour is the first `#rrggbb` found in the document (white when
//! there is none); `data-height="N"` makes the full-page capture N pixels tall
//! and `data-unreachable` makes navigation fail.

#![allow(dead_code)]

use pagegrade::{Error, PageContext, Raster, Result, Session, Viewport};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct Counters {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub sessions_closed: AtomicUsize,
    pub sessions_dropped: AtomicUsize,
}

impl Counters {
    pub fn live_pages(&self) -> usize {
        self.opened.load(Ordering::SeqCst) - self.closed.load(Ordering::SeqCst)
    }
}

pub struct SwatchSession {
    counters: Arc<Counters>,
}

impl SwatchSession {
    pub fn new(counters: Arc<Counters>) -> Self {
        Self { counters }
    }
}

pub struct SwatchPage {
    counters: Arc<Counters>,
    viewport: Viewport,
    html: Option<String>,
}

impl Drop for SwatchSession {
    fn drop(&mut self) {
        self.counters.sessions_dropped.fetch_add(1, Ordering::SeqCst);
    }
}

impl Session for SwatchSession {
    type Page = SwatchPage;

    fn new_page(&mut self) -> Result<SwatchPage> {
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(SwatchPage {
            counters: self.counters.clone(),
            viewport: Viewport::default(),
            html: None,
        })
    }

    fn close(self) -> Result<()> {
        self.counters.sessions_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl PageContext for SwatchPage {
    fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        self.viewport = viewport;
        Ok(())
    }

    fn goto(&mut self, url: &str) -> Result<()> {
        let path = url::Url::parse(url)
            .ok()
            .and_then(|u| u.to_file_path().ok())
            .ok_or_else(|| Error::NavigationError(format!("not a file URL: {}", url)))?;
        let html = std::fs::read_to_string(&path)
            .map_err(|e| Error::NavigationError(format!("{}: {}", url, e)))?;
        if html.contains("data-unreachable") {
            return Err(Error::NavigationError(format!("{}: net::ERR_FAILED", url)));
        }
        self.html = Some(html);
        Ok(())
    }

    fn screenshot(&mut self, full_page: bool) -> Result<Vec<u8>> {
        let html = self
            .html
            .as_deref()
            .ok_or_else(|| Error::CaptureError("no page loaded".into()))?;
        let height = match (full_page, declared_height(html)) {
            (true, Some(h)) => h.max(self.viewport.height),
            _ => self.viewport.height,
        };
        let raster = Raster::filled(self.viewport.width, height, swatch(html));
        pagegrade::raster::encode_png(&raster)
    }

    fn close(self) -> Result<()> {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn swatch(html: &str) -> [u8; 4] {
    html.match_indices('#')
        .filter_map(|(i, _)| html.get(i + 1..i + 7))
        .find_map(|hex| {
            let v = u32::from_str_radix(hex, 16).ok()?;
            Some([(v >> 16) as u8, (v >> 8) as u8, v as u8, 255])
        })
        .unwrap_or([255, 255, 255, 255])
}

fn declared_height(html: &str) -> Option<u32> {
    let rest = &html[html.find("data-height=\"")? + "data-height=\"".len()..];
    rest[..rest.find('"')?].parse().ok()
}

/// Lay out a submission directory under `root`.
pub fn write_submission(root: &Path, dir: &str, color: &str, name: &str, email: &str) -> PathBuf {
    let path = root.join(dir);
    std::fs::create_dir_all(&path).unwrap();
    std::fs::write(
        path.join("index.html"),
        format!("<html><body style=\"background: {}\"></body></html>", color),
    )
    .unwrap();
    std::fs::write(
        path.join("user.json"),
        serde_json::json!({ "name": name, "email": email }).to_string(),
    )
    .unwrap();
    path
}

pub fn write_reference(path: &Path, width: u32, height: u32, rgba: [u8; 4]) {
    let png = pagegrade::raster::encode_png(&Raster::filled(width, height, rgba)).unwrap();
    std::fs::write(path, png).unwrap();
}
