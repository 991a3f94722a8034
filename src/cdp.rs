//! Chrome DevTools Protocol session implementation

use crate::{BrowserConfig, Error, PageContext, Result, Session, Viewport};
use base64::Engine as Base64Engine;
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::{Emulation, Page};
use headless_chrome::{Browser, LaunchOptions};
use log::debug;
use std::sync::Arc;
use std::time::Duration;

// Scroll size of the document, as "[width, height]"
const CONTENT_SIZE_SCRIPT: &str = r#"
(function() {
    const doc = document.documentElement;
    const body = document.body;
    return JSON.stringify([
        Math.max(doc.scrollWidth, body ? body.scrollWidth : 0),
        Math.max(doc.scrollHeight, body ? body.scrollHeight : 0)
    ]);
})()
"#;

/// CDP-based browser session (uses the `headless_chrome` crate)
///
/// Launches one headless Chrome instance; every page context is a fresh tab.
pub struct CdpSession {
    browser: Browser,
    config: BrowserConfig,
}

impl CdpSession {
    pub fn launch(config: BrowserConfig) -> Result<Self> {
        // Configure headless Chrome launch options
        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(config.sandbox)
            .path(config.chrome_path.clone())
            .window_size(Some((config.viewport.width, config.viewport.height)))
            .build()
            .map_err(|e| Error::LaunchError(format!("Failed to build launch options: {}", e)))?;

        // Launch the browser
        let browser = Browser::new(launch_options)
            .map_err(|e| Error::LaunchError(format!("Failed to launch browser: {}", e)))?;

        debug!(
            "launched headless chrome with window {}x{}",
            config.viewport.width, config.viewport.height
        );

        Ok(Self { browser, config })
    }
}

impl Session for CdpSession {
    type Page = CdpPage;

    fn new_page(&mut self) -> Result<CdpPage> {
        let tab = self
            .browser
            .new_tab()
            .map_err(|e| Error::LaunchError(format!("Failed to create tab: {}", e)))?;
        tab.set_default_timeout(Duration::from_millis(self.config.timeout_ms));

        Ok(CdpPage {
            tab,
            viewport: self.config.viewport,
        })
    }

    fn close(self) -> Result<()> {
        // Drop explicitly so the child process is terminated promptly
        drop(self.browser);
        Ok(())
    }
}

/// A single Chrome tab.
pub struct CdpPage {
    tab: Arc<Tab>,
    // layout size; the full-page clip never shrinks below it
    viewport: Viewport,
}

impl CdpPage {
    fn content_size(&self) -> Result<(f64, f64)> {
        let eval = self
            .tab
            .evaluate(CONTENT_SIZE_SCRIPT, false)
            .map_err(|e| Error::CaptureError(format!("Failed to measure page: {}", e)))?;

        let raw = eval
            .value
            .as_ref()
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::CaptureError("No value returned from page measurement".into()))?;

        let [width, height]: [f64; 2] = serde_json::from_str(raw)
            .map_err(|e| Error::CaptureError(format!("Unexpected page measurement {}: {}", raw, e)))?;

        Ok((
            width.ceil().max(self.viewport.width as f64),
            height.ceil().max(self.viewport.height as f64),
        ))
    }
}

impl PageContext for CdpPage {
    fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        // Lay the page out at exactly this size, whatever the launch window was
        self.tab
            .call_method(Emulation::SetDeviceMetricsOverride {
                width: viewport.width,
                height: viewport.height,
                device_scale_factor: 1.0,
                mobile: false,
                scale: None,
                screen_width: None,
                screen_height: None,
                position_x: None,
                position_y: None,
                dont_set_visible_size: None,
                screen_orientation: None,
                viewport: None,
                display_feature: None,
                device_posture: None,
            })
            .map_err(|e| {
                Error::NavigationError(format!(
                    "Failed to set viewport {}x{}: {}",
                    viewport.width, viewport.height, e
                ))
            })?;
        self.viewport = viewport;
        Ok(())
    }

    fn goto(&mut self, url: &str) -> Result<()> {
        self.tab
            .navigate_to(url)
            .map_err(|e| Error::NavigationError(format!("{}: {}", url, e)))?;

        self.tab
            .wait_until_navigated()
            .map_err(|e| Error::NavigationError(format!("Wait for navigation to {} failed: {}", url, e)))?;

        Ok(())
    }

    fn screenshot(&mut self, full_page: bool) -> Result<Vec<u8>> {
        if !full_page {
            return self
                .tab
                .capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, None, true)
                .map_err(|e| Error::CaptureError(format!("Screenshot failed: {}", e)));
        }

        let (width, height) = self.content_size()?;
        let shot = self
            .tab
            .call_method(Page::CaptureScreenshot {
                format: Some(Page::CaptureScreenshotFormatOption::Png),
                quality: None,
                clip: Some(Page::Viewport {
                    x: 0.0,
                    y: 0.0,
                    width,
                    height,
                    scale: 1.0,
                }),
                from_surface: Some(true),
                capture_beyond_viewport: Some(true),
                optimize_for_speed: None,
            })
            .map_err(|e| Error::CaptureError(format!("Full-page screenshot failed: {}", e)))?;

        base64::engine::general_purpose::STANDARD
            .decode(shot.data)
            .map_err(|e| Error::CaptureError(format!("Screenshot payload is not base64: {}", e)))
    }

    fn close(self) -> Result<()> {
        self.tab
            .close(true)
            .map_err(|e| Error::Other(format!("Failed to close tab: {}", e)))?;
        Ok(())
    }
}
