//! Chromium as an [`ExternalView`](crate::view::ExternalView).
//!
//! With the `browser` feature, [`BrowserView`] launches Chromium through
//! chromiumoxide and drives one page over the DevTools Protocol. Without the
//! feature only [`BrowserConfig`] is available; use `MockView` instead.

use crate::config::RecordingConfig;

/// Browser launch configuration
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Run without a window
    pub headless: bool,
    /// Viewport width
    pub viewport_width: u32,
    /// Viewport height
    pub viewport_height: u32,
    /// Path to chromium binary (None = auto-detect)
    pub chromium_path: Option<String>,
    /// Sandbox mode (disable for containers)
    pub sandbox: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport_width: 1366,
            viewport_height: 768,
            chromium_path: None,
            sandbox: true,
        }
    }
}

impl BrowserConfig {
    /// Browser sized to a recording's viewport
    #[must_use]
    pub fn for_recording(config: &RecordingConfig) -> Self {
        Self::default().with_viewport(config.viewport_width, config.viewport_height)
    }

    /// Set viewport dimensions
    #[must_use]
    pub const fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport_width = width;
        self.viewport_height = height;
        self
    }

    /// Set headless mode
    #[must_use]
    pub const fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Set chromium path
    #[must_use]
    pub fn with_chromium_path(mut self, path: impl Into<String>) -> Self {
        self.chromium_path = Some(path.into());
        self
    }

    /// Disable sandbox (for containers/CI)
    #[must_use]
    pub const fn with_no_sandbox(mut self) -> Self {
        self.sandbox = false;
        self
    }
}

/// Script that scrolls and resolves after two animation frames
#[cfg_attr(not(feature = "browser"), allow(dead_code))]
fn scroll_script(delta: u32) -> String {
    format!(
        "new Promise(resolve => {{ \
            window.scrollBy(0, {delta}); \
            requestAnimationFrame(() => requestAnimationFrame(() => resolve(true))); \
        }})"
    )
}

#[cfg_attr(not(feature = "browser"), allow(dead_code))]
const EXTENT_SCRIPT: &str =
    "[Math.ceil(document.documentElement.scrollHeight), Math.round(window.scrollY)]";

#[cfg(feature = "browser")]
mod cdp {
    use super::{scroll_script, BrowserConfig, EXTENT_SCRIPT};
    use crate::result::{CastError, CastResult};
    use crate::view::{ExternalView, ScrollExtent, ViewAction};
    use async_trait::async_trait;
    use base64::Engine;
    use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig as CdpConfig};
    use chromiumoxide::cdp::browser_protocol::page::{
        CaptureScreenshotFormat, CaptureScreenshotParams,
    };
    use chromiumoxide::page::Page as CdpPage;
    use futures::StreamExt;
    use tracing::{debug, info};

    /// One Chromium page driven over CDP
    #[derive(Debug)]
    pub struct BrowserView {
        config: BrowserConfig,
        browser: CdpBrowser,
        page: CdpPage,
        handle: tokio::task::JoinHandle<()>,
    }

    impl BrowserView {
        /// Launch Chromium and open a blank page
        pub async fn launch(config: BrowserConfig) -> CastResult<Self> {
            let mut builder =
                CdpConfig::builder().window_size(config.viewport_width, config.viewport_height);
            if !config.headless {
                builder = builder.with_head();
            }
            if !config.sandbox {
                builder = builder.no_sandbox();
            }
            if let Some(ref path) = config.chromium_path {
                builder = builder.chrome_executable(path);
            }
            let cdp_config = builder
                .build()
                .map_err(|e| CastError::capture(format!("invalid browser config: {e}")))?;

            let (browser, mut handler) = CdpBrowser::launch(cdp_config)
                .await
                .map_err(|e| CastError::capture(format!("failed to launch browser: {e}")))?;

            let handle = tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if event.is_err() {
                        break;
                    }
                }
            });

            let page = browser
                .new_page("about:blank")
                .await
                .map_err(|e| CastError::capture(format!("failed to open page: {e}")))?;

            info!(
                width = config.viewport_width,
                height = config.viewport_height,
                headless = config.headless,
                "browser launched"
            );
            Ok(Self {
                config,
                browser,
                page,
                handle,
            })
        }

        /// Launch configuration
        #[must_use]
        pub const fn config(&self) -> &BrowserConfig {
            &self.config
        }

        /// Navigate and wait for the load event
        pub async fn goto(&mut self, url: &str) -> CastResult<()> {
            self.page
                .goto(url)
                .await
                .map_err(|e| CastError::capture(format!("failed to navigate to {url}: {e}")))?;
            debug!(url, "navigated");
            Ok(())
        }

        /// Close the browser and stop the handler task
        pub async fn close(mut self) -> CastResult<()> {
            self.browser
                .close()
                .await
                .map_err(|e| CastError::capture(format!("failed to close browser: {e}")))?;
            self.handle.abort();
            Ok(())
        }
    }

    #[async_trait]
    impl ExternalView for BrowserView {
        async fn capture_frame(&mut self) -> CastResult<Vec<u8>> {
            let params = CaptureScreenshotParams::builder()
                .format(CaptureScreenshotFormat::Png)
                .build();
            let screenshot = self
                .page
                .execute(params)
                .await
                .map_err(|e| CastError::capture(e.to_string()))?;
            base64::engine::general_purpose::STANDARD
                .decode(&screenshot.data)
                .map_err(|e| CastError::capture(format!("screenshot is not base64: {e}")))
        }

        async fn scroll_by(&mut self, delta: u32) -> CastResult<()> {
            self.page
                .evaluate(scroll_script(delta))
                .await
                .map_err(|e| CastError::scroll(e.to_string()))?;
            Ok(())
        }

        async fn scroll_extent(&mut self) -> CastResult<ScrollExtent> {
            let result = self
                .page
                .evaluate(EXTENT_SCRIPT)
                .await
                .map_err(|e| CastError::scroll(e.to_string()))?;
            let (document_height, scroll_offset): (u32, u32) = result
                .into_value()
                .map_err(|e| CastError::scroll(format!("unexpected extent: {e}")))?;
            Ok(ScrollExtent {
                document_height,
                scroll_offset,
            })
        }

        async fn trigger_action(&mut self, action: &ViewAction) -> CastResult<()> {
            match action {
                ViewAction::Click { selector } => {
                    let element = self.page.find_element(selector.as_str()).await.map_err(|e| {
                        CastError::action(format!("no element matches {selector}: {e}"))
                    })?;
                    element.click().await.map_err(|e| {
                        CastError::action(format!("click on {selector} failed: {e}"))
                    })?;
                }
            }
            Ok(())
        }
    }
}

#[cfg(feature = "browser")]
pub use cdp::BrowserView;
