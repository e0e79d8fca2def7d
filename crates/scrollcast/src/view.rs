//! The rendered view being recorded.
//!
//! The core never launches or navigates a browser itself; it drives a view
//! through [`ExternalView`]. [`MockView`] renders a synthetic page in memory
//! for tests and examples; `BrowserView` (feature `browser`) drives Chromium.

use crate::result::{CastError, CastResult};
use async_trait::async_trait;
use image::{ImageFormat, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Document height and current scroll offset of a view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScrollExtent {
    /// Full document height in CSS pixels
    pub document_height: u32,
    /// Current vertical scroll offset
    pub scroll_offset: u32,
}

/// An action performed on the view between the two holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViewAction {
    /// Click the first element matching a CSS selector
    Click {
        /// CSS selector
        selector: String,
    },
}

/// Capability interface onto the rendered view
///
/// `capture_frame` must reflect the state after any prior `scroll_by` has
/// settled.
#[async_trait]
pub trait ExternalView: Send {
    /// Capture the visible viewport as compressed raster bytes (PNG or JPEG)
    async fn capture_frame(&mut self) -> CastResult<Vec<u8>>;

    /// Scroll down by `delta` pixels and wait until the scroll is applied
    async fn scroll_by(&mut self, delta: u32) -> CastResult<()>;

    /// Report the document height and scroll offset
    async fn scroll_extent(&mut self) -> CastResult<ScrollExtent>;

    /// Perform an action on the page
    async fn trigger_action(&mut self, action: &ViewAction) -> CastResult<()>;
}

/// Call recorded by [`MockView`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewCall {
    /// `capture_frame`
    Capture,
    /// `scroll_by(delta)`
    Scroll(u32),
    /// `scroll_extent`
    Extent,
    /// `trigger_action`
    Action(ViewAction),
}

/// In-memory view of a synthetic page
///
/// Frames are PNG-encoded solid fills whose colour follows the scroll
/// offset, so consecutive frames differ after every scroll.
#[derive(Debug, Clone)]
pub struct MockView {
    viewport_width: u32,
    viewport_height: u32,
    document_height: u32,
    scroll_offset: u32,
    calls: Vec<ViewCall>,
    fail_capture_at: Option<usize>,
    fail_scroll_at: Option<usize>,
    corrupt_capture_at: Option<usize>,
    fail_actions: bool,
    captures: usize,
    scrolls: usize,
}

impl MockView {
    /// Create a view with the given viewport and document height
    #[must_use]
    pub fn new(viewport_width: u32, viewport_height: u32, document_height: u32) -> Self {
        Self {
            viewport_width,
            viewport_height,
            document_height,
            scroll_offset: 0,
            calls: Vec::new(),
            fail_capture_at: None,
            fail_scroll_at: None,
            corrupt_capture_at: None,
            fail_actions: false,
            captures: 0,
            scrolls: 0,
        }
    }

    /// Fail the n-th capture (0-based)
    #[must_use]
    pub const fn failing_capture_at(mut self, n: usize) -> Self {
        self.fail_capture_at = Some(n);
        self
    }

    /// Fail the n-th scroll (0-based)
    #[must_use]
    pub const fn failing_scroll_at(mut self, n: usize) -> Self {
        self.fail_scroll_at = Some(n);
        self
    }

    /// Return undecodable bytes from the n-th capture (0-based)
    #[must_use]
    pub const fn corrupt_capture_at(mut self, n: usize) -> Self {
        self.corrupt_capture_at = Some(n);
        self
    }

    /// Fail every action
    #[must_use]
    pub const fn failing_actions(mut self) -> Self {
        self.fail_actions = true;
        self
    }

    /// Call history
    #[must_use]
    pub fn calls(&self) -> &[ViewCall] {
        &self.calls
    }

    /// Number of captures served
    #[must_use]
    pub const fn capture_count(&self) -> usize {
        self.captures
    }

    /// Deltas passed to `scroll_by`, in order
    #[must_use]
    pub fn scroll_deltas(&self) -> Vec<u32> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                ViewCall::Scroll(d) => Some(*d),
                _ => None,
            })
            .collect()
    }

    /// Current scroll offset
    #[must_use]
    pub const fn scroll_offset(&self) -> u32 {
        self.scroll_offset
    }

    fn max_offset(&self) -> u32 {
        self.document_height.saturating_sub(self.viewport_height)
    }

    fn render(&self) -> CastResult<Vec<u8>> {
        let shade = (self.scroll_offset % 256) as u8;
        let image = RgbaImage::from_pixel(
            self.viewport_width,
            self.viewport_height,
            Rgba([shade, 255 - shade, 128, 255]),
        );
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| CastError::capture(format!("mock render failed: {e}")))?;
        Ok(png)
    }
}

#[async_trait]
impl ExternalView for MockView {
    async fn capture_frame(&mut self) -> CastResult<Vec<u8>> {
        let index = self.captures;
        self.captures += 1;
        self.calls.push(ViewCall::Capture);
        if self.fail_capture_at == Some(index) {
            return Err(CastError::capture(format!("induced capture failure #{index}")));
        }
        if self.corrupt_capture_at == Some(index) {
            return Ok(b"not a png".to_vec());
        }
        self.render()
    }

    async fn scroll_by(&mut self, delta: u32) -> CastResult<()> {
        let index = self.scrolls;
        self.scrolls += 1;
        self.calls.push(ViewCall::Scroll(delta));
        if self.fail_scroll_at == Some(index) {
            return Err(CastError::scroll(format!("induced scroll failure #{index}")));
        }
        self.scroll_offset = self.scroll_offset.saturating_add(delta).min(self.max_offset());
        Ok(())
    }

    async fn scroll_extent(&mut self) -> CastResult<ScrollExtent> {
        self.calls.push(ViewCall::Extent);
        Ok(ScrollExtent {
            document_height: self.document_height,
            scroll_offset: self.scroll_offset,
        })
    }

    async fn trigger_action(&mut self, action: &ViewAction) -> CastResult<()> {
        self.calls.push(ViewCall::Action(action.clone()));
        if self.fail_actions {
            let ViewAction::Click { selector } = action;
            return Err(CastError::action(format!("induced click failure on {selector}")));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::decode::decode_raster;

    #[tokio::test]
    async fn test_capture_matches_viewport() {
        let mut view = MockView::new(12, 8, 100);
        let frame = decode_raster(&view.capture_frame().await.unwrap()).unwrap();
        assert_eq!((frame.width(), frame.height()), (12, 8));
        assert_eq!(view.capture_count(), 1);
    }

    #[tokio::test]
    async fn test_scroll_is_clamped_to_document() {
        let mut view = MockView::new(10, 40, 100);
        view.scroll_by(50).await.unwrap();
        view.scroll_by(50).await.unwrap();
        assert_eq!(view.scroll_offset(), 60);
        assert_eq!(view.scroll_deltas(), vec![50, 50]);
        let extent = view.scroll_extent().await.unwrap();
        assert_eq!(extent.document_height, 100);
        assert_eq!(extent.scroll_offset, 60);
    }

    #[tokio::test]
    async fn test_frames_change_after_scroll() {
        let mut view = MockView::new(4, 4, 400);
        let before = view.capture_frame().await.unwrap();
        view.scroll_by(30).await.unwrap();
        let after = view.capture_frame().await.unwrap();
        assert_ne!(before, after);
    }

    #[tokio::test]
    async fn test_induced_failures() {
        let mut view = MockView::new(4, 4, 400)
            .failing_capture_at(1)
            .failing_scroll_at(0);
        assert!(view.capture_frame().await.is_ok());
        assert!(matches!(
            view.capture_frame().await,
            Err(CastError::Capture { .. })
        ));
        assert!(matches!(
            view.scroll_by(10).await,
            Err(CastError::Scroll { .. })
        ));

        let mut view = MockView::new(4, 4, 400).failing_actions();
        let click = ViewAction::Click {
            selector: "#accept".to_string(),
        };
        assert!(matches!(
            view.trigger_action(&click).await,
            Err(CastError::Action { .. })
        ));
    }

    #[tokio::test]
    async fn test_records_actions() {
        let mut view = MockView::new(4, 4, 4);
        let action = ViewAction::Click {
            selector: "#accept".to_string(),
        };
        view.trigger_action(&action).await.unwrap();
        assert_eq!(view.calls(), &[ViewCall::Action(action)]);
    }
}
