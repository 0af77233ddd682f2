//! Desktop collaborators: window listing and closing, screen sampling.
//!
//! The OS integrations live outside this crate; they plug in through
//! [`WindowManager`] and [`ScreenSampler`]. This module owns the pieces of
//! policy around them: which close gesture a window gets, how a target title
//! is matched, and how a screenshot becomes a small JPEG for the service.

use std::io::Cursor;

use image::DynamicImage;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;

use crate::config::ScreenConfig;
use crate::error::{CoachError, Result};

/// A visible top-level window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub title: String,
    /// Opaque native handle.
    pub handle: u64,
}

/// How a window is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    /// Send the close-tab shortcut; only the active tab goes away.
    CloseTab,
    /// Close the whole window.
    CloseWindow,
}

/// OS window manager seam. Calls may block.
pub trait WindowManager: Send + Sync {
    /// Visible, titled top-level windows.
    ///
    /// # Errors
    ///
    /// Returns [`CoachError::Platform`] if enumeration fails.
    fn list_visible_windows(&self) -> Result<Vec<WindowInfo>>;

    /// The window that has focus.
    ///
    /// # Errors
    ///
    /// Returns [`CoachError::Platform`] if the query fails.
    fn active_window(&self) -> Result<Option<WindowInfo>>;

    /// Close a window or its active tab.
    ///
    /// # Errors
    ///
    /// Returns [`CoachError::Platform`] if the OS refused.
    fn close_window(&self, handle: u64, mode: CloseMode) -> Result<()>;
}

/// Screen capture seam. Calls may block.
pub trait ScreenSampler: Send + Sync {
    /// Capture the primary screen.
    ///
    /// # Errors
    ///
    /// Returns [`CoachError::Platform`] if capture fails.
    fn capture(&self) -> Result<DynamicImage>;
}

/// An encoded screen sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenSample {
    pub mime_type: &'static str,
    pub data: Vec<u8>,
}

/// Browsers get the tab shortcut, everything else a window close.
pub fn close_mode_for<S: AsRef<str>>(title: &str, browser_keywords: &[S]) -> CloseMode {
    let lower = title.to_lowercase();
    if browser_keywords
        .iter()
        .any(|kw| lower.contains(&kw.as_ref().to_lowercase()))
    {
        CloseMode::CloseTab
    } else {
        CloseMode::CloseWindow
    }
}

/// Find the window a close request names: an exact (case-insensitive) title
/// first, then a window whose title contains the target, then one whose
/// title is contained in it.
pub fn find_window<'a>(windows: &'a [WindowInfo], target: &str) -> Option<&'a WindowInfo> {
    let target = target.trim().to_lowercase();
    if target.is_empty() {
        return None;
    }
    let titled = || windows.iter().filter(|w| !w.title.trim().is_empty());
    titled()
        .find(|w| w.title.to_lowercase() == target)
        .or_else(|| titled().find(|w| w.title.to_lowercase().contains(&target)))
        .or_else(|| titled().find(|w| target.contains(&w.title.to_lowercase())))
}

/// Downscale (keeping aspect ratio) and JPEG-encode a screenshot.
///
/// # Errors
///
/// Returns [`CoachError::Platform`] if encoding fails.
pub fn encode_thumbnail(image: &DynamicImage, config: &ScreenConfig) -> Result<ScreenSample> {
    let resized = if image.width() > config.max_width || image.height() > config.max_height {
        image.resize(config.max_width, config.max_height, FilterType::Triangle)
    } else {
        image.clone()
    };

    let mut data = Vec::new();
    let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut data), config.jpeg_quality);
    resized
        .to_rgb8()
        .write_with_encoder(encoder)
        .map_err(|e| CoachError::Platform(format!("JPEG encode: {e}")))?;

    Ok(ScreenSample {
        mime_type: "image/jpeg",
        data,
    })
}

/// Capture and encode in one step.
///
/// # Errors
///
/// Propagates capture and encoding failures.
pub fn sample_screen(sampler: &dyn ScreenSampler, config: &ScreenConfig) -> Result<ScreenSample> {
    let image = sampler.capture()?;
    encode_thumbnail(&image, config)
}

/// Desktop with no OS integration: no windows, no screenshots.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessDesktop;

impl WindowManager for HeadlessDesktop {
    fn list_visible_windows(&self) -> Result<Vec<WindowInfo>> {
        Ok(Vec::new())
    }

    fn active_window(&self) -> Result<Option<WindowInfo>> {
        Ok(None)
    }

    fn close_window(&self, handle: u64, _mode: CloseMode) -> Result<()> {
        Err(CoachError::Platform(format!(
            "no window manager available to close {handle}"
        )))
    }
}

impl ScreenSampler for HeadlessDesktop {
    fn capture(&self) -> Result<DynamicImage> {
        Err(CoachError::Platform("screen capture unavailable".into()))
    }
}
