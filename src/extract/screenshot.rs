//! Screenshot strategy: wait for the page to settle, capture one rectangle.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::browser::PageSession;
use crate::catalog::ScreenshotRecipe;
use crate::error::Result;

/// Capture rectangle in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Clip {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// When a rendered page is considered ready for capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settle {
    /// Selector that must appear first, if any.
    pub wait_for: Option<String>,
    pub wait_timeout: Duration,
    /// Fixed delay applied after the selector check.
    pub delay: Duration,
}

impl Settle {
    pub fn from_recipe(recipe: &ScreenshotRecipe) -> Self {
        Self {
            wait_for: recipe.wait_for.clone(),
            wait_timeout: recipe.wait_timeout(),
            delay: recipe.settle_delay(),
        }
    }
}

/// Wait for readiness, then capture `clip` as PNG bytes.
///
/// A selector that never shows up is not fatal: the capture proceeds after
/// the settle delay, as it would without a selector.
pub async fn capture(session: &mut dyn PageSession, clip: &Clip, settle: &Settle) -> Result<Vec<u8>> {
    if let Some(selector) = &settle.wait_for {
        debug!("Waiting up to {:?} for {}", settle.wait_timeout, selector);
        if !session.wait_for_selector(selector, settle.wait_timeout).await? {
            warn!(
                "Selector {} did not appear within {:?}, capturing anyway",
                selector, settle.wait_timeout
            );
        }
    }

    if !settle.delay.is_zero() {
        debug!("Settling for {:?}", settle.delay);
        tokio::time::sleep(settle.delay).await;
    }

    session.screenshot_clip(clip).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[derive(Default)]
    struct Recorder {
        selector_found: bool,
        calls: Vec<String>,
    }

    #[async_trait]
    impl PageSession for Recorder {
        async fn goto(&mut self, url: &str) -> Result<()> {
            self.calls.push(format!("goto {}", url));
            Ok(())
        }

        async fn content(&mut self) -> Result<String> {
            Ok(String::new())
        }

        async fn current_url(&mut self) -> Result<String> {
            Ok("about:blank".to_string())
        }

        async fn wait_for_selector(&mut self, selector: &str, _timeout: Duration) -> Result<bool> {
            self.calls.push(format!("wait {}", selector));
            Ok(self.selector_found)
        }

        async fn screenshot_clip(&mut self, clip: &Clip) -> Result<Vec<u8>> {
            self.calls
                .push(format!("clip {} {} {} {}", clip.x, clip.y, clip.width, clip.height));
            Ok(vec![0x89, b'P', b'N', b'G'])
        }

        async fn disconnect(&mut self) {}
    }

    const CLIP: Clip = Clip {
        x: 180,
        y: 680,
        width: 720,
        height: 380,
    };

    #[tokio::test]
    async fn test_capture_waits_then_clips() {
        let mut session = Recorder {
            selector_found: true,
            ..Default::default()
        };
        let settle = Settle {
            wait_for: Some("#chart svg".to_string()),
            wait_timeout: Duration::from_millis(10),
            delay: Duration::ZERO,
        };

        let png = capture(&mut session, &CLIP, &settle).await.unwrap();
        assert_eq!(&png[1..4], b"PNG");
        assert_eq!(session.calls, vec!["wait #chart svg", "clip 180 680 720 380"]);
    }

    #[tokio::test]
    async fn test_missing_selector_still_captures() {
        let mut session = Recorder::default();
        let settle = Settle {
            wait_for: Some(".never".to_string()),
            wait_timeout: Duration::from_millis(10),
            delay: Duration::from_millis(1),
        };

        capture(&mut session, &CLIP, &settle).await.unwrap();
        assert_eq!(session.calls.len(), 2);
    }

    #[tokio::test]
    async fn test_no_selector_skips_wait() {
        let mut session = Recorder::default();
        let settle = Settle {
            wait_for: None,
            wait_timeout: Duration::from_secs(15),
            delay: Duration::ZERO,
        };

        capture(&mut session, &CLIP, &settle).await.unwrap();
        assert_eq!(session.calls, vec!["clip 180 680 720 380"]);
    }
}
