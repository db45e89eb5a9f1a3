//! Region extraction strategies.
//!
//! - [`screenshot`]: capture a fixed rectangle of a rendered page
//! - [`pdf`]: locate anchor text in a PDF, then crop or convert it to SVG
//!
//! [`CropBox`] turns a catalog region plus located anchors into the
//! absolute page rectangle handed to the rasterizer.

pub mod pdf;
pub mod screenshot;

use std::collections::HashMap;

use crate::catalog::{Position, RegionSpec};
use crate::error::{PipelineError, Result};

pub use pdf::{LocatedAnchor, PdfTools, Poppler, TextLine};
pub use screenshot::{Clip, Settle};

/// Absolute crop rectangle on one PDF page, in points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropBox {
    /// 1-based page number.
    pub page: u32,
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

impl CropBox {
    /// Resolve a region against the anchors located in its document.
    pub fn resolve(region: &RegionSpec, anchors: &HashMap<String, LocatedAnchor>) -> Result<Self> {
        let anchor = match &region.anchor {
            Some(name) => Some(
                anchors
                    .get(name)
                    .ok_or_else(|| PipelineError::not_found(format!("anchor '{}'", name), name))?,
            ),
            None => None,
        };

        let page = match (region.page, anchor) {
            (Some(page), _) => page,
            (None, Some(anchor)) => anchor.page,
            (None, None) => {
                return Err(PipelineError::Catalog(
                    "region has neither page nor anchor".to_string(),
                ))
            }
        };

        Ok(Self {
            page,
            x: axis(region.x, anchor.map(|a| a.x))?,
            y: axis(region.y, anchor.map(|a| a.y))?,
            width: region.width,
            height: region.height,
        })
    }
}

fn axis(position: Position, anchor: Option<i64>) -> Result<i64> {
    match (position, anchor) {
        (Position::Absolute(v), _) => Ok(v),
        (Position::FromAnchor { from_anchor }, Some(base)) => {
            base.checked_add(from_anchor).ok_or_else(|| {
                PipelineError::Catalog(format!(
                    "offset {} from anchor at {} is out of range",
                    from_anchor, base
                ))
            })
        }
        (Position::FromAnchor { .. }, None) => Err(PipelineError::Catalog(
            "from_anchor position without an anchor".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchors() -> HashMap<String, LocatedAnchor> {
        let mut map = HashMap::new();
        map.insert(
            "caption".to_string(),
            LocatedAnchor {
                page: 1,
                x: 100,
                y: 500,
            },
        );
        map
    }

    #[test]
    fn test_anchor_relative_box() {
        let region = RegionSpec {
            anchor: Some("caption".to_string()),
            page: None,
            x: Position::FromAnchor { from_anchor: 0 },
            y: Position::FromAnchor { from_anchor: -230 },
            width: 600,
            height: 230,
        };
        let crop = CropBox::resolve(&region, &anchors()).unwrap();
        assert_eq!(
            crop,
            CropBox {
                page: 1,
                x: 100,
                y: 270,
                width: 600,
                height: 230
            }
        );
    }

    #[test]
    fn test_offset_out_of_range() {
        let region = RegionSpec {
            anchor: Some("caption".to_string()),
            page: None,
            x: Position::FromAnchor { from_anchor: 0 },
            y: Position::FromAnchor {
                from_anchor: i64::MAX,
            },
            width: 600,
            height: 230,
        };
        let err = CropBox::resolve(&region, &anchors()).unwrap_err();
        assert!(matches!(err, PipelineError::Catalog(ref m) if m.contains("out of range")));
    }

    #[test]
    fn test_mixed_absolute_and_anchored() {
        let region = RegionSpec {
            anchor: Some("caption".to_string()),
            page: None,
            x: Position::Absolute(290),
            y: Position::FromAnchor { from_anchor: -10 },
            width: 300,
            height: 60,
        };
        let crop = CropBox::resolve(&region, &anchors()).unwrap();
        assert_eq!((crop.page, crop.x, crop.y), (1, 290, 490));
    }

    #[test]
    fn test_absolute_box_uses_explicit_page() {
        let region = RegionSpec {
            anchor: None,
            page: Some(1),
            x: Position::Absolute(300),
            y: Position::Absolute(575),
            width: 300,
            height: 70,
        };
        let crop = CropBox::resolve(&region, &HashMap::new()).unwrap();
        assert_eq!(
            crop,
            CropBox {
                page: 1,
                x: 300,
                y: 575,
                width: 300,
                height: 70
            }
        );
    }

    #[test]
    fn test_unlocated_anchor_is_not_found() {
        let region = RegionSpec {
            anchor: Some("missing".to_string()),
            page: None,
            x: Position::Absolute(0),
            y: Position::FromAnchor { from_anchor: 0 },
            width: 10,
            height: 10,
        };
        assert!(matches!(
            CropBox::resolve(&region, &anchors()),
            Err(PipelineError::NotFound { .. })
        ));
    }
}
