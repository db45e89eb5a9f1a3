//! PDF anchor location and cropping via poppler-utils.
//!
//! Anchors are found with `pdftotext -bbox-layout`, which emits every text
//! line with its bounding box. Crops and whole-document conversions are
//! rendered to SVG by `pdftocairo`. Both tools use PDF points with the
//! origin at the top-left of the page, so located coordinates feed straight
//! into the crop arguments.

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::path::Path;

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::CropBox;
use crate::config::ToolPaths;
use crate::error::{PipelineError, Result};
use crate::tools::ExternalTool;

/// Where a marker's text was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocatedAnchor {
    /// 1-based page number.
    pub page: u32,
    pub x: i64,
    pub y: i64,
}

/// One line of text with the top-left corner of its bounding box.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub page: u32,
    pub x_min: f64,
    pub y_min: f64,
    pub text: String,
}

/// Parse `pdftotext -bbox-layout` output into lines, in document order.
pub fn parse_bbox_layout(xhtml: &str) -> Vec<TextLine> {
    let (Ok(page_sel), Ok(line_sel), Ok(word_sel)) = (
        Selector::parse("page"),
        Selector::parse("line"),
        Selector::parse("word"),
    ) else {
        return Vec::new();
    };

    let document = Html::parse_document(xhtml);
    let mut lines = Vec::new();

    for (index, page) in document.select(&page_sel).enumerate() {
        let page_no = index as u32 + 1;
        for line in page.select(&line_sel) {
            let text = line
                .select(&word_sel)
                .map(|w| w.text().collect::<String>())
                .filter(|w| !w.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            if text.is_empty() {
                continue;
            }
            lines.push(TextLine {
                page: page_no,
                x_min: coordinate(&line, "xMin"),
                y_min: coordinate(&line, "yMin"),
                text,
            });
        }
    }

    lines
}

// The HTML parser lowercases attribute names
fn coordinate(element: &ElementRef<'_>, name: &str) -> f64 {
    let value = element.value();
    value
        .attr(&name.to_ascii_lowercase())
        .or_else(|| value.attr(name))
        .and_then(|v| v.trim().parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// First line matching `pattern`, with coordinates rounded to whole points.
pub fn find_anchor(lines: &[TextLine], pattern: &Regex) -> Option<LocatedAnchor> {
    lines
        .iter()
        .find(|line| pattern.is_match(&line.text))
        .map(|line| LocatedAnchor {
            page: line.page,
            x: line.x_min.round() as i64,
            y: line.y_min.round() as i64,
        })
}

/// Locate every marker. Any marker without a match fails the whole lookup.
pub fn locate_anchors(
    lines: &[TextLine],
    anchors: &BTreeMap<String, String>,
) -> Result<HashMap<String, LocatedAnchor>> {
    let mut located = HashMap::with_capacity(anchors.len());
    for (marker, pattern) in anchors {
        let regex = Regex::new(pattern)
            .map_err(|e| PipelineError::Catalog(format!("bad anchor pattern {:?}: {}", pattern, e)))?;
        let anchor = find_anchor(lines, &regex)
            .ok_or_else(|| PipelineError::not_found(format!("anchor '{}'", marker), pattern))?;
        debug!(
            "Anchor '{}' at page {} ({}, {})",
            marker, anchor.page, anchor.x, anchor.y
        );
        located.insert(marker.clone(), anchor);
    }
    Ok(located)
}

/// `pdftocairo` arguments for a single-page crop whose canvas is exactly the region.
pub fn crop_args(input: &Path, output: &Path, crop: &CropBox) -> Vec<OsString> {
    let page = crop.page.to_string();
    let width = crop.width.to_string();
    let height = crop.height.to_string();

    let mut args: Vec<OsString> = vec![
        "-svg".into(),
        "-f".into(),
        page.clone().into(),
        "-l".into(),
        page.into(),
        "-x".into(),
        crop.x.to_string().into(),
        "-y".into(),
        crop.y.to_string().into(),
        "-W".into(),
        width.clone().into(),
        "-H".into(),
        height.clone().into(),
        "-paperw".into(),
        width.into(),
        "-paperh".into(),
        height.into(),
    ];
    args.push(input.as_os_str().to_owned());
    args.push(output.as_os_str().to_owned());
    args
}

/// `pdftocairo` arguments for converting a whole document.
pub fn convert_args(input: &Path, output: &Path) -> Vec<OsString> {
    vec![
        OsString::from("-svg"),
        input.as_os_str().to_owned(),
        output.as_os_str().to_owned(),
    ]
}

/// PDF operations the pipeline needs.
#[async_trait]
pub trait PdfTools: Send + Sync {
    /// Locate each marker's pattern in the document.
    async fn locate(
        &self,
        pdf: &Path,
        anchors: &BTreeMap<String, String>,
    ) -> Result<HashMap<String, LocatedAnchor>>;

    /// Render one region of one page to SVG.
    async fn crop_to_svg(&self, pdf: &Path, svg: &Path, crop: &CropBox) -> Result<()>;

    /// Render the whole document to SVG.
    async fn convert_to_svg(&self, pdf: &Path, svg: &Path) -> Result<()>;
}

/// poppler-utils backed implementation.
#[derive(Debug, Clone)]
pub struct Poppler {
    pdftotext: ExternalTool,
    pdftocairo: ExternalTool,
}

impl Poppler {
    pub fn new(tools: &ToolPaths) -> Self {
        Self {
            pdftotext: ExternalTool::new("pdftotext", &tools.pdftotext),
            pdftocairo: ExternalTool::new("pdftocairo", &tools.pdftocairo),
        }
    }

    /// Extract positioned text lines from a PDF.
    pub async fn text_lines(&self, pdf: &Path) -> Result<Vec<TextLine>> {
        let mut args = vec![OsString::from("-bbox-layout"), pdf.as_os_str().to_owned()];
        args.push(OsString::from("-"));
        let stdout = self.pdftotext.run(args).await?;
        Ok(parse_bbox_layout(&String::from_utf8_lossy(&stdout)))
    }
}

impl Default for Poppler {
    fn default() -> Self {
        Self::new(&ToolPaths::default())
    }
}

#[async_trait]
impl PdfTools for Poppler {
    async fn locate(
        &self,
        pdf: &Path,
        anchors: &BTreeMap<String, String>,
    ) -> Result<HashMap<String, LocatedAnchor>> {
        if anchors.is_empty() {
            return Ok(HashMap::new());
        }
        let lines = self.text_lines(pdf).await?;
        debug!("{} text lines in {}", lines.len(), pdf.display());
        locate_anchors(&lines, anchors)
    }

    async fn crop_to_svg(&self, pdf: &Path, svg: &Path, crop: &CropBox) -> Result<()> {
        self.pdftocairo.run(crop_args(pdf, svg, crop)).await?;
        Ok(())
    }

    async fn convert_to_svg(&self, pdf: &Path, svg: &Path) -> Result<()> {
        self.pdftocairo.run(convert_args(pdf, svg)).await?;
        Ok(())
    }
}
