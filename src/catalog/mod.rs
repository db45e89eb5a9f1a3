//! Task catalog.
//!
//! The catalog is an ordered list of named extraction recipes. It is data,
//! not code: the built-in catalog is a TOML document compiled into the
//! binary, and configuration may point at a replacement file. Anchor
//! offsets and clip rectangles live here so re-calibrating a source never
//! touches the pipeline.
//!
//! Catalogs are validated when loaded. In particular every output file name
//! must be unique across the catalog; a collision is rejected up front
//! instead of silently overwriting another task's artifact.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::error::{PipelineError, Result};
use crate::extract::Clip;

const BUILTIN_CATALOG: &str = include_str!("default.toml");

/// Default settle delay for screenshot recipes (milliseconds).
const DEFAULT_SETTLE_MS: u64 = 3000;

/// Default time to wait for a readiness selector (milliseconds).
const DEFAULT_WAIT_TIMEOUT_MS: u64 = 15_000;

/// A position along one axis of a crop region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Position {
    /// Fixed page coordinate.
    Absolute(i64),
    /// Offset from the matched anchor's coordinate.
    FromAnchor { from_anchor: i64 },
}

impl Position {
    pub fn is_anchored(&self) -> bool {
        matches!(self, Position::FromAnchor { .. })
    }
}

/// One rectangle to cut out of a PDF page.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RegionSpec {
    /// Anchor marker this region hangs off.
    #[serde(default)]
    pub anchor: Option<String>,
    /// Explicit 1-based page; required when there is no anchor.
    #[serde(default)]
    pub page: Option<u32>,
    pub x: Position,
    pub y: Position,
    pub width: u32,
    pub height: u32,
}

/// Navigate, follow the first matching document link, crop regions out of it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PdfCropRecipe {
    pub page_url: String,
    pub link_pattern: String,
    /// Marker name to text pattern.
    #[serde(default)]
    pub anchors: BTreeMap<String, String>,
    pub regions: Vec<RegionSpec>,
}

/// Navigate and download every chart image whose source matches.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImageLinksRecipe {
    pub page_url: String,
    pub image_pattern: String,
}

/// Navigate, wait for the page to settle, capture a fixed rectangle.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScreenshotRecipe {
    pub page_url: String,
    /// CSS selector signalling the content has rendered.
    #[serde(default)]
    pub wait_for: Option<String>,
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
    /// Fixed delay before capture, applied after `wait_for`.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    pub clip: Clip,
}

fn default_settle_ms() -> u64 {
    DEFAULT_SETTLE_MS
}

fn default_wait_timeout_ms() -> u64 {
    DEFAULT_WAIT_TIMEOUT_MS
}

impl ScreenshotRecipe {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

/// A document downloaded and converted wholesale.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DirectDocument {
    pub label: String,
    pub url: String,
}

/// Fixed list of documents, no browser involved.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DirectDownloadRecipe {
    pub documents: Vec<DirectDocument>,
}

/// How a task obtains and extracts its artifacts.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recipe {
    PdfCrop(PdfCropRecipe),
    ImageLinks(ImageLinksRecipe),
    Screenshot(ScreenshotRecipe),
    DirectDownload(DirectDownloadRecipe),
}

impl Recipe {
    /// Whether the recipe drives a browser page.
    pub fn needs_browser(&self) -> bool {
        !matches!(self, Recipe::DirectDownload(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Recipe::PdfCrop(_) => "pdf_crop",
            Recipe::ImageLinks(_) => "image_links",
            Recipe::Screenshot(_) => "screenshot",
            Recipe::DirectDownload(_) => "direct_download",
        }
    }
}

/// Output names a task may produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputNames {
    /// Known when the catalog is loaded.
    Fixed(Vec<String>),
    /// `{stem}-1.{ext}`, `{stem}-2.{ext}`, ... with the count known only at runtime.
    Numbered { stem: String, ext: &'static str },
}

impl OutputNames {
    /// Whether `name` could be produced by this set.
    pub fn could_produce(&self, name: &str) -> bool {
        match self {
            OutputNames::Fixed(names) => names.iter().any(|n| n == name),
            OutputNames::Numbered { stem, ext } => name
                .strip_prefix(stem.as_str())
                .and_then(|rest| rest.strip_prefix('-'))
                .and_then(|rest| rest.strip_suffix(ext))
                .and_then(|rest| rest.strip_suffix('.'))
                .map(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
                .unwrap_or(false),
        }
    }
}

/// File name for one artifact of a task.
pub fn artifact_name(task: &str, label: &str, ext: &str) -> String {
    format!("{}-{}.{}", task, label, ext)
}

/// A named extraction job.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExtractionTask {
    pub name: String,
    /// Human-readable source name for logs.
    pub title: String,
    #[serde(flatten)]
    pub recipe: Recipe,
}

impl ExtractionTask {
    /// Every output file name this task writes.
    pub fn output_names(&self) -> OutputNames {
        match &self.recipe {
            Recipe::PdfCrop(r) => OutputNames::Fixed(
                (1..=r.regions.len())
                    .map(|i| artifact_name(&self.name, &i.to_string(), "svg"))
                    .collect(),
            ),
            Recipe::ImageLinks(_) => OutputNames::Numbered {
                stem: self.name.clone(),
                ext: "png",
            },
            Recipe::Screenshot(_) => {
                OutputNames::Fixed(vec![artifact_name(&self.name, "1", "png")])
            }
            Recipe::DirectDownload(r) => OutputNames::Fixed(
                r.documents
                    .iter()
                    .map(|d| artifact_name(&self.name, &d.label, "svg"))
                    .collect(),
            ),
        }
    }

    fn validate(&self) -> Result<()> {
        let err = |msg: String| PipelineError::Catalog(format!("task '{}': {}", self.name, msg));

        if !is_slug(&self.name) {
            return Err(err("name must be lowercase kebab-case".to_string()));
        }

        match &self.recipe {
            Recipe::PdfCrop(r) => {
                compile(&r.link_pattern).map_err(err)?;
                for pattern in r.anchors.values() {
                    compile(pattern).map_err(err)?;
                }
                if r.regions.is_empty() {
                    return Err(err("pdf_crop needs at least one region".to_string()));
                }
                for (i, region) in r.regions.iter().enumerate() {
                    validate_region(region, &r.anchors)
                        .map_err(|m| err(format!("region {}: {}", i + 1, m)))?;
                }
            }
            Recipe::ImageLinks(r) => {
                compile(&r.image_pattern).map_err(err)?;
            }
            Recipe::Screenshot(r) => {
                if r.clip.width == 0 || r.clip.height == 0 {
                    return Err(err("clip must have a positive size".to_string()));
                }
                if let Some(selector) = &r.wait_for {
                    scraper::Selector::parse(selector)
                        .map_err(|e| err(format!("bad wait_for selector {:?}: {}", selector, e)))?;
                }
            }
            Recipe::DirectDownload(r) => {
                if r.documents.is_empty() {
                    return Err(err("direct_download needs at least one document".to_string()));
                }
                for doc in &r.documents {
                    if !is_slug(&doc.label) {
                        return Err(err(format!(
                            "document label {:?} must be lowercase kebab-case",
                            doc.label
                        )));
                    }
                    url::Url::parse(&doc.url)
                        .map_err(|e| err(format!("bad document URL {:?}: {}", doc.url, e)))?;
                }
            }
        }

        Ok(())
    }
}

fn validate_region(
    region: &RegionSpec,
    anchors: &BTreeMap<String, String>,
) -> std::result::Result<(), String> {
    if region.width == 0 || region.height == 0 {
        return Err("width and height must be positive".to_string());
    }
    match &region.anchor {
        Some(name) if !anchors.contains_key(name) => {
            Err(format!("anchor '{}' is not declared", name))
        }
        Some(_) => Ok(()),
        None if region.x.is_anchored() || region.y.is_anchored() => {
            Err("from_anchor position without an anchor".to_string())
        }
        None => match region.page {
            Some(p) if p >= 1 => Ok(()),
            _ => Err("regions without an anchor need a page (1-based)".to_string()),
        },
    }
}

fn compile(pattern: &str) -> std::result::Result<Regex, String> {
    Regex::new(pattern).map_err(|e| format!("bad pattern {:?}: {}", pattern, e))
}

fn is_slug(s: &str) -> bool {
    !s.is_empty()
        && s.split('-').all(|part| {
            !part.is_empty()
                && part
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        })
}

/// The ordered list of tasks.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Catalog {
    #[serde(rename = "task", default)]
    pub tasks: Vec<ExtractionTask>,
}

impl Catalog {
    /// Parse and validate a catalog document.
    pub fn from_toml(source: &str) -> Result<Self> {
        let catalog: Catalog =
            toml::from_str(source).map_err(|e| PipelineError::Catalog(e.to_string()))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// The catalog compiled into the binary.
    pub fn builtin() -> Result<Self> {
        Self::from_toml(BUILTIN_CATALOG)
    }

    /// Load a catalog file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let source =
            std::fs::read_to_string(path).map_err(|e| PipelineError::filesystem(path, e))?;
        Self::from_toml(&source)
    }

    /// Check every task, then check names and outputs across tasks.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for task in &self.tasks {
            task.validate()?;
            if !names.insert(task.name.as_str()) {
                return Err(PipelineError::Catalog(format!(
                    "duplicate task name '{}'",
                    task.name
                )));
            }
        }

        let outputs: Vec<(&str, OutputNames)> = self
            .tasks
            .iter()
            .map(|t| (t.name.as_str(), t.output_names()))
            .collect();

        let mut seen: HashSet<&str> = HashSet::new();
        for (owner, names) in &outputs {
            let OutputNames::Fixed(fixed) = names else {
                continue;
            };
            for name in fixed {
                if !seen.insert(name.as_str()) {
                    return Err(PipelineError::Catalog(format!(
                        "output '{}' is produced more than once (task '{}')",
                        name, owner
                    )));
                }
                for (other, other_names) in &outputs {
                    if other != owner && other_names.could_produce(name) {
                        return Err(PipelineError::Catalog(format!(
                            "output '{}' of task '{}' collides with task '{}'",
                            name, owner, other
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ExtractionTask> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// Tasks to run, in catalog order. An empty filter selects everything.
    pub fn select(&self, only: &[String]) -> Result<Vec<&ExtractionTask>> {
        if let Some(unknown) = only.iter().find(|n| self.get(n).is_none()) {
            return Err(PipelineError::Catalog(format!("unknown task '{}'", unknown)));
        }
        Ok(self
            .tasks
            .iter()
            .filter(|t| only.is_empty() || only.iter().any(|n| n == &t.name))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_order() {
        let catalog = Catalog::builtin().unwrap();
        let names: Vec<&str> = catalog.tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "rki-grippeweb",
                "rki-influenza",
                "rki-corona",
                "rki-ars",
                "rki-corona-heatmap",
                "divi",
                "destatis",
                "google",
                "who",
                "euromomo",
            ]
        );
    }

    #[test]
    fn test_builtin_recipes() {
        let catalog = Catalog::builtin().unwrap();

        let Recipe::PdfCrop(influenza) = &catalog.get("rki-influenza").unwrap().recipe else {
            panic!("rki-influenza should be a pdf_crop recipe");
        };
        assert_eq!(influenza.anchors.len(), 4);
        assert_eq!(
            influenza.regions[1],
            RegionSpec {
                anchor: Some("info2".to_string()),
                page: None,
                x: Position::FromAnchor { from_anchor: 0 },
                y: Position::FromAnchor { from_anchor: -230 },
                width: 600,
                height: 230,
            }
        );
        assert_eq!(influenza.regions[3].x, Position::Absolute(0));

        let Recipe::Screenshot(who) = &catalog.get("who").unwrap().recipe else {
            panic!("who should be a screenshot recipe");
        };
        assert_eq!(who.settle_delay(), Duration::from_secs(6));
        assert_eq!(
            who.clip,
            Clip {
                x: 0,
                y: 330,
                width: 980,
                height: 520
            }
        );

        assert!(!catalog.get("rki-corona-heatmap").unwrap().recipe.needs_browser());
        assert!(catalog.get("divi").unwrap().recipe.needs_browser());
    }

    #[test]
    fn test_divi_output_names() {
        let catalog = Catalog::builtin().unwrap();
        assert_eq!(
            catalog.get("divi").unwrap().output_names(),
            OutputNames::Fixed(vec!["divi-1.svg".to_string(), "divi-2.svg".to_string()])
        );
    }

    #[test]
    fn test_heatmap_output_names_use_labels() {
        let catalog = Catalog::builtin().unwrap();
        let OutputNames::Fixed(names) = catalog.get("rki-corona-heatmap").unwrap().output_names()
        else {
            panic!("direct downloads have fixed names");
        };
        assert_eq!(names[0], "rki-corona-heatmap-bayern.svg");
        assert_eq!(names.len(), 5);
    }

    #[test]
    fn test_numbered_outputs() {
        let names = OutputNames::Numbered {
            stem: "rki-grippeweb".to_string(),
            ext: "png",
        };
        assert!(names.could_produce("rki-grippeweb-1.png"));
        assert!(names.could_produce("rki-grippeweb-12.png"));
        assert!(!names.could_produce("rki-grippeweb-.png"));
        assert!(!names.could_produce("rki-grippeweb-1.svg"));
        assert!(!names.could_produce("rki-grippeweb-x-1.png"));
    }

    #[test]
    fn test_output_collision_rejected() {
        // "x-1" region 1 and "x" document "1-1" both map to x-1-1.svg
        let source = r#"
            [[task]]
            name = "x-1"
            title = "X one"
            kind = "pdf_crop"
            page_url = "https://x.example.org/"
            link_pattern = 'x\.pdf'
            [[task.regions]]
            page = 1
            x = 0
            y = 0
            width = 10
            height = 10

            [[task]]
            name = "x"
            title = "X"
            kind = "direct_download"
            [[task.documents]]
            label = "1-1"
            url = "https://x.example.org/x.pdf"
        "#;
        let err = Catalog::from_toml(source).unwrap_err();
        assert!(matches!(err, PipelineError::Catalog(_)));
        assert!(err.to_string().contains("x-1-1.svg"));
    }

    #[test]
    fn test_duplicate_task_name_rejected() {
        let source = r#"
            [[task]]
            name = "a"
            title = "A"
            kind = "screenshot"
            page_url = "https://a.example.org/"
            clip = { x = 0, y = 0, width = 10, height = 10 }

            [[task]]
            name = "a"
            title = "A again"
            kind = "screenshot"
            page_url = "https://a.example.org/again"
            clip = { x = 0, y = 0, width = 10, height = 10 }
        "#;
        let err = Catalog::from_toml(source).unwrap_err();
        assert!(err.to_string().contains("duplicate task name 'a'"));
    }

    #[test]
    fn test_numbered_outputs_allow_longer_names() {
        // charts-4-1.png is not one of charts-N.png
        let source = r#"
            [[task]]
            name = "charts"
            title = "Charts"
            kind = "image_links"
            page_url = "https://a.example.org/"
            image_pattern = 'x\.png'

            [[task]]
            name = "charts-4"
            title = "Chart four"
            kind = "screenshot"
            page_url = "https://a.example.org/4"
            clip = { x = 0, y = 0, width = 10, height = 10 }
        "#;
        assert!(Catalog::from_toml(source).is_ok());
    }

    #[test]
    fn test_region_validation() {
        let missing_anchor = r#"
            [[task]]
            name = "r"
            title = "R"
            kind = "pdf_crop"
            page_url = "https://r.example.org/"
            link_pattern = 'r\.pdf'
            [[task.regions]]
            anchor = "nope"
            x = 0
            y = { from_anchor = 10 }
            width = 100
            height = 100
        "#;
        let err = Catalog::from_toml(missing_anchor).unwrap_err();
        assert!(err.to_string().contains("anchor 'nope' is not declared"));

        let no_page = r#"
            [[task]]
            name = "r"
            title = "R"
            kind = "pdf_crop"
            page_url = "https://r.example.org/"
            link_pattern = 'r\.pdf'
            [[task.regions]]
            x = 0
            y = 0
            width = 100
            height = 100
        "#;
        assert!(Catalog::from_toml(no_page).is_err());

        let unanchored_offset = r#"
            [[task]]
            name = "r"
            title = "R"
            kind = "pdf_crop"
            page_url = "https://r.example.org/"
            link_pattern = 'r\.pdf'
            [[task.regions]]
            page = 1
            x = { from_anchor = 5 }
            y = 0
            width = 100
            height = 100
        "#;
        assert!(Catalog::from_toml(unanchored_offset).is_err());
    }

    #[test]
    fn test_bad_names_and_patterns() {
        let bad_name = r#"
            [[task]]
            name = "Bad Name"
            title = "X"
            kind = "image_links"
            page_url = "https://x.example.org/"
            image_pattern = 'x'
        "#;
        assert!(Catalog::from_toml(bad_name).is_err());

        let bad_pattern = r#"
            [[task]]
            name = "x"
            title = "X"
            kind = "image_links"
            page_url = "https://x.example.org/"
            image_pattern = '(x'
        "#;
        assert!(Catalog::from_toml(bad_pattern).is_err());
    }

    #[test]
    fn test_select_keeps_catalog_order() {
        let catalog = Catalog::builtin().unwrap();
        let selected = catalog
            .select(&["who".to_string(), "divi".to_string()])
            .unwrap();
        let names: Vec<&str> = selected.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["divi", "who"]);

        assert_eq!(catalog.select(&[]).unwrap().len(), catalog.tasks.len());
        assert!(catalog.select(&["missing".to_string()]).is_err());
    }
}
