//! health-situation: scrape public health statistics into one report.
//!
//! Charts and tables are pulled from a fixed catalog of sources, either as
//! browser screenshots, as crops of published PDF reports, or as downloaded
//! images, and are finally laid out into a single PDF by an HTML template.

pub mod browser;
pub mod catalog;
pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod locator;
pub mod pipeline;
pub mod report;
pub mod tools;

pub use catalog::{Catalog, ExtractionTask, Recipe};
pub use config::{load_settings_with_options, LoadOptions, Settings};
pub use error::{PipelineError, Result};
pub use pipeline::{Pipeline, RunSummary, TaskOutcome, TaskState};
pub use report::{Composer, ReportComposer};
