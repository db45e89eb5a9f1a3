use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use console::style;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use health_situation::catalog::Catalog;
use health_situation::config::{load_dotenv_file, load_settings_with_options, LoadOptions};
use health_situation::pipeline::Pipeline;
use health_situation::report::{Composer, ReportComposer};

/// Scrape current health situation charts and compose them into one PDF.
#[derive(Parser, Debug)]
#[command(name = "health-situation", version, about)]
struct Cli {
    /// Configuration file (JSON); discovered automatically when omitted
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Remote browser DevTools endpoint (ws:// or http://)
    #[arg(long, env = "BROWSER_URL", value_name = "URL")]
    browser_url: Option<String>,

    /// Run only this task (repeatable); catalog order is kept
    #[arg(long = "only", value_name = "TASK")]
    only: Vec<String>,

    /// Skip rendering the report
    #[arg(long)]
    no_report: bool,

    /// List catalog tasks and exit
    #[arg(long)]
    list: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // .env must be loaded before clap reads BROWSER_URL
    let dotenv = load_dotenv_file(Path::new(".env"));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("health_situation=info")),
        )
        .init();

    if let Err(e) = dotenv {
        warn!("{}", e);
    }

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = load_settings_with_options(LoadOptions {
        config_path: cli.config.clone(),
        browser_url: cli.browser_url.clone(),
    })
    .await
    .context("Failed to load settings")?;

    let catalog = match &settings.catalog_path {
        Some(path) => Catalog::from_path(path)
            .with_context(|| format!("Failed to load catalog {}", path.display()))?,
        None => Catalog::builtin().context("Built-in catalog is invalid")?,
    };

    if cli.list {
        list_tasks(&catalog);
        return Ok(());
    }

    let tasks = catalog.select(&cli.only)?;
    if tasks.iter().any(|t| t.recipe.needs_browser()) {
        settings.require_browser_url()?;
    }

    settings
        .ensure_directories()
        .context("Failed to create working directories")?;

    let pipeline = Pipeline::from_settings(&settings)?;
    let composer = ReportComposer::from_settings(&settings);
    let composer: Option<&dyn Composer> = if cli.no_report {
        None
    } else {
        Some(&composer)
    };

    let summary = pipeline.run_then_compose(&tasks, composer).await?;

    info!(
        "{} task(s), {} artifact(s)",
        summary.outcomes.len(),
        summary.artifact_count()
    );
    if let Some(report) = &summary.report {
        println!("{} Report written to {}", style("✓").green(), report.display());
    }

    Ok(())
}

fn list_tasks(catalog: &Catalog) {
    println!("\n{}", style("Tasks").bold());
    println!("{}", "-".repeat(60));
    println!("{:<22} {:<16} Title", "Name", "Kind");
    println!("{}", "-".repeat(60));
    for task in &catalog.tasks {
        println!(
            "{:<22} {:<16} {}",
            style(&task.name).cyan(),
            task.recipe.kind(),
            task.title
        );
    }
}
