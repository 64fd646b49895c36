use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use issuelens_common::{Config, RawIssueRecord, Stage};
use issuelens_pipeline::bootstrap::{build_pipeline, connect_backend, Backend};
use issuelens_pipeline::traits::{IssueSource, ReportSink};

#[derive(Parser)]
#[command(name = "issuelens", about = "Extract, cluster and summarize problems from support issues")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline for a project in the foreground.
    Run {
        #[arg(long)]
        project: String,
        /// 1 = extract then analyse, 2 = analyse only.
        #[arg(long, default_value_t = 1)]
        stage: u8,
        /// Import this JSON array of raw issues first (handy without a database).
        #[arg(long)]
        issues: Option<PathBuf>,
    },
    /// Load raw issues from a JSON array file into the store.
    Import {
        #[arg(long)]
        file: PathBuf,
        /// Project id stamped on records that lack one.
        #[arg(long)]
        project: Option<String>,
        /// Source filter stamped on records that lack one.
        #[arg(long)]
        source_filter: Option<String>,
    },
    /// Print the stored report for a project as JSON.
    Report {
        #[arg(long)]
        project: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("issuelens=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    config.log_redacted();

    let backend = connect_backend(&config).await?;

    match cli.command {
        Command::Run {
            project,
            stage,
            issues,
        } => {
            let Some(stage) = Stage::from_wire(stage) else {
                bail!("--stage must be 1 or 2, got {stage}");
            };
            if let Some(path) = issues {
                let filter = config.source_filter.clone();
                import(&backend, &path, Some(project.clone()), Some(filter)).await?;
            }
            let pipeline = build_pipeline(&config, &backend)?;
            let stats = pipeline.run(&project, stage).await?;
            info!("{stats}");
        }
        Command::Import {
            file,
            project,
            source_filter,
        } => {
            import(&backend, &file, project, source_filter).await?;
        }
        Command::Report { project } => match backend.reports.latest_report(&project).await? {
            Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
            None => bail!("no report stored for project {project}"),
        },
    }

    Ok(())
}

async fn import(
    backend: &Backend,
    path: &Path,
    project: Option<String>,
    source_filter: Option<String>,
) -> Result<usize> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut issues: Vec<RawIssueRecord> = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a JSON array of issues", path.display()))?;

    for issue in &mut issues {
        if let Some(project) = &project {
            if issue.project_id.is_empty() {
                issue.project_id = project.clone();
            }
        }
        if let Some(filter) = &source_filter {
            if issue.source_filter.is_empty() {
                issue.source_filter = filter.clone();
            }
        }
    }

    let saved = backend.source.save_issues(&issues).await?;
    info!(path = %path.display(), saved, "Raw issues imported");
    Ok(saved)
}
