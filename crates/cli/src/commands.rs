use crate::cli::{CacheAction, Cli, Command, RunArgs};
use crate::error::{ErrorKind, Result};
use crate::urls;
use exn::ResultExt;
use freeze_cache::{Cache, MemoryGraph};
use freeze_config::{EnvCredentials, Settings};
use freeze_pipeline::{Pipeline, RunResult, RunStatus};
use freeze_storage::backend::LocalBackend;
use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

/// Exit code for a run that published but had failures along the way.
const EXIT_PARTIAL: u8 = 2;
/// Exit code when another run holds the lease.
const EXIT_BUSY: u8 = 3;

pub async fn dispatch(cli: Cli) -> Result<ExitCode> {
    let config = cli.config.as_deref();
    match cli.command {
        Command::Run(args) => run(config, &args, cli.json).await,
        Command::Cache { action } => cache(config, action, cli.json).await,
        Command::Config => print_config(config),
    }
}

async fn run(config: Option<&Path>, args: &RunArgs, json: bool) -> Result<ExitCode> {
    let settings = Settings::load(config).or_raise(|| ErrorKind::Config)?;
    let urls = urls::read(&args.urls)?;
    let mut pipeline = Pipeline::new(settings.clone()).with_credentials(Arc::new(EnvCredentials));
    match &args.graph {
        Some(graph) if settings.cache.enabled => {
            let graph = MemoryGraph::load(graph).or_raise(|| ErrorKind::Graph(graph.clone()))?;
            pipeline = pipeline.with_cache(Arc::new(open_cache(&settings, graph)?));
        },
        Some(_) => {},
        None => tracing::warn!("No content graph given; every page will be fetched"),
    }
    let result = pipeline.run(&urls).await;
    report(&result, json)?;
    Ok(match result.status {
        RunStatus::Completed => ExitCode::SUCCESS,
        RunStatus::CompletedWithErrors => ExitCode::from(EXIT_PARTIAL),
        RunStatus::AlreadyRunning => ExitCode::from(EXIT_BUSY),
        RunStatus::Failed(_) => ExitCode::FAILURE,
    })
}

fn open_cache(settings: &Settings, graph: MemoryGraph) -> Result<Cache> {
    let backend = LocalBackend::new("cache", settings.cache_dir()).or_raise(|| ErrorKind::Cache)?;
    Ok(Cache::new(Arc::new(backend), Arc::new(graph)))
}

fn status_label(status: &RunStatus) -> String {
    match status {
        RunStatus::Completed => "completed".to_string(),
        RunStatus::CompletedWithErrors => "completed with errors".to_string(),
        RunStatus::AlreadyRunning => "already running".to_string(),
        RunStatus::Failed(reason) => format!("failed: {reason}"),
    }
}

fn report(result: &RunResult, json: bool) -> Result<()> {
    let mut out = std::io::stdout().lock();
    if json {
        let sinks: Vec<_> = result
            .sinks
            .iter()
            .map(|sink| match &sink.result {
                Ok(outcome) => serde_json::json!({ "sink": sink.kind.as_str(), "ok": true, "outcome": outcome.to_string() }),
                Err(error) => serde_json::json!({ "sink": sink.kind.as_str(), "ok": false, "error": error }),
            })
            .collect();
        let summary = serde_json::json!({
            "status": status_label(&result.status),
            "pages": result.pages,
            "from_cache": result.from_cache,
            "failed_urls": result.failed_urls,
            "assets": { "copied": result.assets.copied, "failed": result.assets.failed },
            "excluded": result.excluded,
            "sinks": sinks,
        });
        return writeln!(out, "{summary}").or_raise(|| ErrorKind::Output);
    }
    let mut lines = vec![
        format!("status:   {}", status_label(&result.status)),
        format!("pages:    {} ({} from cache)", result.pages, result.from_cache),
        format!("assets:   {} copied, {} failed", result.assets.copied, result.assets.failed),
    ];
    lines.extend(result.failed_urls.iter().map(|url| format!("failed:   {url}")));
    for sink in &result.sinks {
        match &sink.result {
            Ok(outcome) => lines.push(format!("{:<9} {outcome}", format!("{}:", sink.kind))),
            Err(error) => lines.push(format!("{:<9} error: {error}", format!("{}:", sink.kind))),
        }
    }
    writeln!(out, "{}", lines.join("\n")).or_raise(|| ErrorKind::Output)
}

/// Cache maintenance only needs the cache location, so settings are read
/// without requiring a complete run configuration.
async fn cache(config: Option<&Path>, action: CacheAction, json: bool) -> Result<ExitCode> {
    let settings: Settings = Settings::figment(config).extract().or_raise(|| ErrorKind::Config)?;
    let cache = open_cache(&settings, MemoryGraph::new())?;
    let mut out = std::io::stdout().lock();
    match action {
        CacheAction::Stats => {
            let stats = cache.stats().await.or_raise(|| ErrorKind::Cache)?;
            if json {
                let value = serde_json::json!({ "count": stats.count, "total_bytes": stats.total_bytes });
                writeln!(out, "{value}").or_raise(|| ErrorKind::Output)?;
            } else {
                writeln!(out, "{} cached pages, {} bytes", stats.count, stats.total_bytes).or_raise(|| ErrorKind::Output)?;
            }
        },
        CacheAction::Clear { entity } => {
            let removed = match entity {
                Some(id) => cache.clear_by_entity(id).await,
                None => cache.clear_all().await,
            }
            .or_raise(|| ErrorKind::Cache)?;
            tracing::info!(removed, entity, "Cache cleared");
            if json {
                writeln!(out, "{}", serde_json::json!({ "removed": removed })).or_raise(|| ErrorKind::Output)?;
            } else {
                writeln!(out, "removed {removed} cached pages").or_raise(|| ErrorKind::Output)?;
            }
        },
    }
    Ok(ExitCode::SUCCESS)
}

fn print_config(config: Option<&Path>) -> Result<ExitCode> {
    let settings = Settings::load(config).or_raise(|| ErrorKind::Config)?;
    let rendered = serde_json::to_string_pretty(&settings).or_raise(|| ErrorKind::Output)?;
    writeln!(std::io::stdout().lock(), "{rendered}").or_raise(|| ErrorKind::Output)?;
    Ok(ExitCode::SUCCESS)
}
