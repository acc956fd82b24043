mod replay;

use std::path::PathBuf;
use std::sync::Arc;

use slidewatch_common::config::Config;
use slidewatch_common::job::{QueueFile, QueueFileError};
use slidewatch_engine::db::{SlideDb, SlideDbError};
use slidewatch_engine::orchestrator::{JobOutcome, OrchestratorError, QueueEvent, TaskOrchestrator};
use slidewatch_engine::ports::ProgressError;
use slidewatch_engine::progress::HttpProgressResetter;
use slidewatch_engine::storage::DirectorySink;
use tracing::{error, info, warn};

use replay::ReplaySurface;

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("queue file error: {0}")]
    Queue(#[from] QueueFileError),
    #[error("slide index error: {0}")]
    SlideDb(#[from] SlideDbError),
    #[error("progress client error: {0}")]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

#[tokio::main]
async fn main() {
    let mut args = std::env::args().skip(1);
    let config_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));
    let queue_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("queue.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        queue = queue_path.display().to_string(),
        method = ?config.comparison.method,
        poll_secs = config.capture.poll_interval_secs,
        output = config.output.dir,
        "starting slidewatch"
    );

    if let Err(e) = run(config, &queue_path).await {
        error!(error = %e, "slidewatch failed");
        eprintln!("slidewatch: {e}");
        std::process::exit(1);
    }
}

async fn run(config: Config, queue_path: &std::path::Path) -> Result<(), RunnerError> {
    let queue = QueueFile::load(queue_path)?;

    let output_dir = PathBuf::from(&config.output.dir);
    let db = if config.output.index_db {
        Some(Arc::new(SlideDb::open(&output_dir)?))
    } else {
        None
    };
    let sink = Arc::new(DirectorySink::new(output_dir, db));
    let player = Arc::new(ReplaySurface::default());
    let progress = HttpProgressResetter::from_config(&config.progress)?;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut orchestrator = TaskOrchestrator::new(config, player, sink).with_events(tx);
    if let Some(progress) = progress {
        orchestrator = orchestrator.with_progress_resetter(Arc::new(progress));
    }
    for job in queue.jobs {
        orchestrator.enqueue(job);
    }

    let cancel = orchestrator.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling after the current tick");
            cancel.cancel();
        }
    });

    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                QueueEvent::JobStarted { id } => info!(job = id, "job started"),
                QueueEvent::JobCompleted { id, slides } => info!(job = id, slides, "job done"),
                QueueEvent::JobFailed { id, reason } => warn!(job = id, reason, "job failed"),
                QueueEvent::QueueFinished => info!("all jobs processed"),
                QueueEvent::Cancelled => warn!("queue cancelled"),
            }
        }
    });

    let report = orchestrator.start().await?;
    for job in &report.jobs {
        match &job.outcome {
            JobOutcome::Completed { slides } => info!(job = job.id, slides, "completed"),
            JobOutcome::Failed { reason } => warn!(job = job.id, reason = %reason, "failed"),
            JobOutcome::Cancelled => warn!(job = job.id, "cancelled"),
        }
    }
    let remaining: Vec<&str> = orchestrator.pending().map(|j| j.id.as_str()).collect();
    if !remaining.is_empty() {
        info!(remaining = ?remaining, "jobs left in queue");
    }
    Ok(())
}
