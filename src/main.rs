//! Framesight daemon entry point.
//!
//! Loads the pipeline description, starts one worker per valid pipeline and
//! supervises them until every pipeline has finished or an interrupt asks
//! for shutdown. An invalid pipeline is logged and skipped; it never stops
//! the others from running.

use clap::Parser;
use framesight::pipeline::Pipeline;
use framesight::config::RootConfig;
use framesight::stage::Worker;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "framesight", about = "Configurable video-analysis pipeline daemon")]
struct Args {
    /// Pipeline description (JSON)
    #[arg(short, long)]
    config: PathBuf,

    /// Also write daily-rotated log files into this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging; the appender guard must outlive the daemon loop.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,framesight=debug"));
    let _appender_guard = match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "framesight.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
            None
        }
    };

    tracing::info!(config = %args.config.display(), "starting framesight");

    let root = RootConfig::load(&args.config)?;
    let mut workers: Vec<Worker> = Vec::new();
    for config in root.pipeline {
        let name = config.name.clone();
        match Pipeline::new(config) {
            Ok(pipeline) => {
                let mut worker = Worker::new(Box::new(pipeline));
                worker.run();
                workers.push(worker);
            }
            Err(e) => {
                tracing::error!(pipeline = name, error = %e, "invalid pipeline skipped");
            }
        }
    }
    if workers.is_empty() {
        anyhow::bail!("no valid pipelines to run");
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            tracing::info!("interrupt received, shutting down");
            shutdown.store(true, Ordering::SeqCst);
        })?;
    }

    // Supervise: reap pipelines that finish on their own, stop on interrupt.
    while !shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(500));
        workers.retain_mut(|worker| {
            if worker.running() {
                true
            } else {
                tracing::info!(pipeline = worker.name(), "pipeline finished");
                worker.wait();
                false
            }
        });
        if workers.is_empty() {
            tracing::info!("all pipelines finished");
            return Ok(());
        }
    }

    for worker in &mut workers {
        worker.terminate();
    }
    for worker in &mut workers {
        worker.wait();
    }
    tracing::info!("shutdown complete");
    Ok(())
}
