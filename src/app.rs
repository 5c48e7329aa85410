use crate::cli::{ContextArgs, Overrides, RunArgs};
use fetchpool::batch::{Batch, BatchContext};
use fetchpool::config::Config;
use fetchpool::dispatch::{
    AnyError, ContextError, ContextId, DispatchReport, Isolation, ProcessDispatcher, ProcessLauncher,
    TaskLauncher,
};
use fetchpool::sink::SynchronizedSink;
use fetchpool::worker::{Fetcher, HttpFetcher};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Fan every configured batch out to its own execution context
pub async fn run(args: RunArgs) -> Result<(), AnyError> {
    let mut config = load_config(&args.overrides)?;
    args.apply(&mut config);
    config.validate()?;

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let dispatcher = ProcessDispatcher::new(config.dispatcher.parallelism);
    let batches = config.batches.clone();
    let names: Vec<String> = batches.iter().map(|b| b.name.clone()).collect();

    info!(
        batches = batches.len(),
        workers = config.pool.workers,
        parallelism = dispatcher.parallelism(),
        isolation = ?config.dispatcher.isolation,
        "Starting fetch run"
    );

    let report = match config.dispatcher.isolation {
        Isolation::Process => {
            let program = std::env::current_exe()?;
            let child_args = args.overrides.to_args(&config);
            let launcher = ProcessLauncher::new(program, move |context: ContextId, batch: &Batch| {
                let mut argv = vec![
                    "context".to_string(),
                    "--batch".to_string(),
                    batch.name.clone(),
                    "--context-id".to_string(),
                    context.index().to_string(),
                ];
                argv.extend(child_args.iter().cloned());
                argv
            })
            .with_shutdown(shutdown.clone());

            dispatcher.dispatch(batches, Arc::new(launcher)).await
        }
        Isolation::Task => {
            let config = Arc::new(config);
            let launcher = TaskLauncher::new(move |context: ContextId, batch: Batch| {
                let config = Arc::clone(&config);
                let shutdown = shutdown.clone();
                async move {
                    run_batch(&config, context, &batch, shutdown).await?;
                    Ok::<(), AnyError>(())
                }
            });

            dispatcher.dispatch(batches, Arc::new(launcher)).await
        }
    };

    summarize(&report, &names)
}

/// Fetch one batch in this process; used by process isolation
pub async fn run_context(args: ContextArgs) -> Result<(), AnyError> {
    let mut config = load_config(&args.overrides)?;
    args.overrides.apply(&mut config);
    config.validate()?;

    let batch = config
        .batch(&args.batch)
        .cloned()
        .ok_or_else(|| format!("batch '{}' is not configured", args.batch))?;

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    info!(
        context = args.context_id,
        pid = std::process::id(),
        batch = %batch.name,
        "Context process started"
    );

    run_batch(&config, ContextId(args.context_id), &batch, shutdown).await
}

/// Build a context-local fetcher, sink and pool, then drain the batch
async fn run_batch(
    config: &Config,
    context: ContextId,
    batch: &Batch,
    shutdown: CancellationToken,
) -> Result<(), AnyError> {
    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(&config.http.to_http_config())?);

    let ctx = BatchContext {
        label: context.to_string(),
        workers: config.pool.workers,
        fetcher,
        sink: Arc::new(SynchronizedSink::stdout(config.output.format)),
        shutdown,
    };

    ctx.run(batch).await.map_err(ContextError::from)?;
    Ok(())
}

fn load_config(overrides: &Overrides) -> Result<Config, AnyError> {
    // Validation runs after CLI overrides are applied
    Ok(Config::load_unvalidated(overrides.config.clone())?)
}

fn summarize(report: &DispatchReport, names: &[String]) -> Result<(), AnyError> {
    for outcome in report.failures() {
        let name = names
            .get(outcome.context.index())
            .map(String::as_str)
            .unwrap_or("?");
        error!(
            context = %outcome.context,
            batch = name,
            status = %outcome.status,
            "Context produced no complete result"
        );
    }

    info!(
        contexts = report.len(),
        completed = report.completed(),
        "Fetch run finished"
    );

    if report.all_completed() {
        Ok(())
    } else {
        Err(format!(
            "{} of {} contexts did not complete",
            report.len() - report.completed(),
            report.len()
        )
        .into())
    }
}

/// Cancel `shutdown` on Ctrl+C or SIGTERM
async fn cancel_on_signal(shutdown: CancellationToken) {
    tokio::select! {
        _ = shutdown_signal() => shutdown.cancel(),
        _ = shutdown.cancelled() => {}
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
