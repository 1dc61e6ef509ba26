//! # Voice Relay - Main Application Entry Point
//!
//! Wires the relay core to a console front-end and a file (or discarding)
//! voice sink.
//!
//! ## Tasks:
//! - **control**: control channel, supervised
//! - **audio**: audio channel, supervised
//! - **pacer**: playback pacer feeding the voice sink
//! - **dispatcher**: logs responses from the music server
//! - **console**: reads commands from stdin
//! - **stats**: periodic relay statistics
//!
//! The process exits when either channel terminates (non-zero, so a process
//! manager restarts it) or on SIGINT/SIGTERM (zero).

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use voice_relay::audio::{AudioChannel, FileSink, NullSink, PlaybackPacer, VoiceSink};
use voice_relay::config::AppConfig;
use voice_relay::console::{dispatch_responses, run_console, LoggingHandler};
use voice_relay::control::ControlChannel;
use voice_relay::supervisor::supervise;
use voice_relay::{CommandRecord, RelayContext, RelayResult, Termination};

/// How long the pacer and dispatcher get to drain after shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // It's fine if there's no .env file
    dotenv::dotenv().ok();

    let config = AppConfig::load()?;
    init_tracing(&config.logging.filter);
    config.validate()?;

    info!("Starting voice-relay v{}", env!("CARGO_PKG_VERSION"));
    info!(
        cmd = %config.endpoints.cmd_endpoint,
        stream = %config.endpoints.stream_endpoint,
        "Configuration loaded"
    );

    let ctx = RelayContext::new(&config.queues);
    setup_signal_handlers(ctx.clone());

    // The sink is the voice destination: once it is open we count as joined
    let sink: Box<dyn VoiceSink> = match &config.playback.sink_path {
        Some(path) => Box::new(FileSink::create(path)?),
        None => Box::new(NullSink::default()),
    };
    let pacer = tokio::spawn(PlaybackPacer::new(ctx.clone(), sink, &config.playback).run());
    ctx.post(CommandRecord::new(config.control.ready_sentinel.clone())).await?;

    let control = Arc::new(ControlChannel::new(
        ctx.clone(),
        &config.endpoints,
        config.control.clone(),
    ));
    let mut control_task = spawn_supervised("control", &ctx, &config, move || {
        let control = control.clone();
        async move { control.run().await }
    });

    let audio = Arc::new(AudioChannel::new(ctx.clone(), &config.endpoints, config.audio.clone()));
    let mut audio_task = spawn_supervised("audio", &ctx, &config, move || {
        let audio = audio.clone();
        async move { audio.run().await }
    });

    let dispatcher = tokio::spawn(dispatch_responses(ctx.clone(), LoggingHandler));
    let console = tokio::spawn(run_console(
        ctx.clone(),
        tokio::io::BufReader::new(tokio::io::stdin()),
    ));
    let stats = spawn_stats_logger(ctx.clone(), config.logging.stats_interval_secs);

    // Wait for the first channel to stop, or for a shutdown signal
    let (component, outcome) = tokio::select! {
        result = &mut control_task => ("control", flatten(result)),
        result = &mut audio_task => ("audio", flatten(result)),
        _ = ctx.shutdown.cancelled() => ("signal", Ok(Termination::Shutdown)),
    };

    ctx.shutdown();
    console.abort();
    stats.abort();

    for (name, task) in [("control", control_task), ("audio", audio_task)] {
        if !task.is_finished() {
            if tokio::time::timeout(DRAIN_TIMEOUT, task).await.is_err() {
                warn!(component = name, "Channel did not stop in time");
            }
        }
    }
    match tokio::time::timeout(DRAIN_TIMEOUT, pacer).await {
        Ok(Ok(played)) => info!(frames = played.frames_played, batches = played.batches, "Playback drained"),
        Ok(Err(e)) => error!("Pacer task error: {}", e),
        Err(_) => warn!("Playback pacer did not drain in time"),
    }
    if let Ok(Ok(handled)) = tokio::time::timeout(DRAIN_TIMEOUT, dispatcher).await {
        info!(responses = handled, "Dispatcher stopped");
    }

    let snapshot = ctx.metrics_snapshot();
    info!(?snapshot, "Final relay statistics");

    match outcome {
        Ok(Termination::Shutdown) => {
            info!("Relay stopped gracefully");
            Ok(())
        }
        Ok(termination) => Err(anyhow::anyhow!("{} channel terminated: {}", component, termination)),
        Err(e) => Err(anyhow::anyhow!("{} channel failed: {}", component, e)),
    }
}

/// Initialize structured logging.
///
/// `RUST_LOG` wins over the configured filter when it is set.
fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn spawn_supervised<F, Fut>(
    component: &'static str,
    ctx: &Arc<RelayContext>,
    config: &AppConfig,
    start: F,
) -> JoinHandle<RelayResult<Termination>>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = RelayResult<Termination>> + Send + 'static,
{
    let policy = config.supervisor.clone();
    let shutdown = ctx.shutdown.clone();
    tokio::spawn(async move { supervise(component, &policy, &shutdown, start).await })
}

fn flatten(
    result: Result<RelayResult<Termination>, tokio::task::JoinError>,
) -> RelayResult<Termination> {
    match result {
        Ok(outcome) => outcome,
        Err(e) => Ok(Termination::Transport(format!("task panicked: {}", e))),
    }
}

/// Cancel the relay on SIGINT (Ctrl+C) or SIGTERM.
fn setup_signal_handlers(ctx: Arc<RelayContext>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = sigterm.recv() => info!("Received SIGTERM"),
                        _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                    }
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("Received SIGINT");
                    }
                }
            }
        }
        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received SIGINT");
            }
        }
        ctx.shutdown();
    });
}

fn spawn_stats_logger(ctx: Arc<RelayContext>, interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        if interval_secs == 0 {
            return;
        }
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let s = ctx.metrics_snapshot();
            info!(
                commands = s.commands_sent,
                responses = s.responses_received,
                frames_in = s.frames_received,
                frames_out = s.frames_played,
                dropped = s.frames_dropped,
                queued = s.frames_queued,
                sink_errors = s.sink_errors,
                uptime = s.uptime_seconds,
                "Relay stats"
            );
        }
    })
}
