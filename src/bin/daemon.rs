//! Daemon binary: holds the remote session open and serves local requests.

use std::sync::Arc;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;
use tts_daemon::audio::{AudioOutput, CpalSink, FallbackSink};
use tts_daemon::dispatcher::{Dispatcher, SinkFactory};
use tts_daemon::remote::GeminiLiveOpener;
use tts_daemon::session::SessionManager;
use tts_daemon::supervisor::Supervisor;
use tts_daemon::{paths, Result, TtsError};

fn main() {
    let debug = std::env::args().any(|arg| arg == "--debug");
    let _log_guard = init_tracing(debug);

    match run(debug) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("tts-daemon: {e}");
            std::process::exit(1);
        }
    }
}

/// Installs a non-blocking file writer at `paths::log_path()`. Under
/// `--debug`, also mirrors log lines to standard error. Returns the guard
/// that must stay alive for the process lifetime to flush the background
/// writer thread.
fn init_tracing(debug: bool) -> tracing_appender::non_blocking::WorkerGuard {
    let log_path = paths::log_path();
    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let file_appender = tracing_appender::rolling::never(
        log_path.parent().unwrap_or_else(|| std::path::Path::new(".")),
        log_path.file_name().unwrap_or_else(|| std::ffi::OsStr::new("tts_daemon.log")),
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "tts_daemon=debug" } else { "tts_daemon=info" }));

    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(non_blocking.and(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(non_blocking)
            .init();
    }

    guard
}

fn run(_debug: bool) -> Result<()> {
    let api_key = std::env::var("GEMINI_API_KEY")
        .map_err(|_| TtsError::Fatal("GEMINI_API_KEY is not set".into()))?;

    let runtime = tokio::runtime::Runtime::new().map_err(TtsError::Io)?;
    runtime.block_on(run_async(api_key))
}

async fn run_async(api_key: String) -> Result<()> {
    tracing::info!("tts-daemon starting");

    let opener = Arc::new(GeminiLiveOpener);
    let session_manager = Arc::new(SessionManager::new(opener, api_key));

    let sink_factory: SinkFactory = if CpalSink::new().is_ok() {
        Arc::new(|| -> Box<dyn AudioOutput> {
            match CpalSink::new() {
                Ok(sink) => Box::new(sink),
                Err(e) => {
                    tracing::warn!(error = %e, "output device unavailable for this request, falling back");
                    Box::new(FallbackSink::new())
                }
            }
        })
    } else {
        tracing::warn!("no default output device at startup; using external-player fallback for all requests");
        Arc::new(|| -> Box<dyn AudioOutput> { Box::new(FallbackSink::new()) })
    };

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&session_manager),
        paths::cache_dir(),
        paths::config_path(),
        sink_factory,
    ));

    let supervisor = Supervisor::new(
        paths::pid_path(),
        paths::socket_path(),
        session_manager,
        dispatcher,
    );

    supervisor.claim_single_instance()?;
    let listener = match supervisor.bind_listener() {
        Ok(listener) => listener,
        Err(e) => {
            supervisor.cleanup();
            return Err(e);
        }
    };

    tracing::info!(socket = %paths::socket_path().display(), "listening");
    let result = supervisor.run(listener).await;
    tracing::info!("tts-daemon shut down");
    result
}
