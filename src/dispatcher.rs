//! Owns the local-socket listener; for each accepted connection, reads one
//! text payload and drives either a cache replay or a fresh synthesis turn.

use crate::audio::{AudioOutput, FallbackSink};
use crate::cache;
use crate::config::Config;
use crate::session::SessionManager;
use crate::synthesizer;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

const MAX_REQUEST_BYTES: usize = 4096;
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Constructs the `AudioOutput` used for a request. Chosen once at startup
/// (low-latency `CpalSink` if a device is available, `FallbackSink`
/// otherwise) and shared across every request.
pub type SinkFactory = Arc<dyn Fn() -> Box<dyn AudioOutput> + Send + Sync>;

/// Coordinates one request at a time across all accepted connections.
pub struct Dispatcher {
    session_manager: Arc<SessionManager>,
    cache_dir: PathBuf,
    config_path: PathBuf,
    sink_factory: SinkFactory,
    request_lock: Mutex<()>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        session_manager: Arc<SessionManager>,
        cache_dir: PathBuf,
        config_path: PathBuf,
        sink_factory: SinkFactory,
    ) -> Self {
        Self {
            session_manager,
            cache_dir,
            config_path,
            sink_factory,
            request_lock: Mutex::new(()),
        }
    }

    /// Reads one text payload from an accepted connection and dispatches it.
    /// Accepted connections that are slow to send never block the listener
    /// from accepting further connections, since this runs in its own task.
    pub async fn handle_connection(&self, mut stream: UnixStream) {
        let mut buf = vec![0u8; MAX_REQUEST_BYTES];
        let read = match tokio::time::timeout(READ_TIMEOUT, stream.read(&mut buf)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                warn!(error = %e, "failed to read request");
                return;
            }
            Err(_) => {
                warn!("request read timed out after {:?}", READ_TIMEOUT);
                return;
            }
        };

        let text = match std::str::from_utf8(&buf[..read]) {
            Ok(text) => text.trim(),
            Err(e) => {
                warn!(error = %e, "request was not valid UTF-8");
                return;
            }
        };

        if text.is_empty() {
            return;
        }

        self.dispatch(text).await;
    }

    async fn dispatch(&self, text: &str) {
        let _permit = self.request_lock.lock().await;

        let config = Config::load(&self.config_path);
        let truncated: String = text.chars().take(config.max_chars).collect();
        let cache_path = cache::path_for(&truncated, &config, &self.cache_dir);

        if cache::exists(&cache_path) {
            match cache::read(&cache_path) {
                Ok(pcm) => {
                    info!(path = %cache_path.display(), "cache hit");
                    self.play_pcm(&pcm).await;
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "cache entry unreadable, treating as miss");
                }
            }
        }

        let mut sink = (self.sink_factory)();
        let outcome =
            synthesizer::synthesize(&self.session_manager, &config, &truncated, Some(&mut *sink))
                .await;

        Self::finalize_sink(sink).await;

        if outcome.sink_failed {
            warn!("audio sink failed mid-stream; replaying through the external-player fallback");
            if let Some(pcm) = &outcome.pcm {
                Self::replay_via_fallback(pcm.clone()).await;
            }
        }

        if let Some(pcm) = outcome.pcm {
            cache::write_best_effort(&cache_path, &pcm);
        }
    }

    async fn play_pcm(&self, pcm: &[u8]) {
        let mut sink = (self.sink_factory)();
        let feed_result = sink.feed(pcm);
        if let Err(e) = &feed_result {
            warn!(error = %e, "audio sink failed to accept cached audio; will replay through the external-player fallback");
        }

        Self::finalize_sink(sink).await;

        if feed_result.is_err() {
            Self::replay_via_fallback(pcm.to_vec()).await;
        }
    }

    /// Runs `finish()` and `wait_done()` on a worker thread, since both may
    /// block on real audio device I/O or an external player's exit.
    async fn finalize_sink(mut sink: Box<dyn AudioOutput>) {
        let result = tokio::task::spawn_blocking(move || {
            let finish_result = sink.finish();
            let wait_result = sink.wait_done();
            (finish_result, wait_result)
        })
        .await;

        match result {
            Ok((finish_result, wait_result)) => {
                if let Err(e) = finish_result {
                    error!(error = %e, "failed to finalize audio sink");
                }
                if let Err(e) = wait_result {
                    error!(error = %e, "failed waiting for playback to finish");
                }
            }
            Err(e) => error!(error = %e, "audio finalize task panicked"),
        }
    }

    /// Replays already-collected PCM through a fresh `FallbackSink`, used
    /// when the primary sink's device was lost mid-turn or on cache replay.
    async fn replay_via_fallback(pcm: Vec<u8>) {
        let result = tokio::task::spawn_blocking(move || {
            let mut fallback = FallbackSink::new();
            fallback.feed(&pcm)?;
            fallback.finish()?;
            fallback.wait_done()
        })
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "fallback replay failed"),
            Err(e) => error!(error = %e, "fallback replay task panicked"),
        }
    }
}
