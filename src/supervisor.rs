//! Writes the PID marker, installs signal handlers, starts and stops the
//! listener and session, and enforces single-instance operation.

use crate::dispatcher::Dispatcher;
use crate::error::{Result, TtsError};
use crate::session::SessionManager;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::UnixListener;
use tracing::{error, info, warn};

/// Checks whether a process with the given PID is alive, using the
/// zero-signal liveness probe (`kill(pid, 0)` succeeds iff the process
/// exists and is visible to this user).
fn process_is_alive(pid: i32) -> bool {
    // SAFETY: signal 0 sends no signal; it only probes for the process's
    // existence and our permission to signal it.
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Returns the PID recorded in a live PID marker, or `None` if the marker is
/// absent, unreadable, or names a process that is no longer running.
fn live_pid(pid_path: &Path) -> Option<i32> {
    let content = std::fs::read_to_string(pid_path).ok()?;
    let pid: i32 = content.trim().parse().ok()?;
    process_is_alive(pid).then_some(pid)
}

/// Runs the daemon for its entire lifetime: refuses to start if another
/// instance is live, otherwise owns the listener, the session connect loop,
/// and graceful shutdown on SIGINT/SIGTERM.
pub struct Supervisor {
    pid_path: PathBuf,
    socket_path: PathBuf,
    session_manager: Arc<SessionManager>,
    dispatcher: Arc<Dispatcher>,
}

impl Supervisor {
    #[must_use]
    pub fn new(
        pid_path: PathBuf,
        socket_path: PathBuf,
        session_manager: Arc<SessionManager>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            pid_path,
            socket_path,
            session_manager,
            dispatcher,
        }
    }

    /// Refuses to run if a prior instance is live. On success, writes the
    /// PID marker and returns; the caller is responsible for cleanup via
    /// [`Supervisor::shutdown`] on all exit paths.
    pub fn claim_single_instance(&self) -> Result<()> {
        if let Some(pid) = live_pid(&self.pid_path) {
            return Err(TtsError::Fatal(format!(
                "TTS daemon is already running (pid {pid})"
            )));
        }
        if let Some(parent) = self.pid_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.pid_path, std::process::id().to_string())?;
        Ok(())
    }

    /// Unlinks a stale socket node, binds the listener, and sets its mode to
    /// `0o666` per spec.md §6.
    pub fn bind_listener(&self) -> Result<UnixListener> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(&self.socket_path)?;
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o666))?;
        Ok(listener)
    }

    /// Runs the accept loop, the session connect loop, and waits for
    /// SIGINT/SIGTERM, then tears everything down.
    pub async fn run(&self, listener: UnixListener) -> Result<()> {
        let session_manager = Arc::clone(&self.session_manager);
        let config_path = crate::paths::config_path();
        let connect_loop = tokio::spawn(async move {
            session_manager
                .run_connect_loop(move || crate::config::Config::load(&config_path))
                .await;
        });

        let dispatcher = Arc::clone(&self.dispatcher);
        let accept_loop = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _addr)) => {
                        let dispatcher = Arc::clone(&dispatcher);
                        tokio::spawn(async move {
                            dispatcher.handle_connection(stream).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                    }
                }
            }
        });

        wait_for_shutdown_signal().await;
        info!("shutdown signal received");

        connect_loop.abort();
        accept_loop.abort();
        self.session_manager.close().await;
        self.cleanup();
        Ok(())
    }

    /// Removes the socket node and PID marker. Idempotent.
    pub fn cleanup(&self) {
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, "failed to remove socket node");
            }
        }
        if let Err(e) = std::fs::remove_file(&self.pid_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, "failed to remove PID marker");
            }
        }
    }
}

async fn wait_for_shutdown_signal() {
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
    {
        Ok(signal) => signal,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
            unreachable!()
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_is_alive_true_for_self() {
        assert!(process_is_alive(std::process::id() as i32));
    }

    #[test]
    fn process_is_alive_false_for_unlikely_pid() {
        assert!(!process_is_alive(i32::MAX - 1));
    }

    #[test]
    fn live_pid_none_when_marker_missing() {
        assert!(live_pid(Path::new("/nonexistent/tts_daemon.pid")).is_none());
    }

    #[test]
    fn live_pid_none_when_marker_names_dead_process() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tts_daemon.pid");
        std::fs::write(&path, (i32::MAX - 1).to_string()).expect("write");
        assert!(live_pid(&path).is_none());
    }

    #[test]
    fn live_pid_some_when_marker_names_self() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tts_daemon.pid");
        std::fs::write(&path, std::process::id().to_string()).expect("write");
        assert_eq!(live_pid(&path), Some(std::process::id() as i32));
    }

    #[test]
    fn claim_single_instance_fails_when_pid_file_names_self() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pid_path = dir.path().join("tts_daemon.pid");
        std::fs::write(&pid_path, std::process::id().to_string()).expect("write");

        let opener = Arc::new(crate::remote::GeminiLiveOpener);
        let session_manager = Arc::new(SessionManager::new(opener, "key".to_owned()));
        let sink_factory: crate::dispatcher::SinkFactory =
            Arc::new(|| Box::new(crate::audio::FallbackSink::new()));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&session_manager),
            dir.path().join("cache"),
            dir.path().join("tts_config.json"),
            sink_factory,
        ));
        let supervisor = Supervisor::new(
            pid_path,
            dir.path().join("tts.sock"),
            session_manager,
            dispatcher,
        );

        assert!(supervisor.claim_single_instance().is_err());
    }
}
