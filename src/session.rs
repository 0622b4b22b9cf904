//! Maintains at most one live streaming session to the remote speech
//! service: the reconnect loop, backoff, and config-drift session rebuild.

use crate::config::{Config, SessionShape};
use crate::error::{Result, TtsError};
use crate::remote::{SessionOpener, SpeechSession};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

const BASE_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);
const HEALTHY_SLEEP: Duration = Duration::from_secs(5);

/// Doubling backoff capped at 30 seconds: 1, 2, 4, 8, 16, 30, 30, ...
#[must_use]
pub fn backoff_for_attempt(attempt: u32) -> Duration {
    BASE_RECONNECT_DELAY
        .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
        .min(MAX_RECONNECT_DELAY)
}

struct SharedState {
    session: Option<Box<dyn SpeechSession>>,
    active_shape: Option<SessionShape>,
    reconnect_delay: Duration,
}

/// Owns the single live session, guarded by an async mutex so the connect
/// loop and the Synthesizer (serialized by the Dispatcher) never race.
pub struct SessionManager {
    opener: Arc<dyn SessionOpener>,
    api_key: String,
    state: Arc<Mutex<SharedState>>,
}

impl SessionManager {
    #[must_use]
    pub fn new(opener: Arc<dyn SessionOpener>, api_key: String) -> Self {
        Self {
            opener,
            api_key,
            state: Arc::new(Mutex::new(SharedState {
                session: None,
                active_shape: None,
                reconnect_delay: BASE_RECONNECT_DELAY,
            })),
        }
    }

    /// Tears down the session (if any) whose shape no longer matches
    /// `config`, per spec.md §3's config-drift invariant.
    pub async fn close_if_drifted(&self, config: &Config) {
        let mut state = self.state.lock().await;
        let drifted = match &state.active_shape {
            Some(shape) => *shape != config.session_shape(),
            None => false,
        };
        if drifted {
            state.session = None;
            state.active_shape = None;
        }
    }

    /// Closes the session unconditionally. Idempotent; always clears
    /// `session` and `active_shape` even if no session was open.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.session = None;
        state.active_shape = None;
    }

    /// Returns true if a session is currently open.
    pub async fn has_session(&self) -> bool {
        self.state.lock().await.session.is_some()
    }

    /// Runs one synthesis turn against the current (or freshly-opened)
    /// session, invoking `on_event` for each response event.
    ///
    /// Opens a session lazily if none is open. On transport failure the
    /// session is torn down so the next request reconnects on demand.
    pub async fn send_turn(
        &self,
        config: &Config,
        text: &str,
        on_event: &mut (dyn FnMut(crate::remote::SessionEvent) + Send),
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.session.is_none() {
            let session = self
                .opener
                .open(config, &self.api_key)
                .await
                .map_err(|e| {
                    warn!(error = %e, "failed to open remote speech session");
                    e
                })?;
            state.session = Some(session);
            state.active_shape = Some(config.session_shape());
        }

        let Some(session) = state.session.as_mut() else {
            return Err(TtsError::Transport("session unexpectedly absent".into()));
        };

        let result = session.send_turn(text, on_event).await;
        if result.is_err() {
            state.session = None;
            state.active_shape = None;
        }
        result
    }

    /// The connect loop: while disconnected, attempts to connect with
    /// doubling backoff; while connected, sleeps and re-checks. Runs for the
    /// daemon's lifetime. Never triggers reconnect on idleness alone.
    pub async fn run_connect_loop(&self, config_provider: impl Fn() -> Config) {
        let mut attempt: u32 = 0;
        loop {
            let connected = self.has_session().await;
            if connected {
                tokio::time::sleep(HEALTHY_SLEEP).await;
                continue;
            }

            let config = config_provider();
            let mut state = self.state.lock().await;
            if state.session.is_some() {
                drop(state);
                continue;
            }
            match self.opener.open(&config, &self.api_key).await {
                Ok(session) => {
                    state.session = Some(session);
                    state.active_shape = Some(config.session_shape());
                    state.reconnect_delay = BASE_RECONNECT_DELAY;
                    attempt = 0;
                    info!("remote speech session connected");
                }
                Err(e) => {
                    let delay = backoff_for_attempt(attempt);
                    attempt = attempt.saturating_add(1);
                    state.reconnect_delay = delay;
                    drop(state);
                    warn!(error = %e, delay_secs = delay.as_secs(), "reconnect attempt failed");
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::tests::FakeSession;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeOpener {
        fail_times: AtomicUsize,
        opens: AtomicUsize,
    }

    #[async_trait]
    impl SessionOpener for FakeOpener {
        async fn open(
            &self,
            _config: &Config,
            _api_key: &str,
        ) -> Result<Box<dyn SpeechSession>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.fail_times.load(Ordering::SeqCst) > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                return Err(TtsError::Transport("simulated handshake failure".into()));
            }
            Ok(Box::new(FakeSession {
                chunks: vec![vec![1, 2]],
                fail: false,
            }))
        }
    }

    #[test]
    fn backoff_schedule_matches_spec() {
        let expected = [1, 2, 4, 8, 16, 30, 30];
        for (attempt, &secs) in expected.iter().enumerate() {
            assert_eq!(backoff_for_attempt(attempt as u32).as_secs(), secs);
        }
    }

    #[tokio::test]
    async fn send_turn_opens_session_lazily() {
        let opener = Arc::new(FakeOpener {
            fail_times: AtomicUsize::new(0),
            opens: AtomicUsize::new(0),
        });
        let manager = SessionManager::new(opener.clone(), "key".to_owned());
        assert!(!manager.has_session().await);

        let config = Config::default();
        let mut events = Vec::new();
        manager
            .send_turn(&config, "hi", &mut |_| events.push(()))
            .await
            .expect("send_turn");

        assert!(manager.has_session().await);
        assert_eq!(opener.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_if_drifted_tears_down_on_voice_change() {
        let opener = Arc::new(FakeOpener {
            fail_times: AtomicUsize::new(0),
            opens: AtomicUsize::new(0),
        });
        let manager = SessionManager::new(opener, "key".to_owned());
        let mut config = Config::default();
        manager
            .send_turn(&config, "hi", &mut |_| {})
            .await
            .expect("send_turn");
        assert!(manager.has_session().await);

        config.voice = crate::config::Voice::Kore;
        manager.close_if_drifted(&config).await;
        assert!(!manager.has_session().await);
    }

    #[tokio::test]
    async fn close_if_drifted_keeps_session_on_unrelated_field() {
        let opener = Arc::new(FakeOpener {
            fail_times: AtomicUsize::new(0),
            opens: AtomicUsize::new(0),
        });
        let manager = SessionManager::new(opener, "key".to_owned());
        let mut config = Config::default();
        manager
            .send_turn(&config, "hi", &mut |_| {})
            .await
            .expect("send_turn");

        config.max_chars = 42;
        manager.close_if_drifted(&config).await;
        assert!(manager.has_session().await);
    }

    #[tokio::test]
    async fn send_turn_closes_session_on_transport_failure() {
        struct FailingOpener;
        #[async_trait]
        impl SessionOpener for FailingOpener {
            async fn open(
                &self,
                _config: &Config,
                _api_key: &str,
            ) -> Result<Box<dyn SpeechSession>> {
                Ok(Box::new(FakeSession {
                    chunks: vec![],
                    fail: true,
                }))
            }
        }

        let manager = SessionManager::new(Arc::new(FailingOpener), "key".to_owned());
        let config = Config::default();
        let result = manager.send_turn(&config, "hi", &mut |_| {}).await;
        assert!(result.is_err());
        assert!(!manager.has_session().await);
    }
}
