//! Single-turn request/response over the live session: sends one user
//! content message, fans out audio chunks to the collector and the sink.

use crate::audio::AudioOutput;
use crate::config::Config;
use crate::remote::SessionEvent;
use crate::session::SessionManager;
use tracing::warn;

/// Outcome of one synthesis turn.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SynthesisOutcome {
    /// The concatenated PCM bytes in receive order, or `None` if the turn
    /// produced no audio (logged at WARN) or the session could not be
    /// reached (logged by the Session Manager).
    pub pcm: Option<Vec<u8>>,
    /// Whether the sink's `feed` failed for at least one chunk mid-turn.
    /// The caller decides whether to replay `pcm` through a fallback sink.
    pub sink_failed: bool,
}

/// Drives one synthesis turn, fanning each audio chunk out to an in-memory
/// collector and (if given) a live sink.
pub async fn synthesize(
    session_manager: &SessionManager,
    config: &Config,
    text: &str,
    sink: Option<&mut dyn AudioOutput>,
) -> SynthesisOutcome {
    session_manager.close_if_drifted(config).await;

    let mut collector: Vec<u8> = Vec::new();
    let mut sink = sink;
    let mut sink_failed = false;
    let mut on_event = |event: SessionEvent| {
        if let SessionEvent::AudioChunk(chunk) = event {
            collector.extend_from_slice(&chunk);
            if let Some(ref mut sink) = sink {
                if sink.feed(&chunk).is_err() {
                    sink_failed = true;
                }
            }
        }
    };

    if let Err(e) = session_manager.send_turn(config, text, &mut on_event).await {
        warn!(error = %e, "synthesis turn failed");
        return SynthesisOutcome {
            pcm: None,
            sink_failed,
        };
    }

    if sink_failed {
        warn!("audio sink feed failed mid-turn; caller will replay the collected audio through the fallback sink");
    }

    if collector.is_empty() {
        warn!("synthesis produced no audio chunks before turn_complete");
        return SynthesisOutcome {
            pcm: None,
            sink_failed,
        };
    }

    SynthesisOutcome {
        pcm: Some(collector),
        sink_failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::tests::FakeSession;
    use crate::remote::SpeechSession;
    use crate::error::Result;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct FakeOpener {
        chunks: Vec<Vec<u8>>,
        fail: bool,
    }

    #[async_trait]
    impl crate::remote::SessionOpener for FakeOpener {
        async fn open(
            &self,
            _config: &Config,
            _api_key: &str,
        ) -> Result<Box<dyn SpeechSession>> {
            Ok(Box::new(FakeSession {
                chunks: self.chunks.clone(),
                fail: self.fail,
            }))
        }
    }

    struct CollectingSink {
        fed: Vec<u8>,
    }

    impl AudioOutput for CollectingSink {
        fn feed(&mut self, chunk: &[u8]) -> crate::error::Result<()> {
            self.fed.extend_from_slice(chunk);
            Ok(())
        }
        fn finish(&mut self) -> crate::error::Result<()> {
            Ok(())
        }
        fn wait_done(&mut self) -> crate::error::Result<()> {
            Ok(())
        }
    }

    /// A sink whose `feed` always fails, simulating a device lost mid-turn.
    struct FailingSink;

    impl AudioOutput for FailingSink {
        fn feed(&mut self, _chunk: &[u8]) -> crate::error::Result<()> {
            Err(crate::error::TtsError::Audio("simulated feed failure".into()))
        }
        fn finish(&mut self) -> crate::error::Result<()> {
            Ok(())
        }
        fn wait_done(&mut self) -> crate::error::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn synthesize_returns_concatenated_chunks_in_order() {
        let opener = Arc::new(FakeOpener {
            chunks: vec![vec![1, 2], vec![3, 4], vec![5]],
            fail: false,
        });
        let manager = SessionManager::new(opener, "key".to_owned());
        let config = Config::default();
        let mut sink = CollectingSink { fed: Vec::new() };

        let outcome = synthesize(&manager, &config, "hello", Some(&mut sink)).await;
        assert_eq!(outcome.pcm, Some(vec![1, 2, 3, 4, 5]));
        assert!(!outcome.sink_failed);
        assert_eq!(sink.fed, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn synthesize_returns_none_on_empty_turn() {
        let opener = Arc::new(FakeOpener {
            chunks: vec![],
            fail: false,
        });
        let manager = SessionManager::new(opener, "key".to_owned());
        let config = Config::default();

        let outcome = synthesize(&manager, &config, "hello", None).await;
        assert_eq!(outcome.pcm, None);
        assert!(!outcome.sink_failed);
    }

    #[tokio::test]
    async fn synthesize_returns_none_on_transport_failure() {
        let opener = Arc::new(FakeOpener {
            chunks: vec![],
            fail: true,
        });
        let manager = SessionManager::new(opener, "key".to_owned());
        let config = Config::default();

        let outcome = synthesize(&manager, &config, "hello", None).await;
        assert_eq!(outcome.pcm, None);
        assert!(!manager.has_session().await);
    }

    #[tokio::test]
    async fn synthesize_works_without_a_sink() {
        let opener = Arc::new(FakeOpener {
            chunks: vec![vec![9, 9]],
            fail: false,
        });
        let manager = SessionManager::new(opener, "key".to_owned());
        let config = Config::default();

        let outcome = synthesize(&manager, &config, "hello", None).await;
        assert_eq!(outcome.pcm, Some(vec![9, 9]));
    }

    #[tokio::test]
    async fn synthesize_reports_sink_failed_but_still_returns_collected_pcm() {
        let opener = Arc::new(FakeOpener {
            chunks: vec![vec![1, 2], vec![3, 4]],
            fail: false,
        });
        let manager = SessionManager::new(opener, "key".to_owned());
        let config = Config::default();
        let mut sink = FailingSink;

        let outcome = synthesize(&manager, &config, "hello", Some(&mut sink)).await;
        assert_eq!(outcome.pcm, Some(vec![1, 2, 3, 4]));
        assert!(outcome.sink_failed);
    }
}
