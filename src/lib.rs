//! A local text-to-speech daemon for reading assistant output aloud.
//!
//! A long-running daemon holds one streaming session open against a remote
//! speech service and serves short text requests over a Unix domain socket,
//! caching synthesized audio by content hash so repeated phrases never pay
//! for a second network round trip. A companion hook binary extracts the
//! text to speak from a conversation transcript and hands it to the daemon.
//!
//! # Architecture
//!
//! - **config**: loads and resolves voice/style/mode/language settings
//! - **cache**: content-addressed WAV storage keyed by text and voice config
//! - **remote**: the streaming speech service's wire protocol and session trait
//! - **session**: keeps one remote session alive, reconnecting with backoff
//! - **synthesizer**: drives one request/response turn over a session
//! - **dispatcher**: accepts socket connections and coordinates requests
//! - **audio**: low-latency streaming playback and an external-player fallback
//! - **supervisor**: process lifecycle, single-instance enforcement, signals
//! - **transcript**: extracts the text to speak from a hook's transcript file

pub mod audio;
pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod paths;
pub mod remote;
pub mod session;
pub mod supervisor;
pub mod synthesizer;
pub mod transcript;

pub use config::Config;
pub use error::{Result, TtsError};
