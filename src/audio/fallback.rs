//! External-player fallback sink, used when the low-latency device is
//! unavailable and for cache-replay playback.

use crate::audio::sink::AudioOutput;
use crate::error::{Result, TtsError};
use std::process::Command;

const SAMPLE_RATE: u32 = 24_000;
const CHANNELS: u16 = 1;
const BITS_PER_SAMPLE: u16 = 16;

/// Linux players tried in order, matching the original daemon's
/// `play_audio_async` selection.
#[cfg(target_os = "linux")]
const LINUX_PLAYERS: &[&str] = &["paplay", "aplay", "mpv"];

/// Assembles the full PCM turn into a temp WAV file and shells out to the
/// first available system player, waiting for it to exit.
pub struct FallbackSink {
    buffer: Vec<u8>,
}

impl FallbackSink {
    #[must_use]
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    fn play_buffer(pcm: &[u8]) -> Result<()> {
        if pcm.is_empty() {
            return Ok(());
        }

        let temp_dir = std::env::temp_dir();
        let temp_path = temp_dir.join(format!("tts-daemon-{}.wav", std::process::id()));

        let spec = hound::WavSpec {
            channels: CHANNELS,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: BITS_PER_SAMPLE,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&temp_path, spec)
            .map_err(|e| TtsError::Audio(format!("cannot create temp WAV: {e}")))?;
        for chunk in pcm.chunks_exact(2) {
            let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
            writer
                .write_sample(sample)
                .map_err(|e| TtsError::Audio(format!("{e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| TtsError::Audio(format!("{e}")))?;

        let result = run_player(&temp_path);
        let _ = std::fs::remove_file(&temp_path);
        result
    }
}

impl Default for FallbackSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioOutput for FallbackSink {
    fn feed(&mut self, chunk: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    fn wait_done(&mut self) -> Result<()> {
        let pcm = std::mem::take(&mut self.buffer);
        Self::play_buffer(&pcm)
    }
}

#[cfg(target_os = "macos")]
fn run_player(path: &std::path::Path) -> Result<()> {
    spawn_and_wait("afplay", &[path.as_os_str()])
}

#[cfg(target_os = "linux")]
fn run_player(path: &std::path::Path) -> Result<()> {
    for player in LINUX_PLAYERS {
        let args: &[&std::ffi::OsStr] = match *player {
            "aplay" => &[std::ffi::OsStr::new("-q"), path.as_os_str()],
            _ => &[path.as_os_str()],
        };
        if spawn_and_wait(player, args).is_ok() {
            return Ok(());
        }
    }
    Err(TtsError::Audio(
        "no fallback player (paplay, aplay, mpv) found on PATH".into(),
    ))
}

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
fn run_player(_path: &std::path::Path) -> Result<()> {
    Err(TtsError::Audio(
        "no fallback player available on this platform".into(),
    ))
}

fn spawn_and_wait(program: &str, args: &[&std::ffi::OsStr]) -> Result<()> {
    let status = Command::new(program)
        .args(args)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map_err(|e| TtsError::Audio(format!("failed to spawn {program}: {e}")))?;

    if status.success() {
        Ok(())
    } else {
        Err(TtsError::Audio(format!(
            "{program} exited with status {status}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_then_finish_then_wait_done_on_empty_buffer_is_ok() {
        let mut sink = FallbackSink::new();
        assert!(sink.finish().is_ok());
        assert!(sink.wait_done().is_ok());
    }

    #[test]
    fn feed_accumulates_into_buffer() {
        let mut sink = FallbackSink::new();
        sink.feed(&[1, 2]).expect("feed");
        sink.feed(&[3, 4]).expect("feed");
        assert_eq!(sink.buffer, vec![1, 2, 3, 4]);
    }
}
