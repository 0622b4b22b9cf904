//! Content-addressed store of finished PCM audio on the local filesystem.

use crate::config::Config;
use crate::error::{Result, TtsError};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Fixed on-disk audio format: mono, 24 kHz, 16-bit signed PCM.
const SAMPLE_RATE: u32 = 24_000;
const CHANNELS: u16 = 1;
const BITS_PER_SAMPLE: u16 = 16;

/// Computes the cache file path for a given request text and configuration.
///
/// The key is the blake3 digest of `text:voice:style:mode:language`,
/// truncated to 128 bits and hex-encoded. `style` and `mode`/`language` enter
/// the digest via their resolved/wire representations, matching the session
/// fields that would force a session rebuild.
#[must_use]
pub fn path_for(text: &str, config: &Config, cache_dir: &Path) -> PathBuf {
    let mode = match config.mode {
        crate::config::Mode::Summary => "summary",
        crate::config::Mode::Full => "full",
    };
    let language = format!("{:?}", config.language).to_lowercase();
    let input = format!(
        "{text}:{}:{}:{mode}:{language}",
        config.voice.as_str(),
        config.style
    );
    let hash = blake3::hash(input.as_bytes());
    let digest = hex_encode(&hash.as_bytes()[..16]);
    cache_dir.join(format!("{digest}.wav"))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Whether a cache entry exists at this path.
#[must_use]
pub fn exists(path: &Path) -> bool {
    path.is_file()
}

/// Reads a cache entry, returning the raw 16-bit PCM frames (WAV header
/// stripped). Entries whose format does not match the fixed on-disk format
/// are treated as missing.
pub fn read(path: &Path) -> Result<Vec<u8>> {
    let mut reader =
        hound::WavReader::open(path).map_err(|e| TtsError::Cache(format!("{e}")))?;
    let spec = reader.spec();
    if spec.sample_rate != SAMPLE_RATE
        || spec.channels != CHANNELS
        || spec.bits_per_sample != BITS_PER_SAMPLE
        || spec.sample_format != hound::SampleFormat::Int
    {
        return Err(TtsError::Cache(format!(
            "cache entry {} has unexpected format: {spec:?}",
            path.display()
        )));
    }

    let mut pcm = Vec::with_capacity(reader.duration() as usize * 2);
    for sample in reader.samples::<i16>() {
        let sample = sample.map_err(|e| TtsError::Cache(format!("{e}")))?;
        pcm.extend_from_slice(&sample.to_le_bytes());
    }
    Ok(pcm)
}

/// Writes PCM frames to the cache at `path`, via a temp-file-then-rename so
/// a concurrent reader never observes a truncated WAV.
///
/// Failures are logged by the caller; this returns an error rather than
/// panicking so the request can proceed as if uncached.
pub fn write(path: &Path, pcm: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let spec = hound::WavSpec {
        channels: CHANNELS,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: BITS_PER_SAMPLE,
        sample_format: hound::SampleFormat::Int,
    };

    let mut buffer = Cursor::new(Vec::with_capacity(pcm.len() + 44));
    {
        let mut writer = hound::WavWriter::new(&mut buffer, spec)
            .map_err(|e| TtsError::Cache(format!("{e}")))?;
        for chunk in pcm.chunks_exact(2) {
            let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
            writer
                .write_sample(sample)
                .map_err(|e| TtsError::Cache(format!("{e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| TtsError::Cache(format!("{e}")))?;
    }

    let temp_path = path.with_extension("wav.tmp");
    std::fs::write(&temp_path, buffer.into_inner())?;
    std::fs::rename(&temp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&temp_path);
        TtsError::Io(e)
    })?;
    Ok(())
}

/// Writes to the cache, logging (not propagating) any failure — callers
/// treat a cache-write failure as if the request had been uncached.
pub fn write_best_effort(path: &Path, pcm: &[u8]) {
    if let Err(e) = write(path, pcm) {
        warn!(path = %path.display(), error = %e, "failed to write cache entry");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn path_for_is_deterministic() {
        let config = Config::default();
        let dir = PathBuf::from("/tmp/cache");
        let a = path_for("hello", &config, &dir);
        let b = path_for("hello", &config, &dir);
        assert_eq!(a, b);
    }

    #[test]
    fn path_for_distinguishes_text() {
        let config = Config::default();
        let dir = PathBuf::from("/tmp/cache");
        assert_ne!(
            path_for("hello", &config, &dir),
            path_for("goodbye", &config, &dir)
        );
    }

    #[test]
    fn path_for_distinguishes_voice() {
        let dir = PathBuf::from("/tmp/cache");
        let mut a = Config::default();
        let mut b = Config::default();
        a.voice = crate::config::Voice::Aoede;
        b.voice = crate::config::Voice::Kore;
        assert_ne!(path_for("hello", &a, &dir), path_for("hello", &b, &dir));
    }

    #[test]
    fn write_then_read_round_trips_pcm() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("entry.wav");
        let pcm: Vec<u8> = (0i16..100)
            .flat_map(|s| s.to_le_bytes())
            .collect();

        write(&path, &pcm).expect("write");
        assert!(exists(&path));

        let read_back = read(&path).expect("read");
        assert_eq!(read_back, pcm);
    }

    #[test]
    fn write_is_atomic_no_temp_file_left_behind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("entry.wav");
        write(&path, &[0, 0, 1, 0]).expect("write");
        assert!(!path.with_extension("wav.tmp").exists());
    }

    #[test]
    fn read_missing_file_is_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("missing.wav");
        assert!(read(&path).is_err());
    }

    #[test]
    fn exists_false_for_missing_path() {
        assert!(!exists(Path::new("/nonexistent/entry.wav")));
    }
}
