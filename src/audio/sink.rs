//! Streaming playback of PCM chunks as they arrive from the network.

use crate::error::{Result, TtsError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info};

/// Minimum chunks buffered before playback starts, absorbing network jitter.
const DEFAULT_PRE_BUFFER_CHUNKS: usize = 2;

/// Fixed on-disk/on-wire PCM format: mono, 24 kHz, 16-bit signed.
const SAMPLE_RATE: u32 = 24_000;
const CHANNELS: u16 = 1;

/// Capability set the Dispatcher consumes, independent of which concrete
/// output device backs it.
pub trait AudioOutput: Send {
    /// Append a PCM chunk (16-bit signed, little-endian, mono, 24 kHz).
    fn feed(&mut self, chunk: &[u8]) -> Result<()>;

    /// Mark end-of-stream. If playback hasn't started because pre-buffer was
    /// never reached, start now provided at least one chunk exists.
    fn finish(&mut self) -> Result<()>;

    /// Block until all buffered and in-flight audio has played. Always
    /// releases the output stream on exit, even on error.
    fn wait_done(&mut self) -> Result<()>;
}

enum QueueMsg {
    Chunk(Vec<i16>),
    Finish,
}

struct PlaybackState {
    finished_feeding: bool,
    drained: bool,
}

/// Low-latency streaming sink backed by a cpal output stream, fed through a
/// bounded queue so the device callback never blocks on the network.
pub struct CpalSink {
    device: cpal::Device,
    stream_config: StreamConfig,
    pre_buffer_chunks: usize,
    /// Chunks accumulated before the device stream has been started.
    held: Vec<Vec<i16>>,
    sender: Option<Sender<QueueMsg>>,
    stream: Option<cpal::Stream>,
    state: Arc<Mutex<PlaybackState>>,
}

impl CpalSink {
    /// Create a new sink. Fails if no default output device is available.
    pub fn new() -> Result<Self> {
        Self::with_pre_buffer(DEFAULT_PRE_BUFFER_CHUNKS)
    }

    /// Create a new sink with a non-default pre-buffer size (for tests).
    pub fn with_pre_buffer(pre_buffer_chunks: usize) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| TtsError::Audio("no default output device".into()))?;

        let stream_config = StreamConfig {
            channels: CHANNELS,
            sample_rate: SAMPLE_RATE,
            buffer_size: cpal::BufferSize::Default,
        };

        Ok(Self {
            device,
            stream_config,
            pre_buffer_chunks,
            held: Vec::new(),
            sender: None,
            stream: None,
            state: Arc::new(Mutex::new(PlaybackState {
                finished_feeding: false,
                drained: false,
            })),
        })
    }

    /// Build the output stream and start it pulling samples, returning the
    /// sender side of the channel that feeds it.
    fn start_stream(&mut self) -> Result<Sender<QueueMsg>> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.build_and_play(rx)?;
        Ok(tx)
    }

    fn build_and_play(&mut self, receiver: Receiver<QueueMsg>) -> Result<()> {
        let state = Arc::clone(&self.state);
        let mut pending: Vec<i16> = Vec::new();
        let mut finish_seen = false;

        let stream = self
            .device
            .build_output_stream(
                &self.stream_config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    let mut out_pos = 0;
                    while out_pos < data.len() {
                        if pending.is_empty() {
                            match receiver.try_recv() {
                                Ok(QueueMsg::Chunk(samples)) => {
                                    pending = samples;
                                    continue;
                                }
                                Ok(QueueMsg::Finish) => finish_seen = true,
                                Err(_) => {}
                            }
                            break;
                        }
                        let take = pending.len().min(data.len() - out_pos);
                        for (i, sample) in pending.drain(..take).enumerate() {
                            data[out_pos + i] = f32::from(sample) / f32::from(i16::MAX);
                        }
                        out_pos += take;
                    }
                    // Underrun: pad the remainder with silence.
                    for slot in &mut data[out_pos..] {
                        *slot = 0.0;
                    }
                    if finish_seen && pending.is_empty() {
                        if let Ok(s) = state.lock() {
                            let mut s = s;
                            s.drained = true;
                        }
                    }
                },
                move |err| {
                    error!("audio output stream error: {err}");
                },
                None,
            )
            .map_err(|e| TtsError::Audio(format!("failed to build output stream: {e}")))?;

        stream
            .play()
            .map_err(|e| TtsError::Audio(format!("failed to start output stream: {e}")))?;

        self.stream = Some(stream);
        Ok(())
    }

    /// Flush every held chunk through `sender`, in order.
    fn flush_held(&mut self, sender: &Sender<QueueMsg>) -> Result<()> {
        for samples in self.held.drain(..) {
            sender
                .send(QueueMsg::Chunk(samples))
                .map_err(|_| TtsError::Audio("output stream disconnected".into()))?;
        }
        Ok(())
    }
}

impl AudioOutput for CpalSink {
    fn feed(&mut self, chunk: &[u8]) -> Result<()> {
        let samples: Vec<i16> = chunk
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();

        if let Some(sender) = &self.sender {
            sender
                .send(QueueMsg::Chunk(samples))
                .map_err(|_| TtsError::Audio("output stream disconnected".into()))?;
            return Ok(());
        }

        self.held.push(samples);
        if self.held.len() >= self.pre_buffer_chunks {
            let sender = self.start_stream()?;
            self.flush_held(&sender)?;
            self.sender = Some(sender);
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.sender.is_none() {
            if self.held.is_empty() {
                // feed() was never called: nothing to play.
                return Ok(());
            }
            // Tie-break: fewer than pre_buffer_chunks were ever fed, but at
            // least one exists, so start playback now instead of waiting
            // forever for a pre-buffer that will never fill.
            let sender = self.start_stream()?;
            self.flush_held(&sender)?;
            self.sender = Some(sender);
        }

        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| TtsError::Audio("sink not initialized".into()))?;
        sender
            .send(QueueMsg::Finish)
            .map_err(|_| TtsError::Audio("output stream disconnected".into()))?;

        let mut state = self
            .state
            .lock()
            .map_err(|_| TtsError::Audio("playback state poisoned".into()))?;
        state.finished_feeding = true;
        Ok(())
    }

    fn wait_done(&mut self) -> Result<()> {
        if self.sender.is_none() {
            return Ok(());
        }
        loop {
            std::thread::sleep(Duration::from_millis(10));
            let drained = {
                let state = self
                    .state
                    .lock()
                    .map_err(|_| TtsError::Audio("playback state poisoned".into()))?;
                state.drained
            };
            if drained {
                break;
            }
        }
        self.stream = None;
        self.sender = None;
        Ok(())
    }
}

/// Lists available output device names, for diagnostics.
pub fn list_output_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| TtsError::Audio(format!("cannot enumerate devices: {e}")))?;

    let mut names = Vec::new();
    for device in devices {
        match device.description() {
            Ok(description) => names.push(description.name().to_owned()),
            Err(_) => info!("skipping output device with unreadable name"),
        }
    }
    Ok(names)
}
