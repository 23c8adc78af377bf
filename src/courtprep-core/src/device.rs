//! Sound card backends (feature `device-audio`).
//!
//! `cpal::Stream` is `!Send` on some platforms, so each stream lives on its
//! own OS thread for its whole life. The async side only ever holds channels
//! and atomics.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc as std_mpsc;
use std::thread;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::capture::read_wav;
use crate::ducking::BackgroundAudio;
use crate::error::PracticeError;
use crate::recording::{AudioChunk, AudioFormat, CaptureDevice};

struct StreamThread {
    stop: std_mpsc::Sender<()>,
    thread: thread::JoinHandle<()>,
}

impl StreamThread {
    fn shutdown(self) {
        let _ = self.stop.send(());
        if self.thread.join().is_err() {
            warn!("Audio thread panicked");
        }
    }
}

/// The default input device, downmixed to mono.
pub struct CpalMicrophone {
    format: AudioFormat,
    active: Option<StreamThread>,
}

impl CpalMicrophone {
    pub fn new() -> Self {
        Self {
            format: AudioFormat::default(),
            active: None,
        }
    }
}

impl Default for CpalMicrophone {
    fn default() -> Self {
        Self::new()
    }
}

fn open_input(chunks: mpsc::Sender<AudioChunk>) -> Result<(cpal::Stream, AudioFormat), PracticeError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| PracticeError::Permission("No input device available".into()))?;
    info!(
        "Using input device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );

    let config: cpal::StreamConfig = device
        .default_input_config()
        .map_err(|e| PracticeError::Permission(format!("Failed to get input config: {}", e)))?
        .into();
    let channels = usize::from(config.channels.max(1));

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let samples = if channels == 1 {
                    data.to_vec()
                } else {
                    data.chunks(channels)
                        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                        .collect()
                };
                if let Err(e) = chunks.try_send(AudioChunk { samples }) {
                    debug!("Dropped microphone chunk: {}", e);
                }
            },
            |err| error!("Audio input stream error: {}", err),
            None,
        )
        .map_err(|e| PracticeError::Permission(format!("Failed to build input stream: {}", e)))?;

    stream
        .play()
        .map_err(|e| PracticeError::Permission(format!("Failed to start input stream: {}", e)))?;

    let format = AudioFormat {
        sample_rate: config.sample_rate.0,
        channels: 1,
    };
    Ok((stream, format))
}

#[async_trait]
impl CaptureDevice for CpalMicrophone {
    fn format(&self) -> AudioFormat {
        self.format
    }

    async fn start(&mut self) -> Result<mpsc::Receiver<AudioChunk>, PracticeError> {
        if self.active.is_some() {
            return Err(PracticeError::CaptureInProgress);
        }

        let (chunk_tx, chunk_rx) = mpsc::channel(256);
        let (init_tx, init_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name("courtprep-mic".into())
            .spawn(move || {
                let stream = match open_input(chunk_tx) {
                    Ok((stream, format)) => {
                        let _ = init_tx.send(Ok(format));
                        stream
                    }
                    Err(e) => {
                        let _ = init_tx.send(Err(e));
                        return;
                    }
                };
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| PracticeError::AudioDevice(format!("failed to spawn audio thread: {e}")))?;

        let format = init_rx
            .await
            .map_err(|_| PracticeError::AudioDevice("audio thread died".into()))??;
        self.format = format;
        self.active = Some(StreamThread {
            stop: stop_tx,
            thread,
        });
        info!(sample_rate = format.sample_rate, "Microphone open");
        Ok(chunk_rx)
    }

    async fn stop(&mut self) -> Result<(), PracticeError> {
        if let Some(active) = self.active.take() {
            tokio::task::spawn_blocking(move || active.shutdown())
                .await
                .map_err(|e| PracticeError::AudioDevice(e.to_string()))?;
            info!("Microphone closed");
        }
        Ok(())
    }
}

/// Walks a looping track at a different frame rate.
#[derive(Debug, Clone)]
struct LoopCursor {
    position: f64,
    step: f64,
    frames: usize,
}

impl LoopCursor {
    fn new(track_rate: u32, device_rate: u32, frames: usize) -> Self {
        Self {
            position: 0.0,
            step: f64::from(track_rate) / f64::from(device_rate.max(1)),
            frames,
        }
    }

    /// Current frame index, then advance by one device frame.
    fn advance(&mut self) -> usize {
        let frame = (self.position as usize).min(self.frames.saturating_sub(1));
        self.position += self.step;
        if self.position >= self.frames as f64 {
            self.position -= self.frames as f64;
        }
        frame
    }
}

struct TrackLevel {
    volume: AtomicU32,
    playing: AtomicBool,
}

/// A WAV file looping on the default output device.
pub struct LoopingTrack {
    level: Arc<TrackLevel>,
    output: Option<StreamThread>,
}

impl LoopingTrack {
    /// Open `path` and start the output stream, paused, at `volume`.
    pub fn open(path: &Path, volume: f32) -> Result<Self, PracticeError> {
        let (format, samples) = read_wav(path)?;
        if samples.is_empty() {
            return Err(PracticeError::AudioDevice(format!("{} is empty", path.display())));
        }

        let level = Arc::new(TrackLevel {
            volume: AtomicU32::new(volume.to_bits()),
            playing: AtomicBool::new(false),
        });

        let (init_tx, init_rx) = std_mpsc::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let thread_level = Arc::clone(&level);
        let thread = thread::Builder::new()
            .name("courtprep-music".into())
            .spawn(move || {
                let stream = match open_output(samples, format, thread_level) {
                    Ok(stream) => {
                        let _ = init_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = init_tx.send(Err(e));
                        return;
                    }
                };
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| PracticeError::AudioDevice(format!("failed to spawn audio thread: {e}")))?;

        init_rx
            .recv()
            .map_err(|_| PracticeError::AudioDevice("audio thread died".into()))??;
        info!(track = %path.display(), "Background track loaded");

        Ok(Self {
            level,
            output: Some(StreamThread {
                stop: stop_tx,
                thread,
            }),
        })
    }
}

fn open_output(
    track: Vec<f32>,
    format: AudioFormat,
    level: Arc<TrackLevel>,
) -> Result<cpal::Stream, PracticeError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| PracticeError::AudioDevice("No output device available".into()))?;
    let config: cpal::StreamConfig = device
        .default_output_config()
        .map_err(|e| PracticeError::AudioDevice(format!("Failed to get output config: {}", e)))?
        .into();

    let out_channels = usize::from(config.channels.max(1));
    let track_channels = usize::from(format.channels.max(1));
    let mut cursor = LoopCursor::new(
        format.sample_rate,
        config.sample_rate.0,
        track.len() / track_channels,
    );

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let playing = level.playing.load(Ordering::Relaxed);
                let volume = f32::from_bits(level.volume.load(Ordering::Relaxed));
                for frame in data.chunks_mut(out_channels) {
                    if !playing {
                        frame.fill(0.0);
                        continue;
                    }
                    let base = cursor.advance() * track_channels;
                    for (c, sample) in frame.iter_mut().enumerate() {
                        let source = base + c.min(track_channels - 1);
                        *sample = track.get(source).copied().unwrap_or(0.0) * volume;
                    }
                }
            },
            |err| error!("Audio output stream error: {}", err),
            None,
        )
        .map_err(|e| PracticeError::AudioDevice(format!("Failed to build output stream: {}", e)))?;

    stream
        .play()
        .map_err(|e| PracticeError::AudioDevice(format!("Failed to start output stream: {}", e)))?;
    Ok(stream)
}

impl BackgroundAudio for LoopingTrack {
    fn volume(&self) -> Result<f32, PracticeError> {
        Ok(f32::from_bits(self.level.volume.load(Ordering::SeqCst)))
    }

    fn set_volume(&self, volume: f32) -> Result<(), PracticeError> {
        self.level
            .volume
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::SeqCst);
        Ok(())
    }

    fn play(&self) -> Result<(), PracticeError> {
        self.level.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&self) -> Result<(), PracticeError> {
        self.level.playing.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for LoopingTrack {
    fn drop(&mut self) {
        if let Some(output) = self.output.take() {
            output.shutdown();
        }
    }
}
