//! In-memory stand-ins for devices and services, for tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::ducking::BackgroundAudio;
use crate::error::PracticeError;
use crate::rebuttal::{GenerationRequest, GenerationService};
use crate::recording::{AudioChunk, AudioFormat, AudioPayload, CaptureDevice, Transcriber};
use crate::scoring::{EvaluationRequest, EvaluationService};

pub struct FakeBackgroundAudio {
    volume: Mutex<f32>,
    playing: AtomicBool,
    set_calls: AtomicUsize,
    failing: bool,
}

impl FakeBackgroundAudio {
    pub fn new(volume: f32) -> Self {
        Self {
            volume: Mutex::new(volume),
            playing: AtomicBool::new(false),
            set_calls: AtomicUsize::new(0),
            failing: false,
        }
    }

    /// Every call returns an audio device error.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::new(0.2)
        }
    }

    pub fn current_volume(&self) -> f32 {
        *self.volume.lock().unwrap()
    }

    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), PracticeError> {
        if self.failing {
            Err(PracticeError::AudioDevice("output unplugged".to_string()))
        } else {
            Ok(())
        }
    }
}

impl BackgroundAudio for FakeBackgroundAudio {
    fn volume(&self) -> Result<f32, PracticeError> {
        self.check()?;
        Ok(self.current_volume())
    }

    fn set_volume(&self, volume: f32) -> Result<(), PracticeError> {
        self.check()?;
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        *self.volume.lock().unwrap() = volume;
        Ok(())
    }

    fn play(&self) -> Result<(), PracticeError> {
        self.check()?;
        self.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&self) -> Result<(), PracticeError> {
        self.check()?;
        self.playing.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Acquire/release counters shared with a [`FakeCaptureDevice`].
#[derive(Clone, Default)]
pub struct DeviceStats {
    acquired: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl DeviceStats {
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

pub struct FakeCaptureDevice {
    chunks: Vec<AudioChunk>,
    denied: bool,
    stats: DeviceStats,
}

impl FakeCaptureDevice {
    /// Delivers a short burst of non-silent audio.
    pub fn with_speech() -> Self {
        let samples: Vec<f32> = (0..1600).map(|i| ((i as f32) * 0.05).sin() * 0.3).collect();
        Self {
            chunks: samples
                .chunks(400)
                .map(|c| AudioChunk { samples: c.to_vec() })
                .collect(),
            denied: false,
            stats: DeviceStats::default(),
        }
    }

    /// Opens fine but never delivers a sample.
    pub fn silent() -> Self {
        Self {
            chunks: Vec::new(),
            denied: false,
            stats: DeviceStats::default(),
        }
    }

    /// Refuses to open.
    pub fn denied() -> Self {
        Self {
            chunks: Vec::new(),
            denied: true,
            stats: DeviceStats::default(),
        }
    }

    pub fn stats(&self) -> DeviceStats {
        self.stats.clone()
    }
}

#[async_trait]
impl CaptureDevice for FakeCaptureDevice {
    fn format(&self) -> AudioFormat {
        AudioFormat::default()
    }

    async fn start(&mut self) -> Result<mpsc::Receiver<AudioChunk>, PracticeError> {
        if self.denied {
            return Err(PracticeError::Permission("access denied by user".to_string()));
        }
        self.stats.acquired.fetch_add(1, Ordering::SeqCst);

        // Buffered so every chunk is queued before start returns.
        let (tx, rx) = mpsc::channel(self.chunks.len().max(1));
        for chunk in &self.chunks {
            let _ = tx.try_send(chunk.clone());
        }
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), PracticeError> {
        self.stats.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeTranscriber {
    reply: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl FakeTranscriber {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Some(text.to_string()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            reply: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(
        &self,
        _audio: &AudioPayload,
        _language: &str,
    ) -> Result<String, PracticeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply
            .clone()
            .ok_or_else(|| PracticeError::Transport("connection refused".to_string()))
    }
}

pub struct FakeGeneration {
    reply: Option<String>,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl FakeGeneration {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Some(text.to_string()),
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Replies after `delay` of (tokio) time has passed.
    pub fn delayed(text: &str, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::replying(text)
        }
    }

    pub fn unreachable() -> Self {
        Self {
            reply: None,
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl GenerationService for FakeGeneration {
    async fn generate(&self, _request: GenerationRequest) -> Result<String, PracticeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.reply
            .clone()
            .ok_or_else(|| PracticeError::Transport("connection refused".to_string()))
    }
}

pub struct FakeEvaluation {
    reply: Option<String>,
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<EvaluationRequest>>>,
}

impl FakeEvaluation {
    pub fn replying(body: &str) -> Self {
        Self {
            reply: Some(body.to_string()),
            calls: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            reply: None,
            ..Self::replying("")
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    pub fn requests(&self) -> Arc<Mutex<Vec<EvaluationRequest>>> {
        Arc::clone(&self.requests)
    }
}

#[async_trait]
impl EvaluationService for FakeEvaluation {
    async fn evaluate(&self, request: EvaluationRequest) -> Result<String, PracticeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        self.reply
            .clone()
            .ok_or_else(|| PracticeError::Transport("connection refused".to_string()))
    }
}
