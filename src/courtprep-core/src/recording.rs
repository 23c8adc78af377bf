//! Microphone capture lifecycle and transcription.
//!
//! ```text
//! Idle → Capturing → Stopping → Transcribing → Idle
//!                            └→ Failed ──────→ Idle
//! ```
//!
//! The pipeline owns the capture device and the ducking controller, so the
//! background music can only be touched through the capture lifecycle.
//! Transcription runs in a detached [`TranscriptionJob`] that never fails:
//! silence and service errors come back as dialogue text.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ducking::AudioDuckingController;
use crate::error::PracticeError;
use crate::persona::UserProxyPersona;

/// Sample layout produced by a capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
        }
    }
}

/// A block of interleaved samples in `[-1.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
}

/// A microphone, or anything that can stand in for one.
#[async_trait]
pub trait CaptureDevice: Send {
    /// Layout of the samples in the chunks this device sends.
    fn format(&self) -> AudioFormat;

    /// Acquire the device and begin sending chunks.
    ///
    /// Denied or missing devices report [`PracticeError::Permission`].
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioChunk>, PracticeError>;

    /// Release the device.
    async fn stop(&mut self) -> Result<(), PracticeError>;
}

/// Speech-to-text service.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &AudioPayload, language: &str)
    -> Result<String, PracticeError>;
}

/// One finished recording, encoded as 16-bit PCM WAV.
#[derive(Debug, Clone)]
pub struct AudioPayload {
    pub wav: Vec<u8>,
    pub format: AudioFormat,
    /// Sample frames (samples per channel).
    pub frames: usize,
}

impl AudioPayload {
    pub const MIME: &'static str = "audio/wav";
    pub const FILE_NAME: &'static str = "argument.wav";

    pub fn encode(samples: &[f32], format: AudioFormat) -> Result<Self, PracticeError> {
        let spec = hound::WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            let clamped = sample.clamp(-1.0, 1.0);
            writer.write_sample((clamped * i16::MAX as f32) as i16)?;
        }
        writer.finalize()?;

        Ok(Self {
            wav: cursor.into_inner(),
            format,
            frames: samples.len() / usize::from(format.channels.max(1)),
        })
    }

    pub fn is_silent(&self) -> bool {
        self.frames == 0
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames as f64 / f64::from(self.format.sample_rate.max(1)))
    }
}

/// What a finished recording turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptOutcome {
    /// Speech was recognised.
    Heard(String),
    /// Nothing recognisable; carries the canned retry prompt.
    NotUnderstood(String),
    /// The service failed; carries the error-tagged line to display.
    Failed(String),
}

impl TranscriptOutcome {
    pub fn display_text(&self) -> &str {
        match self {
            TranscriptOutcome::Heard(text)
            | TranscriptOutcome::NotUnderstood(text)
            | TranscriptOutcome::Failed(text) => text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordingState {
    #[default]
    Idle,
    Capturing,
    Stopping,
    Transcribing,
    Failed,
}

/// Pending transcription of a stopped recording.
pub struct TranscriptionJob {
    payload: Result<AudioPayload, PracticeError>,
    transcriber: Arc<dyn Transcriber>,
    language: String,
    persona: UserProxyPersona,
}

impl TranscriptionJob {
    pub async fn run(self) -> TranscriptOutcome {
        let TranscriptionJob {
            payload,
            transcriber,
            language,
            persona,
        } = self;

        let heard = match payload {
            Ok(payload) => transcribe(transcriber.as_ref(), &payload, &language).await,
            Err(e) => Err(e),
        };
        match heard {
            Ok(text) => TranscriptOutcome::Heard(text),
            Err(PracticeError::EmptyInput) => TranscriptOutcome::NotUnderstood(persona.not_understood),
            Err(e) => {
                warn!("Transcription failed: {}", e);
                TranscriptOutcome::Failed(persona.transcription_error(&e.to_string()))
            }
        }
    }
}

/// Silence and blank transcripts come back as [`PracticeError::EmptyInput`].
async fn transcribe(
    transcriber: &dyn Transcriber,
    payload: &AudioPayload,
    language: &str,
) -> Result<String, PracticeError> {
    if payload.is_silent() {
        debug!("Empty recording, skipping transcription");
        return Err(PracticeError::EmptyInput);
    }

    debug!(
        duration_ms = payload.duration().as_millis() as u64,
        "Requesting transcription"
    );
    let text = transcriber.transcribe(payload, language).await?;
    match text.trim() {
        "" => Err(PracticeError::EmptyInput),
        text => Ok(text.to_string()),
    }
}

struct BufferTask {
    finish: oneshot::Sender<()>,
    handle: JoinHandle<Vec<f32>>,
}

impl BufferTask {
    fn spawn(mut chunks: mpsc::Receiver<AudioChunk>) -> Self {
        let (finish, mut finish_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let mut samples = Vec::new();
            loop {
                tokio::select! {
                    chunk = chunks.recv() => match chunk {
                        Some(chunk) => samples.extend(chunk.samples),
                        None => break,
                    },
                    _ = &mut finish_rx => {
                        while let Ok(chunk) = chunks.try_recv() {
                            samples.extend(chunk.samples);
                        }
                        break;
                    }
                }
            }
            samples
        });
        Self { finish, handle }
    }

    async fn finish(self) -> Vec<f32> {
        let _ = self.finish.send(());
        match self.handle.await {
            Ok(samples) => samples,
            Err(e) => {
                warn!("Capture buffer task failed: {}", e);
                Vec::new()
            }
        }
    }
}

/// Owns the microphone from `start()` to `stop()`.
pub struct RecordingPipeline {
    device: Box<dyn CaptureDevice>,
    transcriber: Arc<dyn Transcriber>,
    ducking: AudioDuckingController,
    state: RecordingState,
    buffer: Option<BufferTask>,
    language: String,
    persona: UserProxyPersona,
}

impl RecordingPipeline {
    pub fn new(
        device: Box<dyn CaptureDevice>,
        transcriber: Arc<dyn Transcriber>,
        ducking: AudioDuckingController,
        language: impl Into<String>,
        persona: &UserProxyPersona,
    ) -> Self {
        Self {
            device,
            transcriber,
            ducking,
            state: RecordingState::Idle,
            buffer: None,
            language: language.into(),
            persona: persona.clone(),
        }
    }

    /// Open the microphone and start buffering.
    pub async fn start(&mut self) -> Result<(), PracticeError> {
        if self.state != RecordingState::Idle {
            warn!(state = ?self.state, "Capture already active, rejecting start");
            return Err(PracticeError::CaptureInProgress);
        }

        let chunks = self.device.start().await.map_err(|e| match e {
            PracticeError::Permission(_) => e,
            other => PracticeError::Permission(other.to_string()),
        })?;

        self.ducking.on_capture_start();
        self.buffer = Some(BufferTask::spawn(chunks));
        self.state = RecordingState::Capturing;
        info!("Capture started");
        Ok(())
    }

    /// Stop capturing and hand back the transcription to run.
    ///
    /// A no-op returning `None` unless currently capturing.
    pub async fn stop(&mut self) -> Option<TranscriptionJob> {
        if self.state != RecordingState::Capturing {
            debug!(state = ?self.state, "Ignoring stop outside capture");
            return None;
        }
        self.state = RecordingState::Stopping;

        let samples = match self.buffer.take() {
            Some(buffer) => buffer.finish().await,
            None => Vec::new(),
        };
        let payload = AudioPayload::encode(&samples, self.device.format());
        self.ducking.on_capture_stop();
        if let Err(e) = self.device.stop().await {
            warn!("Capture device did not release cleanly: {}", e);
        }

        let payload = match payload {
            Ok(payload) => {
                info!(frames = payload.frames, "Capture stopped");
                self.state = RecordingState::Transcribing;
                Ok(payload)
            }
            Err(e) => {
                warn!("Could not encode recording: {}", e);
                self.state = RecordingState::Failed;
                Err(e)
            }
        };

        Some(TranscriptionJob {
            payload,
            transcriber: Arc::clone(&self.transcriber),
            language: self.language.clone(),
            persona: self.persona.clone(),
        })
    }

    /// Return to `Idle` once the transcription outcome has been consumed.
    pub fn finish(&mut self) {
        if matches!(
            self.state,
            RecordingState::Transcribing | RecordingState::Failed
        ) {
            self.state = RecordingState::Idle;
        }
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn is_capturing(&self) -> bool {
        self.state == RecordingState::Capturing
    }

    pub fn ducking(&self) -> &AudioDuckingController {
        &self.ducking
    }

    pub fn ducking_mut(&mut self) -> &mut AudioDuckingController {
        &mut self.ducking
    }
}
