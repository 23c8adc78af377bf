//! A capture device that plays prepared WAV takes instead of a microphone.
//!
//! Each `start()` opens the next take; once the list runs out the last take
//! repeats. An unreadable take is reported like a denied microphone.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use hound::{SampleFormat, WavReader};
use tokio::sync::mpsc;
use tracing::info;

use crate::error::PracticeError;
use crate::recording::{AudioChunk, AudioFormat, CaptureDevice};

const CHUNK_SAMPLES: usize = 1024;

pub struct WavFileCapture {
    takes: Vec<PathBuf>,
    next: usize,
    format: AudioFormat,
}

impl WavFileCapture {
    pub fn new(takes: Vec<PathBuf>) -> Self {
        Self {
            takes,
            next: 0,
            format: AudioFormat::default(),
        }
    }

    fn next_take(&mut self) -> Option<PathBuf> {
        let index = self.next.min(self.takes.len().checked_sub(1)?);
        self.next += 1;
        self.takes.get(index).cloned()
    }
}

/// Read a WAV file as interleaved samples in `[-1.0, 1.0]`.
pub fn read_wav(path: &Path) -> Result<(AudioFormat, Vec<f32>), PracticeError> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();

    let samples = match spec.sample_format {
        SampleFormat::Float => reader.into_samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|s| s as f32 / scale))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    let format = AudioFormat {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    };
    Ok((format, samples))
}

#[async_trait]
impl CaptureDevice for WavFileCapture {
    fn format(&self) -> AudioFormat {
        self.format
    }

    async fn start(&mut self) -> Result<mpsc::Receiver<AudioChunk>, PracticeError> {
        let path = self
            .next_take()
            .ok_or_else(|| PracticeError::Permission("no recorded takes supplied".to_string()))?;

        let (format, samples) = read_wav(&path)
            .map_err(|e| PracticeError::Permission(format!("{}: {}", path.display(), e)))?;
        info!(
            take = %path.display(),
            sample_rate = format.sample_rate,
            channels = format.channels,
            samples = samples.len(),
            "Playing recorded take"
        );
        self.format = format;

        let chunks: Vec<AudioChunk> = samples
            .chunks(CHUNK_SAMPLES)
            .map(|c| AudioChunk { samples: c.to_vec() })
            .collect();
        let (tx, rx) = mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            // Capacity covers every chunk.
            let _ = tx.try_send(chunk);
        }
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), PracticeError> {
        Ok(())
    }
}
