//! Background music ducking around microphone capture.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::PracticeError;

/// A background audio output.
///
/// Implementations are expected to be cheap to call; the controller invokes
/// them synchronously from the capture lifecycle.
pub trait BackgroundAudio: Send + Sync {
    fn volume(&self) -> Result<f32, PracticeError>;
    fn set_volume(&self, volume: f32) -> Result<(), PracticeError>;
    fn play(&self) -> Result<(), PracticeError>;
    fn pause(&self) -> Result<(), PracticeError>;
}

/// Lowers the background track while the microphone is open.
///
/// Device errors are logged and swallowed: losing the music must never
/// stop a recording.
pub struct AudioDuckingController {
    output: Option<Arc<dyn BackgroundAudio>>,
    muted_volume: f32,
    /// Volume to restore; `Some` while ducked.
    saved_volume: Option<f32>,
    music_enabled: bool,
}

impl AudioDuckingController {
    pub fn new(output: Option<Arc<dyn BackgroundAudio>>, muted_volume: f32) -> Self {
        Self {
            output,
            muted_volume,
            saved_volume: None,
            music_enabled: false,
        }
    }

    pub fn on_capture_start(&mut self) {
        if self.saved_volume.is_some() {
            return;
        }
        let Some(output) = &self.output else {
            return;
        };

        let previous = match output.volume() {
            Ok(volume) => volume,
            Err(e) => {
                warn!("Could not read background volume, not ducking: {}", e);
                return;
            }
        };
        if let Err(e) = output.set_volume(self.muted_volume) {
            warn!("Could not duck background audio: {}", e);
            return;
        }

        debug!(previous, muted = self.muted_volume, "Background audio ducked");
        self.saved_volume = Some(previous);
    }

    pub fn on_capture_stop(&mut self) {
        let Some(previous) = self.saved_volume.take() else {
            return;
        };
        let Some(output) = &self.output else {
            return;
        };

        match output.set_volume(previous) {
            Ok(()) => debug!(restored = previous, "Background audio restored"),
            Err(e) => warn!("Could not restore background volume: {}", e),
        }
    }

    /// Play or pause the background track.
    pub fn set_music_enabled(&mut self, enabled: bool) {
        self.music_enabled = enabled;
        let Some(output) = &self.output else {
            return;
        };

        let result = if enabled { output.play() } else { output.pause() };
        if let Err(e) = result {
            warn!("Could not toggle background audio: {}", e);
        }
    }

    pub fn music_enabled(&self) -> bool {
        self.music_enabled && self.output.is_some()
    }
}
