//! CourtPrep Core Library
//!
//! Provides the practice session state machine, the typewriter and audio
//! components it drives, and adapters for the transcription, rebuttal and
//! scoring services.

pub mod capture;
pub mod config;
#[cfg(feature = "device-audio")]
pub mod device;
pub mod ducking;
pub mod error;
pub mod orchestrator;
pub mod persona;
pub mod rebuttal;
pub mod recording;
pub mod scoring;
pub mod services;
pub mod session;
pub mod typewriter;

#[cfg(test)]
pub(crate) mod fakes;

pub use config::{Config, RebuttalContext, default_config};
pub use error::PracticeError;
pub use orchestrator::{Action, ActionOutcome, Services, SessionHandle, SessionOrchestrator};
pub use persona::Speaker;
pub use scoring::{ScoreOrigin, ScoreResult};
pub use session::{Controls, Feedback, Phase, SessionView};
