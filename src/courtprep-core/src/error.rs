//! Error types for the practice session.
//!
//! None of these cross the orchestrator boundary: each component absorbs its
//! failures into dialogue text or fallback data.

use thiserror::Error;

use crate::session::Phase;

#[derive(Error, Debug)]
pub enum PracticeError {
    /// Capture device access denied or unavailable.
    #[error("Microphone unavailable: {0}")]
    Permission(String),

    /// Network or service unreachable, or a non-success status.
    #[error("Service unreachable: {0}")]
    Transport(String),

    /// The service answered with a body we could not use.
    #[error("Malformed service response: {0}")]
    MalformedResponse(String),

    /// Nothing was said (silence or an empty transcript).
    #[error("No speech to process")]
    EmptyInput,

    #[error("A capture session is already active")]
    CaptureInProgress,

    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Illegal phase transition: {from} -> {to}")]
    IllegalTransition { from: Phase, to: Phase },

    /// The session actor has shut down.
    #[error("Session has ended")]
    SessionClosed,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("OpenAI API error: {0}")]
    OpenAIError(#[from] async_openai::error::OpenAIError),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Audio encoding error: {0}")]
    AudioEncoding(#[from] hound::Error),
}
