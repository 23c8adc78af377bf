//! The session aggregate and its phase graph.
//!
//! One [`Session`] exists per practice run. Retrying builds a fresh one with
//! the next generation number; async completions tagged with an older
//! generation are stale and must be dropped by the owner.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PracticeError;
use crate::persona::Speaker;
use crate::scoring::ScoreResult;

/// Phases of a practice run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    IntroIdle,
    Typing,
    AwaitingContinue,
    Recording,
    ProcessingTranscript,
    GeneratingRebuttal,
    ObjectionTransition,
    Scoring,
    ScoreDisplayed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::IntroIdle => "IntroIdle",
            Self::Typing => "Typing",
            Self::AwaitingContinue => "AwaitingContinue",
            Self::Recording => "Recording",
            Self::ProcessingTranscript => "ProcessingTranscript",
            Self::GeneratingRebuttal => "GeneratingRebuttal",
            Self::ObjectionTransition => "ObjectionTransition",
            Self::Scoring => "Scoring",
            Self::ScoreDisplayed => "ScoreDisplayed",
        };
        f.write_str(name)
    }
}

/// Legal edges of the phase graph.
///
/// ```text
/// IntroIdle → Typing
/// Typing → AwaitingContinue | GeneratingRebuttal | ObjectionTransition
/// AwaitingContinue → Recording | Typing | Scoring | ScoreDisplayed
/// Recording → ProcessingTranscript | Typing
/// ProcessingTranscript → Typing
/// GeneratingRebuttal → ObjectionTransition
/// ObjectionTransition → Typing
/// Scoring → ScoreDisplayed
/// ```
///
/// `ScoreDisplayed` has no outgoing edge: retry replaces the session.
pub fn is_legal_transition(from: Phase, to: Phase) -> bool {
    use Phase::*;

    matches!(
        (from, to),
        (IntroIdle, Typing)
            | (Typing, AwaitingContinue)
            // User transcript revealed while the reply is pending or ready
            | (Typing, GeneratingRebuttal)
            | (Typing, ObjectionTransition)
            | (AwaitingContinue, Recording)
            // Opponent finished; floor handed back to the user
            | (AwaitingContinue, Typing)
            | (AwaitingContinue, Scoring)
            // Nothing to analyze
            | (AwaitingContinue, ScoreDisplayed)
            | (Recording, ProcessingTranscript)
            // Microphone unavailable
            | (Recording, Typing)
            | (ProcessingTranscript, Typing)
            | (GeneratingRebuttal, ObjectionTransition)
            | (ObjectionTransition, Typing)
            | (Scoring, ScoreDisplayed)
    )
}

/// Which presentation controls are live. Derived from the phase alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Controls {
    pub start: bool,
    pub continue_: bool,
    pub skip: bool,
    pub recording: bool,
    pub feedback: bool,
    pub retry: bool,
}

impl Controls {
    pub fn for_phase(phase: Phase) -> Self {
        let none = Self::default();
        match phase {
            Phase::IntroIdle => Self { start: true, ..none },
            Phase::Typing => Self {
                continue_: true,
                skip: true,
                ..none
            },
            Phase::AwaitingContinue => Self {
                continue_: true,
                feedback: true,
                ..none
            },
            Phase::Recording => Self {
                recording: true,
                ..none
            },
            Phase::ScoreDisplayed => Self { retry: true, ..none },
            Phase::ProcessingTranscript
            | Phase::GeneratingRebuttal
            | Phase::ObjectionTransition
            | Phase::Scoring => none,
        }
    }
}

/// One turn of dialogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
}

/// Result of asking for feedback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Feedback {
    Scored(ScoreResult),
    /// No user utterance existed; the scoring service was not called.
    NothingToAnalyze,
}

/// A recorded phase change.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionRecord {
    pub from: Phase,
    pub to: Phase,
    pub speaker: Speaker,
}

/// Root aggregate for one practice run.
#[derive(Debug, Clone)]
pub struct Session {
    generation: u64,
    phase: Phase,
    speaker: Speaker,
    /// Opposing counsel has given the introduction.
    opponent_introduced: bool,
    transcript: Vec<TranscriptEntry>,
    last_user_utterance: Option<String>,
    feedback: Option<Feedback>,
    display_text: String,
    transitions: Vec<TransitionRecord>,
}

impl Session {
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            phase: Phase::IntroIdle,
            speaker: Speaker::UserProxy,
            opponent_introduced: false,
            transcript: Vec::new(),
            last_user_utterance: None,
            feedback: None,
            display_text: String::new(),
            transitions: Vec::new(),
        }
    }

    /// The session that replaces this one on retry.
    pub fn successor(&self) -> Self {
        Self::new(self.generation + 1)
    }

    pub fn advance(&mut self, to: Phase) -> Result<(), PracticeError> {
        if !is_legal_transition(self.phase, to) {
            return Err(PracticeError::IllegalTransition {
                from: self.phase,
                to,
            });
        }

        debug!(
            generation = self.generation,
            from = %self.phase,
            to = %to,
            speaker = ?self.speaker,
            "Phase transition"
        );
        self.transitions.push(TransitionRecord {
            from: self.phase,
            to,
            speaker: self.speaker,
        });
        self.phase = to;
        Ok(())
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn speaker(&self) -> Speaker {
        self.speaker
    }

    pub fn set_speaker(&mut self, speaker: Speaker) {
        self.speaker = speaker;
    }

    pub fn opponent_introduced(&self) -> bool {
        self.opponent_introduced
    }

    pub fn mark_opponent_introduced(&mut self) {
        self.opponent_introduced = true;
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    pub fn push_turn(&mut self, speaker: Speaker, text: impl Into<String>) {
        self.transcript.push(TranscriptEntry {
            speaker,
            text: text.into(),
        });
    }

    pub fn last_user_utterance(&self) -> Option<&str> {
        self.last_user_utterance.as_deref()
    }

    pub fn record_utterance(&mut self, text: impl Into<String>) {
        self.last_user_utterance = Some(text.into());
    }

    pub fn feedback(&self) -> Option<&Feedback> {
        self.feedback.as_ref()
    }

    pub fn set_feedback(&mut self, feedback: Feedback) {
        self.feedback = Some(feedback);
    }

    pub fn score(&self) -> Option<&ScoreResult> {
        match &self.feedback {
            Some(Feedback::Scored(result)) => Some(result),
            _ => None,
        }
    }

    pub fn display_text(&self) -> &str {
        &self.display_text
    }

    pub fn set_display_text(&mut self, text: impl Into<String>) {
        self.display_text = text.into();
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn controls(&self) -> Controls {
        Controls::for_phase(self.phase)
    }
}

/// Everything the presentation layer needs to draw one frame.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub generation: u64,
    pub phase: Phase,
    pub speaker: Speaker,
    pub speaker_name: String,
    pub display_text: String,
    pub is_revealing: bool,
    pub is_capturing: bool,
    pub music_enabled: bool,
    pub controls: Controls,
    pub score: Option<ScoreResult>,
    pub nothing_to_analyze: bool,
}
