//! Speakers and the scripted personas that voice them.

use serde::{Deserialize, Serialize};

/// Whose turn is on screen.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    /// The persona that speaks the user's words.
    #[default]
    UserProxy,
    /// The scripted opposing counsel.
    Opponent,
}

impl Speaker {
    pub fn display_name(&self) -> &str {
        match self {
            Speaker::UserProxy => "DEFENSE",
            Speaker::Opponent => "PROSECUTION",
        }
    }
}

/// Scripted lines for the persona that stands in for the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProxyPersona {
    /// Display name shown above the text box.
    pub name: String,
    /// Revealed when the session starts.
    pub intro: String,
    /// Revealed when the floor returns to the user after a rebuttal.
    pub turn_prompt: String,
    /// Shown while the microphone control is live.
    pub recording_prompt: String,
    /// Revealed when the microphone cannot be opened.
    pub permission_remediation: String,
    /// Revealed when the transcription came back empty.
    pub not_understood: String,
    /// Prefix for transcription failures rendered as dialogue.
    pub transcription_error_prefix: String,
}

/// Scripted lines for opposing counsel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpponentPersona {
    pub name: String,
    /// Revealed after the user proxy's intro, before the first argument.
    pub intro: String,
    /// Caption flashed during the objection transition.
    pub objection_caption: String,
    /// Used whenever the generation service cannot produce a reply.
    pub fallback_line: String,
}

impl UserProxyPersona {
    /// Render a transcription failure in character.
    pub fn transcription_error(&self, message: &str) -> String {
        format!("{} {}", self.transcription_error_prefix, message)
    }

    /// Get the full display name with role.
    pub fn display_name_with_role(&self) -> String {
        format!("{} ({})", self.name, Speaker::UserProxy.display_name())
    }
}

impl OpponentPersona {
    pub fn display_name_with_role(&self) -> String {
        format!("{} ({})", self.name, Speaker::Opponent.display_name())
    }
}
