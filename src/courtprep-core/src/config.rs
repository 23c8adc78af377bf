//! Configuration module for loading TOML config files.
//!
//! Every section falls back to the embedded defaults, so a config file only
//! needs the keys it wants to change.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::PracticeError;
use crate::persona::{OpponentPersona, UserProxyPersona};

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub timing: TimingConfig,
    pub services: ServicesConfig,
    pub rebuttal: RebuttalConfig,
    pub audio: AudioConfig,
    pub personas: PersonasConfig,
    pub case: CaseConfig,
    pub prompts: PromptsConfig,
}

/// Cadences for time-based effects.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Interval between revealed characters.
    pub tick_ms: u64,
    /// How long the objection flash stays up before the reply reveals.
    pub objection_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_ms: 50,
            objection_ms: 1500,
        }
    }
}

impl TimingConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn objection(&self) -> Duration {
        Duration::from_millis(self.objection_ms)
    }
}

/// Models and transport settings for the three AI services.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub chat_model: String,
    pub scoring_model: String,
    pub transcription_model: String,
    /// Language hint sent with every transcription request.
    pub language: String,
    pub rebuttal_max_tokens: u32,
    pub scoring_max_tokens: u32,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Attempts per chat request before giving up.
    pub max_retries: u32,
}

/// Upper bound for `services.max_retries`.
pub const MAX_RETRIES: u32 = 8;

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            chat_model: "gpt-4o-mini".to_string(),
            scoring_model: "gpt-4o-mini".to_string(),
            transcription_model: "whisper-1".to_string(),
            language: "en".to_string(),
            rebuttal_max_tokens: 300,
            scoring_max_tokens: 800,
            request_timeout_secs: 120,
            connect_timeout_secs: 30,
            max_retries: 3,
        }
    }
}

/// How much of the session the opponent sees when replying.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RebuttalContext {
    /// Only the single most recent user utterance.
    #[default]
    LatestUtterance,
    /// Every prior turn, followed by the latest utterance.
    FullTranscript,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RebuttalConfig {
    pub context: RebuttalContext,
}

/// Background music levels.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Volume applied while the microphone is capturing.
    pub muted_volume: f32,
    /// Volume the background track starts at.
    pub music_volume: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            muted_volume: 0.0,
            music_volume: 0.2,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PersonasConfig {
    pub user_proxy: UserProxyPersona,
    pub opponent: OpponentPersona,
}

impl Default for UserProxyPersona {
    fn default() -> Self {
        Self {
            name: "Phoenix Wright".to_string(),
            intro: DEFAULT_PROXY_INTRO.to_string(),
            turn_prompt: "The floor is yours again. Press continue when you're ready to answer."
                .to_string(),
            recording_prompt: "Press record, make your argument, then press stop.".to_string(),
            permission_remediation: "I can't hear you! Check that the microphone is connected \
                and that this app is allowed to use it, then try again."
                .to_string(),
            not_understood: "Sorry, I didn't catch that. Could you repeat your argument?"
                .to_string(),
            transcription_error_prefix: "[Transcription error]".to_string(),
        }
    }
}

impl Default for OpponentPersona {
    fn default() -> Self {
        Self {
            name: "Miles Edgeworth".to_string(),
            intro: "Miles Edgeworth, prosecutor. Hmph. I hope you're prepared, because these \
                cases won't be easy. You'll need to think like a lawyer, analyze evidence \
                carefully, and present compelling arguments. The pursuit of truth requires \
                nothing less than perfection."
                .to_string(),
            objection_caption: "OBJECTION!".to_string(),
            fallback_line: "Hmph. Your argument lacks foundation. The prosecution maintains \
                that the evidence speaks for itself."
                .to_string(),
        }
    }
}

/// Fixed facts of the practice case.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaseConfig {
    pub title: String,
    pub facts: String,
}

impl Default for CaseConfig {
    fn default() -> Self {
        Self {
            title: "Harbor Logistics v. Meridian Freight".to_string(),
            facts: DEFAULT_CASE_FACTS.to_string(),
        }
    }
}

/// Instruction templates for the generation and scoring services.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    /// Placeholders: `{name}`, `{case}`.
    pub rebuttal_system: String,
    pub scoring_rubric: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            rebuttal_system: DEFAULT_REBUTTAL_PROMPT.to_string(),
            scoring_rubric: DEFAULT_SCORING_RUBRIC.to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        default_config()
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PracticeError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| PracticeError::ConfigError(format!("Failed to read config: {}", e)))?;

        Self::from_str(&content)
    }

    /// Load configuration from string content.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, PracticeError> {
        let config: Config = toml::from_str(content)
            .map_err(|e| PracticeError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), PracticeError> {
        if self.timing.tick_ms == 0 {
            return Err(PracticeError::ConfigError(
                "timing.tick_ms must be greater than zero".to_string(),
            ));
        }
        if self.services.max_retries > MAX_RETRIES {
            return Err(PracticeError::ConfigError(format!(
                "services.max_retries must be at most {}, got {}",
                MAX_RETRIES, self.services.max_retries
            )));
        }
        for (key, volume) in [
            ("audio.muted_volume", self.audio.muted_volume),
            ("audio.music_volume", self.audio.music_volume),
        ] {
            if !(0.0..=1.0).contains(&volume) {
                return Err(PracticeError::ConfigError(format!(
                    "{} must be within 0.0..=1.0, got {}",
                    key, volume
                )));
            }
        }
        Ok(())
    }

    /// The opponent's system instruction, with placeholders replaced.
    pub fn rebuttal_instruction(&self) -> String {
        self.prompts
            .rebuttal_system
            .replace("{name}", &self.personas.opponent.name)
            .replace("{case}", &self.case_context())
    }

    /// Case title and facts as one block.
    pub fn case_context(&self) -> String {
        format!("{}\n{}", self.case.title, self.case.facts.trim())
    }
}

/// Default configuration embedded in the binary.
pub fn default_config() -> Config {
    Config {
        timing: TimingConfig::default(),
        services: ServicesConfig::default(),
        rebuttal: RebuttalConfig::default(),
        audio: AudioConfig::default(),
        personas: PersonasConfig::default(),
        case: CaseConfig::default(),
        prompts: PromptsConfig::default(),
    }
}

const DEFAULT_PROXY_INTRO: &str = "Welcome to the courtroom! I'm Phoenix Wright, defense \
attorney. These legal practice scenarios will test your skills in cross-examination, evidence \
presentation, and logical reasoning. Are you ready to take on the challenge?";

const DEFAULT_CASE_FACTS: &str = r#"
Harbor Logistics (plaintiff) sued Meridian Freight (defendant, our client) for late delivery of
perishable cargo under a carriage contract. Meridian filed a counterclaim for unpaid invoices
totalling $184,000. The contract contains a force majeure clause covering "port closures and
acts of government". The port was closed for four days by a harbor authority order during the
delivery window. Harbor Logistics did not give written notice of breach within the 30 days the
contract requires.
"#;

const DEFAULT_REBUTTAL_PROMPT: &str = r#"You are {name}, a sharp and confident prosecutor in a courtroom practice drill.

CASE CONTEXT:
{case}

YOUR ROLE:
- Respond to the defense attorney's latest argument with a focused rebuttal
- Challenge weak reasoning, missing evidence and misapplied law
- Stay in character: formal, precise, a little arrogant
- Do NOT acknowledge being an AI

CRITICAL OUTPUT RULES:
- Output ONLY your spoken words, at most four sentences
- Do NOT include stage directions, narration or text in parentheses
- Do NOT use asterisks or any markdown formatting
"#;

const DEFAULT_SCORING_RUBRIC: &str = r#"You are an experienced trial advocacy coach. Evaluate the defense attorney's argument below.

Score it from 0 to 100 on legal accuracy, persuasiveness, structure and use of the case facts.

Respond with ONLY a JSON object of exactly this shape:
{"score": <integer 0-100>, "strengths": [<string>...], "improvements": [<string>...], "suggestions": [<string>...], "legalPoints": [<string>...]}
"#;
