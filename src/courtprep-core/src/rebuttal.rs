//! Opposing counsel's replies.
//!
//! The generator never fails: if the service is unreachable or says nothing
//! usable, the opponent delivers a fixed fallback line so the dialogue always
//! advances.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::{Config, RebuttalContext};
use crate::error::PracticeError;
use crate::persona::Speaker;
use crate::session::TranscriptEntry;

/// Input to the generation service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub system_instruction: String,
    pub user_message: String,
}

/// Text generation service.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String, PracticeError>;
}

/// The opponent's answer to one user turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rebuttal {
    pub text: String,
    /// True when the fixed fallback line stood in for a generated reply.
    pub is_fallback: bool,
}

#[derive(Clone)]
pub struct RebuttalGenerator {
    service: Arc<dyn GenerationService>,
    system_instruction: String,
    context: RebuttalContext,
    fallback_line: String,
    proxy_name: String,
    opponent_name: String,
}

impl RebuttalGenerator {
    pub fn new(service: Arc<dyn GenerationService>, config: &Config) -> Self {
        Self {
            service,
            system_instruction: config.rebuttal_instruction(),
            context: config.rebuttal.context,
            fallback_line: config.personas.opponent.fallback_line.clone(),
            proxy_name: config.personas.user_proxy.name.clone(),
            opponent_name: config.personas.opponent.name.clone(),
        }
    }

    /// Build the request for `utterance`; `history` holds the turns before it.
    pub fn build_request(&self, utterance: &str, history: &[TranscriptEntry]) -> GenerationRequest {
        let latest = format!("[{} said]: {}", self.proxy_name, utterance);

        let user_message = match self.context {
            RebuttalContext::LatestUtterance => latest,
            RebuttalContext::FullTranscript if history.is_empty() => latest,
            RebuttalContext::FullTranscript => {
                let earlier = history
                    .iter()
                    .map(|entry| {
                        let name = match entry.speaker {
                            Speaker::UserProxy => &self.proxy_name,
                            Speaker::Opponent => &self.opponent_name,
                        };
                        format!("[{} said]: {}", name, entry.text)
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                format!("Earlier in this hearing:\n{}\n\n{}", earlier, latest)
            }
        };

        GenerationRequest {
            system_instruction: self.system_instruction.clone(),
            user_message,
        }
    }

    pub async fn generate(&self, utterance: &str, history: &[TranscriptEntry]) -> Rebuttal {
        let request = self.build_request(utterance, history);

        match self.service.generate(request).await {
            Ok(reply) => {
                let text = sanitize_response(&reply);
                if text.is_empty() {
                    warn!("Generation service returned an empty reply, using fallback");
                    self.fallback()
                } else {
                    debug!(chars = text.len(), "Rebuttal generated");
                    Rebuttal {
                        text,
                        is_fallback: false,
                    }
                }
            }
            Err(e) => {
                warn!("Rebuttal generation failed, using fallback: {}", e);
                self.fallback()
            }
        }
    }

    fn fallback(&self) -> Rebuttal {
        Rebuttal {
            text: self.fallback_line.clone(),
            is_fallback: true,
        }
    }
}

/// Sanitize AI response by stripping reasoning tokens and XML-like tags.
///
/// Removes patterns like <thinking>...</thinking>, <reflection>...</reflection>, etc.
pub fn sanitize_response(response: &str) -> String {
    let tags_to_strip = [
        "thinking",
        "think",
        "reflection",
        "reflect",
        "internal",
        "reasoning",
        "thought",
        "scratchpad",
        "plan",
        "analysis",
    ];

    let mut result = response.to_string();

    for tag in &tags_to_strip {
        let pattern = format!(r"(?is)<{tag}[^>]*>.*?</{tag}>", tag = tag);
        if let Ok(re) = regex::Regex::new(&pattern) {
            result = re.replace_all(&result, "").to_string();
        }
    }

    if let Ok(orphan_re) = regex::Regex::new(r"</?[\w]+[^>]*>") {
        result = orphan_re.replace_all(&result, "").to_string();
    }

    // Stage directions such as "(adjusts cravat)".
    if let Ok(stage_re) = regex::Regex::new(r"\([^)]*\)") {
        result = stage_re.replace_all(&result, "").to_string();
    }

    result = result.replace('*', "");

    if let Ok(ws_re) = regex::Regex::new(r"\s+") {
        result = ws_re.replace_all(&result, " ").to_string();
    }

    result.trim().to_string()
}
