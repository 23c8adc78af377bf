//! Argument evaluation.
//!
//! [`ScoringService::score`] always resolves to a complete [`ScoreResult`]:
//! an unparseable body gets the neutral fallback (70), an unreachable
//! service gets the technical-error fallback (65).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::PracticeError;

/// Input to the evaluation service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationRequest {
    pub rubric_instruction: String,
    pub user_message: String,
}

/// Evaluation service returning the raw response body.
#[async_trait]
pub trait EvaluationService: Send + Sync {
    async fn evaluate(&self, request: EvaluationRequest) -> Result<String, PracticeError>;
}

/// Where a score came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum ScoreOrigin {
    #[default]
    Evaluated,
    /// The service answered but not in the expected shape.
    NeutralFallback,
    /// The service could not be reached.
    TechnicalError,
}

/// Structured feedback on one argument.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScoreResult {
    /// 0 to 100.
    pub score: u8,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub suggestions: Vec<String>,
    #[serde(alias = "legal_points")]
    pub legal_points: Vec<String>,
    #[serde(default)]
    pub origin: ScoreOrigin,
}

impl ScoreResult {
    pub const NEUTRAL_FALLBACK_SCORE: u8 = 70;
    pub const TECHNICAL_ERROR_SCORE: u8 = 65;

    pub fn neutral_fallback() -> Self {
        Self {
            score: Self::NEUTRAL_FALLBACK_SCORE,
            strengths: strings(&[
                "You took a clear position and committed to it",
                "Your argument addressed the matter before the court",
            ]),
            improvements: strings(&[
                "Tie each claim to a specific fact in the record",
                "Anticipate the strongest counterargument before opposing counsel raises it",
            ]),
            suggestions: strings(&[
                "Open with the relief you are asking for, then give your reasons",
                "Close by restating why the law favors your client",
            ]),
            legal_points: strings(&[
                "Identify the governing contract clause or rule before arguing its application",
            ]),
            origin: ScoreOrigin::NeutralFallback,
        }
    }

    pub fn technical_error() -> Self {
        Self {
            score: Self::TECHNICAL_ERROR_SCORE,
            strengths: strings(&["You delivered a complete argument for review"]),
            improvements: strings(&[
                "Detailed feedback is unavailable because the evaluation service could not be reached",
            ]),
            suggestions: strings(&["Try again in a moment to receive a full evaluation"]),
            legal_points: strings(&[
                "Review the case facts and the force majeure clause while you wait",
            ]),
            origin: ScoreOrigin::TechnicalError,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.origin != ScoreOrigin::Evaluated
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// The wire shape; `score` may arrive as any JSON number.
#[derive(Deserialize)]
struct RawScore {
    score: f64,
    strengths: Vec<String>,
    improvements: Vec<String>,
    suggestions: Vec<String>,
    #[serde(rename = "legalPoints", alias = "legal_points")]
    legal_points: Vec<String>,
}

/// Parse an evaluation body, tolerating code fences and surrounding prose.
pub fn parse_score(body: &str) -> Result<ScoreResult, PracticeError> {
    let start = body.find('{');
    let end = body.rfind('}');
    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &body[start..=end],
        _ => {
            return Err(PracticeError::MalformedResponse(
                "no JSON object in evaluation".to_string(),
            ));
        }
    };

    let raw: RawScore = serde_json::from_str(json)
        .map_err(|e| PracticeError::MalformedResponse(e.to_string()))?;

    Ok(ScoreResult {
        score: raw.score.round().clamp(0.0, 100.0) as u8,
        strengths: raw.strengths,
        improvements: raw.improvements,
        suggestions: raw.suggestions,
        legal_points: raw.legal_points,
        origin: ScoreOrigin::Evaluated,
    })
}

#[derive(Clone)]
pub struct ScoringService {
    service: Arc<dyn EvaluationService>,
    rubric: String,
}

impl ScoringService {
    pub fn new(service: Arc<dyn EvaluationService>, rubric: impl Into<String>) -> Self {
        Self {
            service,
            rubric: rubric.into(),
        }
    }

    /// Whether `utterance` is worth sending for evaluation.
    pub fn accepts(utterance: &str) -> bool {
        !utterance.trim().is_empty()
    }

    /// Evaluate `utterance`. `None` means there was nothing to analyze and
    /// the service was not called.
    pub async fn score(&self, utterance: &str) -> Option<ScoreResult> {
        if !Self::accepts(utterance) {
            debug!("Empty utterance, not scoring");
            return None;
        }

        let request = EvaluationRequest {
            rubric_instruction: self.rubric.clone(),
            user_message: utterance.trim().to_string(),
        };

        let result = match self.service.evaluate(request).await {
            Ok(body) => match parse_score(&body) {
                Ok(result) => result,
                Err(e) => {
                    warn!("Unusable evaluation, using neutral fallback: {}", e);
                    ScoreResult::neutral_fallback()
                }
            },
            Err(e) => {
                warn!("Evaluation service failed, using technical fallback: {}", e);
                ScoreResult::technical_error()
            }
        };

        debug!(score = result.score, origin = ?result.origin, "Argument scored");
        Some(result)
    }
}
