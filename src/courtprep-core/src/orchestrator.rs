//! Session orchestration.
//!
//! The orchestrator is the single writer of the [`Session`]. It handles one
//! [`Action`] or one internal event at a time; every background job (reveal
//! ticks, transcription, rebuttal, objection timer, scoring) reports back on
//! one channel, tagged with the session generation it was started under.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::ducking::{AudioDuckingController, BackgroundAudio};
use crate::error::PracticeError;
use crate::persona::{OpponentPersona, Speaker, UserProxyPersona};
use crate::rebuttal::{GenerationService, Rebuttal, RebuttalGenerator};
use crate::recording::{CaptureDevice, RecordingPipeline, Transcriber, TranscriptOutcome};
use crate::scoring::{EvaluationService, ScoreResult, ScoringService};
use crate::session::{Feedback, Phase, Session, SessionView, TranscriptEntry};
use crate::typewriter::{RevealCallback, RevealEvent, RevealId, TypewriterEngine};

/// Something the user did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    /// Advance the dialogue; skips while text is still revealing.
    Continue,
    Skip,
    StartRecording,
    StopRecording,
    GetFeedback,
    Retry,
    SetMusic(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Applied,
    /// Not enabled in the current phase; nothing changed.
    Ignored,
}

/// Completion of a background job.
#[derive(Debug)]
enum Event {
    Reveal(RevealEvent),
    Transcribed(TranscriptOutcome),
    RebuttalReady(Rebuttal),
    ObjectionElapsed,
    Scored(Option<ScoreResult>),
}

#[derive(Debug)]
struct Tagged {
    generation: u64,
    event: Event,
}

/// What happens once the current reveal completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RevealPurpose {
    /// Scripted or status line; wait for the user.
    Line,
    /// The user's transcribed argument; join with the rebuttal.
    Argument,
    /// Opposing counsel's reply.
    Reply,
}

#[derive(Debug, Default)]
enum RebuttalSlot {
    #[default]
    Empty,
    Pending,
    Ready(Rebuttal),
}

/// The devices and services a session runs against.
pub struct Services {
    pub capture: Box<dyn CaptureDevice>,
    pub transcriber: Arc<dyn Transcriber>,
    pub generation: Arc<dyn GenerationService>,
    pub evaluation: Arc<dyn EvaluationService>,
    pub background: Option<Arc<dyn BackgroundAudio>>,
}

pub struct SessionOrchestrator {
    session: Session,
    typewriter: TypewriterEngine,
    recording: RecordingPipeline,
    rebuttals: RebuttalGenerator,
    scoring: ScoringService,
    user_proxy: UserProxyPersona,
    opponent: OpponentPersona,
    objection: Duration,
    revealing: Option<(RevealId, RevealPurpose)>,
    rebuttal: RebuttalSlot,
    pending_reply: Option<String>,
    events_tx: mpsc::UnboundedSender<Tagged>,
    events_rx: mpsc::UnboundedReceiver<Tagged>,
}

impl SessionOrchestrator {
    pub fn new(config: &Config, services: Services) -> Self {
        let user_proxy = config.personas.user_proxy.clone();
        let ducking = AudioDuckingController::new(services.background, config.audio.muted_volume);
        let recording = RecordingPipeline::new(
            services.capture,
            services.transcriber,
            ducking,
            &config.services.language,
            &user_proxy,
        );
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            session: Session::new(0),
            typewriter: TypewriterEngine::new(config.timing.tick()),
            recording,
            rebuttals: RebuttalGenerator::new(services.generation, config),
            scoring: ScoringService::new(services.evaluation, &config.prompts.scoring_rubric),
            user_proxy,
            opponent: config.personas.opponent.clone(),
            objection: config.timing.objection(),
            revealing: None,
            rebuttal: RebuttalSlot::Empty,
            pending_reply: None,
            events_tx,
            events_rx,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn phase(&self) -> Phase {
        self.session.phase()
    }

    pub fn view(&self) -> SessionView {
        let speaker = self.session.speaker();
        let speaker_name = match speaker {
            Speaker::UserProxy => self.user_proxy.name.clone(),
            Speaker::Opponent => self.opponent.name.clone(),
        };

        SessionView {
            generation: self.session.generation(),
            phase: self.session.phase(),
            speaker,
            speaker_name,
            display_text: self.session.display_text().to_string(),
            is_revealing: self.typewriter.is_revealing(),
            is_capturing: self.recording.is_capturing(),
            music_enabled: self.recording.ducking().music_enabled(),
            controls: self.session.controls(),
            score: self.session.score().cloned(),
            nothing_to_analyze: matches!(self.session.feedback(), Some(Feedback::NothingToAnalyze)),
        }
    }

    /// Apply one user action.
    pub async fn apply(&mut self, action: Action) -> ActionOutcome {
        debug!(?action, phase = %self.session.phase(), "Action");
        match self.dispatch(action).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(?action, "Action failed: {}", e);
                ActionOutcome::Ignored
            }
        }
    }

    /// Wait for and handle exactly one internal event.
    ///
    /// Returns `false` if the event channel has closed.
    pub async fn step(&mut self) -> bool {
        match self.events_rx.recv().await {
            Some(tagged) => {
                self.handle(tagged);
                true
            }
            None => false,
        }
    }

    /// Move the orchestrator onto its own task.
    pub fn spawn(mut self) -> SessionHandle {
        let (actions_tx, mut actions_rx) = mpsc::channel::<Action>(32);
        let (view_tx, view_rx) = watch::channel(self.view());

        let task = tokio::spawn(async move {
            enum Input {
                Action(Option<Action>),
                Event(Option<Tagged>),
            }

            loop {
                let input = tokio::select! {
                    action = actions_rx.recv() => Input::Action(action),
                    tagged = self.events_rx.recv() => Input::Event(tagged),
                };
                match input {
                    Input::Action(Some(action)) => {
                        self.apply(action).await;
                    }
                    Input::Event(Some(tagged)) => self.handle(tagged),
                    Input::Action(None) | Input::Event(None) => break,
                }
                view_tx.send_replace(self.view());
            }
            info!("Session closed");
        });

        SessionHandle {
            actions: actions_tx,
            view: view_rx,
            task,
        }
    }

    async fn dispatch(&mut self, action: Action) -> Result<ActionOutcome, PracticeError> {
        let phase = self.session.phase();
        let controls = self.session.controls();

        match action {
            Action::SetMusic(enabled) => {
                self.recording.ducking_mut().set_music_enabled(enabled);
                return Ok(ActionOutcome::Applied);
            }
            Action::Start if controls.start => {
                self.session.advance(Phase::Typing)?;
                let intro = self.user_proxy.intro.clone();
                self.reveal(intro, RevealPurpose::Line);
            }
            Action::Skip | Action::Continue if phase == Phase::Typing => {
                if let Some((id, text)) = self.typewriter.skip() {
                    self.finish_reveal(id, text)?;
                }
            }
            Action::Continue if phase == Phase::AwaitingContinue => match self.session.speaker() {
                Speaker::UserProxy if !self.session.opponent_introduced() => {
                    self.session.mark_opponent_introduced();
                    self.session.set_speaker(Speaker::Opponent);
                    self.session.advance(Phase::Typing)?;
                    let intro = self.opponent.intro.clone();
                    self.reveal(intro, RevealPurpose::Line);
                }
                Speaker::UserProxy => {
                    self.session.advance(Phase::Recording)?;
                    self.session
                        .set_display_text(self.user_proxy.recording_prompt.clone());
                }
                Speaker::Opponent => {
                    self.session.set_speaker(Speaker::UserProxy);
                    self.session.advance(Phase::Typing)?;
                    let prompt = self.user_proxy.turn_prompt.clone();
                    self.reveal(prompt, RevealPurpose::Line);
                }
            },
            Action::StartRecording if controls.recording && !self.recording.is_capturing() => {
                if let Err(e) = self.recording.start().await {
                    warn!("Could not start capture: {}", e);
                    self.session.advance(Phase::Typing)?;
                    let remediation = self.user_proxy.permission_remediation.clone();
                    self.reveal(remediation, RevealPurpose::Line);
                }
            }
            Action::StopRecording if controls.recording => {
                let Some(job) = self.recording.stop().await else {
                    return Ok(ActionOutcome::Ignored);
                };
                self.session.advance(Phase::ProcessingTranscript)?;
                let tx = self.events_tx.clone();
                let generation = self.session.generation();
                tokio::spawn(async move {
                    let outcome = job.run().await;
                    let _ = tx.send(Tagged {
                        generation,
                        event: Event::Transcribed(outcome),
                    });
                });
            }
            Action::GetFeedback if controls.feedback => {
                match self.session.last_user_utterance().map(str::to_string) {
                    Some(utterance) if ScoringService::accepts(&utterance) => {
                        self.session.advance(Phase::Scoring)?;
                        let scoring = self.scoring.clone();
                        let tx = self.events_tx.clone();
                        let generation = self.session.generation();
                        tokio::spawn(async move {
                            let result = scoring.score(&utterance).await;
                            let _ = tx.send(Tagged {
                                generation,
                                event: Event::Scored(result),
                            });
                        });
                    }
                    _ => {
                        info!("No argument recorded yet, nothing to analyze");
                        self.session.advance(Phase::ScoreDisplayed)?;
                        self.session.set_feedback(Feedback::NothingToAnalyze);
                    }
                }
            }
            Action::Retry if controls.retry => {
                self.typewriter.cancel();
                self.revealing = None;
                self.rebuttal = RebuttalSlot::Empty;
                self.pending_reply = None;
                self.session = self.session.successor();
                info!(generation = self.session.generation(), "New practice session");
            }
            _ => {
                debug!(?action, phase = %phase, "Action not enabled");
                return Ok(ActionOutcome::Ignored);
            }
        }

        Ok(ActionOutcome::Applied)
    }

    fn handle(&mut self, tagged: Tagged) {
        let Tagged { generation, event } = tagged;

        // The capture pipeline outlives sessions; always release it.
        if matches!(event, Event::Transcribed(_)) {
            self.recording.finish();
        }

        if generation != self.session.generation() {
            debug!(
                generation,
                current = self.session.generation(),
                "Dropping stale event"
            );
            return;
        }

        if let Err(e) = self.handle_current(event) {
            warn!("Event could not be applied: {}", e);
        }
    }

    fn handle_current(&mut self, event: Event) -> Result<(), PracticeError> {
        match event {
            Event::Reveal(event) if !self.typewriter.is_current(event.id()) => {
                debug!(id = ?event.id(), "Dropping event from a replaced reveal");
            }
            Event::Reveal(RevealEvent::Frame { text, .. }) => self.session.set_display_text(text),
            Event::Reveal(RevealEvent::Complete { id, text }) => self.finish_reveal(id, text)?,
            Event::Transcribed(outcome) => self.on_transcribed(outcome)?,
            Event::RebuttalReady(rebuttal) => {
                if !matches!(self.rebuttal, RebuttalSlot::Pending) {
                    debug!("Unexpected rebuttal, dropping");
                    return Ok(());
                }
                self.rebuttal = RebuttalSlot::Ready(rebuttal);
                if self.session.phase() == Phase::GeneratingRebuttal {
                    self.begin_objection()?;
                }
            }
            Event::ObjectionElapsed => {
                if self.session.phase() != Phase::ObjectionTransition {
                    return Ok(());
                }
                if let Some(reply) = self.pending_reply.take() {
                    self.session.advance(Phase::Typing)?;
                    self.reveal(reply, RevealPurpose::Reply);
                }
            }
            Event::Scored(result) => {
                if self.session.phase() != Phase::Scoring {
                    return Ok(());
                }
                self.session.advance(Phase::ScoreDisplayed)?;
                let feedback = match result {
                    Some(result) => Feedback::Scored(result),
                    None => Feedback::NothingToAnalyze,
                };
                self.session.set_feedback(feedback);
            }
        }
        Ok(())
    }

    fn on_transcribed(&mut self, outcome: TranscriptOutcome) -> Result<(), PracticeError> {
        if self.session.phase() != Phase::ProcessingTranscript {
            return Ok(());
        }

        match outcome {
            TranscriptOutcome::Heard(text) => {
                info!(chars = text.len(), "Argument transcribed");
                let history = self.session.transcript().to_vec();
                self.session.record_utterance(text.clone());
                self.session.push_turn(Speaker::UserProxy, text.clone());
                self.launch_rebuttal(text.clone(), history);
                self.session.advance(Phase::Typing)?;
                self.reveal(text, RevealPurpose::Argument);
            }
            other => {
                self.session.advance(Phase::Typing)?;
                self.reveal(other.display_text().to_string(), RevealPurpose::Line);
            }
        }
        Ok(())
    }

    fn launch_rebuttal(&mut self, utterance: String, history: Vec<TranscriptEntry>) {
        self.rebuttal = RebuttalSlot::Pending;
        let rebuttals = self.rebuttals.clone();
        let tx = self.events_tx.clone();
        let generation = self.session.generation();
        tokio::spawn(async move {
            let rebuttal = rebuttals.generate(&utterance, &history).await;
            let _ = tx.send(Tagged {
                generation,
                event: Event::RebuttalReady(rebuttal),
            });
        });
    }

    fn finish_reveal(&mut self, id: RevealId, text: String) -> Result<(), PracticeError> {
        self.typewriter.acknowledge(id);
        self.session.set_display_text(text);

        let purpose = match self.revealing.take() {
            Some((current, purpose)) if current == id => purpose,
            other => {
                self.revealing = other;
                return Ok(());
            }
        };

        match purpose {
            RevealPurpose::Line | RevealPurpose::Reply => {
                self.session.advance(Phase::AwaitingContinue)?
            }
            RevealPurpose::Argument => match &self.rebuttal {
                RebuttalSlot::Ready(_) => self.begin_objection()?,
                RebuttalSlot::Pending => {
                    debug!("Argument shown, waiting for the reply");
                    self.session.advance(Phase::GeneratingRebuttal)?
                }
                RebuttalSlot::Empty => self.session.advance(Phase::AwaitingContinue)?,
            },
        }
        Ok(())
    }

    fn begin_objection(&mut self) -> Result<(), PracticeError> {
        let RebuttalSlot::Ready(rebuttal) = std::mem::take(&mut self.rebuttal) else {
            return Ok(());
        };

        self.session.advance(Phase::ObjectionTransition)?;
        self.session.set_speaker(Speaker::Opponent);
        self.session.push_turn(Speaker::Opponent, rebuttal.text.clone());
        self.session
            .set_display_text(self.opponent.objection_caption.clone());
        self.pending_reply = Some(rebuttal.text);

        let tx = self.events_tx.clone();
        let generation = self.session.generation();
        let delay = self.objection;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Tagged {
                generation,
                event: Event::ObjectionElapsed,
            });
        });
        Ok(())
    }

    fn reveal(&mut self, text: String, purpose: RevealPurpose) {
        let tx = self.events_tx.clone();
        let generation = self.session.generation();
        let callback: RevealCallback = Arc::new(move |event| {
            let _ = tx.send(Tagged {
                generation,
                event: Event::Reveal(event),
            });
        });

        self.session.set_display_text(String::new());
        let id = self.typewriter.reveal(text, callback);
        self.revealing = Some((id, purpose));
    }
}

/// Control surface for an orchestrator running on its own task.
pub struct SessionHandle {
    actions: mpsc::Sender<Action>,
    view: watch::Receiver<SessionView>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub async fn send(&self, action: Action) -> Result<(), PracticeError> {
        self.actions
            .send(action)
            .await
            .map_err(|_| PracticeError::SessionClosed)
    }

    /// A receiver that is notified after every action and event.
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    /// Stop the session task and wait for it to exit.
    pub async fn shutdown(self) {
        drop(self.actions);
        if let Err(e) = self.task.await {
            warn!("Session task failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::config::default_config;
    use crate::fakes::{
        DeviceStats, FakeBackgroundAudio, FakeCaptureDevice, FakeEvaluation, FakeGeneration,
        FakeTranscriber,
    };

    const ARGUMENT: &str = "I move to dismiss the counterclaim";
    const EVALUATION: &str = r#"{"score": 82, "strengths": ["Clear relief"], "improvements": ["Cite the clause"], "suggestions": ["Slow down"], "legalPoints": ["Notice requirement"]}"#;

    struct Harness {
        orchestrator: SessionOrchestrator,
        device: DeviceStats,
        music: Arc<FakeBackgroundAudio>,
        generation_calls: Arc<AtomicUsize>,
        evaluation_calls: Arc<AtomicUsize>,
    }

    fn harness_with(
        device: FakeCaptureDevice,
        transcriber: FakeTranscriber,
        generation: FakeGeneration,
    ) -> Harness {
        let music = Arc::new(FakeBackgroundAudio::new(0.2));
        let evaluation = FakeEvaluation::replying(EVALUATION);
        let device_stats = device.stats();
        let generation_calls = generation.calls();
        let evaluation_calls = evaluation.calls();

        let services = Services {
            capture: Box::new(device),
            transcriber: Arc::new(transcriber),
            generation: Arc::new(generation),
            evaluation: Arc::new(evaluation),
            background: Some(music.clone() as Arc<dyn BackgroundAudio>),
        };

        Harness {
            orchestrator: SessionOrchestrator::new(&default_config(), services),
            device: device_stats,
            music,
            generation_calls,
            evaluation_calls,
        }
    }

    fn harness() -> Harness {
        harness_with(
            FakeCaptureDevice::with_speech(),
            FakeTranscriber::replying(ARGUMENT),
            FakeGeneration::replying("Objection! The clause was never triggered."),
        )
    }

    /// Process events until `phase` is reached.
    async fn settle(orchestrator: &mut SessionOrchestrator, phase: Phase) {
        while orchestrator.phase() != phase {
            let stepped = tokio::time::timeout(Duration::from_secs(600), orchestrator.step())
                .await
                .unwrap_or_else(|_| panic!("stalled in {} waiting for {}", orchestrator.phase(), phase));
            assert!(stepped);
        }
    }

    /// Start and skip through both introductions to the first recording turn.
    async fn reach_recording(orchestrator: &mut SessionOrchestrator) {
        assert_eq!(orchestrator.apply(Action::Start).await, ActionOutcome::Applied);
        for _ in 0..3 {
            orchestrator.apply(Action::Skip).await;
            assert_eq!(orchestrator.phase(), Phase::AwaitingContinue);
            orchestrator.apply(Action::Continue).await;
        }
        assert_eq!(orchestrator.phase(), Phase::Recording);
    }

    /// Argue once from the start; ends after the reply reveal.
    async fn one_exchange(orchestrator: &mut SessionOrchestrator) {
        reach_recording(orchestrator).await;
        orchestrator.apply(Action::StartRecording).await;
        orchestrator.apply(Action::StopRecording).await;
        assert_eq!(orchestrator.phase(), Phase::ProcessingTranscript);

        settle(orchestrator, Phase::ObjectionTransition).await;
        settle(orchestrator, Phase::AwaitingContinue).await;
    }

    fn visited(orchestrator: &SessionOrchestrator, phase: Phase) -> bool {
        orchestrator
            .session()
            .transitions()
            .iter()
            .any(|t| t.to == phase)
    }

    #[tokio::test(start_paused = true)]
    async fn test_intro_reveals_then_waits() {
        let mut h = harness();
        let o = &mut h.orchestrator;

        assert!(o.view().controls.start);
        o.apply(Action::Start).await;
        assert_eq!(o.phase(), Phase::Typing);
        assert!(o.view().is_revealing);

        settle(o, Phase::AwaitingContinue).await;
        let view = o.view();
        assert_eq!(view.display_text, default_config().personas.user_proxy.intro);
        assert_eq!(view.speaker, Speaker::UserProxy);
        assert_eq!(view.speaker_name, "Phoenix Wright");
        assert!(view.controls.continue_ && view.controls.feedback);
        assert!(!view.is_revealing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_continue_while_typing_skips() {
        let mut h = harness();
        let o = &mut h.orchestrator;

        o.apply(Action::Start).await;
        assert_eq!(o.apply(Action::Continue).await, ActionOutcome::Applied);
        assert_eq!(o.phase(), Phase::AwaitingContinue);
        assert_eq!(o.view().display_text, default_config().personas.user_proxy.intro);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opponent_introduces_before_first_argument() {
        let mut h = harness();
        let o = &mut h.orchestrator;
        let personas = default_config().personas;

        o.apply(Action::Start).await;
        o.apply(Action::Skip).await;
        o.apply(Action::Continue).await;
        assert_eq!(o.phase(), Phase::Typing);
        assert_eq!(o.view().speaker, Speaker::Opponent);
        assert_eq!(o.apply(Action::StartRecording).await, ActionOutcome::Ignored);

        settle(o, Phase::AwaitingContinue).await;
        let view = o.view();
        assert_eq!(view.display_text, personas.opponent.intro);
        assert_eq!(view.speaker_name, "Miles Edgeworth");

        // The floor goes back to the user before the microphone opens.
        o.apply(Action::Continue).await;
        assert_eq!(o.session().speaker(), Speaker::UserProxy);
        o.apply(Action::Skip).await;
        assert_eq!(o.view().display_text, personas.user_proxy.turn_prompt);
        o.apply(Action::Continue).await;
        assert_eq!(o.phase(), Phase::Recording);
        assert_eq!(o.view().speaker, Speaker::UserProxy);
        assert!(o.session().transcript().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_after_reveal_finished_unconsumed() {
        let mut h = harness();
        let o = &mut h.orchestrator;

        o.apply(Action::Start).await;
        // Let the reveal run to the end without handling any of its events.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(o.phase(), Phase::Typing);
        assert!(o.view().is_revealing);

        assert_eq!(o.apply(Action::Skip).await, ActionOutcome::Applied);
        settle(o, Phase::AwaitingContinue).await;
        assert_eq!(o.view().display_text, default_config().personas.user_proxy.intro);
        assert!(!o.view().is_revealing);

        let completions = o
            .session()
            .transitions()
            .iter()
            .filter(|t| t.from == Phase::Typing && t.to == Phase::AwaitingContinue)
            .count();
        assert_eq!(completions, 1);
        assert!(
            tokio::time::timeout(Duration::from_secs(5), o.step())
                .await
                .is_err(),
            "no events left after the completion"
        );

        // The session keeps moving.
        o.apply(Action::Continue).await;
        assert_eq!(o.phase(), Phase::Typing);
        assert_eq!(o.view().speaker, Speaker::Opponent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismiss_motion_with_unreachable_generator() {
        let mut h = harness_with(
            FakeCaptureDevice::with_speech(),
            FakeTranscriber::replying(ARGUMENT),
            FakeGeneration::unreachable(),
        );
        one_exchange(&mut h.orchestrator).await;
        let o = &h.orchestrator;

        let fallback = default_config().personas.opponent.fallback_line;
        assert_eq!(o.phase(), Phase::AwaitingContinue);
        assert_eq!(o.view().display_text, fallback);
        assert_eq!(o.session().speaker(), Speaker::Opponent);
        assert_eq!(o.session().last_user_utterance(), Some(ARGUMENT));

        let transcript = o.session().transcript();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].text, ARGUMENT);
        assert_eq!(transcript[1].speaker, Speaker::Opponent);
        assert_eq!(transcript[1].text, fallback);
        assert_eq!(h.device.acquired(), 1);
        assert_eq!(h.device.released(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_reply_goes_straight_to_objection() {
        let mut h = harness();
        let o = &mut h.orchestrator;

        reach_recording(o).await;
        o.apply(Action::StartRecording).await;
        o.apply(Action::StopRecording).await;

        settle(o, Phase::ObjectionTransition).await;
        assert_eq!(o.view().display_text, "OBJECTION!");
        assert_eq!(o.view().speaker, Speaker::Opponent);
        // The user's argument was fully shown before the objection.
        assert!(
            o.session()
                .transitions()
                .iter()
                .any(|t| t.from == Phase::Typing && t.to == Phase::ObjectionTransition)
        );

        settle(o, Phase::AwaitingContinue).await;
        assert_eq!(o.view().display_text, "Objection! The clause was never triggered.");
        assert!(!visited(o, Phase::GeneratingRebuttal));
        assert_eq!(h.generation_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_reply_waits_in_generating_rebuttal() {
        let mut h = harness_with(
            FakeCaptureDevice::with_speech(),
            FakeTranscriber::replying(ARGUMENT),
            FakeGeneration::delayed("Hold it!", Duration::from_secs(60)),
        );
        let o = &mut h.orchestrator;

        reach_recording(o).await;
        o.apply(Action::StartRecording).await;
        o.apply(Action::StopRecording).await;

        settle(o, Phase::GeneratingRebuttal).await;
        assert_eq!(o.view().display_text, ARGUMENT);
        assert_eq!(o.view().controls, crate::session::Controls::default());

        settle(o, Phase::AwaitingContinue).await;
        assert_eq!(o.view().display_text, "Hold it!");
    }

    #[tokio::test(start_paused = true)]
    async fn test_recording_needs_user_proxy_turn() {
        let mut h = harness();
        let o = &mut h.orchestrator;

        assert_eq!(o.apply(Action::StartRecording).await, ActionOutcome::Ignored);
        one_exchange(o).await;
        assert_eq!(o.session().speaker(), Speaker::Opponent);

        // Continue after the reply hands the floor back instead of recording.
        o.apply(Action::Continue).await;
        assert_eq!(o.phase(), Phase::Typing);
        assert_eq!(o.session().speaker(), Speaker::UserProxy);
        assert_eq!(o.apply(Action::StartRecording).await, ActionOutcome::Ignored);

        o.apply(Action::Skip).await;
        assert_eq!(o.view().display_text, default_config().personas.user_proxy.turn_prompt);
        o.apply(Action::Continue).await;
        assert_eq!(o.phase(), Phase::Recording);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_outside_capture_is_ignored() {
        let mut h = harness();
        let o = &mut h.orchestrator;

        reach_recording(o).await;
        assert_eq!(o.apply(Action::StopRecording).await, ActionOutcome::Ignored);
        assert_eq!(o.phase(), Phase::Recording);
        assert_eq!(h.device.released(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_ducks_background_music() {
        let mut h = harness();
        let o = &mut h.orchestrator;

        o.apply(Action::SetMusic(true)).await;
        assert!(h.music.is_playing());
        reach_recording(o).await;

        o.apply(Action::StartRecording).await;
        assert!(o.view().is_capturing);
        assert_eq!(h.music.current_volume(), 0.0);

        o.apply(Action::StopRecording).await;
        assert_eq!(h.music.current_volume(), 0.2);
        assert!(o.view().music_enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_microphone_reveals_remediation() {
        let mut h = harness_with(
            FakeCaptureDevice::denied(),
            FakeTranscriber::replying(ARGUMENT),
            FakeGeneration::replying("x"),
        );
        let o = &mut h.orchestrator;

        reach_recording(o).await;
        o.apply(Action::StartRecording).await;

        assert_eq!(o.phase(), Phase::Typing);
        settle(o, Phase::AwaitingContinue).await;
        assert_eq!(
            o.view().display_text,
            default_config().personas.user_proxy.permission_remediation
        );
        assert_eq!(h.music.current_volume(), 0.2);

        // The next continue offers the microphone again.
        o.apply(Action::Continue).await;
        assert_eq!(o.phase(), Phase::Recording);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_transcription_is_shown_but_not_argued() {
        let mut h = harness_with(
            FakeCaptureDevice::with_speech(),
            FakeTranscriber::unreachable(),
            FakeGeneration::replying("x"),
        );
        let o = &mut h.orchestrator;

        reach_recording(o).await;
        o.apply(Action::StartRecording).await;
        o.apply(Action::StopRecording).await;

        settle(o, Phase::AwaitingContinue).await;
        assert!(o.view().display_text.starts_with("[Transcription error]"));
        assert!(o.session().transcript().is_empty());
        assert_eq!(o.session().last_user_utterance(), None);
        assert_eq!(h.generation_calls.load(Ordering::SeqCst), 0);
        assert_eq!(o.session().speaker(), Speaker::UserProxy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_feedback_without_argument_skips_scoring() {
        let mut h = harness();
        let o = &mut h.orchestrator;

        o.apply(Action::Start).await;
        o.apply(Action::Skip).await;
        o.apply(Action::GetFeedback).await;

        assert_eq!(o.phase(), Phase::ScoreDisplayed);
        let view = o.view();
        assert!(view.nothing_to_analyze);
        assert!(view.score.is_none());
        assert!(view.controls.retry);
        assert_eq!(h.evaluation_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_feedback_scores_last_argument() {
        let mut h = harness();
        let o = &mut h.orchestrator;

        one_exchange(o).await;
        o.apply(Action::GetFeedback).await;
        assert_eq!(o.phase(), Phase::Scoring);

        settle(o, Phase::ScoreDisplayed).await;
        let score = o.view().score.expect("scored");
        assert_eq!(score.score, 82);
        assert!(!score.is_fallback());
        assert_eq!(h.evaluation_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_starts_a_clean_session() {
        let mut h = harness();
        let o = &mut h.orchestrator;

        one_exchange(o).await;
        o.apply(Action::GetFeedback).await;
        settle(o, Phase::ScoreDisplayed).await;

        assert_eq!(o.apply(Action::Retry).await, ActionOutcome::Applied);
        let session = o.session();
        assert_eq!(session.generation(), 1);
        assert_eq!(session.phase(), Phase::IntroIdle);
        assert_eq!(session.speaker(), Speaker::UserProxy);
        assert!(session.transcript().is_empty());
        assert_eq!(session.last_user_utterance(), None);
        assert!(session.score().is_none());
        assert!(o.view().controls.start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_events_are_dropped() {
        let mut h = harness();
        let o = &mut h.orchestrator;

        o.apply(Action::Start).await;
        o.apply(Action::Skip).await;
        o.apply(Action::GetFeedback).await;
        o.apply(Action::Retry).await;
        assert_eq!(o.session().generation(), 1);

        let stale = [
            Event::RebuttalReady(Rebuttal {
                text: "Too late".to_string(),
                is_fallback: false,
            }),
            Event::ObjectionElapsed,
            Event::Scored(Some(ScoreResult::neutral_fallback())),
            Event::Transcribed(TranscriptOutcome::Heard("old".to_string())),
        ];
        for event in stale {
            o.events_tx.send(Tagged { generation: 0, event }).unwrap();
            assert!(o.step().await);
        }

        assert_eq!(o.phase(), Phase::IntroIdle);
        assert!(o.session().transcript().is_empty());
        assert!(o.session().score().is_none());
        assert_eq!(o.view().display_text, "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_actions_outside_their_phase_are_ignored() {
        let mut h = harness();
        let o = &mut h.orchestrator;

        for action in [
            Action::Continue,
            Action::Skip,
            Action::StopRecording,
            Action::GetFeedback,
            Action::Retry,
        ] {
            assert_eq!(o.apply(action).await, ActionOutcome::Ignored, "{action:?}");
        }
        assert_eq!(o.phase(), Phase::IntroIdle);
        assert!(o.session().transitions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_session_publishes_views() {
        let h = harness();
        let handle = h.orchestrator.spawn();
        let mut views = handle.subscribe();

        handle.send(Action::Start).await.unwrap();
        handle.send(Action::Skip).await.unwrap();
        let view = tokio::time::timeout(
            Duration::from_secs(10),
            views.wait_for(|v| v.phase == Phase::AwaitingContinue),
        )
        .await
        .expect("view published")
        .expect("session alive")
        .clone();

        assert_eq!(view.display_text, default_config().personas.user_proxy.intro);
        assert_eq!(handle.view().phase, Phase::AwaitingContinue);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_skip_right_after_final_frame() {
        let h = harness();
        let handle = h.orchestrator.spawn();
        let mut views = handle.subscribe();
        let intro = default_config().personas.user_proxy.intro;

        handle.send(Action::Start).await.unwrap();
        tokio::time::timeout(
            Duration::from_secs(60),
            views.wait_for(|v| v.display_text == intro),
        )
        .await
        .expect("final frame published")
        .expect("session alive");
        handle.send(Action::Skip).await.unwrap();

        let view = tokio::time::timeout(
            Duration::from_secs(10),
            views.wait_for(|v| v.phase == Phase::AwaitingContinue),
        )
        .await
        .expect("reveal completed")
        .expect("session alive")
        .clone();
        assert_eq!(view.display_text, intro);
        assert!(!view.is_revealing);

        handle.send(Action::Continue).await.unwrap();
        let view = tokio::time::timeout(
            Duration::from_secs(10),
            views.wait_for(|v| v.speaker == Speaker::Opponent),
        )
        .await
        .expect("opponent introduced")
        .expect("session alive")
        .clone();
        assert_eq!(view.phase, Phase::Typing);
        handle.shutdown().await;
    }
}
