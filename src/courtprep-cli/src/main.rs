//! CourtPrep CLI - Courtroom argument practice
//!
//! Argue a case against an AI opposing counsel from the terminal, then get
//! scored feedback on your argument.

use std::env;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgAction, Parser};
use colored::Colorize;
use courtprep_core::capture::WavFileCapture;
use courtprep_core::recording::CaptureDevice;
use courtprep_core::services::{ApiEndpoint, DEFAULT_API_BASE, OpenAiChat, WhisperTranscriber};
use courtprep_core::{
    Action, Config, Phase, RebuttalContext, ScoreOrigin, ScoreResult, Services, SessionOrchestrator,
    SessionView, Speaker, default_config,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "courtprep",
    version,
    about = "Courtroom practice - argue your case against an AI prosecutor",
    long_about = "Practice courtroom arguments against an AI opposing counsel using OpenAI-compatible APIs for transcription, rebuttals and scoring."
)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Recorded argument to use in place of the microphone (repeat for several turns)
    #[arg(short, long, action = ArgAction::Append, value_name = "WAV")]
    take: Vec<PathBuf>,

    /// Capture arguments from the default microphone
    #[cfg(feature = "device-audio")]
    #[arg(long)]
    microphone: bool,

    /// Background track to loop during the session
    #[cfg(feature = "device-audio")]
    #[arg(long, value_name = "WAV")]
    music: Option<PathBuf>,

    /// Start with the background track paused
    #[arg(long)]
    no_music: bool,

    /// Chat model for the opposing counsel
    #[arg(short, long, value_name = "MODEL")]
    model: Option<String>,

    /// Chat model for scoring
    #[arg(long, value_name = "MODEL")]
    scoring_model: Option<String>,

    /// Let the opposing counsel see every earlier turn, not just the latest
    #[arg(long)]
    full_transcript: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => default_config(),
    };
    if let Some(model) = &cli.model {
        config.services.chat_model = model.clone();
    }
    if let Some(model) = &cli.scoring_model {
        config.services.scoring_model = model.clone();
    }
    if cli.full_transcript {
        config.rebuttal.context = RebuttalContext::FullTranscript;
    }

    // Get API configuration from environment
    let api_base = env::var("OPENAI_API_BASE")
        .or_else(|_| env::var("OPENAI_BASE_URL"))
        .unwrap_or_else(|_| DEFAULT_API_BASE.to_string());

    let api_key = env::var("OPENAI_API_KEY").unwrap_or_else(|_| {
        eprintln!(
            "{}",
            "Warning: OPENAI_API_KEY not set. API calls may fail.".yellow()
        );
        String::new()
    });
    let endpoint = ApiEndpoint::new(api_base, api_key);

    let services = Services {
        capture: capture_device(&cli),
        transcriber: Arc::new(WhisperTranscriber::new(endpoint.clone(), &config.services)?),
        generation: Arc::new(OpenAiChat::for_rebuttals(&endpoint, &config.services)?),
        evaluation: Arc::new(OpenAiChat::for_scoring(&endpoint, &config.services)?),
        background: background_track(&cli, &config),
    };
    let has_music = services.background.is_some();

    print_header(&config);

    let handle = SessionOrchestrator::new(&config, services).spawn();
    if has_music && !cli.no_music {
        handle.send(Action::SetMusic(true)).await?;
    }

    let mut views = handle.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut renderer = Renderer::default();
    renderer.render(&handle.view())?;

    loop {
        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                renderer.render(&view)?;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let view = handle.view();
                match key_action(line.trim(), &view) {
                    Key::Action(action) => handle.send(action).await?,
                    Key::Quit => break,
                    Key::Unknown => renderer.hint(&view),
                }
            }
        }
    }

    handle.shutdown().await;
    println!();
    println!("{}", "  Court is adjourned.".bright_green().bold());
    println!();

    Ok(())
}

fn capture_device(cli: &Cli) -> Box<dyn CaptureDevice> {
    #[cfg(feature = "device-audio")]
    if cli.microphone {
        info!("Capturing from the default microphone");
        return Box::new(courtprep_core::device::CpalMicrophone::new());
    }

    if cli.take.is_empty() {
        warn!("No recorded takes given; recording will report the microphone as unavailable");
    } else {
        info!(takes = cli.take.len(), "Using recorded takes in place of the microphone");
    }
    Box::new(WavFileCapture::new(cli.take.clone()))
}

#[cfg(feature = "device-audio")]
fn background_track(
    cli: &Cli,
    config: &Config,
) -> Option<Arc<dyn courtprep_core::ducking::BackgroundAudio>> {
    let path = cli.music.as_ref()?;
    match courtprep_core::device::LoopingTrack::open(path, config.audio.music_volume) {
        Ok(track) => Some(Arc::new(track) as Arc<dyn courtprep_core::ducking::BackgroundAudio>),
        Err(e) => {
            warn!("Background track unavailable: {}", e);
            None
        }
    }
}

#[cfg(not(feature = "device-audio"))]
fn background_track(
    _cli: &Cli,
    _config: &Config,
) -> Option<Arc<dyn courtprep_core::ducking::BackgroundAudio>> {
    None
}

enum Key {
    Action(Action),
    Quit,
    Unknown,
}

/// Map one line of input to an action for the current view.
fn key_action(line: &str, view: &SessionView) -> Key {
    match line {
        "" if view.controls.start => Key::Action(Action::Start),
        "" => Key::Action(Action::Continue),
        "s" => Key::Action(Action::Start),
        "r" if view.is_capturing => Key::Action(Action::StopRecording),
        "r" => Key::Action(Action::StartRecording),
        "f" => Key::Action(Action::GetFeedback),
        "m" => Key::Action(Action::SetMusic(!view.music_enabled)),
        "n" => Key::Action(Action::Retry),
        "q" => Key::Quit,
        _ => Key::Unknown,
    }
}

fn print_header(config: &Config) {
    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!(
        "{}",
        format!("  {} - {}", "CourtPrep".bold(), config.case.title)
            .bright_blue()
            .bold()
    );
    println!("{}", "═".repeat(70).bright_blue());
    println!();
    for line in textwrap(config.case.facts.trim(), 66).lines() {
        println!("  {}", line.dimmed());
    }
    println!();
    println!(
        "  {} {}",
        "Defense:".bold(),
        config.personas.user_proxy.display_name_with_role().bright_cyan()
    );
    println!(
        "  {} {}",
        "Prosecution:".bold(),
        config.personas.opponent.display_name_with_role().bright_red()
    );
    println!("{}", "─".repeat(70).dimmed());
}

/// Draws views as an append-only transcript.
#[derive(Default)]
struct Renderer {
    shown: String,
    phase: Option<Phase>,
}

impl Renderer {
    fn render(&mut self, view: &SessionView) -> io::Result<()> {
        let entered = self.phase != Some(view.phase);
        self.phase = Some(view.phase);
        let new_block = entered
            && matches!(
                view.phase,
                Phase::Typing | Phase::ObjectionTransition | Phase::Recording
            );

        let mut out = io::stdout().lock();
        if view.display_text.is_empty() {
            self.shown.clear();
        } else if !new_block && !self.shown.is_empty() && view.display_text.starts_with(&self.shown) {
            write!(out, "{}", &view.display_text[self.shown.len()..])?;
            self.shown = view.display_text.clone();
        } else if new_block || view.display_text != self.shown {
            writeln!(out)?;
            writeln!(out)?;
            let name = format!("{}:", view.speaker_name);
            match view.speaker {
                Speaker::UserProxy => writeln!(out, "{}", name.bright_cyan().bold())?,
                Speaker::Opponent => writeln!(out, "{}", name.bright_red().bold())?,
            }
            if view.phase == Phase::ObjectionTransition {
                write!(out, "  {}", view.display_text.red().bold())?;
            } else {
                write!(out, "  {}", view.display_text)?;
            }
            self.shown = view.display_text.clone();
        }
        out.flush()?;
        drop(out);

        if entered {
            match view.phase {
                Phase::Scoring => println!(
                    "\n\n  {}",
                    "The court is evaluating your argument...".dimmed()
                ),
                Phase::ScoreDisplayed => print_feedback(view),
                _ => {}
            }
            if !view.is_revealing && !matches!(view.phase, Phase::Typing | Phase::ObjectionTransition) {
                self.hint(view);
            }
        }
        Ok(())
    }

    fn hint(&self, view: &SessionView) {
        let mut keys = Vec::new();
        let controls = view.controls;
        if controls.start {
            keys.push("[Enter/s] start");
        }
        if controls.continue_ {
            keys.push("[Enter] continue");
        }
        if controls.recording {
            keys.push(if view.is_capturing { "[r] stop recording" } else { "[r] record" });
        }
        if controls.feedback {
            keys.push("[f] feedback");
        }
        if controls.retry {
            keys.push("[n] new session");
        }
        keys.push("[m] music");
        keys.push("[q] quit");
        println!("\n  {}", keys.join("  ").dimmed());
    }
}

fn print_feedback(view: &SessionView) {
    println!();
    println!("{}", "═".repeat(70).bright_magenta());
    match &view.score {
        Some(score) => print_score(score),
        None if view.nothing_to_analyze => {
            println!(
                "  {}",
                "Nothing to analyze yet. Make an argument first, then ask for feedback.".yellow()
            );
        }
        None => {}
    }
    println!("{}", "═".repeat(70).bright_magenta());
}

fn print_score(score: &ScoreResult) {
    let headline = format!("  SCORE: {}/100", score.score);
    let headline = match score.score {
        80..=u8::MAX => headline.bright_green().bold(),
        60..=79 => headline.yellow().bold(),
        _ => headline.red().bold(),
    };
    println!("{}", headline);
    if score.origin == ScoreOrigin::TechnicalError {
        println!("  {}", "(the evaluation service could not be reached)".dimmed());
    }

    for (title, items) in [
        ("Strengths", &score.strengths),
        ("Improvements", &score.improvements),
        ("Suggestions", &score.suggestions),
        ("Legal points", &score.legal_points),
    ] {
        println!();
        println!("  {}", title.bold());
        for item in items {
            let wrapped = textwrap(item, 62);
            for (i, line) in wrapped.lines().enumerate() {
                let bullet = if i == 0 { "•" } else { " " };
                println!("    {} {}", bullet, line);
            }
        }
    }
}

/// Simple text wrapping function.
fn textwrap(text: &str, width: usize) -> String {
    let mut result = String::new();
    let mut current_line_len = 0;

    for word in text.split_whitespace() {
        if current_line_len + word.len() + 1 > width && current_line_len > 0 {
            result.push('\n');
            current_line_len = 0;
        }
        if current_line_len > 0 {
            result.push(' ');
            current_line_len += 1;
        }
        result.push_str(word);
        current_line_len += word.len();
    }

    result
}
