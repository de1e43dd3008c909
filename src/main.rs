use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{Mutex, oneshot};
use tracing_subscriber::EnvFilter;

use storyplay::console::{Console, ConsoleCommand};
use storyplay::perception::{OverlaySink, TracingOverlay};
use storyplay::settings::{KNOWN_ACTIONS, LANGUAGES};
use storyplay::story::HttpStoryBackend;
use storyplay::{
    AudioSink, Config, DialogueLine, GestureAdapter, HttpNarrationBackend, MuteBackend,
    NarrationBackend, NarrationHandle, Narrator, Notice, ObjectAdapter, Outcome, Perception,
    SettingsStore, SilentSink, Speaker, SpeechControl, StoryGenerator, StoryPlayer, StoryRequest,
    StorySource,
};

/// How long a line is held when no audio is produced
const SILENT_LINE: Duration = Duration::from_millis(800);

/// Storyplay - Interactive stories for children
#[derive(Parser)]
#[command(name = "storyplay", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Play a story in the terminal
    Play {
        /// Skip generation and play the built-in story
        #[arg(long)]
        demo: bool,

        /// Child's name to weave into the story
        #[arg(long, env = "STORYPLAY_CHILD_NAME")]
        child_name: Option<String>,
    },
    /// Generate a story and print it as JSON
    Story {
        /// Print the built-in story instead
        #[arg(long)]
        demo: bool,

        /// Child's name to weave into the story
        #[arg(long)]
        child_name: Option<String>,
    },
    /// Synthesize and play one line
    Say {
        /// Text to speak
        #[arg(default_value = "Once upon a time, a friendly cloud floated in the sky.")]
        text: String,

        /// Voice to use (Mom, Dad, Narrator, Friend)
        #[arg(short, long, default_value = "Narrator")]
        speaker: String,
    },
    /// Show or change story settings
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print current settings
    Show,
    /// Add a target word
    AddWord {
        /// Word to add
        word: String,
    },
    /// Remove a target word
    RemoveWord {
        /// Word to remove
        word: String,
    },
    /// Enable or disable an action
    ToggleAction {
        /// Action id (e.g. "wave")
        action: String,
    },
    /// Enable or disable a story language
    ToggleLanguage {
        /// Language code (e.g. "es")
        code: String,
    },
    /// Set the primary story language
    Primary {
        /// Language code; must be enabled
        code: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,storyplay=info",
        1 => "info,storyplay=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Play { demo, child_name } => play(demo, child_name).await,
        Command::Story { demo, child_name } => print_story(demo, child_name).await,
        Command::Say { text, speaker } => say(&text, &speaker).await,
        Command::Settings { action } => settings(action.unwrap_or(SettingsAction::Show)),
    }
}

async fn generate(
    config: &Config,
    demo: bool,
    child_name: Option<String>,
) -> anyhow::Result<storyplay::GeneratedStory> {
    if demo {
        return Ok(StoryGenerator::demo());
    }

    let settings = SettingsStore::new().load()?;
    let request = StoryRequest::from_settings(&settings, child_name);

    let backend = config.services.story_url.clone().map(|url| {
        Arc::new(HttpStoryBackend::new(url, config.services.api_key()))
            as Arc<dyn storyplay::story::StoryBackend>
    });

    let generator = StoryGenerator::new(backend, config.services.story_timeout());
    Ok(generator.generate(&request).await)
}

fn narrator(config: &Config) -> Narrator {
    let backend: Arc<dyn NarrationBackend> = match &config.services.audio_url {
        Some(url) => Arc::new(HttpNarrationBackend::new(url.clone(), config.services.api_key())),
        None => Arc::new(MuteBackend),
    };

    Narrator::new(backend, audio_sink(config), config.narration.cache_capacity)
}

#[cfg(feature = "speaker")]
fn audio_sink(config: &Config) -> Box<dyn AudioSink> {
    if config.services.audio_url.is_none() {
        return Box::new(SilentSink::new(SILENT_LINE));
    }

    match storyplay::narration::SpeakerSink::new() {
        Ok(sink) => Box::new(sink),
        Err(e) => {
            tracing::warn!(error = %e, "no speaker available, narrating silently");
            Box::new(SilentSink::new(SILENT_LINE))
        }
    }
}

#[cfg(not(feature = "speaker"))]
fn audio_sink(_config: &Config) -> Box<dyn AudioSink> {
    Box::new(SilentSink::new(SILENT_LINE))
}

async fn play(demo: bool, child_name: Option<String>) -> anyhow::Result<()> {
    let config = Config::load()?;
    let generated = generate(&config, demo, child_name).await?;

    println!("\n*** {} ***", generated.story.title);
    if let StorySource::Fallback { reason } = &generated.source {
        println!("(using the built-in story: {reason})");
    }
    println!("Type: gesture wave 0.9 | object blue cup 0.8 | say hello | hide | show | quit\n");

    let console = Console::new();
    let overlay: Arc<dyn OverlaySink> = Arc::new(TracingOverlay);

    let perception = Perception {
        camera: console.camera(),
        gesture: Some(Arc::new(Mutex::new(GestureAdapter::new(
            console.gesture_model(),
            Arc::clone(&overlay),
        )))),
        object: Some(Arc::new(Mutex::new(ObjectAdapter::new(
            console.object_model(),
            overlay,
        )))),
        recognizer: Some(console.recognizer()),
    };

    let narration = NarrationHandle::spawn(narrator(&config));
    let (player, mut notices) = StoryPlayer::new(&generated.story, perception, narration, &config);

    let (quit_tx, quit_rx) = oneshot::channel();
    tokio::spawn(read_console(console, player.speech_control(), quit_tx));

    tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            print_notice(&notice);
        }
    });

    let cancel = async move {
        tokio::select! {
            quit = quit_rx => {
                // Closed stdin is not a request to leave
                if quit.is_err() {
                    std::future::pending::<()>().await;
                }
            }
            _ = tokio::signal::ctrl_c() => {}
        }
    };

    match player.run(cancel).await {
        Outcome::Completed => println!("\nThe end! Great job!"),
        Outcome::Cancelled => println!("\nSee you next time!"),
    }

    Ok(())
}

async fn read_console(console: Console, speech: Option<SpeechControl>, quit: oneshot::Sender<()>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }

        let command = match line.parse::<ConsoleCommand>() {
            Ok(command) => command,
            Err(e) => {
                println!("  {e}");
                continue;
            }
        };

        match &command {
            ConsoleCommand::Quit => {
                let _ = quit.send(());
                return;
            }
            ConsoleCommand::Hide | ConsoleCommand::Show => {
                if let Some(speech) = &speech {
                    speech.set_visible(command == ConsoleCommand::Show);
                }
            }
            ConsoleCommand::Say(_) => {
                if !console.apply(&command) {
                    println!("  (not listening right now)");
                }
            }
            ConsoleCommand::Gesture { .. } | ConsoleCommand::Object { .. } => {
                console.apply(&command);
            }
        }
    }
}

fn print_notice(notice: &Notice) {
    match notice {
        Notice::State { scene, state } => println!("-- scene {} [{state}]", scene + 1),
        Notice::Narrating { speaker, text } => println!("{speaker}: {text}"),
        Notice::Heard { transcript, is_final } => {
            if *is_final {
                println!("  (heard \"{transcript}\")");
            }
        }
        Notice::Degraded { modality, reason } => println!("  ! {modality} unavailable: {reason}"),
        Notice::Error(message) => println!("  ! {message}"),
        Notice::Finished(_) => {}
    }
}

async fn print_story(demo: bool, child_name: Option<String>) -> anyhow::Result<()> {
    let config = Config::load()?;
    let generated = generate(&config, demo, child_name).await?;

    if let StorySource::Fallback { reason } = &generated.source {
        tracing::warn!(reason = %reason, "printing fallback story");
    }

    println!("{}", serde_json::to_string_pretty(&generated.story)?);
    Ok(())
}

/// Synthesize one line and play it
async fn say(text: &str, speaker: &str) -> anyhow::Result<()> {
    let config = Config::load()?;
    if config.services.audio_url.is_none() {
        anyhow::bail!("no narration service configured (set STORYPLAY_AUDIO_URL)");
    }

    let speaker = Speaker::from(speaker);
    println!("{speaker}: \"{text}\"");

    let mut narrator = narrator(&config);
    let line = DialogueLine::new(speaker, text, "neutral");

    let audio = narrator.audio_for(&line).await?;
    println!("Got {} bytes of audio data", audio.len());

    narrator.speak(&line).await?;
    println!("\nIf you heard the line, narration is working!");

    Ok(())
}

fn settings(action: SettingsAction) -> anyhow::Result<()> {
    let store = SettingsStore::new();

    match action {
        SettingsAction::Show => {}
        SettingsAction::AddWord { word } => store.update(|s| s.add_word(&word))?,
        SettingsAction::RemoveWord { word } => store.update(|s| s.remove_word(&word))?,
        SettingsAction::ToggleAction { action } => {
            let enabled = store.update(|s| s.toggle_action(&action))?;
            println!("{action}: {}", if enabled { "enabled" } else { "disabled" });
        }
        SettingsAction::ToggleLanguage { code } => {
            let enabled = store.update(|s| s.toggle_language(&code))?;
            println!("{code}: {}", if enabled { "enabled" } else { "disabled" });
        }
        SettingsAction::Primary { code } => store.update(|s| s.set_primary(&code))?,
    }

    let settings = store.load()?;

    println!("Settings ({})", store.path().display());
    println!("  words:     {}", settings.words.join(", "));
    println!(
        "  actions:   {}",
        settings
            .actions
            .iter()
            .map(|a| display_name(KNOWN_ACTIONS, a))
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!(
        "  languages: {}",
        settings
            .languages
            .iter()
            .map(|l| display_name(LANGUAGES, l))
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("  primary:   {}", display_name(LANGUAGES, &settings.primary_language));

    Ok(())
}

fn display_name(table: &[(&str, &str)], id: &str) -> String {
    table
        .iter()
        .find(|(key, _)| *key == id)
        .map_or_else(|| id.to_string(), |(_, name)| (*name).to_string())
}
