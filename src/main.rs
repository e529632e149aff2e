use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

use driveassist::session::system_instruction;
use driveassist::voice::{
    AudioInputSource, CAPTURE_BLOCK_SIZE, PLAYBACK_SAMPLE_RATE, samples_to_wav,
};
use driveassist::{
    CapturePipeline, Config, LiveConnector, MicrophoneSource, PlaybackScheduler, Session,
    SessionCommand, SessionSnapshot, SpeakerSink, SystemDialer, TaskStore, ToolDispatcher,
};

/// DriveAssist - Real-time voice co-pilot for drivers
#[derive(Parser)]
#[command(name = "driveassist", version, about)]
struct Cli {
    /// JSON task list to load
    #[arg(short, long, env = "DRIVEASSIST_TASKS")]
    tasks: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Start a live voice session (default)
    Run,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Write the recording as 16-bit mono WAV
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Test speaker output through the playback scheduler
    TestSpeaker,
    /// Show the loaded task list and system instruction
    Tasks,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,driveassist=info",
        1 => "info,driveassist=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Command::TestMic { duration, output }) => test_mic(duration, output.as_deref()).await,
        Some(Command::TestSpeaker) => test_speaker().await,
        Some(Command::Tasks) => {
            let config = Config::load()?;
            let tasks = load_tasks(cli.tasks.or(config.tasks_path.clone()).as_deref())?;
            show_tasks(&config, &tasks);
            Ok(())
        }
        Some(Command::Run) | None => run_session(cli.tasks).await,
    }
}

/// Load the task list, or an empty one when no path is configured
fn load_tasks(path: Option<&Path>) -> anyhow::Result<TaskStore> {
    let Some(path) = path else {
        tracing::info!("no task list configured");
        return Ok(TaskStore::default());
    };
    let store = TaskStore::load(path)?;
    tracing::info!(path = %path.display(), tasks = store.len(), "loaded task list");
    Ok(store)
}

/// Run the live session until the user quits
#[allow(clippy::future_not_send)]
async fn run_session(tasks_override: Option<PathBuf>) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    let api_key = config.take_api_key()?;
    let tasks = load_tasks(tasks_override.or(config.tasks_path.take()).as_deref())?;

    let connector = Arc::new(LiveConnector::new(config.endpoint.clone(), api_key));
    let mut session = Session::new(
        config.session,
        connector,
        CapturePipeline::new(Box::new(MicrophoneSource::new())),
        PlaybackScheduler::new(Box::new(SpeakerSink::new())),
        ToolDispatcher::new(tasks.shared()),
        Arc::new(SystemDialer::new(config.dial_command)),
    );

    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    spawn_stdin_commands(commands_tx.clone());
    spawn_ctrl_c(commands_tx.clone());
    tokio::spawn(print_snapshots(session.subscribe()));

    println!("DriveAssist ready. Enter or 's' toggles the session, 'q' quits.");
    let _ = commands_tx.send(SessionCommand::Start);

    session.run(commands_rx).await;
    tracing::info!("driveassist stopped");
    Ok(())
}

/// Map stdin lines to session commands
fn spawn_stdin_commands(commands: mpsc::UnboundedSender<SessionCommand>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let command = match lines.next_line().await {
                Ok(Some(line)) => match line.trim() {
                    "" | "s" => SessionCommand::Toggle,
                    "q" => SessionCommand::Shutdown,
                    other => {
                        println!("unknown input {other:?}: Enter or 's' toggles, 'q' quits");
                        continue;
                    }
                },
                Ok(None) => SessionCommand::Shutdown,
                Err(e) => {
                    tracing::warn!(error = %e, "stdin read failed");
                    SessionCommand::Shutdown
                }
            };
            let quit = command == SessionCommand::Shutdown;
            if commands.send(command).is_err() || quit {
                break;
            }
        }
    });
}

fn spawn_ctrl_c(commands: mpsc::UnboundedSender<SessionCommand>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received");
            let _ = commands.send(SessionCommand::Shutdown);
        }
    });
}

/// Print what changed between consecutive snapshots
async fn print_snapshots(mut snapshots: watch::Receiver<SessionSnapshot>) {
    let mut last = SessionSnapshot::default();
    while snapshots.changed().await.is_ok() {
        let current = snapshots.borrow_and_update().clone();

        if current.status_line != last.status_line {
            println!("[{}]", current.status_line);
        }
        if !current.user_text.is_empty() && current.user_text != last.user_text {
            println!("  you: {}", current.user_text);
        }
        if !current.assistant_text.is_empty() && current.assistant_text != last.assistant_text {
            println!("  assistant: {}", current.assistant_text);
        }
        if current.calling != last.calling
            && let Some(task) = &current.calling
        {
            println!("  calling {} ({})", task.display_name, task.phone_number);
        }

        last = current;
    }
}

fn show_tasks(config: &Config, tasks: &TaskStore) {
    println!("{} task(s) loaded", tasks.len());
    for task in tasks.all() {
        println!("{}", task.context_line());
    }
    println!("\n--- system instruction ---\n");
    println!("{}", system_instruction(&config.session.instruction, tasks));
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64, output: Option<&Path>) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut source = MicrophoneSource::new();
    source.open()?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    source.start(CAPTURE_BLOCK_SIZE, tx)?;

    let sample_rate = source.sample_rate();
    println!("Sample rate: {sample_rate} Hz, block size: {CAPTURE_BLOCK_SIZE}");
    println!("---");

    let mut recording = Vec::new();
    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let mut samples = Vec::new();
        while let Ok(block) = rx.try_recv() {
            samples.extend(block?);
        }

        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );

        recording.extend(samples);
    }

    source.close();

    if let Some(path) = output {
        std::fs::write(path, samples_to_wav(&recording, sample_rate)?)?;
        println!("\nWrote {} samples to {}", recording.len(), path.display());
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave split into back-to-back buffers
#[allow(clippy::future_not_send)]
async fn test_speaker() -> anyhow::Result<()> {
    const BUFFERS: usize = 8;

    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let mut playback = PlaybackScheduler::new(Box::new(SpeakerSink::new()));
    playback.open()?;

    // 2 seconds of 440Hz sine wave at the live output rate
    let frequency = 440.0_f32;
    let num_samples = PLAYBACK_SAMPLE_RATE as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    for chunk in samples.chunks(num_samples / BUFFERS) {
        if let Some(buffer) = playback.schedule_samples(chunk.to_vec())? {
            println!(
                "scheduled {:.3}s..{:.3}s",
                buffer.start_time,
                buffer.end_time()
            );
        }
    }
    playback.finish_turn()?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !playback.is_drained() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    playback.close();

    println!("\n---");
    println!("If you heard one continuous tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}
