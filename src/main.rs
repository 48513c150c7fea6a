use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use readaloud::voice::renderer;
use readaloud::{
    AudioOutput, AudioPlayback, Chunker, ClockedSink, Config, SessionController, SessionEvent,
    SinkConfig, StreamStatus, TextToSpeech,
};

/// readaloud - stream long-form text as speech
#[derive(Parser)]
#[command(name = "readaloud", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read a document aloud
    ///
    /// While playing, type `p` (pause), `r` (resume), `retry`, `s` (stop)
    /// or `q` (quit) followed by Enter.
    Read {
        /// Text or markdown file, `-` for stdin
        path: PathBuf,
        /// Char offset in the normalized text to start from
        #[arg(long, default_value = "0")]
        from: usize,
        /// Render without an audio device
        #[arg(long)]
        headless: bool,
        /// Record the rendered audio to a WAV file (implies --headless)
        #[arg(long)]
        wav: Option<PathBuf>,
    },
    /// Show how a document will be chunked
    Chunks {
        /// Text or markdown file, `-` for stdin
        path: PathBuf,
        /// Char offset in the normalized text to start from
        #[arg(long, default_value = "0")]
        from: usize,
        /// Print chunks as JSON
        #[arg(long)]
        json: bool,
    },
    /// Test speaker output through the streaming renderer
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,readaloud=info",
        1 => "info,readaloud=debug",
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

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command {
        Command::Read {
            path,
            from,
            headless,
            wav,
        } => read_aloud(&config, &path, from, headless, wav).await,
        Command::Chunks { path, from, json } => show_chunks(&config, &path, from, json),
        Command::TestSpeaker => test_speaker(&config).await,
    }
}

/// Load document text from a file or stdin
fn read_input(path: &Path) -> anyhow::Result<String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::Read::read_to_string(&mut std::io::stdin(), &mut text)?;
        Ok(text)
    } else {
        Ok(std::fs::read_to_string(path)?)
    }
}

/// Open the render domain: the sound card, or a clocked thread
fn open_output(
    config: &Config,
    renderer: readaloud::Renderer,
    headless: bool,
    wav: Option<PathBuf>,
) -> anyhow::Result<Box<dyn AudioOutput>> {
    if headless || wav.is_some() {
        let sink = ClockedSink::spawn(
            renderer,
            SinkConfig {
                sample_rate: config.playback.sample_rate,
                frames_per_callback: config.playback.frames_per_callback,
                wav_path: wav,
            },
        )?;
        Ok(Box::new(sink))
    } else {
        Ok(Box::new(AudioPlayback::open(
            renderer,
            config.playback.sample_rate,
        )?))
    }
}

/// Stream a document through the configured TTS backend
#[allow(clippy::future_not_send)]
async fn read_aloud(
    config: &Config,
    path: &Path,
    from: usize,
    headless: bool,
    wav: Option<PathBuf>,
) -> anyhow::Result<()> {
    let text = read_input(path)?;
    let tts = Arc::new(TextToSpeech::from_config(&config.tts, &config.api_keys)?);

    let (renderer_handle, renderer, reports) = renderer::channel(
        config.playback.command_capacity,
        config.playback.report_capacity,
    );
    let output = open_output(config, renderer, headless, wav)?;

    let (session, task) = SessionController::spawn(
        tts,
        renderer_handle,
        reports,
        config.stream.session_options(),
    );
    let mut events = session.subscribe();
    let generation = session.start_at(text, from).await?;

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SessionEvent::Status { generation: g, status }) if g == generation => {
                    match status {
                        StreamStatus::Completed => {
                            println!("Finished.");
                            break;
                        }
                        StreamStatus::Error { .. } => {
                            println!("Type `retry` to try again.");
                        }
                        StreamStatus::Idle => break,
                        other => tracing::debug!(status = ?other, "status"),
                    }
                }
                Ok(SessionEvent::ChunkFailed { generation: g, chunk, message }) if g == generation => {
                    println!("Chunk {chunk} failed to synthesize: {message}");
                }
                Ok(SessionEvent::Progress { generation: g, chunk, offset }) if g == generation => {
                    println!("[chunk {chunk} @ {offset}]");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if !handle_input(line.trim(), &session, output.as_ref()).await {
                        break;
                    }
                }
                Ok(None) | Err(_) => stdin_open = false,
            },
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        }
    }

    session.stop().await?;
    session.shutdown().await;
    task.await?;
    output.finish()?;

    Ok(())
}

/// Apply one line of interactive input; returns false to quit
async fn handle_input(
    input: &str,
    session: &readaloud::SessionHandle,
    output: &dyn AudioOutput,
) -> bool {
    let result = match input {
        "p" | "pause" => match session.pause().await {
            Ok(()) => output.suspend(),
            Err(e) => Err(e),
        },
        "r" | "resume" => match output.resume() {
            Ok(()) => session.resume().await,
            Err(e) => Err(e),
        },
        "retry" => session.retry().await,
        "s" | "stop" | "q" | "quit" => return false,
        "" => Ok(()),
        other => {
            println!("Unknown command `{other}` (p, r, retry, s, q)");
            Ok(())
        }
    };

    if let Err(e) = result {
        println!("{e}");
    }
    true
}

/// Print the chunk plan for a document
fn show_chunks(config: &Config, path: &Path, from: usize, json: bool) -> anyhow::Result<()> {
    let text = read_input(path)?;
    let chunker = Chunker::new(config.stream.session_options().chunker);
    let chunks = chunker.split(&text, from);

    if json {
        println!("{}", serde_json::to_string_pretty(&chunks)?);
        return Ok(());
    }

    for (i, chunk) in chunks.iter().enumerate() {
        let preview: String = chunk.text.chars().take(60).collect();
        println!(
            "{i:>4}  @{:<8} {:>5} chars  {}",
            chunk.start_offset,
            chunk.char_len(),
            preview.replace('\n', " ")
        );
    }
    println!("---\n{} chunks", chunks.len());

    Ok(())
}

/// Test speaker output with a sine wave
#[allow(clippy::future_not_send)]
async fn test_speaker(config: &Config) -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sample_rate = config.playback.sample_rate;
    let (handle, renderer, mut reports) = renderer::channel(
        config.playback.command_capacity,
        config.playback.report_capacity,
    );
    let playback = AudioPlayback::open(renderer, sample_rate)?;
    println!(
        "Output open at {} Hz, {} channel(s)",
        playback.sample_rate(),
        playback.channels()
    );

    let frequency = 440.0_f32;
    let num_samples = sample_rate as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);
    handle.append(samples).await?;

    // Wait until the renderer has drained the tone and gone quiet
    let mut played = 0;
    while let Some(report) = reports.recv().await {
        played += report.consumed;
        if played >= num_samples && report.silent {
            break;
        }
    }

    Box::new(playback).finish()?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Try: pavucontrol (to check output levels)");

    Ok(())
}
