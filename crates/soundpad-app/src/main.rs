//! Soundpad - command-line host for the soundboard engine.
//!
//! Engine events are written to stdout as JSON lines; logs go to stderr.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use soundpad_audio::{AudioDriver, CpalDriver, EngineConfig, OutputDevice, SoundboardEngine};
use soundpad_core::{Soundboard, SUPPORTED_SAMPLE_RATES};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often the drain wait polls the active clip count.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long to wait for the first rendered block before giving up.
const START_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "soundpad")]
#[command(about = "Low-latency soundboard engine")]
#[command(version)]
struct Cli {
    /// Engine tuning file (JSON)
    #[arg(long, env = "SOUNDPAD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List output devices
    Devices,
    /// List the offered sample rates, optionally only those a device supports
    Rates {
        #[arg(short, long, env = "SOUNDPAD_DEVICE")]
        device: Option<String>,
    },
    /// Play files and wait until they finish
    Play {
        #[command(flatten)]
        output: OutputArgs,
        /// Per-clip volume (0.0 to 2.0)
        #[arg(long, default_value_t = 1.0)]
        clip_volume: f32,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Play every tile with the given name from a soundboard file
    Board {
        #[command(flatten)]
        output: OutputArgs,
        board: PathBuf,
        name: String,
    },
    /// Convert a file to another sample rate, writing a WAV beside it
    Resample {
        file: PathBuf,
        #[arg(long)]
        rate: u32,
    },
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// Output device name
    #[arg(short, long, env = "SOUNDPAD_DEVICE")]
    device: Option<String>,

    /// Output sample rate in Hz
    #[arg(short, long, env = "SOUNDPAD_RATE")]
    rate: Option<u32>,

    /// Master volume (0.0 to 2.0)
    #[arg(short, long, env = "SOUNDPAD_VOLUME", default_value_t = 1.0)]
    volume: f32,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "soundpad=info,soundpad_audio=info".into()),
        )
        .init();

    let cli = Cli::parse();
    info!("Starting Soundpad v{}", env!("CARGO_PKG_VERSION"));

    let config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let driver = CpalDriver::new();
    info!("Using {} audio host", driver.host_name());

    match cli.command {
        Command::Devices => {
            let engine = SoundboardEngine::new(driver, config);
            for name in engine.list_devices()? {
                println!("{name}");
            }
        }
        Command::Rates { device } => print_rates(&driver, device.as_deref())?,
        Command::Play {
            output,
            clip_volume,
            files,
        } => {
            let clips: Vec<_> = files.into_iter().map(|f| (f, clip_volume)).collect();
            play(driver, config, &output, &clips)?;
        }
        Command::Board {
            output,
            board,
            name,
        } => {
            let board = Soundboard::load(&board)
                .with_context(|| format!("Failed to load soundboard {}", board.display()))?;
            let clips: Vec<_> = board
                .named(&name)
                .map(|tile| (tile.file.clone(), tile.volume))
                .collect();
            if clips.is_empty() {
                bail!("No tile named '{name}' on this soundboard");
            }
            play(driver, config, &output, &clips)?;
        }
        Command::Resample { file, rate } => {
            let engine = SoundboardEngine::new(driver, config);
            print_events(&engine);
            let out = engine.resample_file(&file, rate)?;
            println!("{}", out.display());
        }
    }

    Ok(())
}

fn print_rates(driver: &CpalDriver, device: Option<&str>) -> Result<()> {
    let Some(name) = device else {
        for rate in SUPPORTED_SAMPLE_RATES {
            println!("{rate}");
        }
        return Ok(());
    };

    let handle = driver.open(name)?;
    for rate in SUPPORTED_SAMPLE_RATES {
        if handle.supports_rate(rate) {
            println!("{rate}");
        }
    }
    Ok(())
}

fn print_events<D: AudioDriver>(engine: &SoundboardEngine<D>) {
    engine.subscribe(|event| match serde_json::to_string(event) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!("Failed to serialize {event:?}: {e}"),
    });
}

fn play(
    driver: CpalDriver,
    config: EngineConfig,
    output: &OutputArgs,
    clips: &[(PathBuf, f32)],
) -> Result<()> {
    let engine = SoundboardEngine::new(driver, config);
    print_events(&engine);

    engine.start(output.device.as_deref(), output.rate, Some(output.volume))?;

    let mut admitted = 0;
    for (path, volume) in clips {
        match engine.play_file(path, *volume) {
            Ok(()) => admitted += 1,
            Err(e) if e.needs_resample() => {
                warn!(
                    "Skipping {}; convert it with `soundpad resample` first",
                    display_name(path)
                );
            }
            Err(e) => warn!("Cannot play {}: {e}", display_name(path)),
        }
    }

    if admitted > 0 {
        wait_for_drain(&engine);
    }
    engine.stop();
    Ok(())
}

/// Block until every admitted clip has finished playing.
fn wait_for_drain<D: AudioDriver>(engine: &SoundboardEngine<D>) {
    let started = Instant::now();
    let mut seen_active = false;

    loop {
        thread::sleep(POLL_INTERVAL);
        let active = engine.active_sounds();
        if active > 0 {
            seen_active = true;
        } else if seen_active || started.elapsed() > START_GRACE {
            break;
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}
