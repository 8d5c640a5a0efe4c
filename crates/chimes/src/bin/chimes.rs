use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chimeconf::{ChimesConfig, ConfigSources, EngineBackend, EngineConfig, MediaBackend, MediaConfig};
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};

use chimes::control::{self, Controller, ServeEnd};
use chimes::{
    lead_time, plan_tick, AudioEngine, Chime, FocusGate, LoggingSink, MediaController, NoMedia,
    PlayOutcome, Player, PlayerctlMedia, Scheduler, SequencedEngine, SettingsHandle, SystemClock,
    Trigger,
};

/// Chimes - Westminster quarter chimes on the wall clock
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file, loaded in place of ./chimes.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Chime every quarter hour; control commands are read from stdin
    Run,

    /// Play one chime now and wait for it to finish
    Play {
        /// first-quarter, half-hour, third-quarter or hour <1-12>
        #[arg(required = true, num_args = 1..)]
        chime: Vec<String>,
    },

    /// Show the next tick: slot, chime, lead time and start time
    Next,

    /// Print the effective configuration and its sources
    Config,

    /// List MIDI output ports
    #[cfg(feature = "midi-out")]
    Ports,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) = ChimesConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;
    chimes::telemetry::init(&config.infra.telemetry.log_level)
        .context("Failed to initialize logging")?;
    for file in &sources.files {
        debug!(file = %file.display(), "config file loaded");
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config, cli.config).await,
        Commands::Play { chime } => play_once(config, &chime.join(" ")).await,
        Commands::Next => {
            print_next(&config);
            Ok(())
        }
        Commands::Config => {
            print_config(&config, &sources);
            Ok(())
        }
        #[cfg(feature = "midi-out")]
        Commands::Ports => {
            for port in chimes::midi_out::list_output_ports()? {
                println!("{:>3}  {}", port.index, port.name);
            }
            Ok(())
        }
    }
}

fn build_engine(config: &EngineConfig) -> Result<Box<dyn AudioEngine>> {
    match config.backend {
        EngineBackend::Log => Ok(Box::new(SequencedEngine::new(LoggingSink))),
        EngineBackend::Midi => open_midi(config),
    }
}

#[cfg(feature = "midi-out")]
fn open_midi(config: &EngineConfig) -> Result<Box<dyn AudioEngine>> {
    let sink = chimes::midi_out::MidiOutSink::open(&config.midi_port, config.channel)
        .with_context(|| format!("Failed to open MIDI port matching {:?}", config.midi_port))?;
    Ok(Box::new(SequencedEngine::new(sink)))
}

#[cfg(not(feature = "midi-out"))]
fn open_midi(_config: &EngineConfig) -> Result<Box<dyn AudioEngine>> {
    anyhow::bail!("engine backend \"midi\" needs chimes built with --features midi-out")
}

fn build_media(config: &MediaConfig, settings: &SettingsHandle) -> Arc<dyn MediaController> {
    match config.backend {
        MediaBackend::None => Arc::new(NoMedia),
        MediaBackend::Playerctl => Arc::new(PlayerctlMedia::new(
            config.player.clone(),
            config.fade_steps,
            settings.clone(),
        )),
    }
}

fn build_player(config: &ChimesConfig) -> Result<Arc<Player>> {
    let settings = SettingsHandle::new(config.chime.clone());
    let engine = build_engine(&config.infra.engine)?;
    let media = build_media(&config.infra.media, &settings);
    Ok(Player::new(
        settings,
        engine,
        media,
        config.infra.scheduler.decay(),
    ))
}

async fn run(config: ChimesConfig, config_path: Option<PathBuf>) -> Result<()> {
    let player = build_player(&config)?;
    let focus = FocusGate::new();
    let (scheduler, task) = Scheduler::new(
        Arc::clone(&player),
        focus.clone(),
        SystemClock,
        &config.infra.scheduler,
    )
    .spawn();
    let controller = Controller::new(Arc::clone(&player), scheduler.clone(), focus, config_path);

    info!(
        enabled = config.infra.scheduler.enabled,
        engine = %config.infra.engine.backend,
        media = %config.infra.media.backend,
        "chimes running"
    );

    let signal = shutdown_signal();
    tokio::pin!(signal);

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    tokio::select! {
        end = control::serve(&controller, stdin, tokio::io::stdout()) => {
            if end.context("Control input failed")? == ServeEnd::InputClosed {
                info!("control input closed, chiming until signalled");
                (&mut signal).await;
            }
        }
        _ = &mut signal => {}
    }

    if scheduler.shutdown().await.is_ok() {
        task.await.context("Scheduler task failed")?;
    }
    player.stop_and_restore().await;
    info!("shutdown complete");
    Ok(())
}

async fn play_once(config: ChimesConfig, chime: &str) -> Result<()> {
    let chime: Chime = chime.parse()?;
    let player = build_player(&config)?;

    let session = match player.play(chime, Trigger::Manual)? {
        PlayOutcome::Started(session) => session,
        PlayOutcome::Skipped => return Ok(()),
    };

    tokio::select! {
        end = session.finished() => {
            let end = end?;
            debug!(?end, "session ended");
        }
        _ = shutdown_signal() => {
            player.stop_and_restore().await;
        }
    }
    Ok(())
}

fn print_next(config: &ChimesConfig) {
    let now = Local::now();
    let plan = plan_tick(&now, |chime| lead_time(chime, &config.chime));

    println!("chime:  {}", plan.chime);
    println!("slot:   {}", plan.target.format("%Y-%m-%d %H:%M"));
    println!("lead:   {:.3}s", plan.lead.as_secs_f64());
    println!("starts: {}", plan.fire_at().format("%H:%M:%S%.3f"));
}

fn print_config(config: &ChimesConfig, sources: &ConfigSources) {
    print!("{}", config.to_toml());
    println!("# Sources");
    if sources.files.is_empty() {
        println!("#   (defaults only)");
    }
    for file in &sources.files {
        println!("#   {}", file.display());
    }
    for var in &sources.env_overrides {
        println!("#   env {}", var);
    }
}

async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down");
        }
        _ = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        warn!(error = %e, "SIGTERM handler unavailable");
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
