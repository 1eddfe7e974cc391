mod app;
mod config;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use rudiment_services::HttpSessionApi;
use rudiment_tutor::MidiManager;

use crate::app::PracticeOptions;
use crate::config::ClientConfig;

#[derive(Parser)]
#[command(name = "rudiment", version, about = "Drum rudiment practice client")]
struct Cli {
    /// YAML config file. Defaults to the per-user config directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Scoring service base url, e.g. http://127.0.0.1:8000
    #[arg(long, global = true)]
    api_base: Option<String>,
    /// Log filter directive, e.g. `info` or `rudiment_services=debug`.
    #[arg(long, global = true)]
    log: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the drill catalog.
    Drills,
    /// Probe the scoring service.
    Health,
    /// List MIDI input ports.
    Devices,
    /// Practice a drill against the scoring service.
    Practice(PracticeArgs),
}

#[derive(Args)]
struct PracticeArgs {
    #[arg(long)]
    drill: String,
    /// Tempo override in BPM (clamped to 40-300).
    #[arg(long)]
    tempo: Option<u32>,
    /// Only listen on MIDI ports whose name contains this.
    #[arg(long)]
    midi_port: Option<String>,
    /// Keyboard only.
    #[arg(long)]
    no_midi: bool,
    #[arg(long)]
    latency_ms: Option<f64>,
    /// Beats to ignore after the metronome starts.
    #[arg(long)]
    lead_in: Option<u32>,
}

fn init_logging(directive: Option<&str>) {
    let filter = match directive {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::from_default_env(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log.as_deref());

    let mut config = ClientConfig::load(cli.config.as_deref())?;
    if let Some(api_base) = cli.api_base {
        config.api_base = api_base;
        config.stream_base = None;
    }
    if let Command::Practice(args) = &cli.command {
        if args.latency_ms.is_some() {
            config.client_latency_ms = args.latency_ms;
        }
        if let Some(beats) = args.lead_in {
            config.lead_in_beats = beats;
        }
    }
    let config = config.validated()?;
    info!(?config, "starting");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cli.command, config))
}

async fn run(command: Command, config: ClientConfig) -> Result<()> {
    let api = HttpSessionApi::new(config.endpoints());
    match command {
        Command::Drills => app::list_drills(&api).await,
        Command::Health => app::health(&api).await,
        Command::Devices => {
            let devices = MidiManager::list_inputs()?;
            if devices.is_empty() {
                println!("no MIDI inputs found");
            }
            for device in devices {
                println!("{}", device.name);
            }
            Ok(())
        }
        Command::Practice(args) => {
            let options = PracticeOptions {
                drill_id: args.drill,
                tempo_bpm: args.tempo,
                midi_port: args.midi_port,
                use_midi: !args.no_midi,
            };
            app::practice(&config, options).await
        }
    }
}
