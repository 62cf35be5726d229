use artify_transform::config;
use artify_transform::controller::ControllerSettings;
use artify_transform::descriptor::CdnUrlBuilder;
use artify_transform::persist::JsonStore;
use artify_transform::types::ImageState;
use artify_transform::{output, session, sizing};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "artify-transform")]
#[command(about = "Transformation config engine for an AI image editor")]
#[command(long_about = "\
Transformation config engine for an AI image editor

Stages transform directives from uploads and debounced field edits, merges
them into an accumulated config on apply (one credit fee per apply), and
saves the result as a record with a derived CDN URL.

Session scripts are JSON:

  {
    \"account\": \"user_1\",
    \"balance\": 3,
    \"kind\": \"recolor\",
    \"title\": \"Red umbrella\",
    \"events\": [
      { \"upload\": { \"public_id\": \"artifyai/beach\", \"width\": 800, \"height\": 600 } },
      { \"edit\": { \"field\": \"prompt\", \"value\": \"umbrella\" } },
      { \"edit\": { \"field\": \"color\", \"value\": \"#ff0000\" } },
      { \"wait\": { \"ms\": 1000 } },
      \"apply\",
      \"save\"
    ]
  }

Other events: select_aspect_ratio { key }, top_up { credits }.
Set RUST_LOG=artify_transform=debug for per-step logs on stderr.

Run 'artify-transform gen-config' to generate a documented artify.toml.")]
#[command(version)]
struct Cli {
    /// Engine config file (missing file means stock defaults)
    #[arg(long, default_value = "artify.toml", global = true)]
    config: PathBuf,

    /// Directory where saved records are written
    #[arg(long, default_value = ".artify-store", global = true)]
    store: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a scripted editing session and print each step
    Replay {
        /// Session script (JSON)
        script: PathBuf,
    },
    /// List the aspect-ratio presets
    Presets,
    /// Resolve the output size for a transform type
    Size {
        /// Transform tag, e.g. fill or recolor
        kind: String,
        /// Aspect-ratio preset key, e.g. 3:4
        #[arg(long)]
        aspect_ratio: Option<String>,
        /// Known image width
        #[arg(long)]
        width: Option<u32>,
        /// Known image height
        #[arg(long)]
        height: Option<u32>,
    },
    /// Print a stock artify.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Command::Replay { script } => {
            let engine = config::load_config(&cli.config)?;
            let settings = ControllerSettings::from_config(&engine);
            let builder = CdnUrlBuilder::new(engine.cdn.base_url.clone());
            let mut store = JsonStore::open(&cli.store)?;
            let script = session::load_script(&script)?;
            let report = session::replay(&script, settings, &mut store, &builder);
            output::print_replay_report(&report);
            if report.failures() > 0 {
                tracing::warn!(failures = report.failures(), "session had failed steps");
            }
        }
        Command::Presets => {
            output::print_presets(sizing::presets());
        }
        Command::Size {
            kind,
            aspect_ratio,
            width,
            height,
        } => {
            let engine = config::load_config(&cli.config)?;
            let resolver = sizing::SizeResolver::new(engine.sizing.default_dimension);
            let image = ImageState {
                width,
                height,
                aspect_ratio,
                ..ImageState::default()
            };
            let (w, h) = resolver.resolve_dimensions(&kind, &image);
            println!("{w}×{h}");
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Logs go to stderr so stdout carries only the report.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("artify_transform=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
