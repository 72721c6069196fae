//! Drawhouse operator binary
//!
//! Runs the lifecycle scheduler over the configured store, or performs one-off
//! admin operations against it.

use clap::{Parser, Subcommand};
use drawhouse::{
    config::generate_sample_config,
    games::types::{GameId, GameState},
    ConfigLoader, DrawEngine, EngineConfig, Scheduler, ServiceBuilder,
};
use std::{path::PathBuf, sync::Arc};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Drawhouse CLI
#[derive(Parser)]
#[command(name = "drawhouse")]
#[command(about = "Timed numbers-draw wagering engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory, overrides the configured one
    #[arg(short, long)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted
    Run,

    /// Settle a closed game now (idempotent)
    Settle {
        #[arg(value_parser = parse_game_id)]
        game_id: GameId,
    },

    /// Settle a closed game against operator-supplied numbers
    Force {
        #[arg(value_parser = parse_game_id)]
        game_id: GameId,

        /// Comma separated drawn numbers
        #[arg(short, long, value_delimiter = ',')]
        numbers: Vec<u8>,
    },

    /// Cancel a game and refund its pending wagers
    CancelGame {
        #[arg(value_parser = parse_game_id)]
        game_id: GameId,
    },

    /// Print a game and its wagers as JSON
    Inspect {
        #[arg(value_parser = parse_game_id)]
        game_id: GameId,
    },

    /// List games, optionally by stored state
    List {
        #[arg(short, long)]
        state: Option<GameState>,
    },

    /// Write a configuration file with default values
    SampleConfig { path: PathBuf },
}

fn parse_game_id(raw: &str) -> Result<GameId, String> {
    Uuid::parse_str(raw)
        .map(GameId)
        .map_err(|e| format!("invalid game id '{}': {}", raw, e))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Commands::SampleConfig { path } = &cli.command {
        generate_sample_config(path)?;
        println!("Sample configuration written to {}", path.display());
        return Ok(());
    }

    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_path(path);
    }
    let mut config = loader.load()?;
    if let Some(dir) = cli.data_dir {
        config.storage.data_directory = dir;
    }
    init_tracing(&config);

    let services = ServiceBuilder::new().with_config(config).build().await?;
    let engine = Arc::new(DrawEngine::new(Arc::new(services)));

    match cli.command {
        Commands::Run => run(engine).await?,
        Commands::Settle { game_id } => {
            let summary = engine.trigger_settlement(game_id).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Force { game_id, numbers } => {
            let game = engine.force_outcome(game_id, numbers).await?;
            println!("{}", serde_json::to_string_pretty(&game)?);
        }
        Commands::CancelGame { game_id } => {
            let game = engine.cancel_game(game_id).await?;
            println!("Game {} cancelled", game.id);
        }
        Commands::Inspect { game_id } => {
            let game = engine.get_game(game_id).await?;
            let wagers = engine.get_wagers_for_game(game_id).await?;
            let view = serde_json::json!({ "game": game, "wagers": wagers });
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Commands::List { state } => {
            for game in engine.list_games(state).await? {
                println!(
                    "{}  {:<10} {:<24} closes {}  wagers {}",
                    game.id,
                    game.state,
                    game.label,
                    game.close_time.to_rfc3339(),
                    game.aggregates.wager_count
                );
            }
        }
        Commands::SampleConfig { .. } => {}
    }

    Ok(())
}

fn init_tracing(config: &EngineConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.monitoring.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(engine: Arc<DrawEngine>) -> Result<(), Box<dyn std::error::Error>> {
    let scheduler = Arc::new(Scheduler::new(engine.clone()));
    let handle = scheduler.spawn();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    handle.shutdown().await;

    print!("{}", engine.metrics().to_prometheus_format());
    Ok(())
}
