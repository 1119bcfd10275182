//! # Station CLI
//!
//! Drives the operations core in-process: room runs, queued tasks and the
//! Dynamo maintenance loop.
//!
//! Usage:
//!   station rooms list                         # Room snapshots
//!   station rooms run room_guard               # Run one room now
//!   station task run --type summarize --payload '{"text":"..."}'
//!   station task status                        # Queue and mode
//!   station dynamo --interval 20 --ticks 3     # Run the loop
//!   station config show                        # Show configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use station_core::StationConfig;
use station_core::traits::{Clock, CredentialSource, EnvCredentials, SystemClock};
use station_rooms::{RoomsRegistry, create_lease_store};
use station_scheduler::{DynamoEngine, TaskStore};

#[derive(Parser)]
#[command(
    name = "station",
    version,
    about = "🛰️ Station: room leases, maintenance loop and queued tasks",
    long_about = "Operations backend core.\nSerializes rooms behind TTL leases, rotates a maintenance plan and executes queued tasks online or offline."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and run rooms
    Rooms {
        #[command(subcommand)]
        action: RoomsAction,
    },

    /// Queue and run tasks
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },

    /// Run the Dynamo loop until Ctrl+C or a tick count
    Dynamo {
        /// Seconds between ticks (floored by config)
        #[arg(short, long)]
        interval: Option<u64>,

        /// Room ids to rotate over, comma separated
        #[arg(short, long, value_delimiter = ',')]
        plan: Vec<String>,

        /// Stop after this many ticks
        #[arg(short, long)]
        ticks: Option<u64>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show system info
    Info,
}

#[derive(Subcommand)]
enum RoomsAction {
    /// List rooms
    List,
    /// Run a room once
    Run {
        /// Room id
        id: String,
    },
}

#[derive(Subcommand)]
enum TaskAction {
    /// Submit a task and run the queue head
    Run {
        /// Task room
        #[arg(short, long, default_value = "core")]
        room: String,

        /// Task type
        #[arg(short = 't', long = "type", default_value = "ping")]
        task_type: String,

        /// JSON object payload
        #[arg(short, long, default_value = "{}")]
        payload: String,
    },
    /// Show queue status and execution mode
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Reset to defaults
    Reset,
    /// Print the config file path
    Path,
}

/// The wired core: one lease store shared by room and task leases.
struct Station {
    registry: Arc<RoomsRegistry>,
    tasks: TaskStore,
    clock: Arc<dyn Clock>,
}

impl Station {
    fn build(config: &StationConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let leases = create_lease_store(&config.locks).context("creating lease store")?;
        let credentials: Arc<dyn CredentialSource> = Arc::new(EnvCredentials::new(&config.online));
        let online = station_providers::create_online_executor(&config.online, Arc::clone(&credentials))?;

        let registry = Arc::new(RoomsRegistry::from_config(
            &config.locks,
            Arc::clone(&leases),
            Arc::clone(&clock),
        ));
        let tasks = TaskStore::from_config(config, leases, credentials, Some(online), Arc::clone(&clock));
        Ok(Self {
            registry,
            tasks,
            clock,
        })
    }
}

fn config_path(cli_path: Option<&str>) -> std::path::PathBuf {
    match cli_path {
        Some(p) => std::path::PathBuf::from(shellexpand::tilde(p).to_string()),
        None => StationConfig::default_path(),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "station=debug,station_core=debug,station_rooms=debug,station_scheduler=debug,station_providers=debug"
    } else {
        "station=info,station_rooms=info,station_scheduler=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    // Load config
    let path = config_path(cli.config.as_deref());
    let config = if cli.config.is_some() {
        StationConfig::load_from(&path)?
    } else {
        StationConfig::load()?
    };

    match cli.command {
        Commands::Rooms { action } => {
            let station = Station::build(&config)?;
            match action {
                RoomsAction::List => {
                    let rooms = station.registry.list_rooms().await;
                    print_json(&rooms)?;
                }
                RoomsAction::Run { id } => {
                    let run = station.registry.run(&id).await?;
                    print_json(&run)?;
                }
            }
        }

        Commands::Task { action } => {
            let station = Station::build(&config)?;
            match action {
                TaskAction::Run {
                    room,
                    task_type,
                    payload,
                } => {
                    let payload: serde_json::Value =
                        serde_json::from_str(&payload).context("--payload must be JSON")?;
                    let task = station.tasks.submit(&room, &task_type, payload).await;
                    println!("📥 Queued {} in '{}' [{}]", task.id, task.room, task.mode);
                    let done = station.tasks.run_next().await?;
                    print_json(&done)?;
                }
                TaskAction::Status => {
                    print_json(&station.tasks.status().await)?;
                }
            }
        }

        Commands::Dynamo {
            interval,
            plan,
            ticks,
        } => {
            let station = Station::build(&config)?;
            let engine = DynamoEngine::new(
                Arc::clone(&station.registry),
                &config.dynamo,
                Arc::clone(&station.clock),
            );
            if !plan.is_empty() {
                engine.set_plan(plan).await;
            }

            let state = engine.start(interval).await;
            println!(
                "⚡ Dynamo running every {}s over {:?}. Press Ctrl+C to stop.",
                state.interval_secs, state.plan
            );

            match ticks {
                Some(target) => {
                    let reached = async {
                        while engine.status().await.ticks < target {
                            tokio::time::sleep(Duration::from_millis(200)).await;
                        }
                    };
                    tokio::select! {
                        _ = reached => {}
                        res = tokio::signal::ctrl_c() => res?,
                    }
                }
                None => tokio::signal::ctrl_c().await?,
            }

            let state = engine.stop().await;
            print_json(&state)?;
            print_json(&engine.events(config.dynamo.max_events).await)?;
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let content = toml::to_string_pretty(&config)?;
                println!("{content}");
            }
            ConfigAction::Reset => {
                StationConfig::default().save_to(&path)?;
                println!("✅ Configuration reset to defaults.");
            }
            ConfigAction::Path => {
                println!("{}", path.display());
            }
        },

        Commands::Info => {
            let credentials = EnvCredentials::new(&config.online);
            println!("🛰️ Station v{}", env!("CARGO_PKG_VERSION"));
            println!("   Platform: {} / {}", std::env::consts::OS, std::env::consts::ARCH);
            println!("   Config: {}", path.display());
            println!(
                "   Mode: {}",
                if credentials.has_online_credential() { "online" } else { "offline" }
            );
            println!("   Online model: {} @ {}", config.online.model, config.online.api_url);
            println!("   Locks: {:?} ({})", config.locks.backend, config.locks.dir_path().display());
            println!("   Task rooms: {}", config.tasks.rooms.join(", "));
            println!(
                "   Dynamo: every {}s over {:?}",
                config
                    .dynamo
                    .interval_secs
                    .max(config.dynamo.min_interval_secs)
                    .max(station_scheduler::engine::MIN_TICK_INTERVAL_SECS),
                config.dynamo.plan
            );
        }
    }

    Ok(())
}
