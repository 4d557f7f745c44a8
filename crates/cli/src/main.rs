//! Fleet tracker CLI
//!
//! A command-line tool for inspecting routes, tailing live driver
//! events, simulating drivers and managing the telemetry outbox.

mod client;
mod commands;
mod config;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commands::{outbox, route, settings, simulate, tail};
use std::path::PathBuf;
use std::time::Duration;
use tracker_lib::simulator::{MotionMode, SimulationConfig};
use tracing_subscriber::EnvFilter;

use crate::client::Connection;
use crate::config::Config;

/// Fleet tracker CLI
#[derive(Parser)]
#[command(name = "fleetctl")]
#[command(author, version, about = "CLI for the fleet tracking pipeline", long_about = None)]
pub struct Cli {
    /// Fleet API URL (can also be set via FLEETCTL_API_URL env var)
    #[arg(long, env = "FLEETCTL_API_URL", global = true)]
    pub api_url: Option<String>,

    /// Tenant id sent with every request
    #[arg(long, env = "FLEETCTL_TENANT", global = true)]
    pub tenant: Option<String>,

    /// Act as this driver instead of a dispatcher
    #[arg(long, env = "FLEETCTL_DRIVER", global = true)]
    pub driver: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table", global = true)]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect a route
    #[command(subcommand)]
    Route(RouteCommands),

    /// Follow a route's live event stream
    Tail {
        /// Route id
        route_id: String,

        /// Close instead of reconnecting when the stream ends
        #[arg(long)]
        no_reconnect: bool,

        /// Stop after this many events
        #[arg(long, short = 'n')]
        limit: Option<u64>,

        /// Also print heartbeats
        #[arg(long)]
        heartbeats: bool,
    },

    /// Move simulated drivers along a route and publish their positions
    Simulate {
        /// Route id
        route_id: String,

        /// Number of drivers (1-20)
        #[arg(long, default_value_t = 1)]
        agents: usize,

        /// Speed in km/h
        #[arg(long, default_value_t = 30.0)]
        speed: f64,

        /// Tick interval in milliseconds
        #[arg(long, default_value_t = 1500)]
        interval_ms: u64,

        /// Motion at the end of the path (bounce, loop)
        #[arg(long, default_value = "bounce")]
        mode: String,

        /// Scatter positions within this many meters
        #[arg(long)]
        jitter: Option<f64>,

        /// Stop after this many ticks
        #[arg(long)]
        ticks: Option<u64>,

        /// Keep unsent positions in memory instead of the outbox file
        #[arg(long)]
        ephemeral: bool,
    },

    /// Inspect or flush the outbox
    #[command(subcommand)]
    Outbox(OutboxCommands),

    /// Show or update the CLI config file
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
pub enum RouteCommands {
    /// Show the route's path
    Path { route_id: String },

    /// Show the latest position of each driver
    Positions { route_id: String },

    /// Show the next stop
    Destination { route_id: String },
}

#[derive(Subcommand)]
pub enum OutboxCommands {
    /// List queued events
    Status {
        /// Outbox file (defaults to the configured one)
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Send every queued event now
    Flush {
        /// Outbox file (defaults to the configured one)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the stored config
    Show,

    /// Store defaults for later runs
    Set {
        #[arg(long)]
        api_url: Option<String>,
        #[arg(long)]
        tenant: Option<String>,
        #[arg(long)]
        driver: Option<String>,
        #[arg(long)]
        outbox_path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .compact()
            .with_writer(std::io::stderr)
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .init();
    }

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let connection = Connection::resolve(cli.api_url, cli.tenant, cli.driver, &config);
    let format = cli.format;

    match cli.command {
        Commands::Route(route_cmd) => {
            let client = connection.client()?;
            match route_cmd {
                RouteCommands::Path { route_id } => {
                    route::show_path(&client, &route_id, format).await?;
                }
                RouteCommands::Positions { route_id } => {
                    route::show_positions(&client, &route_id, format).await?;
                }
                RouteCommands::Destination { route_id } => {
                    route::show_destination(&client, &route_id, format).await?;
                }
            }
        }
        Commands::Tail {
            route_id,
            no_reconnect,
            limit,
            heartbeats,
        } => {
            let options = tail::TailOptions {
                auto_reconnect: !no_reconnect,
                limit,
                show_heartbeats: heartbeats,
            };
            tail::tail(connection.client()?, &route_id, options, format).await?;
        }
        Commands::Simulate {
            route_id,
            agents,
            speed,
            interval_ms,
            mode,
            jitter,
            ticks,
            ephemeral,
        } => {
            let mode: MotionMode = mode.parse()?;
            let sim_config = SimulationConfig {
                agents,
                speed_kmh: speed,
                interval: Duration::from_millis(interval_ms),
                mode,
                jitter: jitter.is_some(),
                jitter_radius_m: jitter.unwrap_or(SimulationConfig::default().jitter_radius_m),
            };
            let outbox_path = if ephemeral {
                None
            } else {
                Some(config.outbox_path()?)
            };
            simulate::simulate(
                connection.client()?,
                &route_id,
                sim_config,
                ticks,
                outbox_path.as_deref(),
                format,
            )
            .await?;
        }
        Commands::Outbox(outbox_cmd) => match outbox_cmd {
            OutboxCommands::Status { path } => {
                let path = path.map_or_else(|| config.outbox_path(), Ok)?;
                outbox::show_status(&path, format)?;
            }
            OutboxCommands::Flush { path } => {
                let path = path.map_or_else(|| config.outbox_path(), Ok)?;
                outbox::flush(connection.client()?, &path, format)
                    .await
                    .context("Outbox flush failed")?;
            }
        },
        Commands::Config(config_cmd) => match config_cmd {
            ConfigCommands::Show => settings::show(&config)?,
            ConfigCommands::Set {
                api_url,
                tenant,
                driver,
                outbox_path,
            } => {
                let changes = Config {
                    api_url,
                    tenant_id: tenant,
                    driver_id: driver,
                    outbox_path,
                };
                settings::set(config, changes)?;
            }
        },
    }

    Ok(())
}
