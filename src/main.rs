mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commands::CronParams;

#[derive(Parser)]
#[command(
    name = "harvester",
    version,
    about = "Distributed crawl scheduler with lock-guarded pagination",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file (defaults to environment variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the periodic ticks, session checks and daily seeding
    Cron {
        /// Serve /metrics and /health on this address
        #[arg(long)]
        metrics_addr: Option<String>,
    },

    /// Task operations
    Tasks {
        #[command(subcommand)]
        command: TaskCommands,
    },

    /// Session operations
    Sessions {
        #[command(subcommand)]
        command: SessionCommands,
    },

    /// Database operations
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
}

#[derive(Subcommand)]
enum TaskCommands {
    /// Run one process tick (posts, replies, users:posts)
    Process {
        family: String,

        /// Candidates to consider
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Run one flush tick
    Flush {
        family: String,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Handle a single task by id
    Run { family: String, task_id: String },

    /// Create or reactivate a task for a target
    Apply {
        family: String,

        /// User id, post id, or account name with --remote-id
        target: String,

        /// Remote user id; creates the user row for a posts task
        #[arg(long)]
        remote_id: Option<i64>,
    },

    /// Apply replies tasks for the most active repliers
    SeedReplies {
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show task counts and admission set sizes
    Count { family: Option<String> },
}

#[derive(Subcommand)]
enum SessionCommands {
    /// Register or refresh a credential
    Apply {
        account: String,
        cookie: String,

        /// Egress slot (0 = default route)
        #[arg(long, default_value = "0")]
        slot: i32,

        /// Client identity string
        #[arg(long, default_value = "Mozilla/5.0")]
        agent: String,
    },

    /// Check the next default-pool session
    Current,

    /// List sessions of the configured node
    List,
}

#[derive(Subcommand)]
enum DbCommands {
    /// Create tables and indexes
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;

    let log_format = cli.log_format.as_deref().unwrap_or(&config.logging.format);
    setup_tracing(log_format, &config.logging.level, cli.verbose)?;

    match cli.command {
        Commands::Cron { metrics_addr } => {
            commands::cron(config, CronParams { metrics_addr }).await?;
        }

        Commands::Tasks { command } => {
            let scheduler = commands::connect(&config).await?;
            match command {
                TaskCommands::Process { family, limit } => {
                    commands::process(&scheduler, &family, limit).await?;
                }
                TaskCommands::Flush { family, limit } => {
                    commands::flush(&scheduler, &family, limit).await?;
                }
                TaskCommands::Run { family, task_id } => {
                    commands::process_task(&scheduler, &family, &task_id).await?;
                }
                TaskCommands::Apply {
                    family,
                    target,
                    remote_id,
                } => {
                    commands::apply_task(&scheduler, &family, &target, remote_id).await?;
                }
                TaskCommands::SeedReplies { limit } => {
                    commands::seed_replies(&scheduler, limit).await?;
                }
                TaskCommands::Count { family } => {
                    commands::count_tasks(&scheduler, family.as_deref()).await?;
                }
            }
        }

        Commands::Sessions { command } => match command {
            SessionCommands::Apply {
                account,
                cookie,
                slot,
                agent,
            } => {
                commands::apply_session(&config, &account, &cookie, slot, &agent).await?;
            }
            SessionCommands::Current => commands::current_session(&config).await?,
            SessionCommands::List => commands::list_sessions(&config).await?,
        },

        Commands::Db { command } => match command {
            DbCommands::Migrate => commands::migrate(&config).await?,
        },
    }

    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("harvester=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("harvester={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
