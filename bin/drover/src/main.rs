mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "drover")]
#[command(about = "Drive remote agent sessions for feature-flag chores", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize drover configuration
    Onboard {
        /// API key to write into the config
        #[arg(long)]
        api_key: Option<String>,

        /// Service base URL to write into the config
        #[arg(long)]
        base_url: Option<String>,

        /// Force overwrite existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Build a task and drive its session to completion
    Run {
        #[command(subcommand)]
        command: RunCommands,
    },

    /// Show one session's current status
    Status {
        /// Session ID
        session_id: String,
    },

    /// List sessions visible to the configured credential
    Sessions,

    /// Stop one session (pause first, terminate as last resort)
    Stop {
        /// Session ID
        session_id: String,
    },

    /// Stop every active session
    StopAll,
}

#[derive(Subcommand)]
enum RunCommands {
    /// Remove a feature flag and the code paths it gates
    Remove {
        /// Flag name
        #[arg(long)]
        target: String,
        /// File the flag lives in
        #[arg(long)]
        file: String,
        /// First line of the flagged block
        #[arg(long)]
        line_start: u64,
        /// Last line of the flagged block
        #[arg(long)]
        line_end: u64,
        /// Extra context for the agent
        #[arg(long)]
        description: Option<String>,
        /// Flag category label
        #[arg(long)]
        category: Option<String>,
        /// How many other places in the codebase reference the flag
        #[arg(long)]
        references: Option<u64>,
        /// Wall-clock budget in seconds (default 600)
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Restore a previously removed flag from its backup record
    Restore {
        /// Flag name
        #[arg(long)]
        target: String,
        /// File the flag lived in
        #[arg(long)]
        file: String,
        /// Line the flag started at before removal
        #[arg(long)]
        line_start: u64,
        /// PR that removed the flag
        #[arg(long)]
        pr: u64,
        /// Backup record path (defaults to the removal layout)
        #[arg(long)]
        backup: Option<String>,
        /// Extra context for the agent
        #[arg(long)]
        description: Option<String>,
        /// Wall-clock budget in seconds (default 600)
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Hardwire a flag's enabled branch and delete the flag
    MakePermanent {
        /// Flag name
        #[arg(long)]
        target: String,
        /// File the flag lives in
        #[arg(long)]
        file: String,
        /// First line of the flagged block
        #[arg(long)]
        line_start: u64,
        /// Last line of the flagged block
        #[arg(long)]
        line_end: u64,
        /// Extra context for the agent
        #[arg(long)]
        description: Option<String>,
        /// Flag category label
        #[arg(long)]
        category: Option<String>,
        /// Wall-clock budget in seconds (default 600)
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Replace a flag check with a fixed expression
    Replace {
        /// Flag name
        #[arg(long)]
        target: String,
        /// File the flag lives in
        #[arg(long)]
        file: String,
        /// Replacement expression
        #[arg(long)]
        replacement: String,
        /// First line of the flagged block (helps the agent locate it)
        #[arg(long)]
        line_start: Option<u64>,
        /// Last line of the flagged block
        #[arg(long)]
        line_end: Option<u64>,
        /// Extra context for the agent
        #[arg(long)]
        description: Option<String>,
        /// Wall-clock budget in seconds (default 600)
        #[arg(long)]
        timeout: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Onboard {
            api_key,
            base_url,
            force,
        } => {
            commands::onboard::run(api_key, base_url, force).await?;
        }
        Commands::Run { command } => match command {
            RunCommands::Remove {
                target,
                file,
                line_start,
                line_end,
                description,
                category,
                references,
                timeout,
            } => {
                commands::run::remove(
                    target,
                    file,
                    line_start,
                    line_end,
                    description,
                    category,
                    references,
                    timeout,
                )
                .await?;
            }
            RunCommands::Restore {
                target,
                file,
                line_start,
                pr,
                backup,
                description,
                timeout,
            } => {
                commands::run::restore(target, file, line_start, pr, backup, description, timeout)
                    .await?;
            }
            RunCommands::MakePermanent {
                target,
                file,
                line_start,
                line_end,
                description,
                category,
                timeout,
            } => {
                commands::run::make_permanent(
                    target,
                    file,
                    line_start,
                    line_end,
                    description,
                    category,
                    timeout,
                )
                .await?;
            }
            RunCommands::Replace {
                target,
                file,
                replacement,
                line_start,
                line_end,
                description,
                timeout,
            } => {
                commands::run::replace(
                    target,
                    file,
                    replacement,
                    line_start,
                    line_end,
                    description,
                    timeout,
                )
                .await?;
            }
        },
        Commands::Status { session_id } => {
            commands::status::run(&session_id).await?;
        }
        Commands::Sessions => {
            commands::sessions::run().await?;
        }
        Commands::Stop { session_id } => {
            commands::stop::one(&session_id).await?;
        }
        Commands::StopAll => {
            commands::stop::all().await?;
        }
    }

    Ok(())
}
