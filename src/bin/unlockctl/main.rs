//! Hint Unlocks admin CLI
//!
//! Seeds the database and inspects the award ledger.

mod commands;
mod style;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use hint_unlocks::{Config, Storage};
use style::*;

#[derive(Parser)]
#[command(name = "unlockctl")]
#[command(version)]
#[command(about = "Hint Unlocks - administration", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to config.toml
    #[arg(short, long, env = "UNLOCKS_CONFIG", default_value = "config.toml", global = true)]
    config: PathBuf,

    /// Database file (overrides config)
    #[arg(short, long, env = "DATABASE_PATH", global = true)]
    database: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and apply migrations
    Init,

    /// Create a team
    AddTeam {
        #[arg(long)]
        name: String,
    },

    /// Create a user, optionally on a team
    AddUser {
        #[arg(long)]
        name: String,
        #[arg(long)]
        team: Option<i64>,
    },

    /// Create a challenge
    AddChallenge {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        category: String,
    },

    /// Attach a hint to a challenge
    AddHint {
        #[arg(long)]
        challenge: i64,
        #[arg(long)]
        cost: i64,
        #[arg(long, default_value = "")]
        content: String,
    },

    /// Record an award (positive values add score)
    Award {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        team: Option<i64>,
        #[arg(long, allow_hyphen_values = true)]
        value: i64,
        #[arg(long, default_value = "Manual award")]
        name: String,
        #[arg(long, default_value = "")]
        category: String,
    },

    /// Show an account's awards and score
    #[command(visible_alias = "st")]
    Score {
        /// User id in users mode, team id in teams mode
        #[arg(long)]
        account: i64,
    },

    /// List unlocks, all or for one account
    #[command(visible_alias = "ls")]
    Unlocks {
        #[arg(long)]
        account: Option<i64>,
    },

    /// Unlock a hint on behalf of a user
    Buy {
        #[arg(long)]
        user: i64,
        /// Defaults to the user's team
        #[arg(long)]
        team: Option<i64>,
        #[arg(long)]
        hint: i64,
    },
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt().with_env_filter("info").init();
    }

    if let Err(e) = run(cli) {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load_from(&cli.config)?;
    if let Some(database) = cli.database {
        config.database.path = database;
    }

    let storage = Arc::new(Storage::open(
        &config.database.path,
        config.database.busy_timeout(),
    )?);

    match cli.command {
        Commands::Init => {
            print_success(&format!(
                "Database ready at {}",
                config.database.path.display()
            ));
            Ok(())
        }
        Commands::AddTeam { name } => commands::seed::add_team(&storage, &name),
        Commands::AddUser { name, team } => commands::seed::add_user(&storage, &name, team),
        Commands::AddChallenge { name, category } => {
            commands::seed::add_challenge(&storage, &name, &category)
        }
        Commands::AddHint {
            challenge,
            cost,
            content,
        } => commands::seed::add_hint(&storage, challenge, cost, &content),
        Commands::Award {
            user,
            team,
            value,
            name,
            category,
        } => commands::seed::award(&storage, user, team, value, &name, &category),
        Commands::Score { account } => {
            commands::ledger::score(&storage, config.competition.mode, account)
        }
        Commands::Unlocks { account } => commands::ledger::unlocks(&storage, account),
        Commands::Buy { user, team, hint } => {
            commands::ledger::buy(storage, &config, user, team, hint)
        }
    }
}
