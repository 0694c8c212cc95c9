use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use sqlserver_db_tasks::config::EMPTY_CONFIG;
use sqlserver_db_tasks::{DatabaseError, SqlServerDatabaseTasks, TasksConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// configuration file path, by default <config dir>/sqlserver-db-tasks.toml is used
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// override the database name from the configuration
    #[clap(short, long)]
    database: Option<String>,

    /// override the host from the configuration
    #[clap(long)]
    host: Option<String>,

    /// Print debug information
    #[clap(long)]
    debug: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database
    Create {
        /// succeed when the database already exists
        #[clap(long)]
        if_not_exists: bool,
    },

    /// Drop the database
    Drop {
        /// allow dropping a database on a non-local host
        #[clap(long)]
        allow_remote: bool,
    },

    /// Drop and recreate the database, leaving it empty
    Purge {
        /// allow purging a database on a non-local host
        #[clap(long)]
        allow_remote: bool,
    },

    /// Print the character set of the database
    Charset,

    /// Print the collation of the database
    Collation,

    /// Print the name of the database the connection is bound to
    CurrentDatabase,

    /// Report whether the configured host is local or on a private network
    Local,

    /// Write the schema as a GO-separated DDL script
    StructureDump {
        /// output file
        path: PathBuf,
    },

    /// Replay a schema script produced by structure-dump
    StructureLoad {
        /// input file
        path: PathBuf,
    },

    /// Write an empty configuration file to the default location
    InitConfig,
}

fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn init_config() -> Result<()> {
    let path = TasksConfig::default_path().ok_or_else(|| anyhow!("Could not determine config directory"))?;
    if path.exists() {
        bail!("Config file already exists: {}", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Unable to create config directory {}", parent.display()))?;
    }
    std::fs::write(&path, EMPTY_CONFIG).with_context(|| format!("Unable to create config file {}", path.display()))?;
    println!("{}", path.display());
    Ok(())
}

/// Destructive tasks only run against local hosts unless explicitly allowed
async fn guard_remote(tasks: &SqlServerDatabaseTasks, allow_remote: bool) -> Result<()> {
    if tasks.is_local().await {
        return Ok(());
    }

    let host = &tasks.config().host;
    if allow_remote {
        warn!(host = %host, database = %tasks.config().database, "modifying a database on a non-local host");
        return Ok(());
    }

    bail!(
        "{} is on a non-local host ({}); pass --allow-remote to continue",
        tasks.config().database,
        host
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    if let Commands::InitConfig = cli.command {
        return init_config();
    }

    let mut settings = TasksConfig::load(cli.config.as_deref())?;
    if let Some(database) = cli.database {
        settings.database = database;
    }
    if let Some(host) = cli.host {
        settings.host = host;
    }

    let mut tasks = SqlServerDatabaseTasks::new(settings.into_connection_config()?);

    match cli.command {
        Commands::Create { if_not_exists } => match tasks.create(false).await {
            Ok(()) => info!(database = %tasks.config().database, "database created"),
            Err(DatabaseError::DatabaseAlreadyExists { database, .. }) if if_not_exists => {
                warn!(database = %database, "database already exists")
            }
            Err(e) => return Err(e.into()),
        },
        Commands::Drop { allow_remote } => {
            guard_remote(&tasks, allow_remote).await?;
            tasks.drop().await?;
            info!(database = %tasks.config().database, "database dropped");
        }
        Commands::Purge { allow_remote } => {
            guard_remote(&tasks, allow_remote).await?;
            tasks.purge().await?;
            info!(database = %tasks.config().database, "database purged");
        }
        Commands::Charset => println!("{}", tasks.charset().await?),
        Commands::Collation => println!("{}", tasks.collation().await?),
        Commands::CurrentDatabase => println!("{}", tasks.current_database().await?),
        Commands::Local => println!("{}", tasks.is_local().await),
        Commands::StructureDump { path } => {
            tasks
                .structure_dump(&path)
                .await
                .with_context(|| format!("structure dump to {} failed", path.display()))?;
        }
        Commands::StructureLoad { path } => {
            tasks
                .structure_load(&path)
                .await
                .with_context(|| format!("structure load from {} failed", path.display()))?;
        }
        Commands::InitConfig => {}
    }

    Ok(())
}
